//! Channel to one helper process generation.
//!
//! A [`HelperLauncher`] produces a [`HelperChannel`] per launch: a sender for outbound
//! requests and a receiver of [`TransportEvent`]s (decoded messages, transport errors and
//! exactly one final exit). The supervisor never touches the OS process directly, which
//! lets tests drive it with an in-memory launcher.

pub mod process;

pub use process::ProcessLauncher;

use crate::error::spawn::SpawnError;
use crate::error::transport::TransportError;
use crate::protocol::{HelperRequest, InboundMessage};

use std::fmt::{Display, Formatter, Result as FormatResult};

use tokio::sync::mpsc;

/// How a helper process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl HelperExit {
    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn with_signal(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }

    /// Exit observed without a status (the transport vanished).
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    /// Only a clean zero exit counts as a graceful shutdown.
    pub fn is_graceful(&self) -> bool {
        self.code == Some(0)
    }
}

impl Display for HelperExit {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        match (self.code, self.signal) {
            (Some(code), Some(signal)) => write!(formatter, "code {code}, signal {signal}"),
            (Some(code), None) => write!(formatter, "code {code}"),
            (None, Some(signal)) => write!(formatter, "signal {signal}"),
            (None, None) => write!(formatter, "no exit status"),
        }
    }
}

impl From<std::process::ExitStatus> for HelperExit {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

#[derive(Debug)]
pub enum TransportEvent {
    Message(InboundMessage),
    Error(TransportError),
    Exit(HelperExit),
}

/// Both ends of the conversation with one running helper.
#[derive(Debug)]
pub struct HelperChannel {
    pub requests: mpsc::UnboundedSender<HelperRequest>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub pid: Option<u32>,
}

/// Spawns helper generations. Called only from the supervisor task.
pub trait HelperLauncher: Send + 'static {
    fn launch(&mut self) -> Result<HelperChannel, SpawnError>;
}
