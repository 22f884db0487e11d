//! Errors surfaced to callers of the helper host.
//!
//! Every failure a caller can observe ends up here:
//! - `Start`: the helper could not be spawned; returned to the call that tried
//! - `Crashed`: the helper exited while the call or callback was in flight
//! - `Remote`: the helper answered with an error object, passed through verbatim
//! - `Send` / `Unavailable`: the request never reached the helper or the host is gone

use crate::error::protocol::ProtocolError;
use crate::error::spawn::SpawnError;
use crate::transport::HelperExit;

use common::{ErrorLocation, SecureValueError};

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::panic::Location;

use serde_json::Value;
use thiserror::Error as ThisError;

/// The single synthetic failure built when a helper generation ends.
///
/// One value is created per exit and cloned into every pending call and callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashFailure {
    pub exit: HelperExit,
    pub location: ErrorLocation,
}

impl CrashFailure {
    #[track_caller]
    pub fn new(exit: HelperExit) -> Self {
        Self {
            exit,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl Display for CrashFailure {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        write!(formatter, "Helper process terminated ({}) {}", self.exit, self.location)
    }
}

#[derive(Debug, ThisError)]
pub enum HostError {
    #[error(transparent)]
    Start(#[from] SpawnError),

    #[error("Crash Error: {0}")]
    Crashed(CrashFailure),

    #[error("Remote Error: '{command}' failed: {payload} {location}")]
    Remote {
        command: String,
        payload: Value,
        location: ErrorLocation,
    },

    #[error("Send Error: {message} {location}")]
    Send {
        message: String,
        location: ErrorLocation,
    },

    #[error("Host Unavailable Error: {message} {location}")]
    Unavailable {
        message: String,
        location: ErrorLocation,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    SecureValue(#[from] SecureValueError),
}

impl HostError {
    #[track_caller]
    pub fn remote(command: impl Into<String>, payload: Value) -> Self {
        HostError::Remote {
            command: command.into(),
            payload,
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn send(message: impl Into<String>) -> Self {
        HostError::Send {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn unavailable(message: impl Into<String>) -> Self {
        HostError::Unavailable {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    /// The helper's error object, if this is a RemoteError.
    pub fn remote_payload(&self) -> Option<&Value> {
        match self {
            HostError::Remote { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn is_crash(&self) -> bool {
        matches!(self, HostError::Crashed(_))
    }

    /// Short category for log fields.
    pub fn error_category(&self) -> &'static str {
        match self {
            HostError::Start(_) => "start",
            HostError::Crashed(_) => "crashed",
            HostError::Remote { .. } => "remote",
            HostError::Send { .. } => "send",
            HostError::Unavailable { .. } => "unavailable",
            HostError::Protocol(_) => "protocol",
            HostError::SecureValue(_) => "secure_value",
        }
    }
}

impl From<CrashFailure> for HostError {
    fn from(failure: CrashFailure) -> Self {
        HostError::Crashed(failure)
    }
}
