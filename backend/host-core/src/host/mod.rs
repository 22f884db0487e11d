//! Supervised helper host.
//!
//! [`HelperHost`] is the only way into the helper process. It is a cheap `Clone` handle;
//! all state lives in a supervisor task spawned by [`HelperHost::new`]:
//!
//! - Lazy start: the first call spawns the helper, later calls reuse it
//! - Correlation: each call gets a fresh id and settles exactly once
//! - Crash handling: an exit fails every pending call and callback with one
//!   [`CrashFailure`](crate::error::CrashFailure) and, if the exit was abnormal,
//!   schedules one restart
//! - Sticky flags: the USB listener is switched back on after every restart
//!
//! # Architecture
//!
//! Same actor shape as the rest of the backend: handles send commands over an mpsc
//! channel, one task applies them in order together with transport events. Nothing is
//! shared, so nothing is locked.

mod actor;
pub(crate) mod callbacks;
pub(crate) mod correlator;

pub use callbacks::{ChallengeHandler, ChallengeReply, RegistrationState};

use crate::config::{HostConfig, RestartConfig};
use crate::error::HostError;
use crate::host::actor::{HostActor, HostCommand};
use crate::protocol::CallbackId;
use crate::transport::{HelperExit, HelperLauncher, ProcessLauncher};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notifications about the helper that are not replies to a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Started { pid: Option<u32>, generation: u64 },
    Exited(HelperExit),
    /// The helper's `yubikeys` notification: number of tokens currently attached.
    YubiKeysChanged(u32),
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    pub running: bool,
    pub pid: Option<u32>,
    /// Number of helpers started so far; the current one if `running`.
    pub generation: u64,
    pub pending_calls: usize,
    pub pending_callbacks: usize,
    pub usb_listener: bool,
    pub restart_scheduled: bool,
}

/// Handle to a supervised helper process.
///
/// # Thread Safety
///
/// This type is `Clone` and can be shared across tasks. All clones talk to the same
/// supervisor; it shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct HelperHost {
    commands: mpsc::UnboundedSender<HostCommand>,
    events: broadcast::Sender<HostEvent>,
    next_callback_id: Arc<AtomicU64>,
}

impl HelperHost {
    /// Spawn the supervisor task. Must be called from within a Tokio runtime.
    ///
    /// No helper process is started until the first call needs one.
    pub fn new(launcher: impl HelperLauncher, restart: &RestartConfig) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let actor = HostActor::new(Box::new(launcher), restart, event_tx.clone());
        tokio::spawn(actor.run(command_rx));

        Self {
            commands: command_tx,
            events: event_tx,
            next_callback_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Host for the helper binary described by `config`.
    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(ProcessLauncher::new(config.helper.clone()), &config.restart)
    }

    /// Receive [`HostEvent`]s emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// Start the helper now instead of on the first call. No-op if it is running.
    pub async fn ensure_started(&self) -> Result<(), HostError> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::Start { reply })?;
        rx.await.map_err(|_| supervisor_gone())?
    }

    /// Invoke `cmd` on the helper with positional `args`.
    ///
    /// Starts the helper if needed. Settles exactly once: with the helper's `result`,
    /// with [`HostError::Remote`] carrying its `error`, with [`HostError::Start`] if no
    /// helper could be spawned, or with [`HostError::Crashed`] if the helper exits first.
    ///
    /// There is no timeout: a helper that neither replies nor exits leaves the call pending.
    pub async fn call(&self, cmd: impl Into<String>, args: Vec<Value>) -> Result<Value, HostError> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::Call {
            cmd: cmd.into(),
            args,
            reply,
        })?;
        rx.await.map_err(|_| supervisor_gone())?
    }

    /// Turn the helper's USB listener on and keep it on across restarts.
    pub async fn start_usb_listener(&self) -> Result<Value, HostError> {
        self.set_usb_listener(true).await
    }

    /// Turn the USB listener off. Only talks to the helper if one is running.
    pub async fn stop_usb_listener(&self) -> Result<Value, HostError> {
        self.set_usb_listener(false).await
    }

    async fn set_usb_listener(&self, enabled: bool) -> Result<Value, HostError> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::SetUsbListener { enabled, reply })?;
        rx.await.map_err(|_| supervisor_gone())?
    }

    /// Close the helper's stdin so it can exit; its exit will not trigger a restart.
    ///
    /// The next call starts a fresh helper.
    pub async fn stop(&self) -> Result<(), HostError> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::Stop { reply })?;
        rx.await.map_err(|_| supervisor_gone())
    }

    pub async fn status(&self) -> Result<HostStatus, HostError> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::Status { reply })?;
        rx.await.map_err(|_| supervisor_gone())
    }

    /// `(pending calls, pending challenge-response callbacks)`.
    pub async fn pending_counts(&self) -> Result<(usize, usize), HostError> {
        let status = self.status().await?;
        Ok((status.pending_calls, status.pending_callbacks))
    }

    pub async fn is_running(&self) -> bool {
        self.status().await.map(|s| s.running).unwrap_or(false)
    }

    pub(crate) fn allocate_callback_id(&self) -> CallbackId {
        self.next_callback_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `handler` under `callback_id` and issue `yk-chal-resp` with `args`
    /// followed by the id. The registration is only made once a helper is running.
    pub(crate) async fn start_challenge_response(
        &self,
        callback_id: CallbackId,
        args: Vec<Value>,
        handler: ChallengeHandler,
    ) -> Result<Value, HostError> {
        let (reply, rx) = oneshot::channel();
        self.send(HostCommand::ChallengeResponse {
            callback_id,
            args,
            handler,
            reply,
        })?;
        rx.await.map_err(|_| supervisor_gone())?
    }

    #[track_caller]
    fn send(&self, command: HostCommand) -> Result<(), HostError> {
        self.commands
            .send(command)
            .map_err(|_| HostError::unavailable("helper host supervisor is not running"))
    }
}

#[track_caller]
fn supervisor_gone() -> HostError {
    HostError::unavailable("helper host supervisor dropped the request")
}
