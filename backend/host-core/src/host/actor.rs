//! The supervisor task.
//!
//! Owns everything that changes over a helper's lifetime: the current channel, the
//! pending calls, the challenge-response registrations, the sticky flags and the restart
//! timer. Commands from [`HelperHost`](super::HelperHost) handles, transport events and
//! the restart timer are all processed here one at a time.

use crate::config::RestartConfig;
use crate::error::{CrashFailure, HostError};
use crate::host::callbacks::{CallbackRegistry, ChallengeHandler};
use crate::host::correlator::{CallCorrelator, CallOutcome, Responder};
use crate::host::{HostEvent, HostStatus};
use crate::protocol::{
    CMD_START_USB, CMD_STOP_USB, CMD_YK_CHAL_RESP, CallbackId, HelperRequest, InboundMessage,
    format_log_args, yubikey_count,
};
use crate::transport::{HelperChannel, HelperExit, HelperLauncher, TransportEvent};

use std::future::pending;
use std::pin::Pin;

use backoff::backoff::{Backoff, Constant};
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Sleep, sleep};

/// Commands sent from handles to the supervisor task.
pub(crate) enum HostCommand {
    Start {
        reply: oneshot::Sender<Result<(), HostError>>,
    },
    Call {
        cmd: String,
        args: Vec<Value>,
        reply: oneshot::Sender<CallOutcome>,
    },
    ChallengeResponse {
        callback_id: CallbackId,
        args: Vec<Value>,
        handler: ChallengeHandler,
        reply: oneshot::Sender<CallOutcome>,
    },
    SetUsbListener {
        enabled: bool,
        reply: oneshot::Sender<CallOutcome>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<HostStatus>,
    },
}

struct RunningHelper {
    /// `None` once `stop()` closed the helper's stdin.
    requests: Option<mpsc::UnboundedSender<HelperRequest>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    pid: Option<u32>,
    generation: u64,
}

pub(crate) struct HostActor {
    launcher: Box<dyn HelperLauncher>,
    restart_enabled: bool,
    restart_backoff: Constant,
    restart_timer: Option<Pin<Box<Sleep>>>,
    helper: Option<RunningHelper>,
    generation: u64,
    correlator: CallCorrelator,
    callbacks: CallbackRegistry,
    usb_listener: bool,
    stopping: bool,
    events: broadcast::Sender<HostEvent>,
}

impl HostActor {
    pub(crate) fn new(
        launcher: Box<dyn HelperLauncher>,
        restart: &RestartConfig,
        events: broadcast::Sender<HostEvent>,
    ) -> Self {
        Self {
            launcher,
            restart_enabled: restart.enabled,
            restart_backoff: Constant::new(restart.delay()),
            restart_timer: None,
            helper: None,
            generation: 0,
            correlator: CallCorrelator::new(),
            callbacks: CallbackRegistry::new(),
            usb_listener: false,
            stopping: false,
            events,
        }
    }

    /// Runs until every [`HelperHost`](super::HelperHost) handle is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HostCommand>) {
        info!("Helper host supervisor started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                event = next_helper_event(&mut self.helper) => self.handle_transport_event(event),
                () = restart_due(&mut self.restart_timer) => self.auto_restart(),
            }
        }

        info!("Helper host supervisor stopped");
    }

    fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::Start { reply } => {
                let _ = reply.send(self.ensure_started());
            }
            HostCommand::Call { cmd, args, reply } => self.handle_call(cmd, args, reply),
            HostCommand::ChallengeResponse {
                callback_id,
                args,
                handler,
                reply,
            } => self.handle_challenge_response(callback_id, args, handler, reply),
            HostCommand::SetUsbListener { enabled, reply } => {
                self.handle_set_usb_listener(enabled, reply)
            }
            HostCommand::Stop { reply } => {
                self.handle_stop();
                let _ = reply.send(());
            }
            HostCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Spawn a helper unless one is already up, then re-apply sticky flags.
    fn ensure_started(&mut self) -> Result<(), HostError> {
        if self.helper.is_some() {
            return Ok(());
        }

        let HelperChannel {
            requests,
            events,
            pid,
        } = self.launcher.launch()?;

        self.generation += 1;
        self.stopping = false;
        self.helper = Some(RunningHelper {
            requests: Some(requests),
            events,
            pid,
            generation: self.generation,
        });

        info!(
            "Helper process started (generation {}, PID: {pid:?})",
            self.generation
        );
        let _ = self.events.send(HostEvent::Started {
            pid,
            generation: self.generation,
        });

        if self.usb_listener {
            info!("Re-enabling USB listener on fresh helper");
            self.issue(CMD_START_USB.to_string(), Vec::new(), Responder::Detached);
        }

        Ok(())
    }

    fn handle_call(&mut self, cmd: String, args: Vec<Value>, reply: oneshot::Sender<CallOutcome>) {
        if let Err(e) = self.ensure_started() {
            error!("Cannot call '{cmd}': {e}");
            let _ = reply.send(Err(e));
            return;
        }

        self.issue(cmd, args, Responder::Caller(reply));
    }

    fn handle_challenge_response(
        &mut self,
        callback_id: CallbackId,
        mut args: Vec<Value>,
        handler: ChallengeHandler,
        reply: oneshot::Sender<CallOutcome>,
    ) {
        if let Err(e) = self.ensure_started() {
            error!("Cannot start challenge-response: {e}");
            let _ = reply.send(Err(e));
            return;
        }

        self.callbacks.register(callback_id, handler);
        args.push(Value::from(callback_id));
        if !self.issue(CMD_YK_CHAL_RESP.to_string(), args, Responder::Caller(reply)) {
            self.callbacks.unregister(callback_id);
        }
    }

    fn handle_set_usb_listener(&mut self, enabled: bool, reply: oneshot::Sender<CallOutcome>) {
        if enabled {
            // The flag goes up after the call so a fresh helper does not get start-usb twice.
            self.handle_call(CMD_START_USB.to_string(), Vec::new(), reply);
            self.usb_listener = true;
        } else {
            self.usb_listener = false;
            if self.helper.is_some() {
                self.issue(CMD_STOP_USB.to_string(), Vec::new(), Responder::Caller(reply));
            } else {
                let _ = reply.send(Ok(Value::Null));
            }
        }
    }

    /// Register a pending call and write its request to the running helper.
    ///
    /// Returns `false` if the request could not be written; the call has then been rejected.
    fn issue(&mut self, cmd: String, args: Vec<Value>, responder: Responder) -> bool {
        let call_id = self.correlator.issue(cmd.clone(), responder);

        let requests = self.helper.as_ref().and_then(|h| h.requests.as_ref());
        let sent = match requests {
            Some(requests) => requests
                .send(HelperRequest::new(cmd.as_str(), args, call_id))
                .is_ok(),
            None => false,
        };

        if sent {
            debug!("Called helper '{cmd}' (callId={call_id})");
        } else if let Some(call) = self.correlator.withdraw(call_id) {
            warn!("Could not deliver '{cmd}' to the helper");
            call.complete(Err(HostError::send(format!(
                "helper is not accepting requests for '{cmd}'"
            ))));
        }

        sent
    }

    fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(message)) => self.dispatch(message),
            Some(TransportEvent::Error(e)) => warn!("Helper transport error: {e}"),
            Some(TransportEvent::Exit(exit)) => self.handle_exit(exit),
            None => {
                warn!("Helper event channel closed without an exit status");
                self.handle_exit(HelperExit::unknown());
            }
        }
    }

    fn dispatch(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Result {
                call_id,
                result,
                error,
            } => {
                self.correlator.settle(call_id, result, error);
            }
            InboundMessage::ChallengeResponseResult {
                callback_id,
                error,
                result,
            } => {
                if let Some(state) = self.callbacks.dispatch(callback_id, error, result) {
                    trace!("Challenge-response {callback_id} is now {state:?}");
                }
            }
            InboundMessage::YubiKeys { args } => match yubikey_count(&args) {
                Some(count) => {
                    debug!("Helper reports {count} YubiKey(s)");
                    let _ = self.events.send(HostEvent::YubiKeysChanged(count));
                }
                None => warn!("Malformed yubikeys notification: {args:?}"),
            },
            InboundMessage::Log { args } => info!("[helper] {}", format_log_args(&args)),
        }
    }

    /// Tear down one helper generation. Every in-flight call and callback sees the same failure.
    fn handle_exit(&mut self, exit: HelperExit) {
        let generation = self.helper.take().map(|h| h.generation).unwrap_or_default();

        if exit.is_graceful() {
            info!("Helper process (generation {generation}) exited ({exit})");
        } else {
            warn!("Helper process (generation {generation}) exited abnormally ({exit})");
        }

        let failure = CrashFailure::new(exit);
        let failed_calls = self.correlator.fail_all(&failure);
        let failed_callbacks = self.callbacks.fail_all(&failure);
        if failed_calls + failed_callbacks > 0 {
            warn!(
                "Failed {failed_calls} pending call(s) and {failed_callbacks} callback(s) after helper exit"
            );
        }

        let _ = self.events.send(HostEvent::Exited(exit));

        let stopping = std::mem::take(&mut self.stopping);
        if exit.is_graceful() || stopping || !self.restart_enabled {
            return;
        }

        let Some(delay) = self.restart_backoff.next_backoff() else {
            warn!("Restart policy gave no delay, helper stays down");
            return;
        };
        info!("Restarting helper in {delay:?}");
        self.restart_timer = Some(Box::pin(sleep(delay)));
    }

    fn auto_restart(&mut self) {
        self.restart_timer = None;

        if self.helper.is_some() {
            debug!("Helper already running, skipping scheduled restart");
            return;
        }

        if let Err(e) = self.ensure_started() {
            error!("Helper process failed to auto-restart: {e}");
        }
    }

    fn handle_stop(&mut self) {
        self.restart_timer = None;

        match self.helper.as_mut() {
            Some(helper) => {
                info!("Stopping helper process (generation {})", helper.generation);
                self.stopping = true;
                helper.requests = None;
            }
            None => debug!("Stop requested but no helper is running"),
        }
    }

    fn status(&self) -> HostStatus {
        HostStatus {
            running: self.helper.is_some(),
            pid: self.helper.as_ref().and_then(|h| h.pid),
            generation: self.generation,
            pending_calls: self.correlator.len(),
            pending_callbacks: self.callbacks.len(),
            usb_listener: self.usb_listener,
            restart_scheduled: self.restart_timer.is_some(),
        }
    }
}

async fn next_helper_event(helper: &mut Option<RunningHelper>) -> Option<TransportEvent> {
    match helper {
        Some(helper) => helper.events.recv().await,
        None => pending().await,
    }
}

async fn restart_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}
