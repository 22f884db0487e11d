//! Test helpers for supervisor integration tests.
//!
//! [`FakeLauncher`] stands in for the helper binary: every launch hands the test a
//! [`FakeHelper`] holding the other end of the channel, so a test can read requests,
//! write replies and end the process at will.

use host_core::config::RestartConfig;
use host_core::error::spawn::SpawnError;
use host_core::protocol::{CallId, CallbackId, HelperRequest, InboundMessage};
use host_core::{HelperChannel, HelperExit, HelperHost, HelperLauncher, TransportEvent};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(2);

/// Restart delay short enough to keep tests fast.
pub fn fast_restart() -> RestartConfig {
    RestartConfig {
        enabled: true,
        delay_ms: 10,
    }
}

/// The test's side of one launched helper generation.
pub struct FakeHelper {
    pub generation: u32,
    requests: UnboundedReceiver<HelperRequest>,
    events: UnboundedSender<TransportEvent>,
}

impl FakeHelper {
    /// Next request the host wrote to this helper.
    pub async fn next_request(&mut self) -> HelperRequest {
        timeout(WAIT, self.requests.recv())
            .await
            .expect("Timed out waiting for a helper request")
            .expect("Host closed the helper's stdin")
    }

    /// Whether the host closed this helper's stdin (dropped its request sender).
    pub async fn stdin_closed(&mut self) -> bool {
        matches!(timeout(WAIT, self.requests.recv()).await, Ok(None))
    }

    pub fn send(&self, message: InboundMessage) {
        self.events
            .send(TransportEvent::Message(message))
            .expect("Host dropped the helper channel");
    }

    pub fn reply(&self, call_id: CallId, result: Value) {
        self.send(InboundMessage::Result {
            call_id,
            result: Some(result),
            error: None,
        });
    }

    pub fn reply_error(&self, call_id: CallId, error: Value) {
        self.send(InboundMessage::Result {
            call_id,
            result: None,
            error: Some(error),
        });
    }

    pub fn challenge_progress(&self, callback_id: CallbackId, error: Option<Value>, result: Option<Value>) {
        self.send(InboundMessage::ChallengeResponseResult {
            callback_id,
            error,
            result,
        });
    }

    pub fn raw(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// End this generation the way the process transport does: one final exit event.
    pub fn exit(self, exit: HelperExit) {
        let _ = self.events.send(TransportEvent::Exit(exit));
    }
}

pub struct FakeLauncher {
    launched: UnboundedSender<FakeHelper>,
    launches: Arc<AtomicU32>,
    fail_next: Arc<AtomicBool>,
}

impl HelperLauncher for FakeLauncher {
    fn launch(&mut self) -> Result<HelperChannel, SpawnError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SpawnError::validation("fake helper refused to start"));
        }

        let generation = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let _ = self.launched.send(FakeHelper {
            generation,
            requests: request_rx,
            events: event_tx,
        });

        Ok(HelperChannel {
            requests: request_tx,
            events: event_rx,
            pid: Some(40_000 + generation),
        })
    }
}

pub struct Harness {
    pub host: HelperHost,
    launched: UnboundedReceiver<FakeHelper>,
    launches: Arc<AtomicU32>,
    fail_next: Arc<AtomicBool>,
}

impl Harness {
    pub fn new(restart: RestartConfig) -> Self {
        let (launched_tx, launched_rx) = mpsc::unbounded_channel();
        let launches = Arc::new(AtomicU32::new(0));
        let fail_next = Arc::new(AtomicBool::new(false));

        let launcher = FakeLauncher {
            launched: launched_tx,
            launches: launches.clone(),
            fail_next: fail_next.clone(),
        };

        Self {
            host: HelperHost::new(launcher, &restart),
            launched: launched_rx,
            launches,
            fail_next,
        }
    }

    /// Wait for the host to launch the next helper generation.
    pub async fn next_helper(&mut self) -> FakeHelper {
        timeout(WAIT, self.launched.recv())
            .await
            .expect("Timed out waiting for a helper launch")
            .expect("Launcher dropped")
    }

    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Make the next launch fail with a SpawnError.
    pub fn fail_next_launch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Issue `cmd` from a separate task so the test can play the helper meanwhile.
    pub fn spawn_call(
        &self,
        cmd: &str,
        args: Vec<Value>,
    ) -> tokio::task::JoinHandle<Result<Value, host_core::HostError>> {
        let host = self.host.clone();
        let cmd = cmd.to_string();
        tokio::spawn(async move { host.call(cmd, args).await })
    }
}

/// Await a spawned call, failing the test if it never settles.
pub async fn settled(
    call: tokio::task::JoinHandle<Result<Value, host_core::HostError>>,
) -> Result<Value, host_core::HostError> {
    timeout(WAIT, call)
        .await
        .expect("Call never settled")
        .expect("Call task panicked")
}
