//! Helper transport backed by a real child process.
//!
//! Requests go to the child's stdin as JSON lines; stdout lines are decoded into
//! [`InboundMessage`](crate::protocol::InboundMessage)s; stderr is forwarded to the log.
//! The exit event is only emitted after stdout hits EOF, so every reply the helper managed
//! to write is dispatched before its pending calls are failed.

use crate::config::HelperConfig;
use crate::error::spawn::SpawnError;
use crate::error::transport::TransportError;
use crate::protocol::{HelperRequest, decode_inbound, encode_line};
use crate::transport::{HelperChannel, HelperExit, HelperLauncher, TransportEvent};

use common::ErrorLocation;

use std::panic::Location;
use std::process::Stdio;

use log::{debug, info, trace, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child as TokioChild, ChildStderr, ChildStdin, ChildStdout};
use tokio::process::Command as TokioCommand;
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

pub(crate) fn build_helper_command(config: &HelperConfig) -> TokioCommand {
    let mut cmd = TokioCommand::new(&config.program);
    cmd.args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Launches the configured helper binary. Must be used from within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: HelperConfig,
}

impl ProcessLauncher {
    pub fn new(config: HelperConfig) -> Self {
        Self { config }
    }
}

impl HelperLauncher for ProcessLauncher {
    fn launch(&mut self) -> Result<HelperChannel, SpawnError> {
        if self.config.program.as_os_str().is_empty() {
            return Err(SpawnError::validation("helper program path is empty"));
        }

        let program = self.config.program.display().to_string();
        debug!("Spawning helper process {program}");

        let mut child = build_helper_command(&self.config)
            .spawn()
            .map_err(|e| SpawnError::Spawn {
                program: program.clone(),
                message: e.to_string(),
                location: ErrorLocation::from(Location::caller()),
                source: Box::new(e),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SpawnError::stdio("Helper process has no stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SpawnError::stdio("Helper process has no stdout"))?;
        let stderr = child.stderr.take();
        let pid = child.id();

        info!("Spawned helper {program} (PID: {pid:?})");

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        TokioSpawn(write_requests(stdin, request_rx, event_tx.clone()));
        if let Some(stderr) = stderr {
            TokioSpawn(forward_stderr(stderr));
        }
        let reader = TokioSpawn(read_messages(stdout, event_tx.clone()));
        TokioSpawn(wait_for_exit(child, reader, event_tx));

        Ok(HelperChannel {
            requests: request_tx,
            events: event_rx,
            pid,
        })
    }
}

/// Writes requests until the supervisor drops its sender, then closes stdin.
async fn write_requests(
    mut stdin: ChildStdin,
    mut requests: UnboundedReceiver<HelperRequest>,
    events: UnboundedSender<TransportEvent>,
) {
    while let Some(request) = requests.recv().await {
        let line = match encode_line(&request) {
            Ok(line) => line,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.into()));
                continue;
            }
        };

        trace!("Helper request: {}", line.trim_end());

        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            let _ = events.send(TransportEvent::Error(TransportError::io(
                "Failed to write helper request",
                &e,
            )));
            break;
        }

        if let Err(e) = stdin.flush().await {
            let _ = events.send(TransportEvent::Error(TransportError::io(
                "Failed to flush helper stdin",
                &e,
            )));
            break;
        }
    }

    debug!("Helper stdin closed");
}

async fn read_messages(stdout: ChildStdout, events: UnboundedSender<TransportEvent>) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }

                trace!("Helper output: {line}");

                let event = match decode_inbound(&line) {
                    Ok(message) => TransportEvent::Message(message),
                    Err(e) => TransportEvent::Error(e.into()),
                };

                if events.send(event).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("Helper stdout reached EOF");
                break;
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(TransportError::io(
                    "Failed to read helper output",
                    &e,
                )));
                break;
            }
        }
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("Helper stderr: {line}");
    }
}

async fn wait_for_exit(
    mut child: TokioChild,
    reader: JoinHandle<()>,
    events: UnboundedSender<TransportEvent>,
) {
    if let Err(e) = reader.await {
        warn!("Helper output reader task failed: {e}");
    }

    let exit = match child.wait().await {
        Ok(status) => HelperExit::from(status),
        Err(e) => {
            let _ = events.send(TransportEvent::Error(TransportError::io(
                "Failed to wait for helper process",
                &e,
            )));
            HelperExit::unknown()
        }
    };

    debug!("Helper process reaped ({exit})");
    let _ = events.send(TransportEvent::Exit(exit));
}
