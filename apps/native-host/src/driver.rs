//! Line-oriented JSON driver.
//!
//! Each input line is a request `{"id"?, "cmd", "args"?}` and produces exactly one final
//! output line `{"id", "result"}` or `{"id", "error"}`. Requests run concurrently, so replies
//! can come back out of order; clients match them by `id`.
//!
//! A `yk-chal-resp` request may first produce `{"id", "progress"}` lines, one per "touch the
//! key" prompt, before its final line. YubiKey attach/detach notices from the helper are
//! written as unsolicited `{"event": "yubikeys", "args": [count]}` lines.
//!
//! Besides the helper's own commands the driver understands [`DRIVER_STATUS`] and
//! [`DRIVER_STOP`], which act on the host rather than being forwarded.

use crate::error::NativeHostError;

use host_core::protocol::{CMD_ARGON2, CMD_START_USB, CMD_STOP_USB, CMD_YK_CHAL_RESP};
use host_core::{ChallengeReply, HelperHost, HostError, HostEvent, HostStatus};

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

pub const DRIVER_STATUS: &str = "host-status";
pub const DRIVER_STOP: &str = "host-stop";
pub const EVENT_YUBIKEYS: &str = "yubikeys";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DriverRequest {
    #[serde(default)]
    pub id: Value,
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverReply {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Set only on non-final lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
}

impl DriverReply {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
            progress: None,
        }
    }

    fn err(id: Value, error: Value) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
            progress: None,
        }
    }

    fn progress(id: Value, progress: Value) -> Self {
        Self {
            id,
            result: None,
            error: None,
            progress: Some(progress),
        }
    }

    pub fn is_final(&self) -> bool {
        self.progress.is_none()
    }
}

/// Unsolicited line not tied to any request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverEvent {
    pub event: &'static str,
    pub args: Vec<Value>,
}

/// Anything the driver writes to its output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DriverOutput {
    Reply(DriverReply),
    Event(DriverEvent),
}

impl From<DriverReply> for DriverOutput {
    fn from(reply: DriverReply) -> Self {
        DriverOutput::Reply(reply)
    }
}

impl From<DriverEvent> for DriverOutput {
    fn from(event: DriverEvent) -> Self {
        DriverOutput::Event(event)
    }
}

#[track_caller]
pub fn parse_request(line: &str) -> Result<DriverRequest, NativeHostError> {
    serde_json::from_str(line)
        .map_err(|e| NativeHostError::request(format!("Invalid request line: {e}")))
}

/// Run one request against the host and return its final reply.
///
/// Intermediate lines (challenge-response touch prompts) go to `progress` as they arrive.
pub async fn execute(
    host: &HelperHost,
    request: DriverRequest,
    progress: &UnboundedSender<DriverOutput>,
) -> DriverReply {
    let DriverRequest { id, cmd, args } = request;

    let outcome = match cmd.as_str() {
        DRIVER_STATUS => host.status().await.map(status_json),
        DRIVER_STOP => host.stop().await.map(|()| Value::Null),
        CMD_START_USB => host.start_usb_listener().await,
        CMD_STOP_USB => host.stop_usb_listener().await,
        CMD_ARGON2 => match argon2(host, args).await {
            Ok(outcome) => outcome,
            Err(e) => return DriverReply::err(id, native_error_json(e)),
        },
        CMD_YK_CHAL_RESP => match challenge_response(host, &id, args, progress).await {
            Ok(outcome) => outcome,
            Err(e) => return DriverReply::err(id, native_error_json(e)),
        },
        _ => host.call(cmd, args).await,
    };

    match outcome {
        Ok(result) => DriverReply::ok(id, result),
        Err(e) => {
            debug!("Driver request {id} failed ({})", e.error_category());
            DriverReply::err(id, host_error_json(e))
        }
    }
}

/// `argon2` arrives with a plain string password; it is masked before reaching the helper.
async fn argon2(
    host: &HelperHost,
    args: Vec<Value>,
) -> Result<Result<Value, HostError>, NativeHostError> {
    let mut args = args.into_iter();

    let mut password = match args.next() {
        Some(Value::String(password)) => password.into_bytes(),
        _ => return Err(NativeHostError::request("argon2 expects a password string first")),
    };
    let salt = bytes_arg(args.next(), "argon2 salt")?;
    let options = args.next().unwrap_or(Value::Null);

    Ok(host.argon2(&mut password, &salt, options).await)
}

/// `yk-chal-resp [yubikey, challenge, slot]`. The callback id is allocated by the host, so
/// a client-supplied trailing id is ignored.
async fn challenge_response(
    host: &HelperHost,
    id: &Value,
    args: Vec<Value>,
    progress: &UnboundedSender<DriverOutput>,
) -> Result<Result<Value, HostError>, NativeHostError> {
    let mut args = args.into_iter();

    let yubikey = args
        .next()
        .ok_or_else(|| NativeHostError::request("yk-chal-resp expects a yubikey first"))?;
    let challenge = bytes_arg(args.next(), "yk-chal-resp challenge")?;
    let slot = args
        .next()
        .and_then(|slot| slot.as_u64())
        .and_then(|slot| u8::try_from(slot).ok())
        .ok_or_else(|| NativeHostError::request("yk-chal-resp expects a slot number third"))?;

    let mut session = match host.yubikey_challenge_response(yubikey, &challenge, slot).await {
        Ok(session) => session,
        Err(e) => return Ok(Err(e)),
    };

    while let Some(reply) = session.next_reply().await {
        match reply {
            ChallengeReply::TouchRequested { error, .. } => {
                trace!("Challenge-response {} wants a touch", session.callback_id());
                let _ = progress.send(DriverReply::progress(id.clone(), error).into());
            }
            ChallengeReply::Done(outcome) => return Ok(outcome),
        }
    }

    Ok(Err(HostError::unavailable(
        "challenge-response ended without a final reply",
    )))
}

/// Bytes given either as a string or as an array of numbers.
fn bytes_arg(arg: Option<Value>, what: &str) -> Result<Vec<u8>, NativeHostError> {
    match arg {
        Some(Value::String(text)) => Ok(text.into_bytes()),
        Some(bytes @ Value::Array(_)) => serde_json::from_value(bytes)
            .map_err(|e| NativeHostError::request(format!("{what} is not bytes: {e}"))),
        _ => Err(NativeHostError::request(format!("{what} is missing"))),
    }
}

fn status_json(status: HostStatus) -> Value {
    json!({
        "running": status.running,
        "pid": status.pid,
        "generation": status.generation,
        "pendingCalls": status.pending_calls,
        "pendingCallbacks": status.pending_callbacks,
        "usbListener": status.usb_listener,
        "restartScheduled": status.restart_scheduled,
    })
}

/// Helper errors go back verbatim; everything else as a serialized [`NativeHostError`].
fn host_error_json(error: HostError) -> Value {
    if let Some(payload) = error.remote_payload() {
        return payload.clone();
    }
    native_error_json(NativeHostError::from(error))
}

fn native_error_json(error: NativeHostError) -> Value {
    serde_json::to_value(&error).unwrap_or_else(|_| Value::String(error.to_string()))
}

/// Serve requests from `input` until EOF, then wait for every in-flight request.
///
/// Host events are forwarded for as long as requests are being served.
///
/// # Errors
///
/// Returns [`NativeHostError::NativeHost`] if reading `input` or writing `output` fails.
pub async fn serve<R, W>(host: HelperHost, input: R, output: W) -> Result<(), NativeHostError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_replies(output, reply_rx));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let forwarder = tokio::spawn(forward_events(
        host.subscribe(),
        reply_tx.clone(),
        shutdown_rx,
    ));

    let mut in_flight = JoinSet::new();
    let mut lines = input.lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| NativeHostError::native_host(format!("Failed to read request: {e}")))?
    {
        if line.trim().is_empty() {
            continue;
        }

        match parse_request(&line) {
            Ok(request) => {
                let host = host.clone();
                let replies = reply_tx.clone();
                in_flight.spawn(async move {
                    let reply = execute(&host, request, &replies).await;
                    let _ = replies.send(reply.into());
                });
            }
            Err(e) => {
                warn!("{e}");
                let _ = reply_tx.send(DriverReply::err(Value::Null, native_error_json(e)).into());
            }
        }
    }

    debug!("Driver input closed, {} request(s) in flight", in_flight.len());
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!("Driver request task failed: {e}");
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = forwarder.await {
        warn!("Event forwarder failed: {e}");
    }

    drop(reply_tx);
    writer
        .await
        .map_err(|e| NativeHostError::native_host(format!("Reply writer failed: {e}")))?
}

/// Copy host events to the output until `shutdown` fires, then flush what is queued.
async fn forward_events(
    mut events: broadcast::Receiver<HostEvent>,
    output: UnboundedSender<DriverOutput>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => forward_event(event, &output),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Driver missed {skipped} host event(s)");
                }
                Err(RecvError::Closed) => return,
            },
            _ = &mut shutdown => break,
        }
    }

    loop {
        match events.try_recv() {
            Ok(event) => forward_event(event, &output),
            Err(TryRecvError::Lagged(skipped)) => warn!("Driver missed {skipped} host event(s)"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return,
        }
    }
}

fn forward_event(event: HostEvent, output: &UnboundedSender<DriverOutput>) {
    match event {
        HostEvent::YubiKeysChanged(count) => {
            let _ = output.send(
                DriverEvent {
                    event: EVENT_YUBIKEYS,
                    args: vec![Value::from(count)],
                }
                .into(),
            );
        }
        other => trace!("Not forwarding host event {other:?}"),
    }
}

async fn write_replies<W>(
    mut output: W,
    mut replies: UnboundedReceiver<DriverOutput>,
) -> Result<(), NativeHostError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = replies.recv().await {
        let mut line = serde_json::to_string(&reply)
            .map_err(|e| NativeHostError::native_host(format!("Failed to encode reply: {e}")))?;
        line.push('\n');

        output
            .write_all(line.as_bytes())
            .await
            .map_err(|e| NativeHostError::native_host(format!("Failed to write reply: {e}")))?;
        output
            .flush()
            .await
            .map_err(|e| NativeHostError::native_host(format!("Failed to flush reply: {e}")))?;
    }

    Ok(())
}
