//! Line-delimited JSON protocol spoken with the helper process.
//!
//! Requests are `{"cmd", "args", "callId"}` objects, one per line on the helper's stdin.
//! Everything the helper writes to stdout is addressed by `cmd`: `result` settles a call,
//! `yk-chal-resp-result` feeds a challenge-response callback, `yubikeys` and `log` are
//! unsolicited. Any other `cmd` is an [`ProtocolError::UnhandledCommand`].

use crate::error::protocol::ProtocolError;

use common::ErrorLocation;

use std::panic::Location;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Correlates one request with its `result` reply. Unique per helper generation.
pub type CallId = u64;

/// Correlates challenge-response progress with its registered handler.
pub type CallbackId = u64;

pub const CMD_RESULT: &str = "result";
pub const CMD_YK_CHAL_RESP_RESULT: &str = "yk-chal-resp-result";
pub const CMD_YUBIKEYS: &str = "yubikeys";
pub const CMD_LOG: &str = "log";

const INBOUND_COMMANDS: [&str; 4] = [CMD_RESULT, CMD_YK_CHAL_RESP_RESULT, CMD_YUBIKEYS, CMD_LOG];

pub const CMD_START_USB: &str = "start-usb";
pub const CMD_STOP_USB: &str = "stop-usb";
pub const CMD_GET_YUBIKEYS: &str = "get-yubikeys";
pub const CMD_YK_CHAL_RESP: &str = "yk-chal-resp";
pub const CMD_YK_CANCEL_CHAL_RESP: &str = "yk-cancel-chal-resp";
pub const CMD_ARGON2: &str = "argon2";
pub const CMD_KBD_GET_ACTIVE_WINDOW: &str = "kbd-get-active-window";
pub const CMD_KBD_GET_ACTIVE_PID: &str = "kbd-get-active-pid";
pub const CMD_KBD_TEXT_AS_KEYS: &str = "kbd-text-as-keys";
pub const CMD_KBD_KEY_PRESS: &str = "kbd-key-press";
pub const CMD_KBD_SHORTCUT: &str = "kbd-shortcut";
pub const CMD_KBD_KEY_MOVE_WITH_MODIFIER: &str = "kbd-key-move-with-modifier";
pub const CMD_KBD_KEY_PRESS_WITH_CHARACTER: &str = "kbd-key-press-with-character";
pub const CMD_KBD_ENSURE_MODIFIER_NOT_PRESSED: &str = "kbd-ensure-modifier-not-pressed";

/// Error field the helper sets when a challenge-response needs another touch.
pub const TOUCH_REQUESTED_FIELD: &str = "touchRequested";

/// Outbound call envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperRequest {
    pub cmd: String,
    pub args: Vec<Value>,
    #[serde(rename = "callId")]
    pub call_id: CallId,
}

impl HelperRequest {
    pub fn new(cmd: impl Into<String>, args: Vec<Value>, call_id: CallId) -> Self {
        Self {
            cmd: cmd.into(),
            args,
            call_id,
        }
    }
}

/// Messages the helper can send, closed over the known command kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum InboundMessage {
    #[serde(rename = "result", rename_all = "camelCase")]
    Result {
        call_id: CallId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },

    #[serde(rename = "yk-chal-resp-result", rename_all = "camelCase")]
    ChallengeResponseResult {
        callback_id: CallbackId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    #[serde(rename = "yubikeys")]
    YubiKeys {
        #[serde(default)]
        args: Vec<Value>,
    },

    #[serde(rename = "log")]
    Log {
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl InboundMessage {
    /// Name of the command on the wire.
    pub fn command(&self) -> &'static str {
        match self {
            InboundMessage::Result { .. } => CMD_RESULT,
            InboundMessage::ChallengeResponseResult { .. } => CMD_YK_CHAL_RESP_RESULT,
            InboundMessage::YubiKeys { .. } => CMD_YUBIKEYS,
            InboundMessage::Log { .. } => CMD_LOG,
        }
    }
}

/// Serialize a message as one newline-terminated JSON line.
#[track_caller]
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message).map_err(|e| ProtocolError::Encode {
        message: format!("Failed to encode helper message: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;
    line.push('\n');
    Ok(line)
}

/// Decode one stdout line from the helper.
#[track_caller]
pub fn decode_inbound(line: &str) -> Result<InboundMessage, ProtocolError> {
    let value: Value = serde_json::from_str(line)?;

    let cmd = value
        .get("cmd")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::decode("helper message has no string 'cmd' field"))?;

    if !INBOUND_COMMANDS.contains(&cmd) {
        return Err(ProtocolError::unhandled_command(cmd));
    }

    Ok(serde_json::from_value(value)?)
}

/// Number of tokens reported by a `yubikeys` notification.
pub fn yubikey_count(args: &[Value]) -> Option<u32> {
    args.first()
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

/// Render `log` arguments the way the helper meant them: strings verbatim, the rest as JSON.
pub fn format_log_args(args: &[Value]) -> String {
    args.iter()
        .map(|arg| match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether a challenge-response error says "touch the key again, another reply follows".
pub fn is_touch_requested(error: &Value) -> bool {
    error
        .get(TOUCH_REQUESTED_FIELD)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
