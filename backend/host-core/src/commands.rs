//! Typed wrappers for the helper's command set.
//!
//! Each method is a thin shim over [`HelperHost::call`]: it fixes the command name and
//! shapes the positional arguments. Replies are passed back as the helper sent them.

use crate::error::HostError;
use crate::error::protocol::ProtocolError;
use crate::host::{ChallengeReply, HelperHost};
use crate::protocol::{
    CMD_ARGON2, CMD_GET_YUBIKEYS, CMD_KBD_ENSURE_MODIFIER_NOT_PRESSED, CMD_KBD_GET_ACTIVE_PID,
    CMD_KBD_GET_ACTIVE_WINDOW, CMD_KBD_KEY_MOVE_WITH_MODIFIER, CMD_KBD_KEY_PRESS,
    CMD_KBD_KEY_PRESS_WITH_CHARACTER, CMD_KBD_SHORTCUT, CMD_KBD_TEXT_AS_KEYS,
    CMD_YK_CANCEL_CHAL_RESP, CallbackId,
};

use common::secure_value;

use log::debug;
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Progress of one challenge-response started with
/// [`HelperHost::yubikey_challenge_response`].
pub struct ChallengeSession {
    callback_id: CallbackId,
    replies: mpsc::UnboundedReceiver<ChallengeReply>,
    finished: bool,
}

impl ChallengeSession {
    pub fn callback_id(&self) -> CallbackId {
        self.callback_id
    }

    /// Next reply from the helper. Returns `None` after the terminal reply.
    pub async fn next_reply(&mut self) -> Option<ChallengeReply> {
        if self.finished {
            return None;
        }

        let reply = self.replies.recv().await?;
        self.finished = reply.is_terminal();
        Some(reply)
    }

    /// Skip "touch again" notices and wait for the terminal outcome.
    pub async fn finish(mut self) -> Result<Value, HostError> {
        while let Some(reply) = self.next_reply().await {
            if let ChallengeReply::Done(outcome) = reply {
                return outcome;
            }
        }

        Err(HostError::unavailable(
            "challenge-response ended without a final reply",
        ))
    }
}

impl HelperHost {
    /// List attached YubiKeys. `config` is forwarded to the helper untouched.
    pub async fn get_yubikeys(&self, config: Value) -> Result<Value, HostError> {
        self.call(CMD_GET_YUBIKEYS, vec![config]).await
    }

    /// Start a challenge-response on `yubikey` using `slot`.
    ///
    /// Returns once the helper has accepted the request; the key's answer (and any
    /// "touch the key" prompts before it) arrive through the returned session.
    pub async fn yubikey_challenge_response(
        &self,
        yubikey: Value,
        challenge: &[u8],
        slot: u8,
    ) -> Result<ChallengeSession, HostError> {
        let callback_id = self.allocate_callback_id();
        let (handler, replies) = mpsc::unbounded_channel();

        let args = vec![yubikey, json!(challenge), json!(slot)];
        self.start_challenge_response(callback_id, args, handler)
            .await?;

        debug!("Challenge-response started (callbackId={callback_id})");
        Ok(ChallengeSession {
            callback_id,
            replies,
            finished: false,
        })
    }

    pub async fn cancel_challenge_response(&self) -> Result<Value, HostError> {
        self.call(CMD_YK_CANCEL_CHAL_RESP, Vec::new()).await
    }

    /// Derive a key with Argon2. The password is masked before it leaves this process
    /// and the caller's buffer is wiped.
    pub async fn argon2(
        &self,
        password: &mut [u8],
        salt: &[u8],
        options: Value,
    ) -> Result<Value, HostError> {
        let envelope = secure_value::mask(password);
        let password = serde_json::to_value(&envelope).map_err(|e| {
            ProtocolError::encode(format!("Failed to encode masked password: {e}"))
        })?;

        self.call(CMD_ARGON2, vec![password, json!(salt), options])
            .await
    }

    pub async fn kbd_get_active_window(&self, options: Value) -> Result<Value, HostError> {
        self.call(CMD_KBD_GET_ACTIVE_WINDOW, vec![options]).await
    }

    pub async fn kbd_get_active_pid(&self) -> Result<Value, HostError> {
        self.call(CMD_KBD_GET_ACTIVE_PID, Vec::new()).await
    }

    pub async fn kbd_text_as_keys(&self, text: &str, modifiers: &[String]) -> Result<Value, HostError> {
        self.call(CMD_KBD_TEXT_AS_KEYS, vec![json!(text), json!(modifiers)])
            .await
    }

    pub async fn kbd_key_press(&self, key: &str, modifiers: &[String]) -> Result<Value, HostError> {
        self.call(CMD_KBD_KEY_PRESS, vec![json!(key), json!(modifiers)])
            .await
    }

    pub async fn kbd_shortcut(&self, key: &str) -> Result<Value, HostError> {
        self.call(CMD_KBD_SHORTCUT, vec![json!(key)]).await
    }

    pub async fn kbd_key_move_with_modifier(
        &self,
        down: bool,
        modifiers: &[String],
    ) -> Result<Value, HostError> {
        self.call(CMD_KBD_KEY_MOVE_WITH_MODIFIER, vec![json!(down), json!(modifiers)])
            .await
    }

    pub async fn kbd_key_press_with_character(
        &self,
        character: &str,
        code: u32,
        modifiers: &[String],
    ) -> Result<Value, HostError> {
        self.call(
            CMD_KBD_KEY_PRESS_WITH_CHARACTER,
            vec![json!(character), json!(code), json!(modifiers)],
        )
        .await
    }

    pub async fn kbd_ensure_modifier_not_pressed(&self) -> Result<Value, HostError> {
        self.call(CMD_KBD_ENSURE_MODIFIER_NOT_PRESSED, Vec::new())
            .await
    }
}
