//! Multi-reply registrations for challenge-response.
//!
//! A registration moves `Awaiting -> AwaitingRetry* -> Done`. "Touch the key again"
//! replies keep it registered; anything else removes it before the handler runs, so a
//! later reply with the same id is ignored.

use crate::error::{CrashFailure, HostError};
use crate::protocol::{CMD_YK_CHAL_RESP, CallbackId, is_touch_requested};

use std::collections::HashMap;

use log::{debug, trace};
use serde_json::Value;
use tokio::sync::mpsc;

/// One delivery to a challenge-response handler.
#[derive(Debug)]
pub enum ChallengeReply {
    /// The token asked for another touch; another reply will follow.
    TouchRequested { error: Value, result: Option<Value> },
    /// Terminal reply. No further replies are delivered for this id.
    Done(Result<Value, HostError>),
}

impl ChallengeReply {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChallengeReply::Done(_))
    }
}

pub type ChallengeHandler = mpsc::UnboundedSender<ChallengeReply>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Awaiting,
    AwaitingRetry,
    Done,
}

struct Registration {
    handler: ChallengeHandler,
    state: RegistrationState,
}

impl Registration {
    fn deliver(&self, callback_id: CallbackId, reply: ChallengeReply) {
        if self.handler.send(reply).is_err() {
            trace!("Handler for callbackId {callback_id} is gone");
        }
    }
}

pub(crate) struct CallbackRegistry {
    registrations: HashMap<CallbackId, Registration>,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    pub(crate) fn register(&mut self, callback_id: CallbackId, handler: ChallengeHandler) {
        let registration = Registration {
            handler,
            state: RegistrationState::Awaiting,
        };

        if self.registrations.insert(callback_id, registration).is_some() {
            debug!("Replaced handler for callbackId {callback_id}");
        }
    }

    /// Route one `yk-chal-resp-result`. Returns the registration's new state, or `None`
    /// when nothing was registered under `callback_id`.
    pub(crate) fn dispatch(
        &mut self,
        callback_id: CallbackId,
        error: Option<Value>,
        result: Option<Value>,
    ) -> Option<RegistrationState> {
        if !self.registrations.contains_key(&callback_id) {
            trace!("Ignoring challenge-response reply for unknown callbackId {callback_id}");
            return None;
        }

        match error {
            Some(error) if is_touch_requested(&error) => {
                let registration = self.registrations.get_mut(&callback_id)?;
                registration.state = RegistrationState::AwaitingRetry;
                registration.deliver(callback_id, ChallengeReply::TouchRequested { error, result });
                Some(RegistrationState::AwaitingRetry)
            }
            error => {
                let mut registration = self.registrations.remove(&callback_id)?;
                registration.state = RegistrationState::Done;

                let outcome = match error {
                    Some(payload) => Err(HostError::remote(CMD_YK_CHAL_RESP, payload)),
                    None => Ok(result.unwrap_or(Value::Null)),
                };

                registration.deliver(callback_id, ChallengeReply::Done(outcome));
                Some(registration.state)
            }
        }
    }

    /// Drop a registration whose request never reached the helper.
    pub(crate) fn unregister(&mut self, callback_id: CallbackId) -> bool {
        let removed = self.registrations.remove(&callback_id).is_some();
        if removed {
            debug!("Unregistered handler for callbackId {callback_id}");
        }
        removed
    }

    /// Hand the crash failure to every handler and forget them all.
    pub(crate) fn fail_all(&mut self, failure: &CrashFailure) -> usize {
        let count = self.registrations.len();

        for (callback_id, registration) in self.registrations.drain() {
            registration.deliver(
                callback_id,
                ChallengeReply::Done(Err(HostError::Crashed(failure.clone()))),
            );
        }

        count
    }

    #[cfg(test)]
    pub(crate) fn state(&self, callback_id: CallbackId) -> Option<RegistrationState> {
        self.registrations.get(&callback_id).map(|r| r.state)
    }

    pub(crate) fn len(&self) -> usize {
        self.registrations.len()
    }
}
