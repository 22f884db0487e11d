//! Call id allocation and the pending-call table.

use crate::error::{CrashFailure, HostError};
use crate::protocol::CallId;

use std::collections::HashMap;

use log::{debug, trace, warn};
use serde_json::Value;
use tokio::sync::oneshot;

/// Largest id before wrapping back to 1 (2^53 - 1, the helper's largest exact integer).
pub(crate) const MAX_CALL_ID: CallId = (1 << 53) - 1;

pub(crate) type CallOutcome = Result<Value, HostError>;

/// Who is waiting on a call.
pub(crate) enum Responder {
    Caller(oneshot::Sender<CallOutcome>),
    /// Issued by the host itself (sticky flag re-application); the outcome is only logged.
    Detached,
}

pub(crate) struct PendingCall {
    pub(crate) command: String,
    responder: Responder,
}

impl PendingCall {
    pub(crate) fn complete(self, outcome: CallOutcome) {
        match self.responder {
            Responder::Caller(tx) => {
                if tx.send(outcome).is_err() {
                    trace!("Caller of '{}' went away before the reply", self.command);
                }
            }
            Responder::Detached => match outcome {
                Ok(_) => debug!("Host-issued '{}' completed", self.command),
                Err(e) => warn!("Host-issued '{}' failed: {e}", self.command),
            },
        }
    }
}

pub(crate) struct CallCorrelator {
    last_id: CallId,
    pending: HashMap<CallId, PendingCall>,
}

impl CallCorrelator {
    pub(crate) fn new() -> Self {
        Self {
            last_id: 0,
            pending: HashMap::new(),
        }
    }

    /// Move the counter so the next id is the one after `last_id`.
    #[cfg(test)]
    pub(crate) fn rewind_to(&mut self, last_id: CallId) {
        self.last_id = last_id;
    }

    fn next_id(&mut self) -> CallId {
        loop {
            self.last_id = if self.last_id >= MAX_CALL_ID {
                1
            } else {
                self.last_id + 1
            };

            if !self.pending.contains_key(&self.last_id) {
                return self.last_id;
            }
        }
    }

    pub(crate) fn issue(&mut self, command: String, responder: Responder) -> CallId {
        let call_id = self.next_id();
        self.pending.insert(call_id, PendingCall { command, responder });
        call_id
    }

    /// Settle the call matching `call_id`. Unknown ids are late or duplicate replies.
    pub(crate) fn settle(
        &mut self,
        call_id: CallId,
        result: Option<Value>,
        error: Option<Value>,
    ) -> bool {
        let Some(pending) = self.pending.remove(&call_id) else {
            trace!("Ignoring reply for unknown callId {call_id}");
            return false;
        };

        let outcome = match error {
            Some(payload) => Err(HostError::remote(pending.command.as_str(), payload)),
            None => Ok(result.unwrap_or(Value::Null)),
        };

        pending.complete(outcome);
        true
    }

    /// Take back a call whose request never made it to the helper.
    pub(crate) fn withdraw(&mut self, call_id: CallId) -> Option<PendingCall> {
        self.pending.remove(&call_id)
    }

    /// Reject every pending call with the same crash failure.
    pub(crate) fn fail_all(&mut self, failure: &CrashFailure) -> usize {
        let drained: Vec<PendingCall> = self.pending.drain().map(|(_, call)| call).collect();
        let count = drained.len();

        for call in drained {
            call.complete(Err(HostError::Crashed(failure.clone())));
        }

        count
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, call_id: CallId) -> bool {
        self.pending.contains_key(&call_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
