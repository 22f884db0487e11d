// Unit tests for call id allocation and the pending-call table

use crate::error::{CrashFailure, HostError};
use crate::host::correlator::{CallCorrelator, MAX_CALL_ID, Responder};
use crate::transport::HelperExit;

use serde_json::{Value, json};
use tokio::sync::oneshot;

fn caller() -> (Responder, oneshot::Receiver<Result<Value, HostError>>) {
    let (tx, rx) = oneshot::channel();
    (Responder::Caller(tx), rx)
}

#[test]
fn given_fresh_correlator_when_issuing_then_ids_start_at_one_and_increase() {
    let mut correlator = CallCorrelator::new();

    let first = correlator.issue("a".to_string(), Responder::Detached);
    let second = correlator.issue("b".to_string(), Responder::Detached);

    assert_eq!(first, 1);
    assert_eq!(second, 2);
    assert_eq!(correlator.len(), 2);
}

/// **VALUE**: Verifies the id counter wraps at 2^53 - 1 straight to 1.
///
/// **WHY THIS MATTERS**: Ids above 2^53 - 1 lose precision in the helper's number type,
/// so two calls would collide. Id 0 is reserved.
///
/// **BUG THIS CATCHES**: Would catch an off-by-one at the boundary or a wrap to 0.
#[test]
fn given_counter_at_max_when_issuing_then_wraps_to_one() {
    // GIVEN: The previous id was one below the largest allowed
    let mut correlator = CallCorrelator::new();
    correlator.rewind_to(MAX_CALL_ID - 1);

    // WHEN: Issuing two more calls
    let at_max = correlator.issue("a".to_string(), Responder::Detached);
    let wrapped = correlator.issue("b".to_string(), Responder::Detached);

    // THEN: The first gets the max, the second wraps to 1
    assert_eq!(at_max, MAX_CALL_ID);
    assert_eq!(wrapped, 1);
}

/// **VALUE**: Verifies a wrapped counter never reuses an id still awaiting its reply.
///
/// **WHY THIS MATTERS**: Reusing a pending id silently drops the older caller's responder.
///
/// **BUG THIS CATCHES**: Would catch a wrap that ignores the pending table.
#[test]
fn given_low_ids_pending_when_counter_wraps_then_skips_them() {
    // GIVEN: Ids 1 and 2 still pending and the counter at the boundary
    let mut correlator = CallCorrelator::new();
    correlator.issue("one".to_string(), Responder::Detached);
    correlator.issue("two".to_string(), Responder::Detached);
    correlator.rewind_to(MAX_CALL_ID);

    // WHEN: Issuing after the wrap
    let next = correlator.issue("three".to_string(), Responder::Detached);

    // THEN: 1 and 2 are skipped
    assert_eq!(next, 3);
    assert!(correlator.contains(1));
    assert!(correlator.contains(2));
}

#[test]
fn given_pending_call_when_result_arrives_then_caller_gets_value() {
    let mut correlator = CallCorrelator::new();
    let (responder, mut rx) = caller();
    let call_id = correlator.issue("get-yubikeys".to_string(), responder);

    let settled = correlator.settle(call_id, Some(json!([{"serial": 1}])), None);

    assert!(settled);
    assert_eq!(rx.try_recv().unwrap().unwrap(), json!([{"serial": 1}]));
    assert_eq!(correlator.len(), 0);
}

#[test]
fn given_pending_call_when_reply_has_no_payload_then_resolves_null() {
    let mut correlator = CallCorrelator::new();
    let (responder, mut rx) = caller();
    let call_id = correlator.issue("start-usb".to_string(), responder);

    correlator.settle(call_id, None, None);

    assert_eq!(rx.try_recv().unwrap().unwrap(), Value::Null);
}

/// **VALUE**: Verifies an error reply rejects with the helper's object untouched.
///
/// **WHY THIS MATTERS**: Callers branch on fields of the helper's error (codes, flags).
/// Wrapping or stringifying it would break them.
///
/// **BUG THIS CATCHES**: Would catch `error` being ignored when `result` is also present.
#[test]
fn given_error_reply_when_settled_then_rejects_with_verbatim_payload() {
    // GIVEN: A pending argon2 call
    let mut correlator = CallCorrelator::new();
    let (responder, mut rx) = caller();
    let call_id = correlator.issue("argon2".to_string(), responder);

    // WHEN: The helper replies with both an error and a result
    correlator.settle(call_id, Some(json!(1)), Some(json!({"code": "E_MEM"})));

    // THEN: Error wins and is passed through as-is
    let err = rx.try_recv().unwrap().unwrap_err();
    assert_eq!(err.remote_payload(), Some(&json!({"code": "E_MEM"})));
    match err {
        HostError::Remote { command, .. } => assert_eq!(command, "argon2"),
        other => panic!("Expected Remote, got {other:?}"),
    }
}

#[test]
fn given_unknown_or_settled_id_when_reply_arrives_then_noop() {
    let mut correlator = CallCorrelator::new();
    let (responder, mut rx) = caller();
    let call_id = correlator.issue("kbd-shortcut".to_string(), responder);
    assert!(correlator.settle(call_id, Some(json!("first")), None));

    assert!(!correlator.settle(call_id, Some(json!("duplicate")), None));
    assert!(!correlator.settle(999, None, None));

    assert_eq!(rx.try_recv().unwrap().unwrap(), json!("first"));
}

/// **VALUE**: Verifies every pending call fails with the same crash and the table empties.
///
/// **BUG THIS CATCHES**: Would catch calls left pending after a crash, or a
/// late reply settling a call that was already failed.
#[test]
fn given_pending_calls_when_failed_all_then_each_gets_crash_failure() {
    // GIVEN: Three pending calls
    let mut correlator = CallCorrelator::new();
    let mut receivers = Vec::new();
    for cmd in ["a", "b", "c"] {
        let (responder, rx) = caller();
        correlator.issue(cmd.to_string(), responder);
        receivers.push(rx);
    }

    // WHEN: The helper dies
    let failure = CrashFailure::new(HelperExit::with_signal(9));
    let failed = correlator.fail_all(&failure);

    // THEN: All three fail with that failure
    assert_eq!(failed, 3);
    assert_eq!(correlator.len(), 0);
    for mut rx in receivers {
        match rx.try_recv().unwrap() {
            Err(HostError::Crashed(got)) => assert_eq!(got, failure),
            other => panic!("Expected Crashed, got {other:?}"),
        }
    }
    assert!(!correlator.settle(1, None, None));
}

#[test]
fn given_withdrawn_call_when_reply_arrives_then_ignored() {
    let mut correlator = CallCorrelator::new();
    let call_id = correlator.issue("stop-usb".to_string(), Responder::Detached);

    let withdrawn = correlator.withdraw(call_id);

    assert_eq!(withdrawn.map(|call| call.command), Some("stop-usb".to_string()));
    assert!(!correlator.settle(call_id, None, None));
}
