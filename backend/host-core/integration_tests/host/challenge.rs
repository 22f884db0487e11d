use super::helpers::{Harness, WAIT, fast_restart};

use host_core::{ChallengeReply, HostError};

use serde_json::json;
use tokio::time::timeout;

// ============================================================================
// YubiKey challenge-response through the callback channel
// ============================================================================

/// **VALUE**: Verifies the full touch-then-answer sequence of a challenge-response.
///
/// **WHY THIS MATTERS**: The UI shows "touch your key" on the first reply and unlocks on the
/// second. Both must reach the same session, in order, and nothing after the answer.
///
/// **BUG THIS CATCHES**: Would catch:
/// - The callback id missing from the request's arguments
/// - The registration dropped on the touch prompt
/// - Further replies delivered after the terminal one
#[tokio::test]
async fn given_touch_requested_when_key_answers_then_session_sees_prompt_then_result() {
    // GIVEN: A challenge-response in progress
    let mut harness = Harness::new(fast_restart());
    let host = harness.host.clone();
    let started = tokio::spawn(async move {
        host.yubikey_challenge_response(json!({"serial": 123}), &[1, 2, 3], 2)
            .await
    });
    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;

    assert_eq!(request.cmd, "yk-chal-resp");
    assert_eq!(request.args.len(), 4);
    assert_eq!(request.args[0], json!({"serial": 123}));
    assert_eq!(request.args[1], json!([1, 2, 3]));
    assert_eq!(request.args[2], json!(2));
    let callback_id = request.args[3].as_u64().unwrap();

    helper.reply(request.call_id, json!(null));
    let mut session = timeout(WAIT, started).await.unwrap().unwrap().unwrap();
    assert_eq!(session.callback_id(), callback_id);

    // WHEN: The key asks for a touch, then answers
    helper.challenge_progress(callback_id, Some(json!({"touchRequested": true})), None);
    helper.challenge_progress(callback_id, None, Some(json!([9, 9])));

    // THEN: Prompt first, then the answer, then nothing
    match timeout(WAIT, session.next_reply()).await.unwrap() {
        Some(ChallengeReply::TouchRequested { error, .. }) => {
            assert_eq!(error, json!({"touchRequested": true}))
        }
        other => panic!("Expected TouchRequested, got {other:?}"),
    }
    match timeout(WAIT, session.next_reply()).await.unwrap() {
        Some(ChallengeReply::Done(Ok(value))) => assert_eq!(value, json!([9, 9])),
        other => panic!("Expected Done(Ok), got {other:?}"),
    }
    assert!(session.next_reply().await.is_none());
    assert_eq!(harness.host.pending_counts().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn given_key_error_when_session_finished_then_returns_remote_error() {
    let mut harness = Harness::new(fast_restart());
    let host = harness.host.clone();
    let started = tokio::spawn(async move {
        host.yubikey_challenge_response(json!({"serial": 5}), b"c", 1)
            .await
    });
    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;
    let callback_id = request.args[3].as_u64().unwrap();
    helper.reply(request.call_id, json!(null));
    let session = timeout(WAIT, started).await.unwrap().unwrap().unwrap();

    helper.challenge_progress(callback_id, Some(json!({"touchRequested": true})), None);
    helper.challenge_progress(callback_id, Some(json!({"message": "timeout"})), None);

    match timeout(WAIT, session.finish()).await.unwrap() {
        Err(err @ HostError::Remote { .. }) => {
            assert_eq!(err.remote_payload(), Some(&json!({"message": "timeout"})))
        }
        other => panic!("Expected Remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn given_two_sessions_when_started_then_callback_ids_differ() {
    let mut harness = Harness::new(fast_restart());
    let host = harness.host.clone();
    let started = tokio::spawn(async move {
        let first = host
            .yubikey_challenge_response(json!({}), b"a", 1)
            .await?;
        let second = host
            .yubikey_challenge_response(json!({}), b"b", 1)
            .await?;
        Ok::<_, HostError>((first.callback_id(), second.callback_id()))
    });

    let mut helper = harness.next_helper().await;
    for _ in 0..2 {
        let request = helper.next_request().await;
        helper.reply(request.call_id, json!(null));
    }

    let (first, second) = timeout(WAIT, started).await.unwrap().unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(harness.host.pending_counts().await.unwrap(), (0, 2));
}

#[tokio::test]
async fn given_cancel_when_called_then_sends_cancel_command() {
    let mut harness = Harness::new(fast_restart());
    let host = harness.host.clone();
    let cancel = tokio::spawn(async move { host.cancel_challenge_response().await });

    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;
    assert_eq!(request.cmd, "yk-cancel-chal-resp");
    assert!(request.args.is_empty());
    helper.reply(request.call_id, json!(null));

    assert_eq!(timeout(WAIT, cancel).await.unwrap().unwrap().unwrap(), json!(null));
}

/// **VALUE**: Verifies a challenge-response that could not be written leaves no registration.
///
/// **BUG THIS CATCHES**: Would catch the handler staying registered after its request was
/// rejected, so a stale registration outlives the call until the next exit.
#[tokio::test]
async fn given_stopped_helper_when_challenge_started_then_rejected_without_registration() {
    // GIVEN: A helper whose stdin was closed by stop()
    let mut harness = Harness::new(fast_restart());
    harness.host.ensure_started().await.unwrap();
    let _helper = harness.next_helper().await;
    harness.host.stop().await.unwrap();

    // WHEN: Starting a challenge-response before the exit is observed
    let result = harness
        .host
        .yubikey_challenge_response(json!({"serial": 1}), b"c", 2)
        .await;

    // THEN: Send error and nothing left pending
    assert!(matches!(result, Err(HostError::Send { .. })));
    assert_eq!(harness.host.pending_counts().await.unwrap(), (0, 0));
}
