use super::helpers::{Harness, fast_restart, settled};

use host_core::error::protocol::ProtocolError;
use host_core::error::transport::TransportError;
use host_core::protocol::{HelperRequest, InboundMessage};
use host_core::{HostError, HostEvent, TransportEvent};

use common::{SecureValueEnvelope, unmask};

use serde_json::json;

// ============================================================================
// Calls and replies through the public HelperHost API
// ============================================================================

/// **VALUE**: Verifies the first call spawns the helper once and writes the expected request.
///
/// **WHY THIS MATTERS**: This is the path every feature takes. The helper matches replies by
/// `callId`, so the very first request must carry id 1 and the helper must not be spawned
/// again for the next call.
///
/// **BUG THIS CATCHES**: Would catch:
/// - A helper spawned per call instead of once
/// - Ids starting at 0
/// - Arguments reordered or wrapped on the way out
#[tokio::test]
async fn given_no_helper_when_first_call_made_then_spawns_once_and_sends_call_id_one() {
    // GIVEN: A host with no helper running
    let mut harness = Harness::new(fast_restart());
    assert_eq!(harness.launches(), 0);

    // WHEN: Calling get-yubikeys
    let call = harness.spawn_call("get-yubikeys", vec![json!({})]);
    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;

    // THEN: One launch, request with callId 1, reply resolves the call
    assert_eq!(
        request,
        HelperRequest::new("get-yubikeys", vec![json!({})], 1)
    );
    helper.reply(1, json!([]));
    assert_eq!(settled(call).await.unwrap(), json!([]));

    // AND: A second call reuses the same helper with the next id
    let call = harness.spawn_call("kbd-get-active-pid", Vec::new());
    let request = helper.next_request().await;
    assert_eq!(request.call_id, 2);
    helper.reply(2, json!(1234));
    assert_eq!(settled(call).await.unwrap(), json!(1234));
    assert_eq!(harness.launches(), 1);
}

/// **VALUE**: Verifies replies are matched by id, not by arrival order.
///
/// **WHY THIS MATTERS**: The helper runs commands concurrently; a slow argon2 can finish
/// after a fast keyboard query issued later.
///
/// **BUG THIS CATCHES**: Would catch a FIFO queue of responders in place of an id map.
#[tokio::test]
async fn given_two_calls_when_replies_arrive_out_of_order_then_each_gets_its_own() {
    // GIVEN: Two calls in flight
    let mut harness = Harness::new(fast_restart());
    let first = harness.spawn_call("argon2", vec![json!("slow")]);
    let mut helper = harness.next_helper().await;
    let first_request = helper.next_request().await;
    let second = harness.spawn_call("kbd-get-active-window", vec![json!({})]);
    let second_request = helper.next_request().await;

    // WHEN: Replying to the second first
    helper.reply(second_request.call_id, json!({"title": "editor"}));
    helper.reply(first_request.call_id, json!("hash"));

    // THEN: No cross-talk
    assert_eq!(settled(second).await.unwrap(), json!({"title": "editor"}));
    assert_eq!(settled(first).await.unwrap(), json!("hash"));
}

#[tokio::test]
async fn given_error_reply_when_call_settles_then_rejects_with_helper_error_verbatim() {
    let mut harness = Harness::new(fast_restart());
    let call = harness.spawn_call("kbd-shortcut", vec![json!("v")]);
    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;

    helper.reply_error(request.call_id, json!({"message": "no focus", "code": 5}));

    match settled(call).await {
        Err(HostError::Remote {
            command, payload, ..
        }) => {
            assert_eq!(command, "kbd-shortcut");
            assert_eq!(payload, json!({"message": "no focus", "code": 5}));
        }
        other => panic!("Expected Remote error, got {other:?}"),
    }
}

/// **VALUE**: Verifies stray and duplicate replies change nothing.
///
/// **BUG THIS CATCHES**: Would catch a panic on an unknown id, or a duplicate reply being
/// delivered to whatever call happens to reuse the slot.
#[tokio::test]
async fn given_unknown_call_id_when_reply_arrives_then_ignored() {
    // GIVEN: One call in flight
    let mut harness = Harness::new(fast_restart());
    let call = harness.spawn_call("kbd-get-active-pid", Vec::new());
    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;

    // WHEN: Replies arrive for ids nobody is waiting on
    helper.reply(999, json!("stray"));
    helper.reply(request.call_id, json!(7));
    helper.reply(request.call_id, json!("duplicate"));

    // THEN: The real call gets its own reply and nothing is left pending
    assert_eq!(settled(call).await.unwrap(), json!(7));
    let status = harness.host.status().await.unwrap();
    assert_eq!(status.pending_calls, 0);
    assert!(status.running);
}

#[tokio::test]
async fn given_transport_error_when_reported_then_helper_keeps_running() {
    let mut harness = Harness::new(fast_restart());
    harness.host.ensure_started().await.unwrap();
    let mut helper = harness.next_helper().await;

    helper.raw(TransportEvent::Error(TransportError::Protocol(
        ProtocolError::unhandled_command("frobnicate"),
    )));
    let call = harness.spawn_call("kbd-get-active-pid", Vec::new());
    let request = helper.next_request().await;
    helper.reply(request.call_id, json!(1));

    assert_eq!(settled(call).await.unwrap(), json!(1));
    assert_eq!(harness.launches(), 1);
}

#[tokio::test]
async fn given_launch_failure_when_called_then_rejects_with_start_error_and_next_call_retries() {
    let mut harness = Harness::new(fast_restart());
    harness.fail_next_launch();

    let result = harness.host.call("get-yubikeys", vec![json!({})]).await;
    assert!(matches!(result, Err(HostError::Start(_))), "got {result:?}");
    assert!(!harness.host.is_running().await);

    let call = harness.spawn_call("get-yubikeys", vec![json!({})]);
    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;
    helper.reply(request.call_id, json!([]));
    assert_eq!(settled(call).await.unwrap(), json!([]));
}

#[tokio::test]
async fn given_unsolicited_messages_when_received_then_yubikey_count_is_broadcast() {
    let mut harness = Harness::new(fast_restart());
    let mut events = harness.host.subscribe();
    harness.host.ensure_started().await.unwrap();
    let helper = harness.next_helper().await;

    helper.send(InboundMessage::Log {
        args: vec![json!("usb"), json!("ready")],
    });
    helper.send(InboundMessage::YubiKeys {
        args: vec![json!(2)],
    });

    assert_eq!(
        events.recv().await.unwrap(),
        HostEvent::Started {
            pid: Some(40_001),
            generation: 1
        }
    );
    assert_eq!(events.recv().await.unwrap(), HostEvent::YubiKeysChanged(2));
}

/// **VALUE**: Verifies argon2 never puts the password on the wire in the clear.
///
/// **WHY THIS MATTERS**: Request lines can end up in logs and crash dumps. Only the masked
/// envelope may leave the process, and the caller's buffer must be wiped.
///
/// **BUG THIS CATCHES**: Would catch the plaintext being passed as a plain byte array, or
/// the password buffer left intact after the call.
#[tokio::test]
async fn given_password_when_argon2_called_then_sends_masked_envelope_and_wipes_buffer() {
    // GIVEN: A password buffer
    let mut harness = Harness::new(fast_restart());
    let host = harness.host.clone();
    let call = tokio::spawn(async move {
        let mut password = b"correct horse".to_vec();
        let result = host
            .argon2(&mut password, b"salt", json!({"memory": 1024}))
            .await;
        (result, password)
    });

    // WHEN: The helper receives the request
    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;

    // THEN: First argument is an envelope that unmasks to the password
    assert_eq!(request.cmd, "argon2");
    let envelope: SecureValueEnvelope = serde_json::from_value(request.args[0].clone()).unwrap();
    assert_ne!(envelope.data(), b"correct horse");
    assert_eq!(unmask(envelope).unwrap().expose(), b"correct horse");
    assert_eq!(request.args[1], json!(b"salt"));
    assert_eq!(request.args[2], json!({"memory": 1024}));

    helper.reply(request.call_id, json!("derived"));
    let (result, password) = call.await.unwrap();
    assert_eq!(result.unwrap(), json!("derived"));
    assert!(password.iter().all(|b| *b == 0));
}
