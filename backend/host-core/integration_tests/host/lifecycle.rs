use super::helpers::{Harness, WAIT, fast_restart, settled};

use host_core::config::RestartConfig;
use host_core::protocol::HelperRequest;
use host_core::{ChallengeReply, HelperExit, HostError, HostEvent};

use std::time::Duration;

use serde_json::json;
use tokio::time::{sleep, timeout};

// ============================================================================
// Crash handling, restart and shutdown
// ============================================================================

/// **VALUE**: Verifies a crash fails every in-flight call and callback with the same failure.
///
/// **WHY THIS MATTERS**: Without this, callers awaiting a dead helper wait forever.
///
/// **BUG THIS CATCHES**: Would catch:
/// - Calls left pending after exit
/// - Challenge-response handlers never told about the crash
/// - Different failures built per call (the exit status must be the same everywhere)
#[tokio::test]
async fn given_pending_calls_and_callbacks_when_helper_crashes_then_all_fail_with_crash() {
    // GIVEN: Two calls and a challenge-response in flight
    let mut harness = Harness::new(RestartConfig {
        enabled: false,
        delay_ms: 10,
    });
    let first = harness.spawn_call("argon2", vec![json!("a")]);
    let mut helper = harness.next_helper().await;
    helper.next_request().await;
    let second = harness.spawn_call("kbd-text-as-keys", vec![json!("b")]);
    helper.next_request().await;

    let host = harness.host.clone();
    let session = tokio::spawn(async move {
        host.yubikey_challenge_response(json!({"serial": 1}), b"challenge", 2)
            .await
    });
    let challenge_request = helper.next_request().await;
    helper.reply(challenge_request.call_id, json!(null));
    let mut session = session.await.unwrap().unwrap();

    let (calls, callbacks) = harness.host.pending_counts().await.unwrap();
    assert_eq!((calls, callbacks), (2, 1));

    // WHEN: The helper is killed by a signal
    helper.exit(HelperExit::with_signal(9));

    // THEN: Everything fails with the same crash
    let mut failures = Vec::new();
    for call in [first, second] {
        match settled(call).await {
            Err(HostError::Crashed(failure)) => failures.push(failure),
            other => panic!("Expected Crashed, got {other:?}"),
        }
    }
    match timeout(WAIT, session.next_reply()).await.unwrap() {
        Some(ChallengeReply::Done(Err(HostError::Crashed(failure)))) => failures.push(failure),
        other => panic!("Expected Done(Err(Crashed)), got {other:?}"),
    }
    assert!(failures.iter().all(|f| *f == failures[0]));
    assert_eq!(failures[0].exit, HelperExit::with_signal(9));

    let status = harness.host.status().await.unwrap();
    assert!(!status.running);
    assert_eq!((status.pending_calls, status.pending_callbacks), (0, 0));
}

/// **VALUE**: Verifies an abnormal exit brings up exactly one new helper after the delay.
///
/// **WHY THIS MATTERS**: USB hot-plug notifications only arrive while a helper runs. A crash
/// must not leave the app deaf until the next explicit call.
///
/// **BUG THIS CATCHES**: Would catch no restart, or a restart loop that launches several.
#[tokio::test]
async fn given_nonzero_exit_when_restart_enabled_then_launches_one_new_helper() {
    // GIVEN: A running helper
    let mut harness = Harness::new(fast_restart());
    let mut events = harness.host.subscribe();
    harness.host.ensure_started().await.unwrap();
    let helper = harness.next_helper().await;

    // WHEN: It exits with code 1
    helper.exit(HelperExit::with_code(1));

    // THEN: A second generation is launched and nothing more
    let restarted = harness.next_helper().await;
    assert_eq!(restarted.generation, 2);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.launches(), 2);

    assert!(matches!(events.recv().await.unwrap(), HostEvent::Started { generation: 1, .. }));
    assert_eq!(
        events.recv().await.unwrap(),
        HostEvent::Exited(HelperExit::with_code(1))
    );
    assert!(matches!(events.recv().await.unwrap(), HostEvent::Started { generation: 2, .. }));
}

/// **VALUE**: Verifies the USB listener is switched back on before anything else after a restart.
///
/// **WHY THIS MATTERS**: The listener is state inside the helper process and dies with it.
/// The app turned it on once and expects it to stay on.
///
/// **BUG THIS CATCHES**: Would catch the sticky flag not being re-applied, being re-applied
/// after other queued calls, or being sent twice.
#[tokio::test]
async fn given_usb_listener_on_when_helper_restarts_then_start_usb_is_first_request() {
    // GIVEN: The USB listener enabled on generation 1
    let mut harness = Harness::new(fast_restart());
    let host = harness.host.clone();
    let enable = tokio::spawn(async move { host.start_usb_listener().await });
    let mut helper = harness.next_helper().await;
    let request = helper.next_request().await;
    assert_eq!(request, HelperRequest::new("start-usb", Vec::new(), 1));
    helper.reply(request.call_id, json!(null));
    timeout(WAIT, enable).await.unwrap().unwrap().unwrap();

    // WHEN: The helper crashes and is restarted
    helper.exit(HelperExit::with_code(1));
    let mut restarted = harness.next_helper().await;
    let call = harness.spawn_call("get-yubikeys", vec![json!({})]);

    // THEN: start-usb comes first, exactly once, then the caller's request
    let first = restarted.next_request().await;
    assert_eq!(first.cmd, "start-usb");
    assert!(first.args.is_empty());
    let second = restarted.next_request().await;
    assert_eq!(second.cmd, "get-yubikeys");
    restarted.reply(first.call_id, json!(null));
    restarted.reply(second.call_id, json!([]));
    assert_eq!(settled(call).await.unwrap(), json!([]));
    assert!(harness.host.status().await.unwrap().usb_listener);
}

#[tokio::test]
async fn given_usb_listener_off_when_no_helper_then_resolves_without_launch() {
    let harness = Harness::new(fast_restart());

    let result = harness.host.stop_usb_listener().await.unwrap();

    assert_eq!(result, json!(null));
    assert_eq!(harness.launches(), 0);
    assert!(!harness.host.status().await.unwrap().usb_listener);
}

/// **VALUE**: Verifies a clean exit is final.
///
/// **BUG THIS CATCHES**: Would catch restarts on code 0, which would fight a helper that
/// exits on purpose (for example after its stdin closes).
#[tokio::test]
async fn given_zero_exit_when_observed_then_no_restart_and_next_call_starts_fresh() {
    // GIVEN: A running helper
    let mut harness = Harness::new(fast_restart());
    harness.host.ensure_started().await.unwrap();
    let helper = harness.next_helper().await;

    // WHEN: It exits cleanly
    helper.exit(HelperExit::with_code(0));
    sleep(Duration::from_millis(100)).await;

    // THEN: Nothing is relaunched until the next call
    let status = harness.host.status().await.unwrap();
    assert!(!status.running);
    assert!(!status.restart_scheduled);
    assert_eq!(harness.launches(), 1);

    let call = harness.spawn_call("kbd-get-active-pid", Vec::new());
    let mut fresh = harness.next_helper().await;
    assert_eq!(fresh.generation, 2);
    let request = fresh.next_request().await;
    fresh.reply(request.call_id, json!(1));
    assert_eq!(settled(call).await.unwrap(), json!(1));
}

/// **VALUE**: Verifies `stop()` closes stdin and suppresses the restart even for a non-zero exit.
///
/// **WHY THIS MATTERS**: Shutdown must not race a restart that brings the helper back.
///
/// **BUG THIS CATCHES**: Would catch stop() leaving stdin open, or the exit after stop being
/// treated as a crash to recover from.
#[tokio::test]
async fn given_stop_requested_when_helper_exits_then_no_restart() {
    // GIVEN: A running helper
    let mut harness = Harness::new(fast_restart());
    harness.host.ensure_started().await.unwrap();
    let mut helper = harness.next_helper().await;

    // WHEN: Stopping
    harness.host.stop().await.unwrap();

    // THEN: Stdin closes, and the exit that follows is not restarted
    assert!(helper.stdin_closed().await);
    helper.exit(HelperExit::with_signal(15));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.launches(), 1);
    assert!(!harness.host.is_running().await);
}

#[tokio::test]
async fn given_restart_disabled_when_helper_crashes_then_stays_down() {
    let mut harness = Harness::new(RestartConfig {
        enabled: false,
        delay_ms: 10,
    });
    harness.host.ensure_started().await.unwrap();
    let helper = harness.next_helper().await;

    helper.exit(HelperExit::with_code(2));
    sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.launches(), 1);
    assert!(!harness.host.status().await.unwrap().restart_scheduled);
}

#[tokio::test]
async fn given_helper_running_when_ensure_started_again_then_noop() {
    let mut harness = Harness::new(fast_restart());
    harness.host.ensure_started().await.unwrap();
    let _helper = harness.next_helper().await;

    harness.host.ensure_started().await.unwrap();

    let status = harness.host.status().await.unwrap();
    assert_eq!(status.generation, 1);
    assert_eq!(status.pid, Some(40_001));
    assert_eq!(harness.launches(), 1);
}

/// **VALUE**: Verifies a failed automatic restart is logged and left alone.
///
/// **WHY THIS MATTERS**: A helper binary that was removed or broken by an update would
/// otherwise be relaunched in a tight loop. The next real call is the retry.
///
/// **BUG THIS CATCHES**: Would catch:
/// - A restart failure rescheduling another restart
/// - The supervisor getting stuck so the next call never launches a helper
#[tokio::test]
async fn given_restart_launch_fails_when_delay_passes_then_no_retry_and_next_call_starts_fresh() {
    // GIVEN: A running helper whose next launch will fail
    let mut harness = Harness::new(fast_restart());
    harness.host.ensure_started().await.unwrap();
    let helper = harness.next_helper().await;
    harness.fail_next_launch();

    // WHEN: It crashes and the restart delay passes
    helper.exit(HelperExit::with_code(1));
    sleep(Duration::from_millis(100)).await;

    // THEN: No helper came up and no further restart is pending
    assert_eq!(harness.launches(), 1);
    let status = harness.host.status().await.unwrap();
    assert!(!status.running);
    assert!(!status.restart_scheduled);

    // AND: The next call launches generation 2
    let call = harness.spawn_call("kbd-get-active-pid", Vec::new());
    let mut fresh = harness.next_helper().await;
    assert_eq!(fresh.generation, 2);
    let request = fresh.next_request().await;
    fresh.reply(request.call_id, json!(99));
    assert_eq!(settled(call).await.unwrap(), json!(99));
}

/// **VALUE**: Verifies simultaneous first calls share one helper.
///
/// **WHY THIS MATTERS**: At app start several features call the helper at once. Two
/// helpers would fight over the USB devices and split the replies.
///
/// **BUG THIS CATCHES**: Would catch a check-then-spawn race where each caller sees no
/// helper and launches its own.
#[tokio::test]
async fn given_no_helper_when_several_calls_race_then_exactly_one_launch() {
    // GIVEN: Three calls issued before any helper exists
    let mut harness = Harness::new(fast_restart());
    let calls: Vec<_> = ["get-yubikeys", "kbd-get-active-pid", "kbd-get-active-window"]
        .into_iter()
        .map(|cmd| harness.spawn_call(cmd, Vec::new()))
        .collect();

    // WHEN: The helper answers all of them
    let mut helper = harness.next_helper().await;
    let mut call_ids = Vec::new();
    for _ in 0..3 {
        let request = helper.next_request().await;
        helper.reply(request.call_id, json!(request.cmd));
        call_ids.push(request.call_id);
    }

    // THEN: One launch, distinct ids, every call settled
    call_ids.sort_unstable();
    assert_eq!(call_ids, vec![1, 2, 3]);
    for call in calls {
        assert!(settled(call).await.is_ok());
    }
    assert_eq!(harness.launches(), 1);
    assert_eq!(harness.host.status().await.unwrap().generation, 1);
}
