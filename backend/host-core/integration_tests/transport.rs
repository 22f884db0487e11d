use host_core::config::{HelperConfig, RestartConfig};
use host_core::error::spawn::SpawnError;
use host_core::{HelperExit, HelperHost, HelperLauncher, HostError, HostEvent, ProcessLauncher};

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

// ============================================================================
// Real child processes through ProcessLauncher
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

/// Replies `pong` to every request, echoing its callId, and exits 0 when stdin closes.
#[cfg(unix)]
const ECHO_HELPER: &str = r#"while IFS= read -r line; do id=${line##*\"callId\":}; id=${id%\}}; printf '{"cmd":"log","args":["got",%s]}\n' "$id"; printf '{"cmd":"result","callId":%s,"result":"pong"}\n' "$id"; done"#;

fn shell_helper(script: &str) -> HelperConfig {
    HelperConfig {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), script.to_string()],
    }
}

fn no_restart() -> RestartConfig {
    RestartConfig {
        enabled: false,
        delay_ms: 1000,
    }
}

#[tokio::test]
async fn given_empty_program_when_launched_then_returns_validation_error() {
    let mut launcher = ProcessLauncher::new(HelperConfig {
        program: PathBuf::new(),
        args: Vec::new(),
    });

    let result = launcher.launch();

    assert!(matches!(result, Err(SpawnError::Validation { .. })));
}

/// **VALUE**: Verifies a missing binary surfaces as a StartFailure on the call that needed it.
///
/// **BUG THIS CATCHES**: Would catch a panic in the spawn path or the error being swallowed
/// and the call left pending.
#[tokio::test]
async fn given_missing_binary_when_called_then_rejects_with_spawn_error() {
    // GIVEN: A host pointed at a binary that does not exist
    let host = HelperHost::new(
        ProcessLauncher::new(HelperConfig {
            program: PathBuf::from("/nonexistent/native-helper-binary"),
            args: Vec::new(),
        }),
        &no_restart(),
    );

    // WHEN: Calling
    let result = timeout(WAIT, host.call("get-yubikeys", vec![json!({})]))
        .await
        .unwrap();

    // THEN: Spawn error naming the program
    match result {
        Err(HostError::Start(SpawnError::Spawn { program, .. })) => {
            assert!(program.contains("native-helper-binary"))
        }
        other => panic!("Expected Start(Spawn), got {other:?}"),
    }
}

/// **VALUE**: Exercises the whole stack against a real process: spawn, JSON lines both ways,
/// stdin close on stop, and exit status reporting.
///
/// **WHY THIS MATTERS**: The in-memory launcher used elsewhere cannot catch framing bugs
/// (missing newline, unflushed writes) or a stop() that never lets the child exit.
#[cfg(unix)]
#[tokio::test]
async fn given_shell_helper_when_called_then_round_trips_and_stops_cleanly() {
    // GIVEN: A helper that answers every request
    let host = HelperHost::new(
        ProcessLauncher::new(shell_helper(ECHO_HELPER)),
        &no_restart(),
    );
    let mut events = host.subscribe();

    // WHEN: Making two calls
    let first = timeout(WAIT, host.call("ping", Vec::new())).await.unwrap();
    let second = timeout(WAIT, host.call("ping", vec![json!(1)])).await.unwrap();

    // THEN: Both settle with the helper's result
    assert_eq!(first.unwrap(), json!("pong"));
    assert_eq!(second.unwrap(), json!("pong"));
    let status = host.status().await.unwrap();
    assert!(status.running);
    assert!(status.pid.is_some());

    // AND: stop() closes stdin and the helper exits 0
    host.stop().await.unwrap();
    let exit = timeout(WAIT, async {
        loop {
            if let HostEvent::Exited(exit) = events.recv().await.unwrap() {
                return exit;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(exit, HelperExit::with_code(0));
    assert!(!host.is_running().await);
}

#[cfg(unix)]
#[tokio::test]
async fn given_helper_that_dies_when_call_pending_then_call_fails_with_exit_code() {
    let host = HelperHost::new(
        ProcessLauncher::new(shell_helper("read -r line; exit 3")),
        &no_restart(),
    );

    let result = timeout(WAIT, host.call("argon2", Vec::new())).await.unwrap();

    match result {
        Err(HostError::Crashed(failure)) => assert_eq!(failure.exit, HelperExit::with_code(3)),
        other => panic!("Expected Crashed, got {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn given_helper_writing_garbage_when_running_then_garbage_is_skipped() {
    let script = r#"read -r line; echo 'not json'; echo '{"cmd":"mystery"}'; printf '{"cmd":"result","callId":1,"result":42}\n'; read -r rest"#;
    let host = HelperHost::new(ProcessLauncher::new(shell_helper(script)), &no_restart());

    let result = timeout(WAIT, host.call("kbd-get-active-pid", Vec::new()))
        .await
        .unwrap();

    assert_eq!(result.unwrap(), json!(42));
    host.stop().await.unwrap();
}
