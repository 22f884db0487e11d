use host_core::error::config::ConfigError;
use host_core::error::spawn::SpawnError;
use host_core::{CoreError, CrashFailure, HelperExit, HostError};

use serde_json::json;

#[test]
fn given_remote_error_when_formatted_then_includes_command_and_payload() {
    let err = HostError::remote("get-yubikeys", json!({"message": "busy"}));

    let error_string = err.to_string();

    assert!(error_string.contains("Remote Error"));
    assert!(error_string.contains("'get-yubikeys'"));
    assert!(error_string.contains("busy"));
    assert!(error_string.contains("host.rs"));
    assert_eq!(err.error_category(), "remote");
    assert!(!err.is_crash());
}

/// **VALUE**: Verifies a crash reports how the helper ended.
///
/// **WHY THIS MATTERS**: "Helper terminated" alone does not tell a code 1 bug from an OOM
/// kill. The exit status is the first thing looked at in a bug report.
///
/// **BUG THIS CATCHES**: Would catch the exit status dropped from Display.
#[test]
fn given_crash_failure_when_formatted_then_includes_exit_status() {
    // GIVEN: Crashes by code and by signal
    let by_code = HostError::from(CrashFailure::new(HelperExit::with_code(134)));
    let by_signal = HostError::from(CrashFailure::new(HelperExit::with_signal(9)));

    // WHEN/THEN: Both render their status
    assert!(by_code.to_string().contains("code 134"));
    assert!(by_signal.to_string().contains("signal 9"));
    assert!(by_code.is_crash());
    assert_eq!(by_signal.error_category(), "crashed");
    assert_eq!(by_code.remote_payload(), None);
}

#[test]
fn given_spawn_error_when_converted_then_host_error_is_transparent() {
    let spawn = SpawnError::validation("helper program path is empty");
    let message = spawn.to_string();

    let host_error = HostError::from(spawn);

    assert_eq!(host_error.to_string(), message);
    assert_eq!(host_error.error_category(), "start");
}

#[test]
fn given_leaf_errors_when_wrapped_in_core_error_then_display_is_unchanged() {
    let config = ConfigError::Validation {
        location: common::ErrorLocation::from(std::panic::Location::caller()),
        field: "restart.delay_ms",
        reason: "0 is outside 1-60000".to_string(),
    };
    let message = config.to_string();

    let core = CoreError::from(config);

    assert_eq!(core.to_string(), message);
    assert!(message.contains("restart.delay_ms"));
}

#[test]
fn given_exit_statuses_when_checked_then_only_code_zero_is_graceful() {
    assert!(HelperExit::with_code(0).is_graceful());
    assert!(!HelperExit::with_code(1).is_graceful());
    assert!(!HelperExit::with_signal(15).is_graceful());
    assert!(!HelperExit::unknown().is_graceful());
}
