use host_core::error::spawn::SpawnError;
use common::ErrorLocation;

use std::error::Error;
use std::io::Error as IoError;
use std::io::ErrorKind;
use std::panic::Location;

/// **VALUE**: Verifies that `SpawnError::Spawn` includes file/line/column location tracking.
///
/// **WHY THIS MATTERS**: When the helper binary is missing or not executable, developers need
/// to know where the spawn was attempted and which program path was used.
///
/// **BUG THIS CATCHES**: Would catch if someone:
/// - Drops the program path from the message
/// - Breaks the location field in SpawnError::Spawn
/// - Removes location from the Display implementation
#[test]
#[track_caller]
fn given_spawn_error_when_formatted_then_includes_program_and_location() {
    // GIVEN: A Spawn error with location
    let io_err = IoError::new(ErrorKind::NotFound, "binary not found");
    let location = ErrorLocation::from(Location::caller());
    let err = SpawnError::Spawn {
        program: "/opt/app/native-helper".to_string(),
        message: "binary not found".to_string(),
        location,
        source: Box::new(io_err),
    };

    // WHEN: Formatting the error as string
    let error_string = format!("{}", err);

    // THEN: Should include error type, program, message and file location
    assert!(error_string.contains("Spawn Error"));
    assert!(error_string.contains("/opt/app/native-helper"));
    assert!(error_string.contains("binary not found"));
    assert!(error_string.contains("spawn.rs"));
}

#[test]
fn given_stdio_error_when_built_then_location_points_at_caller() {
    let err = SpawnError::stdio("Helper process has no stdout");

    match &err {
        SpawnError::Stdio { location, .. } => {
            assert!(location.file.ends_with("spawn.rs"));
            assert!(location.line > 0);
        }
        other => panic!("Expected Stdio, got {other:?}"),
    }
    assert!(err.to_string().contains("Stdio Error"));
}

/// **VALUE**: Verifies the OS error behind a failed spawn is kept as the source.
///
/// **BUG THIS CATCHES**: Would catch a removed `#[source]`, which hides "permission denied"
/// versus "not found" from anyone walking the chain.
#[test]
fn given_spawn_error_with_source_when_inspected_then_preserves_chain() {
    // GIVEN: A Spawn error with an underlying IO error
    let io_err = IoError::new(ErrorKind::PermissionDenied, "permission denied");
    let err = SpawnError::Spawn {
        program: "native-helper".to_string(),
        message: "Spawn failed".to_string(),
        location: ErrorLocation::from(Location::caller()),
        source: Box::new(io_err),
    };

    // WHEN: Accessing the error source
    let source = err.source();

    // THEN: Should preserve the original message
    assert!(source.is_some(), "Should have error source");
    assert!(source.unwrap().to_string().contains("permission denied"));
}
