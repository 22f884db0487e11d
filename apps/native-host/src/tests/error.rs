// Unit tests for error module
// Errors are serialized into driver replies, so the JSON shape matters

use crate::error::NativeHostError;

use host_core::error::config::ConfigError;
use host_core::{CrashFailure, HelperExit, HostError};

use common::ErrorLocation;

use std::panic::Location;

/// **VALUE**: Tests that errors serialize with a type tag and their data.
///
/// **WHY THIS MATTERS**: Driver clients branch on `type`. If serialization breaks, they get
/// an opaque string instead of a structured error.
///
/// **BUG THIS CATCHES**: Would catch a removed `#[derive(Serialize)]` or a changed tag layout.
#[test]
fn given_native_host_error_when_serialized_then_has_type_and_data() {
    // GIVEN: A request error
    let err = NativeHostError::Request {
        message: String::from("Invalid request line"),
        location: ErrorLocation::from(Location::caller()),
    };

    // WHEN: Serializing to JSON
    let value = serde_json::to_value(&err).unwrap();

    // THEN: Tagged with the variant and carrying the message and location
    assert_eq!(value["type"], "Request");
    assert_eq!(value["data"]["message"], "Invalid request line");
    assert!(value["data"]["location"]["line"].as_u64().unwrap() > 0);
}

#[test]
fn given_host_error_when_converted_then_becomes_core_variant_with_message() {
    let crash = HostError::from(CrashFailure::new(HelperExit::with_code(1)));
    let message = crash.to_string();

    let err = NativeHostError::from(crash);

    match err {
        NativeHostError::Core { message: got, .. } => assert_eq!(got, message),
        other => panic!("Expected Core variant, got {other:?}"),
    }
}

#[test]
fn given_config_error_when_converted_then_message_names_field() {
    let config = ConfigError::Validation {
        location: ErrorLocation::from(Location::caller()),
        field: "helper.program",
        reason: "cannot be empty".to_string(),
    };

    let err = NativeHostError::from(config);

    assert!(err.to_string().contains("Core Error"));
    assert!(err.to_string().contains("helper.program"));
}

#[test]
fn given_constructor_when_called_then_location_points_at_caller() {
    let err = NativeHostError::native_host("Could not determine config directory");

    match err {
        NativeHostError::NativeHost { location, .. } => {
            assert!(location.file.ends_with("error.rs"));
        }
        other => panic!("Expected NativeHost variant, got {other:?}"),
    }
}
