use crate::ErrorLocation;

use std::panic::Location;

/// **VALUE**: Verifies that `ErrorLocation::caller()` reports the site that invoked the
/// surrounding `#[track_caller]` constructor, not the constructor itself.
///
/// **WHY THIS MATTERS**: Every host, spawn and codec error is built through a
/// `#[track_caller]` helper. If the location collapses onto the helper, every crash report
/// points at the same line in `error/host.rs` and the fan-out site is lost.
///
/// **BUG THIS CATCHES**: Would catch a missing `#[track_caller]` on `caller()`.
#[test]
fn given_track_caller_helper_when_capturing_then_reports_call_site() {
    // GIVEN: A helper that captures its caller's location
    #[track_caller]
    fn capture() -> ErrorLocation {
        ErrorLocation::caller()
    }

    // WHEN: Capturing from two consecutive lines
    let first = capture();
    let second = capture();

    // THEN: Both point into this file on consecutive lines
    assert!(first.file.ends_with("error_location.rs"));
    assert_eq!(first.file, second.file);
    assert_eq!(first.line + 1, second.line, "Lines should be sequential");
}

/// **VALUE**: Verifies the `[file:line:column]` rendering appended to every error message.
///
/// **WHY THIS MATTERS**: Log lines for helper crashes are grepped by location. A format
/// change silently breaks that.
///
/// **BUG THIS CATCHES**: Would catch a Display impl that drops brackets or a component.
#[test]
fn given_error_location_when_formatted_then_produces_bracketed_triple() {
    // GIVEN: A location captured here
    let location = ErrorLocation::from(Location::caller());

    // WHEN: Formatting it
    let formatted = location.to_string();

    // THEN: It reads [file:line:column]
    let expected = format!("[{}:{}:{}]", location.file, location.line, location.column);
    assert_eq!(formatted, expected);
    assert!(formatted.starts_with('[') && formatted.ends_with(']'));
}

/// **VALUE**: Verifies that locations serialize as plain fields.
///
/// **WHY THIS MATTERS**: The binary prints failed call results as JSON; the location is
/// part of that output.
///
/// **BUG THIS CATCHES**: Would catch a Serialize derive that renames or drops fields.
#[test]
fn given_error_location_when_serialized_then_contains_file_line_column() {
    // GIVEN: A location
    let location = ErrorLocation::caller();

    // WHEN: Serializing to JSON
    let json = serde_json::to_value(location).expect("location serializes");

    // THEN: All three fields are present
    assert_eq!(json["line"], location.line);
    assert_eq!(json["column"], location.column);
    assert!(json["file"].as_str().is_some_and(|f| f.ends_with("error_location.rs")));
}
