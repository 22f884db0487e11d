// Unit tests for process transport private functions
// Real-process behavior is covered in integration_tests/transport

use crate::config::HelperConfig;
use crate::transport::process::build_helper_command;

use std::ffi::OsStr;
use std::path::PathBuf;

#[test]
fn given_helper_config_when_build_helper_command_called_then_uses_program_and_args() {
    // GIVEN: A helper with arguments
    let config = HelperConfig {
        program: PathBuf::from("/usr/lib/app/native-helper"),
        args: vec!["--stdio".to_string(), "--verbose".to_string()],
    };

    // WHEN: Building the command
    let cmd = build_helper_command(&config);

    // THEN: Program and args are passed through in order
    let std_cmd = cmd.as_std();
    assert_eq!(std_cmd.get_program(), OsStr::new("/usr/lib/app/native-helper"));
    let args: Vec<&OsStr> = std_cmd.get_args().collect();
    assert_eq!(args, vec![OsStr::new("--stdio"), OsStr::new("--verbose")]);
}
