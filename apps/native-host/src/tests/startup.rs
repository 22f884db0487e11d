// Unit tests for config directory resolution

use crate::startup::resolve_config_dir;

use std::path::PathBuf;

#[test]
fn given_explicit_dir_when_resolved_then_uses_it() {
    let dir = resolve_config_dir(Some(PathBuf::from("/tmp/native-host-config"))).unwrap();

    assert_eq!(dir, PathBuf::from("/tmp/native-host-config"));
}

#[test]
fn given_no_arg_when_resolved_then_uses_platform_config_dir() {
    let result = resolve_config_dir(None);

    match dirs::config_dir() {
        Some(base) => assert_eq!(result.unwrap(), base.join("native-host")),
        None => assert!(result.is_err()),
    }
}
