//! Process startup: where config and logs live, and bringing the host up.

use crate::error::NativeHostError;

use host_core::{HelperHost, HostConfig};

use std::path::PathBuf;

use log::{info, warn};

const APP_DIR_NAME: &str = "native-host";

/// Config directory: the first command-line argument, else `{config_dir}/native-host`.
pub fn resolve_config_dir(arg: Option<PathBuf>) -> Result<PathBuf, NativeHostError> {
    if let Some(dir) = arg {
        return Ok(dir);
    }

    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or_else(|| NativeHostError::native_host("Could not determine config directory"))
}

/// Build the host for `config` and, if configured, switch the USB listener on.
///
/// Must be called from within a Tokio runtime.
pub fn start_host(config: &HostConfig) -> HelperHost {
    let host = HelperHost::from_config(config);

    if config.usb_listener {
        let listener_host = host.clone();
        tokio::spawn(async move {
            match listener_host.start_usb_listener().await {
                Ok(_) => info!("USB listener enabled"),
                Err(e) => warn!("Failed to enable USB listener: {e}"),
            }
        });
    }

    host
}
