use crate::error::config::ConfigError;

use common::ErrorLocation;

use std::panic::Location;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "host.json";
const CONFIG_VERSION: u32 = 1;
const DEFAULT_HELPER_PROGRAM: &str = "native-helper";
const MIN_RESTART_DELAY_MS: u64 = 1;
const MAX_RESTART_DELAY_MS: u64 = 60_000;

// ============================================
// CONFIG STRUCTS
// ============================================

/// How to launch the helper process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperConfig {
    #[serde(default = "default_helper_program")]
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: default_helper_program(),
            args: Vec::new(),
        }
    }
}

/// Auto-restart after an abnormal exit: one attempt per crash after a fixed delay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_restart_enabled")]
    pub enabled: bool,
    #[serde(default = "default_restart_delay_ms")]
    pub delay_ms: u64,
}

impl RestartConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: default_restart_enabled(),
            delay_ms: default_restart_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub helper: HelperConfig,

    #[serde(default)]
    pub restart: RestartConfig,

    /// Enable the USB listener as soon as the host comes up.
    #[serde(default)]
    pub usb_listener: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            helper: HelperConfig::default(),
            restart: RestartConfig::default(),
            usb_listener: false,
        }
    }
}

// ============================================
// DEFAULT FUNCTIONS
// ============================================

fn default_version() -> u32 {
    CONFIG_VERSION
}
fn default_helper_program() -> PathBuf {
    PathBuf::from(DEFAULT_HELPER_PROGRAM)
}
fn default_restart_enabled() -> bool {
    true
}
fn default_restart_delay_ms() -> u64 {
    1000
}

// ============================================
// IMPLEMENTATION
// ============================================

impl HostConfig {
    /// Load config from {config_dir}/host.json.
    ///
    /// # Returns
    ///
    /// Returns defaults if the file is missing.
    /// Returns `Err(ConfigError)` if the file exists but is unreadable or invalid.
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            info!(
                "Host config not found at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            warn!("Failed to read host config: {}", e);
            ConfigError::Read {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                source: e,
            }
        })?;

        let config: HostConfig = serde_json::from_str(&contents).map_err(|e| {
            warn!("Failed to parse host config JSON: {}", e);
            ConfigError::Parse {
                location: ErrorLocation::from(Location::caller()),
                path: config_path.clone(),
                reason: e.to_string(),
            }
        })?;

        config.validate()?;

        info!("Host config loaded from {}", config_path.display());
        Ok(config)
    }

    /// Save config to {config_dir}/host.json via temp file + rename.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        self.validate()?;

        std::fs::create_dir_all(config_dir).map_err(|e| ConfigError::Write {
            location: ErrorLocation::from(Location::caller()),
            path: config_dir.to_path_buf(),
            source: e,
        })?;

        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let temp_path = config_dir.join(format!("{}.tmp", CONFIG_FILE_NAME));

        let json = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize {
            location: ErrorLocation::from(Location::caller()),
            reason: e.to_string(),
        })?;

        std::fs::write(&temp_path, json).map_err(|e| ConfigError::Write {
            location: ErrorLocation::from(Location::caller()),
            path: temp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&temp_path, &config_path).map_err(|e| ConfigError::Write {
            location: ErrorLocation::from(Location::caller()),
            path: config_path.clone(),
            source: e,
        })?;

        info!("Host config saved to {}", config_path.display());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version == 0 || self.version > CONFIG_VERSION {
            return Err(ConfigError::Validation {
                location: ErrorLocation::from(Location::caller()),
                field: "version",
                reason: format!(
                    "unsupported version {} (expected 1-{})",
                    self.version, CONFIG_VERSION
                ),
            });
        }

        if self.helper.program.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                location: ErrorLocation::from(Location::caller()),
                field: "helper.program",
                reason: "cannot be empty".to_string(),
            });
        }

        if !(MIN_RESTART_DELAY_MS..=MAX_RESTART_DELAY_MS).contains(&self.restart.delay_ms) {
            return Err(ConfigError::Validation {
                location: ErrorLocation::from(Location::caller()),
                field: "restart.delay_ms",
                reason: format!(
                    "{} is outside {}-{}",
                    self.restart.delay_ms, MIN_RESTART_DELAY_MS, MAX_RESTART_DELAY_MS
                ),
            });
        }

        Ok(())
    }
}
