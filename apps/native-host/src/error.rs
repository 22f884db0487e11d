use host_core::{CoreError, HostError};

use common::ErrorLocation;

use std::panic::Location;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur in the native host binary.
///
/// These errors are written back to the driver's client as JSON, so they stay
/// serializable; host-core errors are flattened into a message at the boundary.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum NativeHostError {
    /// Error from this binary (startup, logging, directories)
    #[error("Native Host Error: {message} {location}")]
    NativeHost {
        message: String,
        location: ErrorLocation,
    },

    /// Error from host-core operations (config, spawn, calls)
    #[error("Core Error: {message} {location}")]
    Core {
        message: String,
        location: ErrorLocation,
    },

    /// A driver request line could not be understood
    #[error("Request Error: {message} {location}")]
    Request {
        message: String,
        location: ErrorLocation,
    },
}

impl NativeHostError {
    #[track_caller]
    pub fn native_host(message: impl Into<String>) -> Self {
        NativeHostError::NativeHost {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn request(message: impl Into<String>) -> Self {
        NativeHostError::Request {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<CoreError> for NativeHostError {
    #[track_caller]
    fn from(error: CoreError) -> Self {
        NativeHostError::Core {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<HostError> for NativeHostError {
    #[track_caller]
    fn from(error: HostError) -> Self {
        NativeHostError::from(CoreError::from(error))
    }
}

impl From<host_core::error::config::ConfigError> for NativeHostError {
    #[track_caller]
    fn from(error: host_core::error::config::ConfigError) -> Self {
        NativeHostError::from(CoreError::from(error))
    }
}
