use common::ErrorLocation;

use std::error::Error as StdError;
use std::panic::Location;

use thiserror::Error as ThisError;

/// Failure to bring up a helper process (a StartFailure).
#[derive(Debug, ThisError)]
pub enum SpawnError {
    #[error("Spawn Error: failed to spawn '{program}': {message} {location}")]
    Spawn {
        program: String,
        message: String,
        location: ErrorLocation,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("Stdio Error: {message} {location}")]
    Stdio {
        message: String,
        location: ErrorLocation,
    },

    #[error("Validation Error: {message} {location}")]
    Validation {
        message: String,
        location: ErrorLocation,
    },
}

impl SpawnError {
    #[track_caller]
    pub fn stdio(message: impl Into<String>) -> Self {
        SpawnError::Stdio {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub fn validation(message: impl Into<String>) -> Self {
        SpawnError::Validation {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
