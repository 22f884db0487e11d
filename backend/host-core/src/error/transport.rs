use crate::error::protocol::ProtocolError;

use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;

use thiserror::Error as ThisError;

/// A live helper reported a problem. Logged only; the exit event is what tears state down.
#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Helper IO Error: {message} {location}")]
    Io {
        message: String,
        location: ErrorLocation,
    },
}

impl TransportError {
    #[track_caller]
    pub fn io(context: &str, error: &IoError) -> Self {
        TransportError::Io {
            message: format!("{context}: {error}"),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
