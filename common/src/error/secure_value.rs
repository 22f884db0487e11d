use crate::ErrorLocation;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SecureValueError {
    #[error("Envelope Length Error: data has {data_len} bytes, pad has {random_len} {location}")]
    LengthMismatch {
        data_len: usize,
        random_len: usize,
        location: ErrorLocation,
    },

    #[error("Serialization Error: {message} {location}")]
    Serialization {
        message: String,
        location: ErrorLocation,
    },
}
