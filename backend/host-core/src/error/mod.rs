pub mod config;
pub mod host;
pub mod protocol;
pub mod spawn;
pub mod transport;

pub use host::{CrashFailure, HostError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Host(#[from] host::HostError),

    #[error(transparent)]
    Spawn(#[from] spawn::SpawnError),

    #[error(transparent)]
    Protocol(#[from] protocol::ProtocolError),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
