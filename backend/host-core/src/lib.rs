//! Supervised connection to the native helper process.
//!
//! [`HelperHost`] spawns the helper on demand, correlates calls with replies, fans crash
//! failures out to everything in flight and restarts the helper after abnormal exits.

pub mod commands;
pub mod config;
pub mod error;
pub mod hardware;
pub mod host;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod tests;

pub use commands::ChallengeSession;
pub use config::HostConfig;
pub use error::{CoreError, CrashFailure, HostError};
pub use hardware::{HardwareCrypto, SecureStorage};
pub use host::{
    ChallengeHandler, ChallengeReply, HelperHost, HostEvent, HostStatus, RegistrationState,
};
pub use transport::{HelperChannel, HelperExit, HelperLauncher, ProcessLauncher, TransportEvent};
