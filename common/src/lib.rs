//! Shared building blocks for the native helper host.
//!
//! - [`ErrorLocation`]: source position attached to every error variant
//! - [`secure_value`]: XOR-masked envelopes for moving secrets across process boundaries
//!
//! Nothing in here knows about the helper process itself; `host-core` builds on it.

pub mod error;
pub mod secure_value;

pub use error::error_location::ErrorLocation;
pub use error::secure_value::SecureValueError;
pub use secure_value::{SecureBytes, SecureValueEnvelope, mask, unmask};

#[cfg(test)]
mod tests;
