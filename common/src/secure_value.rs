//! Masked transport of sensitive byte buffers.
//!
//! A sensitive value never crosses a process boundary in the clear. Before it leaves,
//! it is split into a [`SecureValueEnvelope`]: a fresh random pad and the XOR of the
//! plaintext with that pad. The receiving side recombines the two with [`unmask`].
//! Masking keeps secrets out of message buffers; it is not encryption.

use crate::{ErrorLocation, SecureValueError};

use std::fmt;
use std::panic::Location;

use rand::RngCore;
use serde::ser::Error;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Wire representation of a masked value: `plaintext = data XOR random`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureValueEnvelope {
    data: Vec<u8>,
    random: Vec<u8>,
}

impl SecureValueEnvelope {
    /// Rebuild an envelope received from the other side of a boundary.
    #[track_caller]
    pub fn from_parts(data: Vec<u8>, random: Vec<u8>) -> Result<Self, SecureValueError> {
        if data.len() != random.len() {
            return Err(SecureValueError::LengthMismatch {
                data_len: data.len(),
                random_len: random.len(),
                location: ErrorLocation::from(Location::caller()),
            });
        }
        Ok(Self { data, random })
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn random(&self) -> &[u8] {
        &self.random
    }

    /// Length of the masked value (safe to log).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for SecureValueEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureValueEnvelope({} bytes)", self.data.len())
    }
}

impl Drop for SecureValueEnvelope {
    fn drop(&mut self) {
        self.data.zeroize();
        self.random.zeroize();
    }
}

/// Mask `plaintext` with a pad of equal length and wipe the caller's buffer.
pub fn mask(plaintext: &mut [u8]) -> SecureValueEnvelope {
    let mut random = vec![0u8; plaintext.len()];
    rand::rng().fill_bytes(&mut random);

    let data = xor_bytes(plaintext, &random);
    plaintext.zeroize();

    SecureValueEnvelope { data, random }
}

/// Recombine an envelope into its plaintext. The envelope's buffers are wiped.
#[track_caller]
pub fn unmask(mut envelope: SecureValueEnvelope) -> Result<SecureBytes, SecureValueError> {
    if envelope.data.len() != envelope.random.len() {
        return Err(SecureValueError::LengthMismatch {
            data_len: envelope.data.len(),
            random_len: envelope.random.len(),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let plaintext = xor_bytes(&envelope.data, &envelope.random);
    envelope.data.zeroize();
    envelope.random.zeroize();

    Ok(SecureBytes::new(plaintext))
}

fn xor_bytes(left: &[u8], right: &[u8]) -> Vec<u8> {
    left.iter().zip(right).map(|(l, r)| l ^ r).collect()
}

/// Plaintext secret bytes that never show up in logs and are wiped on drop.
pub struct SecureBytes {
    inner: Vec<u8>,
}

impl SecureBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { inner: bytes }
    }

    /// Borrow the plaintext.
    ///
    /// # Security Note
    /// Only call this where the value is actually consumed. Prefer [`SecureBytes::mask`]
    /// when the value is about to cross a boundary again.
    #[inline]
    pub fn expose(&self) -> &[u8] {
        &self.inner
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Re-mask the value for transport, consuming it.
    pub fn mask(mut self) -> SecureValueEnvelope {
        mask(&mut self.inner)
    }
}

impl fmt::Debug for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBytes([REDACTED; {} bytes])", self.inner.len())
    }
}

impl fmt::Display for SecureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Drop for SecureBytes {
    fn drop(&mut self) {
        self.inner.zeroize();
    }
}

// Plaintext must be masked explicitly before it goes anywhere.
impl Serialize for SecureBytes {
    fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        Err(S::Error::custom(SecureValueError::Serialization {
            message: String::from("SecureBytes cannot be serialized - mask() it first"),
            location: ErrorLocation::from(Location::caller()),
        }))
    }
}
