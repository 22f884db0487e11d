//! Boundary to the platform's hardware-backed secure storage.
//!
//! Plaintext is masked before it is handed to the storage service and the service
//! answers with a masked envelope as well, so no buffer on either side of the boundary
//! holds a secret in the clear.

use crate::error::HostError;

use common::{SecureBytes, SecureValueEnvelope, mask, unmask};

use std::future::Future;

use log::debug;

/// A hardware-backed encrypt/decrypt service (secure enclave, TPM, keychain).
pub trait SecureStorage: Send + Sync {
    fn hardware_encrypt(
        &self,
        value: SecureValueEnvelope,
    ) -> impl Future<Output = Result<SecureValueEnvelope, HostError>> + Send;

    /// `prompt` is shown to the user when the platform asks for presence confirmation.
    fn hardware_decrypt(
        &self,
        value: SecureValueEnvelope,
        prompt: &str,
    ) -> impl Future<Output = Result<SecureValueEnvelope, HostError>> + Send;
}

pub struct HardwareCrypto<S> {
    storage: S,
}

impl<S: SecureStorage> HardwareCrypto<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Encrypt `plaintext` with the hardware key. The input buffer is wiped.
    pub async fn encrypt(&self, plaintext: &mut [u8]) -> Result<SecureBytes, HostError> {
        let envelope = mask(plaintext);
        debug!("Hardware encrypt of {} byte(s)", envelope.len());

        let reply = self.storage.hardware_encrypt(envelope).await?;
        Ok(unmask(reply)?)
    }

    /// Decrypt `ciphertext` with the hardware key. The input buffer is wiped.
    pub async fn decrypt(
        &self,
        ciphertext: &mut [u8],
        prompt: &str,
    ) -> Result<SecureBytes, HostError> {
        let envelope = mask(ciphertext);
        debug!("Hardware decrypt of {} byte(s)", envelope.len());

        let reply = self.storage.hardware_decrypt(envelope, prompt).await?;
        Ok(unmask(reply)?)
    }
}
