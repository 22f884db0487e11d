use host_core::{HardwareCrypto, HostError, SecureStorage};

use common::{SecureValueEnvelope, mask, unmask};

use std::sync::Mutex;

/// Stand-in for the platform service: "encrypts" by flipping every bit.
#[derive(Default)]
struct FlippingStorage {
    prompts: Mutex<Vec<String>>,
}

impl FlippingStorage {
    fn flip(value: SecureValueEnvelope) -> Result<SecureValueEnvelope, HostError> {
        let plain = unmask(value)?;
        let mut flipped: Vec<u8> = plain.expose().iter().map(|b| !b).collect();
        Ok(mask(&mut flipped))
    }
}

impl SecureStorage for FlippingStorage {
    async fn hardware_encrypt(
        &self,
        value: SecureValueEnvelope,
    ) -> Result<SecureValueEnvelope, HostError> {
        Self::flip(value)
    }

    async fn hardware_decrypt(
        &self,
        value: SecureValueEnvelope,
        prompt: &str,
    ) -> Result<SecureValueEnvelope, HostError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Self::flip(value)
    }
}

/// Returns an envelope whose halves disagree in length.
struct BrokenStorage;

impl SecureStorage for BrokenStorage {
    async fn hardware_encrypt(
        &self,
        _value: SecureValueEnvelope,
    ) -> Result<SecureValueEnvelope, HostError> {
        let bad: SecureValueEnvelope =
            serde_json::from_str(r#"{"data":[1,2,3],"random":[1]}"#).unwrap();
        Ok(bad)
    }

    async fn hardware_decrypt(
        &self,
        value: SecureValueEnvelope,
        _prompt: &str,
    ) -> Result<SecureValueEnvelope, HostError> {
        Ok(value)
    }
}

/// **VALUE**: Verifies encrypt and decrypt go through the service and wipe their inputs.
///
/// **WHY THIS MATTERS**: The caller's plaintext must not outlive the call in its own buffer.
///
/// **BUG THIS CATCHES**: Would catch the input buffer left intact, the prompt not forwarded,
/// or the reply returned still masked.
#[tokio::test]
async fn given_storage_service_when_encrypt_then_decrypt_then_round_trips_and_wipes_inputs() {
    // GIVEN: A hardware crypto boundary over a fake service
    let crypto = HardwareCrypto::new(FlippingStorage::default());
    let mut plaintext = b"master key".to_vec();

    // WHEN: Encrypting then decrypting
    let encrypted = crypto.encrypt(&mut plaintext).await.unwrap();
    let mut ciphertext = encrypted.expose().to_vec();
    let decrypted = crypto
        .decrypt(&mut ciphertext, "Unlock your vault")
        .await
        .unwrap();

    // THEN: Inputs are wiped and the value comes back
    assert!(plaintext.iter().all(|b| *b == 0));
    assert!(ciphertext.iter().all(|b| *b == 0));
    assert_ne!(encrypted.expose(), b"master key");
    assert_eq!(decrypted.expose(), b"master key");
    assert_eq!(format!("{decrypted}"), "[REDACTED]");
}

#[tokio::test]
async fn given_decrypt_when_called_then_prompt_reaches_service() {
    let crypto = HardwareCrypto::new(FlippingStorage::default());
    let mut ciphertext = vec![0xFE];

    let result = crypto.decrypt(&mut ciphertext, "Touch ID").await.unwrap();

    assert_eq!(result.expose(), &[0x01]);
    assert_eq!(*crypto.storage().prompts.lock().unwrap(), vec!["Touch ID".to_string()]);
}

#[tokio::test]
async fn given_malformed_reply_when_unmasked_then_returns_secure_value_error() {
    let crypto = HardwareCrypto::new(BrokenStorage);
    let mut plaintext = b"abc".to_vec();

    let result = crypto.encrypt(&mut plaintext).await;

    assert!(matches!(result, Err(HostError::SecureValue(_))));
}
