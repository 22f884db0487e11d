// Unit tests for the secure value codec.

use crate::{SecureBytes, SecureValueEnvelope, SecureValueError, mask, unmask};

/// **VALUE**: Verifies that unmasking a freshly masked buffer returns the original bytes,
/// across empty, short and longer inputs.
///
/// **WHY THIS MATTERS**: Hardware encrypt/decrypt and argon2 passwords travel only as
/// envelopes. A broken round trip corrupts every secret the host handles.
///
/// **BUG THIS CATCHES**: Would catch an off-by-one in the XOR loop or a pad of the wrong
/// length.
#[test]
fn given_plaintext_when_masked_and_unmasked_then_original_bytes_return() {
    for len in [0usize, 1, 7, 32, 1024] {
        // GIVEN: A plaintext of `len` bytes
        let original: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        let mut buffer = original.clone();

        // WHEN: Masking and unmasking
        let envelope = mask(&mut buffer);
        let recovered = unmask(envelope).expect("envelope is well formed");

        // THEN: The plaintext comes back unchanged
        assert_eq!(recovered.expose(), original.as_slice(), "len {len}");
    }
}

/// **VALUE**: Verifies that `mask()` wipes the caller's plaintext buffer.
///
/// **WHY THIS MATTERS**: The point of the codec is to not leave the secret behind in a
/// reusable buffer once it has been handed off.
///
/// **BUG THIS CATCHES**: Would catch removal of the `zeroize()` call in `mask()`.
#[test]
fn given_plaintext_buffer_when_masked_then_buffer_is_zeroed() {
    // GIVEN: A non-zero secret
    let mut secret = b"correct horse battery staple".to_vec();

    // WHEN: Masking it
    let envelope = mask(&mut secret);

    // THEN: The source buffer is all zeros and the envelope has the same length
    assert!(secret.iter().all(|b| *b == 0));
    assert_eq!(envelope.len(), secret.len());
    assert_eq!(envelope.random().len(), envelope.data().len());
}

/// **VALUE**: Verifies that two maskings of the same plaintext differ.
///
/// **WHY THIS MATTERS**: A reused or constant pad would make `data` a deterministic
/// function of the secret, which defeats masking.
///
/// **BUG THIS CATCHES**: Would catch a pad generated from a fixed seed or left as zeros.
#[test]
fn given_same_plaintext_when_masked_twice_then_envelopes_differ() {
    // GIVEN: Two copies of one 32-byte secret
    let mut first = [0x42u8; 32];
    let mut second = [0x42u8; 32];

    // WHEN: Masking both
    let a = mask(&mut first);
    let b = mask(&mut second);

    // THEN: Pads and data differ
    assert_ne!(a.random(), b.random());
    assert_ne!(a, b);
    assert_ne!(a.data(), [0x42u8; 32].as_slice(), "data must not equal plaintext");
}

/// **VALUE**: Verifies that an envelope whose halves disagree in length is rejected.
///
/// **WHY THIS MATTERS**: Envelopes come back from another process. A truncated pad must
/// not be silently zipped into a shorter, wrong plaintext.
///
/// **BUG THIS CATCHES**: Would catch `unmask()` or `from_parts()` relying on `zip` alone.
#[test]
fn given_mismatched_envelope_when_rebuilt_then_length_error() {
    // GIVEN/WHEN: Building an envelope with a short pad
    let result = SecureValueEnvelope::from_parts(vec![1, 2, 3], vec![9]);

    // THEN: Length mismatch with both sizes reported
    match result {
        Err(SecureValueError::LengthMismatch {
            data_len,
            random_len,
            ..
        }) => {
            assert_eq!(data_len, 3);
            assert_eq!(random_len, 1);
        }
        other => panic!("expected LengthMismatch, got {other:?}"),
    }
}

/// **VALUE**: Verifies that envelopes survive JSON transport in the `{data, random}` shape.
///
/// **WHY THIS MATTERS**: The secure storage boundary and the helper both exchange the
/// envelope as JSON.
///
/// **BUG THIS CATCHES**: Would catch field renames that break the wire shape.
#[test]
fn given_envelope_when_sent_as_json_then_receiver_recovers_plaintext() {
    // GIVEN: A masked secret
    let mut secret = b"hunter2".to_vec();
    let envelope = mask(&mut secret);

    // WHEN: Crossing a JSON boundary
    let json = serde_json::to_value(&envelope).expect("serializes");
    assert!(json.get("data").is_some() && json.get("random").is_some());
    let received: SecureValueEnvelope = serde_json::from_value(json).expect("deserializes");

    // THEN: The receiver unmasks the original
    assert_eq!(unmask(received).expect("valid").expose(), b"hunter2");
}

/// **VALUE**: Verifies that plaintext secrets refuse serialization and redact Debug output.
///
/// **WHY THIS MATTERS**: A `SecureBytes` logged with `{:?}` or serialized into a request
/// would leak exactly what the codec exists to protect.
///
/// **BUG THIS CATCHES**: Would catch a derived `Debug` or `Serialize` sneaking in.
#[test]
fn given_secure_bytes_when_debugged_or_serialized_then_nothing_leaks() {
    // GIVEN: A plaintext secret
    let secret = SecureBytes::new(b"top-secret".to_vec());

    // WHEN: Formatting and serializing
    let debug = format!("{secret:?}");
    let display = secret.to_string();
    let serialized = serde_json::to_string(&secret);

    // THEN: Neither output contains the secret and serialization fails
    assert!(!debug.contains("top-secret"));
    assert!(debug.contains("10 bytes"));
    assert_eq!(display, "[REDACTED]");
    assert!(serialized.is_err());
}

/// **VALUE**: Verifies that re-masking a recovered secret yields a fresh envelope that
/// still unmasks to the same plaintext.
///
/// **WHY THIS MATTERS**: Decrypted values are often forwarded straight on to another
/// boundary; `SecureBytes::mask` is the path for that.
///
/// **BUG THIS CATCHES**: Would catch `mask()` on `SecureBytes` reusing the old pad.
#[test]
fn given_secure_bytes_when_remasked_then_roundtrips_with_new_pad() {
    // GIVEN: A secret recovered from an envelope
    let mut buffer = vec![5u8; 16];
    let first = mask(&mut buffer);
    let first_pad = first.random().to_vec();
    let plaintext = unmask(first).expect("valid");

    // WHEN: Re-masking it
    let second = plaintext.mask();

    // THEN: New pad, same plaintext
    assert_ne!(second.random(), first_pad.as_slice());
    assert_eq!(unmask(second).expect("valid").expose(), vec![5u8; 16].as_slice());
}
