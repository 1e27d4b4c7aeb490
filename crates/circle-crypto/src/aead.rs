//! Message encryption using `ChaCha20-Poly1305`
//!
//! All functions are pure - nonces must be provided by the caller.
//!
//! Sealed payload format:
//!
//! ```text
//! [ nonce (12 bytes) | ciphertext | Poly1305 tag (16 bytes) ]
//! ```

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CryptoError, kdf::MessageKeys, keys::KEY_SIZE};

/// ChaCha20-Poly1305 nonce size (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext`, returning ciphertext with the 16-byte tag appended.
///
/// # Security
///
/// A `(cipher_key, nonce)` pair must never be used twice.
pub fn encrypt(
    cipher_key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(cipher_key.into());

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(nonce), plaintext) else {
        unreachable!("ChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    ciphertext
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Errors
///
/// - `TagMismatch`: wrong key, wrong nonce or tampered ciphertext
pub fn decrypt(
    cipher_key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(cipher_key.into());
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::TagMismatch)
}

/// Encrypt and prepend the nonce: `nonce ‖ ciphertext ‖ tag`.
pub fn seal(keys: &MessageKeys, plaintext: &[u8]) -> Vec<u8> {
    let ciphertext = encrypt(&keys.cipher_key, &keys.nonce, plaintext);

    let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    payload.extend_from_slice(&keys.nonce);
    payload.extend_from_slice(&ciphertext);
    payload
}

/// Split a sealed payload into nonce and ciphertext and decrypt it.
///
/// # Errors
///
/// - `PayloadTooShort`: payload shorter than nonce plus tag
/// - `TagMismatch`: authentication failed
pub fn open(cipher_key: &[u8; KEY_SIZE], payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if payload.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::PayloadTooShort {
            actual: payload.len(),
            minimum: NONCE_SIZE + TAG_SIZE,
        });
    }

    let (nonce_bytes, ciphertext) = payload.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);

    decrypt(cipher_key, &nonce, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_message_keys;

    fn test_keys(nonce_byte: u8) -> MessageKeys {
        derive_message_keys(&[0x42; 32], [nonce_byte; NONCE_SIZE])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let keys = test_keys(0xAB);
        let ciphertext = encrypt(&keys.cipher_key, &keys.nonce, b"Hello, circle!");
        let plaintext = decrypt(&keys.cipher_key, &keys.nonce, &ciphertext).unwrap();

        assert_eq!(plaintext, b"Hello, circle!");
    }

    #[test]
    fn empty_message_roundtrip() {
        let keys = test_keys(0);
        let payload = seal(&keys, b"");

        assert_eq!(payload.len(), NONCE_SIZE + TAG_SIZE);
        assert_eq!(open(&keys.cipher_key, &payload).unwrap(), b"");
    }

    #[test]
    fn large_message_roundtrip() {
        let keys = test_keys(1);
        let plaintext = vec![0x42u8; 64 * 1024];

        let payload = seal(&keys, &plaintext);
        assert_eq!(open(&keys.cipher_key, &payload).unwrap(), plaintext);
    }

    #[test]
    fn sealed_payload_layout() {
        let keys = test_keys(0x11);
        let payload = seal(&keys, b"test message");

        assert_eq!(&payload[..NONCE_SIZE], &[0x11; NONCE_SIZE]);
        assert_eq!(payload.len(), NONCE_SIZE + b"test message".len() + TAG_SIZE);
    }

    #[test]
    fn different_nonces_produce_different_ciphertexts() {
        let a = seal(&test_keys(0x00), b"test");
        let b = seal(&test_keys(0xFF), b"test");

        assert_ne!(a[NONCE_SIZE..], b[NONCE_SIZE..]);
    }

    #[test]
    fn wrong_key_fails() {
        let keys = test_keys(0);
        let payload = seal(&keys, b"secret message");

        let wrong = derive_message_keys(&[0x43; 32], [0; NONCE_SIZE]);
        assert_eq!(open(&wrong.cipher_key, &payload), Err(CryptoError::TagMismatch));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let keys = test_keys(0);
        let mut payload = seal(&keys, b"original message");

        payload[NONCE_SIZE] ^= 0x01;
        assert_eq!(open(&keys.cipher_key, &payload), Err(CryptoError::TagMismatch));
    }

    #[test]
    fn tampered_nonce_fails() {
        let keys = test_keys(0);
        let mut payload = seal(&keys, b"original message");

        payload[0] ^= 0x80;
        assert_eq!(open(&keys.cipher_key, &payload), Err(CryptoError::TagMismatch));
    }

    #[test]
    fn truncated_payload_rejected() {
        let keys = test_keys(0);
        let result = open(&keys.cipher_key, &[0u8; NONCE_SIZE + TAG_SIZE - 1]);

        assert_eq!(
            result,
            Err(CryptoError::PayloadTooShort { actual: NONCE_SIZE + TAG_SIZE - 1, minimum: 28 })
        );
    }
}
