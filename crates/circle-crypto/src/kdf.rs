//! Key derivation: HKDF expansion and the chain-key hash ratchet

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{aead::NONCE_SIZE, error::CryptoError, keys::KEY_SIZE};

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"message";

/// HKDF info for turning a message key into a cipher key
const CIPHER_KEY_INFO: &[u8] = b"circleMessageKeysV1";

/// Largest output HKDF-SHA256 can produce (255 * hash length)
const HKDF_MAX_OUTPUT: usize = 255 * 32;

/// Output of one hash-ratchet step.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ChainStep {
    /// Chain key replacing the input chain key
    pub next_chain_key: [u8; KEY_SIZE],
    /// Message key for the input chain key's index
    pub message_key: [u8; KEY_SIZE],
}

/// Single-use keys for one AEAD operation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MessageKeys {
    /// 32-byte ChaCha20-Poly1305 key
    pub cipher_key: [u8; KEY_SIZE],
    /// 12-byte nonce, unique per encryption
    pub nonce: [u8; NONCE_SIZE],
}

/// HKDF-SHA256 extract-and-expand.
///
/// An empty `salt` is treated as HKDF's default all-zero salt.
pub fn derive_keys(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, CryptoError> {
    if length == 0 || length > HKDF_MAX_OUTPUT {
        return Err(CryptoError::KeyDerivation { requested: length });
    }

    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hkdf = Hkdf::<Sha256>::new(salt, ikm);

    let mut okm = vec![0u8; length];
    hkdf.expand(info, &mut okm).map_err(|_| CryptoError::KeyDerivation { requested: length })?;
    Ok(okm)
}

/// Advance a chain key by one step.
///
/// `next_chain_key = HMAC(chain_key, "chain")` and
/// `message_key = HMAC(chain_key, "message")`. Neither output reveals the
/// input chain key.
pub fn kdf_chain_key(chain_key: &[u8; KEY_SIZE]) -> ChainStep {
    ChainStep {
        next_chain_key: hmac_label(chain_key, CHAIN_LABEL),
        message_key: hmac_label(chain_key, MESSAGE_LABEL),
    }
}

/// Derive the cipher key for a message key.
pub fn derive_cipher_key(message_key: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    let hkdf = Hkdf::<Sha256>::new(None, message_key);

    let mut cipher_key = [0u8; KEY_SIZE];
    let Ok(()) = hkdf.expand(CIPHER_KEY_INFO, &mut cipher_key) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    cipher_key
}

/// Derive the full key set for one encryption.
///
/// `nonce` must be fresh random bytes from the caller.
pub fn derive_message_keys(message_key: &[u8; KEY_SIZE], nonce: [u8; NONCE_SIZE]) -> MessageKeys {
    MessageKeys { cipher_key: derive_cipher_key(message_key), nonce }
}

fn hmac_label(key: &[u8; KEY_SIZE], label: &[u8]) -> [u8; KEY_SIZE] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let result = mac.finalize().into_bytes();

    let mut out = [0u8; KEY_SIZE];
    out.copy_from_slice(&result);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chain_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn chain_step_is_deterministic() {
        let a = kdf_chain_key(&test_chain_key());
        let b = kdf_chain_key(&test_chain_key());

        assert_eq!(a.next_chain_key, b.next_chain_key);
        assert_eq!(a.message_key, b.message_key);
    }

    #[test]
    fn chain_and_message_keys_are_domain_separated() {
        let step = kdf_chain_key(&test_chain_key());

        assert_ne!(step.next_chain_key, step.message_key);
        assert_ne!(step.next_chain_key, test_chain_key());
        assert_ne!(step.message_key, test_chain_key());
    }

    #[test]
    fn derive_keys_produces_requested_length() {
        let okm = derive_keys(b"shared secret", &[0u8; 32], b"sponsor_chat_s1", 64).unwrap();
        assert_eq!(okm.len(), 64);
    }

    #[test]
    fn derive_keys_depends_on_info() {
        let a = derive_keys(b"shared secret", &[], b"sponsor_chat_a", 64).unwrap();
        let b = derive_keys(b"shared secret", &[], b"sponsor_chat_b", 64).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn zero_salt_matches_empty_salt() {
        // HKDF defines a missing salt as HashLen zero bytes
        let a = derive_keys(b"ikm", &[0u8; 32], b"info", 32).unwrap();
        let b = derive_keys(b"ikm", &[], b"info", 32).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn derive_keys_rejects_bad_lengths() {
        assert_eq!(
            derive_keys(b"ikm", &[], b"info", 0),
            Err(CryptoError::KeyDerivation { requested: 0 })
        );
        assert!(derive_keys(b"ikm", &[], b"info", HKDF_MAX_OUTPUT + 1).is_err());
    }

    #[test]
    fn message_keys_carry_caller_nonce() {
        let step = kdf_chain_key(&test_chain_key());
        let keys = derive_message_keys(&step.message_key, [7u8; NONCE_SIZE]);

        assert_eq!(keys.nonce, [7u8; NONCE_SIZE]);
        assert_eq!(keys.cipher_key, derive_cipher_key(&step.message_key));
        assert_ne!(keys.cipher_key, step.message_key);
    }
}
