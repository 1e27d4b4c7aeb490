//! X25519 agreement keys and Ed25519 signing keys
//!
//! Key pairs are built from caller-supplied 32-byte seeds. In production the
//! seed comes from the OS RNG; tests pass fixed or seeded bytes.

use ed25519_dalek::{Signer, SigningKey};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{error::CryptoError, signature::SIGNATURE_SIZE};

/// Size of every key in this crate (32 bytes)
pub const KEY_SIZE: usize = 32;

/// X25519 key pair used for Diffie-Hellman agreement.
#[derive(Clone)]
pub struct AgreementKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl AgreementKeyPair {
    /// Rebuild a key pair from its secret bytes.
    pub fn from_secret_bytes(secret: [u8; KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Public key bytes.
    pub fn public_key(&self) -> [u8; KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Secret key bytes, for persistence only.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    /// Diffie-Hellman with a peer public key.
    pub fn agree(
        &self,
        peer_public: &[u8; KEY_SIZE],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer_public));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

/// Ed25519 key pair used for message signatures.
#[derive(Clone)]
pub struct SigningKeyPair {
    signing: SigningKey,
}

impl SigningKeyPair {
    /// Rebuild a key pair from its 32-byte secret seed.
    pub fn from_secret_bytes(secret: [u8; KEY_SIZE]) -> Self {
        Self { signing: SigningKey::from_bytes(&secret) }
    }

    /// Public (verifying) key bytes.
    pub fn public_key(&self) -> [u8; KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// Secret seed bytes, for persistence only.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        Zeroizing::new(self.signing.to_bytes())
    }

    /// Sign `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }
}

/// Generate an X25519 key pair from 32 random bytes.
pub fn generate_key_pair(seed: [u8; KEY_SIZE]) -> AgreementKeyPair {
    AgreementKeyPair::from_secret_bytes(seed)
}

/// Generate an Ed25519 key pair from 32 random bytes.
pub fn generate_signing_key_pair(seed: [u8; KEY_SIZE]) -> SigningKeyPair {
    SigningKeyPair::from_secret_bytes(seed)
}

/// X25519 scalar multiplication of `private_key` with `peer_public_key`.
///
/// # Errors
///
/// - `InvalidPublicKey`: the peer key is a low-order point and the result
///   would be all zeros
pub fn dh(
    private_key: &[u8; KEY_SIZE],
    peer_public_key: &[u8; KEY_SIZE],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    AgreementKeyPair::from_secret_bytes(*private_key).agree(peer_public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::verify;

    #[test]
    fn dh_is_symmetric() {
        let alice = generate_key_pair([1u8; 32]);
        let bob = generate_key_pair([2u8; 32]);

        let ab = dh(&alice.secret_bytes(), &bob.public_key()).unwrap();
        let ba = dh(&bob.secret_bytes(), &alice.public_key()).unwrap();

        assert_eq!(*ab, *ba);
    }

    #[test]
    fn different_peers_produce_different_secrets() {
        let alice = generate_key_pair([1u8; 32]);
        let bob = generate_key_pair([2u8; 32]);
        let carol = generate_key_pair([3u8; 32]);

        let ab = alice.agree(&bob.public_key()).unwrap();
        let ac = alice.agree(&carol.public_key()).unwrap();

        assert_ne!(*ab, *ac);
    }

    #[test]
    fn low_order_public_key_rejected() {
        let alice = generate_key_pair([1u8; 32]);
        assert_eq!(alice.agree(&[0u8; 32]).err(), Some(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn agreement_key_roundtrips_through_secret_bytes() {
        let original = generate_key_pair([9u8; 32]);
        let restored = AgreementKeyPair::from_secret_bytes(*original.secret_bytes());
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn signing_key_roundtrips_through_secret_bytes() {
        let original = generate_signing_key_pair([5u8; 32]);
        let restored = SigningKeyPair::from_secret_bytes(*original.secret_bytes());

        assert_eq!(original.public_key(), restored.public_key());

        let signature = restored.sign(b"message");
        assert!(verify(&original.public_key(), b"message", &signature));
    }
}
