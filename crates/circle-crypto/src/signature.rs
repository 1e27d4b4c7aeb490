//! Ed25519 signing and verification

use ed25519_dalek::{Signature, VerifyingKey};

use crate::keys::{KEY_SIZE, SigningKeyPair};

/// Ed25519 signature size (64 bytes)
pub const SIGNATURE_SIZE: usize = 64;

/// Sign `message` with an Ed25519 secret seed.
pub fn sign(private_key: &[u8; KEY_SIZE], message: &[u8]) -> [u8; SIGNATURE_SIZE] {
    SigningKeyPair::from_secret_bytes(*private_key).sign(message)
}

/// Verify an Ed25519 signature.
///
/// Uses strict verification (rejects small-order keys and non-canonical
/// signatures). Returns `false` for malformed keys instead of erroring.
pub fn verify(
    public_key: &[u8; KEY_SIZE],
    message: &[u8],
    signature: &[u8; SIGNATURE_SIZE],
) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key.verify_strict(message, &signature).is_ok()
}
