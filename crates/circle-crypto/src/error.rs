//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from the cryptographic primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// AEAD authentication failed (wrong key, wrong nonce or tampered data)
    #[error("authentication tag mismatch")]
    TagMismatch,

    /// Key or buffer has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual length in bytes
        actual: usize,
    },

    /// Sealed payload cannot hold a nonce and a tag
    #[error("payload too short: {actual} bytes, need at least {minimum}")]
    PayloadTooShort {
        /// Length received
        actual: usize,
        /// Nonce plus tag
        minimum: usize,
    },

    /// Peer public key is not usable for Diffie-Hellman (low-order point)
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Ed25519 signature did not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// HKDF was asked for more output than it can produce
    #[error("key derivation failed: requested {requested} bytes")]
    KeyDerivation {
        /// Requested output length
        requested: usize,
    },

    /// Chain index would overflow
    #[error("chain index overflow at {current}")]
    ChainIndexOverflow {
        /// Index when overflow was detected
        current: u32,
    },

    /// Requested an index the chain has already passed
    #[error("chain too far behind: at index {current}, requested {requested}")]
    ChainTooFarBehind {
        /// Current chain index
        current: u32,
        /// Requested index
        requested: u32,
    },

    /// Requested index is further ahead than the skip window allows
    #[error(
        "too many skipped keys: at index {current}, requested {requested} (max skip {max_skip})"
    )]
    TooManySkippedKeys {
        /// Current chain index
        current: u32,
        /// Requested index
        requested: u32,
        /// Configured skip window
        max_skip: u32,
    },
}
