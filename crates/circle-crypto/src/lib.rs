//! Circle Cryptographic Primitives
//!
//! Cryptographic building blocks for Circle's encrypted group circles and
//! 1:1 sponsor chats. Pure functions with deterministic outputs. Callers
//! provide random bytes (key seeds, nonces) so every operation can be
//! replayed in tests.
//!
//! # Key Lifecycle
//!
//! Group circles use a sender-key ratchet: each author owns one chain and
//! distributes its current chain key to the other members. Sponsor chats run
//! a single X25519 exchange whose HKDF output seeds two one-way chains, one
//! per direction.
//!
//! ```text
//! random seed (group)      X25519 DH → HKDF (sponsor)
//!        │                          │
//!        ▼                          ▼
//!    ChainKey[index] ── HMAC("chain") ──► ChainKey[index + 1]
//!        │
//!        ▼ HMAC("message")
//!    MessageKey[index]
//!        │
//!        ▼ HKDF + random nonce
//!    MessageKeys { cipher_key, nonce }
//!        │
//!        ▼
//!    ChaCha20-Poly1305 → nonce ‖ ciphertext ‖ tag
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain keys are zeroized after deriving the next one
//! - A chain key at index n reveals nothing about message keys below n
//! - Message keys are zeroized on drop
//!
//! Authenticity:
//! - ChaCha20-Poly1305 rejects any modified ciphertext or tag
//! - Ed25519 signatures bind every message to its author

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod chain;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod signature;

pub use aead::{NONCE_SIZE, TAG_SIZE, decrypt, encrypt, open, seal};
pub use chain::{ChainKey, DEFAULT_MAX_SKIP, MessageKey};
pub use error::CryptoError;
pub use kdf::{
    ChainStep, MessageKeys, derive_cipher_key, derive_keys, derive_message_keys, kdf_chain_key,
};
pub use keys::{
    AgreementKeyPair, KEY_SIZE, SigningKeyPair, dh, generate_key_pair, generate_signing_key_pair,
};
pub use signature::{SIGNATURE_SIZE, sign, verify};
