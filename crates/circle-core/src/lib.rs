//! Circle messaging core.
//!
//! End-to-end encryption for Circle's group circles and 1:1 sponsor chats.
//! The backend only ever relays ciphertext, sender-key bundles and public
//! keys; all key material lives here.
//!
//! # Architecture
//!
//! - [`SenderKeySession`]: one author's hash-ratchet chain, pure state
//!   machine with caller-supplied randomness
//! - [`GroupProtocolCoordinator`]: this device's group sessions, identity
//!   and persistence
//! - [`SponsorSession`]: one X25519 agreement split into two directional
//!   chains
//! - [`PairwiseSessionManager`]: this device's sponsor sessions and their
//!   persistence
//!
//! Every mutation is written to [`Storage`] before its result (ciphertext or
//! plaintext) is released. A failed write poisons the session until it is
//! reset, so a restart can never reuse a message index.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod env;
mod error;
mod group;
mod identity;
mod session_store;
mod sponsor;
pub mod storage;
pub mod wire;

pub use config::ProtocolConfig;
pub use env::{Environment, SystemEnv};
pub use error::{ProtocolError, WireError};
pub use group::{
    BundleMerge, GroupProtocolCoordinator, SenderKeySession, SenderKeyState, SenderSigningKey,
};
pub use identity::{IdentityKeys, IdentityPublicBundle};
pub use session_store::{PersistentSession, SessionSlot, SessionStore};
pub use sponsor::{ChainRole, PairwiseSessionManager, SponsorSession, SponsorSessionState};
pub use storage::{
    ChaoticStorage, IDENTITY_KEY, MemoryStorage, RedbStorage, Storage, StorageError,
    sender_key_storage_key, sponsor_session_storage_key,
};
pub use wire::{
    GroupMessage, MIN_PAYLOAD_SIZE, PeerPublicKeys, SenderKeyBundle, SponsorMessage,
    new_message_id,
};
