//! Storage abstraction for persisted session state
//!
//! A small async key → bytes store. Session state is encoded as CBOR before
//! it reaches the store, so implementations only ever see opaque bytes.
//!
//! Keys:
//!
//! - `identity`: the device [`crate::IdentityKeys`]
//! - `sender-key-{groupId}-{userId}`: one sender-key session per (group,
//!   author)
//! - `sponsor-session-{sponsorshipId}`: one pairwise sponsor session

mod chaotic;
mod error;
mod memory;
mod redb;

use std::future::Future;

pub use chaotic::ChaoticStorage;
pub use error::StorageError;
pub use memory::MemoryStorage;
use serde::{Serialize, de::DeserializeOwned};

pub use self::redb::RedbStorage;
use crate::error::ProtocolError;

/// Storage key for the device identity.
pub const IDENTITY_KEY: &str = "identity";

/// Storage key for a sender-key session.
///
/// Ids are joined with `-` unescaped, so ids containing `-` can collide
/// (`a` + `b-c` and `a-b` + `c`). Loaders check the owner recorded in the
/// stored state and refuse a foreign one.
pub fn sender_key_storage_key(group_id: &str, user_id: &str) -> String {
    format!("sender-key-{group_id}-{user_id}")
}

/// Storage key for a sponsor session.
pub fn sponsor_session_storage_key(sponsorship_id: &str) -> String {
    format!("sponsor-session-{sponsorship_id}")
}

/// Async key → bytes persistence.
///
/// Must be Clone (shared by coordinator and pairwise manager), Send + Sync,
/// and `'static`. Implementations typically share internal state via Arc, so
/// clones access the same underlying storage.
///
/// # Invariants
///
/// - A successful `set` is durable before the future resolves
/// - `get` after a successful `set` returns the written bytes
/// - `delete` of a missing key succeeds
pub trait Storage: Clone + Send + Sync + 'static {
    /// Load the value stored under `key`. `None` if absent.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, StorageError>> + Send;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Remove the value under `key`.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;
}

/// Encode state as CBOR.
pub(crate) fn encode_state<T: Serialize>(state: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(state, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

/// Decode CBOR-encoded state.
pub(crate) fn decode_state<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Encode and store `state` under `key`.
pub(crate) async fn save_state<S: Storage, T: Serialize>(
    storage: &S,
    key: &str,
    state: &T,
) -> Result<(), StorageError> {
    let bytes = encode_state(state)?;
    storage.set(key, &bytes).await
}

/// Load and decode the state under `key`.
///
/// Read failures surface as `PersistenceFailure`, undecodable bytes as
/// `CorruptState`.
pub(crate) async fn load_state<S: Storage, T: DeserializeOwned>(
    storage: &S,
    key: &str,
) -> Result<Option<T>, ProtocolError> {
    let Some(bytes) = storage
        .get(key)
        .await
        .map_err(|source| ProtocolError::PersistenceFailure { key: key.to_string(), source })?
    else {
        return Ok(None);
    };

    decode_state(&bytes)
        .map(Some)
        .map_err(|e| ProtocolError::CorruptState { key: key.to_string(), reason: e.to_string() })
}
