//! Error types for the messaging core.
//!
//! Two layers: [`WireError`] for malformed transport payloads (rejected
//! before any key is touched) and [`ProtocolError`] for everything the
//! coordinator and the pairwise manager report to the caller.

use circle_crypto::CryptoError;
use thiserror::Error;

use crate::storage::StorageError;

/// Malformed JSON or byte fields of the wrong size.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Payload is not valid JSON for the expected type
    #[error("invalid JSON: {0}")]
    Json(String),

    /// Fixed-size byte field has the wrong length
    #[error("invalid length for {field}: expected {expected}, got {actual}")]
    InvalidLength {
        /// Wire field name
        field: &'static str,
        /// Required length in bytes
        expected: usize,
        /// Length received
        actual: usize,
    },

    /// Encrypted payload cannot hold a nonce and a tag
    #[error("encrypted payload too short: {actual} bytes, need at least {minimum}")]
    PayloadTooShort {
        /// Length received
        actual: usize,
        /// Nonce plus tag
        minimum: usize,
    },

    /// Required identifier is empty
    #[error("empty field: {field}")]
    EmptyField {
        /// Wire field name
        field: &'static str,
    },
}

/// Errors surfaced by the group coordinator and the pairwise manager.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No signing key registered for the sender in this group
    #[error("no sender key for {sender_id} in group {group_id}")]
    MissingSenderKey {
        /// Group the message was addressed to
        group_id: String,
        /// Author without a registered bundle
        sender_id: String,
    },

    /// Signature over the canonical message bytes did not verify
    #[error("signature verification failed for message {message_id}")]
    SignatureVerificationFailed {
        /// Rejected message
        message_id: String,
    },

    /// AEAD authentication failed or the payload was malformed
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// What went wrong
        reason: String,
    },

    /// Pairwise encrypt/decrypt before the peer public key was set
    #[error("key exchange incomplete for sponsorship {sponsorship_id}")]
    KeyExchangeIncomplete {
        /// Sponsorship without a shared secret yet
        sponsorship_id: String,
    },

    /// No local session for this group
    #[error("no group session for {group_id}")]
    GroupSessionNotFound {
        /// Unknown group
        group_id: String,
    },

    /// No pairwise session with this id
    #[error("no sponsor session for {sponsorship_id}")]
    SponsorSessionNotFound {
        /// Unknown sponsorship
        sponsorship_id: String,
    },

    /// Persisting a session mutation failed; the session must be reset
    #[error("failed to persist {key}: {source}")]
    PersistenceFailure {
        /// Storage key that could not be written or read
        key: String,
        /// Underlying storage error
        #[source]
        source: StorageError,
    },

    /// A previous persistence failure poisoned this session
    #[error("session {key} requires reset")]
    SessionResetRequired {
        /// Storage key of the poisoned session
        key: String,
    },

    /// No cached key for an index the chain has already passed
    #[error("message key unavailable for index {index}")]
    MessageKeyUnavailable {
        /// Requested key index
        index: u32,
    },

    /// Message index lies further ahead than the skip window allows
    #[error("too many skipped messages: chain at {current}, message at {requested}")]
    TooManySkippedMessages {
        /// Next index of the mirrored chain
        current: u32,
        /// Index carried by the message
        requested: u32,
    },

    /// Mirrored sessions cannot encrypt
    #[error("session is receive-only")]
    ReceiveOnlySession,

    /// Bundle or message addressed to a different session
    #[error("session mismatch: expected {expected}, got {actual}")]
    SessionMismatch {
        /// Identifier of this session
        expected: String,
        /// Identifier carried by the input
        actual: String,
    },

    /// Sponsor session between a user and themself
    #[error("cannot pair {user_id} with themself")]
    SelfPairing {
        /// Offending user id
        user_id: String,
    },

    /// Decrypted bytes are not valid UTF-8
    #[error("decrypted plaintext is not valid UTF-8")]
    InvalidPlaintext,

    /// Persisted state exists but cannot be decoded
    #[error("corrupt state under {key}: {reason}")]
    CorruptState {
        /// Storage key
        key: String,
        /// Decode failure
        reason: String,
    },

    /// Transport payload rejected
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Primitive failure (bad key material, chain overflow)
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ProtocolError {
    /// Returns true if the affected session can no longer be used safely.
    ///
    /// Persistence and state-integrity failures risk index reuse, so the
    /// caller must reset the session before continuing.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::PersistenceFailure { .. }
            | Self::SessionResetRequired { .. }
            | Self::CorruptState { .. } => true,
            Self::Crypto(err) => matches!(err, CryptoError::ChainIndexOverflow { .. }),
            _ => false,
        }
    }

    /// Returns true if only a single message was rejected.
    ///
    /// The session state is untouched; the message is shown as
    /// undecryptable and the conversation continues.
    pub fn is_message_rejection(&self) -> bool {
        matches!(
            self,
            Self::SignatureVerificationFailed { .. }
                | Self::DecryptionFailed { .. }
                | Self::MessageKeyUnavailable { .. }
                | Self::TooManySkippedMessages { .. }
                | Self::InvalidPlaintext
                | Self::Wire(_)
        )
    }
}
