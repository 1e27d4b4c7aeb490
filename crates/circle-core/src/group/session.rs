//! Per-(group, author) sender-key session.
//!
//! The session is a pure state machine over [`SenderKeyState`]: no I/O and
//! no randomness of its own. The coordinator supplies nonces, message ids and
//! timestamps and persists the state after every mutation.
//!
//! # Local vs mirrored
//!
//! A *local* session belongs to this device. It owns the Ed25519 signing key
//! and is the only kind that can encrypt. A *mirrored* session tracks a
//! remote author from their [`SenderKeyBundle`]; it holds only the author's
//! signing public key and steps its chain forward as messages arrive.
//!
//! # Message key cache
//!
//! Each cached entry is the cipher key for one index. The local session
//! caches every key it sends with so echoed messages can be read back. A
//! mirrored session caches the keys it skips over when a message arrives
//! ahead of the chain; those entries are consumed on use, so a replayed
//! message finds nothing. [`SenderKeySession::cleanup_old_keys`] bounds the
//! cache.

use std::collections::BTreeMap;

use circle_crypto::{
    ChainKey, CryptoError, DEFAULT_MAX_SKIP, KEY_SIZE, NONCE_SIZE, SigningKeyPair,
    derive_cipher_key, derive_message_keys, open, seal, verify,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    error::ProtocolError,
    session_store::PersistentSession,
    wire::{GroupMessage, SenderKeyBundle, group_signing_input},
};

/// Signing material held by a session.
#[derive(Clone, Serialize, Deserialize)]
pub enum SenderSigningKey {
    /// This device's author key; can sign
    Local {
        /// Ed25519 secret seed
        secret: [u8; KEY_SIZE],
    },
    /// A remote author's key; verify only
    Remote {
        /// Ed25519 public key
        public: [u8; KEY_SIZE],
    },
}

impl SenderSigningKey {
    fn public_key(&self) -> [u8; KEY_SIZE] {
        match self {
            Self::Local { secret } => SigningKeyPair::from_secret_bytes(*secret).public_key(),
            Self::Remote { public } => *public,
        }
    }
}

impl Drop for SenderSigningKey {
    fn drop(&mut self) {
        if let Self::Local { secret } = self {
            secret.zeroize();
        }
    }
}

/// Persisted state of a sender-key session.
#[derive(Clone, Serialize, Deserialize)]
pub struct SenderKeyState {
    user_id: String,
    group_id: String,
    chain_key: [u8; KEY_SIZE],
    key_index: u32,
    signing_key: SenderSigningKey,
    message_keys: BTreeMap<u32, [u8; KEY_SIZE]>,
}

impl SenderKeyState {
    /// True for this device's own sending session.
    pub fn is_local(&self) -> bool {
        matches!(self.signing_key, SenderSigningKey::Local { .. })
    }

    /// True if this state was written for `user_id` in `group_id`.
    pub fn belongs_to(&self, group_id: &str, user_id: &str) -> bool {
        self.group_id == group_id && self.user_id == user_id
    }
}

impl Drop for SenderKeyState {
    fn drop(&mut self) {
        self.chain_key.zeroize();
        for key in self.message_keys.values_mut() {
            key.zeroize();
        }
    }
}

/// Outcome of [`SenderKeySession::update_from_bundle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleMerge {
    /// Bundle was at or behind the mirrored chain
    Unchanged,
    /// Mirrored chain jumped forward to the bundle's index
    Advanced,
    /// Author's signing key changed; mirrored state was rebuilt
    Replaced,
}

/// Sender-key ratchet for one (group, author).
///
/// # Invariants
///
/// - `key_index` never decreases
/// - The chain key at `key_index` cannot reproduce any earlier message key;
///   earlier keys exist only in the cache
/// - Only a local session encrypts
/// - A failed decrypt leaves the session unchanged
#[derive(Clone)]
pub struct SenderKeySession {
    state: SenderKeyState,
    max_skip: u32,
}

impl SenderKeySession {
    /// New local session from fresh random seeds.
    pub fn create_local(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        chain_seed: [u8; KEY_SIZE],
        signing_seed: [u8; KEY_SIZE],
    ) -> Self {
        Self::from_state(SenderKeyState {
            user_id: user_id.into(),
            group_id: group_id.into(),
            chain_key: chain_seed,
            key_index: 0,
            signing_key: SenderSigningKey::Local { secret: signing_seed },
            message_keys: BTreeMap::new(),
        })
    }

    /// New mirrored session for a remote author.
    pub fn from_bundle(bundle: &SenderKeyBundle) -> Self {
        Self::from_state(SenderKeyState {
            user_id: bundle.user_id.clone(),
            group_id: bundle.group_id.clone(),
            chain_key: bundle.chain_key,
            key_index: bundle.key_index,
            signing_key: SenderSigningKey::Remote { public: bundle.signing_public_key },
            message_keys: BTreeMap::new(),
        })
    }

    /// Resume from persisted state.
    pub fn from_state(state: SenderKeyState) -> Self {
        Self { state, max_skip: DEFAULT_MAX_SKIP }
    }

    /// Bound on how far a mirrored chain steps forward for one message.
    #[must_use]
    pub fn with_max_skip(mut self, max_skip: u32) -> Self {
        self.max_skip = max_skip;
        self
    }

    /// State to persist.
    pub fn state(&self) -> &SenderKeyState {
        &self.state
    }

    /// Author of this chain.
    pub fn user_id(&self) -> &str {
        &self.state.user_id
    }

    /// Group of this chain.
    pub fn group_id(&self) -> &str {
        &self.state.group_id
    }

    /// Next index the chain will produce.
    pub fn key_index(&self) -> u32 {
        self.state.key_index
    }

    /// True for this device's own sending session.
    pub fn is_local(&self) -> bool {
        self.state.is_local()
    }

    /// Author's Ed25519 public key.
    pub fn signing_public_key(&self) -> [u8; KEY_SIZE] {
        self.state.signing_key.public_key()
    }

    /// Number of cached message keys.
    pub fn cached_key_count(&self) -> usize {
        self.state.message_keys.len()
    }

    /// Encrypt and sign `plaintext` with the next chain key.
    ///
    /// `nonce` must be fresh random bytes; `message_id` and `timestamp` are
    /// covered by the signature.
    ///
    /// # Errors
    ///
    /// - `ReceiveOnlySession`: mirrored sessions cannot send
    /// - `Crypto(ChainIndexOverflow)`: chain exhausted, reset required
    pub fn encrypt_message(
        &mut self,
        plaintext: &[u8],
        message_id: String,
        timestamp: i64,
        nonce: [u8; NONCE_SIZE],
    ) -> Result<GroupMessage, ProtocolError> {
        let SenderSigningKey::Local { secret } = &self.state.signing_key else {
            return Err(ProtocolError::ReceiveOnlySession);
        };
        let signer = SigningKeyPair::from_secret_bytes(*secret);

        let mut chain = ChainKey::new(self.state.chain_key, self.state.key_index);
        let message_key = chain.advance()?;
        let keys = derive_message_keys(message_key.key(), nonce);

        let encrypted_payload = seal(&keys, plaintext);
        let signing_input = group_signing_input(
            &message_id,
            &self.state.group_id,
            &self.state.user_id,
            timestamp,
            &encrypted_payload,
        );
        let signature = signer.sign(&signing_input);

        self.state.message_keys.insert(message_key.index(), keys.cipher_key);
        self.state.chain_key = *chain.key();
        self.state.key_index = chain.index();

        Ok(GroupMessage {
            message_id,
            timestamp,
            group_id: self.state.group_id.clone(),
            sender_id: self.state.user_id.clone(),
            encrypted_payload,
            signature,
            key_index: message_key.index(),
        })
    }

    /// Verify and decrypt a message of this author.
    ///
    /// The signature is checked before any key is looked up. State only
    /// changes when decryption succeeds.
    ///
    /// # Errors
    ///
    /// - `SessionMismatch`: message is for another group or author
    /// - `SignatureVerificationFailed`: forged or tampered message
    /// - `MessageKeyUnavailable`: index already consumed or evicted
    /// - `TooManySkippedMessages`: index beyond the skip window
    /// - `DecryptionFailed`: AEAD authentication failed
    pub fn decrypt_message(
        &mut self,
        message: &GroupMessage,
        sender_signing_key: &[u8; KEY_SIZE],
    ) -> Result<Vec<u8>, ProtocolError> {
        self.check_addressed_to_me(message)?;

        if !verify(sender_signing_key, &message.signing_input(), &message.signature) {
            return Err(ProtocolError::SignatureVerificationFailed {
                message_id: message.message_id.clone(),
            });
        }

        let index = message.key_index;
        if index < self.state.key_index {
            return self.decrypt_cached(message);
        }

        if self.is_local() {
            // Own chain never runs ahead of what it has sent.
            return Err(ProtocolError::MessageKeyUnavailable { index });
        }

        let mut chain = ChainKey::new(self.state.chain_key, self.state.key_index);
        let (skipped, message_key) =
            chain.advance_to(index, self.max_skip).map_err(|err| match err {
                CryptoError::TooManySkippedKeys { current, requested, .. } => {
                    ProtocolError::TooManySkippedMessages { current, requested }
                },
                other => ProtocolError::Crypto(other),
            })?;

        let cipher_key = derive_cipher_key(message_key.key());
        let plaintext = open_payload(&cipher_key, &message.encrypted_payload)?;

        for key in &skipped {
            self.state.message_keys.insert(key.index(), derive_cipher_key(key.key()));
        }
        self.state.chain_key = *chain.key();
        self.state.key_index = chain.index();

        Ok(plaintext)
    }

    fn decrypt_cached(&mut self, message: &GroupMessage) -> Result<Vec<u8>, ProtocolError> {
        let index = message.key_index;
        let Some(cipher_key) = self.state.message_keys.get(&index) else {
            return Err(ProtocolError::MessageKeyUnavailable { index });
        };

        let plaintext = open_payload(cipher_key, &message.encrypted_payload)?;

        // Receive-side keys are single use. The local cache stays so echoed
        // messages remain readable until evicted.
        if !self.is_local()
            && let Some(mut used) = self.state.message_keys.remove(&index)
        {
            used.zeroize();
        }
        Ok(plaintext)
    }

    fn check_addressed_to_me(&self, message: &GroupMessage) -> Result<(), ProtocolError> {
        if message.group_id != self.state.group_id {
            return Err(ProtocolError::SessionMismatch {
                expected: self.state.group_id.clone(),
                actual: message.group_id.clone(),
            });
        }
        if message.sender_id != self.state.user_id {
            return Err(ProtocolError::SessionMismatch {
                expected: self.state.user_id.clone(),
                actual: message.sender_id.clone(),
            });
        }
        Ok(())
    }

    /// Export the current chain for distribution to group members.
    pub fn sender_key_bundle(&self) -> SenderKeyBundle {
        SenderKeyBundle {
            user_id: self.state.user_id.clone(),
            group_id: self.state.group_id.clone(),
            chain_key: self.state.chain_key,
            signing_public_key: self.signing_public_key(),
            key_index: self.state.key_index,
        }
    }

    /// Merge a newer bundle of the same author into a mirrored session.
    ///
    /// The chain moves to `max(local index, bundle index)`. A bundle signed
    /// by a different key means the author reset their session, so the
    /// mirrored state is rebuilt from it.
    ///
    /// # Errors
    ///
    /// - `SessionMismatch`: bundle for another author or group, or this is a
    ///   local session
    pub fn update_from_bundle(
        &mut self,
        bundle: &SenderKeyBundle,
    ) -> Result<BundleMerge, ProtocolError> {
        if self.is_local() {
            return Err(ProtocolError::SessionMismatch {
                expected: "mirrored session".to_string(),
                actual: format!("local session of {}", self.state.user_id),
            });
        }
        if bundle.user_id != self.state.user_id || bundle.group_id != self.state.group_id {
            return Err(ProtocolError::SessionMismatch {
                expected: format!("{}/{}", self.state.group_id, self.state.user_id),
                actual: format!("{}/{}", bundle.group_id, bundle.user_id),
            });
        }

        if bundle.signing_public_key != self.signing_public_key() {
            let max_skip = self.max_skip;
            *self = Self::from_bundle(bundle).with_max_skip(max_skip);
            return Ok(BundleMerge::Replaced);
        }

        if bundle.key_index > self.state.key_index {
            self.state.chain_key = bundle.chain_key;
            self.state.key_index = bundle.key_index;
            return Ok(BundleMerge::Advanced);
        }

        Ok(BundleMerge::Unchanged)
    }

    /// Evict cached keys older than `key_index - max_age`.
    ///
    /// Returns the number of evicted keys. Messages at those indices can no
    /// longer be decrypted.
    pub fn cleanup_old_keys(&mut self, max_age: u32) -> usize {
        let cutoff = self.state.key_index.saturating_sub(max_age);
        let retained = self.state.message_keys.split_off(&cutoff);
        let mut evicted = std::mem::replace(&mut self.state.message_keys, retained);

        let count = evicted.len();
        for key in evicted.values_mut() {
            key.zeroize();
        }
        count
    }
}

impl PersistentSession for SenderKeySession {
    type State = SenderKeyState;

    fn persistent_state(&self) -> &SenderKeyState {
        &self.state
    }
}

fn open_payload(cipher_key: &[u8; KEY_SIZE], payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    open(cipher_key, payload)
        .map_err(|err| ProtocolError::DecryptionFailed { reason: err.to_string() })
}
