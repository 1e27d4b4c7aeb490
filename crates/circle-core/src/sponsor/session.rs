//! Pairwise sponsor session: one X25519 agreement, two one-way chains.
//!
//! Both parties run the same HKDF over the shared secret and get the same 64
//! bytes. The party whose user id sorts first (byte-wise) sends on the first
//! half and receives on the second; the other party does the opposite. Each
//! direction is a plain hash ratchet with strict in-order delivery: there is
//! no skipped-key cache, and a message that does not decrypt under the next
//! key leaves the chain where it was.

use circle_crypto::{
    AgreementKeyPair, ChainKey, KEY_SIZE, NONCE_SIZE, SigningKeyPair, derive_cipher_key,
    derive_keys, derive_message_keys, open, seal, verify,
};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    error::ProtocolError,
    session_store::PersistentSession,
    wire::{PeerPublicKeys, SponsorMessage, sponsor_signing_input},
};

/// HKDF output split into the two chains.
const KEY_MATERIAL_SIZE: usize = 2 * KEY_SIZE;

/// Which half of the key material a party sends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainRole {
    /// Sends on `[0..32]`, receives on `[32..64]`
    First,
    /// Sends on `[32..64]`, receives on `[0..32]`
    Second,
}

impl ChainRole {
    /// Role of `my_user_id` when paired with `other_user_id`.
    pub fn for_pair(my_user_id: &str, other_user_id: &str) -> Self {
        if my_user_id.as_bytes() < other_user_id.as_bytes() { Self::First } else { Self::Second }
    }
}

/// Persisted state of a sponsor session.
#[derive(Clone, Serialize, Deserialize)]
pub struct SponsorSessionState {
    sponsorship_id: String,
    my_user_id: String,
    other_user_id: String,
    agreement_secret: [u8; KEY_SIZE],
    signing_secret: [u8; KEY_SIZE],
    other_public_keys: Option<PeerPublicKeys>,
    sending_chain_key: Option<[u8; KEY_SIZE]>,
    receiving_chain_key: Option<[u8; KEY_SIZE]>,
    sending_index: u32,
    receiving_index: u32,
}

impl Drop for SponsorSessionState {
    fn drop(&mut self) {
        self.agreement_secret.zeroize();
        self.signing_secret.zeroize();
        if let Some(key) = self.sending_chain_key.as_mut() {
            key.zeroize();
        }
        if let Some(key) = self.receiving_chain_key.as_mut() {
            key.zeroize();
        }
    }
}

/// One side of a sponsor 1:1 channel.
///
/// # Invariants
///
/// - Chain keys exist only after [`set_other_public_key`](Self::set_other_public_key);
///   before that, encrypt and decrypt fail closed with `KeyExchangeIncomplete`
/// - Sending and receiving indices never decrease
/// - A failed decrypt leaves the session unchanged
#[derive(Clone)]
pub struct SponsorSession {
    state: SponsorSessionState,
}

impl SponsorSession {
    /// New session awaiting the peer's public keys.
    ///
    /// # Errors
    ///
    /// - `SelfPairing`: both user ids are equal
    pub fn new(
        sponsorship_id: impl Into<String>,
        my_user_id: impl Into<String>,
        other_user_id: impl Into<String>,
        agreement_seed: [u8; KEY_SIZE],
        signing_seed: [u8; KEY_SIZE],
    ) -> Result<Self, ProtocolError> {
        let my_user_id = my_user_id.into();
        let other_user_id = other_user_id.into();
        if my_user_id == other_user_id {
            return Err(ProtocolError::SelfPairing { user_id: my_user_id });
        }

        Ok(Self {
            state: SponsorSessionState {
                sponsorship_id: sponsorship_id.into(),
                my_user_id,
                other_user_id,
                agreement_secret: agreement_seed,
                signing_secret: signing_seed,
                other_public_keys: None,
                sending_chain_key: None,
                receiving_chain_key: None,
                sending_index: 0,
                receiving_index: 0,
            },
        })
    }

    /// Resume from persisted state.
    pub fn from_state(state: SponsorSessionState) -> Self {
        Self { state }
    }

    /// State to persist.
    pub fn state(&self) -> &SponsorSessionState {
        &self.state
    }

    /// Sponsorship this session belongs to.
    pub fn sponsorship_id(&self) -> &str {
        &self.state.sponsorship_id
    }

    /// Local user.
    pub fn my_user_id(&self) -> &str {
        &self.state.my_user_id
    }

    /// Peer.
    pub fn other_user_id(&self) -> &str {
        &self.state.other_user_id
    }

    /// Which key half this side sends on.
    pub fn role(&self) -> ChainRole {
        ChainRole::for_pair(&self.state.my_user_id, &self.state.other_user_id)
    }

    /// Messages sent so far.
    pub fn sending_index(&self) -> u32 {
        self.state.sending_index
    }

    /// Messages received so far.
    pub fn receiving_index(&self) -> u32 {
        self.state.receiving_index
    }

    /// Public keys to hand to the peer.
    pub fn public_keys(&self) -> PeerPublicKeys {
        PeerPublicKeys {
            agreement_key: AgreementKeyPair::from_secret_bytes(self.state.agreement_secret)
                .public_key(),
            signing_key: SigningKeyPair::from_secret_bytes(self.state.signing_secret).public_key(),
        }
    }

    /// True once both chains are derived.
    pub fn is_key_exchange_complete(&self) -> bool {
        self.state.sending_chain_key.is_some() && self.state.receiving_chain_key.is_some()
    }

    /// Complete the key exchange with the peer's public keys.
    ///
    /// Setting the same keys again is a no-op. Different keys mean the peer
    /// reset; both chains are derived afresh from index 0.
    ///
    /// # Errors
    ///
    /// - `Crypto(InvalidPublicKey)`: low-order agreement key
    pub fn set_other_public_key(&mut self, keys: &PeerPublicKeys) -> Result<(), ProtocolError> {
        if self.state.other_public_keys.as_ref() == Some(keys) && self.is_key_exchange_complete() {
            return Ok(());
        }

        let agreement = AgreementKeyPair::from_secret_bytes(self.state.agreement_secret);
        let shared_secret = agreement.agree(&keys.agreement_key)?;

        let info = format!("sponsor_chat_{}", self.state.sponsorship_id);
        let material = Zeroizing::new(derive_keys(
            shared_secret.as_slice(),
            &[0u8; KEY_SIZE],
            info.as_bytes(),
            KEY_MATERIAL_SIZE,
        )?);

        let mut first = [0u8; KEY_SIZE];
        let mut second = [0u8; KEY_SIZE];
        first.copy_from_slice(&material[..KEY_SIZE]);
        second.copy_from_slice(&material[KEY_SIZE..]);

        let (sending, receiving) = match self.role() {
            ChainRole::First => (first, second),
            ChainRole::Second => (second, first),
        };

        self.state.other_public_keys = Some(*keys);
        self.state.sending_chain_key = Some(sending);
        self.state.receiving_chain_key = Some(receiving);
        self.state.sending_index = 0;
        self.state.receiving_index = 0;

        first.zeroize();
        second.zeroize();
        Ok(())
    }

    /// Encrypt and sign `plaintext` for the peer.
    ///
    /// # Errors
    ///
    /// - `KeyExchangeIncomplete`: peer keys not set yet
    /// - `Crypto(ChainIndexOverflow)`: chain exhausted
    pub fn encrypt_message(
        &mut self,
        plaintext: &[u8],
        message_id: String,
        timestamp: i64,
        nonce: [u8; NONCE_SIZE],
    ) -> Result<SponsorMessage, ProtocolError> {
        let Some(chain_key) = self.state.sending_chain_key else {
            return Err(self.incomplete());
        };

        let mut chain = ChainKey::new(chain_key, self.state.sending_index);
        let message_key = chain.advance()?;
        let keys = derive_message_keys(message_key.key(), nonce);

        let encrypted_payload = seal(&keys, plaintext);
        let signing_input = sponsor_signing_input(
            &message_id,
            &self.state.my_user_id,
            &self.state.other_user_id,
            timestamp,
            &encrypted_payload,
        );
        let signature = SigningKeyPair::from_secret_bytes(self.state.signing_secret)
            .sign(&signing_input);

        self.state.sending_chain_key = Some(*chain.key());
        self.state.sending_index = chain.index();

        Ok(SponsorMessage {
            message_id,
            timestamp,
            sender_id: self.state.my_user_id.clone(),
            receiver_id: self.state.other_user_id.clone(),
            encrypted_payload,
            signature,
        })
    }

    /// Verify and decrypt the peer's next message.
    ///
    /// # Errors
    ///
    /// - `KeyExchangeIncomplete`: peer keys not set yet
    /// - `SessionMismatch`: message not from the peer to this user
    /// - `SignatureVerificationFailed`: forged or tampered message
    /// - `DecryptionFailed`: tampered, replayed or out-of-order message
    pub fn decrypt_message(&mut self, message: &SponsorMessage) -> Result<Vec<u8>, ProtocolError> {
        let (Some(chain_key), Some(peer)) =
            (self.state.receiving_chain_key, self.state.other_public_keys.as_ref())
        else {
            return Err(self.incomplete());
        };

        if message.sender_id != self.state.other_user_id
            || message.receiver_id != self.state.my_user_id
        {
            return Err(ProtocolError::SessionMismatch {
                expected: format!("{} -> {}", self.state.other_user_id, self.state.my_user_id),
                actual: format!("{} -> {}", message.sender_id, message.receiver_id),
            });
        }

        if !verify(&peer.signing_key, &message.signing_input(), &message.signature) {
            return Err(ProtocolError::SignatureVerificationFailed {
                message_id: message.message_id.clone(),
            });
        }

        let mut chain = ChainKey::new(chain_key, self.state.receiving_index);
        let message_key = chain.advance()?;
        let cipher_key = derive_cipher_key(message_key.key());

        let plaintext = open(&cipher_key, &message.encrypted_payload)
            .map_err(|err| ProtocolError::DecryptionFailed { reason: err.to_string() })?;

        self.state.receiving_chain_key = Some(*chain.key());
        self.state.receiving_index = chain.index();
        Ok(plaintext)
    }

    fn incomplete(&self) -> ProtocolError {
        ProtocolError::KeyExchangeIncomplete { sponsorship_id: self.state.sponsorship_id.clone() }
    }
}

impl PersistentSession for SponsorSession {
    type State = SponsorSessionState;

    fn persistent_state(&self) -> &SponsorSessionState {
        &self.state
    }
}
