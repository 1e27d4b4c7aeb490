//! Pairwise session manager.
//!
//! Owns every [`SponsorSession`] of this device, keyed by sponsorship id,
//! and persists each mutation under `sponsor-session-{sponsorshipId}` before
//! releasing its result. Sessions written by an earlier run are loaded on
//! first use.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::{SponsorSession, SponsorSessionState};
use crate::{
    env::Environment,
    error::ProtocolError,
    session_store::{SessionSlot, SessionStore},
    storage::{Storage, load_state, save_state, sponsor_session_storage_key},
    wire::{PeerPublicKeys, SponsorMessage, new_message_id},
};

type SponsorSlot = SessionSlot<SponsorSession>;

/// Sponsor chat front end for one device.
pub struct PairwiseSessionManager<S: Storage, E: Environment> {
    storage: S,
    env: E,
    sessions: SessionStore<String, SponsorSlot>,
}

impl<S: Storage, E: Environment> PairwiseSessionManager<S, E> {
    /// Create a manager. Nothing is loaded until first use.
    pub fn new(storage: S, env: E) -> Self {
        Self { storage, env, sessions: SessionStore::new() }
    }

    /// Load or create the session for `sponsorship_id`.
    ///
    /// A new session gets a fresh X25519 agreement pair and Ed25519 signing
    /// pair; it cannot encrypt until
    /// [`set_other_public_key`](Self::set_other_public_key) runs. Returns
    /// the public keys to send to the peer.
    ///
    /// # Errors
    ///
    /// - `SelfPairing`: both user ids are equal
    /// - `SessionMismatch`: an existing session pairs different users
    /// - `PersistenceFailure`: new session could not be written
    pub async fn create_session(
        &self,
        sponsorship_id: &str,
        my_user_id: &str,
        other_user_id: &str,
    ) -> Result<PeerPublicKeys, ProtocolError> {
        let slot = self
            .sessions
            .get_or_try_create(&sponsorship_id.to_string(), || {
                self.load_or_create(sponsorship_id, my_user_id, other_user_id)
            })
            .await?;

        let guard = slot.lock().await;
        let session = guard.ready()?;
        check_parties(session, my_user_id, other_user_id)?;
        Ok(session.public_keys())
    }

    async fn load_or_create(
        &self,
        sponsorship_id: &str,
        my_user_id: &str,
        other_user_id: &str,
    ) -> Result<SponsorSlot, ProtocolError> {
        if let Some(slot) = self.load(sponsorship_id).await? {
            return Ok(slot);
        }

        let session = self.fresh(sponsorship_id, my_user_id, other_user_id)?;
        let key = sponsor_session_storage_key(sponsorship_id);
        save_state(&self.storage, &key, session.state())
            .await
            .map_err(|source| ProtocolError::PersistenceFailure { key, source })?;

        info!(sponsorship_id, my_user_id, other_user_id, "created sponsor session");
        Ok(SessionSlot::Ready(session))
    }

    fn fresh(
        &self,
        sponsorship_id: &str,
        my_user_id: &str,
        other_user_id: &str,
    ) -> Result<SponsorSession, ProtocolError> {
        SponsorSession::new(
            sponsorship_id,
            my_user_id,
            other_user_id,
            self.env.random_array(),
            self.env.random_array(),
        )
    }

    async fn load(&self, sponsorship_id: &str) -> Result<Option<SponsorSlot>, ProtocolError> {
        let key = sponsor_session_storage_key(sponsorship_id);
        let Some(state) = load_state::<_, SponsorSessionState>(&self.storage, &key).await? else {
            return Ok(None);
        };

        let session = SponsorSession::from_state(state);
        if session.sponsorship_id() != sponsorship_id {
            return Err(ProtocolError::CorruptState {
                key,
                reason: format!("stored session belongs to {}", session.sponsorship_id()),
            });
        }

        info!(
            sponsorship_id,
            sent = session.sending_index(),
            received = session.receiving_index(),
            "loaded sponsor session"
        );
        Ok(Some(SessionSlot::Ready(session)))
    }

    async fn slot(&self, sponsorship_id: &str) -> Result<Arc<Mutex<SponsorSlot>>, ProtocolError> {
        self.sessions
            .get_or_try_load(&sponsorship_id.to_string(), || self.load(sponsorship_id))
            .await?
            .ok_or_else(|| ProtocolError::SponsorSessionNotFound {
                sponsorship_id: sponsorship_id.to_string(),
            })
    }

    /// Public keys of this side, for relaying to the peer.
    ///
    /// # Errors
    ///
    /// - `SponsorSessionNotFound`: no such session
    /// - `SessionResetRequired`: session is poisoned
    pub async fn public_keys(&self, sponsorship_id: &str) -> Result<PeerPublicKeys, ProtocolError> {
        let slot = self.slot(sponsorship_id).await?;
        let guard = slot.lock().await;
        Ok(guard.ready()?.public_keys())
    }

    /// Complete the key exchange with the peer's public keys.
    ///
    /// # Errors
    ///
    /// - `SponsorSessionNotFound`: no such session
    /// - `Crypto(InvalidPublicKey)`: peer agreement key is low-order
    /// - `PersistenceFailure`: derived chains could not be written
    pub async fn set_other_public_key(
        &self,
        sponsorship_id: &str,
        other_public_keys: &PeerPublicKeys,
    ) -> Result<(), ProtocolError> {
        let slot = self.slot(sponsorship_id).await?;
        let mut guard = slot.lock().await;

        let mut next = guard.working_copy()?;
        next.set_other_public_key(other_public_keys)?;
        let role = next.role();

        let key = sponsor_session_storage_key(sponsorship_id);
        guard.persist_and_commit(&self.storage, &key, next).await?;

        info!(sponsorship_id, ?role, "sponsor key exchange complete");
        Ok(())
    }

    /// True once the peer's keys have been set.
    ///
    /// # Errors
    ///
    /// - `SponsorSessionNotFound`: no such session
    /// - `SessionResetRequired`: session is poisoned
    pub async fn is_key_exchange_complete(
        &self,
        sponsorship_id: &str,
    ) -> Result<bool, ProtocolError> {
        let slot = self.slot(sponsorship_id).await?;
        let guard = slot.lock().await;
        Ok(guard.ready()?.is_key_exchange_complete())
    }

    /// Encrypt `text` for the peer.
    ///
    /// # Errors
    ///
    /// - `SponsorSessionNotFound`: no such session
    /// - `KeyExchangeIncomplete`: peer keys not set
    /// - `PersistenceFailure`: advanced chain could not be written; the
    ///   message is discarded and the session must be reset
    pub async fn encrypt_message(
        &self,
        sponsorship_id: &str,
        text: &str,
    ) -> Result<SponsorMessage, ProtocolError> {
        let slot = self.slot(sponsorship_id).await?;
        let mut guard = slot.lock().await;

        let mut next = guard.working_copy()?;
        let message = next.encrypt_message(
            text.as_bytes(),
            new_message_id(&self.env),
            self.env.wall_clock_millis(),
            self.env.random_array(),
        )?;
        let index = next.sending_index();

        let key = sponsor_session_storage_key(sponsorship_id);
        guard.persist_and_commit(&self.storage, &key, next).await?;

        debug!(sponsorship_id, sent = index, "sent sponsor message");
        Ok(message)
    }

    /// Verify and decrypt the peer's next message.
    ///
    /// # Errors
    ///
    /// - `SponsorSessionNotFound`: no such session
    /// - `KeyExchangeIncomplete`: peer keys not set
    /// - `SignatureVerificationFailed` / `DecryptionFailed`: message dropped,
    ///   session unchanged
    /// - `InvalidPlaintext`: authentic message with non-UTF-8 content; the
    ///   chain still advances past it
    /// - `PersistenceFailure`: advanced chain could not be written; plaintext
    ///   is withheld and the session must be reset
    pub async fn decrypt_message(
        &self,
        sponsorship_id: &str,
        message: &SponsorMessage,
    ) -> Result<String, ProtocolError> {
        let slot = self.slot(sponsorship_id).await?;
        let mut guard = slot.lock().await;

        let mut next = guard.working_copy()?;
        let plaintext = next.decrypt_message(message).inspect_err(|err| {
            warn!(
                sponsorship_id,
                sender_id = %message.sender_id,
                error = %err,
                "rejected sponsor message"
            );
        })?;
        let index = next.receiving_index();

        // The peer's chain moved past this message whatever it contains.
        let key = sponsor_session_storage_key(sponsorship_id);
        guard.persist_and_commit(&self.storage, &key, next).await?;

        let text = String::from_utf8(plaintext).map_err(|_| {
            warn!(sponsorship_id, received = index, "sponsor message is not UTF-8");
            ProtocolError::InvalidPlaintext
        })?;
        debug!(sponsorship_id, received = index, "received sponsor message");
        Ok(text)
    }

    /// Replace the session with fresh keys.
    ///
    /// Deletes the stored state and starts over; the peer must receive the
    /// new public keys and call `set_other_public_key` again.
    ///
    /// # Errors
    ///
    /// - `SelfPairing`: both user ids are equal
    /// - `PersistenceFailure`: old state could not be deleted or new state
    ///   written; the session stays poisoned
    pub async fn reset_session(
        &self,
        sponsorship_id: &str,
        my_user_id: &str,
        other_user_id: &str,
    ) -> Result<PeerPublicKeys, ProtocolError> {
        let key = sponsor_session_storage_key(sponsorship_id);
        let fresh = self.fresh(sponsorship_id, my_user_id, other_user_id)?;
        let public_keys = fresh.public_keys();

        let slot = self
            .sessions
            .get_or_try_create(&sponsorship_id.to_string(), || async {
                Ok::<_, ProtocolError>(SessionSlot::ResetRequired { key: key.clone() })
            })
            .await?;
        let mut guard = slot.lock().await;

        let deleted = self.storage.delete(&key).await;
        if let Err(source) = deleted {
            *guard = SessionSlot::ResetRequired { key: key.clone() };
            return Err(ProtocolError::PersistenceFailure { key, source });
        }
        guard.persist_and_commit(&self.storage, &key, fresh).await?;

        info!(sponsorship_id, my_user_id, other_user_id, "reset sponsor session");
        Ok(public_keys)
    }
}

fn check_parties(
    session: &SponsorSession,
    my_user_id: &str,
    other_user_id: &str,
) -> Result<(), ProtocolError> {
    if session.my_user_id() != my_user_id || session.other_user_id() != other_user_id {
        return Err(ProtocolError::SessionMismatch {
            expected: format!("{} <-> {}", session.my_user_id(), session.other_user_id()),
            actual: format!("{my_user_id} <-> {other_user_id}"),
        });
    }
    Ok(())
}
