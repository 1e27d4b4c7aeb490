//! Group protocol coordinator.
//!
//! Routes group operations to the right [`SenderKeySession`] and persists
//! every mutation before its result leaves the coordinator.
//!
//! # Sessions
//!
//! - One *local* session per group, keyed by group id, used for sending
//! - One *mirrored* session per (group, remote author), created from the
//!   author's bundle by [`GroupProtocolCoordinator::add_group_member`]
//!
//! Both live under `sender-key-{groupId}-{userId}`. A user can therefore
//! never be a remote member of a group they author locally.
//!
//! # Persist-before-release
//!
//! Each operation locks the session, works on a clone, writes the clone and
//! only then commits it and returns the message or plaintext. A failed write
//! poisons the session (see [`SessionSlot`]) and nothing derived from the
//! uncommitted state is released.

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::session::{BundleMerge, SenderKeySession, SenderKeyState};
use crate::{
    config::ProtocolConfig,
    env::Environment,
    error::ProtocolError,
    identity::IdentityKeys,
    session_store::{SessionSlot, SessionStore},
    storage::{Storage, load_state, save_state, sender_key_storage_key},
    wire::{GroupMessage, SenderKeyBundle, new_message_id},
};

type GroupSlot = SessionSlot<SenderKeySession>;

/// (group id, author id)
type MemberId = (String, String);

fn member_id(group_id: &str, user_id: &str) -> MemberId {
    (group_id.to_string(), user_id.to_string())
}

/// Group messaging front end for one device.
///
/// Generic over storage and environment so tests can run against
/// [`crate::MemoryStorage`] / [`crate::ChaoticStorage`] with a seeded RNG.
pub struct GroupProtocolCoordinator<S: Storage, E: Environment> {
    storage: S,
    env: E,
    config: ProtocolConfig,
    identity: OnceCell<IdentityKeys>,
    local: SessionStore<String, GroupSlot>,
    remote: SessionStore<MemberId, GroupSlot>,
}

impl<S: Storage, E: Environment> GroupProtocolCoordinator<S, E> {
    /// Create a coordinator. Nothing is loaded until first use.
    pub fn new(storage: S, env: E, config: ProtocolConfig) -> Self {
        Self {
            storage,
            env,
            config,
            identity: OnceCell::new(),
            local: SessionStore::new(),
            remote: SessionStore::new(),
        }
    }

    /// Load or generate the device identity.
    ///
    /// Idempotent: later calls return the identity loaded by the first.
    ///
    /// # Errors
    ///
    /// - `PersistenceFailure`: identity could not be read or written
    /// - `CorruptState`: stored identity cannot be decoded
    pub async fn initialize(&self) -> Result<&IdentityKeys, ProtocolError> {
        self.identity
            .get_or_try_init(|| {
                IdentityKeys::load_or_generate(&self.storage, &self.env, self.config.pre_key_count)
            })
            .await
    }

    /// Device identity, once [`initialize`](Self::initialize) has run.
    pub fn identity(&self) -> Option<&IdentityKeys> {
        self.identity.get()
    }

    /// Protocol tunables.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Load or create the local sending session for `group_id`.
    ///
    /// Returns the bundle to distribute to the other members.
    ///
    /// # Errors
    ///
    /// - `SessionMismatch`: the group already has a local session for a
    ///   different user, or `user_id` is registered as a remote member
    /// - `PersistenceFailure`: new session could not be written
    /// - `CorruptState`: stored session cannot be decoded
    pub async fn create_group(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<SenderKeyBundle, ProtocolError> {
        if self.remote.get(&member_id(group_id, user_id)).await.is_some() {
            return Err(ProtocolError::SessionMismatch {
                expected: format!("local author of {group_id}"),
                actual: format!("registered member {user_id}"),
            });
        }

        let key = sender_key_storage_key(group_id, user_id);
        let slot = self
            .local
            .get_or_try_create(&group_id.to_string(), || {
                self.load_or_create_local(group_id, user_id, &key)
            })
            .await?;

        let guard = slot.lock().await;
        let session = guard.ready()?;
        if session.user_id() != user_id {
            return Err(ProtocolError::SessionMismatch {
                expected: session.user_id().to_string(),
                actual: user_id.to_string(),
            });
        }
        Ok(session.sender_key_bundle())
    }

    async fn load_or_create_local(
        &self,
        group_id: &str,
        user_id: &str,
        key: &str,
    ) -> Result<GroupSlot, ProtocolError> {
        if let Some(state) = load_state::<_, SenderKeyState>(&self.storage, key).await? {
            check_owner(&state, key, group_id, user_id)?;
            if !state.is_local() {
                return Err(ProtocolError::CorruptState {
                    key: key.to_string(),
                    reason: "stored session is a mirrored chain".to_string(),
                });
            }

            let session = SenderKeySession::from_state(state).with_max_skip(self.config.max_skip);
            info!(group_id, user_id, key_index = session.key_index(), "loaded local sender key");
            return Ok(SessionSlot::Ready(session));
        }

        let session = self.fresh_local(group_id, user_id);
        save_state(&self.storage, key, session.state()).await.map_err(|source| {
            ProtocolError::PersistenceFailure { key: key.to_string(), source }
        })?;

        info!(group_id, user_id, "created local sender key");
        Ok(SessionSlot::Ready(session))
    }

    fn fresh_local(&self, group_id: &str, user_id: &str) -> SenderKeySession {
        SenderKeySession::create_local(
            group_id,
            user_id,
            self.env.random_array(),
            self.env.random_array(),
        )
        .with_max_skip(self.config.max_skip)
    }

    /// Encrypt `text` for the group with the local session.
    ///
    /// The returned message is ready for [`GroupMessage::to_json`].
    ///
    /// # Errors
    ///
    /// - `GroupSessionNotFound`: [`create_group`](Self::create_group) has not
    ///   run for this group
    /// - `SessionResetRequired`: an earlier write failed
    /// - `PersistenceFailure`: the advanced chain could not be written; the
    ///   message is discarded and the session must be reset
    pub async fn send_group_message(
        &self,
        group_id: &str,
        text: &str,
    ) -> Result<GroupMessage, ProtocolError> {
        let slot = self
            .local
            .get(&group_id.to_string())
            .await
            .ok_or_else(|| ProtocolError::GroupSessionNotFound { group_id: group_id.to_string() })?;

        let mut guard = slot.lock().await;
        let mut next = guard.working_copy()?;
        let key = sender_key_storage_key(group_id, next.user_id());

        let message = next.encrypt_message(
            text.as_bytes(),
            new_message_id(&self.env),
            self.env.wall_clock_millis(),
            self.env.random_array(),
        )?;
        next.cleanup_old_keys(self.config.sender_key_retention);

        guard.persist_and_commit(&self.storage, &key, next).await?;

        debug!(group_id, key_index = message.key_index, "sent group message");
        Ok(message)
    }

    /// Register a remote author's bundle.
    ///
    /// Creates the mirrored session, or merges the bundle into an existing
    /// one. A bundle for a session poisoned by a failed write replaces it.
    ///
    /// # Errors
    ///
    /// - `SessionMismatch`: bundle for another group, or for this group's
    ///   local author
    /// - `PersistenceFailure`: mirrored session could not be written
    pub async fn add_group_member(
        &self,
        group_id: &str,
        bundle: &SenderKeyBundle,
    ) -> Result<(), ProtocolError> {
        if bundle.group_id != group_id {
            return Err(ProtocolError::SessionMismatch {
                expected: group_id.to_string(),
                actual: bundle.group_id.clone(),
            });
        }
        if self.is_local_author(group_id, &bundle.user_id).await {
            return Err(ProtocolError::SessionMismatch {
                expected: "remote author".to_string(),
                actual: bundle.user_id.clone(),
            });
        }

        let key = sender_key_storage_key(group_id, &bundle.user_id);
        let slot = self
            .remote
            .get_or_try_create(&member_id(group_id, &bundle.user_id), || async {
                let slot = match self.load_mirrored(group_id, &bundle.user_id).await? {
                    Some(slot) => slot,
                    None => SessionSlot::Ready(self.mirror(bundle)),
                };
                Ok::<_, ProtocolError>(slot)
            })
            .await?;

        let mut guard = slot.lock().await;
        let (next, merge) = match &*guard {
            SessionSlot::Ready(existing) => {
                let mut next = existing.clone();
                let merge = next.update_from_bundle(bundle)?;
                (next, merge)
            },
            SessionSlot::ResetRequired { .. } => {
                (self.mirror(bundle), BundleMerge::Replaced)
            },
        };

        guard.persist_and_commit(&self.storage, &key, next).await?;

        info!(
            group_id,
            user_id = %bundle.user_id,
            key_index = bundle.key_index,
            ?merge,
            "registered group member"
        );
        Ok(())
    }

    fn mirror(&self, bundle: &SenderKeyBundle) -> SenderKeySession {
        SenderKeySession::from_bundle(bundle).with_max_skip(self.config.max_skip)
    }

    async fn load_mirrored(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<Option<GroupSlot>, ProtocolError> {
        let key = &sender_key_storage_key(group_id, user_id);
        let Some(state) = load_state::<_, SenderKeyState>(&self.storage, key).await? else {
            return Ok(None);
        };
        check_owner(&state, key, group_id, user_id)?;
        if state.is_local() {
            return Err(ProtocolError::CorruptState {
                key: key.to_string(),
                reason: "stored session is a local chain".to_string(),
            });
        }

        let session = SenderKeySession::from_state(state).with_max_skip(self.config.max_skip);
        Ok(Some(SessionSlot::Ready(session)))
    }

    async fn is_local_author(&self, group_id: &str, user_id: &str) -> bool {
        let Some(slot) = self.local.get(&group_id.to_string()).await else {
            return false;
        };

        match &*slot.lock().await {
            SessionSlot::Ready(session) => session.user_id() == user_id,
            SessionSlot::ResetRequired { key } => *key == sender_key_storage_key(group_id, user_id),
        }
    }

    /// Verify and decrypt a group message.
    ///
    /// Messages authored by this device's local session (relay echoes) are
    /// read from the local send cache without touching the chain.
    ///
    /// # Errors
    ///
    /// - `MissingSenderKey`: sender's bundle was never added
    /// - `SignatureVerificationFailed` / `DecryptionFailed` /
    ///   `MessageKeyUnavailable` / `TooManySkippedMessages`: message dropped,
    ///   session unchanged
    /// - `PersistenceFailure`: advanced chain could not be written; plaintext
    ///   is withheld and the mirrored session must be re-added
    pub async fn receive_group_message(
        &self,
        group_id: &str,
        message: &GroupMessage,
    ) -> Result<String, ProtocolError> {
        if message.group_id != group_id {
            return Err(ProtocolError::SessionMismatch {
                expected: group_id.to_string(),
                actual: message.group_id.clone(),
            });
        }

        if let Some(plaintext) = self.receive_own_echo(group_id, message).await? {
            return into_text(plaintext);
        }

        let key = sender_key_storage_key(group_id, &message.sender_id);
        let Some(slot) = self
            .remote
            .get_or_try_load(&member_id(group_id, &message.sender_id), || {
                self.load_mirrored(group_id, &message.sender_id)
            })
            .await?
        else {
            warn!(group_id, sender_id = %message.sender_id, "no sender key registered");
            return Err(ProtocolError::MissingSenderKey {
                group_id: group_id.to_string(),
                sender_id: message.sender_id.clone(),
            });
        };

        let mut guard = slot.lock().await;
        let mut next = guard.working_copy()?;
        let signing_key = next.signing_public_key();

        let plaintext = next.decrypt_message(message, &signing_key).inspect_err(|err| {
            warn!(
                group_id,
                sender_id = %message.sender_id,
                key_index = message.key_index,
                error = %err,
                "rejected group message"
            );
        })?;
        next.cleanup_old_keys(self.config.sender_key_retention);

        // The key is spent even if the content turns out not to be text.
        guard.persist_and_commit(&self.storage, &key, next).await?;
        let text = into_text(plaintext)?;

        debug!(
            group_id,
            sender_id = %message.sender_id,
            key_index = message.key_index,
            "received group message"
        );
        Ok(text)
    }

    async fn receive_own_echo(
        &self,
        group_id: &str,
        message: &GroupMessage,
    ) -> Result<Option<Vec<u8>>, ProtocolError> {
        let Some(slot) = self.local.get(&group_id.to_string()).await else {
            return Ok(None);
        };

        let mut guard = slot.lock().await;
        match &mut *guard {
            // The local chain does not move on receive, so nothing to persist.
            SessionSlot::Ready(session) if session.user_id() == message.sender_id => {
                let signing_key = session.signing_public_key();
                session.decrypt_message(message, &signing_key).map(Some)
            },
            SessionSlot::ResetRequired { key }
                if *key == sender_key_storage_key(group_id, &message.sender_id) =>
            {
                Err(ProtocolError::SessionResetRequired { key: key.clone() })
            },
            _ => Ok(None),
        }
    }

    /// Forget a remote author.
    ///
    /// Drops the mirrored session from memory and storage, so later messages
    /// from that author fail with `MissingSenderKey`. The local chain is not
    /// rotated: the removed member can keep reading this device's messages
    /// with the bundle they already hold until
    /// [`reset_group_session`](Self::reset_group_session) runs.
    ///
    /// # Errors
    ///
    /// - `SessionMismatch`: `user_id` is this group's local author
    /// - `PersistenceFailure`: stored session could not be deleted
    pub async fn remove_group_member(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<(), ProtocolError> {
        if self.is_local_author(group_id, user_id).await {
            return Err(ProtocolError::SessionMismatch {
                expected: "remote author".to_string(),
                actual: user_id.to_string(),
            });
        }

        if let Some(slot) = self.remote.remove(&member_id(group_id, user_id)).await {
            // Let an in-flight receive finish before the state is deleted.
            drop(slot.lock().await);
        }

        let key = sender_key_storage_key(group_id, user_id);
        self.storage
            .delete(&key)
            .await
            .map_err(|source| ProtocolError::PersistenceFailure { key, source })?;

        info!(group_id, user_id, "removed group member, local chain not rotated");
        Ok(())
    }

    /// Replace the local session with a fresh chain and signing key.
    ///
    /// The only key-rotation primitive. Returns the new bundle, which must
    /// be redistributed to the remaining members.
    ///
    /// # Errors
    ///
    /// - `SessionMismatch`: group has a local session for another user, or
    ///   `user_id` is a remote member
    /// - `PersistenceFailure`: old state could not be deleted or the new one
    ///   written; the session stays poisoned
    pub async fn reset_group_session(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<SenderKeyBundle, ProtocolError> {
        if self.remote.get(&member_id(group_id, user_id)).await.is_some() {
            return Err(ProtocolError::SessionMismatch {
                expected: format!("local author of {group_id}"),
                actual: format!("registered member {user_id}"),
            });
        }

        let key = sender_key_storage_key(group_id, user_id);
        let slot = self
            .local
            .get_or_try_create(&group_id.to_string(), || async {
                Ok::<_, ProtocolError>(SessionSlot::ResetRequired { key: key.clone() })
            })
            .await?;

        let mut guard = slot.lock().await;
        if let SessionSlot::Ready(existing) = &*guard
            && existing.user_id() != user_id
        {
            return Err(ProtocolError::SessionMismatch {
                expected: existing.user_id().to_string(),
                actual: user_id.to_string(),
            });
        }

        let deleted = self.storage.delete(&key).await;
        if let Err(source) = deleted {
            *guard = SessionSlot::ResetRequired { key: key.clone() };
            return Err(ProtocolError::PersistenceFailure { key, source });
        }

        let fresh = self.fresh_local(group_id, user_id);
        let bundle = fresh.sender_key_bundle();
        guard.persist_and_commit(&self.storage, &key, fresh).await?;

        info!(group_id, user_id, "reset local sender key");
        Ok(bundle)
    }

    /// Current bundle of the local session.
    ///
    /// # Errors
    ///
    /// - `GroupSessionNotFound`: no local session for this group
    /// - `SessionResetRequired`: local session is poisoned
    pub async fn sender_key_bundle(
        &self,
        group_id: &str,
    ) -> Result<SenderKeyBundle, ProtocolError> {
        let slot = self
            .local
            .get(&group_id.to_string())
            .await
            .ok_or_else(|| ProtocolError::GroupSessionNotFound { group_id: group_id.to_string() })?;

        let guard = slot.lock().await;
        Ok(guard.ready()?.sender_key_bundle())
    }

    /// Evict cached message keys older than `max_age` indices from every
    /// session of the group. Returns the number of evicted keys.
    ///
    /// Poisoned sessions are skipped.
    ///
    /// # Errors
    ///
    /// - `PersistenceFailure`: a pruned session could not be written
    pub async fn prune_group_keys(
        &self,
        group_id: &str,
        max_age: u32,
    ) -> Result<usize, ProtocolError> {
        let mut slots = Vec::new();
        if let Some(slot) = self.local.get(&group_id.to_string()).await {
            slots.push(slot);
        }
        for id in self.remote.ids().await {
            if id.0 == group_id
                && let Some(slot) = self.remote.get(&id).await
            {
                slots.push(slot);
            }
        }

        let mut evicted = 0;
        for slot in slots {
            let mut guard = slot.lock().await;
            let SessionSlot::Ready(session) = &*guard else {
                continue;
            };

            let mut next = session.clone();
            let count = next.cleanup_old_keys(max_age);
            if count == 0 {
                continue;
            }

            let key = sender_key_storage_key(group_id, next.user_id());
            guard.persist_and_commit(&self.storage, &key, next).await?;
            evicted += count;
        }

        debug!(group_id, evicted, "pruned group message keys");
        Ok(evicted)
    }

    /// Remote authors currently held for `group_id`, sorted.
    ///
    /// Mirrored sessions restored from storage appear once they have been
    /// used since start-up.
    pub async fn members(&self, group_id: &str) -> Vec<String> {
        let mut members: Vec<String> = self
            .remote
            .ids()
            .await
            .into_iter()
            .filter(|(group, _)| group == group_id)
            .map(|(_, user)| user)
            .collect();
        members.sort();
        members
    }
}

/// Group and user ids are joined with `-` in the storage key, so two pairs
/// can share a key. The stored state names its owner; anything else under
/// that key is refused rather than adopted.
fn check_owner(
    state: &SenderKeyState,
    key: &str,
    group_id: &str,
    user_id: &str,
) -> Result<(), ProtocolError> {
    if state.belongs_to(group_id, user_id) {
        return Ok(());
    }
    Err(ProtocolError::CorruptState {
        key: key.to_string(),
        reason: format!("stored session is not {user_id} in {group_id}"),
    })
}

fn into_text(plaintext: Vec<u8>) -> Result<String, ProtocolError> {
    String::from_utf8(plaintext).map_err(|_| ProtocolError::InvalidPlaintext)
}
