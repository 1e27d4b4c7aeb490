//! Caller-owned session registry with one lock per session.
//!
//! Every ratchet operation reads, mutates and persists session state. Two
//! overlapping operations on the same session could hand out the same
//! `(key, nonce, index)` twice, so each session sits behind its own async
//! mutex and the whole read-mutate-persist cycle runs while it is held.
//! Operations on different sessions never contend beyond the short map
//! lookup.

use std::{collections::HashMap, future::Future, hash::Hash, sync::Arc};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::error;

use crate::{
    error::ProtocolError,
    storage::{Storage, save_state},
};

/// Session types whose state is persisted after every mutation.
pub trait PersistentSession: Clone {
    /// Serializable state written to storage
    type State: Serialize;

    /// State to write.
    fn persistent_state(&self) -> &Self::State;
}

/// Map from session id to a lock-guarded session.
///
/// # Invariants
///
/// - At most one value exists per id; `get_or_try_create` runs its
///   constructor under the map lock, so concurrent callers never build the
///   same session twice
/// - Handles returned to callers stay valid after `remove`; the removed
///   session is simply no longer reachable through the store
pub struct SessionStore<K, V> {
    sessions: Mutex<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> Default for SessionStore<K, V> {
    fn default() -> Self {
        Self { sessions: Mutex::new(HashMap::new()) }
    }
}

impl<K, V> SessionStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session handle for `id`, if present.
    pub async fn get(&self, id: &K) -> Option<Arc<Mutex<V>>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Session handle for `id`, building it with `create` if absent.
    ///
    /// `create` is only called when no session exists. If it fails, nothing
    /// is inserted and the error is returned.
    pub async fn get_or_try_create<F, Fut, Err>(
        &self,
        id: &K,
        create: F,
    ) -> Result<Arc<Mutex<V>>, Err>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Err>>,
    {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(id) {
            return Ok(Arc::clone(existing));
        }

        let session = Arc::new(Mutex::new(create().await?));
        sessions.insert(id.clone(), Arc::clone(&session));
        Ok(session)
    }

    /// Session handle for `id`, loading it with `load` if absent.
    ///
    /// Like [`get_or_try_create`](Self::get_or_try_create) but `load` may
    /// find nothing, in which case `None` is returned and nothing is
    /// inserted.
    pub async fn get_or_try_load<F, Fut, Err>(
        &self,
        id: &K,
        load: F,
    ) -> Result<Option<Arc<Mutex<V>>>, Err>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, Err>>,
    {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(id) {
            return Ok(Some(Arc::clone(existing)));
        }

        let Some(value) = load().await? else {
            return Ok(None);
        };

        let session = Arc::new(Mutex::new(value));
        sessions.insert(id.clone(), Arc::clone(&session));
        Ok(Some(session))
    }

    /// Insert or replace the session for `id`.
    pub async fn insert(&self, id: K, value: V) -> Arc<Mutex<V>> {
        let session = Arc::new(Mutex::new(value));
        self.sessions.lock().await.insert(id, Arc::clone(&session));
        session
    }

    /// Remove the session for `id`, returning its handle.
    pub async fn remove(&self, id: &K) -> Option<Arc<Mutex<V>>> {
        self.sessions.lock().await.remove(id)
    }

    /// Ids of all sessions.
    pub async fn ids(&self) -> Vec<K> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Number of sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// True if the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Session state as held in a [`SessionStore`].
///
/// A slot flips to `ResetRequired` when persisting a mutation fails. The
/// in-memory state may then be ahead of the durable one, and continuing
/// could reuse a message index after a restart.
#[derive(Debug, Clone)]
pub enum SessionSlot<S> {
    /// Usable session
    Ready(S),
    /// Poisoned by a persistence failure
    ResetRequired {
        /// Storage key of the session
        key: String,
    },
}

impl<S> SessionSlot<S> {
    /// The session, or `SessionResetRequired`.
    pub fn ready(&self) -> Result<&S, ProtocolError> {
        match self {
            Self::Ready(session) => Ok(session),
            Self::ResetRequired { key } => {
                Err(ProtocolError::SessionResetRequired { key: key.clone() })
            },
        }
    }

    /// True unless the slot is poisoned.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl<V: PersistentSession> SessionSlot<V> {
    /// Clone of the session to mutate before committing.
    pub(crate) fn working_copy(&self) -> Result<V, ProtocolError> {
        self.ready().cloned()
    }

    /// Persist `next`, then make it the live session.
    ///
    /// On a failed write the slot is poisoned and `PersistenceFailure` is
    /// returned. Whatever the caller derived from `next` must then be
    /// discarded: the durable state is behind it.
    pub(crate) async fn persist_and_commit<S: Storage>(
        &mut self,
        storage: &S,
        key: &str,
        next: V,
    ) -> Result<(), ProtocolError> {
        match save_state(storage, key, next.persistent_state()).await {
            Ok(()) => {
                *self = Self::Ready(next);
                Ok(())
            },
            Err(source) => {
                error!(key, error = %source, "failed to persist session, reset required");
                *self = Self::ResetRequired { key: key.to_string() };
                Err(ProtocolError::PersistenceFailure { key: key.to_string(), source })
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::storage::{ChaoticStorage, MemoryStorage};

    #[tokio::test]
    async fn get_or_try_create_builds_once() {
        let store: SessionStore<String, u32> = SessionStore::new();
        let calls = AtomicUsize::new(0);
        let id = "g1".to_string();

        for _ in 0..3 {
            let session = store
                .get_or_try_create(&id, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ProtocolError>(7)
                })
                .await
                .unwrap();
            assert_eq!(*session.lock().await, 7);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn failed_create_inserts_nothing() {
        let store: SessionStore<String, u32> = SessionStore::new();

        let result = store
            .get_or_try_create(&"g1".to_string(), || async {
                Err(ProtocolError::GroupSessionNotFound { group_id: "g1".to_string() })
            })
            .await;

        assert!(result.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn load_miss_returns_none() {
        let store: SessionStore<(String, String), u32> = SessionStore::new();
        let id = ("g".to_string(), "bob".to_string());

        let loaded =
            store.get_or_try_load(&id, || async { Ok::<_, ProtocolError>(None) }).await.unwrap();
        assert!(loaded.is_none());
        assert!(store.get(&id).await.is_none());

        let loaded =
            store.get_or_try_load(&id, || async { Ok::<_, ProtocolError>(Some(3)) }).await.unwrap();
        assert!(loaded.is_some());
        assert!(store.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn handles_share_state() {
        let store: SessionStore<String, u32> = SessionStore::new();
        let a = store.insert("s".to_string(), 1).await;
        let b = store.get(&"s".to_string()).await.unwrap();

        *a.lock().await += 1;
        assert_eq!(*b.lock().await, 2);
    }

    #[tokio::test]
    async fn remove_drops_from_store() {
        let store: SessionStore<String, u32> = SessionStore::new();
        store.insert("s".to_string(), 1).await;

        assert!(store.remove(&"s".to_string()).await.is_some());
        assert!(store.remove(&"s".to_string()).await.is_none());
        assert!(store.ids().await.is_empty());
    }

    #[derive(Clone)]
    struct Counter(u32);

    impl PersistentSession for Counter {
        type State = u32;

        fn persistent_state(&self) -> &u32 {
            &self.0
        }
    }

    #[tokio::test]
    async fn commit_poisons_slot_on_write_failure() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 0.0);
        let mut slot = SessionSlot::Ready(Counter(0));

        slot.persist_and_commit(&storage, "counter", Counter(1)).await.unwrap();
        assert_eq!(slot.ready().unwrap().0, 1);

        storage.set_failure_rate(1.0);
        let result = slot.persist_and_commit(&storage, "counter", Counter(2)).await;

        assert!(matches!(result, Err(ProtocolError::PersistenceFailure { .. })));
        assert!(!slot.is_ready());
        assert!(slot.working_copy().is_err());
    }

    #[test]
    fn reset_required_slot_rejects_use() {
        let slot: SessionSlot<u32> = SessionSlot::ResetRequired { key: "sponsor-session-1".into() };

        assert!(!slot.is_ready());
        assert!(matches!(
            slot.ready(),
            Err(ProtocolError::SessionResetRequired { key }) if key == "sponsor-session-1"
        ));
        assert_eq!(SessionSlot::Ready(5).ready().copied().ok(), Some(5));
    }
}
