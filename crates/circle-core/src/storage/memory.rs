#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::{Storage, StorageError};

/// In-memory storage implementation for testing and simulation
///
/// All state is wrapped in Arc<Mutex<>> so clones share one map. The lock is
/// never held across an await point. Uses `lock().expect()` which panics if
/// the mutex is poisoned - acceptable for test code.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").len()
    }

    /// True if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is present.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().expect("Mutex poisoned").contains_key(key)
    }
}

impl Storage for MemoryStorage {
    #[allow(clippy::expect_used)]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.lock().expect("Mutex poisoned").get(key).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.inner.lock().expect("Mutex poisoned").insert(key.to_string(), value.to_vec());
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.lock().expect("Mutex poisoned").remove(key);
        Ok(())
    }
}
