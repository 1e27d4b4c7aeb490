//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. A write
//! commits before `set` resolves, which is what persist-before-release needs.

use std::{path::Path, sync::Arc};

use redb::{Database, TableDefinition};

use super::{Storage, StorageError};

/// Table: sessions
/// Key: storage key (`identity`, `sender-key-*`, `sponsor-session-*`)
/// Value: CBOR-encoded state
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
/// Transactions run on the blocking pool so they never stall the runtime.
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(SESSIONS).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn get_blocking(db: &Database, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let txn = db.begin_read().map_err(io)?;
        let table = txn.open_table(SESSIONS).map_err(io)?;

        let value = table.get(key).map_err(io)?.map(|value| value.value().to_vec());
        Ok(value)
    }

    fn set_blocking(db: &Database, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let txn = db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(io)?;
            table.insert(key, value).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    fn delete_blocking(db: &Database, key: &str) -> Result<(), StorageError> {
        let txn = db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(SESSIONS).map_err(io)?;
            table.remove(key).map_err(io)?;
        }
        txn.commit().map_err(io)
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db)).await.map_err(io)?
    }
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

impl Storage for RedbStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_string();
        self.run(move |db| Self::get_blocking(db, &key)).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = key.to_string();
        let value = value.to_vec();
        self.run(move |db| Self::set_blocking(db, &key, &value)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        self.run(move |db| Self::delete_blocking(db, &key)).await
    }
}
