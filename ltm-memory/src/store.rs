//! Per-user memory store

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;

/// A user's stored memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique user identifier
    pub user_id: String,

    /// Free-text memory; may be empty
    pub content: String,

    /// When the record was last written
    pub updated_at: DateTime<Utc>,
}

/// Durable mapping from user id to a single memory string.
///
/// Writes replace the whole string; merging happens upstream in
/// [`MemoryReconciler`](crate::reconcile::MemoryReconciler). Reading or
/// deleting a user that was never written is not an error.
pub struct MemoryStore {
    sqlite: SqliteStorage,
    locks: UserLocks,
}

impl MemoryStore {
    /// Open the store described by `config`
    pub fn new(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(Self::with_storage(SqliteStorage::open(config.sqlite_path())?))
    }

    /// Open a store backed by a private in-memory database
    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_storage(SqliteStorage::open_in_memory()?))
    }

    fn with_storage(sqlite: SqliteStorage) -> Self {
        Self {
            sqlite,
            locks: UserLocks::default(),
        }
    }

    /// Current memory for a user, or `""` if none exists
    pub fn read(&self, user_id: &str) -> Result<String> {
        check_user_id(user_id)?;
        Ok(self.sqlite.read(user_id)?.unwrap_or_default())
    }

    /// Full record for a user, including its last write time
    pub fn record(&self, user_id: &str) -> Result<Option<MemoryRecord>> {
        check_user_id(user_id)?;
        self.sqlite.get_record(user_id)
    }

    /// Create or replace a user's memory
    pub fn write(&self, user_id: &str, content: &str) -> Result<()> {
        check_user_id(user_id)?;
        self.sqlite.write_at(user_id, content, Utc::now())?;
        Ok(())
    }

    /// Remove a user's record; no-op if it does not exist
    pub fn delete(&self, user_id: &str) -> Result<()> {
        check_user_id(user_id)?;
        if !self.sqlite.delete(user_id)? {
            debug!(user_id, "delete of absent memory ignored");
        }
        Ok(())
    }

    /// Every user with a record, including empty ones
    pub fn list_users(&self) -> Result<Vec<String>> {
        self.sqlite.list_users()
    }

    /// Per-user advisory locks for read-merge-write sequences
    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }
}

fn check_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(Error::invalid_input("user_id must not be blank"));
    }
    Ok(())
}

/// Advisory per-user locks.
///
/// Holding a user's guard serializes read-merge-write sequences for that user
/// within this process. Plain `write` calls do not take the lock.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl UserLocks {
    /// Wait for and take the lock for `user_id`
    pub async fn lock(&self, user_id: &str) -> Result<OwnedMutexGuard<()>> {
        let slot = {
            let mut map = self.inner.lock().map_err(|e| Error::storage(e.to_string()))?;
            // Drop slots nobody holds or waits on
            map.retain(|_, slot| Arc::strong_count(slot) > 1);
            map.entry(user_id.to_string()).or_default().clone()
        };
        Ok(slot.lock_owned().await)
    }
}
