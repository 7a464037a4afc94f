//! SQLite storage for per-user memory records

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::MemoryRecord;

/// SQLite storage backend
///
/// A single connection behind a mutex; every method holds the lock for its
/// whole statement (or transaction), so readers never see a half-written row.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| Error::storage(e.to_string()))
    }

    /// Read the content for a user, if a row exists
    pub fn read(&self, user_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;

        conn.query_row(
            "SELECT content FROM memory WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// Read the full record for a user
    pub fn get_record(&self, user_id: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT user_id, content, updated_at FROM memory WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(RecordRow {
                        user_id: row.get(0)?,
                        content: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;

        row.map(RecordRow::into_record).transpose()
    }

    /// Upsert `content` for a user, stamping it no earlier than `now`.
    ///
    /// `updated_at` is always strictly later than the previous stamp for the
    /// same user, even when `now` is behind it.
    pub fn write_at(&self, user_id: &str, content: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        // Stored stamps carry microseconds; compare at the same precision
        let now = now.trunc_subsecs(6);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT updated_at FROM memory WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        let stamp = match previous.as_deref().map(parse_timestamp).transpose()? {
            Some(prev) if prev >= now => prev + Duration::microseconds(1),
            _ => now,
        };

        tx.execute(
            r#"
            INSERT INTO memory (user_id, content, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
            params![user_id, content, format_timestamp(stamp)],
        )?;
        tx.commit()?;

        debug!(user_id, bytes = content.len(), "memory row written");
        Ok(stamp)
    }

    /// Delete a user's row; returns whether a row existed
    pub fn delete(&self, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM memory WHERE user_id = ?1", params![user_id])?;
        Ok(removed > 0)
    }

    /// List every user id with a row, sorted
    pub fn list_users(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT user_id FROM memory ORDER BY user_id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(Error::from)
    }
}

/// Intermediate struct for reading from SQLite
struct RecordRow {
    user_id: String,
    content: String,
    updated_at: String,
}

impl RecordRow {
    fn into_record(self) -> Result<MemoryRecord> {
        Ok(MemoryRecord {
            updated_at: parse_timestamp(&self.updated_at)?,
            user_id: self.user_id,
            content: self.content,
        })
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::storage(format!("corrupt updated_at {:?}: {}", raw, e)))
}
