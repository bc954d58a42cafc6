//! Storage layer for the academIQ aggregator.
//!
//! The whole aggregation state is one [`Snapshot`] persisted as a single keyed
//! record. [`SnapshotStore`] is the seam the update queue writes through;
//! [`Database`] implements it on SQLite and [`MemoryStore`] keeps it in memory.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A store is owned by exactly one writer, so no further synchronization is needed.
//!
//! # Schema
//!
//! The `snapshots` table maps a key to the snapshot JSON. Timestamps are stored
//! as TEXT in RFC 3339 format (e.g., `2024-01-15T10:30:00Z`).

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use aq_core::Snapshot;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

/// Key of the single aggregation record.
pub const SNAPSHOT_KEY: &str = "academiq_data";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The stored snapshot could not be encoded or decoded.
    #[error("invalid snapshot data for {key}: {source}")]
    InvalidSnapshot {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Persistence for the single aggregation snapshot.
///
/// Implementations are driven by one writer at a time.
pub trait SnapshotStore: Send {
    /// Loads the current snapshot, or the empty default when none is stored.
    fn load(&mut self) -> Result<Snapshot, DbError>;

    /// Replaces the stored snapshot.
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), DbError>;

    /// Removes the stored snapshot entirely.
    fn clear(&mut self) -> Result<(), DbError>;
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            -- data: snapshot JSON as read by dashboard consumers
            CREATE TABLE IF NOT EXISTS snapshots (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Reads the raw JSON stored under `key`.
    pub fn get_raw(&self, key: &str) -> Result<Option<String>, DbError> {
        let data = self
            .conn
            .query_row(
                "SELECT data FROM snapshots WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    /// Writes raw JSON under `key`, replacing any previous value.
    pub fn put_raw(&mut self, key: &str, data: &str, updated_at: DateTime<Utc>) -> Result<(), DbError> {
        self.conn.execute(
            "
            INSERT INTO snapshots (key, data, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            ",
            params![key, data, format_timestamp(updated_at)],
        )?;
        Ok(())
    }
}

impl SnapshotStore for Database {
    fn load(&mut self) -> Result<Snapshot, DbError> {
        let Some(data) = self.get_raw(SNAPSHOT_KEY)? else {
            return Ok(Snapshot::default());
        };
        serde_json::from_str(&data).map_err(|source| DbError::InvalidSnapshot {
            key: SNAPSHOT_KEY.to_string(),
            source,
        })
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), DbError> {
        let data = serde_json::to_string(snapshot).map_err(|source| DbError::InvalidSnapshot {
            key: SNAPSHOT_KEY.to_string(),
            source,
        })?;
        self.put_raw(SNAPSHOT_KEY, &data, Utc::now())?;
        tracing::trace!(bytes = data.len(), "saved snapshot");
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DbError> {
        self.conn
            .execute("DELETE FROM snapshots WHERE key = ?", params![SNAPSHOT_KEY])?;
        Ok(())
    }
}

/// In-memory store. Clones share the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Option<Snapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the stored snapshot, if any.
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&mut self) -> Result<Snapshot, DbError> {
        Ok(self.snapshot().unwrap_or_default())
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), DbError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DbError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
