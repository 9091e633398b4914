// crates/canon-store-sqlite/src/lib.rs
// ============================================================================
// Module: Canon SQLite Storage Adapter
// Description: Durable Storage implementation backed by a single WAL-mode
// SQLite file.
// Purpose: Give the pipeline a storage backend that survives a process
// restart without requiring an external database.
// Dependencies: canon-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! One generic `records` table holds every logical set: `(set_name, id)` is
//! the primary key, `payload` is the record's JSON blob, and `sequence` is
//! an autoincrement-backed column used to give [`Storage::page`] a stable
//! order. There is no per-model schema; the adapter does not interpret
//! `payload` beyond storing and returning it.

use std::path::Path;
use std::sync::Mutex;

use canon_core::SetName;
use canon_core::Storage;
use canon_core::StorageError;
use canon_core::StoredRecord;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;
use thiserror::Error;

/// Default busy timeout for the underlying connection, in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Errors specific to opening or provisioning the SQLite adapter.
#[derive(Debug, Error)]
pub enum SqliteStoreError {
    /// The underlying SQLite call failed during setup.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// SQLite-backed [`Storage`] implementation.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (creating if absent) a SQLite database at `path` in WAL mode.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the file cannot be opened or the
    /// schema cannot be provisioned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteStoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens a private, in-memory database, useful for tests.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] if the schema cannot be provisioned.
    pub fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, SqliteStoreError> {
        conn.busy_timeout(std::time::Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "full")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                set_name TEXT NOT NULL,
                id TEXT NOT NULL,
                payload TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                PRIMARY KEY (set_name, id)
            );
            CREATE TABLE IF NOT EXISTS sequence_counter (
                singleton INTEGER PRIMARY KEY CHECK (singleton = 0),
                next_value INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO sequence_counter (singleton, next_value) VALUES (0, 1);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::PermanentBackendError("sqlite connection mutex poisoned".into()))
    }

    fn next_sequence(conn: &Connection) -> Result<u64, StorageError> {
        conn.query_row(
            "UPDATE sequence_counter SET next_value = next_value + 1 WHERE singleton = 0 RETURNING next_value - 1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|value| value as u64)
        .map_err(|err| StorageError::PermanentBackendError(err.to_string()))
    }
}

impl Storage for SqliteStorage {
    fn get(&self, set: &SetName, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT payload, sequence FROM records WHERE set_name = ?1 AND id = ?2",
            params![set.as_str(), id],
            |row| {
                let payload_text: String = row.get(0)?;
                let sequence: i64 = row.get(1)?;
                Ok((payload_text, sequence))
            },
        )
        .optional()
        .map_err(|err| StorageError::PermanentBackendError(err.to_string()))?
        .map(|(payload_text, sequence)| {
            let payload = serde_json::from_str(&payload_text)
                .map_err(|err| StorageError::PermanentBackendError(err.to_string()))?;
            Ok(StoredRecord { id: id.to_string(), payload, sequence: sequence as u64 })
        })
        .transpose()
    }

    fn upsert(&self, set: &SetName, record: StoredRecord) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let sequence = Self::next_sequence(&conn)?;
        let payload_text = serde_json::to_string(&record.payload)
            .map_err(|err| StorageError::PermanentBackendError(err.to_string()))?;
        conn.execute(
            "INSERT INTO records (set_name, id, payload, sequence) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (set_name, id) DO UPDATE SET payload = excluded.payload, sequence = excluded.sequence",
            params![set.as_str(), record.id, payload_text, sequence as i64],
        )
        .map_err(|err| StorageError::PermanentBackendError(err.to_string()))?;
        Ok(())
    }

    fn delete(&self, set: &SetName, id: &str) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM records WHERE set_name = ?1 AND id = ?2", params![set.as_str(), id])
            .map_err(|err| StorageError::PermanentBackendError(err.to_string()))?;
        Ok(())
    }

    fn page(&self, set: &SetName, page_number: u64, page_size: u32) -> Result<Vec<StoredRecord>, StorageError> {
        if page_number == 0 {
            return Err(StorageError::PermanentBackendError("page_number is 1-based, got 0".into()));
        }
        let conn = self.lock()?;
        let offset = (page_number - 1) * u64::from(page_size);
        let mut statement = conn
            .prepare(
                "SELECT id, payload, sequence FROM records WHERE set_name = ?1
                 ORDER BY sequence ASC, id ASC LIMIT ?2 OFFSET ?3",
            )
            .map_err(|err| StorageError::PermanentBackendError(err.to_string()))?;
        let rows = statement
            .query_map(params![set.as_str(), i64::from(page_size), offset as i64], |row| {
                let id: String = row.get(0)?;
                let payload_text: String = row.get(1)?;
                let sequence: i64 = row.get(2)?;
                Ok((id, payload_text, sequence))
            })
            .map_err(|err| StorageError::PermanentBackendError(err.to_string()))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, payload_text, sequence) =
                row.map_err(|err| StorageError::PermanentBackendError(err.to_string()))?;
            let payload = serde_json::from_str(&payload_text)
                .map_err(|err| StorageError::PermanentBackendError(err.to_string()))?;
            records.push(StoredRecord { id, payload, sequence: sequence as u64 });
        }
        Ok(records)
    }

    fn count(&self, set: &SetName) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM records WHERE set_name = ?1", params![set.as_str()], |row| {
            row.get::<_, i64>(0)
        })
        .map(|count| count as u64)
        .map_err(|err| StorageError::PermanentBackendError(err.to_string()))
    }
}
