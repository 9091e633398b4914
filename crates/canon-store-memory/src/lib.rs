// crates/canon-store-memory/src/lib.rs
// ============================================================================
// Module: Canon In-Memory Storage Adapter
// Description: Mutex-guarded BTreeMap implementation of the Storage trait.
// Purpose: Provide a deterministic, dependency-free backend for tests and
// local demos.
// Dependencies: canon-core, serde_json
// ============================================================================

//! ## Overview
//! This adapter is not for production use. It exists so the association and
//! projection workers, and their integration tests, have a backend with no
//! external state and fully deterministic paging.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use canon_core::SetName;
use canon_core::Storage;
use canon_core::StorageError;
use canon_core::StoredRecord;

// ============================================================================
// SECTION: In-Memory Store
// ============================================================================

#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq)]
struct Key {
    set: String,
    id: String,
}

#[derive(Debug, Clone)]
struct Entry {
    payload: serde_json::Value,
    sequence: u64,
}

/// In-memory [`Storage`] implementation for tests and local demos.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    records: Arc<Mutex<BTreeMap<Key, Entry>>>,
    next_sequence: Arc<Mutex<u64>>,
}

impl InMemoryStorage {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_sequence(&self) -> Result<u64, StorageError> {
        let mut guard = self
            .next_sequence
            .lock()
            .map_err(|_| StorageError::PermanentBackendError("sequence counter mutex poisoned".into()))?;
        *guard += 1;
        Ok(*guard)
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, set: &SetName, id: &str) -> Result<Option<StoredRecord>, StorageError> {
        let guard = self
            .records
            .lock()
            .map_err(|_| StorageError::PermanentBackendError("record store mutex poisoned".into()))?;
        let key = Key { set: set.as_str().to_string(), id: id.to_string() };
        Ok(guard.get(&key).map(|entry| StoredRecord {
            id: id.to_string(),
            payload: entry.payload.clone(),
            sequence: entry.sequence,
        }))
    }

    fn upsert(&self, set: &SetName, record: StoredRecord) -> Result<(), StorageError> {
        let sequence = self.next_sequence()?;
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StorageError::PermanentBackendError("record store mutex poisoned".into()))?;
        let key = Key { set: set.as_str().to_string(), id: record.id.clone() };
        guard.insert(key, Entry { payload: record.payload, sequence });
        Ok(())
    }

    fn delete(&self, set: &SetName, id: &str) -> Result<(), StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| StorageError::PermanentBackendError("record store mutex poisoned".into()))?;
        let key = Key { set: set.as_str().to_string(), id: id.to_string() };
        guard.remove(&key);
        Ok(())
    }

    fn page(&self, set: &SetName, page_number: u64, page_size: u32) -> Result<Vec<StoredRecord>, StorageError> {
        if page_number == 0 {
            return Err(StorageError::PermanentBackendError("page_number is 1-based, got 0".into()));
        }
        let guard = self
            .records
            .lock()
            .map_err(|_| StorageError::PermanentBackendError("record store mutex poisoned".into()))?;
        let mut matching: Vec<(&Key, &Entry)> =
            guard.iter().filter(|(key, _)| key.set == set.as_str()).collect();
        matching.sort_by(|(a_key, a_entry), (b_key, b_entry)| {
            a_entry.sequence.cmp(&b_entry.sequence).then_with(|| a_key.id.cmp(&b_key.id))
        });
        let skip = ((page_number - 1) * u64::from(page_size)) as usize;
        Ok(matching
            .into_iter()
            .skip(skip)
            .take(page_size as usize)
            .map(|(key, entry)| StoredRecord {
                id: key.id.clone(),
                payload: entry.payload.clone(),
                sequence: entry.sequence,
            })
            .collect())
    }

    fn count(&self, set: &SetName) -> Result<u64, StorageError> {
        let guard = self
            .records
            .lock()
            .map_err(|_| StorageError::PermanentBackendError("record store mutex poisoned".into()))?;
        Ok(guard.keys().filter(|key| key.set == set.as_str()).count() as u64)
    }
}
