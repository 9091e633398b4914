// crates/canon-engine/src/repo.rs
// ============================================================================
// Module: Typed Storage Helpers
// Description: Thin (de)serialization wrappers over canon_core::Storage.
// Purpose: Keep association, projection, and parent resolution free of
// repetitive serde_json::to_value/from_value boilerplate.
// Dependencies: canon-core, serde, serde_json
// ============================================================================

use canon_core::SetName;
use canon_core::Storage;
use canon_core::StoredRecord;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EngineError;

/// Fetches and decodes a record, or `None` if absent.
pub(crate) fn get_typed<T: DeserializeOwned>(
    storage: &dyn Storage,
    set: &SetName,
    id: &str,
) -> Result<Option<T>, EngineError> {
    match storage.get(set, id)? {
        Some(record) => Ok(Some(serde_json::from_value(record.payload)?)),
        None => Ok(None),
    }
}

/// Encodes and upserts a record under `id`.
pub(crate) fn upsert_typed<T: Serialize>(
    storage: &dyn Storage,
    set: &SetName,
    id: &str,
    value: &T,
) -> Result<(), EngineError> {
    let payload = serde_json::to_value(value)?;
    storage.upsert(set, StoredRecord { id: id.to_string(), payload, sequence: 0 })?;
    Ok(())
}

/// Decodes every record in a page into `T`, skipping (and not failing on)
/// records that do not decode, since a foreign payload in a set this worker
/// owns indicates a different bug than a transient storage failure.
pub(crate) fn decode_page<T: DeserializeOwned>(records: Vec<StoredRecord>) -> Vec<(String, T)> {
    records
        .into_iter()
        .filter_map(|record| {
            let id = record.id.clone();
            serde_json::from_value(record.payload).ok().map(|value| (id, value))
        })
        .collect()
}
