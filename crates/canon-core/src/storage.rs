// crates/canon-core/src/storage.rs
// ============================================================================
// Module: Canon Storage Abstraction
// Description: Backend-agnostic interface over named logical sets.
// Purpose: Define the contract surface both workers and storage adapters
// implement against, without naming a concrete backend.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`Storage`] is the single interface the association worker, the
//! projection worker, and the parent resolution service use to read and
//! write every entity shape in §3 of the specification. There are no
//! cross-set transactions; every operation is scoped to one `(set, id)`
//! pair. Implementations must be idempotent by id on `upsert` and must
//! provide read-your-writes within a single caller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Storage Errors
// ============================================================================

/// Errors a [`Storage`] implementation may return.
///
/// # Invariants
/// - Variants are stable for programmatic handling; callers match on them to
///   decide whether to retry (`TransientUnavailable`), skip (`PermanentBackendError`),
///   or treat absence as expected (`NotFound`).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested record does not exist.
    #[error("record not found")]
    NotFound,
    /// The backend is temporarily unavailable; the caller should retry.
    #[error("storage temporarily unavailable: {0}")]
    TransientUnavailable(String),
    /// The backend reported an unrecoverable error for this operation.
    #[error("storage backend error: {0}")]
    PermanentBackendError(String),
}

// ============================================================================
// SECTION: Stored Record
// ============================================================================

/// A single record as stored by a [`Storage`] adapter: an id plus an opaque
/// JSON payload and a monotonic sequence number the adapter assigns on
/// write, used to provide a stable scan order without relying on wall-clock
/// timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// The record's primary id within its set.
    pub id: String,
    /// The opaque payload; callers (de)serialize their own shape into this.
    pub payload: Value,
    /// Adapter-assigned sequence number; ties are broken by `id`.
    pub sequence: u64,
}

// ============================================================================
// SECTION: Set Name
// ============================================================================

/// A fully-qualified logical set name, as produced by [`crate::sets::set_name`].
///
/// # Invariants
/// - Two `SetName`s with equal string forms always refer to the same
///   logical set, regardless of how they were constructed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SetName(String);

impl SetName {
    /// Wraps an already-computed set name string.
    ///
    /// Prefer [`crate::sets::set_name`] over calling this directly; it
    /// exists so storage adapters can round-trip a set name read back from
    /// their own persistence without depending on the naming table.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the set name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SetName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Storage Trait
// ============================================================================

/// Backend-agnostic interface over named logical sets.
pub trait Storage: Send + Sync {
    /// Fetches a single record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure. A missing record is
    /// `Ok(None)`, not an error.
    fn get(&self, set: &SetName, id: &str) -> Result<Option<StoredRecord>, StorageError>;

    /// Upserts a record; idempotent by `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn upsert(&self, set: &SetName, record: StoredRecord) -> Result<(), StorageError>;

    /// Deletes a record by id. Deleting an absent record is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn delete(&self, set: &SetName, id: &str) -> Result<(), StorageError>;

    /// Returns a stable, resumable page of currently-present records,
    /// ordered by ascending sequence number (insertion/update order).
    /// `page_number` is 1-based.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn page(
        &self,
        set: &SetName,
        page_number: u64,
        page_size: u32,
    ) -> Result<Vec<StoredRecord>, StorageError>;

    /// Approximate or exact count of records currently present.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn count(&self, set: &SetName) -> Result<u64, StorageError>;

    /// Equivalent to `page(set, 1, page_size)`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn first_page(&self, set: &SetName, page_size: u32) -> Result<Vec<StoredRecord>, StorageError> {
        self.page(set, 1, page_size)
    }

    /// Scans up to `max_pages` pages of `page_size` records, returning only
    /// those matching `predicate`. This is the one non-CRUD convenience the
    /// core relies on (projection's "gather contributing records" step);
    /// it is a plain linear scan and adapters need not index for it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on backend failure.
    fn scan_filtered(
        &self,
        set: &SetName,
        page_size: u32,
        max_pages: u64,
        predicate: &dyn Fn(&StoredRecord) -> bool,
    ) -> Result<Vec<StoredRecord>, StorageError> {
        let mut matched = Vec::new();
        for page_number in 1..=max_pages {
            let page = self.page(set, page_number, page_size)?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            matched.extend(page.into_iter().filter(|record| predicate(record)));
            if (page_len as u32) < page_size {
                break;
            }
        }
        Ok(matched)
    }
}
