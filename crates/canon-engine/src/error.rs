// crates/canon-engine/src/error.rs
// ============================================================================
// Module: Engine Errors
// Description: The error type shared by association, projection, and
// parent resolution.
// Purpose: Distinguish transient storage failures (log and retry) from
// serialization/programmer errors (log with context, abort the tick).
// Dependencies: canon-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Policy rejections are never represented here; they are ordinary data
//! (`RejectionReason`) returned from candidate extraction and ownership
//! resolution. Only infrastructure and encoding failures become
//! [`EngineError`].

use canon_core::StorageError;
use thiserror::Error;

/// Errors raised while running one tick of a worker.
///
/// # Invariants
/// - `Storage` failures are retried on the next tick; no state is assumed
///   lost.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A stored payload did not decode into the expected shape.
    #[error("failed to decode stored payload: {0}")]
    Decode(#[from] serde_json::Error),
    /// An invariant the engine relies on did not hold.
    #[error("impossible state: {0}")]
    Fatal(String),
}
