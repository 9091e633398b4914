// crates/canon-core/src/materialize.rs
// ============================================================================
// Module: Canon Materializer and Monitor Contracts
// Description: External-collaborator traits invoked by the projection worker.
// Purpose: Define the narrow contract surface per-domain materializer and
// monitor code must implement; no implementation lives in this crate.
// Dependencies: std::collections, serde_json
// ============================================================================

//! ## Overview
//! The projection worker reduces contributing stage records into an ordered,
//! per-path canonical range map, then hands that map to a [`Materializer`]
//! to pick one representative value per path, and finally to zero or more
//! [`Monitor`]s that may derive or override fields before the result is
//! persisted. Both are pure/side-effecting contracts only; reference
//! implementations live in the `canon-materializer-demo` crate, not here.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::id::ModelName;
use crate::id::ReferenceId;

/// Dotted path -> ordered, deduplicated values contributed across every
/// source for one reference id.
pub type CanonicalRanges = BTreeMap<String, Vec<Value>>;

/// Dotted path -> the single value chosen to represent it in the root
/// snapshot.
pub type FlatValues = BTreeMap<String, Value>;

/// Dotted path -> the policy id or label that chose `FlatValues`'s value at
/// that path.
pub type PolicyChoices = BTreeMap<String, String>;

/// Reduces an ordered canonical range map to one representative value per
/// path, recording which policy made each choice.
///
/// Implementations must be pure and deterministic, and must never invent
/// paths absent from `canonical` except for derived fields they document.
pub trait Materializer: Send + Sync {
    /// Materializes a flat value map and the policy choices behind it.
    fn materialize(&self, model: &ModelName, canonical: &CanonicalRanges) -> (FlatValues, PolicyChoices);
}

/// A side-effecting hook invoked after materialization, before persistence.
///
/// Typed (model-specific) monitors run before untyped ones; both may
/// mutate `values` and `policies` in place. A monitor that panics aborts
/// the current projection task; it is retried on the next pass.
pub trait Monitor: Send + Sync {
    /// Observes and optionally mutates a materialized projection.
    fn on_projected(
        &self,
        model: &ModelName,
        reference_id: &ReferenceId,
        values: &mut FlatValues,
        policies: &mut PolicyChoices,
    );
}
