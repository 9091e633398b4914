// crates/canon-core/src/model.rs
// ============================================================================
// Module: Canon Data Model
// Description: Entity shapes stored in named sets by the association and
// projection workers.
// Purpose: Provide the plain, serde-derived record types §3 of the
// specification names, independent of any storage backend.
// Dependencies: serde, serde_json, time
// ============================================================================

//! ## Overview
//! Every type here has a string primary `id` and is stored in a named set
//! via [`crate::storage::Storage`]. None of these types know how they are
//! persisted; storage adapters serialize them to and from
//! [`crate::storage::StoredRecord`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use time::OffsetDateTime;

use crate::id::Adapter;
use crate::id::ReferenceId;
use crate::id::System;

// ============================================================================
// SECTION: Stage Records
// ============================================================================

/// A single inbound payload for a model, awaiting or past association.
///
/// # Invariants
/// - `reference_id` is `None` until the association worker assigns one.
/// - `data` and `source` are flat-or-nested JSON maps; reserved keys under
///   `envelope.*`, `identifier.external.*`, and `reference.*` carry
///   engine-recognized meaning (see `sets::RESERVED_*` constants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Identifier assigned at intake (not the reference id).
    pub id: String,
    /// Original external id or source label.
    pub source_id: String,
    /// Time the record was produced at its source.
    pub occurred_at: OffsetDateTime,
    /// Policy version in effect when the record was ingested, if known.
    pub policy_version: Option<String>,
    /// Correlation id threaded through from ingestion, if any.
    pub correlation_id: Option<String>,
    /// The payload, a nested JSON map.
    pub data: Map<String, Value>,
    /// Flat envelope metadata (source system, adapter, envelope fields).
    pub source: Map<String, Value>,
    /// The reference id assigned by association, once resolved.
    pub reference_id: Option<ReferenceId>,
}

impl StageRecord {
    /// Reads the envelope `System` field, if present.
    #[must_use]
    pub fn envelope_system(&self) -> Option<System> {
        self.source.get("system").and_then(Value::as_str).map(System::new)
    }

    /// Reads the envelope `Adapter` field, if present.
    #[must_use]
    pub fn envelope_adapter(&self) -> Option<Adapter> {
        self.source.get("adapter").and_then(Value::as_str).map(Adapter::new)
    }
}

// ============================================================================
// SECTION: Reference Item
// ============================================================================

/// The canonical entity record for a model.
///
/// # Invariants
/// - `version` never decreases across successive upserts of the same id.
/// - `requires_projection` is cleared only after a projection with
///   `version >= task.version` is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceItem {
    /// The reference id this item describes.
    pub id: ReferenceId,
    /// Monotonic version, incremented on each association touch.
    pub version: u64,
    /// Whether a projection is owed for the current version.
    pub requires_projection: bool,
}

// ============================================================================
// SECTION: Key Index
// ============================================================================

/// An `aggregation key -> reference id` mapping for a model.
///
/// # Invariants
/// - Once set, the mapping is immutable; changing the owner requires
///   reject-with-collision, never an overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyIndex {
    /// The aggregation key value (this *is* the record id in its set).
    pub aggregation_key: String,
    /// The reference id that owns this key.
    pub reference_id: ReferenceId,
}

// ============================================================================
// SECTION: Identity Link
// ============================================================================

/// A `(system, adapter, external id) -> reference id` mapping for a model.
///
/// # Invariants
/// - Once a reference id is assigned to an identity link, it persists.
/// - `provisional = true` means the link was created on first sight of an
///   unknown external id; it becomes non-provisional when confirmed by
///   projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    /// Source system name.
    pub system: String,
    /// Adapter name.
    pub adapter: String,
    /// Source-local external identifier.
    pub external_id: String,
    /// The reference id this identity resolves to.
    pub reference_id: ReferenceId,
    /// Whether this link is still provisional.
    pub provisional: bool,
    /// Expiry for provisional links that are never confirmed.
    pub expires_at: Option<OffsetDateTime>,
}

impl IdentityLink {
    /// Builds the composite identity link id, sanitizing any `|` in the
    /// external id deterministically (percent-escaped) so the composite
    /// id's separator stays unambiguous.
    #[must_use]
    pub fn composite_id(system: &str, adapter: &str, external_id: &str) -> String {
        format!(
            "{}|{}|{}",
            sanitize_identity_component(system),
            sanitize_identity_component(adapter),
            sanitize_identity_component(external_id)
        )
    }
}

/// Percent-escapes `|` so it can never be mistaken for the composite id
/// separator. Applied uniformly to every component, not just ones observed
/// to contain a pipe, so the encoding is deterministic and self-inverse-free
/// (callers never need to decode it back).
#[must_use]
pub fn sanitize_identity_component(value: &str) -> String {
    value.replace('|', "%7C")
}

// ============================================================================
// SECTION: Projection Task
// ============================================================================

/// A unit of work for the projection worker.
///
/// # Invariants
/// - `id` is always `"{reference_id}::{version}::canonical"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionTask {
    /// Task id (`"{reference_id}::{version}::canonical"`).
    pub id: String,
    /// The reference id this task projects.
    pub reference_id: ReferenceId,
    /// The reference item version this task was raised for.
    pub version: u64,
    /// The view name being projected (always `"canonical"` today).
    pub view_name: String,
    /// When the task was created.
    pub created_at: OffsetDateTime,
}

impl ProjectionTask {
    /// Builds the task id for a reference id and version.
    #[must_use]
    pub fn task_id(reference_id: &ReferenceId, version: u64) -> String {
        format!("{reference_id}::{version}::canonical")
    }
}

// ============================================================================
// SECTION: Canonical and Lineage Projections
// ============================================================================

/// Per-entity canonical view document.
///
/// # Invariants
/// - `id` is always `"canonical::{reference_id}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProjection {
    /// Document id (`"canonical::{reference_id}"`).
    pub id: String,
    /// The reference id this document describes.
    pub reference_id: ReferenceId,
    /// The view name (`"canonical"`).
    pub view_name: String,
    /// The nested canonical model, built from dotted-path ranges.
    pub model: Value,
}

impl CanonicalProjection {
    /// Builds the canonical document id for a reference id.
    #[must_use]
    pub fn doc_id(reference_id: &ReferenceId) -> String {
        format!("canonical::{reference_id}")
    }
}

/// Per-entity lineage document: `tag -> value -> set<source id>`.
///
/// # Invariants
/// - `id` is always `"lineage::{reference_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageProjection {
    /// Document id (`"lineage::{reference_id}"`).
    pub id: String,
    /// The reference id this document describes.
    pub reference_id: ReferenceId,
    /// `path -> stringified value -> contributing source ids`.
    pub view: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl LineageProjection {
    /// Builds the lineage document id for a reference id.
    #[must_use]
    pub fn doc_id(reference_id: &ReferenceId) -> String {
        format!("lineage::{reference_id}")
    }
}

// ============================================================================
// SECTION: Root Snapshot and Policy State
// ============================================================================

/// The materialized root entity snapshot for a dynamic model.
///
/// Only the dynamic-model variant is implemented in this workspace; see
/// `DESIGN.md` for the Open Question decision on the strongly-typed variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSnapshot {
    /// The reference id this snapshot describes.
    pub id: ReferenceId,
    /// The nested materialized model.
    pub model: Value,
}

/// A chosen value and the policy that chose it, for one canonical path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// The value the materializer or a monitor selected.
    pub chosen_value: Value,
    /// The policy id or label responsible for the choice.
    pub rationale: String,
}

/// Per-entity map of `policy name -> chosen value/rationale`.
///
/// # Invariants
/// - `id` matches the reference id it describes (no extra document prefix;
///   policy state lives directly under the reference id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyState {
    /// The reference id this policy state describes.
    pub id: ReferenceId,
    /// `path -> (chosen value, rationale)`.
    pub policies: BTreeMap<String, PolicyEntry>,
}

// ============================================================================
// SECTION: Parked Records and Rejection Reports
// ============================================================================

/// The rejection reason codes association can produce.
///
/// # Invariants
/// - Variants are string-exact per the specification's external interface
///   section; `Display` renders exactly those strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    /// No aggregation keys, identity, or parent reference could be extracted.
    NoKeys,
    /// Candidate keys resolved to more than one existing owner.
    MultiOwnerCollision,
    /// A candidate key already belongs to a different reference id.
    KeyOwnerMismatch,
    /// A value-object or entity-parent reference could not be resolved.
    ParentNotFound,
}

impl RejectionReason {
    /// Returns the string-exact wire form of this reason code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NoKeys => "NO_KEYS",
            Self::MultiOwnerCollision => "MULTI_OWNER_COLLISION",
            Self::KeyOwnerMismatch => "KEY_OWNER_MISMATCH",
            Self::ParentNotFound => "PARENT_NOT_FOUND",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A stage record set aside for later retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkedRecord {
    /// The stage record that was parked.
    pub record: StageRecord,
    /// Why it was parked.
    pub reason_code: RejectionReason,
    /// Diagnostic evidence payload.
    pub evidence: Value,
    /// When this record was parked; the purge loop ages `ParkedTtl` from
    /// here rather than from the wrapped record's own `occurred_at`, since a
    /// parked record can wait indefinitely on an upstream parent regardless
    /// of when it was first observed.
    pub parked_at: OffsetDateTime,
}

/// An append-only diagnostic entry for a rejected record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionReport {
    /// Reason code for the rejection.
    pub reason_code: RejectionReason,
    /// Diagnostic evidence payload.
    pub evidence_json: Value,
    /// Policy version in effect, if known.
    pub policy_version: Option<String>,
    /// When the rejection was recorded.
    pub timestamp: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_id_sanitizes_pipes_in_every_component() {
        let id = IdentityLink::composite_id("crm", "sf", "abc|123");
        assert_eq!(id, "crm|sf|abc%7C123");
    }

    #[test]
    fn rejection_reason_codes_are_string_exact() {
        assert_eq!(RejectionReason::NoKeys.code(), "NO_KEYS");
        assert_eq!(RejectionReason::MultiOwnerCollision.code(), "MULTI_OWNER_COLLISION");
        assert_eq!(RejectionReason::KeyOwnerMismatch.code(), "KEY_OWNER_MISMATCH");
        assert_eq!(RejectionReason::ParentNotFound.code(), "PARENT_NOT_FOUND");
    }

    #[test]
    fn task_id_and_doc_ids_match_the_specified_format() {
        let rid = ReferenceId::generate();
        assert_eq!(ProjectionTask::task_id(&rid, 3), format!("{rid}::3::canonical"));
        assert_eq!(CanonicalProjection::doc_id(&rid), format!("canonical::{rid}"));
        assert_eq!(LineageProjection::doc_id(&rid), format!("lineage::{rid}"));
    }
}
