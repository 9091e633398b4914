// crates/canon-materializer-demo/src/lib.rs
// ============================================================================
// Module: Reference Materializer and Monitor Implementations
// Description: Pure, deterministic implementations of canon-core's
// Materializer and Monitor contracts, suitable as defaults or examples.
// Purpose: Give callers a working (modelName, canonical) -> (values, policies)
// reducer and a derived-field hook without writing their own on day one.
// Dependencies: canon-core, serde_json
// ============================================================================

//! ## Overview
//! [`FirstSeenMaterializer`] picks, for every path, the first value that was
//! ever contributed to the canonical range — the same order projection built
//! it in, which is itself source-arrival order. [`DerivedFieldMonitor`] reads
//! an ordered list of candidate paths and copies the first one present into
//! a new field, recording which path won. Both are pure functions over
//! `serde_json::Value`; neither holds state across calls.

use canon_core::CanonicalRanges;
use canon_core::FlatValues;
use canon_core::Materializer;
use canon_core::ModelName;
use canon_core::Monitor;
use canon_core::PolicyChoices;
use canon_core::ReferenceId;

/// Policy label recorded by [`FirstSeenMaterializer`].
const FIRST_SEEN_POLICY: &str = "first-seen";

/// Picks the first-contributed value per path as the canonical snapshot
/// value, with no regard for source identity or recency.
///
/// # Invariants
/// - Never invents a path absent from `canonical`.
/// - Deterministic: the same canonical map always yields the same output.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstSeenMaterializer;

impl Materializer for FirstSeenMaterializer {
    fn materialize(&self, _model: &ModelName, canonical: &CanonicalRanges) -> (FlatValues, PolicyChoices) {
        let mut values = FlatValues::new();
        let mut policies = PolicyChoices::new();
        for (path, candidates) in canonical {
            if let Some(first) = candidates.first() {
                values.insert(path.clone(), first.clone());
                policies.insert(path.clone(), FIRST_SEEN_POLICY.into());
            }
        }
        (values, policies)
    }
}

/// Derives one field from the first of an ordered list of candidate paths
/// that is present in the materialized snapshot, after materialization.
///
/// Does nothing if the derived field is already present — a monitor earlier
/// in the chain, or the materializer itself, takes priority.
///
/// # Invariants
/// - Leaves `values`/`policies` untouched when no candidate path is present.
#[derive(Debug, Clone)]
pub struct DerivedFieldMonitor {
    derived_field: String,
    source_paths: Vec<String>,
    policy_label: String,
}

impl DerivedFieldMonitor {
    /// Builds a monitor that derives `derived_field` from the first present
    /// path in `source_paths`, in order, recording `"derived-first-present"`
    /// as the policy label.
    #[must_use]
    pub fn new(derived_field: impl Into<String>, source_paths: Vec<String>) -> Self {
        Self { derived_field: derived_field.into(), source_paths, policy_label: "derived-first-present".into() }
    }

    /// Overrides the default policy label recorded for the derived field.
    #[must_use]
    pub fn with_policy_label(mut self, label: impl Into<String>) -> Self {
        self.policy_label = label.into();
        self
    }
}

impl Monitor for DerivedFieldMonitor {
    fn on_projected(
        &self,
        _model: &ModelName,
        _reference_id: &ReferenceId,
        values: &mut FlatValues,
        policies: &mut PolicyChoices,
    ) {
        if values.contains_key(&self.derived_field) {
            return;
        }
        for path in &self.source_paths {
            if let Some(value) = values.get(path).cloned() {
                values.insert(self.derived_field.clone(), value);
                policies.insert(self.derived_field.clone(), self.policy_label.clone());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_seen_materializer_picks_the_first_candidate_per_path() {
        let model = ModelName::new("Contact");
        let mut canonical = CanonicalRanges::new();
        canonical.insert("firstName".into(), vec![json!("Jo"), json!("Johnny")]);
        canonical.insert("email".into(), vec![json!("a@x.com")]);

        let (values, policies) = FirstSeenMaterializer.materialize(&model, &canonical);
        assert_eq!(values["firstName"], json!("Jo"));
        assert_eq!(values["email"], json!("a@x.com"));
        assert_eq!(policies["firstName"], FIRST_SEEN_POLICY);
    }

    #[test]
    fn first_seen_materializer_skips_paths_with_no_candidates() {
        let model = ModelName::new("Contact");
        let mut canonical = CanonicalRanges::new();
        canonical.insert("empty".into(), vec![]);

        let (values, _) = FirstSeenMaterializer.materialize(&model, &canonical);
        assert!(!values.contains_key("empty"));
    }

    #[test]
    fn derived_field_monitor_copies_the_first_present_source_path() {
        let model = ModelName::new("Contact");
        let reference_id = ReferenceId::generate();
        let mut values = FlatValues::new();
        values.insert("nickname".into(), json!("Johnny"));
        values.insert("firstName".into(), json!("Jo"));
        let mut policies = PolicyChoices::new();

        let monitor = DerivedFieldMonitor::new("displayName", vec!["nickname".into(), "firstName".into()]);
        monitor.on_projected(&model, &reference_id, &mut values, &mut policies);

        assert_eq!(values["displayName"], json!("Johnny"));
        assert_eq!(policies["displayName"], "derived-first-present");
    }

    #[test]
    fn derived_field_monitor_falls_through_to_a_later_path() {
        let model = ModelName::new("Contact");
        let reference_id = ReferenceId::generate();
        let mut values = FlatValues::new();
        values.insert("firstName".into(), json!("Jo"));
        let mut policies = PolicyChoices::new();

        let monitor = DerivedFieldMonitor::new("displayName", vec!["nickname".into(), "firstName".into()]);
        monitor.on_projected(&model, &reference_id, &mut values, &mut policies);

        assert_eq!(values["displayName"], json!("Jo"));
    }

    #[test]
    fn derived_field_monitor_never_overwrites_an_explicit_value() {
        let model = ModelName::new("Contact");
        let reference_id = ReferenceId::generate();
        let mut values = FlatValues::new();
        values.insert("displayName".into(), json!("Explicit"));
        values.insert("firstName".into(), json!("Jo"));
        let mut policies = PolicyChoices::new();

        let monitor = DerivedFieldMonitor::new("displayName", vec!["firstName".into()]);
        monitor.on_projected(&model, &reference_id, &mut values, &mut policies);

        assert_eq!(values["displayName"], json!("Explicit"));
        assert!(!policies.contains_key("displayName"));
    }
}
