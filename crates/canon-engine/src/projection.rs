// crates/canon-engine/src/projection.rs
// ============================================================================
// Module: Projection Worker
// Description: Reduces contributing stage records into canonical/lineage
// views, runs materialization, and writes the root snapshot + policy state.
// Purpose: Implement the canonicalization half of the pipeline.
// Dependencies: canon-core, canon-config, tokio
// ============================================================================

//! ## Overview
//! [`ProjectionWorker::tick`] drains one model's `#tasks` set; each task is
//! processed by [`ProjectionWorker::project_one`], which never fails the
//! whole tick on a missing materializer — a model with none registered still
//! gets its canonical/lineage views, just no root snapshot.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use canon_core::CanonicalProjection;
use canon_core::IdentityLink;
use canon_core::LineageProjection;
use canon_core::Materializer;
use canon_core::ModelName;
use canon_core::Monitor;
use canon_core::PolicyEntry;
use canon_core::PolicyState;
use canon_core::ProjectionTask;
use canon_core::ReferenceId;
use canon_core::ReferenceItem;
use canon_core::RootSnapshot;
use canon_core::SetKind;
use canon_core::SetName;
use canon_core::StageRecord;
use canon_core::Storage;
use canon_core::StoredRecord;
use canon_core::set_name;
use serde_json::Value;

use crate::cancel::CancelSignal;
use crate::context::PipelineContext;
use crate::error::EngineError;
use crate::json_paths::flatten;
use crate::json_paths::expand_flat;
use crate::json_paths::expand_ranges;
use crate::json_paths::get_path;
use crate::json_paths::scalar_to_string;
use crate::json_paths::set_nested;
use crate::parent_resolution::parent_resolve;
use crate::repo::decode_page;
use crate::repo::get_typed;
use crate::repo::upsert_typed;

/// Sleep between polling passes when a tick finds no tasks left.
const PROJECTION_POLL_INTERVAL: StdDuration = StdDuration::from_secs(5);

/// How many pages of a stage set to scan per task when gathering
/// contributing records; bounds an otherwise unindexed linear scan.
const GATHER_MAX_PAGES: u64 = 20;

/// Aggregate counts for one [`ProjectionWorker::tick`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionTickReport {
    /// Tasks examined this tick.
    pub processed: u64,
}

/// Per-model `Materializer` and typed/untyped `Monitor` bindings.
///
/// Typed monitors are registered per model and run before the untyped
/// monitors, which run for every model regardless of registration.
#[derive(Default)]
pub struct MaterializationRegistry {
    materializers: BTreeMap<ModelName, Arc<dyn Materializer>>,
    typed_monitors: BTreeMap<ModelName, Vec<Arc<dyn Monitor>>>,
    untyped_monitors: Vec<Arc<dyn Monitor>>,
}

impl MaterializationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a materializer for one model.
    pub fn register_materializer(&mut self, model: ModelName, materializer: Arc<dyn Materializer>) {
        self.materializers.insert(model, materializer);
    }

    /// Registers a monitor that runs only when projecting `model`.
    pub fn register_typed_monitor(&mut self, model: ModelName, monitor: Arc<dyn Monitor>) {
        self.typed_monitors.entry(model).or_default().push(monitor);
    }

    /// Registers a monitor that runs for every model, after its typed ones.
    pub fn register_untyped_monitor(&mut self, monitor: Arc<dyn Monitor>) {
        self.untyped_monitors.push(monitor);
    }

    fn materializer_for(&self, model: &ModelName) -> Option<Arc<dyn Materializer>> {
        self.materializers.get(model).cloned()
    }

    fn monitors_for(&self, model: &ModelName) -> Vec<Arc<dyn Monitor>> {
        let mut monitors = self.typed_monitors.get(model).cloned().unwrap_or_default();
        monitors.extend(self.untyped_monitors.iter().cloned());
        monitors
    }
}

/// Drains projection tasks and writes the canonical, lineage, root, and
/// policy views they describe.
pub struct ProjectionWorker {
    context: Arc<PipelineContext>,
    materializers: Arc<MaterializationRegistry>,
}

impl ProjectionWorker {
    /// Builds a worker over a shared pipeline context and materialization
    /// registry.
    #[must_use]
    pub fn new(context: Arc<PipelineContext>, materializers: Arc<MaterializationRegistry>) -> Self {
        Self { context, materializers }
    }

    /// Processes one bounded page of `model`'s task set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on storage or decode failure.
    pub fn tick(&self, model: &ModelName) -> Result<ProjectionTickReport, EngineError> {
        let tasks_set = set_name(model, SetKind::Tasks);
        let batch_size = self.context.options.batch_size();
        let page = self.context.storage.first_page(&tasks_set, batch_size)?;
        let mut report = ProjectionTickReport::default();

        for (_, task) in decode_page::<ProjectionTask>(page) {
            report.processed += 1;
            self.project_one(model, &task)?;
        }
        Ok(report)
    }

    /// Runs `tick` for every model in `models`, repeatedly, until `cancel`
    /// trips. Sleeps between passes only when a full sweep found no work.
    pub async fn run(&self, models: Vec<ModelName>, cancel: CancelSignal) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let mut did_work = false;
            for model in &models {
                if cancel.is_cancelled() {
                    return;
                }
                match self.tick(model) {
                    Ok(report) if report.processed > 0 => did_work = true,
                    Ok(_) => {}
                    Err(err) => tracing::warn!(model = %model, error = %err, "projection tick failed"),
                }
            }
            if !did_work {
                tokio::select! {
                    () = tokio::time::sleep(PROJECTION_POLL_INTERVAL) => {},
                    () = cancel.cancelled() => return,
                }
            }
        }
    }

    fn project_one(&self, model: &ModelName, task: &ProjectionTask) -> Result<(), EngineError> {
        let storage = self.context.storage.as_ref();
        let descriptor = self.context.registry.get(model);
        let target = task.reference_id;

        let keyed_set = set_name(model, SetKind::StageKeyed);
        let mut records = self.gather_contributing(&keyed_set, target)?;
        if records.is_empty() {
            let intake_set = set_name(model, SetKind::StageIntake);
            records = self.gather_contributing(&intake_set, target)?;
        }
        for child in self.context.registry.value_object_children(model) {
            let child_keyed = set_name(&child, SetKind::StageKeyed);
            records.extend(self.gather_contributing(&child_keyed, target)?);
        }

        let exclude_prefixes = self.context.options.canonical_exclude_tag_prefixes();
        let mut ranges: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut seen: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut lineage: BTreeMap<String, BTreeMap<String, BTreeSet<String>>> = BTreeMap::new();

        for record in &records {
            let mut data = record.data.clone();
            if let Some((parent_model, parent_key_path)) =
                descriptor.as_deref().and_then(|d| d.parent.parent_model_and_key())
            {
                if let Some(local_id) = get_path(&data, parent_key_path).and_then(scalar_to_string) {
                    let system = record.envelope_system().map(|s| s.to_string()).unwrap_or_default();
                    if let Some(parent_reference) = parent_resolve(&self.context, parent_model, &system, &local_id)? {
                        set_nested(&mut data, parent_key_path, Value::String(parent_reference.to_string()));
                    }
                }
            }
            if let Some(system) = record.envelope_system() {
                if record.source_id != "unknown" {
                    let axis = format!("identifier.external.{system}");
                    set_nested(&mut data, &axis, Value::String(record.source_id.clone()));
                }
            }

            for (path, value) in flatten(&data, &["id", "Id"], exclude_prefixes) {
                contribute(&mut ranges, &mut seen, &mut lineage, path, value, &record.source_id);
            }
        }

        let canonical_set = set_name(model, SetKind::ViewsCanonical);
        let canonical_id = CanonicalProjection::doc_id(&target);
        upsert_typed(
            storage,
            &canonical_set,
            &canonical_id,
            &CanonicalProjection { id: canonical_id.clone(), reference_id: target, view_name: "canonical".into(), model: expand_ranges(&ranges) },
        )?;

        let lineage_set = set_name(model, SetKind::ViewsLineage);
        let lineage_id = LineageProjection::doc_id(&target);
        upsert_typed(
            storage,
            &lineage_set,
            &lineage_id,
            &LineageProjection { id: lineage_id.clone(), reference_id: target, view: lineage },
        )?;

        self.confirm_identity_links(model, &records)?;

        let is_value_object = descriptor.as_deref().is_some_and(|d| d.parent.is_value_object());
        if !is_value_object {
            self.materialize_and_monitor(model, target, &ranges)?;
        }

        let reference_set = set_name(model, SetKind::Reference);
        if let Some(item) = get_typed::<ReferenceItem>(storage, &reference_set, &target.to_string())? {
            if item.version <= task.version {
                upsert_typed(storage, &reference_set, &target.to_string(), &ReferenceItem { requires_projection: false, ..item })?;
            }
        }

        let tasks_set = set_name(model, SetKind::Tasks);
        storage.delete(&tasks_set, &task.id)?;
        Ok(())
    }

    fn gather_contributing(&self, set: &SetName, target: ReferenceId) -> Result<Vec<StageRecord>, EngineError> {
        let page_size = self.context.options.batch_size();
        let predicate = |record: &StoredRecord| {
            serde_json::from_value::<StageRecord>(record.payload.clone())
                .map(|record| record.reference_id == Some(target))
                .unwrap_or(false)
        };
        let matched = self.context.storage.scan_filtered(set, page_size, GATHER_MAX_PAGES, &predicate)?;
        Ok(decode_page::<StageRecord>(matched).into_iter().map(|(_, record)| record).collect())
    }

    fn confirm_identity_links(&self, model: &ModelName, records: &[StageRecord]) -> Result<(), EngineError> {
        let storage = self.context.storage.as_ref();
        let identity_set = set_name(model, SetKind::IdentityLink);
        for record in records {
            let Some(reference_id) = record.reference_id else {
                continue;
            };
            let Some(system) = record.envelope_system() else {
                continue;
            };
            let composite = IdentityLink::composite_id(system.as_str(), system.as_str(), &record.source_id);
            match get_typed::<IdentityLink>(storage, &identity_set, &composite)? {
                Some(mut link) if link.provisional => {
                    link.provisional = false;
                    link.expires_at = None;
                    upsert_typed(storage, &identity_set, &composite, &link)?;
                }
                Some(_) => {}
                None => {
                    let link = IdentityLink {
                        system: system.to_string(),
                        adapter: system.to_string(),
                        external_id: record.source_id.clone(),
                        reference_id,
                        provisional: false,
                        expires_at: None,
                    };
                    upsert_typed(storage, &identity_set, &composite, &link)?;
                }
            }
        }
        Ok(())
    }

    fn materialize_and_monitor(
        &self,
        model: &ModelName,
        reference_id: ReferenceId,
        ranges: &BTreeMap<String, Vec<Value>>,
    ) -> Result<(), EngineError> {
        let Some(materializer) = self.materializers.materializer_for(model) else {
            return Ok(());
        };
        let (mut values, mut policies) = materializer.materialize(model, ranges);
        for monitor in self.materializers.monitors_for(model) {
            monitor.on_projected(model, &reference_id, &mut values, &mut policies);
        }

        let storage = self.context.storage.as_ref();
        let root_set = set_name(model, SetKind::Root);
        upsert_typed(storage, &root_set, &reference_id.to_string(), &RootSnapshot { id: reference_id, model: expand_flat(&values) })?;

        let policy_entries = policies
            .into_iter()
            .map(|(path, rationale)| {
                let chosen_value = values.get(&path).cloned().unwrap_or(Value::Null);
                (path, PolicyEntry { chosen_value, rationale })
            })
            .collect();
        let policies_set = set_name(model, SetKind::Policies);
        upsert_typed(storage, &policies_set, &reference_id.to_string(), &PolicyState { id: reference_id, policies: policy_entries })?;
        Ok(())
    }
}

/// Folds one flattened `(path, value)` pair into the running canonical range
/// and lineage maps, deduping on the value's lowercased string-coerced form
/// while keeping the first-seen display form and insertion order.
fn contribute(
    ranges: &mut BTreeMap<String, Vec<Value>>,
    seen: &mut BTreeMap<String, BTreeMap<String, String>>,
    lineage: &mut BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
    path: String,
    value: Value,
    source_id: &str,
) {
    let Some(display) = scalar_to_string(&value) else { return };
    let comparison_key = display.to_lowercase();
    let path_seen = seen.entry(path.clone()).or_default();
    let canonical_display = path_seen
        .entry(comparison_key)
        .or_insert_with(|| {
            ranges.entry(path.clone()).or_default().push(value.clone());
            display.clone()
        })
        .clone();
    lineage.entry(path).or_default().entry(canonical_display).or_default().insert(source_id.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_config::PipelineOptions;
    use canon_core::ModelDescriptor;
    use canon_core::ModelRegistry;
    use canon_core::ParentDeclaration;
    use canon_store_memory::InMemoryStorage;
    use serde_json::json;
    use time::OffsetDateTime;

    struct FirstSeen;
    impl Materializer for FirstSeen {
        fn materialize(&self, _model: &ModelName, canonical: &canon_core::CanonicalRanges) -> (canon_core::FlatValues, canon_core::PolicyChoices) {
            let mut values = canon_core::FlatValues::new();
            let mut policies = canon_core::PolicyChoices::new();
            for (path, candidates) in canonical {
                if let Some(first) = candidates.first() {
                    values.insert(path.clone(), first.clone());
                    policies.insert(path.clone(), "first-seen".into());
                }
            }
            (values, policies)
        }
    }

    fn context_with(descriptor: Option<ModelDescriptor>) -> Arc<PipelineContext> {
        let registry = Arc::new(ModelRegistry::new());
        if let Some(descriptor) = descriptor {
            registry.register(descriptor).unwrap();
        }
        Arc::new(PipelineContext::new(Arc::new(InMemoryStorage::new()), registry, PipelineOptions::defaults()))
    }

    fn keyed_record(id: &str, source_id: &str, reference_id: ReferenceId, data: Value, source: Value) -> StageRecord {
        StageRecord {
            id: id.to_string(),
            source_id: source_id.to_string(),
            occurred_at: OffsetDateTime::now_utc(),
            policy_version: None,
            correlation_id: None,
            data: data.as_object().unwrap().clone(),
            source: source.as_object().unwrap().clone(),
            reference_id: Some(reference_id),
        }
    }

    #[test]
    fn canonical_view_dedups_case_insensitively_and_keeps_first_appearance() {
        let model = ModelName::new("Contact");
        let context = context_with(Some(ModelDescriptor::root(model.clone(), vec!["email".into()])));
        let reference_id = ReferenceId::generate();

        let keyed_set = set_name(&model, SetKind::StageKeyed);
        let a = keyed_record("a", "crm-1", reference_id, json!({"name": "Jo"}), json!({}));
        let b = keyed_record("b", "crm-2", reference_id, json!({"name": "JO"}), json!({}));
        upsert_typed(context.storage.as_ref(), &keyed_set, "a", &a).unwrap();
        upsert_typed(context.storage.as_ref(), &keyed_set, "b", &b).unwrap();

        let registry = Arc::new(MaterializationRegistry::new());
        let worker = ProjectionWorker::new(context.clone(), registry);
        let task = ProjectionTask { id: ProjectionTask::task_id(&reference_id, 1), reference_id, version: 1, view_name: "canonical".into(), created_at: OffsetDateTime::now_utc() };
        let tasks_set = set_name(&model, SetKind::Tasks);
        upsert_typed(context.storage.as_ref(), &tasks_set, &task.id, &task).unwrap();

        let report = worker.tick(&model).unwrap();
        assert_eq!(report.processed, 1);

        let canonical_set = set_name(&model, SetKind::ViewsCanonical);
        let doc: CanonicalProjection = get_typed(context.storage.as_ref(), &canonical_set, &CanonicalProjection::doc_id(&reference_id)).unwrap().unwrap();
        assert_eq!(doc.model["name"], json!(["Jo"]));

        let lineage_set = set_name(&model, SetKind::ViewsLineage);
        let lineage: LineageProjection = get_typed(context.storage.as_ref(), &lineage_set, &LineageProjection::doc_id(&reference_id)).unwrap().unwrap();
        let sources = &lineage.view["name"]["Jo"];
        assert_eq!(sources.len(), 2);
    }

    #[test]
    fn materializer_and_monitor_produce_a_root_snapshot() {
        let model = ModelName::new("Contact");
        let context = context_with(Some(ModelDescriptor::root(model.clone(), vec!["email".into()])));
        let reference_id = ReferenceId::generate();

        let keyed_set = set_name(&model, SetKind::StageKeyed);
        let record = keyed_record("a", "crm-1", reference_id, json!({"email": "a@x.com"}), json!({}));
        upsert_typed(context.storage.as_ref(), &keyed_set, "a", &record).unwrap();

        let mut registry = MaterializationRegistry::new();
        registry.register_materializer(model.clone(), Arc::new(FirstSeen));
        let worker = ProjectionWorker::new(context.clone(), Arc::new(registry));

        let task = ProjectionTask { id: ProjectionTask::task_id(&reference_id, 1), reference_id, version: 1, view_name: "canonical".into(), created_at: OffsetDateTime::now_utc() };
        let tasks_set = set_name(&model, SetKind::Tasks);
        upsert_typed(context.storage.as_ref(), &tasks_set, &task.id, &task).unwrap();
        worker.tick(&model).unwrap();

        let root_set = set_name(&model, SetKind::Root);
        let snapshot: RootSnapshot = get_typed(context.storage.as_ref(), &root_set, &reference_id.to_string()).unwrap().unwrap();
        assert_eq!(snapshot.model["email"], json!("a@x.com"));

        let policies_set = set_name(&model, SetKind::Policies);
        let policy_state: PolicyState = get_typed(context.storage.as_ref(), &policies_set, &reference_id.to_string()).unwrap().unwrap();
        assert_eq!(policy_state.policies["email"].rationale, "first-seen");
    }

    #[test]
    fn value_object_task_skips_root_snapshot_but_still_projects_views() {
        let model = ModelName::new("Reading");
        let descriptor = ModelDescriptor::root(model.clone(), vec![]).with_parent(ParentDeclaration::ValueObjectParent {
            parent_model: ModelName::new("Device"),
            parent_key_path: "deviceCode".into(),
        });
        let context = context_with(Some(descriptor));
        let reference_id = ReferenceId::generate();

        let keyed_set = set_name(&model, SetKind::StageKeyed);
        let record = keyed_record("a", "sensor-1", reference_id, json!({"deviceCode": "D2", "temp": 21.4}), json!({}));
        upsert_typed(context.storage.as_ref(), &keyed_set, "a", &record).unwrap();

        let mut registry = MaterializationRegistry::new();
        registry.register_materializer(model.clone(), Arc::new(FirstSeen));
        let worker = ProjectionWorker::new(context.clone(), Arc::new(registry));

        let task = ProjectionTask { id: ProjectionTask::task_id(&reference_id, 1), reference_id, version: 1, view_name: "canonical".into(), created_at: OffsetDateTime::now_utc() };
        let tasks_set = set_name(&model, SetKind::Tasks);
        upsert_typed(context.storage.as_ref(), &tasks_set, &task.id, &task).unwrap();
        worker.tick(&model).unwrap();

        let root_set = set_name(&model, SetKind::Root);
        assert_eq!(context.storage.count(&root_set).unwrap(), 0);

        let canonical_set = set_name(&model, SetKind::ViewsCanonical);
        assert_eq!(context.storage.count(&canonical_set).unwrap(), 1);
    }

    #[test]
    fn clearing_requires_projection_is_guarded_by_version() {
        let model = ModelName::new("Contact");
        let context = context_with(Some(ModelDescriptor::root(model.clone(), vec!["email".into()])));
        let reference_id = ReferenceId::generate();

        let reference_set = set_name(&model, SetKind::Reference);
        upsert_typed(context.storage.as_ref(), &reference_set, &reference_id.to_string(), &ReferenceItem { id: reference_id, version: 2, requires_projection: true }).unwrap();

        let keyed_set = set_name(&model, SetKind::StageKeyed);
        let record = keyed_record("a", "crm-1", reference_id, json!({"email": "a@x.com"}), json!({}));
        upsert_typed(context.storage.as_ref(), &keyed_set, "a", &record).unwrap();

        let worker = ProjectionWorker::new(context.clone(), Arc::new(MaterializationRegistry::new()));
        let stale_task = ProjectionTask { id: ProjectionTask::task_id(&reference_id, 1), reference_id, version: 1, view_name: "canonical".into(), created_at: OffsetDateTime::now_utc() };
        let tasks_set = set_name(&model, SetKind::Tasks);
        upsert_typed(context.storage.as_ref(), &tasks_set, &stale_task.id, &stale_task).unwrap();
        worker.tick(&model).unwrap();

        let item: ReferenceItem = get_typed(context.storage.as_ref(), &reference_set, &reference_id.to_string()).unwrap().unwrap();
        assert!(item.requires_projection, "a stale task must not clear a newer version's flag");
    }

    #[test]
    fn a_placeholder_unknown_source_id_is_not_folded_into_canonical() {
        let model = ModelName::new("Contact");
        let context = context_with(Some(ModelDescriptor::root(model.clone(), vec!["email".into()])));
        let reference_id = ReferenceId::generate();

        let keyed_set = set_name(&model, SetKind::StageKeyed);
        let record = keyed_record("a", "unknown", reference_id, json!({"email": "a@x.com"}), json!({"system": "crm"}));
        upsert_typed(context.storage.as_ref(), &keyed_set, "a", &record).unwrap();

        let worker = ProjectionWorker::new(context.clone(), Arc::new(MaterializationRegistry::new()));
        let task = ProjectionTask { id: ProjectionTask::task_id(&reference_id, 1), reference_id, version: 1, view_name: "canonical".into(), created_at: OffsetDateTime::now_utc() };
        let tasks_set = set_name(&model, SetKind::Tasks);
        upsert_typed(context.storage.as_ref(), &tasks_set, &task.id, &task).unwrap();
        worker.tick(&model).unwrap();

        let canonical_set = set_name(&model, SetKind::ViewsCanonical);
        let doc: CanonicalProjection = get_typed(context.storage.as_ref(), &canonical_set, &CanonicalProjection::doc_id(&reference_id)).unwrap().unwrap();
        assert!(doc.model.get("identifier").is_none(), "an 'unknown' source id is not a real external id");
    }

    #[test]
    fn raw_id_fields_never_contribute_to_canonical_or_lineage() {
        let model = ModelName::new("Contact");
        let context = context_with(Some(ModelDescriptor::root(model.clone(), vec!["email".into()])));
        let reference_id = ReferenceId::generate();

        let keyed_set = set_name(&model, SetKind::StageKeyed);
        let record = keyed_record("a", "crm-1", reference_id, json!({"id": "row-1", "Id": "row-1", "email": "a@x.com"}), json!({}));
        upsert_typed(context.storage.as_ref(), &keyed_set, "a", &record).unwrap();

        let worker = ProjectionWorker::new(context.clone(), Arc::new(MaterializationRegistry::new()));
        let task = ProjectionTask { id: ProjectionTask::task_id(&reference_id, 1), reference_id, version: 1, view_name: "canonical".into(), created_at: OffsetDateTime::now_utc() };
        let tasks_set = set_name(&model, SetKind::Tasks);
        upsert_typed(context.storage.as_ref(), &tasks_set, &task.id, &task).unwrap();
        worker.tick(&model).unwrap();

        let canonical_set = set_name(&model, SetKind::ViewsCanonical);
        let doc: CanonicalProjection = get_typed(context.storage.as_ref(), &canonical_set, &CanonicalProjection::doc_id(&reference_id)).unwrap().unwrap();
        assert!(doc.model.get("id").is_none());
        assert!(doc.model.get("Id").is_none());
        assert_eq!(doc.model["email"], json!(["a@x.com"]));
    }

    #[test]
    fn confirm_identity_links_creates_a_link_findable_by_parent_resolve_across_systems() {
        let model = ModelName::new("Device");
        let context = context_with(Some(ModelDescriptor::root(model.clone(), vec!["deviceCode".into()])));
        let reference_id = ReferenceId::generate();

        let keyed_set = set_name(&model, SetKind::StageKeyed);
        let record = keyed_record("a", "D2", reference_id, json!({"deviceCode": "D2"}), json!({"system": "sensors", "adapter": "mqtt-bridge"}));
        upsert_typed(context.storage.as_ref(), &keyed_set, "a", &record).unwrap();

        let worker = ProjectionWorker::new(context.clone(), Arc::new(MaterializationRegistry::new()));
        let task = ProjectionTask { id: ProjectionTask::task_id(&reference_id, 1), reference_id, version: 1, view_name: "canonical".into(), created_at: OffsetDateTime::now_utc() };
        let tasks_set = set_name(&model, SetKind::Tasks);
        upsert_typed(context.storage.as_ref(), &tasks_set, &task.id, &task).unwrap();
        worker.tick(&model).unwrap();

        let resolved = crate::parent_resolution::parent_resolve(&context, &model, "sensors", "D2").unwrap();
        assert_eq!(resolved, Some(reference_id), "adapter differing from system must not break parent_resolve's lookup");
    }
}
