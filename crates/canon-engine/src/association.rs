// crates/canon-engine/src/association.rs
// ============================================================================
// Module: Association Worker
// Description: Decides a reference id for each intake record, writes key
// and identity indexes, enqueues projection work, and routes failures.
// Purpose: Implement the entity-resolution half of the pipeline.
// Dependencies: canon-core, canon-config, tokio
// ============================================================================

//! ## Overview
//! [`AssociationWorker::tick`] processes one bounded page of `#stage.intake`
//! for a single model; [`AssociationWorker::run`] wraps it in a polling loop
//! across every model the caller names. Policy rejections are represented as
//! plain data, never as `Result::Err`; only storage and decode failures are
//! errors here.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use canon_core::IdentityLink;
use canon_core::KeyIndex;
use canon_core::ModelDescriptor;
use canon_core::ModelName;
use canon_core::ParentDeclaration;
use canon_core::ProjectionTask;
use canon_core::ReferenceId;
use canon_core::ReferenceItem;
use canon_core::RejectionReason;
use canon_core::RejectionReport;
use canon_core::SetKind;
use canon_core::SetName;
use canon_core::StageRecord;
use canon_core::Storage;
use canon_core::set_name;
use serde_json::Value;
use serde_json::json;
use time::Duration as TimeDuration;
use time::OffsetDateTime;

use crate::cancel::CancelSignal;
use crate::context::PipelineContext;
use crate::error::EngineError;
use crate::json_paths::get_path;
use crate::json_paths::scalar_to_string;
use crate::json_paths::split_values;
use crate::parent_resolution::park_evidence;
use crate::parent_resolution::parent_resolve;
use crate::repo::get_typed;
use crate::repo::upsert_typed;

/// How long a freshly-minted provisional identity link lives before it
/// expires unconfirmed.
const PROVISIONAL_LINK_LIFETIME: TimeDuration = TimeDuration::days(2);

/// Sleep between polling passes when a tick finds no work left to do.
const ASSOCIATION_POLL_INTERVAL: StdDuration = StdDuration::from_millis(500);

/// The outcome of associating one record, for callers that want to observe
/// the result (tests, metrics) rather than only a tick-level count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationOutcome {
    /// The record was assigned this reference id and moved to keyed.
    Associated(ReferenceId),
    /// The record was rejected and, if parking is enabled, parked.
    Blocked(RejectionReason),
}

/// Aggregate counts for one [`AssociationWorker::tick`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AssociationTickReport {
    /// Intake records examined this tick.
    pub processed: u64,
    /// Records successfully associated and moved to keyed.
    pub associated: u64,
    /// Records rejected (and possibly parked).
    pub blocked: u64,
}

/// Either a resolved value or a policy rejection with its evidence.
enum Resolution<T> {
    Ok(T),
    Blocked { reason: RejectionReason, evidence: Value },
}

/// Consumes intake stage records and decides their reference id.
pub struct AssociationWorker {
    context: Arc<PipelineContext>,
}

impl AssociationWorker {
    /// Builds a worker over a shared pipeline context.
    #[must_use]
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }

    /// Processes one bounded page of `model`'s intake set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on storage or decode failure; individual
    /// policy rejections are not errors and are reflected in the report.
    pub fn tick(&self, model: &ModelName) -> Result<AssociationTickReport, EngineError> {
        let intake_set = set_name(model, SetKind::StageIntake);
        let batch_size = self.context.options.batch_size();
        let page = self.context.storage.first_page(&intake_set, batch_size)?;
        let mut report = AssociationTickReport::default();

        for stored in page {
            report.processed += 1;
            let record: StageRecord = serde_json::from_value(stored.payload)?;
            match self.associate_one(model, record)? {
                AssociationOutcome::Associated(_) => report.associated += 1,
                AssociationOutcome::Blocked(_) => report.blocked += 1,
            }
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
                    Err(err) => tracing::warn!(model = %model, error = %err, "association tick failed"),
                }
            }
            if !did_work {
                tokio::select! {
                    () = tokio::time::sleep(ASSOCIATION_POLL_INTERVAL) => {},
                    () = cancel.cancelled() => return,
                }
            }
        }
    }

    fn associate_one(&self, model: &ModelName, mut record: StageRecord) -> Result<AssociationOutcome, EngineError> {
        let descriptor = self.context.registry.get(model);
        let intake_set = set_name(model, SetKind::StageIntake);

        if let Some((parent_model, parent_key_path)) = descriptor
            .as_deref()
            .filter(|d| d.parent.is_value_object())
            .and_then(|d| d.parent.parent_model_and_key())
        {
            return self.associate_value_object(model, &intake_set, record, parent_model, parent_key_path);
        }

        let candidates = match self.extract_candidates(model, descriptor.as_deref(), &record)? {
            Resolution::Ok(candidates) => candidates,
            Resolution::Blocked { reason, evidence } => {
                return self.block(model, &intake_set, record, reason, evidence);
            }
        };

        let key_set = set_name(model, SetKind::KeyIndex);
        let chosen = match self.resolve_owner(model, &key_set, &record, &candidates)? {
            Resolution::Ok(chosen) => chosen,
            Resolution::Blocked { reason, evidence } => {
                return self.block(model, &intake_set, record, reason, evidence);
            }
        };

        self.bump_reference_item(model, chosen)?;
        self.enqueue_projection_task(model, chosen)?;

        record.reference_id = Some(chosen);
        let keyed_set = set_name(model, SetKind::StageKeyed);
        upsert_typed(self.context.storage.as_ref(), &keyed_set, &record.id, &record)?;
        self.context.storage.delete(&intake_set, &record.id)?;

        Ok(AssociationOutcome::Associated(chosen))
    }

    /// A value object never mints its own identity: it is keyed directly to
    /// its resolved parent's reference id, and its arrival re-triggers the
    /// parent's own projection so the value folds into the parent's
    /// canonical view.
    fn associate_value_object(
        &self,
        model: &ModelName,
        intake_set: &SetName,
        mut record: StageRecord,
        parent_model: &ModelName,
        parent_key_path: &str,
    ) -> Result<AssociationOutcome, EngineError> {
        let Some(local_id) = get_path(&record.data, parent_key_path).and_then(scalar_to_string) else {
            return self.block(
                model,
                intake_set,
                record,
                RejectionReason::NoKeys,
                json!({"reason": "vo-parent-key-missing", "parent_key_path": parent_key_path}),
            );
        };
        let system = record.envelope_system().map(|s| s.to_string()).unwrap_or_default();
        let pre_resolved = get_path(&record.data, &format!("reference.{parent_key_path}"))
            .and_then(scalar_to_string)
            .and_then(|text| text.parse::<ReferenceId>().ok());
        let resolved = match pre_resolved {
            Some(reference_id) => Some(reference_id),
            None => parent_resolve(&self.context, parent_model, &system, &local_id)?,
        };
        let Some(parent_reference) = resolved else {
            return self.block(
                model,
                intake_set,
                record,
                RejectionReason::ParentNotFound,
                park_evidence(parent_model, &system, &local_id),
            );
        };

        self.bump_reference_item(parent_model, parent_reference)?;
        self.enqueue_projection_task(parent_model, parent_reference)?;

        record.reference_id = Some(parent_reference);
        let keyed_set = set_name(model, SetKind::StageKeyed);
        upsert_typed(self.context.storage.as_ref(), &keyed_set, &record.id, &record)?;
        self.context.storage.delete(intake_set, &record.id)?;

        Ok(AssociationOutcome::Associated(parent_reference))
    }

    /// Builds candidate `(tag, value)` pairs per spec.md §4.3's extraction
    /// rules: root models key off their aggregation tags; entity-parented
    /// models additionally key off the resolved parent reference; every
    /// model also contributes composite external-id candidates when an
    /// envelope is present. Value objects never reach this path; see
    /// [`Self::associate_value_object`].
    fn extract_candidates(
        &self,
        model: &ModelName,
        descriptor: Option<&ModelDescriptor>,
        record: &StageRecord,
    ) -> Result<Resolution<Vec<(String, String)>>, EngineError> {
        let mut candidates = Vec::new();
        let parent = descriptor.map_or(ParentDeclaration::None, |d| d.parent.clone());

        match &parent {
            ParentDeclaration::None => {
                for tag in aggregation_tags(descriptor, &self.context.options) {
                    if let Some(value) = get_path(&record.data, &tag) {
                        for v in split_values(value) {
                            candidates.push((tag.clone(), v));
                        }
                    }
                }
            }
            ParentDeclaration::ValueObjectParent { .. } => {
                unreachable!("value objects are routed through associate_value_object before this point")
            }
            ParentDeclaration::EntityParent { parent_model, parent_key_path } => {
                let Some(local_id) = get_path(&record.data, parent_key_path).and_then(scalar_to_string) else {
                    return Ok(Resolution::Blocked {
                        reason: RejectionReason::NoKeys,
                        evidence: json!({"reason": "parent-key-missing", "parent_key_path": parent_key_path}),
                    });
                };
                let system = record.envelope_system().map(|s| s.to_string()).unwrap_or_default();
                let pre_resolved = get_path(&record.data, &format!("reference.{parent_key_path}"))
                    .and_then(scalar_to_string)
                    .and_then(|text| text.parse::<ReferenceId>().ok());
                let resolved = match pre_resolved {
                    Some(reference_id) => Some(reference_id),
                    None => parent_resolve(&self.context, parent_model, &system, &local_id)?,
                };
                match resolved {
                    Some(parent_reference) => candidates.push((parent_key_path.clone(), parent_reference.to_string())),
                    None => {
                        return Ok(Resolution::Blocked {
                            reason: RejectionReason::ParentNotFound,
                            evidence: park_evidence(parent_model, &system, &local_id),
                        });
                    }
                }
            }
        }

        if let (Some(system), Some(adapter)) = (record.envelope_system(), record.envelope_adapter()) {
            let declared = descriptor.map(|d| d.external_id_keys.clone()).unwrap_or_default();
            for ext_key in discover_external_id_paths(&record.data, &declared) {
                if let Some(external) = get_path(&record.data, &ext_key).and_then(scalar_to_string) {
                    let tag = format!("env.{system}|{adapter}|{ext_key}");
                    let value = format!("{system}|{adapter}|{external}");
                    candidates.push((tag, value));
                }
            }
        }

        if candidates.is_empty() {
            return Ok(Resolution::Blocked {
                reason: RejectionReason::NoKeys,
                evidence: json!({"reason": "no-values", "tags": aggregation_tags(descriptor, &self.context.options)}),
            });
        }
        Ok(Resolution::Ok(candidates))
    }

    /// Resolves candidates to one reference id per spec.md §4.3's ownership
    /// rules, then commits key index entries via two-pass check-then-write.
    fn resolve_owner(
        &self,
        model: &ModelName,
        key_set: &SetName,
        record: &StageRecord,
        candidates: &[(String, String)],
    ) -> Result<Resolution<ReferenceId>, EngineError> {
        let storage = self.context.storage.as_ref();

        let mut existing = Vec::with_capacity(candidates.len());
        for (tag, value) in candidates {
            let found: Option<KeyIndex> = get_typed(storage, key_set, value)?;
            existing.push((tag.clone(), value.clone(), found.map(|entry| entry.reference_id)));
        }

        let owners: BTreeSet<ReferenceId> = existing.iter().filter_map(|(_, _, owner)| *owner).collect();
        if owners.len() > 1 {
            return Ok(Resolution::Blocked {
                reason: RejectionReason::MultiOwnerCollision,
                evidence: json!({
                    "owners": owners.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "candidates": candidates,
                }),
            });
        }

        let chosen = if let Some(owner) = owners.into_iter().next() {
            owner
        } else {
            self.resolve_identity(model, record)?
        };

        for (tag, value, owner) in &existing {
            if let Some(owner) = owner {
                if *owner != chosen {
                    return Ok(Resolution::Blocked {
                        reason: RejectionReason::KeyOwnerMismatch,
                        evidence: json!({"key": value, "tag": tag, "existing": owner.to_string(), "incoming": chosen.to_string()}),
                    });
                }
            }
        }
        for (_, value, owner) in &existing {
            if owner.is_none() {
                upsert_typed(storage, key_set, value, &KeyIndex { aggregation_key: value.clone(), reference_id: chosen })?;
            }
        }

        Ok(Resolution::Ok(chosen))
    }

    /// When no key index owner exists, falls back to identity-link lookup
    /// (minting a provisional link on first sight), or mints unconditionally
    /// when no envelope is present.
    fn resolve_identity(&self, model: &ModelName, record: &StageRecord) -> Result<ReferenceId, EngineError> {
        let storage = self.context.storage.as_ref();
        let Some(system) = record.envelope_system() else {
            return Ok(ReferenceId::generate());
        };
        let Some(adapter) = record.envelope_adapter() else {
            return Ok(ReferenceId::generate());
        };

        let identity_set = set_name(model, SetKind::IdentityLink);
        let composite = IdentityLink::composite_id(system.as_str(), adapter.as_str(), &record.source_id);
        if let Some(link) = get_typed::<IdentityLink>(storage, &identity_set, &composite)? {
            return Ok(link.reference_id);
        }

        let minted = ReferenceId::generate();
        let provisional = IdentityLink {
            system: system.to_string(),
            adapter: adapter.to_string(),
            external_id: record.source_id.clone(),
            reference_id: minted,
            provisional: true,
            expires_at: Some(OffsetDateTime::now_utc() + PROVISIONAL_LINK_LIFETIME),
        };
        upsert_typed(storage, &identity_set, &composite, &provisional)?;
        Ok(minted)
    }

    fn bump_reference_item(&self, model: &ModelName, reference_id: ReferenceId) -> Result<(), EngineError> {
        let storage = self.context.storage.as_ref();
        let reference_set = set_name(model, SetKind::Reference);
        let id_text = reference_id.to_string();
        let prior: Option<ReferenceItem> = get_typed(storage, &reference_set, &id_text)?;
        let version = prior.map_or(0, |item| item.version) + 1;
        upsert_typed(
            storage,
            &reference_set,
            &id_text,
            &ReferenceItem { id: reference_id, version, requires_projection: true },
        )
    }

    fn enqueue_projection_task(&self, model: &ModelName, reference_id: ReferenceId) -> Result<(), EngineError> {
        let storage = self.context.storage.as_ref();
        let reference_set = set_name(model, SetKind::Reference);
        let item: ReferenceItem = get_typed(storage, &reference_set, &reference_id.to_string())?
            .ok_or_else(|| EngineError::Fatal("reference item missing immediately after bump".into()))?;
        let tasks_set = set_name(model, SetKind::Tasks);
        let task_id = ProjectionTask::task_id(&reference_id, item.version);
        upsert_typed(
            storage,
            &tasks_set,
            &task_id,
            &ProjectionTask {
                id: task_id.clone(),
                reference_id,
                version: item.version,
                view_name: "canonical".into(),
                created_at: OffsetDateTime::now_utc(),
            },
        )
    }

    /// Records a rejection report and, if enabled, a parked copy; removes
    /// the intake record either way.
    fn block(
        &self,
        model: &ModelName,
        intake_set: &SetName,
        record: StageRecord,
        reason: RejectionReason,
        evidence: Value,
    ) -> Result<AssociationOutcome, EngineError> {
        let storage = self.context.storage.as_ref();
        let rejections_set = set_name(model, SetKind::Rejections);
        let report = RejectionReport {
            reason_code: reason,
            evidence_json: evidence.clone(),
            policy_version: record.policy_version.clone(),
            timestamp: OffsetDateTime::now_utc(),
        };
        upsert_typed(storage, &rejections_set, &record.id, &report)?;

        if self.context.options.park_and_sweep_enabled() {
            let parked_set = set_name(model, SetKind::StageParked);
            let parked = canon_core::ParkedRecord {
                record: record.clone(),
                reason_code: reason,
                evidence,
                parked_at: OffsetDateTime::now_utc(),
            };
            upsert_typed(storage, &parked_set, &record.id, &parked)?;
            if reason == RejectionReason::ParentNotFound {
                self.context.poke_handle().poke();
            }
        }

        storage.delete(intake_set, &record.id)?;
        Ok(AssociationOutcome::Blocked(reason))
    }
}

/// Declared aggregation tags, falling back to the configured default list
/// when the model declares none.
fn aggregation_tags(descriptor: Option<&ModelDescriptor>, options: &canon_config::PipelineOptions) -> Vec<String> {
    match descriptor {
        Some(descriptor) if !descriptor.aggregation_tags.is_empty() => descriptor.aggregation_tags.clone(),
        _ => options.aggregation_tags_fallback().to_vec(),
    }
}

/// Declared external-id paths plus any auto-discovered under the reserved
/// `identifier.external.*` bag.
fn discover_external_id_paths(data: &serde_json::Map<String, Value>, declared: &[String]) -> Vec<String> {
    let mut paths: Vec<String> = declared.to_vec();
    if let Some(bag) = get_path(data, "identifier.external").and_then(Value::as_object) {
        for key in bag.keys() {
            let path = format!("identifier.external.{key}");
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_config::PipelineOptions;
    use canon_core::ModelRegistry;
    use canon_core::SetKind;
    use canon_store_memory::InMemoryStorage;
    use serde_json::json;

    fn stage_record(id: &str, source_id: &str, data: Value, source: Value) -> StageRecord {
        StageRecord {
            id: id.to_string(),
            source_id: source_id.to_string(),
            occurred_at: OffsetDateTime::now_utc(),
            policy_version: None,
            correlation_id: None,
            data: data.as_object().unwrap().clone(),
            source: source.as_object().unwrap().clone(),
            reference_id: None,
        }
    }

    fn worker_with(descriptor: Option<ModelDescriptor>) -> (AssociationWorker, Arc<PipelineContext>) {
        let registry = Arc::new(ModelRegistry::new());
        if let Some(descriptor) = descriptor {
            registry.register(descriptor).unwrap();
        }
        let context = Arc::new(PipelineContext::new(Arc::new(InMemoryStorage::new()), registry, PipelineOptions::defaults()));
        (AssociationWorker::new(context.clone()), context)
    }

    fn intake(context: &PipelineContext, model: &ModelName, record: &StageRecord) {
        let set = set_name(model, SetKind::StageIntake);
        upsert_typed(context.storage.as_ref(), &set, &record.id, record).unwrap();
    }

    #[test]
    fn two_source_merge_produces_one_reference_with_version_two() {
        let model = ModelName::new("Contact");
        let descriptor = ModelDescriptor::root(model.clone(), vec!["email".into(), "phone".into()]);
        let (worker, context) = worker_with(Some(descriptor));

        let first = stage_record("s1", "crm-1", json!({"email": "a@x.com", "firstName": "Jo"}), json!({}));
        intake(&context, &model, &first);
        let report = worker.tick(&model).unwrap();
        assert_eq!(report.associated, 1);

        let second = stage_record(
            "s2",
            "sup-9",
            json!({"email": "a@x.com", "phone": "+1-555", "firstName": "Johnny"}),
            json!({}),
        );
        intake(&context, &model, &second);
        let report = worker.tick(&model).unwrap();
        assert_eq!(report.associated, 1);

        let key_set = set_name(&model, SetKind::KeyIndex);
        let email_owner: KeyIndex = get_typed(context.storage.as_ref(), &key_set, "a@x.com").unwrap().unwrap();
        let phone_owner: KeyIndex = get_typed(context.storage.as_ref(), &key_set, "+1-555").unwrap().unwrap();
        assert_eq!(email_owner.reference_id, phone_owner.reference_id);

        let reference_set = set_name(&model, SetKind::Reference);
        let item: ReferenceItem =
            get_typed(context.storage.as_ref(), &reference_set, &email_owner.reference_id.to_string()).unwrap().unwrap();
        assert_eq!(item.version, 2);
    }

    #[test]
    fn colliding_owners_are_rejected_without_mutating_either_key() {
        let model = ModelName::new("Contact");
        let descriptor = ModelDescriptor::root(model.clone(), vec!["email".into(), "phone".into()]);
        let (worker, context) = worker_with(Some(descriptor));

        let first = stage_record("s1", "crm-1", json!({"email": "a@x.com"}), json!({}));
        intake(&context, &model, &first);
        worker.tick(&model).unwrap();
        let second = stage_record("s2", "crm-2", json!({"phone": "+1-555"}), json!({}));
        intake(&context, &model, &second);
        worker.tick(&model).unwrap();

        let colliding = stage_record("s3", "crm-3", json!({"email": "a@x.com", "phone": "+1-555"}), json!({}));
        intake(&context, &model, &colliding);
        let report = worker.tick(&model).unwrap();
        assert_eq!(report.blocked, 1);

        let reference_set = set_name(&model, SetKind::Reference);
        let key_set = set_name(&model, SetKind::KeyIndex);
        let email_owner: KeyIndex = get_typed(context.storage.as_ref(), &key_set, "a@x.com").unwrap().unwrap();
        let phone_owner: KeyIndex = get_typed(context.storage.as_ref(), &key_set, "+1-555").unwrap().unwrap();
        assert_ne!(email_owner.reference_id, phone_owner.reference_id);
        let email_item: ReferenceItem =
            get_typed(context.storage.as_ref(), &reference_set, &email_owner.reference_id.to_string()).unwrap().unwrap();
        assert_eq!(email_item.version, 1);
    }

    #[test]
    fn empty_payload_is_rejected_with_no_keys() {
        let model = ModelName::new("Contact");
        let descriptor = ModelDescriptor::root(model.clone(), vec!["email".into()]);
        let (worker, context) = worker_with(Some(descriptor));
        let record = stage_record("s1", "crm-1", json!({}), json!({}));
        intake(&context, &model, &record);
        let report = worker.tick(&model).unwrap();
        assert_eq!(report.blocked, 1);

        let rejections_set = set_name(&model, SetKind::Rejections);
        let stored: RejectionReport = get_typed(context.storage.as_ref(), &rejections_set, "s1").unwrap().unwrap();
        assert_eq!(stored.reason_code, RejectionReason::NoKeys);
    }

    #[test]
    fn provisional_identity_link_is_minted_on_first_sight() {
        let model = ModelName::new("Contact");
        let descriptor = ModelDescriptor::root(model.clone(), vec!["email".into()]).with_external_id_keys(vec![]);
        let (worker, context) = worker_with(Some(descriptor));
        let record = stage_record(
            "s1",
            "C42",
            json!({"email": "a@x.com"}),
            json!({"system": "crm", "adapter": "sf"}),
        );
        intake(&context, &model, &record);
        worker.tick(&model).unwrap();

        let identity_set = set_name(&model, SetKind::IdentityLink);
        let composite = IdentityLink::composite_id("crm", "sf", "C42");
        let link: IdentityLink = get_typed(context.storage.as_ref(), &identity_set, &composite).unwrap().unwrap();
        assert!(link.provisional);
    }

    #[test]
    fn value_object_record_with_missing_parent_key_is_rejected() {
        let model = ModelName::new("Reading");
        let descriptor = ModelDescriptor::root(model.clone(), vec![]).with_parent(ParentDeclaration::ValueObjectParent {
            parent_model: ModelName::new("Device"),
            parent_key_path: "deviceCode".into(),
        });
        let (worker, context) = worker_with(Some(descriptor));
        let record = stage_record("s1", "sensor-1", json!({"temp": 21.4}), json!({}));
        intake(&context, &model, &record);
        let report = worker.tick(&model).unwrap();
        assert_eq!(report.blocked, 1);

        let rejections_set = set_name(&model, SetKind::Rejections);
        let stored: RejectionReport = get_typed(context.storage.as_ref(), &rejections_set, "s1").unwrap().unwrap();
        assert_eq!(stored.reason_code, RejectionReason::NoKeys);
        assert_eq!(stored.evidence_json["reason"], json!("vo-parent-key-missing"));
    }

    #[test]
    fn value_object_record_does_not_enqueue_its_own_projection_task() {
        let device_model = ModelName::new("Device");
        let reading_model = ModelName::new("Reading");
        let reading_descriptor =
            ModelDescriptor::root(reading_model.clone(), vec![]).with_parent(ParentDeclaration::ValueObjectParent {
                parent_model: device_model.clone(),
                parent_key_path: "deviceCode".into(),
            });
        let (worker, context) = worker_with(Some(reading_descriptor));

        let device_ref = ReferenceId::generate();
        let identity_set = set_name(&device_model, SetKind::IdentityLink);
        context
            .storage
            .upsert(
                &identity_set,
                canon_core::StoredRecord {
                    id: IdentityLink::composite_id("sensors", "sensors", "D2"),
                    payload: serde_json::to_value(IdentityLink {
                        system: "sensors".into(),
                        adapter: "sensors".into(),
                        external_id: "D2".into(),
                        reference_id: device_ref,
                        provisional: false,
                        expires_at: None,
                    })
                    .unwrap(),
                    sequence: 0,
                },
            )
            .unwrap();

        let reading = stage_record(
            "r1",
            "sensor-1",
            json!({"deviceCode": "D2", "temp": 21.4}),
            json!({"system": "sensors", "adapter": "sensors"}),
        );
        intake(&context, &reading_model, &reading);
        let report = worker.tick(&reading_model).unwrap();
        assert_eq!(report.associated, 1);

        let reading_tasks_set = set_name(&reading_model, SetKind::Tasks);
        assert_eq!(context.storage.count(&reading_tasks_set).unwrap(), 0);

        let keyed_set = set_name(&reading_model, SetKind::StageKeyed);
        let keyed: StageRecord = get_typed(context.storage.as_ref(), &keyed_set, "r1").unwrap().unwrap();
        assert_eq!(keyed.reference_id, Some(device_ref), "a value object keys directly to its parent's reference");

        let device_tasks_set = set_name(&device_model, SetKind::Tasks);
        assert_eq!(context.storage.count(&device_tasks_set).unwrap(), 1, "the reading's arrival re-triggers the device's own projection");
    }

    #[test]
    fn value_object_record_honors_a_pre_resolved_parent_reference() {
        let device_model = ModelName::new("Device");
        let reading_model = ModelName::new("Reading");
        let reading_descriptor =
            ModelDescriptor::root(reading_model.clone(), vec![]).with_parent(ParentDeclaration::ValueObjectParent {
                parent_model: device_model.clone(),
                parent_key_path: "deviceCode".into(),
            });
        let (worker, context) = worker_with(Some(reading_descriptor));

        let device_ref = ReferenceId::generate();
        let reading = stage_record(
            "r1",
            "sensor-1",
            json!({"deviceCode": "D2", "temp": 21.4, "reference": {"deviceCode": device_ref.to_string()}}),
            json!({"system": "sensors", "adapter": "sensors"}),
        );
        intake(&context, &reading_model, &reading);
        let report = worker.tick(&reading_model).unwrap();
        assert_eq!(report.associated, 1, "a pre-resolved reference must not require an identity link lookup");

        let keyed_set = set_name(&reading_model, SetKind::StageKeyed);
        let keyed: StageRecord = get_typed(context.storage.as_ref(), &keyed_set, "r1").unwrap().unwrap();
        assert_eq!(keyed.reference_id, Some(device_ref));
    }
}
