// crates/canon-engine/src/purge.rs
// ============================================================================
// Module: Purge Worker
// Description: Deletes records past their configured per-set retention
// window from every TTL-governed set.
// Purpose: Implement the external purge loop the specification names but
// leaves outside the association/projection state machines.
// Dependencies: canon-core, canon-config, tokio, time
// ============================================================================

//! ## Overview
//! A set with no configured TTL is never touched by this worker; TTL fields
//! on [`canon_config::PipelineOptions`] are all optional and default unset.
//! Purging is disabled entirely unless `purge_enabled` is set, independent
//! of whether individual TTLs are configured, so an operator can stage a
//! TTL policy without immediately enabling deletion.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use canon_core::ModelName;
use canon_core::ParkedRecord;
use canon_core::ProjectionTask;
use canon_core::RejectionReport;
use canon_core::SetKind;
use canon_core::StageRecord;
use canon_core::Storage;
use canon_core::set_name;
use serde::de::DeserializeOwned;
use time::Duration as TimeDuration;
use time::OffsetDateTime;

use crate::cancel::CancelSignal;
use crate::context::PipelineContext;
use crate::error::EngineError;
use crate::repo::decode_page;

/// How many pages of a set to scan per purge pass; bounds an otherwise
/// unindexed linear scan the same way projection's gather step does.
const PURGE_MAX_PAGES: u64 = 50;

/// Aggregate counts for one [`PurgeWorker::sweep_once`] call, summed across
/// every TTL-governed set for the model.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    /// Records examined across every configured set.
    pub examined: u64,
    /// Records deleted for exceeding their set's TTL.
    pub purged: u64,
}

/// Ages out records past their configured per-set retention window.
pub struct PurgeWorker {
    context: Arc<PipelineContext>,
}

impl PurgeWorker {
    /// Builds a worker over a shared pipeline context.
    #[must_use]
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }

    /// Purges every TTL-governed set for `model` whose configured window is
    /// set. Sets with no configured TTL are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on storage or decode failure.
    pub fn sweep_once(&self, model: &ModelName) -> Result<PurgeReport, EngineError> {
        let mut report = PurgeReport::default();
        let now = OffsetDateTime::now_utc();
        let batch_size = self.context.options.batch_size();

        if let Some(ttl) = self.context.options.intake_ttl() {
            self.purge_set::<StageRecord>(model, SetKind::StageIntake, ttl, now, batch_size, &mut report, |r| {
                r.occurred_at
            })?;
        }
        if let Some(ttl) = self.context.options.keyed_ttl() {
            self.purge_set::<StageRecord>(model, SetKind::StageKeyed, ttl, now, batch_size, &mut report, |r| {
                r.occurred_at
            })?;
        }
        if let Some(ttl) = self.context.options.parked_ttl() {
            self.purge_set::<ParkedRecord>(model, SetKind::StageParked, ttl, now, batch_size, &mut report, |r| {
                r.parked_at
            })?;
        }
        if let Some(ttl) = self.context.options.projection_task_ttl() {
            self.purge_set::<ProjectionTask>(model, SetKind::Tasks, ttl, now, batch_size, &mut report, |r| {
                r.created_at
            })?;
        }
        if let Some(ttl) = self.context.options.rejection_report_ttl() {
            self.purge_set::<RejectionReport>(model, SetKind::Rejections, ttl, now, batch_size, &mut report, |r| {
                r.timestamp
            })?;
        }
        Ok(report)
    }

    fn purge_set<T: DeserializeOwned>(
        &self,
        model: &ModelName,
        kind: SetKind,
        ttl: StdDuration,
        now: OffsetDateTime,
        batch_size: u32,
        report: &mut PurgeReport,
        age_of: impl Fn(&T) -> OffsetDateTime,
    ) -> Result<(), EngineError> {
        let set = set_name(model, kind);
        let ttl = TimeDuration::try_from(ttl).unwrap_or(TimeDuration::ZERO);
        let page = self.context.storage.scan_filtered(&set, batch_size, PURGE_MAX_PAGES, &|_| true)?;
        for (id, value) in decode_page::<T>(page) {
            report.examined += 1;
            if now - age_of(&value) > ttl {
                self.context.storage.delete(&set, &id)?;
                report.purged += 1;
            }
        }
        Ok(())
    }

    /// Runs the periodic purge sweep until `cancel` trips. Returns
    /// immediately, doing nothing, if `purge_enabled` is false.
    pub async fn run(&self, models: Vec<ModelName>, cancel: CancelSignal) {
        if !self.context.options.purge_enabled() {
            return;
        }
        loop {
            if cancel.is_cancelled() {
                return;
            }
            for model in &models {
                if cancel.is_cancelled() {
                    return;
                }
                if let Err(err) = self.sweep_once(model) {
                    tracing::warn!(model = %model, error = %err, "purge sweep failed");
                }
            }
            tokio::select! {
                () = tokio::time::sleep(self.context.options.purge_interval()) => {},
                () = cancel.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canon_config::PipelineOptionsInput;
    use canon_core::ModelRegistry;
    use canon_core::RejectionReason;
    use canon_core::StoredRecord;
    use canon_store_memory::InMemoryStorage;
    use serde_json::json;

    fn context_with_ttl(rejection_report_ttl_secs: u64) -> Arc<PipelineContext> {
        let options = PipelineOptions::build(PipelineOptionsInput {
            rejection_report_ttl_secs: Some(rejection_report_ttl_secs),
            ..Default::default()
        })
        .unwrap();
        Arc::new(PipelineContext::new(Arc::new(InMemoryStorage::new()), Arc::new(ModelRegistry::new()), options))
    }

    fn stored(id: &str, payload: serde_json::Value) -> StoredRecord {
        StoredRecord { id: id.to_string(), payload, sequence: 0 }
    }

    use canon_config::PipelineOptions;

    #[test]
    fn purges_a_rejection_report_older_than_its_ttl() {
        let context = context_with_ttl(60);
        let model = ModelName::new("Contact");
        let set = set_name(&model, SetKind::Rejections);
        let stale = RejectionReport {
            reason_code: RejectionReason::NoKeys,
            evidence_json: json!({}),
            policy_version: None,
            timestamp: OffsetDateTime::now_utc() - TimeDuration::seconds(120),
        };
        context.storage.upsert(&set, stored("stale", serde_json::to_value(&stale).unwrap())).unwrap();

        let worker = PurgeWorker::new(context.clone());
        let report = worker.sweep_once(&model).unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.purged, 1);
        assert_eq!(context.storage.count(&set).unwrap(), 0);
    }

    #[test]
    fn leaves_a_rejection_report_within_its_ttl() {
        let context = context_with_ttl(3600);
        let model = ModelName::new("Contact");
        let set = set_name(&model, SetKind::Rejections);
        let fresh = RejectionReport {
            reason_code: RejectionReason::NoKeys,
            evidence_json: json!({}),
            policy_version: None,
            timestamp: OffsetDateTime::now_utc(),
        };
        context.storage.upsert(&set, stored("fresh", serde_json::to_value(&fresh).unwrap())).unwrap();

        let worker = PurgeWorker::new(context.clone());
        let report = worker.sweep_once(&model).unwrap();

        assert_eq!(report.purged, 0);
        assert_eq!(context.storage.count(&set).unwrap(), 1);
    }

    #[test]
    fn leaves_sets_with_no_configured_ttl_untouched() {
        let context = context_with_ttl(60);
        let model = ModelName::new("Contact");
        let intake_set = set_name(&model, SetKind::StageIntake);
        let record = StageRecord {
            id: "r1".into(),
            source_id: "row-1".into(),
            occurred_at: OffsetDateTime::now_utc() - TimeDuration::days(365),
            policy_version: None,
            correlation_id: None,
            data: serde_json::Map::new(),
            source: serde_json::Map::new(),
            reference_id: None,
        };
        context.storage.upsert(&intake_set, stored("r1", serde_json::to_value(&record).unwrap())).unwrap();

        let worker = PurgeWorker::new(context.clone());
        worker.sweep_once(&model).unwrap();

        assert_eq!(context.storage.count(&intake_set).unwrap(), 1, "intake_ttl was never configured");
    }
}
