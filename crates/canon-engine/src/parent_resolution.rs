// crates/canon-engine/src/parent_resolution.rs
// ============================================================================
// Module: Parent Resolution Service
// Description: Resolves a child's source-local parent reference to a
// canonical reference id, and periodically re-attempts unresolved parks.
// Purpose: Let child records reference a parent by source-local id without
// the parent needing to exist anywhere but as an identity link.
// Dependencies: canon-core, tokio
// ============================================================================

//! ## Overview
//! [`parent_resolve`] is the single lookup both the association worker and
//! this service's sweep use. It never mints a provisional parent: an
//! unresolved parent always means the child is parked, never guessed at.

use std::sync::Arc;
use std::time::Duration;

use canon_core::IdentityLink;
use canon_core::ModelName;
use canon_core::ReferenceId;
use canon_core::RejectionReason;
use canon_core::SetKind;
use canon_core::StageRecord;
use canon_core::Storage;
use canon_core::set_name;
use serde_json::json;

use crate::context::PipelineContext;
use crate::error::EngineError;
use crate::repo::decode_page;
use crate::repo::get_typed;
use crate::repo::upsert_typed;

/// Looks up `IdentityLink<parent_model>` by the composite id
/// `"{source_system}|{source_system}|{source_local_id}"`, returning the
/// linked reference id if one exists.
pub fn parent_resolve(
    context: &PipelineContext,
    parent_model: &ModelName,
    source_system: &str,
    source_local_id: &str,
) -> Result<Option<ReferenceId>, EngineError> {
    let set = set_name(parent_model, SetKind::IdentityLink);
    let composite = IdentityLink::composite_id(source_system, source_system, source_local_id);
    let link: Option<IdentityLink> = get_typed(context.storage.as_ref(), &set, &composite)?;
    Ok(link.map(|link| link.reference_id))
}

/// Evidence recorded on a `PARENT_NOT_FOUND` park, enough to retry
/// resolution later without re-deriving it from the original payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct ParentWaitEvidence {
    pub parent_model: ModelName,
    pub source_system: String,
    pub source_local_id: String,
}

/// Outcome of one sweep pass over a model's parked records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Parked records examined this pass.
    pub examined: u64,
    /// Parked records moved back to intake because their parent resolved.
    pub unparked: u64,
}

/// Periodically retries `PARENT_NOT_FOUND` parks and exposes a poke entry
/// point for an immediate retry.
pub struct ParentResolutionService {
    context: Arc<PipelineContext>,
}

impl ParentResolutionService {
    /// Builds a service over a shared pipeline context.
    #[must_use]
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self { context }
    }

    /// Re-attempts resolution for every parked `PARENT_NOT_FOUND` record of
    /// one model.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on storage or decode failure.
    pub fn sweep_once(&self, model: &ModelName) -> Result<SweepReport, EngineError> {
        let parked_set = set_name(model, SetKind::StageParked);
        let intake_set = set_name(model, SetKind::StageIntake);
        let batch = self.context.options.batch_size();
        let records = self.context.storage.scan_filtered(&parked_set, batch, 10, &|_| true)?;
        let mut report = SweepReport::default();

        for (id, parked) in decode_page::<canon_core::ParkedRecord>(records) {
            if parked.reason_code != RejectionReason::ParentNotFound {
                continue;
            }
            report.examined += 1;
            let Some(evidence): Option<ParentWaitEvidence> = serde_json::from_value(parked.evidence.clone()).ok()
            else {
                continue;
            };
            let resolved =
                parent_resolve(&self.context, &evidence.parent_model, &evidence.source_system, &evidence.source_local_id)?;
            if resolved.is_some() {
                let mut record = parked.record;
                record.id = ReferenceId::generate().to_string();
                upsert_typed(self.context.storage.as_ref(), &intake_set, &record.id, &record)?;
                self.context.storage.delete(&parked_set, &id)?;
                report.unparked += 1;
            }
        }
        Ok(report)
    }

    /// Runs the periodic sweep until `cancel` trips, waking early whenever
    /// [`crate::context::PokeHandle::poke`] is called.
    pub async fn run(&self, models: Vec<ModelName>, interval: Duration, cancel: crate::cancel::CancelSignal) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            for model in &models {
                if cancel.is_cancelled() {
                    return;
                }
                if let Err(err) = self.sweep_once(model) {
                    tracing::warn!(model = %model, error = %err, "parent resolution sweep failed");
                }
            }
            tokio::select! {
                () = tokio::time::sleep(interval) => {},
                () = self.context.parent_sweep_poke.notified() => {},
                () = cancel.cancelled() => return,
            }
        }
    }
}

pub(crate) fn park_evidence(parent_model: &ModelName, source_system: &str, source_local_id: &str) -> serde_json::Value {
    json!(ParentWaitEvidence {
        parent_model: parent_model.clone(),
        source_system: source_system.to_string(),
        source_local_id: source_local_id.to_string(),
    })
}
