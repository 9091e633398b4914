// crates/canon-engine/src/context.rs
// ============================================================================
// Module: Pipeline Context
// Description: The explicit, threaded-in replacement for an ambient service
// locator.
// Purpose: Bundle storage, the model registry, and pipeline options into the
// one handle every worker takes by reference.
// Dependencies: canon-core, canon-config, tokio::sync::Notify
// ============================================================================

//! ## Overview
//! Every worker function in this crate takes a `&PipelineContext` (or an
//! `Arc` of one) instead of reaching for global state. It lives here, not in
//! `canon-core`, because it names `canon_config::PipelineOptions`; core stays
//! agnostic of both a concrete backend and a concrete config crate.

use std::sync::Arc;

use canon_config::PipelineOptions;
use canon_core::ModelRegistry;
use canon_core::Storage;
use tokio::sync::Notify;

/// Shared state threaded through the association worker, the projection
/// worker, and the parent resolution service.
pub struct PipelineContext {
    /// The storage backend, behind a trait object so the engine never names
    /// a concrete adapter.
    pub storage: Arc<dyn Storage>,
    /// Per-model metadata registered at startup.
    pub registry: Arc<ModelRegistry>,
    /// Validated tuning knobs.
    pub options: PipelineOptions,
    /// Rung by the association worker when it parks a `PARENT_NOT_FOUND`
    /// record, so the parent resolution sweep can run immediately instead of
    /// waiting out its interval.
    pub(crate) parent_sweep_poke: Arc<Notify>,
}

impl PipelineContext {
    /// Builds a context from a storage backend, registry, and options.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, registry: Arc<ModelRegistry>, options: PipelineOptions) -> Self {
        Self { storage, registry, options, parent_sweep_poke: Arc::new(Notify::new()) }
    }

    /// A handle callers can use to request an immediate parent resolution
    /// sweep, decoupled from holding a reference to the context itself.
    #[must_use]
    pub fn poke_handle(&self) -> PokeHandle {
        PokeHandle { notify: self.parent_sweep_poke.clone() }
    }
}

/// A clonable handle that requests an out-of-band parent resolution sweep.
#[derive(Clone)]
pub struct PokeHandle {
    notify: Arc<Notify>,
}

impl PokeHandle {
    /// Wakes one waiting sweep loop immediately.
    pub fn poke(&self) {
        self.notify.notify_one();
    }
}
