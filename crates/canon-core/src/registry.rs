// crates/canon-core/src/registry.rs
// ============================================================================
// Module: Canon Model Registry
// Description: Static per-model metadata used by association and projection.
// Purpose: Replace runtime reflection with an explicit, validated table of
// model descriptors registered at process start.
// Dependencies: std::sync, crate::id
// ============================================================================

//! ## Overview
//! Models register themselves once, at startup, instead of being discovered
//! by walking loaded type metadata. A model cannot be both a root aggregable
//! entity and a value object; [`ParentDeclaration`] makes that exclusivity a
//! property of the type rather than something validated ad hoc.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::RwLock;

use thiserror::Error;

use crate::id::ModelName;

// ============================================================================
// SECTION: Parent Declaration
// ============================================================================

/// How a model relates to a parent model, if at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentDeclaration {
    /// This model has no parent; it is a root aggregable entity.
    None,
    /// This model is an entity with a declared parent: its own reference id
    /// is minted, but projection rewrites `parent_key_path`'s values to the
    /// parent's reference id.
    EntityParent {
        /// The parent model's name.
        parent_model: ModelName,
        /// Dotted path under `Data` naming the source-local parent key.
        parent_key_path: String,
    },
    /// This model is a value object: it never mints its own reference id or
    /// canonical projection; its contribution folds into the parent's.
    ValueObjectParent {
        /// The parent model's name.
        parent_model: ModelName,
        /// Dotted path under `Data` naming the source-local parent key.
        parent_key_path: String,
    },
}

impl ParentDeclaration {
    /// Returns the parent model and key path, if this model has a parent of
    /// either kind.
    #[must_use]
    pub fn parent_model_and_key(&self) -> Option<(&ModelName, &str)> {
        match self {
            Self::None => None,
            Self::EntityParent { parent_model, parent_key_path }
            | Self::ValueObjectParent { parent_model, parent_key_path } => {
                Some((parent_model, parent_key_path.as_str()))
            }
        }
    }

    /// Whether this declaration makes the model a value object (never
    /// enqueues its own projection task).
    #[must_use]
    pub const fn is_value_object(&self) -> bool {
        matches!(self, Self::ValueObjectParent { .. })
    }
}

// ============================================================================
// SECTION: Model Descriptor
// ============================================================================

/// Per-model metadata derived once at registration time.
///
/// # Invariants
/// - `aggregation_tags` contains no duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Stable display name, also used for set naming.
    pub model_name: ModelName,
    /// Ordered dotted paths used for aggregation key extraction.
    pub aggregation_tags: Vec<String>,
    /// This model's relationship to a parent model, if any.
    pub parent: ParentDeclaration,
    /// Dotted paths naming the external-id field(s) under each source, in
    /// addition to the reserved `identifier.external.*` bag prefix.
    pub external_id_keys: Vec<String>,
}

impl ModelDescriptor {
    /// Builds a descriptor for a root aggregable entity with no parent.
    #[must_use]
    pub fn root(model_name: impl Into<ModelName>, aggregation_tags: Vec<String>) -> Self {
        Self {
            model_name: model_name.into(),
            aggregation_tags,
            parent: ParentDeclaration::None,
            external_id_keys: Vec::new(),
        }
    }

    /// Sets the external-id key paths for this descriptor.
    #[must_use]
    pub fn with_external_id_keys(mut self, keys: Vec<String>) -> Self {
        self.external_id_keys = keys;
        self
    }

    /// Sets the parent declaration for this descriptor.
    #[must_use]
    pub fn with_parent(mut self, parent: ParentDeclaration) -> Self {
        self.parent = parent;
        self
    }
}

// ============================================================================
// SECTION: Registry Errors
// ============================================================================

/// Errors returned when registering a model descriptor.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A descriptor for this model name was already registered.
    #[error("model already registered: {0}")]
    DuplicateModel(ModelName),
    /// The descriptor declared the same aggregation tag more than once.
    #[error("duplicate aggregation tag {tag:?} for model {model}")]
    DuplicateTag {
        /// The model whose descriptor was rejected.
        model: ModelName,
        /// The tag that appeared more than once.
        tag: String,
    },
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// A registry of model descriptors, keyed by model name.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<BTreeMap<ModelName, Arc<ModelDescriptor>>>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateModel`] if the model name is
    /// already registered, or [`RegistryError::DuplicateTag`] if
    /// `aggregation_tags` contains a repeated entry.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned by a prior panic elsewhere in
    /// the process; this mirrors the fatal-programmer-error handling the
    /// specification assigns to impossible states (§7).
    pub fn register(&self, descriptor: ModelDescriptor) -> Result<(), RegistryError> {
        let mut seen = BTreeSet::new();
        for tag in &descriptor.aggregation_tags {
            if !seen.insert(tag.clone()) {
                return Err(RegistryError::DuplicateTag {
                    model: descriptor.model_name.clone(),
                    tag: tag.clone(),
                });
            }
        }

        let mut guard = self.models.write().expect("model registry lock poisoned");
        if guard.contains_key(&descriptor.model_name) {
            return Err(RegistryError::DuplicateModel(descriptor.model_name));
        }
        guard.insert(descriptor.model_name.clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Looks up a model descriptor by name.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn get(&self, model: &ModelName) -> Option<Arc<ModelDescriptor>> {
        self.models.read().expect("model registry lock poisoned").get(model).cloned()
    }

    /// Returns every registered model name, in a stable (sorted) order.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn model_names(&self) -> Vec<ModelName> {
        self.models.read().expect("model registry lock poisoned").keys().cloned().collect()
    }

    /// Returns every registered model that declares `parent` as its
    /// `ValueObjectParent`, in sorted order. Used by projection to fold a
    /// value object's contributing records into its parent's canonical view.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn value_object_children(&self, parent: &ModelName) -> Vec<ModelName> {
        self.models
            .read()
            .expect("model registry lock poisoned")
            .values()
            .filter(|descriptor| match &descriptor.parent {
                ParentDeclaration::ValueObjectParent { parent_model, .. } => parent_model == parent,
                _ => false,
            })
            .map(|descriptor| descriptor.model_name.clone())
            .collect()
    }
}
