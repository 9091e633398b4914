// crates/canon-core/src/sets.rs
// ============================================================================
// Module: Canon Set Naming
// Description: Pure mapping from (model, logical entity kind) to set name.
// Purpose: Replace reflection-driven naming with a small, explicit table.
// Dependencies: crate::id
// ============================================================================

//! ## Overview
//! The specification fixes set names bit-exactly (§6). This module is the
//! single place that produces them, so every other module asks for a
//! [`SetKind`] instead of formatting strings itself.

use crate::id::ModelName;
use crate::storage::SetName;

/// The logical entity kind a set holds, for one model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetKind {
    /// The root entity snapshot set (no suffix).
    Root,
    /// `{model}#identityLink`.
    IdentityLink,
    /// `{model}#keyIndex`.
    KeyIndex,
    /// `{model}#reference`.
    Reference,
    /// `{model}#tasks`.
    Tasks,
    /// `{model}#policies`.
    Policies,
    /// `{model}#stage.intake`.
    StageIntake,
    /// `{model}#stage.keyed`.
    StageKeyed,
    /// `{model}#stage.parked`.
    StageParked,
    /// `{model}#views.canonical`.
    ViewsCanonical,
    /// `{model}#views.lineage`.
    ViewsLineage,
    /// `{model}#rejections`. Not named in the bit-exact suffix table; added
    /// because rejection reports need some addressable set and the
    /// configuration surface names a `RejectionReportTtl`, so one must
    /// exist.
    Rejections,
}

impl SetKind {
    /// Returns the bit-exact suffix for this kind, or `None` for `Root`
    /// (which carries no suffix).
    #[must_use]
    pub const fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Root => None,
            Self::IdentityLink => Some("#identityLink"),
            Self::KeyIndex => Some("#keyIndex"),
            Self::Reference => Some("#reference"),
            Self::Tasks => Some("#tasks"),
            Self::Policies => Some("#policies"),
            Self::StageIntake => Some("#stage.intake"),
            Self::StageKeyed => Some("#stage.keyed"),
            Self::StageParked => Some("#stage.parked"),
            Self::ViewsCanonical => Some("#views.canonical"),
            Self::ViewsLineage => Some("#views.lineage"),
            Self::Rejections => Some("#rejections"),
        }
    }
}

/// Produces the bit-exact set name for a model and logical entity kind.
#[must_use]
pub fn set_name(model: &ModelName, kind: SetKind) -> SetName {
    match kind.suffix() {
        Some(suffix) => SetName::from_raw(format!("{model}{suffix}")),
        None => SetName::from_raw(model.to_string()),
    }
}
