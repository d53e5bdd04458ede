//! Divergence records produced by verification passes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// What part of the entity diverged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// Legacy entity exists, normalized row does not.
    MissingNormalized,
    /// Normalized row exists, legacy entity does not.
    MissingLegacy,
    /// A canonical field differs.
    Field,
    /// The value bag of an attribute key differs.
    Attribute,
}

/// One mismatch between the two representations of an entity.
///
/// Records are ephemeral: they are reported, optionally trigger re-migration,
/// and are never written to either store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceRecord {
    pub entity_id: EntityId,
    pub kind: DivergenceKind,
    /// Attribute key or field name. `id` for missing-row records.
    pub key: String,
    pub legacy_values: Vec<String>,
    pub normalized_values: Vec<String>,
}

impl DivergenceRecord {
    pub fn attribute(
        entity_id: EntityId,
        key: impl Into<String>,
        legacy_values: Vec<String>,
        normalized_values: Vec<String>,
    ) -> Self {
        Self {
            entity_id,
            kind: DivergenceKind::Attribute,
            key: key.into(),
            legacy_values,
            normalized_values,
        }
    }

    pub fn field(
        entity_id: EntityId,
        name: impl Into<String>,
        legacy_value: Option<String>,
        normalized_value: Option<String>,
    ) -> Self {
        Self {
            entity_id,
            kind: DivergenceKind::Field,
            key: name.into(),
            legacy_values: legacy_value.into_iter().collect(),
            normalized_values: normalized_value.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn missing(entity_id: EntityId, kind: DivergenceKind) -> Self {
        let present = vec![entity_id.to_string()];
        let (legacy_values, normalized_values) = match kind {
            DivergenceKind::MissingLegacy => (Vec::new(), present),
            _ => (present, Vec::new()),
        };
        Self {
            entity_id,
            kind,
            key: "id".to_owned(),
            legacy_values,
            normalized_values,
        }
    }
}

/// Divergences of one verification pass, keyed by entity. Entities that
/// verified clean have no entry.
pub type VerificationReport = BTreeMap<EntityId, Vec<DivergenceRecord>>;
