//! Read-only comparison of the two representations.

use std::collections::BTreeSet;

use entsync_error::Result;
use entsync_types::{
    AttributeMultimap, DivergenceKind, DivergenceRecord, EntityId, FieldValue, LegacyEntity,
    NormalizedEntity, VerificationReport, multiset_diff, normalize_rows,
};
use tracing::debug;

use crate::config::{PromotedField, VerifySettings, migrated_attribute_keys};
use crate::store::{LegacyStore, NormalizedStore, OptionalExt};

/// Canonical text of a promoted field as derived from legacy attributes.
///
/// Values that would fail migration are reported verbatim so they show up as
/// a divergence instead of an error.
fn legacy_field_text(legacy: &LegacyEntity, field: &PromotedField) -> String {
    let values: Vec<&str> = legacy.values_of(&field.key).collect();
    match values.as_slice() {
        [] => FieldValue::Null.to_string(),
        [raw] => field
            .kind
            .parse(raw)
            .map_or_else(|_| (*raw).to_owned(), |value| value.to_string()),
        many => many.join(", "),
    }
}

/// Recomputes canonical fields and attribute bags on both sides and diffs them.
#[derive(Debug)]
pub struct VerificationEngine<'a, S> {
    store: &'a S,
    promoted: &'a [PromotedField],
    ignored_keys: BTreeSet<String>,
    excluded_fields: BTreeSet<String>,
}

impl<'a, S> VerificationEngine<'a, S>
where
    S: LegacyStore + NormalizedStore,
{
    pub fn new(store: &'a S, promoted: &'a [PromotedField], settings: &VerifySettings) -> Self {
        Self {
            store,
            promoted,
            ignored_keys: settings.ignored_attribute_keys.iter().cloned().collect(),
            excluded_fields: settings.excluded_fields.iter().cloned().collect(),
        }
    }

    /// Divergences per entity. Entities that match are absent from the map.
    pub fn verify(&self, ids: &[EntityId]) -> Result<VerificationReport> {
        let mut legacy_exclude = migrated_attribute_keys(self.promoted);
        legacy_exclude.extend(self.ignored_keys.iter().cloned());

        let mut legacy_bags = normalize_rows(self.store.legacy_attribute_rows(ids, &legacy_exclude)?);
        let mut normalized_bags = normalize_rows(
            self.store
                .normalized_attribute_rows(ids)?
                .into_iter()
                .filter(|row| !self.ignored_keys.contains(&row.key)),
        );

        let mut report = VerificationReport::new();
        for &id in ids {
            let legacy = self.store.read_legacy_entity(id).optional()?;
            let normalized = self.store.read_normalized_entity(id).optional()?;
            let records = match (legacy, normalized) {
                (None, None) => continue,
                (Some(_), None) => vec![DivergenceRecord::missing(
                    id,
                    DivergenceKind::MissingNormalized,
                )],
                (None, Some(_)) => vec![DivergenceRecord::missing(id, DivergenceKind::MissingLegacy)],
                (Some(legacy), Some(normalized)) => {
                    let mut records = self.field_divergences(&legacy, &normalized);
                    records.extend(attribute_divergences(
                        id,
                        &legacy_bags.remove(&id).unwrap_or_default(),
                        &normalized_bags.remove(&id).unwrap_or_default(),
                    ));
                    records
                }
            };
            if !records.is_empty() {
                report.insert(id, records);
            }
        }

        debug!(
            batch = ids.len(),
            divergent = report.len(),
            "verification pass complete"
        );
        Ok(report)
    }

    fn field_divergences(
        &self,
        legacy: &LegacyEntity,
        normalized: &NormalizedEntity,
    ) -> Vec<DivergenceRecord> {
        let mut pairs: Vec<(&str, String, String)> = vec![
            (
                "entity_type",
                legacy.entity_type.clone(),
                normalized.entity_type.clone(),
            ),
            ("status", legacy.status.clone(), normalized.status.clone()),
            (
                "created_at",
                legacy.created_at.to_string(),
                normalized.created_at.to_string(),
            ),
            (
                "modified_at",
                legacy.modified_at.to_string(),
                normalized.modified_at.to_string(),
            ),
        ];
        for field in self.promoted {
            let stored = normalized
                .fields
                .get(&field.column)
                .unwrap_or(&FieldValue::Null)
                .to_string();
            pairs.push((field.column.as_str(), legacy_field_text(legacy, field), stored));
        }

        pairs
            .into_iter()
            .filter(|(name, _, _)| !self.excluded_fields.contains(*name))
            .filter(|(_, left, right)| left != right)
            .map(|(name, left, right)| {
                DivergenceRecord::field(legacy.id, name, Some(left), Some(right))
            })
            .collect()
    }
}

/// Bag comparison for every key present on either side.
fn attribute_divergences(
    id: EntityId,
    legacy: &AttributeMultimap,
    normalized: &AttributeMultimap,
) -> Vec<DivergenceRecord> {
    let keys: BTreeSet<&str> = legacy.keys().chain(normalized.keys()).collect();
    keys.into_iter()
        .filter_map(|key| {
            let left = legacy.get(key);
            let right = normalized.get(key);
            if multiset_diff(left, right).is_empty() {
                None
            } else {
                Some(DivergenceRecord::attribute(
                    id,
                    key,
                    left.to_vec(),
                    right.to_vec(),
                ))
            }
        })
        .collect()
}
