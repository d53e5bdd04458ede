//! Attribute normalization: flat `(entity, key, value)` rows into per-entity
//! multimaps, plus bag (multiset) comparison of value lists.
//!
//! Duplicate keys are never collapsed. A key stored three times for one entity
//! yields a three-element value list, and comparisons count duplicates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

/// One raw attribute row as read from either store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeRow {
    pub entity_id: EntityId,
    pub key: String,
    pub value: String,
}

impl AttributeRow {
    pub fn new(entity_id: EntityId, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity_id,
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Key → ordered list of values for a single entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMultimap {
    entries: BTreeMap<String, Vec<String>>,
}

impl AttributeMultimap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one value under `key`.
    pub fn push(&mut self, key: String, value: String) {
        self.entries.entry(key).or_default().push(value);
    }

    /// Values for `key` in the order they were pushed; empty if absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &[String] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(key, values)| (key.as_str(), values.as_slice()))
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of values across all keys (equals the source row count).
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Group flat rows into `entity_id → (key → values)`.
///
/// Input is expected sorted by entity then key, but grouping does not depend
/// on it: values land in the order their rows were seen.
pub fn normalize_rows<I>(rows: I) -> BTreeMap<EntityId, AttributeMultimap>
where
    I: IntoIterator<Item = AttributeRow>,
{
    let mut grouped: BTreeMap<EntityId, AttributeMultimap> = BTreeMap::new();
    for row in rows {
        grouped
            .entry(row.entity_id)
            .or_default()
            .push(row.key, row.value);
    }
    grouped
}

/// Result of comparing two value bags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BagDiff {
    /// Values (with multiplicity) present on the left but not on the right.
    pub only_left: Vec<String>,
    /// Values (with multiplicity) present on the right but not on the left.
    pub only_right: Vec<String>,
}

impl BagDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty()
    }
}

/// Multiset difference in both directions.
///
/// Order is irrelevant; duplicate counts are not. `["a", "a", "b"]` against
/// `["a", "b"]` leaves one `"a"` on the left.
pub fn multiset_diff(left: &[String], right: &[String]) -> BagDiff {
    let mut counts: BTreeMap<&str, i64> = BTreeMap::new();
    for value in left {
        *counts.entry(value.as_str()).or_insert(0) += 1;
    }
    for value in right {
        *counts.entry(value.as_str()).or_insert(0) -= 1;
    }

    let mut diff = BagDiff::default();
    for (value, count) in counts {
        let excess = usize::try_from(count.unsigned_abs()).unwrap_or(usize::MAX);
        let side = if count > 0 {
            &mut diff.only_left
        } else {
            &mut diff.only_right
        };
        side.extend(std::iter::repeat_n(value.to_owned(), excess));
    }
    diff
}
