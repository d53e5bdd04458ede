//! Batch migration from the legacy to the normalized representation.
//!
//! Each entity is migrated inside its own transaction: the legacy read and the
//! normalized upsert commit together, so a concurrent legacy write is either
//! fully included in the pass or fully left for the next one.

use std::time::{Duration, Instant};

use entsync_error::{ErrorKind, Result, SyncError};
use entsync_types::{EntityId, FieldValue, LegacyEntity, NormalizedEntity};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PromotedField;
use crate::store::{LegacyStore, NormalizedStore, OptionalExt, Transactional};

/// Map a legacy entity onto the normalized shape.
///
/// Promoted keys become typed columns and are removed from the attribute list;
/// everything else is carried over in insertion order. `synced_at` is the
/// legacy `modified_at` observed here.
pub fn transform(legacy: &LegacyEntity, promoted: &[PromotedField]) -> Result<NormalizedEntity> {
    let mut fields = std::collections::BTreeMap::new();
    for field in promoted {
        let values: Vec<&str> = legacy.values_of(&field.key).collect();
        let value = match values.as_slice() {
            [] => FieldValue::Null,
            [raw] => field.kind.parse(raw).map_err(|detail| {
                SyncError::malformed(legacy.id, format!("{}: {detail}", field.key))
            })?,
            many => {
                return Err(SyncError::malformed(
                    legacy.id,
                    format!(
                        "promoted key `{}` has {} values, expected at most one",
                        field.key,
                        many.len()
                    ),
                ));
            }
        };
        fields.insert(field.column.clone(), value);
    }

    let attributes = legacy
        .attributes
        .iter()
        .filter(|attr| !promoted.iter().any(|f| f.key == attr.key))
        .cloned()
        .collect();

    Ok(NormalizedEntity {
        id: legacy.id,
        entity_type: legacy.entity_type.clone(),
        status: legacy.status.clone(),
        created_at: legacy.created_at,
        modified_at: legacy.modified_at,
        synced_at: legacy.modified_at,
        fields,
        attributes,
    })
}

/// One entity that could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityFailure {
    pub id: EntityId,
    pub kind: ErrorKind,
    pub detail: String,
}

/// Result of one [`BatchMigrator::process`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Entities written or deleted.
    pub processed: u64,
    /// Subset of `processed` that removed an orphaned normalized row.
    pub deleted: u64,
    pub failed: Vec<EntityFailure>,
    pub elapsed: Duration,
}

impl BatchReport {
    #[must_use]
    pub fn failed_ids(&self) -> Vec<EntityId> {
        self.failed.iter().map(|f| f.id).collect()
    }
}

enum Migrated {
    Written,
    Deleted,
}

/// Errors that end the whole batch instead of one entity.
fn aborts_batch(err: &SyncError) -> bool {
    matches!(
        err.kind(),
        ErrorKind::StoreUnavailable | ErrorKind::SchemaMissing
    )
}

/// Copies batches of entities into the normalized store.
#[derive(Debug)]
pub struct BatchMigrator<'a, S> {
    store: &'a S,
    promoted: &'a [PromotedField],
}

impl<'a, S> BatchMigrator<'a, S>
where
    S: LegacyStore + NormalizedStore + Transactional,
{
    pub fn new(store: &'a S, promoted: &'a [PromotedField]) -> Self {
        Self { store, promoted }
    }

    /// Migrate `ids` in order.
    ///
    /// Per-entity problems are recorded and skipped. Store outages and a
    /// missing schema abort the batch with an error; entities committed before
    /// the abort stay migrated.
    pub fn process(&self, ids: &[EntityId]) -> Result<BatchReport> {
        let started = Instant::now();
        let mut report = BatchReport::default();

        for &id in ids {
            match self.migrate_one(id) {
                Ok(Migrated::Written) => report.processed += 1,
                Ok(Migrated::Deleted) => {
                    report.processed += 1;
                    report.deleted += 1;
                }
                Err(err) if aborts_batch(&err) => {
                    warn!(
                        entity = id,
                        processed = report.processed,
                        error = %err,
                        "batch aborted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(entity = id, error = %err, "entity migration failed, skipping");
                    report.failed.push(EntityFailure {
                        id,
                        kind: ErrorKind::PerEntityMigrationFailure,
                        detail: err.to_string(),
                    });
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            batch = ids.len(),
            processed = report.processed,
            deleted = report.deleted,
            failed = report.failed.len(),
            elapsed_ms = report.elapsed.as_millis(),
            "batch processed"
        );
        Ok(report)
    }

    fn migrate_one(&self, id: EntityId) -> Result<Migrated> {
        self.store.in_transaction(|| {
            match self.store.read_legacy_entity(id).optional()? {
                Some(legacy) => {
                    let normalized = transform(&legacy, self.promoted)?;
                    self.store.write_normalized_entity(&normalized)?;
                    debug!(
                        entity = id,
                        synced_at = normalized.synced_at,
                        attributes = normalized.attributes.len(),
                        "entity migrated"
                    );
                    Ok(Migrated::Written)
                }
                None => {
                    if self.store.delete_normalized_entity(id)? {
                        debug!(entity = id, "orphaned normalized row removed");
                        Ok(Migrated::Deleted)
                    } else {
                        Err(SyncError::NotFound { id })
                    }
                }
            }
        })
    }
}
