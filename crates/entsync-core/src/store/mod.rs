//! Data-access contracts consumed by the core, and the SQLite implementation.
//!
//! The legacy ORM layer, schema manager and settings storage are external
//! collaborators; the core only ever talks to them through these traits.

mod optional;
mod sqlite;

use std::collections::BTreeSet;

use entsync_error::Result;
use entsync_types::{AttributeRow, AuthoritativeStore, EntityId, LegacyEntity, NormalizedEntity};

pub use optional::OptionalExt;
pub use sqlite::{SqliteStore, tables};

/// Read access to the legacy (generic entity + attribute) representation.
pub trait LegacyStore {
    /// Current legacy state of one entity, or `SyncError::NotFound`.
    fn read_legacy_entity(&self, id: EntityId) -> Result<LegacyEntity>;

    /// IDs of the given types with `start <= id <= end`, ascending, at most `limit`.
    fn list_entity_ids_in_range(
        &self,
        entity_types: &[String],
        start: EntityId,
        end: EntityId,
        limit: usize,
    ) -> Result<Vec<EntityId>>;

    /// Number of entities of the given types with `start <= id <= end`.
    fn count_entities_in_range(
        &self,
        entity_types: &[String],
        start: EntityId,
        end: EntityId,
    ) -> Result<u64>;

    /// Attribute rows of `ids` whose key is not in `exclude`, ordered by
    /// entity, key, then insertion order.
    fn legacy_attribute_rows(
        &self,
        ids: &[EntityId],
        exclude: &BTreeSet<String>,
    ) -> Result<Vec<AttributeRow>>;
}

/// Read/write access to the normalized representation and its schema.
pub trait NormalizedStore {
    fn schema_exists(&self) -> Result<bool>;

    fn create_schema(&self) -> Result<()>;

    /// Current normalized state of one entity, or `SyncError::NotFound`.
    fn read_normalized_entity(&self, id: EntityId) -> Result<NormalizedEntity>;

    /// Idempotent upsert. Replaces the entity's attribute rows wholesale.
    fn write_normalized_entity(&self, entity: &NormalizedEntity) -> Result<()>;

    /// Remove the entity and its attributes. Returns whether a row existed.
    fn delete_normalized_entity(&self, id: EntityId) -> Result<bool>;

    /// Attribute rows of `ids`, ordered by entity, key, then insertion order.
    fn normalized_attribute_rows(&self, ids: &[EntityId]) -> Result<Vec<AttributeRow>>;
}

/// Live view of which entities are out of sync.
///
/// Pending means: legacy `modified_at` is newer than normalized `synced_at`,
/// the normalized row is absent, or the normalized row has no legacy entity
/// any more. Always computed from current rows, never from a cached flag.
pub trait BacklogSource {
    fn count_pending(&self, entity_types: &[String]) -> Result<u64>;

    /// Pending IDs strictly greater than `after` (all if `None`), ascending.
    fn pending_ids_after(
        &self,
        entity_types: &[String],
        after: Option<EntityId>,
        limit: usize,
    ) -> Result<Vec<EntityId>>;
}

/// Persisted process-wide switches.
pub trait SettingsStore {
    fn authoritative_store(&self) -> Result<AuthoritativeStore>;

    fn set_authoritative_store(&self, store: AuthoritativeStore) -> Result<()>;

    fn background_sync_enabled(&self) -> Result<bool>;

    fn set_background_sync_enabled(&self, enabled: bool) -> Result<()>;
}

/// Run a unit of work atomically.
///
/// Every store call made inside `work` either commits together or not at all.
pub trait Transactional {
    fn in_transaction<T, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>;
}
