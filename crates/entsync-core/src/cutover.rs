//! Guarded switch of the authoritative store.
//!
//! The gate is the only writer of the authoritative-store flag and of the
//! background-sync flag. Each transition runs as one store transaction:
//! the checks, schema creation and both flag writes commit together, and a
//! refused or failed transition leaves flags and schema untouched.

use std::time::Instant;

use entsync_error::{Result, SyncError};
use entsync_types::{AuthoritativeStore, EntityId, Outcome, Summary};
use serde::Serialize;
use tracing::{info, warn};

use crate::backlog::BacklogTracker;
use crate::extensions::ExtensionRegistry;
use crate::store::{
    BacklogSource, LegacyStore, NormalizedStore, SettingsStore, Transactional, tables,
};

/// Flags accepted by [`CutoverGate::enable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnableOptions {
    /// Refuse unless the installation has no entities at all.
    pub for_new_install: bool,
    /// Also turn on background sync.
    pub with_sync: bool,
}

/// Snapshot reported by the `status` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CutoverStatus {
    pub authoritative: AuthoritativeStore,
    pub background_sync: bool,
    pub schema_exists: bool,
    pub pending: u64,
}

pub struct CutoverGate<'a, S, R> {
    store: &'a S,
    registry: &'a R,
    entity_types: Vec<String>,
    block_on_uncertain: bool,
}

impl<'a, S, R> CutoverGate<'a, S, R>
where
    S: LegacyStore + NormalizedStore + BacklogSource + SettingsStore + Transactional,
    R: ExtensionRegistry,
{
    pub fn new(
        store: &'a S,
        registry: &'a R,
        entity_types: Vec<String>,
        block_on_uncertain: bool,
    ) -> Self {
        Self {
            store,
            registry,
            entity_types,
            block_on_uncertain,
        }
    }

    fn backlog(&self) -> BacklogTracker<'a, S> {
        BacklogTracker::new(self.store, self.entity_types.clone())
    }

    fn is_fresh_install(&self) -> Result<bool> {
        let total =
            self.store
                .count_entities_in_range(&self.entity_types, EntityId::MIN, EntityId::MAX)?;
        Ok(total == 0)
    }

    pub fn status(&self) -> Result<CutoverStatus> {
        Ok(CutoverStatus {
            authoritative: self.store.authoritative_store()?,
            background_sync: self.store.background_sync_enabled()?,
            schema_exists: self.store.schema_exists()?,
            pending: self.backlog().total_outstanding()?,
        })
    }

    /// Make the normalized store authoritative.
    pub fn enable(&self, options: EnableOptions) -> Outcome {
        let started = Instant::now();
        info!(
            for_new_install = options.for_new_install,
            with_sync = options.with_sync,
            "running pre-enable checks"
        );
        self.store
            .in_transaction(|| self.try_enable(options, started))
            .unwrap_or_else(|err| {
                warn!(error = %err, "enable aborted, nothing changed");
                Outcome::from_error(&err, Summary::new(0, started.elapsed(), "enable aborted"))
            })
    }

    /// Make the legacy store authoritative again.
    pub fn disable(&self, with_sync: bool) -> Outcome {
        let started = Instant::now();
        info!(with_sync, "running pre-disable checks");
        self.store
            .in_transaction(|| self.try_disable(with_sync, started))
            .unwrap_or_else(|err| {
                warn!(error = %err, "disable aborted, nothing changed");
                Outcome::from_error(&err, Summary::new(0, started.elapsed(), "disable aborted"))
            })
    }

    /// Runs inside the enable transaction. Any `Err` rolls back every write.
    fn try_enable(&self, options: EnableOptions, started: Instant) -> Result<Outcome> {
        let fresh = self.is_fresh_install()?;
        if options.for_new_install && !fresh {
            let err = SyncError::precondition(
                "this is not a new installation, but --for-new-install was given",
            );
            return Ok(Outcome::from_error(
                &err,
                Summary::new(0, started.elapsed(), "enable refused"),
            ));
        }

        let mut reasons = Vec::new();

        let report = self.registry.compatibility_report()?;
        let blocking = report.blocking(self.block_on_uncertain);
        if !blocking.is_empty() {
            reasons.push(format!(
                "extensions not compatible with the normalized store: {}",
                blocking.join(", ")
            ));
        }

        let pending = self.backlog().total_outstanding()?;
        let schema_exists = self.store.schema_exists()?;
        if !schema_exists && !(fresh || pending == 0) {
            reasons.push(
                "the normalized schema does not exist and this is not a new installation".to_owned(),
            );
        }
        if pending > 0 {
            reasons.push(format!(
                "{pending} entities are pending sync; run `entsync sync` first"
            ));
        }

        if !reasons.is_empty() {
            for reason in &reasons {
                warn!(reason = %reason, "enable check failed");
            }
            let err = SyncError::PreconditionFailed { reasons };
            return Ok(Outcome::from_error(
                &err,
                Summary::new(pending, started.elapsed(), "enable refused"),
            ));
        }

        if !schema_exists {
            warn!("normalized schema does not exist, creating");
            self.store.create_schema()?;
            if !self.store.schema_exists()? {
                return Err(SyncError::SchemaMissing {
                    table: tables::ENTITIES.to_owned(),
                });
            }
        }

        let mut notes = Vec::new();
        if options.with_sync {
            if self.store.background_sync_enabled()? {
                notes.push("sync is already enabled");
            } else {
                self.flip_sync(true)?;
            }
        }

        if self.store.authoritative_store()? == AuthoritativeStore::NormalizedAuthoritative {
            notes.insert(0, "normalized store is already authoritative");
            return Ok(Outcome::warning(
                notes.join("; "),
                Summary::new(0, started.elapsed(), "nothing to enable"),
            ));
        }

        self.flip_authoritative(AuthoritativeStore::NormalizedAuthoritative)?;
        let summary = Summary::new(0, started.elapsed(), "normalized store is now authoritative");
        Ok(if notes.is_empty() {
            Outcome::Success(summary)
        } else {
            Outcome::warning(notes.join("; "), summary)
        })
    }

    /// Runs inside the disable transaction. Any `Err` rolls back every write.
    fn try_disable(&self, with_sync: bool, started: Instant) -> Result<Outcome> {
        let pending = self.backlog().total_outstanding()?;
        if pending > 0 {
            let err = SyncError::precondition(format!(
                "{pending} entities are pending sync; run `entsync sync` first"
            ));
            return Ok(Outcome::from_error(
                &err,
                Summary::new(pending, started.elapsed(), "disable refused"),
            ));
        }

        let mut notes = Vec::new();
        let mut flipped = false;
        if self.store.authoritative_store()? == AuthoritativeStore::LegacyAuthoritative {
            notes.push("legacy store is already authoritative");
        } else {
            self.flip_authoritative(AuthoritativeStore::LegacyAuthoritative)?;
            flipped = true;
        }

        if with_sync {
            if self.store.background_sync_enabled()? {
                self.flip_sync(false)?;
            } else {
                notes.push("sync is already disabled");
            }
        }

        let message = if flipped {
            "legacy store is now authoritative"
        } else {
            "nothing to disable"
        };
        let summary = Summary::new(0, started.elapsed(), message);
        Ok(if notes.is_empty() {
            Outcome::Success(summary)
        } else {
            Outcome::warning(notes.join("; "), summary)
        })
    }

    /// Write the flag and read it back.
    fn flip_authoritative(&self, target: AuthoritativeStore) -> Result<()> {
        self.store.set_authoritative_store(target)?;
        let observed = self.store.authoritative_store()?;
        if observed != target {
            warn!(expected = %target, observed = %observed, "authoritative flag did not persist");
            return Err(SyncError::internal(format!(
                "authoritative store could not be set to {target}"
            )));
        }
        info!(authoritative = %target, "authoritative store switched");
        Ok(())
    }

    fn flip_sync(&self, enabled: bool) -> Result<()> {
        self.store.set_background_sync_enabled(enabled)?;
        if self.store.background_sync_enabled()? != enabled {
            warn!(enabled, "background sync flag did not persist");
            return Err(SyncError::internal(format!(
                "sync could not be {}",
                if enabled { "enabled" } else { "disabled" }
            )));
        }
        info!(enabled, "background sync switched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::BTreeSet;

    use entsync_error::ErrorKind;
    use entsync_types::{Attribute, AttributeRow, LegacyEntity, NormalizedEntity};

    use super::*;
    use crate::config::PromotedField;
    use crate::extensions::{Compatibility, ExtensionEntry, StaticExtensionRegistry};
    use crate::migrator::BatchMigrator;
    use crate::store::SqliteStore;

    fn types() -> Vec<String> {
        vec!["order".to_owned()]
    }

    fn order(id: EntityId) -> LegacyEntity {
        LegacyEntity {
            id,
            entity_type: "order".to_owned(),
            status: "completed".to_owned(),
            created_at: 1,
            modified_at: 1,
            attributes: vec![Attribute::new("note", "n")],
        }
    }

    fn store_with_orders(count: i64) -> SqliteStore {
        let store = SqliteStore::open_in_memory(PromotedField::order_defaults()).unwrap();
        for id in 1..=count {
            store.put_legacy_entity(&order(id)).unwrap();
        }
        store
    }

    fn sync_all(store: &SqliteStore) {
        store.create_schema().unwrap();
        let promoted = PromotedField::order_defaults();
        let ids = store.pending_ids_after(&types(), None, 1_000).unwrap();
        BatchMigrator::new(store, &promoted).process(&ids).unwrap();
    }

    #[test]
    fn fresh_install_enables_and_creates_schema() {
        let store = store_with_orders(0);
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);
        let outcome = gate.enable(EnableOptions {
            for_new_install: true,
            with_sync: true,
        });
        assert!(outcome.is_success(), "{outcome:?}");
        assert!(store.schema_exists().unwrap());
        assert_eq!(
            store.authoritative_store().unwrap(),
            AuthoritativeStore::NormalizedAuthoritative
        );
        assert!(store.background_sync_enabled().unwrap());
    }

    #[test]
    fn pending_entities_refuse_enable_without_side_effects() {
        let store = store_with_orders(5);
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);
        let outcome = gate.enable(EnableOptions {
            with_sync: true,
            ..EnableOptions::default()
        });
        assert_eq!(outcome.failure_kind(), Some(ErrorKind::PreconditionFailed));
        assert_eq!(outcome.summary().affected, 5);
        assert!(!store.schema_exists().unwrap());
        assert!(!store.background_sync_enabled().unwrap());
        assert_eq!(
            store.authoritative_store().unwrap(),
            AuthoritativeStore::LegacyAuthoritative
        );
    }

    #[test]
    fn for_new_install_fails_fast_on_populated_store() {
        let store = store_with_orders(1);
        sync_all(&store);
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);
        let outcome = gate.enable(EnableOptions {
            for_new_install: true,
            with_sync: false,
        });
        assert_eq!(outcome.failure_kind(), Some(ErrorKind::PreconditionFailed));
    }

    #[test]
    fn all_failing_reasons_are_reported_together() {
        let store = store_with_orders(2);
        store.create_schema().unwrap();
        let registry = StaticExtensionRegistry::new(vec![ExtensionEntry {
            name: "old-reports".to_owned(),
            compatibility: Compatibility::Incompatible,
        }]);
        let gate = CutoverGate::new(&store, &registry, types(), false);
        let Outcome::Failure { kind, detail, .. } = gate.enable(EnableOptions::default()) else {
            panic!("expected failure");
        };
        assert_eq!(kind, ErrorKind::PreconditionFailed);
        assert!(detail.contains("old-reports"), "{detail}");
        assert!(detail.contains("2 entities are pending"), "{detail}");
    }

    #[test]
    fn uncertain_extensions_block_only_when_configured() {
        let store = store_with_orders(0);
        let registry = StaticExtensionRegistry::new(vec![ExtensionEntry {
            name: "maybe".to_owned(),
            compatibility: Compatibility::Uncertain,
        }]);
        let strict = CutoverGate::new(&store, &registry, types(), true);
        assert!(strict.enable(EnableOptions::default()).is_failure());
        let lenient = CutoverGate::new(&store, &registry, types(), false);
        assert!(lenient.enable(EnableOptions::default()).is_success());
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let store = store_with_orders(3);
        sync_all(&store);
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);

        assert!(gate.enable(EnableOptions::default()).is_success());
        let again = gate.enable(EnableOptions::default());
        assert!(again.is_warning(), "{again:?}");

        assert!(gate.disable(false).is_success());
        let again = gate.disable(true);
        let Outcome::Warning { reason, .. } = again else {
            panic!("expected warning, got {again:?}");
        };
        assert!(reason.contains("already authoritative"), "{reason}");
        assert!(reason.contains("sync is already disabled"), "{reason}");
    }

    #[test]
    fn disable_requires_empty_backlog() {
        let store = store_with_orders(1);
        sync_all(&store);
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);
        assert!(gate.enable(EnableOptions::default()).is_success());

        store.append_legacy_attribute(1, "note", "late", 50).unwrap();
        let outcome = gate.disable(true);
        assert_eq!(outcome.failure_kind(), Some(ErrorKind::PreconditionFailed));
        assert_eq!(
            store.authoritative_store().unwrap(),
            AuthoritativeStore::NormalizedAuthoritative
        );
    }

    #[test]
    fn status_reflects_store_state() {
        let store = store_with_orders(4);
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);
        let status = gate.status().unwrap();
        assert_eq!(status.pending, 4);
        assert!(!status.schema_exists);
        assert_eq!(status.authoritative, AuthoritativeStore::LegacyAuthoritative);
    }

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Flag {
        Authoritative,
        Sync,
    }

    /// Delegates to a real store, but writes of one flag either error or are
    /// silently lost.
    struct BrokenFlagStore {
        inner: SqliteStore,
        broken: Flag,
        write_errors: bool,
        flag_writes: Cell<u32>,
    }

    impl BrokenFlagStore {
        fn new(broken: Flag, write_errors: bool) -> Self {
            Self {
                inner: store_with_orders(0),
                broken,
                write_errors,
                flag_writes: Cell::new(0),
            }
        }

        fn broken_write(&self) -> Result<()> {
            self.flag_writes.set(self.flag_writes.get() + 1);
            if self.write_errors {
                return Err(SyncError::unavailable("settings table is locked"));
            }
            Ok(())
        }
    }

    impl LegacyStore for BrokenFlagStore {
        fn read_legacy_entity(&self, id: EntityId) -> Result<LegacyEntity> {
            self.inner.read_legacy_entity(id)
        }

        fn list_entity_ids_in_range(
            &self,
            entity_types: &[String],
            start: EntityId,
            end: EntityId,
            limit: usize,
        ) -> Result<Vec<EntityId>> {
            self.inner
                .list_entity_ids_in_range(entity_types, start, end, limit)
        }

        fn count_entities_in_range(
            &self,
            entity_types: &[String],
            start: EntityId,
            end: EntityId,
        ) -> Result<u64> {
            self.inner.count_entities_in_range(entity_types, start, end)
        }

        fn legacy_attribute_rows(
            &self,
            ids: &[EntityId],
            exclude: &BTreeSet<String>,
        ) -> Result<Vec<AttributeRow>> {
            self.inner.legacy_attribute_rows(ids, exclude)
        }
    }

    impl NormalizedStore for BrokenFlagStore {
        fn schema_exists(&self) -> Result<bool> {
            self.inner.schema_exists()
        }

        fn create_schema(&self) -> Result<()> {
            self.inner.create_schema()
        }

        fn read_normalized_entity(&self, id: EntityId) -> Result<NormalizedEntity> {
            self.inner.read_normalized_entity(id)
        }

        fn write_normalized_entity(&self, entity: &NormalizedEntity) -> Result<()> {
            self.inner.write_normalized_entity(entity)
        }

        fn delete_normalized_entity(&self, id: EntityId) -> Result<bool> {
            self.inner.delete_normalized_entity(id)
        }

        fn normalized_attribute_rows(&self, ids: &[EntityId]) -> Result<Vec<AttributeRow>> {
            self.inner.normalized_attribute_rows(ids)
        }
    }

    impl BacklogSource for BrokenFlagStore {
        fn count_pending(&self, entity_types: &[String]) -> Result<u64> {
            self.inner.count_pending(entity_types)
        }

        fn pending_ids_after(
            &self,
            entity_types: &[String],
            after: Option<EntityId>,
            limit: usize,
        ) -> Result<Vec<EntityId>> {
            self.inner.pending_ids_after(entity_types, after, limit)
        }
    }

    impl SettingsStore for BrokenFlagStore {
        fn authoritative_store(&self) -> Result<AuthoritativeStore> {
            self.inner.authoritative_store()
        }

        fn set_authoritative_store(&self, store: AuthoritativeStore) -> Result<()> {
            if self.broken == Flag::Authoritative {
                return self.broken_write();
            }
            self.inner.set_authoritative_store(store)
        }

        fn background_sync_enabled(&self) -> Result<bool> {
            self.inner.background_sync_enabled()
        }

        fn set_background_sync_enabled(&self, enabled: bool) -> Result<()> {
            if self.broken == Flag::Sync {
                return self.broken_write();
            }
            self.inner.set_background_sync_enabled(enabled)
        }
    }

    impl Transactional for BrokenFlagStore {
        fn in_transaction<T, F>(&self, work: F) -> Result<T>
        where
            F: FnOnce() -> Result<T>,
        {
            self.inner.in_transaction(work)
        }
    }

    fn assert_untouched(store: &BrokenFlagStore) {
        assert_eq!(store.flag_writes.get(), 1);
        assert_eq!(
            store.authoritative_store().unwrap(),
            AuthoritativeStore::LegacyAuthoritative
        );
        assert!(!store.background_sync_enabled().unwrap());
        assert!(!store.schema_exists().unwrap());
    }

    #[test]
    fn failed_flag_write_rolls_back_schema_and_sync() {
        let store = BrokenFlagStore::new(Flag::Authoritative, true);
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);
        let outcome = gate.enable(EnableOptions {
            for_new_install: true,
            with_sync: true,
        });
        assert_eq!(outcome.failure_kind(), Some(ErrorKind::StoreUnavailable));
        assert_untouched(&store);
    }

    #[test]
    fn unconfirmed_flag_write_rolls_back_schema_and_sync() {
        let store = BrokenFlagStore::new(Flag::Authoritative, false);
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);
        let Outcome::Failure { kind, detail, .. } = gate.enable(EnableOptions {
            for_new_install: false,
            with_sync: true,
        }) else {
            panic!("expected failure");
        };
        assert_eq!(kind, ErrorKind::Internal);
        assert!(detail.contains("NORMALIZED_AUTHORITATIVE"), "{detail}");
        assert_untouched(&store);
    }

    #[test]
    fn failed_sync_write_rolls_back_disable() {
        let store = BrokenFlagStore::new(Flag::Sync, true);
        store.inner.create_schema().unwrap();
        store
            .inner
            .set_authoritative_store(AuthoritativeStore::NormalizedAuthoritative)
            .unwrap();
        store.inner.set_background_sync_enabled(true).unwrap();
        let registry = StaticExtensionRegistry::default();
        let gate = CutoverGate::new(&store, &registry, types(), false);

        let outcome = gate.disable(true);
        assert_eq!(outcome.failure_kind(), Some(ErrorKind::StoreUnavailable));
        assert_eq!(
            store.authoritative_store().unwrap(),
            AuthoritativeStore::NormalizedAuthoritative
        );
        assert!(store.background_sync_enabled().unwrap());
    }
}
