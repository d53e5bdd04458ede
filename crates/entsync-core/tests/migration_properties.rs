//! Migration guarantees checked against a real SQLite store.

use entsync_core::config::VerifySettings;
use entsync_core::{
    BacklogSource, BacklogTracker, BatchMigrator, CutoverGate, EnableOptions, LegacyStore,
    NormalizedStore, PromotedField, SettingsStore, SqliteStore, StaticExtensionRegistry,
    VerificationEngine,
};
use entsync_error::ErrorKind;
use entsync_types::{Attribute, AuthoritativeStore, DivergenceKind, EntityId, LegacyEntity};
use proptest::prelude::*;

fn types() -> Vec<String> {
    vec!["order".to_owned()]
}

fn order(id: EntityId, modified_at: i64, attributes: Vec<Attribute>) -> LegacyEntity {
    LegacyEntity {
        id,
        entity_type: "order".to_owned(),
        status: "processing".to_owned(),
        created_at: 1_700_000_000,
        modified_at,
        attributes,
    }
}

fn standard_attributes(id: EntityId) -> Vec<Attribute> {
    vec![
        Attribute::new("_order_total", format!("{id}.25")),
        Attribute::new("_order_currency", "EUR"),
        Attribute::new("_billing_email", format!("buyer{id}@example.com")),
        Attribute::new("note", "first"),
        Attribute::new("note", "second"),
        Attribute::new("_edit_lock", "1700000000:1"),
    ]
}

fn seeded_store(count: i64) -> SqliteStore {
    let store = SqliteStore::open_in_memory(PromotedField::order_defaults()).unwrap();
    for id in 1..=count {
        store
            .put_legacy_entity(&order(id, 100, standard_attributes(id)))
            .unwrap();
    }
    store.create_schema().unwrap();
    store
}

#[test]
fn test_reprocessing_does_not_duplicate_attribute_rows() {
    let store = seeded_store(1);
    let promoted = PromotedField::order_defaults();
    let migrator = BatchMigrator::new(&store, &promoted);

    migrator.process(&[1]).unwrap();
    let first = store.normalized_attribute_count(1).unwrap();
    let snapshot = store.read_normalized_entity(1).unwrap();

    migrator.process(&[1]).unwrap();
    migrator.process(&[1]).unwrap();
    assert_eq!(store.normalized_attribute_count(1).unwrap(), first);
    assert_eq!(store.read_normalized_entity(1).unwrap(), snapshot);
    // Promoted keys are columns, not attribute rows.
    assert_eq!(first, 3);
}

#[test]
fn test_processed_entities_verify_clean() {
    let store = seeded_store(20);
    let promoted = PromotedField::order_defaults();
    let ids: Vec<EntityId> = (1..=20).collect();
    let report = BatchMigrator::new(&store, &promoted).process(&ids).unwrap();
    assert_eq!(report.processed, 20);

    let engine = VerificationEngine::new(&store, &promoted, &VerifySettings::default());
    let divergences = engine.verify(&ids).unwrap();
    assert!(divergences.is_empty(), "{divergences:?}");
}

#[test]
fn test_pending_count_strictly_decreases_per_batch() {
    let store = seeded_store(23);
    let promoted = PromotedField::order_defaults();
    let tracker = BacklogTracker::new(&store, types());
    let migrator = BatchMigrator::new(&store, &promoted);

    let mut previous = tracker.pending_count().unwrap();
    assert_eq!(previous, 23);
    while previous > 0 {
        let batch = tracker.next_batch(5).unwrap();
        let report = migrator.process(&batch).unwrap();
        assert_eq!(report.processed, u64::try_from(batch.len()).unwrap());
        let now = tracker.pending_count().unwrap();
        assert!(now < previous, "pending went from {previous} to {now}");
        previous = now;
    }
}

#[test]
fn test_failed_entity_keeps_pending_count_level() {
    let store = seeded_store(0);
    store
        .put_legacy_entity(&order(
            1,
            100,
            vec![Attribute::new("_customer_user", "not-a-number")],
        ))
        .unwrap();
    let promoted = PromotedField::order_defaults();
    let tracker = BacklogTracker::new(&store, types());

    let before = tracker.pending_count().unwrap();
    let report = BatchMigrator::new(&store, &promoted)
        .process(&tracker.next_batch(10).unwrap())
        .unwrap();
    assert_eq!(report.failed_ids(), vec![1]);
    assert_eq!(tracker.pending_count().unwrap(), before);
}

#[test]
fn test_duplicate_attribute_rows_are_a_divergence() {
    let store = seeded_store(0);
    store
        .put_legacy_entity(&order(
            1,
            100,
            vec![
                Attribute::new("k", "a"),
                Attribute::new("k", "a"),
                Attribute::new("k", "b"),
            ],
        ))
        .unwrap();
    let promoted = PromotedField::order_defaults();
    BatchMigrator::new(&store, &promoted).process(&[1]).unwrap();

    let mut normalized = store.read_normalized_entity(1).unwrap();
    normalized.attributes = vec![Attribute::new("k", "a"), Attribute::new("k", "b")];
    store.write_normalized_entity(&normalized).unwrap();

    let divergences = VerificationEngine::new(&store, &promoted, &VerifySettings::default())
        .verify(&[1])
        .unwrap();
    let records = &divergences[&1];
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, DivergenceKind::Attribute);
    assert_eq!(records[0].key, "k");
    assert_eq!(records[0].legacy_values.len(), 3);
    assert_eq!(records[0].normalized_values.len(), 2);
}

#[test]
fn test_cutover_gating_on_fresh_and_busy_installs() {
    let registry = StaticExtensionRegistry::default();

    let fresh = SqliteStore::open_in_memory(PromotedField::order_defaults()).unwrap();
    let outcome = CutoverGate::new(&fresh, &registry, types(), false).enable(EnableOptions::default());
    assert!(outcome.is_success(), "{outcome:?}");
    assert!(fresh.schema_exists().unwrap());
    assert_eq!(
        fresh.authoritative_store().unwrap(),
        AuthoritativeStore::NormalizedAuthoritative
    );

    let busy = SqliteStore::open_in_memory(PromotedField::order_defaults()).unwrap();
    for id in 1..=5 {
        busy.put_legacy_entity(&order(id, 1, Vec::new())).unwrap();
    }
    let gate = CutoverGate::new(&busy, &registry, types(), false);
    let outcome = gate.enable(EnableOptions::default());
    assert_eq!(outcome.failure_kind(), Some(ErrorKind::PreconditionFailed));
    assert_eq!(
        busy.authoritative_store().unwrap(),
        AuthoritativeStore::LegacyAuthoritative
    );
    assert!(!busy.schema_exists().unwrap());
}

#[test]
fn test_interrupted_run_resumes_with_exactly_the_remainder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shop.db");
    let promoted = PromotedField::order_defaults();

    {
        let store = SqliteStore::open(&path, promoted.clone()).unwrap();
        for id in 1..=1200 {
            store.put_legacy_entity(&order(id, 10, Vec::new())).unwrap();
        }
        store.create_schema().unwrap();

        let tracker = BacklogTracker::new(&store, types());
        let migrator = BatchMigrator::new(&store, &promoted);
        for _ in 0..2 {
            let batch = tracker.next_batch(500).unwrap();
            assert_eq!(batch.len(), 500);
            migrator.process(&batch).unwrap();
        }
        assert_eq!(tracker.pending_count().unwrap(), 200);
        // Process exits here.
    }

    let store = SqliteStore::open(&path, promoted.clone()).unwrap();
    let tracker = BacklogTracker::new(&store, types());
    let batch = tracker.next_batch(500).unwrap();
    assert_eq!(batch.len(), 200);
    assert_eq!(batch.first(), Some(&1001));
    let report = BatchMigrator::new(&store, &promoted).process(&batch).unwrap();
    assert_eq!(report.processed, 200);
    assert_eq!(tracker.pending_count().unwrap(), 0);
    assert!(tracker.next_batch(500).unwrap().is_empty());
}

#[test]
fn test_three_cycles_drain_twelve_hundred() {
    let store = SqliteStore::open_in_memory(PromotedField::order_defaults()).unwrap();
    for id in 1..=1200 {
        store.put_legacy_entity(&order(id, 10, Vec::new())).unwrap();
    }
    store.create_schema().unwrap();
    let promoted = PromotedField::order_defaults();
    let tracker = BacklogTracker::new(&store, types());
    let migrator = BatchMigrator::new(&store, &promoted);

    let mut sizes = Vec::new();
    for _ in 0..3 {
        let batch = tracker.next_batch(500).unwrap();
        sizes.push(batch.len());
        migrator.process(&batch).unwrap();
    }
    assert_eq!(sizes, vec![500, 500, 200]);
    assert_eq!(tracker.total_outstanding().unwrap(), 0);
}

#[test]
fn test_legacy_write_after_sync_reenters_backlog() {
    let store = seeded_store(3);
    let promoted = PromotedField::order_defaults();
    let tracker = BacklogTracker::new(&store, types());
    let migrator = BatchMigrator::new(&store, &promoted);
    migrator.process(&tracker.next_batch(10).unwrap()).unwrap();
    assert_eq!(tracker.pending_count().unwrap(), 0);

    store.append_legacy_attribute(2, "note", "third", 200).unwrap();
    assert_eq!(tracker.next_batch(10).unwrap(), vec![2]);
    migrator.process(&[2]).unwrap();
    assert_eq!(tracker.pending_count().unwrap(), 0);
    assert_eq!(store.read_normalized_entity(2).unwrap().synced_at, 200);
}

#[test]
fn test_deleted_legacy_entity_is_synced_as_deletion() {
    let store = seeded_store(2);
    let promoted = PromotedField::order_defaults();
    let tracker = BacklogTracker::new(&store, types());
    let migrator = BatchMigrator::new(&store, &promoted);
    migrator.process(&tracker.next_batch(10).unwrap()).unwrap();

    store.delete_legacy_entity(1).unwrap();
    assert_eq!(tracker.next_batch(10).unwrap(), vec![1]);
    let report = migrator.process(&[1]).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(tracker.pending_count().unwrap(), 0);
    assert_eq!(
        store
            .list_entity_ids_in_range(&types(), 0, EntityId::MAX, 10)
            .unwrap(),
        vec![2]
    );
    assert_eq!(store.count_pending(&types()).unwrap(), 0);
}

fn attribute_strategy() -> impl Strategy<Value = Vec<Attribute>> {
    let key = prop::sample::select(vec!["note", "tag", "k", "_edit_lock"]);
    let value = prop::sample::select(vec!["", "x", "y", "gift wrap"]);
    prop::collection::vec((key, value), 0..12)
        .prop_map(|pairs| pairs.into_iter().map(|(k, v)| Attribute::new(k, v)).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_migrated_entity_has_no_divergence(
        attributes in attribute_strategy(),
        total in prop::option::of(0u32..100_000),
    ) {
        let store = SqliteStore::open_in_memory(PromotedField::order_defaults()).unwrap();
        store.create_schema().unwrap();
        let mut attributes = attributes;
        if let Some(cents) = total {
            attributes.push(Attribute::new("_order_total", format!("{}.{:02}", cents / 100, cents % 100)));
        }
        store.put_legacy_entity(&order(9, 5, attributes)).unwrap();

        let promoted = PromotedField::order_defaults();
        let report = BatchMigrator::new(&store, &promoted).process(&[9]).unwrap();
        prop_assert_eq!(report.processed, 1);
        let divergences = VerificationEngine::new(&store, &promoted, &VerifySettings::default())
            .verify(&[9])
            .unwrap();
        prop_assert!(divergences.is_empty(), "{:?}", divergences);
    }
}
