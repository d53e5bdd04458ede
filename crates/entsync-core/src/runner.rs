//! Batch drivers behind the `count-pending`, `sync` and `verify` commands.
//!
//! Drivers never return `Err`: every failure is folded into an [`Outcome`]
//! carrying whatever progress was made before it.

use std::time::Instant;

use entsync_error::{ErrorKind, Result, SyncError};
use entsync_types::{AuthoritativeStore, EntityId, Outcome, Summary, VerificationReport};
use tracing::{info, warn};

use crate::backlog::BacklogTracker;
use crate::config::{EntsyncConfig, effective_batch_size};
use crate::migrator::BatchMigrator;
use crate::progress::{Phase, ProgressEvent, ProgressObserver};
use crate::store::{BacklogSource, LegacyStore, NormalizedStore, SettingsStore, Transactional};
use crate::verify::VerificationEngine;

/// Everything a driver needs from the store.
pub trait EntityStore:
    LegacyStore + NormalizedStore + BacklogSource + SettingsStore + Transactional
{
}

impl<T> EntityStore for T where
    T: LegacyStore + NormalizedStore + BacklogSource + SettingsStore + Transactional
{
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Loop detection
// ---------------------------------------------------------------------------

/// Detects range scans that stop making progress.
///
/// Fed the remaining count after every pass; a pass that leaves the count
/// exactly where it was is fatal.
#[derive(Debug, Clone, Copy)]
pub struct ScanGuard {
    remaining: u64,
}

impl ScanGuard {
    #[must_use]
    pub const fn new(remaining: u64) -> Self {
        Self { remaining }
    }

    pub fn advance(&mut self, remaining: u64) -> Result<()> {
        if remaining == self.remaining {
            return Err(SyncError::InfiniteLoopDetected { remaining });
        }
        self.remaining = remaining;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// count-pending
// ---------------------------------------------------------------------------

pub fn count_pending<S: BacklogSource>(store: &S, entity_types: &[String]) -> Outcome {
    let started = Instant::now();
    match BacklogTracker::new(store, entity_types.to_vec()).pending_count() {
        Ok(pending) => Outcome::Success(Summary::new(
            pending,
            started.elapsed(),
            format!("{pending} entities pending sync"),
        )),
        Err(err) => Outcome::from_error(&err, Summary::new(0, started.elapsed(), "count failed")),
    }
}

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

/// Drain the backlog in batches of `batch_size` (0 means the default).
pub fn run_sync<S: EntityStore>(
    store: &S,
    config: &EntsyncConfig,
    batch_size: usize,
    observer: &mut dyn ProgressObserver,
) -> Outcome {
    let started = Instant::now();
    let mut state = SyncState::default();
    match sync_batches(store, config, batch_size, observer, started, &mut state) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, processed = state.processed, "sync aborted");
            Outcome::from_error(
                &err,
                Summary::new(state.processed, started.elapsed(), "sync aborted")
                    .with_failed_ids(state.failed),
            )
        }
    }
}

#[derive(Debug, Default)]
struct SyncState {
    processed: u64,
    failed: Vec<EntityId>,
}

fn sync_batches<S: EntityStore>(
    store: &S,
    config: &EntsyncConfig,
    batch_size: usize,
    observer: &mut dyn ProgressObserver,
    started: Instant,
    state: &mut SyncState,
) -> Result<Outcome> {
    if store.authoritative_store()? == AuthoritativeStore::NormalizedAuthoritative {
        return Err(SyncError::precondition(
            "the normalized store is authoritative; legacy to normalized sync is disabled",
        ));
    }
    if !store.schema_exists()? {
        warn!("normalized schema does not exist, creating");
        store.create_schema()?;
    }

    let batch_size = effective_batch_size(batch_size);
    let tracker = BacklogTracker::new(store, config.sync.entity_types.clone());
    let total = tracker.pending_count()?;
    if total == 0 {
        return Ok(Outcome::warning(
            "no entities to sync",
            Summary::new(0, started.elapsed(), "backlog is empty"),
        ));
    }
    info!(total, batch_size, "sync starting");
    observer.on_event(&ProgressEvent::PhaseStart {
        phase: Phase::Sync,
        total,
    });

    let migrator = BatchMigrator::new(store, &config.promoted_fields);
    let mut cursor = None;
    let mut batch = 0;
    let mut handed_out: u64 = 0;
    loop {
        let ids = tracker.next_batch_after(cursor, batch_size)?;
        let Some(&last) = ids.last() else {
            break;
        };
        cursor = Some(last);
        batch += 1;
        handed_out += len_u64(ids.len());

        let report = migrator.process(&ids)?;
        state.processed += report.processed;
        state.failed.extend(report.failed_ids());

        observer.on_event(&ProgressEvent::Batch {
            phase: Phase::Sync,
            batch,
            size: ids.len(),
            processed: state.processed,
            failed: report.failed.len(),
            // Estimated from the starting backlog; a full pending count per
            // batch would rescan both stores.
            remaining: total.saturating_sub(handed_out),
            elapsed_ms: elapsed_ms(started),
        });
    }

    observer.on_event(&ProgressEvent::PhaseComplete {
        phase: Phase::Sync,
        processed: state.processed,
        elapsed_ms: elapsed_ms(started),
    });

    let summary = Summary::new(
        state.processed,
        started.elapsed(),
        format!("synced {} entities", state.processed),
    );
    if !state.failed.is_empty() {
        let failed = std::mem::take(&mut state.failed);
        return Ok(Outcome::failure(
            ErrorKind::PerEntityMigrationFailure,
            format!("{} entities could not be migrated", failed.len()),
            summary.with_failed_ids(failed),
        ));
    }
    if state.processed == 0 {
        return Ok(Outcome::warning("no entities were synced", summary));
    }
    Ok(Outcome::Success(summary))
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

/// Options of one verification run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyRequest {
    /// 0 means the default batch size.
    pub batch_size: usize,
    pub start: EntityId,
    /// Inclusive upper bound; unbounded when `None`.
    pub end: Option<EntityId>,
    /// Restrict to these types; must overlap the configured ones.
    pub entity_types: Option<Vec<String>>,
    /// Log every divergence as its batch is verified.
    pub verbose: bool,
    /// Re-migrate divergent entities and verify them again.
    pub remigrate: bool,
}

/// Outcome of a verification run plus the divergences left at its end.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyRun {
    pub outcome: Outcome,
    pub divergences: VerificationReport,
}

/// Walk `[start, end]` in ID order, verifying one batch at a time.
pub fn run_verification<S: EntityStore>(
    store: &S,
    config: &EntsyncConfig,
    request: &VerifyRequest,
    observer: &mut dyn ProgressObserver,
) -> VerifyRun {
    let started = Instant::now();
    let mut divergences = VerificationReport::new();
    let mut verified = 0;
    match verify_range(
        store,
        config,
        request,
        observer,
        started,
        &mut divergences,
        &mut verified,
    ) {
        Ok(outcome) => VerifyRun {
            outcome,
            divergences,
        },
        Err(err) => {
            warn!(error = %err, verified, "verification aborted");
            let failed = divergences.keys().copied().collect();
            VerifyRun {
                outcome: Outcome::from_error(
                    &err,
                    Summary::new(verified, started.elapsed(), "verification aborted")
                        .with_failed_ids(failed),
                ),
                divergences,
            }
        }
    }
}

/// Requested types that are also configured, in configured order.
fn resolve_entity_types(config: &EntsyncConfig, requested: Option<&[String]>) -> Result<Vec<String>> {
    let configured = &config.sync.entity_types;
    let Some(requested) = requested else {
        return Ok(configured.clone());
    };
    let types: Vec<String> = configured
        .iter()
        .filter(|t| requested.contains(t))
        .cloned()
        .collect();
    if types.is_empty() {
        return Err(SyncError::precondition(format!(
            "entity types must be among the configured types: {}",
            configured.join(", ")
        )));
    }
    Ok(types)
}

fn verify_range<S: EntityStore>(
    store: &S,
    config: &EntsyncConfig,
    request: &VerifyRequest,
    observer: &mut dyn ProgressObserver,
    started: Instant,
    divergences: &mut VerificationReport,
    verified: &mut u64,
) -> Result<Outcome> {
    if !store.schema_exists()? {
        return Err(SyncError::SchemaMissing {
            table: crate::store::tables::ENTITIES.to_owned(),
        });
    }
    let types = resolve_entity_types(config, request.entity_types.as_deref())?;
    if request.remigrate
        && store.authoritative_store()? == AuthoritativeStore::NormalizedAuthoritative
    {
        return Err(SyncError::precondition(
            "re-migration is not allowed while the normalized store is authoritative",
        ));
    }

    let batch_size = effective_batch_size(request.batch_size);
    let end = request.end.unwrap_or(EntityId::MAX);
    let mut start = request.start;

    let engine = VerificationEngine::new(store, &config.promoted_fields, &config.verify);
    let migrator = BatchMigrator::new(store, &config.promoted_fields);

    let mut remaining = store.count_entities_in_range(&types, start, end)?;
    if remaining == 0 {
        info!(start, end, "no entities in range, nothing to verify");
        return Ok(Outcome::warning(
            "no entities to verify",
            Summary::new(0, started.elapsed(), "nothing to verify"),
        ));
    }
    let mut guard = ScanGuard::new(remaining);
    info!(
        start,
        end,
        remaining,
        batch_size,
        remigrate = request.remigrate,
        "verification starting"
    );
    observer.on_event(&ProgressEvent::PhaseStart {
        phase: Phase::Verify,
        total: remaining,
    });

    let mut batch = 0;
    while remaining > 0 {
        let ids = store.list_entity_ids_in_range(&types, start, end, batch_size)?;
        batch += 1;

        let mut report = engine.verify(&ids)?;
        if request.verbose {
            for record in report.values().flatten() {
                info!(
                    entity = record.entity_id,
                    kind = ?record.kind,
                    key = %record.key,
                    legacy = ?record.legacy_values,
                    normalized = ?record.normalized_values,
                    "divergence"
                );
            }
        }

        if request.remigrate && !report.is_empty() {
            let failing: Vec<EntityId> = report.keys().copied().collect();
            info!(batch, entities = failing.len(), "re-migrating divergent entities");
            migrator.process(&failing)?;
            report = engine.verify(&failing)?;
            if report.is_empty() {
                info!(batch, "re-migration resolved every divergence");
            } else {
                warn!(batch, still_divergent = report.len(), "divergences remain after re-migration");
            }
        }

        let batch_failed = report.len();
        divergences.extend(report);
        *verified += len_u64(ids.len());

        if let Some(&last) = ids.last() {
            start = last.saturating_add(1);
        }
        remaining = if last_is_end(&ids, end) {
            0
        } else {
            store.count_entities_in_range(&types, start, end)?
        };
        observer.on_event(&ProgressEvent::Batch {
            phase: Phase::Verify,
            batch,
            size: ids.len(),
            processed: *verified,
            failed: batch_failed,
            remaining,
            elapsed_ms: elapsed_ms(started),
        });
        guard.advance(remaining)?;
    }

    observer.on_event(&ProgressEvent::PhaseComplete {
        phase: Phase::Verify,
        processed: *verified,
        elapsed_ms: elapsed_ms(started),
    });

    let summary = Summary::new(
        *verified,
        started.elapsed(),
        format!("verified {verified} entities"),
    );
    if divergences.is_empty() {
        return Ok(Outcome::Success(summary));
    }
    let failed: Vec<EntityId> = divergences.keys().copied().collect();
    Ok(Outcome::failure(
        ErrorKind::VerificationMismatch,
        format!(
            "{} entities diverge: {}",
            failed.len(),
            failed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        summary.with_failed_ids(failed),
    ))
}

/// The batch reached the inclusive upper bound, so nothing can remain.
fn last_is_end(ids: &[EntityId], end: EntityId) -> bool {
    ids.last() == Some(&end)
}
