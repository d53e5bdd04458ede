//! Sync backlog tracking.
//!
//! The backlog is never cached: every call re-evaluates the pending predicate
//! against current rows, so concurrent legacy writes are picked up by the very
//! next batch.

use entsync_error::Result;
use entsync_types::EntityId;
use tracing::debug;

use crate::config::effective_batch_size;
use crate::store::BacklogSource;

/// Pending-entity view over a [`BacklogSource`], scoped to a set of entity types.
#[derive(Debug)]
pub struct BacklogTracker<'a, S> {
    source: &'a S,
    entity_types: Vec<String>,
}

impl<'a, S: BacklogSource> BacklogTracker<'a, S> {
    pub fn new(source: &'a S, entity_types: Vec<String>) -> Self {
        Self {
            source,
            entity_types,
        }
    }

    #[must_use]
    pub fn entity_types(&self) -> &[String] {
        &self.entity_types
    }

    /// Number of entities that currently need a migration pass.
    pub fn pending_count(&self) -> Result<u64> {
        let pending = self.source.count_pending(&self.entity_types)?;
        debug!(pending, "pending count evaluated");
        Ok(pending)
    }

    /// Up to `n` pending IDs, ascending. `n == 0` means the default batch size.
    ///
    /// Deterministic for a given backlog state, so a restarted run picks up
    /// exactly where the previous one stopped.
    pub fn next_batch(&self, n: usize) -> Result<Vec<EntityId>> {
        self.next_batch_after(None, n)
    }

    /// Like [`next_batch`](Self::next_batch), restricted to IDs above `cursor`.
    pub fn next_batch_after(&self, cursor: Option<EntityId>, n: usize) -> Result<Vec<EntityId>> {
        let limit = effective_batch_size(n);
        let ids = self
            .source
            .pending_ids_after(&self.entity_types, cursor, limit)?;
        debug!(
            cursor = ?cursor,
            limit,
            fetched = ids.len(),
            "next backlog batch"
        );
        Ok(ids)
    }

    /// Outstanding work before a cutover. Read-only.
    pub fn total_outstanding(&self) -> Result<u64> {
        self.source.count_pending(&self.entity_types)
    }
}
