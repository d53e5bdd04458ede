//! Heartbeat signals emitted by long-running batch loops.
//!
//! Drivers report after every batch so an operator (or a supervising process)
//! can tell a slow run from a stalled one.

use std::fmt;

use tracing::info;

/// Which driver emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sync,
    Verify,
}

impl Phase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Verify => "verify",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A driver started with `total` entities in scope.
    PhaseStart { phase: Phase, total: u64 },

    /// One batch finished.
    Batch {
        phase: Phase,
        /// 1-based batch number within the run.
        batch: usize,
        size: usize,
        /// Entities handled successfully so far in this run.
        processed: u64,
        /// Entities that failed or diverged in this batch.
        failed: usize,
        /// Entities still in scope after this batch. Sync reports the
        /// starting backlog minus the entities handed out so far; entities
        /// that enter the backlog mid-run are not counted.
        remaining: u64,
        elapsed_ms: u64,
    },

    /// The driver finished, successfully or not.
    PhaseComplete {
        phase: Phase,
        processed: u64,
        elapsed_ms: u64,
    },
}

/// Receives heartbeat events from the drivers.
pub trait ProgressObserver {
    fn on_event(&mut self, event: &ProgressEvent);
}

impl<F: FnMut(&ProgressEvent)> ProgressObserver for F {
    fn on_event(&mut self, event: &ProgressEvent) {
        self(event);
    }
}

/// Writes every event as a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressObserver for TracingProgress {
    fn on_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::PhaseStart { phase, total } => {
                info!(phase = %phase, total, "starting");
            }
            ProgressEvent::Batch {
                phase,
                batch,
                size,
                processed,
                failed,
                remaining,
                elapsed_ms,
            } => {
                info!(
                    phase = %phase,
                    batch,
                    size,
                    processed,
                    failed,
                    remaining,
                    elapsed_ms,
                    "heartbeat"
                );
            }
            ProgressEvent::PhaseComplete {
                phase,
                processed,
                elapsed_ms,
            } => {
                info!(phase = %phase, processed, elapsed_ms, "finished");
            }
        }
    }
}
