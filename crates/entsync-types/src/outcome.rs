//! Three-way result shape shared by every batch and cutover operation.

use std::time::Duration;

use entsync_error::{ErrorKind, SyncError};

use crate::entity::EntityId;

/// Counts and timing reported by every operation, whatever its outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// Entities touched (synced, verified, counted) by the operation.
    pub affected: u64,
    pub elapsed: Duration,
    /// Offending entity IDs, ascending.
    pub failed_ids: Vec<EntityId>,
    /// Human-readable one-liner.
    pub message: String,
}

impl Summary {
    pub fn new(affected: u64, elapsed: Duration, message: impl Into<String>) -> Self {
        Self {
            affected,
            elapsed,
            failed_ids: Vec::new(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_failed_ids(mut self, mut ids: Vec<EntityId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        self.failed_ids = ids;
        self
    }
}

/// Outcome of an operation.
///
/// `Warning` covers no-ops ("nothing to do", "already enabled"); `Failure`
/// covers refused preconditions and fatal conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Summary),
    Warning {
        reason: String,
        summary: Summary,
    },
    Failure {
        kind: ErrorKind,
        detail: String,
        summary: Summary,
    },
}

impl Outcome {
    pub fn warning(reason: impl Into<String>, summary: Summary) -> Self {
        Self::Warning {
            reason: reason.into(),
            summary,
        }
    }

    pub fn failure(kind: ErrorKind, detail: impl Into<String>, summary: Summary) -> Self {
        Self::Failure {
            kind,
            detail: detail.into(),
            summary,
        }
    }

    /// Fold an error into a failed outcome with the given partial summary.
    #[must_use]
    pub fn from_error(err: &SyncError, summary: Summary) -> Self {
        Self::failure(err.kind(), err.to_string(), summary)
    }

    #[must_use]
    pub fn summary(&self) -> &Summary {
        match self {
            Self::Success(summary)
            | Self::Warning { summary, .. }
            | Self::Failure { summary, .. } => summary,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub const fn is_warning(&self) -> bool {
        matches!(self, Self::Warning { .. })
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    /// Failure kind, if this is a failure.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Failure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Warning { .. } => "warning",
            Self::Failure { .. } => "failure",
        }
    }
}
