//! Error types for entsync.
//!
//! Every fallible operation in the workspace returns [`Result<T>`]. Callers that
//! need to branch on failure class use [`SyncError::kind`], which maps onto the
//! error kinds surfaced in command outcomes.

use serde::{Deserialize, Serialize};

/// Failure class of a [`SyncError`], also used to tag failed outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient infrastructure failure; retry the batch.
    StoreUnavailable,
    /// Normalized schema does not exist yet.
    SchemaMissing,
    /// One entity could not be migrated; the batch continued.
    PerEntityMigrationFailure,
    /// Verification found divergent entities.
    VerificationMismatch,
    /// Cutover (or another guarded operation) refused; nothing was mutated.
    PreconditionFailed,
    /// A range scan stopped making progress.
    InfiniteLoopDetected,
    /// Invalid configuration or command-line input.
    Config,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StoreUnavailable => "store_unavailable",
            Self::SchemaMissing => "schema_missing",
            Self::PerEntityMigrationFailure => "per_entity_migration_failure",
            Self::VerificationMismatch => "verification_mismatch",
            Self::PreconditionFailed => "precondition_failed",
            Self::InfiniteLoopDetected => "infinite_loop_detected",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary error type for entsync operations.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The backing store could not be reached (busy, locked, I/O, cannot open).
    #[error("store unavailable: {detail}")]
    StoreUnavailable { detail: String },

    /// A required table of the normalized store is absent.
    #[error("schema missing: table `{table}` does not exist")]
    SchemaMissing { table: String },

    /// The requested entity has no row in the store that was read.
    #[error("entity {id} not found")]
    NotFound { id: i64 },

    /// Legacy data for one entity cannot be mapped onto the normalized schema.
    #[error("entity {id} is malformed: {detail}")]
    MalformedEntity { id: i64, detail: String },

    /// One or more preconditions refused the operation.
    #[error("precondition failed: {}", .reasons.join("; "))]
    PreconditionFailed { reasons: Vec<String> },

    /// A range scan made no progress between two passes.
    #[error("infinite loop detected: {remaining} entities remain and the last pass consumed none")]
    InfiniteLoopDetected { remaining: u64 },

    /// Invalid configuration.
    #[error("configuration error: {detail}")]
    Config { detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            detail: detail.into(),
        }
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config {
            detail: detail.into(),
        }
    }

    pub fn malformed(id: i64, detail: impl Into<String>) -> Self {
        Self::MalformedEntity {
            id,
            detail: detail.into(),
        }
    }

    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            reasons: vec![reason.into()],
        }
    }

    /// Map this error onto its failure class.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::SchemaMissing { .. } => ErrorKind::SchemaMissing,
            Self::NotFound { .. } | Self::MalformedEntity { .. } => {
                ErrorKind::PerEntityMigrationFailure
            }
            Self::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            Self::InfiniteLoopDetected { .. } => ErrorKind::InfiniteLoopDetected,
            Self::Config { .. } => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same batch later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, SyncError>;
