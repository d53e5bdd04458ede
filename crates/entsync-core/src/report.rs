//! Serializable per-command run reports.
//!
//! `--json` prints [`RunReport`] as-is; terminal output uses
//! [`RunReport::human_line`].

use entsync_error::{ErrorKind, Result, SyncError};
use entsync_types::{DivergenceRecord, EntityId, Outcome, VerificationReport};
use serde::Serialize;

use crate::cutover::CutoverStatus;

/// JSON schema version for the run report format.
///
/// Consumers of `--json` output should check this before reading any field.
pub const REPORT_SCHEMA_V1: &str = "entsync.report.v1";

/// Machine-readable result of one command invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub schema_version: String,
    pub command: String,
    /// `success`, `warning` or `failure`.
    pub outcome: String,
    /// Failure class, present only for failures.
    pub kind: Option<ErrorKind>,
    /// Warning reason or failure detail.
    pub reason: Option<String>,
    pub message: String,
    pub affected: u64,
    pub elapsed_ms: u64,
    pub failed_ids: Vec<EntityId>,
    pub divergences: Vec<DivergenceRecord>,
    pub status: Option<CutoverStatus>,
}

impl RunReport {
    pub fn from_outcome(command: &str, outcome: &Outcome) -> Self {
        let summary = outcome.summary();
        let reason = match outcome {
            Outcome::Success(_) => None,
            Outcome::Warning { reason, .. } => Some(reason.clone()),
            Outcome::Failure { detail, .. } => Some(detail.clone()),
        };
        Self {
            schema_version: REPORT_SCHEMA_V1.to_owned(),
            command: command.to_owned(),
            outcome: outcome.label().to_owned(),
            kind: outcome.failure_kind(),
            reason,
            message: summary.message.clone(),
            affected: summary.affected,
            elapsed_ms: u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
            failed_ids: summary.failed_ids.clone(),
            divergences: Vec::new(),
            status: None,
        }
    }

    #[must_use]
    pub fn with_divergences(mut self, report: &VerificationReport) -> Self {
        self.divergences = report.values().flatten().cloned().collect();
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: CutoverStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| SyncError::internal(format!("report serialization failed: {err}")))
    }

    /// One-line summary for terminal output.
    #[must_use]
    pub fn human_line(&self) -> String {
        let mut line = format!(
            "[{}] {}: {} ({} affected, {} ms)",
            self.outcome, self.command, self.message, self.affected, self.elapsed_ms
        );
        if let Some(reason) = &self.reason {
            line.push_str(" - ");
            line.push_str(reason);
        }
        if !self.failed_ids.is_empty() && self.kind != Some(ErrorKind::VerificationMismatch) {
            let ids: Vec<String> = self.failed_ids.iter().map(ToString::to_string).collect();
            line.push_str(&format!(" [failed ids: {}]", ids.join(", ")));
        }
        line
    }
}
