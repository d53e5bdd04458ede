//! Resumable legacy-to-normalized entity migration.
//!
//! The pieces, leaf to root:
//!
//! - [`backlog`]: which entities are stale, in deterministic ID batches.
//! - [`migrator`]: per-entity transactional copy into the normalized store.
//! - [`verify`]: read-only field and attribute-bag comparison.
//! - [`cutover`]: guarded switch of the authoritative store.
//! - [`runner`]: the batch loops that drive all of the above.
//!
//! Storage is reached only through the traits in [`store`]; [`store::SqliteStore`]
//! implements all of them over one SQLite file.

pub mod backlog;
pub mod config;
pub mod cutover;
pub mod extensions;
pub mod migrator;
pub mod progress;
pub mod report;
pub mod runner;
pub mod store;
pub mod verify;

pub use backlog::BacklogTracker;
pub use config::{
    DEFAULT_BATCH_SIZE, EntsyncConfig, PromotedField, effective_batch_size, migrated_attribute_keys,
};
pub use cutover::{CutoverGate, CutoverStatus, EnableOptions};
pub use extensions::{
    Compatibility, CompatibilityReport, ExtensionEntry, ExtensionRegistry,
    StaticExtensionRegistry,
};
pub use migrator::{BatchMigrator, BatchReport, EntityFailure, transform};
pub use progress::{Phase, ProgressEvent, ProgressObserver, TracingProgress};
pub use report::{REPORT_SCHEMA_V1, RunReport};
pub use runner::{
    EntityStore, ScanGuard, VerifyRequest, VerifyRun, count_pending, run_sync, run_verification,
};
pub use store::{
    BacklogSource, LegacyStore, NormalizedStore, OptionalExt, SettingsStore, SqliteStore,
    Transactional,
};
pub use verify::VerificationEngine;
