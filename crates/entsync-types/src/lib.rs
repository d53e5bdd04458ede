//! Plain data model shared by the entsync crates.
//!
//! Nothing in here touches a store. The only behavior is pure: grouping
//! attribute rows into multimaps, bag comparison, and typed field parsing.

pub mod attributes;
pub mod divergence;
pub mod entity;
pub mod outcome;

pub use attributes::{AttributeMultimap, AttributeRow, BagDiff, multiset_diff, normalize_rows};
pub use divergence::{DivergenceKind, DivergenceRecord, VerificationReport};
pub use entity::{
    Attribute, AuthoritativeStore, EntityId, FieldKind, FieldValue, LegacyEntity,
    NormalizedEntity,
};
pub use outcome::{Outcome, Summary};
