//! Entity shapes on both sides of the migration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier shared by both representations. Never reused.
pub type EntityId = i64;

/// One `(key, value)` attribute row attached to an entity.
///
/// Keys may repeat; the position inside the owning `Vec` is insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Entity as stored in the generic legacy tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEntity {
    pub id: EntityId,
    pub entity_type: String,
    pub status: String,
    pub created_at: i64,
    pub modified_at: i64,
    /// Every attribute row, promoted keys included, in insertion order.
    pub attributes: Vec<Attribute>,
}

impl LegacyEntity {
    /// Values stored under `key`, in insertion order.
    pub fn values_of<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |attr| attr.key == key)
            .map(|attr| attr.value.as_str())
    }
}

/// Entity as stored in the dedicated normalized tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntity {
    pub id: EntityId,
    pub entity_type: String,
    pub status: String,
    pub created_at: i64,
    pub modified_at: i64,
    /// Legacy `modified_at` observed by the migration pass that wrote this row.
    pub synced_at: i64,
    /// Promoted columns keyed by column name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Attributes that were not promoted, in insertion order.
    pub attributes: Vec<Attribute>,
}

/// Storage type of a promoted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Real,
}

impl FieldKind {
    /// SQL column type used when creating the normalized schema.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
        }
    }

    /// Parse a raw legacy attribute value into a typed field value.
    ///
    /// The empty string maps to [`FieldValue::Null`] for every kind.
    pub fn parse(self, raw: &str) -> Result<FieldValue, String> {
        if raw.is_empty() {
            return Ok(FieldValue::Null);
        }
        match self {
            Self::Text => Ok(FieldValue::Text(raw.to_owned())),
            Self::Integer => raw
                .trim()
                .parse::<i64>()
                .map(FieldValue::Integer)
                .map_err(|err| format!("`{raw}` is not an integer: {err}")),
            Self::Real => {
                let value = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|err| format!("`{raw}` is not a number: {err}"))?;
                if value.is_finite() {
                    Ok(FieldValue::Real(value))
                } else {
                    Err(format!("`{raw}` is not a finite number"))
                }
            }
        }
    }
}

/// Canonical value of one entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Which representation external collaborators treat as the source of truth.
///
/// Only the cutover gate writes this value; everything else reads it once per
/// operation and treats it as fixed for that operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthoritativeStore {
    #[default]
    LegacyAuthoritative,
    NormalizedAuthoritative,
}

impl AuthoritativeStore {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LegacyAuthoritative => "LEGACY_AUTHORITATIVE",
            Self::NormalizedAuthoritative => "NORMALIZED_AUTHORITATIVE",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "LEGACY_AUTHORITATIVE" => Some(Self::LegacyAuthoritative),
            "NORMALIZED_AUTHORITATIVE" => Some(Self::NormalizedAuthoritative),
            _ => None,
        }
    }
}

impl fmt::Display for AuthoritativeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
