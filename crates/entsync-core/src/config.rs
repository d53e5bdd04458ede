//! Configuration loaded from `entsync.toml`.
//!
//! Every section has defaults, so an absent file or an empty one yields a
//! working configuration. Command-line flags override individual values.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use entsync_error::{Result, SyncError};
use entsync_types::FieldKind;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::extensions::ExtensionEntry;

/// Batch size used when none is given, or when zero is given.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Columns every normalized entity row has; promoted columns may not reuse them.
pub const CORE_COLUMNS: [&str; 6] = [
    "id",
    "entity_type",
    "status",
    "created_at",
    "modified_at",
    "synced_at",
];

/// Resolve a requested batch size.
///
/// Zero is not "unbounded": it is replaced by [`DEFAULT_BATCH_SIZE`], matching
/// the long-standing behavior of the command runner.
#[must_use]
pub fn effective_batch_size(requested: usize) -> usize {
    if requested == 0 {
        debug!(
            default = DEFAULT_BATCH_SIZE,
            "batch size 0 requested, substituting default"
        );
        DEFAULT_BATCH_SIZE
    } else {
        requested
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntsyncConfig {
    /// SQLite file holding both representations.
    pub database: PathBuf,
    pub sync: SyncSettings,
    pub promoted_fields: Vec<PromotedField>,
    pub verify: VerifySettings,
    pub cutover: CutoverSettings,
    pub extensions: Vec<ExtensionEntry>,
}

impl Default for EntsyncConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("entsync.db"),
            sync: SyncSettings::default(),
            promoted_fields: PromotedField::order_defaults(),
            verify: VerifySettings::default(),
            cutover: CutoverSettings::default(),
            extensions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub batch_size: usize,
    /// Legacy entity types in scope for sync and verification.
    pub entity_types: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            entity_types: vec!["order".to_owned(), "refund".to_owned()],
        }
    }
}

/// A legacy attribute key that becomes a first-class normalized column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromotedField {
    pub key: String,
    pub column: String,
    pub kind: FieldKind,
}

impl PromotedField {
    pub fn new(key: impl Into<String>, column: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            column: column.into(),
            kind,
        }
    }

    /// Promotions used when the configuration file names none.
    #[must_use]
    pub fn order_defaults() -> Vec<Self> {
        vec![
            Self::new("_order_currency", "currency", FieldKind::Text),
            Self::new("_order_total", "total_amount", FieldKind::Real),
            Self::new("_customer_user", "customer_id", FieldKind::Integer),
            Self::new("_billing_email", "billing_email", FieldKind::Text),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VerifySettings {
    /// Volatile attribute keys never compared.
    pub ignored_attribute_keys: Vec<String>,
    /// Canonical field names never compared (renamed or deprecated fields).
    pub excluded_fields: Vec<String>,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            ignored_attribute_keys: vec!["_edit_lock".to_owned()],
            excluded_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CutoverSettings {
    /// Treat "uncertain" extensions like incompatible ones.
    pub block_on_uncertain: bool,
}

impl EntsyncConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| SyncError::config(format!("invalid configuration: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SyncError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load `path` if given; otherwise `entsync.toml` if present; otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let implicit = Path::new("entsync.toml");
                if implicit.is_file() {
                    Self::load(implicit)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.entity_types.is_empty() {
            return Err(SyncError::config("sync.entity_types must not be empty"));
        }
        if self.sync.entity_types.iter().any(|t| t.trim().is_empty()) {
            return Err(SyncError::config("sync.entity_types contains an empty type"));
        }

        let mut keys = BTreeSet::new();
        let mut columns = BTreeSet::new();
        for field in &self.promoted_fields {
            if field.key.is_empty() {
                return Err(SyncError::config("promoted field with empty key"));
            }
            if !is_sql_identifier(&field.column) {
                return Err(SyncError::config(format!(
                    "promoted column `{}` is not a valid identifier",
                    field.column
                )));
            }
            let lower = field.column.to_ascii_lowercase();
            if CORE_COLUMNS.contains(&lower.as_str()) {
                return Err(SyncError::config(format!(
                    "promoted column `{}` collides with a core column",
                    field.column
                )));
            }
            if !keys.insert(field.key.as_str()) {
                return Err(SyncError::config(format!(
                    "attribute key `{}` is promoted twice",
                    field.key
                )));
            }
            if !columns.insert(lower) {
                return Err(SyncError::config(format!(
                    "column `{}` is used twice",
                    field.column
                )));
            }
        }
        Ok(())
    }
}

/// Attribute keys that live in promoted columns instead of the attribute
/// table. Verification leaves them out of the legacy attribute bag.
#[must_use]
pub fn migrated_attribute_keys(promoted: &[PromotedField]) -> BTreeSet<String> {
    promoted.iter().map(|f| f.key.clone()).collect()
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::Compatibility;

    #[test]
    fn zero_batch_size_becomes_default() {
        assert_eq!(effective_batch_size(0), DEFAULT_BATCH_SIZE);
        assert_eq!(effective_batch_size(25), 25);
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = EntsyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, EntsyncConfig::default());
        assert_eq!(config.sync.batch_size, 500);
    }

    #[test]
    fn parses_full_file() {
        let raw = r#"
            database = "/var/lib/shop.db"

            [sync]
            batch_size = 250
            entity_types = ["order"]

            [[promoted_fields]]
            key = "_order_total"
            column = "total_amount"
            kind = "real"

            [verify]
            ignored_attribute_keys = ["_edit_lock", "_edit_last"]
            excluded_fields = ["modified_at"]

            [cutover]
            block_on_uncertain = true

            [[extensions]]
            name = "legacy-reports"
            compatibility = "incompatible"
        "#;
        let config = EntsyncConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.database, PathBuf::from("/var/lib/shop.db"));
        assert_eq!(config.sync.batch_size, 250);
        assert_eq!(config.promoted_fields.len(), 1);
        assert_eq!(config.promoted_fields[0].kind, FieldKind::Real);
        assert_eq!(config.verify.excluded_fields, vec!["modified_at".to_owned()]);
        assert!(config.cutover.block_on_uncertain);
        assert_eq!(
            config.extensions[0].compatibility,
            Compatibility::Incompatible
        );
        assert_eq!(
            migrated_attribute_keys(&config.promoted_fields)
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["_order_total".to_owned()]
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = EntsyncConfig::from_toml_str("[sync]\nbatchsize = 3\n").unwrap_err();
        assert_eq!(err.kind(), entsync_error::ErrorKind::Config);
    }

    #[test]
    fn rejects_core_column_collision() {
        let raw = r#"
            [[promoted_fields]]
            key = "_status"
            column = "Status"
            kind = "text"
        "#;
        let err = EntsyncConfig::from_toml_str(raw).unwrap_err();
        assert!(err.to_string().contains("collides"), "{err}");
    }

    #[test]
    fn rejects_bad_identifiers_and_duplicates() {
        let bad_ident = r#"
            [[promoted_fields]]
            key = "_x"
            column = "x; DROP TABLE entities"
            kind = "text"
        "#;
        assert!(EntsyncConfig::from_toml_str(bad_ident).is_err());

        let duplicate = r#"
            [[promoted_fields]]
            key = "_x"
            column = "x"
            kind = "text"

            [[promoted_fields]]
            key = "_x"
            column = "y"
            kind = "text"
        "#;
        assert!(EntsyncConfig::from_toml_str(duplicate).is_err());
    }

    #[test]
    fn rejects_empty_entity_types() {
        let err = EntsyncConfig::from_toml_str("[sync]\nentity_types = []\n").unwrap_err();
        assert!(err.to_string().contains("entity_types"), "{err}");
    }
}
