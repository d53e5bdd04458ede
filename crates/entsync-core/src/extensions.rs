//! Extension compatibility reporting.
//!
//! External extensions declare whether they work against the normalized store.
//! The cutover gate refuses to flip while any of them is incompatible.

use entsync_error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compatibility {
    Compatible,
    Uncertain,
    Incompatible,
}

/// One registered extension, as listed in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionEntry {
    pub name: String,
    pub compatibility: Compatibility,
}

/// Extension names bucketed by declared compatibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub compatible: Vec<String>,
    pub uncertain: Vec<String>,
    pub incompatible: Vec<String>,
}

impl CompatibilityReport {
    /// Extensions that block cutover under the given policy.
    #[must_use]
    pub fn blocking(&self, block_on_uncertain: bool) -> Vec<&str> {
        let mut blocking: Vec<&str> = self.incompatible.iter().map(String::as_str).collect();
        if block_on_uncertain {
            blocking.extend(self.uncertain.iter().map(String::as_str));
        }
        blocking
    }
}

/// Source of the compatibility report consulted by the cutover gate.
pub trait ExtensionRegistry {
    fn compatibility_report(&self) -> Result<CompatibilityReport>;
}

/// Registry backed by a fixed list, normally the `[[extensions]]` config entries.
#[derive(Debug, Clone, Default)]
pub struct StaticExtensionRegistry {
    entries: Vec<ExtensionEntry>,
}

impl StaticExtensionRegistry {
    #[must_use]
    pub fn new(entries: Vec<ExtensionEntry>) -> Self {
        Self { entries }
    }
}

impl ExtensionRegistry for StaticExtensionRegistry {
    fn compatibility_report(&self) -> Result<CompatibilityReport> {
        let mut report = CompatibilityReport::default();
        for entry in &self.entries {
            let bucket = match entry.compatibility {
                Compatibility::Compatible => &mut report.compatible,
                Compatibility::Uncertain => &mut report.uncertain,
                Compatibility::Incompatible => &mut report.incompatible,
            };
            bucket.push(entry.name.clone());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, compatibility: Compatibility) -> ExtensionEntry {
        ExtensionEntry {
            name: name.to_owned(),
            compatibility,
        }
    }

    #[test]
    fn buckets_entries_and_applies_policy() {
        let registry = StaticExtensionRegistry::new(vec![
            entry("a", Compatibility::Compatible),
            entry("b", Compatibility::Uncertain),
            entry("c", Compatibility::Incompatible),
        ]);
        let report = registry.compatibility_report().unwrap();
        assert_eq!(report.compatible, vec!["a".to_owned()]);
        assert_eq!(report.blocking(false), vec!["c"]);
        assert_eq!(report.blocking(true), vec!["c", "b"]);
    }

    #[test]
    fn empty_registry_blocks_nothing() {
        let report = StaticExtensionRegistry::default()
            .compatibility_report()
            .unwrap();
        assert!(report.blocking(true).is_empty());
    }
}
