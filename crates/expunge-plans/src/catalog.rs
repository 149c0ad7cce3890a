// crates/expunge-plans/src/catalog.rs
// ============================================================================
// Module: Expunge Broker Catalog
// Description: Catalog of known data brokers and their removal metadata.
// Purpose: Drive schedule bootstrap and plan coverage reporting.
// Dependencies: expunge-core, serde, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! The broker catalog is one YAML document listing every broker the deployment
//! knows how to scan: category, removal method, difficulty, an optional plan
//! file, and the re-check interval. Validation uses closed vocabularies and
//! rejects duplicate ids, so a typo cannot silently drop a broker from
//! scheduling.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use expunge_core::BrokerId;

// ============================================================================
// SECTION: Vocabularies
// ============================================================================

/// Accepted removal methods.
const VALID_REMOVAL_METHODS: [&str; 7] = [
    "web_form",
    "web_form_with_email_verify",
    "web_form_with_phone_verify",
    "account_required",
    "email",
    "mail_or_fax",
    "api",
];

/// Accepted difficulty labels.
const VALID_DIFFICULTIES: [&str; 3] = ["easy", "medium", "hard"];

/// Accepted broker categories.
const VALID_CATEGORIES: [&str; 4] =
    ["people-search", "marketing-data", "risk-data", "background-check"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Catalog loading and validation errors.
///
/// # Invariants
/// - Messages name the offending broker id where one exists.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("catalog unreadable: {0}")]
    Io(String),
    /// The catalog failed to parse or validate.
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Entries
// ============================================================================

/// Raw catalog document shape.
#[derive(Debug, Deserialize)]
struct RawCatalog {
    /// Broker entries.
    brokers: Vec<RawBroker>,
}

/// Raw broker entry before vocabulary validation.
#[derive(Debug, Deserialize)]
struct RawBroker {
    /// Broker identifier.
    id: String,
    /// Display name.
    name: String,
    /// Broker category.
    #[serde(default)]
    category: String,
    /// Removal method label.
    #[serde(default)]
    removal_method: String,
    /// Difficulty label.
    #[serde(default)]
    difficulty: String,
    /// Plan file name, when a plan exists for this broker.
    #[serde(default)]
    plan_file: Option<String>,
    /// Re-check interval in days.
    #[serde(default = "default_recheck_days")]
    recheck_days: i64,
    /// Free-form notes.
    #[serde(default)]
    notes: String,
}

/// Default re-check interval in days.
const fn default_recheck_days() -> i64 {
    30
}

/// Validated broker catalog entry.
///
/// # Invariants
/// - `category`, `removal_method`, and `difficulty` come from the closed
///   vocabularies; `recheck_days >= 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEntry {
    /// Broker identifier.
    pub id: BrokerId,
    /// Display name.
    pub name: String,
    /// Broker category.
    pub category: String,
    /// Removal method label.
    pub removal_method: String,
    /// Difficulty label.
    pub difficulty: String,
    /// Plan file name, when a plan exists for this broker.
    pub plan_file: Option<String>,
    /// Re-check interval in days.
    pub recheck_days: i64,
    /// Free-form notes.
    pub notes: String,
}

/// Validates one raw broker entry.
fn validate_broker(raw: RawBroker, index: usize) -> Result<BrokerEntry, CatalogError> {
    if raw.id.trim().is_empty() {
        return Err(CatalogError::Invalid(format!("broker at index {index}: missing 'id'")));
    }
    if raw.name.trim().is_empty() {
        return Err(CatalogError::Invalid(format!("broker '{}': missing 'name'", raw.id)));
    }
    if !VALID_CATEGORIES.contains(&raw.category.as_str()) {
        return Err(CatalogError::Invalid(format!(
            "broker '{}': invalid category '{}'",
            raw.id, raw.category
        )));
    }
    if !VALID_REMOVAL_METHODS.contains(&raw.removal_method.as_str()) {
        return Err(CatalogError::Invalid(format!(
            "broker '{}': invalid removal_method '{}'",
            raw.id, raw.removal_method
        )));
    }
    if !VALID_DIFFICULTIES.contains(&raw.difficulty.as_str()) {
        return Err(CatalogError::Invalid(format!(
            "broker '{}': invalid difficulty '{}'",
            raw.id, raw.difficulty
        )));
    }
    if raw.recheck_days < 1 {
        return Err(CatalogError::Invalid(format!(
            "broker '{}': recheck_days must be a positive integer",
            raw.id
        )));
    }
    Ok(BrokerEntry {
        id: BrokerId::new(raw.id.trim()),
        name: raw.name.trim().to_string(),
        category: raw.category,
        removal_method: raw.removal_method,
        difficulty: raw.difficulty,
        plan_file: raw.plan_file.filter(|file| !file.trim().is_empty()),
        recheck_days: raw.recheck_days,
        notes: raw.notes,
    })
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Loaded and validated broker catalog.
///
/// # Invariants
/// - Broker ids are unique.
#[derive(Debug, Clone, Default)]
pub struct BrokerCatalog {
    /// Entries in declaration order.
    entries: Vec<BrokerEntry>,
}

impl BrokerCatalog {
    /// Loads and validates a catalog document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the file is unreadable, fails to parse,
    /// or contains an invalid or duplicate entry.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw_text = fs::read_to_string(path).map_err(|err| CatalogError::Io(err.to_string()))?;
        Self::parse(&raw_text)
    }

    /// Parses and validates a catalog document from a string.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when parsing or validation fails.
    pub fn parse(raw_text: &str) -> Result<Self, CatalogError> {
        let raw: RawCatalog =
            serde_yaml::from_str(raw_text).map_err(|err| CatalogError::Invalid(err.to_string()))?;
        let mut entries = Vec::with_capacity(raw.brokers.len());
        for (index, broker) in raw.brokers.into_iter().enumerate() {
            let entry = validate_broker(broker, index)?;
            if entries.iter().any(|existing: &BrokerEntry| existing.id == entry.id) {
                return Err(CatalogError::Invalid(format!("duplicate broker id: '{}'", entry.id)));
            }
            entries.push(entry);
        }
        Ok(Self {
            entries,
        })
    }

    /// Returns the entry for a broker id, when present.
    #[must_use]
    pub fn get(&self, broker_id: &BrokerId) -> Option<&BrokerEntry> {
        self.entries.iter().find(|entry| &entry.id == broker_id)
    }

    /// Returns all entries in declaration order.
    #[must_use]
    pub fn all(&self) -> &[BrokerEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the catalog has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::BrokerCatalog;
    use super::CatalogError;
    use expunge_core::BrokerId;

    /// Catalog with two brokers, one with a plan file.
    const CATALOG: &str = "\
brokers:
  - id: peoplelens
    name: PeopleLens
    category: people-search
    removal_method: web_form
    difficulty: easy
    plan_file: peoplelens.yaml
    recheck_days: 14
  - id: shadowtrace
    name: ShadowTrace
    category: risk-data
    removal_method: email
    difficulty: hard
";

    #[test]
    fn parses_valid_catalog() {
        let catalog = BrokerCatalog::parse(CATALOG).unwrap();
        assert_eq!(catalog.len(), 2);
        let entry = catalog.get(&BrokerId::new("peoplelens")).unwrap();
        assert_eq!(entry.recheck_days, 14);
        assert_eq!(entry.plan_file.as_deref(), Some("peoplelens.yaml"));
        assert!(catalog.get(&BrokerId::new("shadowtrace")).unwrap().plan_file.is_none());
    }

    #[test]
    fn rejects_unknown_vocabulary() {
        let bad = CATALOG.replace("people-search", "gossip");
        assert!(matches!(BrokerCatalog::parse(&bad), Err(CatalogError::Invalid(_))));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let bad = CATALOG.replace("shadowtrace", "peoplelens");
        let error = BrokerCatalog::parse(&bad).unwrap_err();
        assert!(matches!(error, CatalogError::Invalid(message) if message.contains("duplicate")));
    }

    #[test]
    fn rejects_non_positive_recheck() {
        let bad = CATALOG.replace("recheck_days: 14", "recheck_days: 0");
        assert!(BrokerCatalog::parse(&bad).is_err());
    }
}
