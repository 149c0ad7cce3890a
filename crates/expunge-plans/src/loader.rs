// crates/expunge-plans/src/loader.rs
// ============================================================================
// Module: Expunge Plan Loader
// Description: Plan id resolution, parsing, canonical hashing, params checks.
// Purpose: Turn a plan id into a validated plan with a frozen hash.
// Dependencies: crate::model, expunge-core, jsonschema, serde_yaml
// ============================================================================

//! ## Overview
//! Plan ids resolve against the plans root by trying `<id>.yaml`, `<id>.yml`,
//! `brokers/<id>.yaml`, `brokers/<id>.yml`, and, for ids with the `broker_`
//! prefix, the stripped name inside `brokers/`. The canonical hash covers the
//! parsed plan (RFC 8785), so key order and whitespace in the file never
//! change it; edits to any semantic field do. Launch params validate against
//! the plan's embedded JSON Schema before a run is persisted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use jsonschema::Draft;
use serde_json::Value;
use thiserror::Error;

use expunge_core::PlanId;
use expunge_core::hashing::DEFAULT_HASH_ALGORITHM;
use expunge_core::hashing::hash_canonical_json;

use crate::model::Plan;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix under which broker plans are also resolvable in `brokers/`.
const BROKER_PREFIX: &str = "broker_";

/// Subdirectory holding per-broker plan files.
const BROKERS_DIR: &str = "brokers";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Plan loading and validation errors.
///
/// # Invariants
/// - Variants are stable for mapping onto run error codes.
#[derive(Debug, Error)]
pub enum PlanError {
    /// No candidate file resolved for the plan id.
    #[error("plan not found for plan_id={0}")]
    NotFound(String),
    /// The plan file could not be read.
    #[error("plan file unreadable: {0}")]
    Io(String),
    /// The plan file failed to parse or validate.
    #[error("invalid plan: {0}")]
    Invalid(String),
    /// Launch params failed the plan's params schema.
    #[error("params validation failed: {0}")]
    ParamsInvalid(String),
    /// The plan could not be canonically hashed.
    #[error("plan hashing failed: {0}")]
    Hashing(String),
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Returns the candidate file paths for a plan id, in resolution order.
fn candidate_paths(plans_root: &Path, plan_id: &PlanId) -> Vec<PathBuf> {
    let id = plan_id.as_str();
    let mut candidates = vec![
        plans_root.join(format!("{id}.yaml")),
        plans_root.join(format!("{id}.yml")),
        plans_root.join(BROKERS_DIR).join(format!("{id}.yaml")),
        plans_root.join(BROKERS_DIR).join(format!("{id}.yml")),
    ];
    if let Some(stripped) = id.strip_prefix(BROKER_PREFIX) {
        candidates.push(plans_root.join(BROKERS_DIR).join(format!("{stripped}.yaml")));
        candidates.push(plans_root.join(BROKERS_DIR).join(format!("{stripped}.yml")));
    }
    candidates
}

/// Resolves a plan id to a parsed, validated plan.
///
/// # Errors
///
/// Returns [`PlanError::NotFound`] when no candidate file exists, and
/// [`PlanError::Io`]/[`PlanError::Invalid`] on read or validation failure.
pub fn load_plan(plans_root: &Path, plan_id: &PlanId) -> Result<Plan, PlanError> {
    let path = candidate_paths(plans_root, plan_id)
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| PlanError::NotFound(plan_id.as_str().to_string()))?;
    let raw = fs::read_to_string(&path).map_err(|err| PlanError::Io(err.to_string()))?;
    let plan: Plan = serde_yaml::from_str(&raw)
        .map_err(|err| PlanError::Invalid(format!("{}: {err}", path.display())))?;
    plan.validate().map_err(PlanError::Invalid)?;
    Ok(plan)
}

// ============================================================================
// SECTION: Hashing
// ============================================================================

/// Computes the canonical hash of a parsed plan.
///
/// # Errors
///
/// Returns [`PlanError::Hashing`] when canonicalization fails.
pub fn hash_plan(plan: &Plan) -> Result<String, PlanError> {
    hash_canonical_json(DEFAULT_HASH_ALGORITHM, plan)
        .map(|digest| digest.value)
        .map_err(|err| PlanError::Hashing(err.to_string()))
}

// ============================================================================
// SECTION: Params Validation
// ============================================================================

/// Validates launch params against the plan's params schema, when present.
///
/// # Errors
///
/// Returns [`PlanError::ParamsInvalid`] listing the first schema violation.
pub fn validate_params(plan: &Plan, params: &Value) -> Result<(), PlanError> {
    let Some(schema) = &plan.params_schema else {
        return Ok(());
    };
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| PlanError::Invalid(format!("params_schema does not compile: {err}")))?;
    if let Err(violation) = validator.validate(params) {
        return Err(PlanError::ParamsInvalid(violation.to_string()));
    }
    Ok(())
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

    use std::fs;

    use serde_json::json;
    use tempfile::TempDir;

    use super::PlanError;
    use super::hash_plan;
    use super::load_plan;
    use super::validate_params;
    use expunge_core::PlanId;

    /// Plan body used across loader tests.
    const PLAN_BODY: &str = "\
plan_id: broker_sample
version: 1.0.0
targets:
  - target_id: site
    kind: website
    base_url: https://broker.example
params_schema:
  type: object
  required: [profile_id]
  properties:
    profile_id:
      type: string
tasks:
  - id: fetch
    name: Fetch listing page
    type: http.request
    input:
      target_id: site
      path: /
";

    #[test]
    fn resolves_direct_then_brokers_then_stripped_prefix() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("brokers")).unwrap();
        fs::write(root.path().join("brokers/sample.yaml"), PLAN_BODY).unwrap();

        // broker_sample resolves via the stripped form under brokers/.
        let plan = load_plan(root.path(), &PlanId::new("broker_sample")).unwrap();
        assert_eq!(plan.plan_id, "broker_sample");

        // A direct file wins over the brokers/ fallback.
        fs::write(
            root.path().join("broker_sample.yaml"),
            PLAN_BODY.replace("1.0.0", "2.0.0"),
        )
        .unwrap();
        let plan = load_plan(root.path(), &PlanId::new("broker_sample")).unwrap();
        assert_eq!(plan.version, "2.0.0");
    }

    #[test]
    fn missing_plan_is_not_found() {
        let root = TempDir::new().unwrap();
        let error = load_plan(root.path(), &PlanId::new("ghost")).unwrap_err();
        assert!(matches!(error, PlanError::NotFound(id) if id == "ghost"));
    }

    #[test]
    fn hash_ignores_formatting_but_not_content() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.yaml"), PLAN_BODY).unwrap();
        // Same semantic content with different indentation and key order.
        let reordered = PLAN_BODY.replace("plan_id: broker_sample\nversion: 1.0.0", "version: 1.0.0\nplan_id: broker_sample");
        fs::write(root.path().join("b.yaml"), reordered).unwrap();
        fs::write(root.path().join("c.yaml"), PLAN_BODY.replace("1.0.0", "1.0.1")).unwrap();

        let hash_a = hash_plan(&load_plan(root.path(), &PlanId::new("a")).unwrap()).unwrap();
        let hash_b = hash_plan(&load_plan(root.path(), &PlanId::new("b")).unwrap()).unwrap();
        let hash_c = hash_plan(&load_plan(root.path(), &PlanId::new("c")).unwrap()).unwrap();
        assert_eq!(hash_a, hash_b);
        assert_ne!(hash_a, hash_c);
    }

    #[test]
    fn params_validate_against_embedded_schema() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("a.yaml"), PLAN_BODY).unwrap();
        let plan = load_plan(root.path(), &PlanId::new("a")).unwrap();

        assert!(validate_params(&plan, &json!({"profile_id": "p-1"})).is_ok());
        let error = validate_params(&plan, &json!({})).unwrap_err();
        assert!(matches!(error, PlanError::ParamsInvalid(_)));
    }

    #[test]
    fn invalid_dependency_fails_at_load() {
        let root = TempDir::new().unwrap();
        let body = PLAN_BODY.replace("    input:", "    depends_on: [ghost]\n    input:");
        fs::write(root.path().join("a.yaml"), body).unwrap();
        let error = load_plan(root.path(), &PlanId::new("a")).unwrap_err();
        assert!(matches!(error, PlanError::Invalid(message) if message.contains("ghost")));
    }
}
