// crates/expunge-plans/src/model.rs
// ============================================================================
// Module: Expunge Plan Model
// Description: Plan, target, and task definition types with bounds validation.
// Purpose: Give plan files a typed shape the loader can validate fail-closed.
// Dependencies: expunge-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The plan model mirrors the authoring format one to one: required
//! `plan_id`, semver `version`, at least one target and one task, optional
//! `params_schema`. Task bounds (`max_attempts` in `[1, 10]`, `timeout_ms`
//! in `[1000, 3600000]`) are enforced by [`Plan::validate`], not by serde,
//! so error messages can name the offending task.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use expunge_core::TaskId;
use expunge_core::TaskType;

// ============================================================================
// SECTION: Targets
// ============================================================================

/// Kind of a named plan target.
///
/// # Invariants
/// - Variants are stable for plan-file round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Public website endpoint.
    Website,
    /// Machine API endpoint.
    Api,
    /// Email destination.
    Email,
}

/// Named endpoint a plan's tasks reference by id.
///
/// # Invariants
/// - `target_id` is non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTarget {
    /// Identifier tasks use to reference this target.
    pub target_id: String,
    /// Endpoint kind.
    pub kind: TargetKind,
    /// Base URL for website/api targets.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Free-form operator notes.
    #[serde(default)]
    pub notes: Option<String>,
}

// ============================================================================
// SECTION: Tasks
// ============================================================================

/// Output metadata for a task definition.
///
/// # Invariants
/// - `save_as` aliases live in the same namespace as task ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OutputSpec {
    /// Alias under which the output is also stored in run state.
    #[serde(default)]
    pub save_as: Option<String>,
    /// Artifact kind overriding the task type for persistence.
    #[serde(default)]
    pub artifact_kind: Option<String>,
}

/// One task definition inside a plan.
///
/// # Invariants
/// - `id` is alphanumeric/underscore/dash and unique within the plan.
/// - `depends_on` entries reference sibling task ids.
/// - `max_attempts` is in `[1, 10]`; `timeout_ms` is in `[1000, 3600000]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    /// Stable task identifier.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// Task type selecting the handler.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Sibling task ids that must have succeeded first.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Whether transient failures may retry.
    #[serde(default = "default_idempotent")]
    pub idempotent: bool,
    /// Attempt budget for this task.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether an approval gates this task regardless of policy.
    #[serde(default)]
    pub requires_approval: bool,
    /// Approval metadata (prompt override and the like).
    #[serde(default)]
    pub approval: Option<Value>,
    /// Handler input object (references resolved at dispatch).
    pub input: Value,
    /// Output metadata.
    #[serde(default)]
    pub output: Option<OutputSpec>,
}

/// Default idempotency flag for tasks.
const fn default_idempotent() -> bool {
    true
}

/// Default attempt budget for tasks.
const fn default_max_attempts() -> u32 {
    3
}

/// Default per-call timeout for tasks.
const fn default_timeout_ms() -> u64 {
    120_000
}

// ============================================================================
// SECTION: Plan
// ============================================================================

/// Declarative plan: version, targets, and an ordered task list.
///
/// # Invariants
/// - `version` is `N.N.N`.
/// - At least one target and one task.
/// - Canonical hashing covers the parsed form, so formatting never changes
///   the hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan identifier declared inside the file.
    pub plan_id: String,
    /// Semantic version (`N.N.N`).
    pub version: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Owning team or operator.
    #[serde(default)]
    pub owner: Option<String>,
    /// Free-form labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Named endpoints.
    pub targets: Vec<PlanTarget>,
    /// JSON Schema for launch params.
    #[serde(default)]
    pub params_schema: Option<Value>,
    /// Ordered task definitions.
    pub tasks: Vec<TaskDef>,
}

impl Plan {
    /// Validates structure, bounds, and dependency references.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.plan_id.trim().is_empty() {
            return Err("plan_id must be non-empty".to_string());
        }
        if !is_semver(&self.version) {
            return Err(format!("version '{}' is not N.N.N", self.version));
        }
        if self.targets.is_empty() {
            return Err("plan requires at least one target".to_string());
        }
        for target in &self.targets {
            if target.target_id.trim().is_empty() {
                return Err("target_id must be non-empty".to_string());
            }
        }
        if self.tasks.is_empty() {
            return Err("plan requires at least one task".to_string());
        }
        let mut seen = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            if !is_valid_task_id(task.id.as_str()) {
                return Err(format!("task id '{}' has invalid characters", task.id));
            }
            if seen.contains(&task.id) {
                return Err(format!("duplicate task id '{}'", task.id));
            }
            if task.name.trim().is_empty() {
                return Err(format!("task '{}' requires a name", task.id));
            }
            if !(1..=10).contains(&task.max_attempts) {
                return Err(format!("task '{}' max_attempts must be in [1, 10]", task.id));
            }
            if !(1_000..=3_600_000).contains(&task.timeout_ms) {
                return Err(format!("task '{}' timeout_ms must be in [1000, 3600000]", task.id));
            }
            seen.push(task.id.clone());
        }
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !seen.contains(dep) {
                    return Err(format!("task '{}' depends on unknown task '{}'", task.id, dep));
                }
            }
        }
        Ok(())
    }

    /// Returns the task definition with the given id, when present.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<&TaskDef> {
        self.tasks.iter().find(|task| &task.id == task_id)
    }
}

/// Returns `true` for `N.N.N` version strings.
fn is_semver(version: &str) -> bool {
    let mut parts = 0;
    for part in version.split('.') {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        parts += 1;
    }
    parts == 3
}

/// Returns `true` for alphanumeric/underscore/dash task ids.
fn is_valid_task_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
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

    use serde_json::json;

    use super::Plan;
    use super::PlanTarget;
    use super::TargetKind;
    use super::TaskDef;
    use expunge_core::TaskId;
    use expunge_core::TaskType;

    /// Minimal valid plan with one fetch task.
    fn sample_plan() -> Plan {
        Plan {
            plan_id: "broker_sample".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            owner: None,
            labels: Vec::new(),
            targets: vec![PlanTarget {
                target_id: "site".to_string(),
                kind: TargetKind::Website,
                base_url: Some("https://broker.example".to_string()),
                notes: None,
            }],
            params_schema: None,
            tasks: vec![TaskDef {
                id: TaskId::new("fetch"),
                name: "Fetch listing page".to_string(),
                task_type: TaskType::HttpRequest,
                depends_on: Vec::new(),
                idempotent: true,
                max_attempts: 3,
                timeout_ms: 30_000,
                requires_approval: false,
                approval: None,
                input: json!({"target_id": "site", "path": "/"}),
                output: None,
            }],
        }
    }

    #[test]
    fn valid_plan_passes_validation() {
        assert!(sample_plan().validate().is_ok());
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut plan = sample_plan();
        plan.version = "1.0".to_string();
        assert!(plan.validate().is_err());
        plan.version = "1.0.x".to_string();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn attempt_and_timeout_bounds_are_enforced() {
        let mut plan = sample_plan();
        plan.tasks[0].max_attempts = 11;
        assert!(plan.validate().is_err());
        let mut plan = sample_plan();
        plan.tasks[0].timeout_ms = 500;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut plan = sample_plan();
        plan.tasks[0].depends_on.push(TaskId::new("ghost"));
        let error = plan.validate().unwrap_err();
        assert!(error.contains("ghost"));
    }

    #[test]
    fn duplicate_task_ids_are_rejected() {
        let mut plan = sample_plan();
        let copy = plan.tasks[0].clone();
        plan.tasks.push(copy);
        assert!(plan.validate().unwrap_err().contains("duplicate"));
    }
}
