// crates/expunge-plans/src/health.rs
// ============================================================================
// Module: Expunge Plan Health
// Description: Structural health report for a plan without executing it.
// Purpose: Back the plan-check endpoint with advisory structure findings.
// Dependencies: crate::{loader, model}, expunge-core, serde
// ============================================================================

//! ## Overview
//! The health check loads a plan and reports `broken` when loading fails,
//! `degraded` when advisory issues are found (dependencies declared after
//! their dependents, colliding `save_as` aliases), and `healthy` otherwise.
//! Existence of dependency targets is already a load-time failure, so it
//! surfaces here as `broken`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use expunge_core::PlanId;

use crate::loader::load_plan;
use crate::model::Plan;

// ============================================================================
// SECTION: Report Types
// ============================================================================

/// Overall plan health classification.
///
/// # Invariants
/// - Variants are stable for API round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanHealth {
    /// Plan loads and no advisory issues were found.
    Healthy,
    /// Plan loads but advisory issues were found.
    Degraded,
    /// Plan failed to load or validate.
    Broken,
}

/// One advisory issue found in a plan.
///
/// # Invariants
/// - `task` names the task the issue anchors to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanIssue {
    /// Task the issue anchors to.
    pub task: String,
    /// Issue description.
    pub issue: String,
}

/// Per-task summary echoed in the report.
///
/// # Invariants
/// - Mirrors the plan's declared task order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTaskSummary {
    /// Task identifier.
    pub id: String,
    /// Task type wire label.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Declared approval requirement.
    pub requires_approval: bool,
}

/// Structural health report for one plan.
///
/// # Invariants
/// - `error` is set iff `health` is [`PlanHealth::Broken`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanHealthReport {
    /// Plan identifier checked.
    pub plan_id: String,
    /// Overall classification.
    pub health: PlanHealth,
    /// Number of tasks in the plan (zero when broken).
    pub task_count: usize,
    /// Advisory issues found.
    pub issues: Vec<PlanIssue>,
    /// Per-task summaries (empty when broken).
    pub tasks: Vec<PlanTaskSummary>,
    /// Load error when the plan is broken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// SECTION: Check
// ============================================================================

/// Loads a plan and reports its structural health.
#[must_use]
pub fn check_plan_health(plans_root: &Path, plan_id: &PlanId) -> PlanHealthReport {
    let plan = match load_plan(plans_root, plan_id) {
        Ok(plan) => plan,
        Err(error) => {
            return PlanHealthReport {
                plan_id: plan_id.as_str().to_string(),
                health: PlanHealth::Broken,
                task_count: 0,
                issues: Vec::new(),
                tasks: Vec::new(),
                error: Some(error.to_string()),
            };
        }
    };
    let issues = advisory_issues(&plan);
    let health = if issues.is_empty() { PlanHealth::Healthy } else { PlanHealth::Degraded };
    PlanHealthReport {
        plan_id: plan_id.as_str().to_string(),
        health,
        task_count: plan.tasks.len(),
        issues,
        tasks: plan
            .tasks
            .iter()
            .map(|task| PlanTaskSummary {
                id: task.id.as_str().to_string(),
                task_type: task.task_type.as_str().to_string(),
                requires_approval: task.requires_approval,
            })
            .collect(),
        error: None,
    }
}

/// Scans for advisory issues that do not block loading.
fn advisory_issues(plan: &Plan) -> Vec<PlanIssue> {
    let mut issues = Vec::new();
    // Execution is strictly in declared order, so a dependency declared after
    // its dependent can never be satisfied at run time.
    for (index, task) in plan.tasks.iter().enumerate() {
        for dep in &task.depends_on {
            let dep_index = plan.tasks.iter().position(|candidate| &candidate.id == dep);
            if dep_index.is_some_and(|at| at >= index) {
                issues.push(PlanIssue {
                    task: task.id.as_str().to_string(),
                    issue: format!("dependency '{dep}' is declared at or after this task"),
                });
            }
        }
    }
    // save_as aliases share the state namespace with task ids.
    for (index, task) in plan.tasks.iter().enumerate() {
        let Some(alias) = task.output.as_ref().and_then(|output| output.save_as.as_deref())
        else {
            continue;
        };
        let collides_with_task = plan.tasks.iter().any(|candidate| candidate.id.as_str() == alias);
        let collides_with_alias = plan.tasks.iter().take(index).any(|candidate| {
            candidate.output.as_ref().and_then(|output| output.save_as.as_deref()) == Some(alias)
        });
        if collides_with_task || collides_with_alias {
            issues.push(PlanIssue {
                task: task.id.as_str().to_string(),
                issue: format!("save_as alias '{alias}' collides in the state namespace"),
            });
        }
    }
    issues
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

    use tempfile::TempDir;

    use super::PlanHealth;
    use super::check_plan_health;
    use expunge_core::PlanId;

    /// Two-task plan with a forward dependency.
    const FORWARD_DEP_PLAN: &str = "\
plan_id: sample
version: 1.0.0
targets:
  - target_id: site
    kind: website
tasks:
  - id: first
    name: First
    type: scrape.static
    depends_on: [second]
    input: {html: '<p>x</p>'}
  - id: second
    name: Second
    type: scrape.static
    input: {html: '<p>y</p>'}
";

    #[test]
    fn missing_plan_reports_broken() {
        let root = TempDir::new().unwrap();
        let report = check_plan_health(root.path(), &PlanId::new("ghost"));
        assert_eq!(report.health, PlanHealth::Broken);
        assert!(report.error.is_some());
        assert_eq!(report.task_count, 0);
    }

    #[test]
    fn forward_dependency_reports_degraded() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("sample.yaml"), FORWARD_DEP_PLAN).unwrap();
        let report = check_plan_health(root.path(), &PlanId::new("sample"));
        assert_eq!(report.health, PlanHealth::Degraded);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].task, "first");
        assert_eq!(report.task_count, 2);
    }

    #[test]
    fn clean_plan_reports_healthy() {
        let root = TempDir::new().unwrap();
        let body = FORWARD_DEP_PLAN.replace("    depends_on: [second]\n", "");
        fs::write(root.path().join("sample.yaml"), body).unwrap();
        let report = check_plan_health(root.path(), &PlanId::new("sample"));
        assert_eq!(report.health, PlanHealth::Healthy);
        assert!(report.issues.is_empty());
        assert_eq!(report.tasks.len(), 2);
    }
}
