// crates/expunge-core/src/core/records.rs
// ============================================================================
// Module: Expunge Persisted Records
// Description: Runs, task instances, approvals, artifacts, and schedules.
// Purpose: Define the durable entities owned by the run-execution engine.
// Dependencies: crate::core::{identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! These records mirror the store tables one to one. Status enums carry
//! stable snake_case wire forms; transitions are enforced by the runner and
//! the store, not by the types themselves.
//!
//! Security posture: records loaded from the store are untrusted; error
//! strings written into them are scrubbed of configured PII terms first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::BrokerId;
use crate::core::identifiers::PlanId;
use crate::core::identifiers::ProfileId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::RunnerId;
use crate::core::identifiers::ScheduleId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::TaskRunId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Task Types
// ============================================================================

/// Closed enumeration of plan task types.
///
/// # Invariants
/// - Wire forms are stable (`http.request`, `scrape.static`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    /// HTTP call against a plan target or explicit base URL.
    #[serde(rename = "http.request")]
    HttpRequest,
    /// CSS-selector extraction from an HTML blob.
    #[serde(rename = "scrape.static")]
    ScrapeStatic,
    /// Headless-browser fetch with optional wait, actions, and screenshot.
    #[serde(rename = "scrape.rendered")]
    ScrapeRendered,
    /// Opt-out form detection, fill, and submit.
    #[serde(rename = "form.submit")]
    FormSubmit,
    /// SMTP send from the agent mailbox.
    #[serde(rename = "email.send")]
    EmailSend,
    /// Inbox search with an optional wall-clock polling deadline.
    #[serde(rename = "email.check")]
    EmailCheck,
    /// Follow a verification URL via the rendered-scrape path.
    #[serde(rename = "email.click_verify")]
    EmailClickVerify,
    /// Identity match between a decrypted profile and candidate listings.
    #[serde(rename = "match.identity")]
    MatchIdentity,
    /// Compose a listing status-update record.
    #[serde(rename = "broker.update_status")]
    BrokerUpdateStatus,
    /// Enqueue a human-handoff item.
    #[serde(rename = "queue.human_action")]
    QueueHumanAction,
    /// Human-handoff wrapper for CAPTCHA with a screenshot reference.
    #[serde(rename = "captcha.solve")]
    CaptchaSolve,
    /// Inline sleep or deferred-resume marker.
    #[serde(rename = "wait.delay")]
    WaitDelay,
    /// JSON-only LLM call (deterministic stub when the provider is mock).
    #[serde(rename = "llm.json")]
    LlmJson,
    /// Render a legal deletion-request letter from the decrypted profile.
    #[serde(rename = "legal.generate_request")]
    LegalGenerateRequest,
    /// Search-engine discovery with broker classification.
    #[serde(rename = "discover.search_engine")]
    DiscoverSearchEngine,
}

impl TaskType {
    /// Returns the stable wire label for the task type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HttpRequest => "http.request",
            Self::ScrapeStatic => "scrape.static",
            Self::ScrapeRendered => "scrape.rendered",
            Self::FormSubmit => "form.submit",
            Self::EmailSend => "email.send",
            Self::EmailCheck => "email.check",
            Self::EmailClickVerify => "email.click_verify",
            Self::MatchIdentity => "match.identity",
            Self::BrokerUpdateStatus => "broker.update_status",
            Self::QueueHumanAction => "queue.human_action",
            Self::CaptchaSolve => "captcha.solve",
            Self::WaitDelay => "wait.delay",
            Self::LlmJson => "llm.json",
            Self::LegalGenerateRequest => "legal.generate_request",
            Self::DiscoverSearchEngine => "discover.search_engine",
        }
    }

    /// Returns `true` when execution of this task type mutates external state.
    ///
    /// An `http.request` with a non-safe method is also a side effect; that
    /// refinement needs the task input and lives with the runner's policy
    /// check.
    #[must_use]
    pub const fn is_side_effect(self) -> bool {
        matches!(
            self,
            Self::FormSubmit | Self::EmailSend | Self::EmailClickVerify | Self::BrokerUpdateStatus
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Run
// ============================================================================

/// Run lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and store round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Waiting for a runner to claim it.
    Queued,
    /// Claimed and executing.
    Running,
    /// Suspended on one or more pending approvals.
    BlockedForApproval,
    /// All tasks completed.
    Succeeded,
    /// Terminal failure; see `error_code`.
    Failed,
    /// Externally canceled.
    Canceled,
}

impl RunStatus {
    /// Returns the stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::BlockedForApproval => "blocked_for_approval",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parses a stored status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "blocked_for_approval" => Some(Self::BlockedForApproval),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Returns `true` for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Returns `true` when a runner may claim a run in this status.
    #[must_use]
    pub const fn is_claimable(self) -> bool {
        matches!(self, Self::Queued | Self::Running | Self::BlockedForApproval)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of one plan with frozen params and plan hash.
///
/// # Invariants
/// - A non-null `idempotency_key` is unique across all runs.
/// - `claim_expires_at` is set iff `claimed_by` is set.
/// - Status transitions follow the run state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Run identifier.
    pub run_id: RunId,
    /// Plan identifier as launched.
    pub plan_id: PlanId,
    /// Canonical plan hash observed at enqueue.
    pub plan_hash: String,
    /// Run lifecycle status.
    pub status: RunStatus,
    /// Optional launch principal.
    pub requested_by: Option<String>,
    /// Optional idempotency key (unique when present).
    pub idempotency_key: Option<String>,
    /// Enqueue timestamp.
    pub created_at: Timestamp,
    /// First-execution timestamp.
    pub started_at: Option<Timestamp>,
    /// Terminal timestamp.
    pub finished_at: Option<Timestamp>,
    /// Claiming runner identity, when leased.
    pub claimed_by: Option<RunnerId>,
    /// Lease expiry, when leased.
    pub claim_expires_at: Option<Timestamp>,
    /// Frozen launch params.
    pub params: Value,
    /// Optional terminal result summary.
    pub result_summary: Option<Value>,
    /// Terminal error code, when failed.
    pub error_code: Option<String>,
    /// Terminal error message, when failed.
    pub error_message: Option<String>,
}

/// Launch request accepted by the API and the scheduler hook.
///
/// # Invariants
/// - `params` defaults to an empty object when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLaunch {
    /// Plan identifier to resolve and execute.
    pub plan_id: PlanId,
    /// Launch params validated against the plan's params schema.
    #[serde(default)]
    pub params: Value,
    /// Optional launch principal.
    #[serde(default)]
    pub requested_by: Option<String>,
    /// Optional idempotency key.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

// ============================================================================
// SECTION: Task Instance
// ============================================================================

/// Task instance lifecycle status.
///
/// # Invariants
/// - Variants are stable for serialization and store round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet started.
    Pending,
    /// Handler invocation in progress.
    Running,
    /// Completed; output is frozen and never re-executed.
    Succeeded,
    /// Handler failed terminally.
    Failed,
}

impl TaskStatus {
    /// Returns the stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parses a stored status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted execution record for one task within a run.
///
/// # Invariants
/// - At most one task instance exists per `(run_id, task_id)`.
/// - Once `succeeded`, the instance is never re-executed; replay uses
///   `output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    /// Task instance identifier.
    pub task_run_id: TaskRunId,
    /// Owning run.
    pub run_id: RunId,
    /// Task definition identifier.
    pub task_id: TaskId,
    /// Position of the task in the plan's declared order.
    pub task_index: u32,
    /// Display name from the plan.
    pub task_name: String,
    /// Task type from the plan.
    pub task_type: TaskType,
    /// Task lifecycle status.
    pub status: TaskStatus,
    /// Attempts consumed so far.
    pub attempt: u32,
    /// Attempt budget declared by the plan.
    pub max_attempts: u32,
    /// Idempotency flag declared by the plan.
    pub idempotent: bool,
    /// Effective approval requirement at execution time.
    pub requires_approval: bool,
    /// Approval gate record, when one was created.
    pub approval_id: Option<ApprovalId>,
    /// First invocation timestamp.
    pub started_at: Option<Timestamp>,
    /// Terminal timestamp.
    pub finished_at: Option<Timestamp>,
    /// Raw (unresolved) task input from the plan.
    pub input: Value,
    /// Frozen handler output, when succeeded.
    pub output: Option<Value>,
    /// Terminal error code, when failed.
    pub error_code: Option<String>,
    /// Terminal error message, when failed.
    pub error_message: Option<String>,
}

// ============================================================================
// SECTION: Approval
// ============================================================================

/// Approval gate status.
///
/// # Invariants
/// - Terminal states are monotonic; a resolved approval never reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for an operator decision.
    Pending,
    /// Operator approved the gated task.
    Approved,
    /// Operator denied the gated task.
    Denied,
}

impl ApprovalStatus {
    /// Returns the stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    /// Parses a stored status label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator decision on a pending approval.
///
/// # Invariants
/// - Variants are stable for API round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Resolve the approval to `approved`.
    Approve,
    /// Resolve the approval to `denied`.
    Deny,
}

/// Manual-gate record that must be approved before a gated task executes.
///
/// # Invariants
/// - At most one approval exists per `(run_id, task_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Approval identifier.
    pub approval_id: ApprovalId,
    /// Owning run.
    pub run_id: RunId,
    /// Gated task identifier.
    pub task_id: TaskId,
    /// Approval status.
    pub status: ApprovalStatus,
    /// Operator-facing prompt.
    pub prompt: String,
    /// Preview payload shown to the operator.
    pub preview: Value,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Resolution timestamp, when resolved.
    pub resolved_at: Option<Timestamp>,
    /// Resolving principal, when resolved.
    pub resolved_by: Option<String>,
}

// ============================================================================
// SECTION: Artifact
// ============================================================================

/// On-disk file produced by or for a task, tracked by the store.
///
/// # Invariants
/// - `uri` resolves beneath the artifacts root; traversal is refused on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Artifact identifier.
    pub artifact_id: ArtifactId,
    /// Owning run.
    pub run_id: RunId,
    /// Artifact kind (html, screenshot, confirmation, receipt, task output).
    pub kind: String,
    /// Content type of the stored file.
    pub content_type: String,
    /// Path under the artifacts root.
    pub uri: String,
    /// Optional structured metadata.
    pub metadata: Option<Value>,
    /// Creation timestamp.
    pub created_at: Timestamp,
}

// ============================================================================
// SECTION: Schedule
// ============================================================================

/// Periodic-trigger record producing runs for a (broker, profile) pair.
///
/// # Invariants
/// - At most one schedule exists per `(broker_id, profile_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Schedule identifier.
    pub schedule_id: ScheduleId,
    /// Target broker.
    pub broker_id: BrokerId,
    /// PII profile the scans run for.
    pub profile_id: ProfileId,
    /// Scan type forwarded as a run param.
    pub scan_type: String,
    /// Next due time.
    pub next_run_at: Timestamp,
    /// Identifier of the most recent run created from this schedule.
    pub last_run_id: Option<RunId>,
    /// Time the most recent run was created.
    pub last_run_at: Option<Timestamp>,
    /// Re-check interval in days.
    pub interval_days: i64,
    /// Whether the scheduler considers this schedule.
    pub enabled: bool,
    /// Creation timestamp.
    pub created_at: Timestamp,
}
