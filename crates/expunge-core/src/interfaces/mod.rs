// crates/expunge-core/src/interfaces/mod.rs
// ============================================================================
// Module: Expunge Interfaces
// Description: Backend-agnostic interfaces for storage, dispatch, and launch.
// Purpose: Define the contract surfaces used by the Expunge run engine.
// Dependencies: crate::core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The engine coordinates exclusively through these seams: one relational
//! [`Store`] for all durable state, a [`TaskDispatcher`] that maps task types
//! to handlers, and a [`RunCreator`] hook the scheduler uses to enqueue runs.
//! Implementations must fail closed on missing or invalid data.
//!
//! Security posture: store contents and dispatcher inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

use crate::core::errors::RunErrorCode;
use crate::core::identifiers::ApprovalId;
use crate::core::identifiers::ArtifactId;
use crate::core::identifiers::BrokerId;
use crate::core::identifiers::PlanId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::RunnerId;
use crate::core::identifiers::ScheduleId;
use crate::core::identifiers::TaskId;
use crate::core::identifiers::TaskRunId;
use crate::core::records::ApprovalRecord;
use crate::core::records::ApprovalStatus;
use crate::core::records::ArtifactRecord;
use crate::core::records::RunRecord;
use crate::core::records::RunStatus;
use crate::core::records::ScheduleRecord;
use crate::core::records::TaskInstance;
use crate::core::records::TaskType;
use crate::core::retry::TaskError;
use crate::core::template::ReferenceContext;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Store Errors
// ============================================================================

/// Store errors surfaced to the engine and the API adapter.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - Messages avoid embedding raw run params or PII.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Database engine error.
    #[error("store db error: {0}")]
    Db(String),
    /// Uniqueness conflict (idempotency key, task instance, approval).
    #[error("store conflict: {0}")]
    Conflict(String),
    /// Referenced row does not exist.
    #[error("store row not found: {0}")]
    NotFound(String),
    /// Stored data failed to decode.
    #[error("store invalid data: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// One relational store for runs, tasks, approvals, artifacts, and schedules.
///
/// All cross-worker state transitions are expressed as conditional updates;
/// callers never hold table-level locks.
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Inserts a queued run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when the idempotency key already
    /// exists, and other variants on storage failure.
    fn insert_run(&self, run: &RunRecord) -> Result<(), StoreError>;

    /// Loads a run by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError>;

    /// Loads a run by its idempotency key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn run_by_idempotency_key(&self, key: &str) -> Result<Option<RunRecord>, StoreError>;

    /// Returns up to `limit` claimable runs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn claim_candidates(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError>;

    /// Attempts the conditional claim update for one run.
    ///
    /// Succeeds iff the run is still claimable and the current claim is
    /// null, held by `runner_id`, or expired relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn try_claim(
        &self,
        run_id: &RunId,
        runner_id: &RunnerId,
        lease_until: Timestamp,
        now: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Reissues the lease for a run already claimed by `runner_id`.
    ///
    /// Returns `false` when the claim was stolen (zero rows affected).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn renew_claim(
        &self,
        run_id: &RunId,
        runner_id: &RunnerId,
        lease_until: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Clears the claim columns for a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn clear_claim(&self, run_id: &RunId) -> Result<(), StoreError>;

    /// Sets a run's status without touching claim or terminal columns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn set_run_status(&self, run_id: &RunId, status: RunStatus) -> Result<(), StoreError>;

    /// Marks a run running, stamping `started_at` on first execution only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn mark_run_started(&self, run_id: &RunId, started_at: Timestamp) -> Result<(), StoreError>;

    /// Marks a run succeeded and clears its claim.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn mark_run_succeeded(
        &self,
        run_id: &RunId,
        finished_at: Timestamp,
        result_summary: Option<&Value>,
    ) -> Result<(), StoreError>;

    /// Marks a run failed with a terminal error code and clears its claim.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn mark_run_failed(
        &self,
        run_id: &RunId,
        code: RunErrorCode,
        message: &str,
        finished_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Moves a run to `blocked_for_approval` and clears its claim.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn mark_run_blocked(&self, run_id: &RunId) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Task instances
    // ------------------------------------------------------------------

    /// Loads the task instance for `(run_id, task_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn task_instance(
        &self,
        run_id: &RunId,
        task_id: &TaskId,
    ) -> Result<Option<TaskInstance>, StoreError>;

    /// Loads all succeeded task instances for a run, in plan order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn succeeded_tasks(&self, run_id: &RunId) -> Result<Vec<TaskInstance>, StoreError>;

    /// Loads the earliest still-running task instance for a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn running_task(&self, run_id: &RunId) -> Result<Option<TaskInstance>, StoreError>;

    /// Inserts a task instance.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when `(run_id, task_id)` exists.
    fn insert_task_instance(&self, task: &TaskInstance) -> Result<(), StoreError>;

    /// Marks a task instance succeeded with its frozen output.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn mark_task_succeeded(
        &self,
        task_run_id: &TaskRunId,
        output: &Value,
        finished_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Marks a task instance failed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn mark_task_failed(
        &self,
        task_run_id: &TaskRunId,
        message: &str,
        finished_at: Timestamp,
    ) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Approvals
    // ------------------------------------------------------------------

    /// Loads the approval gating `(run_id, task_id)`, when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn approval_for_task(
        &self,
        run_id: &RunId,
        task_id: &TaskId,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    /// Loads an approval by identifier within a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn approval(
        &self,
        run_id: &RunId,
        approval_id: &ApprovalId,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    /// Inserts a pending approval.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when `(run_id, task_id)` exists.
    fn insert_approval(&self, approval: &ApprovalRecord) -> Result<(), StoreError>;

    /// Resolves a pending approval; terminal states are monotonic.
    ///
    /// Returns `false` when the approval was already resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn resolve_approval(
        &self,
        approval_id: &ApprovalId,
        status: ApprovalStatus,
        resolved_by: Option<&str>,
        resolved_at: Timestamp,
    ) -> Result<bool, StoreError>;

    /// Loads every approval attached to a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn approvals_for_run(&self, run_id: &RunId) -> Result<Vec<ApprovalRecord>, StoreError>;

    /// Counts pending approvals for one run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn pending_approvals_for_run(&self, run_id: &RunId) -> Result<u64, StoreError>;

    /// Counts pending approvals across all runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn pending_approvals_total(&self) -> Result<u64, StoreError>;

    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    /// Inserts an artifact row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn insert_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError>;

    /// Loads the artifacts attached to a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn artifacts_for_run(&self, run_id: &RunId) -> Result<Vec<ArtifactRecord>, StoreError>;

    /// Loads an artifact by identifier within a run.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn artifact(
        &self,
        run_id: &RunId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<ArtifactRecord>, StoreError>;

    /// Loads every artifact row (retention sweep scan).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn all_artifacts(&self) -> Result<Vec<ArtifactRecord>, StoreError>;

    /// Deletes an artifact row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn delete_artifact(&self, artifact_id: &ArtifactId) -> Result<(), StoreError>;

    // ------------------------------------------------------------------
    // Schedules
    // ------------------------------------------------------------------

    /// Inserts a schedule unless `(broker_id, profile_id)` already exists.
    ///
    /// Returns `true` when a row was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn insert_schedule_if_absent(&self, schedule: &ScheduleRecord) -> Result<bool, StoreError>;

    /// Loads a schedule by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn schedule(&self, schedule_id: &ScheduleId) -> Result<Option<ScheduleRecord>, StoreError>;

    /// Returns enabled schedules due at or before `now`, soonest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn due_schedules(&self, now: Timestamp) -> Result<Vec<ScheduleRecord>, StoreError>;

    /// Returns all enabled schedules ordered by `next_run_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn enabled_schedules(&self) -> Result<Vec<ScheduleRecord>, StoreError>;

    /// Records a schedule firing and advances `next_run_at` by its interval.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn advance_schedule(
        &self,
        schedule_id: &ScheduleId,
        last_run_id: &RunId,
        now: Timestamp,
    ) -> Result<(), StoreError>;

    /// Disables every enabled schedule for a broker.
    ///
    /// Returns the number of schedules disabled.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn disable_schedules_for_broker(&self, broker_id: &BrokerId) -> Result<u64, StoreError>;

    /// Makes a schedule due immediately.
    ///
    /// Returns `false` when the schedule does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    fn trigger_schedule_now(
        &self,
        schedule_id: &ScheduleId,
        now: Timestamp,
    ) -> Result<bool, StoreError>;
}

// ============================================================================
// SECTION: Task Dispatcher
// ============================================================================

/// One dispatcher invocation: a resolved task plus its execution bounds.
///
/// # Invariants
/// - `input` is the raw plan input; the dispatcher resolves references.
#[derive(Debug, Clone)]
pub struct TaskCall {
    /// Owning run.
    pub run_id: RunId,
    /// Task definition identifier.
    pub task_id: TaskId,
    /// Task type selecting the handler.
    pub task_type: TaskType,
    /// Raw task input from the plan.
    pub input: Value,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Maps task types to handlers and executes one call.
pub trait TaskDispatcher: Send + Sync {
    /// Resolves references in the call input and invokes the handler.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] with the handler's transience classification.
    fn execute(&self, call: &TaskCall, ctx: &ReferenceContext) -> Result<Value, TaskError>;
}

// ============================================================================
// SECTION: Run Creation Hook
// ============================================================================

/// Hook the scheduler uses to enqueue runs for due schedules.
pub trait RunCreator: Send + Sync {
    /// Creates a queued run for the plan, returning its id on success.
    ///
    /// Implementations log and absorb failures; `None` tells the scheduler
    /// to advance the schedule with a synthetic sentinel instead.
    fn create_run(&self, plan_id: &PlanId, params: Value) -> Option<RunId>;
}
