// crates/expunge-engine/src/runner.rs
// ============================================================================
// Module: Run Engine
// Description: Claim, execute, and commit loop with the per-task state machine.
// Purpose: Drive claimed runs to terminal state under leases and approvals.
// Dependencies: crate::{artifacts, dead_letter, metrics}, expunge-config,
// expunge-core, expunge-plans, tracing, uuid
// ============================================================================

//! ## Overview
//! A runner owns a unique identity for its lifetime and loops once per tick:
//! claim the oldest claimable run via a conditional update, re-verify the
//! plan hash, then walk the plan's tasks in declared order. Succeeded task
//! instances are never re-executed — their frozen outputs rebuild the state
//! map, which is what makes crash recovery a replay instead of a redo. The
//! lease is renewed before every task; a failed renewal means the run was
//! stolen and execution stops immediately. Side-effect tasks gate on
//! approvals; a pending approval suspends the run out of the worker
//! entirely.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use expunge_config::ExecutorConfig;
use expunge_core::ApprovalId;
use expunge_core::ApprovalRecord;
use expunge_core::ApprovalStatus;
use expunge_core::ReferenceContext;
use expunge_core::RetryPolicy;
use expunge_core::RunErrorCode;
use expunge_core::RunRecord;
use expunge_core::RunStatus;
use expunge_core::RunnerId;
use expunge_core::Store;
use expunge_core::TaskCall;
use expunge_core::TaskDispatcher;
use expunge_core::TaskInstance;
use expunge_core::TaskRunId;
use expunge_core::TaskStatus;
use expunge_core::TaskType;
use expunge_core::Timestamp;
use expunge_core::redact_error_message;
use expunge_core::with_retries;
use expunge_plans::Plan;
use expunge_plans::PlanError;
use expunge_plans::TaskDef;
use expunge_plans::hash_plan;
use expunge_plans::load_plan;

use crate::artifacts::persist_artifact;
use crate::dead_letter::DeadLetterController;
use crate::dead_letter::broker_id_for_plan;
use crate::metrics::EngineMetrics;
use crate::scheduler::sleep_until_stop;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Runner control-loop tick.
const TICK: Duration = Duration::from_secs(1);

/// Minimum claim lease TTL in seconds.
const MIN_CLAIM_TTL_SECONDS: u64 = 30;

/// HTTP methods that carry no side effect.
const HTTP_SAFE_METHODS: [&str; 3] = ["GET", "HEAD", "OPTIONS"];

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Runner settings snapshot taken from the executor config.
///
/// # Invariants
/// - `claim_ttl_seconds` is clamped to at least 30 at use.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Parallel-runner budget used to size the candidate scan.
    pub max_concurrent_runs: u32,
    /// Claim lease TTL in seconds.
    pub claim_ttl_seconds: u64,
    /// Wall-clock run timeout in milliseconds.
    pub run_timeout_ms: u64,
    /// Fallback per-task timeout in milliseconds.
    pub default_timeout_ms: u64,
    /// Retry policy combined with per-task budgets.
    pub retry: RetryPolicy,
    /// Gate side-effect tasks behind approvals.
    pub side_effects_require_approval: bool,
    /// Root directory of plan files.
    pub plans_root: PathBuf,
    /// Root directory of run artifacts.
    pub artifacts_root: PathBuf,
    /// Scrub PII from persisted error messages.
    pub log_redaction: bool,
    /// Configured literal terms scrubbed from persisted error messages, on
    /// top of the built-in patterns and the per-run profile fields.
    pub redact_terms: Vec<String>,
}

impl RunnerSettings {
    /// Snapshots runner settings from the executor config.
    #[must_use]
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_concurrent_runs: config.max_concurrent_runs,
            claim_ttl_seconds: config.run_claim_ttl_seconds,
            run_timeout_ms: config.run_timeout_ms,
            default_timeout_ms: config.default_timeout_ms,
            retry: RetryPolicy {
                attempts: config.retry.attempts,
                min_delay_ms: config.retry.min_delay_ms,
                max_delay_ms: config.retry.max_delay_ms,
                jitter: config.retry.jitter,
            },
            side_effects_require_approval: config.policy.side_effects_require_approval,
            plans_root: config.plans_root.clone(),
            artifacts_root: config.artifacts_root.clone(),
            log_redaction: config.pii.log_redaction,
            redact_terms: config.pii.redact_terms.clone(),
        }
    }
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Outcome of one run-execution pass.
enum RunOutcome {
    /// Run reached a terminal or suspended state; nothing more to do.
    Settled,
    /// The lease was stolen mid-run; the new owner resumes it.
    ClaimLost,
}

/// Single long-lived run executor with a unique identity.
///
/// # Invariants
/// - `runner_id` is fixed for the runner's lifetime.
pub struct Runner {
    /// Runner identity used for claims.
    runner_id: RunnerId,
    /// Settings snapshot.
    settings: RunnerSettings,
    /// Shared store.
    store: Arc<dyn Store>,
    /// Task dispatcher.
    dispatcher: Arc<dyn TaskDispatcher>,
    /// Dead-letter controller notified of terminal outcomes.
    dead_letter: Arc<DeadLetterController>,
    /// Engine metrics.
    metrics: Arc<EngineMetrics>,
}

impl Runner {
    /// Creates a runner with a fresh unique identity.
    #[must_use]
    pub fn new(
        settings: RunnerSettings,
        store: Arc<dyn Store>,
        dispatcher: Arc<dyn TaskDispatcher>,
        dead_letter: Arc<DeadLetterController>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            runner_id: RunnerId::new(Uuid::new_v4().to_string()),
            settings,
            store,
            dispatcher,
            dead_letter,
            metrics,
        }
    }

    /// Returns this runner's identity.
    #[must_use]
    pub const fn runner_id(&self) -> &RunnerId {
        &self.runner_id
    }

    /// Returns the lease expiry for a claim taken at `now`.
    fn lease_until(&self, now: Timestamp) -> Timestamp {
        let ttl = self.settings.claim_ttl_seconds.max(MIN_CLAIM_TTL_SECONDS);
        now.plus_seconds(i64::try_from(ttl).unwrap_or(i64::MAX))
    }

    /// Runs the control loop until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        tracing::info!(runner_id = self.runner_id.as_str(), "runner.started");
        while !stop.load(Ordering::Relaxed) {
            if let Err(error) = self.process_once() {
                tracing::error!(error = %error, "runner.loop_error");
            }
            sleep_until_stop(TICK, stop);
        }
        tracing::info!(runner_id = self.runner_id.as_str(), "runner.stopped");
    }

    /// Claims and executes at most one run.
    ///
    /// # Errors
    ///
    /// Returns a message for unexpected store failures; per-run failures are
    /// committed to the run record instead.
    pub fn process_once(&self) -> Result<(), String> {
        if let Ok(pending) = self.store.pending_approvals_total() {
            self.metrics.approvals_pending.set(i64::try_from(pending).unwrap_or(i64::MAX));
        }

        let Some(run) = self.claim_next_run().map_err(|error| error.to_string())? else {
            return Ok(());
        };

        if run.status == RunStatus::BlockedForApproval {
            let pending = self
                .store
                .pending_approvals_for_run(&run.run_id)
                .map_err(|error| error.to_string())?;
            if pending > 0 {
                // Still waiting on an operator; hand the run back.
                self.store.clear_claim(&run.run_id).map_err(|error| error.to_string())?;
                return Ok(());
            }
            self.store
                .set_run_status(&run.run_id, RunStatus::Queued)
                .map_err(|error| error.to_string())?;
        }

        match self.execute_run(&run) {
            Ok(RunOutcome::Settled) => {}
            Ok(RunOutcome::ClaimLost) => {
                tracing::warn!(run_id = run.run_id.as_str(), "run.claim_lost");
            }
            Err(error) => return Err(error),
        }
        Ok(())
    }

    /// Scans candidates oldest-first and takes the first claim that lands.
    fn claim_next_run(&self) -> Result<Option<RunRecord>, expunge_core::StoreError> {
        let now = Timestamp::now();
        let limit = self.settings.max_concurrent_runs.max(1).saturating_mul(4);
        for candidate in self.store.claim_candidates(limit)? {
            if self.store.try_claim(&candidate.run_id, &self.runner_id, self.lease_until(now), now)?
            {
                return self.store.run(&candidate.run_id);
            }
        }
        Ok(None)
    }

    /// Scrubs a message with configured terms plus the run's profile fields.
    fn scrub(&self, message: &str, state: Option<&Map<String, Value>>) -> String {
        if !self.settings.log_redaction {
            return message.to_string();
        }
        let mut terms = self.settings.redact_terms.clone();
        if let Some(state) = state {
            terms.extend(profile_redaction_terms(state));
        }
        redact_error_message(message, &terms)
    }

    /// Marks the run failed with a scrubbed message and reports dead-letter.
    fn fail_run(&self, run: &RunRecord, code: RunErrorCode, message: &str) -> Result<(), String> {
        let scrubbed = self.scrub(message, None);
        self.store
            .mark_run_failed(&run.run_id, code, &scrubbed, Timestamp::now())
            .map_err(|error| error.to_string())?;
        self.metrics.runs_finished.with_label_values(&[run.plan_id.as_str(), "failed"]).inc();
        let broker = broker_id_for_plan(&run.plan_id);
        self.dead_letter.record_failure(&broker, &run.run_id, Some(&scrubbed));
        tracing::warn!(run_id = run.run_id.as_str(), code = code.as_str(), "run.failed");
        Ok(())
    }

    /// Executes a claimed run through the per-task loop.
    fn execute_run(&self, run: &RunRecord) -> Result<RunOutcome, String> {
        if !self
            .store
            .renew_claim(&run.run_id, &self.runner_id, self.lease_until(Timestamp::now()))
            .map_err(|error| error.to_string())?
        {
            return Ok(RunOutcome::ClaimLost);
        }

        // Plan-hash check: the stored hash must match the file as it exists
        // now, otherwise the run's frozen semantics are gone.
        let plan = match load_plan(&self.settings.plans_root, &run.plan_id) {
            Ok(plan) => plan,
            Err(PlanError::NotFound(_)) => {
                self.fail_run(run, RunErrorCode::PlanNotFound, "plan file no longer resolves")?;
                return Ok(RunOutcome::Settled);
            }
            Err(error) => {
                self.fail_run(run, RunErrorCode::TaskExecutionFailed, &error.to_string())?;
                return Ok(RunOutcome::Settled);
            }
        };
        let current_hash = hash_plan(&plan).map_err(|error| error.to_string())?;
        if current_hash != run.plan_hash {
            self.fail_run(
                run,
                RunErrorCode::PlanHashMismatch,
                "Plan definition changed after run creation",
            )?;
            return Ok(RunOutcome::Settled);
        }

        let started_at = run.started_at.unwrap_or_else(Timestamp::now);
        if self.run_timed_out(started_at) {
            self.fail_run(
                run,
                RunErrorCode::RunTimeout,
                &format!(
                    "Run exceeded wall-clock timeout of {}ms",
                    self.settings.run_timeout_ms
                ),
            )?;
            return Ok(RunOutcome::Settled);
        }
        self.store
            .mark_run_started(&run.run_id, started_at)
            .map_err(|error| error.to_string())?;

        let targets = targets_value(&plan);
        let mut state = self.replay_state(run, &plan)?;

        for (index, task) in plan.tasks.iter().enumerate() {
            if !self
                .store
                .renew_claim(&run.run_id, &self.runner_id, self.lease_until(Timestamp::now()))
                .map_err(|error| error.to_string())?
            {
                return Ok(RunOutcome::ClaimLost);
            }
            if self.run_timed_out(started_at) {
                self.fail_run(
                    run,
                    RunErrorCode::RunTimeout,
                    &format!(
                        "Run exceeded wall-clock timeout of {}ms",
                        self.settings.run_timeout_ms
                    ),
                )?;
                return Ok(RunOutcome::Settled);
            }

            let existing = self
                .store
                .task_instance(&run.run_id, &task.id)
                .map_err(|error| error.to_string())?;
            if let Some(existing) = &existing
                && existing.status == TaskStatus::Succeeded
            {
                apply_output(&mut state, task, existing.output.clone().unwrap_or(Value::Null));
                continue;
            }

            for dep in &task.depends_on {
                let satisfied = self
                    .store
                    .task_instance(&run.run_id, dep)
                    .map_err(|error| error.to_string())?
                    .is_some_and(|row| row.status == TaskStatus::Succeeded);
                if !satisfied {
                    self.fail_run(
                        run,
                        RunErrorCode::DepUnsatisfied,
                        &format!("Dependency not satisfied for {}: {dep}", task.id),
                    )?;
                    return Ok(RunOutcome::Settled);
                }
            }

            let requires_approval = task.requires_approval
                || (self.settings.side_effects_require_approval && task_has_side_effect(task));
            if requires_approval {
                match self.gate_on_approval(run, task)? {
                    ApprovalGate::Proceed => {}
                    ApprovalGate::Blocked => {
                        self.store
                            .mark_run_blocked(&run.run_id)
                            .map_err(|error| error.to_string())?;
                        return Ok(RunOutcome::Settled);
                    }
                    ApprovalGate::Denied => {
                        self.fail_run(
                            run,
                            RunErrorCode::ApprovalDenied,
                            &format!("Approval denied for task {}", task.id),
                        )?;
                        return Ok(RunOutcome::Settled);
                    }
                }
            }

            let task_run_id = match existing {
                Some(row) => row.task_run_id,
                None => {
                    let approval_id = self
                        .store
                        .approval_for_task(&run.run_id, &task.id)
                        .map_err(|error| error.to_string())?
                        .map(|approval| approval.approval_id);
                    let row = new_task_instance(run, task, index, requires_approval, approval_id);
                    self.store
                        .insert_task_instance(&row)
                        .map_err(|error| error.to_string())?;
                    row.task_run_id
                }
            };

            match self.invoke_task(run, task, &targets, &state) {
                Ok(output) => {
                    self.store
                        .mark_task_succeeded(&task_run_id, &output, Timestamp::now())
                        .map_err(|error| error.to_string())?;
                    let kind = task
                        .output
                        .as_ref()
                        .and_then(|spec| spec.artifact_kind.clone())
                        .unwrap_or_else(|| task.task_type.as_str().to_string());
                    if let Err(error) = persist_artifact(
                        self.store.as_ref(),
                        &self.settings.artifacts_root,
                        &run.run_id,
                        &kind,
                        &output,
                        "application/json",
                        Some(json!({"task_id": task.id.as_str()})),
                    ) {
                        self.fail_run(run, RunErrorCode::TaskExecutionFailed, &error.to_string())?;
                        return Ok(RunOutcome::Settled);
                    }
                    if matches!(
                        task.task_type,
                        TaskType::QueueHumanAction | TaskType::CaptchaSolve
                    ) {
                        let broker = broker_id_for_plan(&run.plan_id);
                        self.metrics
                            .human_queue_items
                            .with_label_values(&[broker.as_str()])
                            .inc();
                    }
                    apply_output(&mut state, task, output);
                }
                Err(error) => {
                    // The state map carries the decrypted profile when a plan
                    // loaded one, so handler messages echoing profile fields
                    // are scrubbed before they reach any row.
                    let scrubbed = self.scrub(error.message(), Some(&state));
                    self.store
                        .mark_task_failed(&task_run_id, &scrubbed, Timestamp::now())
                        .map_err(|error| error.to_string())?;
                    self.fail_run(run, RunErrorCode::TaskExecutionFailed, &scrubbed)?;
                    return Ok(RunOutcome::Settled);
                }
            }
        }

        self.store
            .mark_run_succeeded(&run.run_id, Timestamp::now(), None)
            .map_err(|error| error.to_string())?;
        self.metrics.runs_finished.with_label_values(&[run.plan_id.as_str(), "succeeded"]).inc();
        self.dead_letter.record_success(&broker_id_for_plan(&run.plan_id));
        tracing::info!(run_id = run.run_id.as_str(), "run.succeeded");
        Ok(RunOutcome::Settled)
    }

    /// Returns whether the run's wall clock has lapsed.
    fn run_timed_out(&self, started_at: Timestamp) -> bool {
        Timestamp::now().millis_since(started_at)
            > i64::try_from(self.settings.run_timeout_ms).unwrap_or(i64::MAX)
    }

    /// Rebuilds the state map from succeeded task instances.
    fn replay_state(&self, run: &RunRecord, plan: &Plan) -> Result<Map<String, Value>, String> {
        let mut state = Map::new();
        for row in
            self.store.succeeded_tasks(&run.run_id).map_err(|error| error.to_string())?
        {
            let output = row.output.clone().unwrap_or(Value::Null);
            state.insert(row.task_id.as_str().to_string(), output.clone());
            if let Some(alias) = plan
                .task(&row.task_id)
                .and_then(|def| def.output.as_ref())
                .and_then(|spec| spec.save_as.as_deref())
            {
                state.insert(alias.to_string(), output);
            }
        }
        Ok(state)
    }

    /// Fetches or creates the approval for a gated task and reads its state.
    fn gate_on_approval(&self, run: &RunRecord, task: &TaskDef) -> Result<ApprovalGate, String> {
        let approval = match self
            .store
            .approval_for_task(&run.run_id, &task.id)
            .map_err(|error| error.to_string())?
        {
            Some(approval) => approval,
            None => {
                let prompt = task
                    .approval
                    .as_ref()
                    .and_then(|meta| meta.get("prompt"))
                    .and_then(Value::as_str)
                    .map_or_else(
                        || {
                            format!(
                                "Approve side effect task '{}' ({})",
                                task.name, task.task_type
                            )
                        },
                        str::to_string,
                    );
                let approval = ApprovalRecord {
                    approval_id: ApprovalId::new(Uuid::new_v4().to_string()),
                    run_id: run.run_id.clone(),
                    task_id: task.id.clone(),
                    status: ApprovalStatus::Pending,
                    prompt,
                    preview: json!({
                        "task_id": task.id.as_str(),
                        "task_name": task.name,
                        "task_type": task.task_type.as_str(),
                        "input": task.input,
                    }),
                    created_at: Timestamp::now(),
                    resolved_at: None,
                    resolved_by: None,
                };
                self.store.insert_approval(&approval).map_err(|error| error.to_string())?;
                approval
            }
        };
        Ok(match approval.status {
            ApprovalStatus::Pending => ApprovalGate::Blocked,
            ApprovalStatus::Denied => ApprovalGate::Denied,
            ApprovalStatus::Approved => ApprovalGate::Proceed,
        })
    }

    /// Invokes the dispatcher under the retry policy.
    fn invoke_task(
        &self,
        run: &RunRecord,
        task: &TaskDef,
        targets: &Value,
        state: &Map<String, Value>,
    ) -> Result<Value, expunge_core::TaskError> {
        let policy = self.settings.retry.with_task_budget(task.max_attempts);
        let idempotent = effective_idempotency(task);
        let timeout_ms =
            if task.timeout_ms > 0 { task.timeout_ms } else { self.settings.default_timeout_ms };
        let call = TaskCall {
            run_id: run.run_id.clone(),
            task_id: task.id.clone(),
            task_type: task.task_type,
            input: task.input.clone(),
            timeout_ms,
        };
        let started = Instant::now();
        let result = with_retries(&policy, idempotent, || {
            let ctx = ReferenceContext::new(
                run.params.clone(),
                targets.clone(),
                Value::Object(state.clone()),
            );
            self.dispatcher.execute(&call, &ctx)
        });
        self.metrics
            .task_duration
            .with_label_values(&[task.task_type.as_str()])
            .observe(started.elapsed().as_secs_f64());
        result
    }
}

/// Approval-gate decision for one task.
enum ApprovalGate {
    /// Approved; execute the task.
    Proceed,
    /// Pending; suspend the run.
    Blocked,
    /// Denied; fail the run.
    Denied,
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// State key under which plans store the decrypted profile.
const PROFILE_STATE_KEY: &str = "profile_data";

/// Collects redaction terms from the decrypted profile in run state.
///
/// Name, aliases, email addresses, and phone numbers are the fields broker
/// pages and handler errors echo back most often.
fn profile_redaction_terms(state: &Map<String, Value>) -> Vec<String> {
    let Some(profile) = state.get(PROFILE_STATE_KEY) else {
        return Vec::new();
    };
    let mut terms = Vec::new();
    if let Some(name) = profile.get("full_name").and_then(Value::as_str) {
        terms.push(name.to_string());
    }
    for key in ["aliases", "email_addresses"] {
        if let Some(items) = profile.get(key).and_then(Value::as_array) {
            terms.extend(items.iter().filter_map(Value::as_str).map(str::to_string));
        }
    }
    if let Some(phones) = profile.get("phone_numbers").and_then(Value::as_array) {
        for phone in phones {
            if let Some(number) =
                phone.get("number").and_then(Value::as_str).or_else(|| phone.as_str())
            {
                terms.push(number.to_string());
            }
        }
    }
    terms
}

/// Builds the targets context object keyed by target id.
fn targets_value(plan: &Plan) -> Value {
    let mut targets = Map::new();
    for target in &plan.targets {
        targets.insert(
            target.target_id.clone(),
            json!({
                "target_id": target.target_id,
                "kind": target.kind,
                "base_url": target.base_url,
                "notes": target.notes,
            }),
        );
    }
    Value::Object(targets)
}

/// Writes a task output into the state map, including its alias.
fn apply_output(state: &mut Map<String, Value>, task: &TaskDef, output: Value) {
    if let Some(alias) = task.output.as_ref().and_then(|spec| spec.save_as.as_deref()) {
        state.insert(alias.to_string(), output.clone());
    }
    state.insert(task.id.as_str().to_string(), output);
}

/// Returns whether executing this task mutates external state.
fn task_has_side_effect(task: &TaskDef) -> bool {
    if task.task_type.is_side_effect() {
        return true;
    }
    if task.task_type == TaskType::HttpRequest {
        let method = task
            .input
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_ascii_uppercase();
        return !HTTP_SAFE_METHODS.contains(&method.as_str());
    }
    false
}

/// Effective retry idempotency: non-safe HTTP verbs are downgraded.
fn effective_idempotency(task: &TaskDef) -> bool {
    task.idempotent && !(task.task_type == TaskType::HttpRequest && task_has_side_effect(task))
}

/// Builds a fresh running task instance row.
fn new_task_instance(
    run: &RunRecord,
    task: &TaskDef,
    index: usize,
    requires_approval: bool,
    approval_id: Option<ApprovalId>,
) -> TaskInstance {
    TaskInstance {
        task_run_id: TaskRunId::new(Uuid::new_v4().to_string()),
        run_id: run.run_id.clone(),
        task_id: task.id.clone(),
        task_index: u32::try_from(index).unwrap_or(u32::MAX),
        task_name: task.name.clone(),
        task_type: task.task_type,
        status: TaskStatus::Running,
        attempt: 0,
        max_attempts: task.max_attempts,
        idempotent: task.idempotent,
        requires_approval,
        approval_id,
        started_at: Some(Timestamp::now()),
        finished_at: None,
        input: task.input.clone(),
        output: None,
        error_code: None,
        error_message: None,
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

    use serde_json::json;

    use expunge_core::TaskId;
    use expunge_core::TaskType;
    use expunge_plans::TaskDef;

    use super::RunnerSettings;
    use super::effective_idempotency;
    use super::profile_redaction_terms;
    use super::task_has_side_effect;

    /// Task definition fixture.
    fn task(task_type: TaskType, input: serde_json::Value, idempotent: bool) -> TaskDef {
        TaskDef {
            id: TaskId::new("t"),
            name: "t".to_string(),
            task_type,
            depends_on: Vec::new(),
            idempotent,
            max_attempts: 3,
            timeout_ms: 30_000,
            requires_approval: false,
            approval: None,
            input,
            output: None,
        }
    }

    #[test]
    fn side_effect_types_and_unsafe_http_are_flagged() {
        assert!(task_has_side_effect(&task(TaskType::FormSubmit, json!({}), false)));
        assert!(task_has_side_effect(&task(TaskType::EmailSend, json!({}), false)));
        assert!(task_has_side_effect(&task(
            TaskType::HttpRequest,
            json!({"method": "POST"}),
            true
        )));
        assert!(!task_has_side_effect(&task(TaskType::HttpRequest, json!({}), true)));
        assert!(!task_has_side_effect(&task(TaskType::ScrapeStatic, json!({}), true)));
    }

    #[test]
    fn profile_terms_come_from_the_state_map() {
        let state = json!({
            "profile_data": {
                "full_name": "Jane Ann Doe",
                "aliases": ["Janie Doe"],
                "email_addresses": ["jane@example.net"],
                "phone_numbers": [{"number": "312-555-0134"}, "312-555-9999"],
            },
            "scan": {"found": 2},
        });
        let terms = profile_redaction_terms(state.as_object().unwrap());
        assert_eq!(terms, vec![
            "Jane Ann Doe".to_string(),
            "Janie Doe".to_string(),
            "jane@example.net".to_string(),
            "312-555-0134".to_string(),
            "312-555-9999".to_string(),
        ]);

        let empty = json!({"scan": {"found": 2}});
        assert!(profile_redaction_terms(empty.as_object().unwrap()).is_empty());
    }

    #[test]
    fn settings_carry_the_configured_redaction_section() {
        let document = [
            "bind_host: 127.0.0.1",
            "bind_port: 8085",
            "auth_token: secret-token",
            "database_path: /tmp/expunge.db",
            "plans_root: /tmp/plans",
            "artifacts_root: /tmp/artifacts",
            "pii:",
            "  log_redaction: true",
            "  redact_terms:",
            "    - Jane Ann Doe",
            "    - case-8841",
        ]
        .join("\n");
        let config = expunge_config::load_config_str(&document).unwrap();
        let settings = RunnerSettings::from_config(&config);
        assert!(settings.log_redaction);
        assert_eq!(settings.redact_terms, vec![
            "Jane Ann Doe".to_string(),
            "case-8841".to_string()
        ]);
    }

    #[test]
    fn unsafe_http_idempotency_is_downgraded() {
        // A plan author cannot opt a POST into automatic retries.
        assert!(!effective_idempotency(&task(
            TaskType::HttpRequest,
            json!({"method": "POST"}),
            true
        )));
        assert!(effective_idempotency(&task(TaskType::HttpRequest, json!({}), true)));
        assert!(effective_idempotency(&task(TaskType::ScrapeRendered, json!({}), true)));
    }
}
