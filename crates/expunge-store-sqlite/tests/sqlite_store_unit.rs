// crates/expunge-store-sqlite/tests/sqlite_store_unit.rs
// ============================================================================
// Module: SQLite Store Unit Tests
// Description: Claim protocol, idempotency gate, and schedule behavior.
// ============================================================================
//! ## Overview
//! Exercises the conditional-claim updates, the idempotency uniqueness
//! arbiter, monotonic approval resolution, and schedule advancement against
//! a temporary database.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use serde_json::json;
use tempfile::TempDir;

use expunge_core::ApprovalId;
use expunge_core::ApprovalRecord;
use expunge_core::ApprovalStatus;
use expunge_core::ArtifactId;
use expunge_core::ArtifactRecord;
use expunge_core::BrokerId;
use expunge_core::PlanId;
use expunge_core::ProfileId;
use expunge_core::RunErrorCode;
use expunge_core::RunId;
use expunge_core::RunRecord;
use expunge_core::RunStatus;
use expunge_core::RunnerId;
use expunge_core::ScheduleId;
use expunge_core::ScheduleRecord;
use expunge_core::Store;
use expunge_core::StoreError;
use expunge_core::TaskId;
use expunge_core::TaskInstance;
use expunge_core::TaskRunId;
use expunge_core::TaskStatus;
use expunge_core::TaskType;
use expunge_core::Timestamp;
use expunge_store_sqlite::SqliteStore;

/// Opens a store in a fresh temporary directory.
fn open_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteStore::open_at(&dir.path().join("store.db")).expect("open store");
    (dir, store)
}

/// Builds a queued run record.
fn queued_run(run_id: &str, key: Option<&str>) -> RunRecord {
    RunRecord {
        run_id: RunId::new(run_id),
        plan_id: PlanId::new("broker_sample"),
        plan_hash: "abc123".to_string(),
        status: RunStatus::Queued,
        requested_by: Some("tester".to_string()),
        idempotency_key: key.map(str::to_string),
        created_at: Timestamp::from_millis(1_000),
        started_at: None,
        finished_at: None,
        claimed_by: None,
        claim_expires_at: None,
        params: json!({"profile_id": "p-1"}),
        result_summary: None,
        error_code: None,
        error_message: None,
    }
}

/// Builds a pending task instance.
fn pending_task(run_id: &str, task_id: &str, index: u32) -> TaskInstance {
    TaskInstance {
        task_run_id: TaskRunId::new(format!("{run_id}-{task_id}")),
        run_id: RunId::new(run_id),
        task_id: TaskId::new(task_id),
        task_index: index,
        task_name: task_id.to_string(),
        task_type: TaskType::HttpRequest,
        status: TaskStatus::Running,
        attempt: 0,
        max_attempts: 3,
        idempotent: true,
        requires_approval: false,
        approval_id: None,
        started_at: Some(Timestamp::from_millis(2_000)),
        finished_at: None,
        input: json!({"path": "/"}),
        output: None,
        error_code: None,
        error_message: None,
    }
}

// ============================================================================
// SECTION: Idempotency Gate
// ============================================================================

#[test]
fn duplicate_idempotency_key_is_a_conflict() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", Some("k1"))).unwrap();
    let error = store.insert_run(&queued_run("r-2", Some("k1"))).unwrap_err();
    assert!(matches!(error, StoreError::Conflict(_)));

    // The loser rereads the winner through the key.
    let winner = store.run_by_idempotency_key("k1").unwrap().unwrap();
    assert_eq!(winner.run_id.as_str(), "r-1");
}

#[test]
fn null_idempotency_keys_do_not_collide() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    store.insert_run(&queued_run("r-2", None)).unwrap();
    assert!(store.run(&RunId::new("r-2")).unwrap().is_some());
}

// ============================================================================
// SECTION: Claim Protocol
// ============================================================================

#[test]
fn claim_renew_and_steal_follow_lease_expiry() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    let r1 = RunnerId::new("runner-1");
    let r2 = RunnerId::new("runner-2");
    let now = Timestamp::from_millis(10_000);
    let lease = now.plus_seconds(60);

    assert!(store.try_claim(&RunId::new("r-1"), &r1, lease, now).unwrap());
    // A second runner cannot steal a live lease.
    assert!(!store.try_claim(&RunId::new("r-1"), &r2, lease, now).unwrap());
    // The owner may renew and re-claim.
    assert!(store.renew_claim(&RunId::new("r-1"), &r1, lease.plus_seconds(60)).unwrap());
    assert!(store.try_claim(&RunId::new("r-1"), &r1, lease.plus_seconds(90), now).unwrap());

    // After expiry the other runner takes over and the old owner's renewal
    // affects zero rows.
    let after_expiry = lease.plus_seconds(200);
    assert!(
        store
            .try_claim(&RunId::new("r-1"), &r2, after_expiry.plus_seconds(60), after_expiry)
            .unwrap()
    );
    assert!(!store.renew_claim(&RunId::new("r-1"), &r1, after_expiry.plus_seconds(90)).unwrap());
}

#[test]
fn cancellation_surfaces_as_a_failed_renewal() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    let runner = RunnerId::new("runner-1");
    let now = Timestamp::from_millis(10_000);
    assert!(store.try_claim(&RunId::new("r-1"), &runner, now.plus_seconds(60), now).unwrap());

    store.set_run_status(&RunId::new("r-1"), RunStatus::Canceled).unwrap();
    assert!(!store.renew_claim(&RunId::new("r-1"), &runner, now.plus_seconds(120)).unwrap());
}

#[test]
fn terminal_runs_are_not_claimable() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    store
        .mark_run_failed(
            &RunId::new("r-1"),
            RunErrorCode::TaskExecutionFailed,
            "boom",
            Timestamp::from_millis(5_000),
        )
        .unwrap();
    let now = Timestamp::from_millis(10_000);
    assert!(
        !store.try_claim(&RunId::new("r-1"), &RunnerId::new("runner-1"), now.plus_seconds(60), now).unwrap()
    );
    assert!(store.claim_candidates(10).unwrap().is_empty());
}

#[test]
fn candidates_are_oldest_first_and_capped() {
    let (_dir, store) = open_store();
    for (index, id) in ["r-b", "r-a", "r-c"].iter().enumerate() {
        let mut run = queued_run(id, None);
        run.created_at = Timestamp::from_millis(1_000 - i64::try_from(index).unwrap());
        store.insert_run(&run).unwrap();
    }
    let candidates = store.claim_candidates(2).unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].run_id.as_str(), "r-c");
    assert_eq!(candidates[1].run_id.as_str(), "r-a");
}

// ============================================================================
// SECTION: Run Lifecycle Columns
// ============================================================================

#[test]
fn started_at_is_stamped_once() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    store.mark_run_started(&RunId::new("r-1"), Timestamp::from_millis(2_000)).unwrap();
    store.mark_run_started(&RunId::new("r-1"), Timestamp::from_millis(9_000)).unwrap();
    let run = store.run(&RunId::new("r-1")).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.started_at, Some(Timestamp::from_millis(2_000)));
}

#[test]
fn failure_clears_claim_and_stamps_error() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    let now = Timestamp::from_millis(3_000);
    assert!(
        store.try_claim(&RunId::new("r-1"), &RunnerId::new("runner-1"), now.plus_seconds(60), now).unwrap()
    );
    store
        .mark_run_failed(&RunId::new("r-1"), RunErrorCode::PlanHashMismatch, "changed", now)
        .unwrap();
    let run = store.run(&RunId::new("r-1")).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_code.as_deref(), Some("PLAN_HASH_MISMATCH"));
    assert!(run.claimed_by.is_none());
    assert!(run.claim_expires_at.is_none());
}

// ============================================================================
// SECTION: Task Instances
// ============================================================================

#[test]
fn task_instances_are_unique_per_run_and_task() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    store.insert_task_instance(&pending_task("r-1", "fetch", 0)).unwrap();
    let mut dupe = pending_task("r-1", "fetch", 0);
    dupe.task_run_id = TaskRunId::new("different-id");
    assert!(matches!(store.insert_task_instance(&dupe), Err(StoreError::Conflict(_))));
}

#[test]
fn succeeded_tasks_freeze_output_and_attempts() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    store.insert_task_instance(&pending_task("r-1", "fetch", 0)).unwrap();
    store
        .mark_task_succeeded(
            &TaskRunId::new("r-1-fetch"),
            &json!({"status_code": 200}),
            Timestamp::from_millis(4_000),
        )
        .unwrap();
    let task =
        store.task_instance(&RunId::new("r-1"), &TaskId::new("fetch")).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Succeeded);
    assert_eq!(task.attempt, 1);
    assert_eq!(task.output, Some(json!({"status_code": 200})));
    let replayed = store.succeeded_tasks(&RunId::new("r-1")).unwrap();
    assert_eq!(replayed.len(), 1);
}

// ============================================================================
// SECTION: Approvals
// ============================================================================

/// Builds a pending approval for a run and task.
fn pending_approval(run_id: &str, task_id: &str) -> ApprovalRecord {
    ApprovalRecord {
        approval_id: ApprovalId::new(format!("a-{run_id}-{task_id}")),
        run_id: RunId::new(run_id),
        task_id: TaskId::new(task_id),
        status: ApprovalStatus::Pending,
        prompt: "Approve side effect".to_string(),
        preview: json!({"task_id": task_id}),
        created_at: Timestamp::from_millis(1_500),
        resolved_at: None,
        resolved_by: None,
    }
}

#[test]
fn approvals_resolve_once_and_stay_resolved() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    store.insert_approval(&pending_approval("r-1", "submit")).unwrap();
    assert_eq!(store.pending_approvals_total().unwrap(), 1);

    let resolved = store
        .resolve_approval(
            &ApprovalId::new("a-r-1-submit"),
            ApprovalStatus::Approved,
            Some("operator"),
            Timestamp::from_millis(2_000),
        )
        .unwrap();
    assert!(resolved);
    // Terminal states are monotonic: a second resolution is a no-op.
    let resolved_again = store
        .resolve_approval(
            &ApprovalId::new("a-r-1-submit"),
            ApprovalStatus::Denied,
            Some("operator"),
            Timestamp::from_millis(3_000),
        )
        .unwrap();
    assert!(!resolved_again);

    let approval = store
        .approval(&RunId::new("r-1"), &ApprovalId::new("a-r-1-submit"))
        .unwrap()
        .unwrap();
    assert_eq!(approval.status, ApprovalStatus::Approved);
    assert_eq!(approval.resolved_by.as_deref(), Some("operator"));
    assert_eq!(store.pending_approvals_for_run(&RunId::new("r-1")).unwrap(), 0);
}

#[test]
fn one_approval_per_run_and_task() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    store.insert_approval(&pending_approval("r-1", "submit")).unwrap();
    let mut dupe = pending_approval("r-1", "submit");
    dupe.approval_id = ApprovalId::new("a-other");
    assert!(matches!(store.insert_approval(&dupe), Err(StoreError::Conflict(_))));
}

// ============================================================================
// SECTION: Artifacts
// ============================================================================

#[test]
fn artifacts_round_trip_and_delete() {
    let (_dir, store) = open_store();
    store.insert_run(&queued_run("r-1", None)).unwrap();
    let artifact = ArtifactRecord {
        artifact_id: ArtifactId::new("art-1"),
        run_id: RunId::new("r-1"),
        kind: "html".to_string(),
        content_type: "application/json".to_string(),
        uri: "r-1/art-1.json".to_string(),
        metadata: Some(json!({"task_id": "fetch"})),
        created_at: Timestamp::from_millis(2_500),
    };
    store.insert_artifact(&artifact).unwrap();
    assert_eq!(store.artifacts_for_run(&RunId::new("r-1")).unwrap().len(), 1);
    assert!(store.artifact(&RunId::new("r-1"), &ArtifactId::new("art-1")).unwrap().is_some());
    assert_eq!(store.all_artifacts().unwrap().len(), 1);
    store.delete_artifact(&ArtifactId::new("art-1")).unwrap();
    assert!(store.all_artifacts().unwrap().is_empty());
}

// ============================================================================
// SECTION: Schedules
// ============================================================================

/// Builds an enabled schedule due at `next`.
fn schedule(id: &str, broker: &str, profile: &str, next: i64) -> ScheduleRecord {
    ScheduleRecord {
        schedule_id: ScheduleId::new(id),
        broker_id: BrokerId::new(broker),
        profile_id: ProfileId::new(profile),
        scan_type: "discovery".to_string(),
        next_run_at: Timestamp::from_millis(next),
        last_run_id: None,
        last_run_at: None,
        interval_days: 7,
        enabled: true,
        created_at: Timestamp::from_millis(100),
    }
}

#[test]
fn schedules_are_unique_per_broker_and_profile() {
    let (_dir, store) = open_store();
    assert!(store.insert_schedule_if_absent(&schedule("s-1", "peoplelens", "p-1", 1_000)).unwrap());
    assert!(!store.insert_schedule_if_absent(&schedule("s-2", "peoplelens", "p-1", 9_000)).unwrap());
    assert!(store.insert_schedule_if_absent(&schedule("s-3", "peoplelens", "p-2", 1_000)).unwrap());
}

#[test]
fn due_scan_and_advancement() {
    let (_dir, store) = open_store();
    store.insert_schedule_if_absent(&schedule("s-1", "peoplelens", "p-1", 1_000)).unwrap();
    store.insert_schedule_if_absent(&schedule("s-2", "shadowtrace", "p-1", 50_000)).unwrap();

    let now = Timestamp::from_millis(10_000);
    let due = store.due_schedules(now).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].schedule_id.as_str(), "s-1");

    store.advance_schedule(&ScheduleId::new("s-1"), &RunId::new("run-9"), now).unwrap();
    let advanced = store.schedule(&ScheduleId::new("s-1")).unwrap().unwrap();
    assert_eq!(advanced.last_run_id.as_ref().map(RunId::as_str), Some("run-9"));
    assert_eq!(advanced.last_run_at, Some(now));
    assert_eq!(advanced.next_run_at, now.plus_days(7));
    assert!(store.due_schedules(now).unwrap().is_empty());
}

#[test]
fn disabling_a_broker_hides_its_schedules() {
    let (_dir, store) = open_store();
    store.insert_schedule_if_absent(&schedule("s-1", "peoplelens", "p-1", 1_000)).unwrap();
    store.insert_schedule_if_absent(&schedule("s-2", "peoplelens", "p-2", 1_000)).unwrap();
    store.insert_schedule_if_absent(&schedule("s-3", "shadowtrace", "p-1", 1_000)).unwrap();

    let disabled = store.disable_schedules_for_broker(&BrokerId::new("peoplelens")).unwrap();
    assert_eq!(disabled, 2);
    let remaining = store.enabled_schedules().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].broker_id.as_str(), "shadowtrace");
    // Already-disabled schedules are not counted twice.
    assert_eq!(store.disable_schedules_for_broker(&BrokerId::new("peoplelens")).unwrap(), 0);
}

#[test]
fn trigger_makes_a_schedule_due_immediately() {
    let (_dir, store) = open_store();
    store.insert_schedule_if_absent(&schedule("s-1", "peoplelens", "p-1", 99_000)).unwrap();
    let now = Timestamp::from_millis(5_000);
    assert!(store.trigger_schedule_now(&ScheduleId::new("s-1"), now).unwrap());
    assert_eq!(store.due_schedules(now).unwrap().len(), 1);
    assert!(!store.trigger_schedule_now(&ScheduleId::new("ghost"), now).unwrap());
}
