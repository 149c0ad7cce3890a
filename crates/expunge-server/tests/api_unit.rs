// crates/expunge-server/tests/api_unit.rs
// ============================================================================
// Module: API Handler Unit Tests
// Description: Direct handler invocation over a temporary store.
// ============================================================================
//! ## Overview
//! Exercises the REST handlers with extractor values built in-process:
//! bearer auth, the launch gate's status mapping, approval resolution
//! resuming blocked runs, and the artifact traversal and size guards.

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

use std::fs;
use std::sync::Arc;

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use prometheus::Registry;
use serde_json::json;
use tempfile::TempDir;

use expunge_core::ApprovalId;
use expunge_core::ApprovalRecord;
use expunge_core::ApprovalStatus;
use expunge_core::ArtifactId;
use expunge_core::ArtifactRecord;
use expunge_core::PlanId;
use expunge_core::RunId;
use expunge_core::RunLaunch;
use expunge_core::RunStatus;
use expunge_core::Store;
use expunge_core::TaskId;
use expunge_core::Timestamp;
use expunge_server::ApiState;
use expunge_server::api;
use expunge_store_sqlite::SqliteStore;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Bearer token used across tests.
const TOKEN: &str = "secret-token";

/// Simple one-task plan.
const PLAN: &str = "\
plan_id: simple
version: 1.0.0
targets:
  - target_id: site
    kind: website
    base_url: https://broker.example
tasks:
  - id: fetch
    name: Fetch listing page
    type: http.request
    input:
      target_id: site
      path: /
";

/// Harness bundling state and the backing temp dir.
struct Harness {
    /// Keeps the temp dir alive.
    _dir: TempDir,
    /// Shared handler state.
    state: Arc<ApiState>,
    /// Store handle for direct seeding.
    store: Arc<SqliteStore>,
}

impl Harness {
    fn new(require_key: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let plans_root = dir.path().join("plans");
        let artifacts_root = dir.path().join("artifacts");
        fs::create_dir_all(&plans_root).unwrap();
        fs::create_dir_all(&artifacts_root).unwrap();
        fs::write(plans_root.join("simple.yaml"), PLAN).unwrap();
        let store = Arc::new(SqliteStore::open_at(&dir.path().join("store.db")).unwrap());
        let state = Arc::new(ApiState::new(
            Arc::clone(&store) as Arc<dyn Store>,
            plans_root,
            artifacts_root,
            TOKEN,
            require_key,
            Registry::new(),
        ));
        Self {
            _dir: dir,
            state,
            store,
        }
    }

    fn auth(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {TOKEN}")).unwrap(),
        );
        headers
    }

    async fn launch(&self, key: Option<&str>) -> api::RunStatusResponse {
        let (status, Json(run)) = api::start_run(
            State(Arc::clone(&self.state)),
            self.auth(),
            Json(RunLaunch {
                plan_id: PlanId::new("simple"),
                params: json!({}),
                requested_by: None,
                idempotency_key: key.map(str::to_string),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);
        run
    }
}

// ============================================================================
// SECTION: Auth
// ============================================================================

#[tokio::test]
async fn missing_or_wrong_token_is_unauthorized() {
    let harness = Harness::new(false);
    let error = api::get_run(
        State(Arc::clone(&harness.state)),
        HeaderMap::new(),
        Path("r-1".to_string()),
    )
    .await
    .unwrap_err();
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::AUTHORIZATION,
        HeaderValue::from_static("Bearer wrong-token"),
    );
    let error =
        api::get_run(State(Arc::clone(&harness.state)), headers, Path("r-1".to_string()))
            .await
            .unwrap_err();
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// SECTION: Launch Gate
// ============================================================================

#[tokio::test]
async fn launch_enqueues_and_relaunch_returns_existing() {
    let harness = Harness::new(false);
    let first = harness.launch(Some("k1")).await;
    assert_eq!(first.status, "queued");
    let second = harness.launch(Some("k1")).await;
    assert_eq!(first.run_id, second.run_id);
}

#[tokio::test]
async fn policy_requires_idempotency_key() {
    let harness = Harness::new(true);
    let error = api::start_run(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Json(RunLaunch {
            plan_id: PlanId::new("simple"),
            params: json!({}),
            requested_by: None,
            idempotency_key: None,
        }),
    )
    .await
    .unwrap_err();
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_plan_is_a_bad_request_with_code() {
    let harness = Harness::new(false);
    let error = api::start_run(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Json(RunLaunch {
            plan_id: PlanId::new("ghost"),
            params: json!({}),
            requested_by: None,
            idempotency_key: None,
        }),
    )
    .await
    .unwrap_err();
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let harness = Harness::new(false);
    let error = api::get_run(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path("ghost".to_string()),
    )
    .await
    .unwrap_err();
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// SECTION: Approval Resolution
// ============================================================================

#[tokio::test]
async fn approving_a_blocked_run_requeues_it() {
    let harness = Harness::new(false);
    let run = harness.launch(Some("k1")).await;
    let run_id = RunId::new(run.run_id.clone());
    // Simulate the runner having blocked on a pending approval.
    harness.store.mark_run_blocked(&run_id).unwrap();
    let approval = ApprovalRecord {
        approval_id: ApprovalId::new("a-1"),
        run_id: run_id.clone(),
        task_id: TaskId::new("fetch"),
        status: ApprovalStatus::Pending,
        prompt: "Approve".to_string(),
        preview: json!({}),
        created_at: Timestamp::now(),
        resolved_at: None,
        resolved_by: None,
    };
    harness.store.insert_approval(&approval).unwrap();

    let Json(resolved) = api::resolve_approval(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path((run.run_id.clone(), "a-1".to_string())),
        Json(api::ResolveApprovalRequest {
            decision: expunge_core::ApprovalDecision::Approve,
            resolved_by: Some("operator".to_string()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(resolved.status, "queued");
    assert_eq!(resolved.approvals[0].status, "approved");
}

#[tokio::test]
async fn denying_fails_the_run() {
    let harness = Harness::new(false);
    let run = harness.launch(Some("k1")).await;
    let run_id = RunId::new(run.run_id.clone());
    harness.store.mark_run_blocked(&run_id).unwrap();
    harness
        .store
        .insert_approval(&ApprovalRecord {
            approval_id: ApprovalId::new("a-1"),
            run_id: run_id.clone(),
            task_id: TaskId::new("fetch"),
            status: ApprovalStatus::Pending,
            prompt: "Approve".to_string(),
            preview: json!({}),
            created_at: Timestamp::now(),
            resolved_at: None,
            resolved_by: None,
        })
        .unwrap();

    let Json(resolved) = api::resolve_approval(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path((run.run_id.clone(), "a-1".to_string())),
        Json(api::ResolveApprovalRequest {
            decision: expunge_core::ApprovalDecision::Deny,
            resolved_by: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(resolved.status, "failed");
    assert_eq!(resolved.error_code.as_deref(), Some("APPROVAL_DENIED"));
    let stored = harness.store.run(&run_id).unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
}

// ============================================================================
// SECTION: Artifact Guards
// ============================================================================

/// Seeds an artifact row (and optionally its file) for a run.
fn seed_artifact(harness: &Harness, run_id: &RunId, uri: &str, bytes: Option<&str>) {
    if let Some(bytes) = bytes {
        let path = harness.state.artifacts_root.join(uri);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }
    harness
        .store
        .insert_artifact(&ArtifactRecord {
            artifact_id: ArtifactId::new("art-1"),
            run_id: run_id.clone(),
            kind: "task-output".to_string(),
            content_type: "application/json".to_string(),
            uri: uri.to_string(),
            metadata: None,
            created_at: Timestamp::now(),
        })
        .unwrap();
}

#[tokio::test]
async fn artifact_reads_round_trip_json() {
    let harness = Harness::new(false);
    let run = harness.launch(Some("k1")).await;
    let run_id = RunId::new(run.run_id.clone());
    seed_artifact(&harness, &run_id, &format!("{}/art-1.json", run.run_id), Some("{\"ok\":1}"));

    let Json(content) = api::get_artifact(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path((run.run_id.clone(), "art-1".to_string())),
    )
    .await
    .unwrap();
    assert_eq!(content["payload"], json!({"ok": 1}));
    assert_eq!(content["kind"], json!("task-output"));
}

#[tokio::test]
async fn traversal_uris_are_forbidden() {
    let harness = Harness::new(false);
    let run = harness.launch(Some("k1")).await;
    let run_id = RunId::new(run.run_id.clone());
    seed_artifact(&harness, &run_id, "../outside.json", None);

    let error = api::get_artifact(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path((run.run_id.clone(), "art-1".to_string())),
    )
    .await
    .unwrap_err();
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_artifacts_are_rejected() {
    let harness = Harness::new(false);
    let run = harness.launch(Some("k1")).await;
    let run_id = RunId::new(run.run_id.clone());
    let big = format!("{{\"data\":\"{}\"}}", "x".repeat(2_000_000));
    seed_artifact(&harness, &run_id, &format!("{}/art-1.json", run.run_id), Some(&big));

    let error = api::get_artifact(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path((run.run_id.clone(), "art-1".to_string())),
    )
    .await
    .unwrap_err();
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

// ============================================================================
// SECTION: Schedules, Plans, Health
// ============================================================================

#[tokio::test]
async fn schedule_trigger_returns_204_or_404() {
    let harness = Harness::new(false);
    harness
        .store
        .insert_schedule_if_absent(&expunge_core::ScheduleRecord {
            schedule_id: expunge_core::ScheduleId::new("s-1"),
            broker_id: expunge_core::BrokerId::new("peoplelens"),
            profile_id: expunge_core::ProfileId::new("p-1"),
            scan_type: "discovery".to_string(),
            next_run_at: Timestamp::now().plus_days(5),
            last_run_id: None,
            last_run_at: None,
            interval_days: 7,
            enabled: true,
            created_at: Timestamp::now(),
        })
        .unwrap();

    let status = api::trigger_schedule(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path("s-1".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let error = api::trigger_schedule(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path("ghost".to_string()),
    )
    .await
    .unwrap_err();
    let response = axum::response::IntoResponse::into_response(error);
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let Json(schedules) =
        api::list_schedule(State(Arc::clone(&harness.state)), harness.auth()).await.unwrap();
    assert_eq!(schedules.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn plan_check_reports_health() {
    let harness = Harness::new(false);
    let Json(report) = api::check_plan(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path("simple".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(report["health"], json!("healthy"));
    assert_eq!(report["task_count"], json!(1));

    let Json(broken) = api::check_plan(
        State(Arc::clone(&harness.state)),
        harness.auth(),
        Path("ghost".to_string()),
    )
    .await
    .unwrap();
    assert_eq!(broken["health"], json!("broken"));
}

#[tokio::test]
async fn healthz_is_open() {
    let Json(body) = api::healthz().await;
    assert_eq!(body, json!({"ok": true}));
}
