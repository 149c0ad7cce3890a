// crates/expunge-server/src/api.rs
// ============================================================================
// Module: REST API Handlers
// Description: Run, approval, artifact, schedule, and plan-check endpoints.
// Purpose: Map HTTP requests onto the launch gate and the shared store.
// Dependencies: axum, expunge-core, expunge-engine, expunge-plans,
// prometheus, sha2, subtle
// ============================================================================

//! ## Overview
//! Handlers are plain async functions over [`ApiState`]; the router wires
//! them to the versioned paths. Mutating and data-bearing endpoints require
//! the bearer token; comparison is constant time over SHA-256 digests so
//! token length never leaks. Error bodies carry a stable `error` string and,
//! where a run error code applies, a `code`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use prometheus::Encoder;
use prometheus::Registry;
use prometheus::TextEncoder;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use expunge_core::ApprovalDecision;
use expunge_core::ApprovalId;
use expunge_core::ApprovalStatus;
use expunge_core::ArtifactId;
use expunge_core::PlanId;
use expunge_core::RunErrorCode;
use expunge_core::RunId;
use expunge_core::RunLaunch;
use expunge_core::RunRecord;
use expunge_core::RunStatus;
use expunge_core::ScheduleId;
use expunge_core::Store;
use expunge_core::Timestamp;
use expunge_engine::ArtifactError;
use expunge_engine::LaunchError;
use expunge_engine::MAX_ARTIFACT_READ_BYTES;
use expunge_engine::launch_run;
use expunge_engine::read_artifact;
use expunge_engine::safe_artifact_path;
use expunge_plans::PlanError;
use expunge_plans::check_plan_health;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared state handed to every handler.
///
/// # Invariants
/// - `auth_token_digest` is the SHA-256 of the configured bearer token.
pub struct ApiState {
    /// Shared orchestrator store.
    pub store: Arc<dyn Store>,
    /// Root directory of plan files.
    pub plans_root: PathBuf,
    /// Root directory of run artifacts.
    pub artifacts_root: PathBuf,
    /// SHA-256 digest of the bearer token.
    pub auth_token_digest: [u8; 32],
    /// Require an idempotency key on launches.
    pub require_idempotency_key: bool,
    /// Metric registry served at `/metrics`.
    pub registry: Registry,
    /// Byte cap for artifact content responses.
    pub max_artifact_bytes: u64,
}

impl ApiState {
    /// Builds state, hashing the bearer token once.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        plans_root: PathBuf,
        artifacts_root: PathBuf,
        auth_token: &str,
        require_idempotency_key: bool,
        registry: Registry,
    ) -> Self {
        Self {
            store,
            plans_root,
            artifacts_root,
            auth_token_digest: token_digest(auth_token),
            require_idempotency_key,
            registry,
            max_artifact_bytes: MAX_ARTIFACT_READ_BYTES,
        }
    }
}

/// SHA-256 digest of a token string.
fn token_digest(token: &str) -> [u8; 32] {
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&Sha256::digest(token.as_bytes()));
    digest
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// API error with a status code and stable body.
///
/// # Invariants
/// - `code` is set only for run error codes from the engine taxonomy.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status.
    status: StatusCode,
    /// Error description.
    message: String,
    /// Optional stable error code.
    code: Option<&'static str>,
}

impl ApiError {
    /// Builds an error with no stable code.
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    /// Builds an error carrying a run error code.
    fn with_code(status: StatusCode, code: RunErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: Some(code.as_str()),
        }
    }

    /// Builds an error carrying an API-only code string.
    fn with_api_code(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            code: Some(code),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"error": self.message, "code": self.code});
        (self.status, Json(body)).into_response()
    }
}

impl From<expunge_core::StoreError> for ApiError {
    fn from(error: expunge_core::StoreError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

// ============================================================================
// SECTION: Auth
// ============================================================================

/// Verifies the bearer token in constant time.
fn require_bearer(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Missing Authorization header"));
    };
    let Ok(value) = value.to_str() else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid Authorization header"));
    };
    let Some(token) = value.strip_prefix("Bearer ") else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Authorization must be Bearer"));
    };
    let presented = token_digest(token.trim());
    if bool::from(presented.ct_eq(&state.auth_token_digest)) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid token"))
    }
}

// ============================================================================
// SECTION: Response Shapes
// ============================================================================

/// Approval summary embedded in run status responses.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalSummary {
    /// Approval identifier.
    pub approval_id: String,
    /// Gated task identifier.
    pub task_id: String,
    /// Approval status.
    pub status: String,
    /// Operator prompt.
    pub prompt: String,
    /// Preview payload.
    pub preview: Value,
}

/// Artifact summary embedded in run status responses.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSummary {
    /// Artifact identifier.
    pub artifact_id: String,
    /// Artifact kind.
    pub kind: String,
}

/// Run status view returned by run endpoints.
///
/// # Invariants
/// - `current_task_id` is the earliest still-running task, when any.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatusResponse {
    /// Run identifier.
    pub run_id: String,
    /// Plan identifier.
    pub plan_id: String,
    /// Run status label.
    pub status: String,
    /// Enqueue time (unix millis).
    pub created_at: i64,
    /// First-execution time (unix millis).
    pub started_at: Option<i64>,
    /// Terminal time (unix millis).
    pub finished_at: Option<i64>,
    /// Terminal error code.
    pub error_code: Option<String>,
    /// Terminal error message.
    pub error_message: Option<String>,
    /// Currently running task id.
    pub current_task_id: Option<String>,
    /// Approvals attached to the run.
    pub approvals: Vec<ApprovalSummary>,
    /// Artifacts materialized by the run.
    pub artifacts: Vec<ArtifactSummary>,
}

/// Builds the run status view from the store.
fn run_response(state: &ApiState, run: &RunRecord) -> Result<RunStatusResponse, ApiError> {
    let approvals = state.store.approvals_for_run(&run.run_id)?;
    let artifacts = state.store.artifacts_for_run(&run.run_id)?;
    let running = state.store.running_task(&run.run_id)?;
    Ok(RunStatusResponse {
        run_id: run.run_id.as_str().to_string(),
        plan_id: run.plan_id.as_str().to_string(),
        status: run.status.as_str().to_string(),
        created_at: run.created_at.as_millis(),
        started_at: run.started_at.map(Timestamp::as_millis),
        finished_at: run.finished_at.map(Timestamp::as_millis),
        error_code: run.error_code.clone(),
        error_message: run.error_message.clone(),
        current_task_id: running.map(|task| task.task_id.as_str().to_string()),
        approvals: approvals
            .into_iter()
            .map(|approval| ApprovalSummary {
                approval_id: approval.approval_id.as_str().to_string(),
                task_id: approval.task_id.as_str().to_string(),
                status: approval.status.as_str().to_string(),
                prompt: approval.prompt,
                preview: approval.preview,
            })
            .collect(),
        artifacts: artifacts
            .into_iter()
            .map(|artifact| ArtifactSummary {
                artifact_id: artifact.artifact_id.as_str().to_string(),
                kind: artifact.kind,
            })
            .collect(),
    })
}

// ============================================================================
// SECTION: Run Endpoints
// ============================================================================

/// `POST /v1/runs` — validate and enqueue a run (202).
pub async fn start_run(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(launch): Json<RunLaunch>,
) -> Result<(StatusCode, Json<RunStatusResponse>), ApiError> {
    require_bearer(&state, &headers)?;
    let run = launch_run(
        state.store.as_ref(),
        &state.plans_root,
        state.require_idempotency_key,
        &launch,
    )
    .map_err(|error| match error {
        LaunchError::KeyRequired => ApiError::new(StatusCode::BAD_REQUEST, error.to_string()),
        LaunchError::Plan(PlanError::NotFound(_)) => ApiError::with_code(
            StatusCode::BAD_REQUEST,
            RunErrorCode::PlanNotFound,
            error.to_string(),
        ),
        LaunchError::Plan(PlanError::ParamsInvalid(_)) => ApiError::with_code(
            StatusCode::BAD_REQUEST,
            RunErrorCode::ParamsInvalid,
            error.to_string(),
        ),
        LaunchError::Plan(other) => ApiError::new(StatusCode::BAD_REQUEST, other.to_string()),
        LaunchError::Conflict => ApiError::new(StatusCode::CONFLICT, "run conflict"),
        LaunchError::Store(store_error) => store_error.into(),
    })?;
    Ok((StatusCode::ACCEPTED, Json(run_response(&state, &run)?)))
}

/// `GET /v1/runs/{id}` — run status.
pub async fn get_run(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    require_bearer(&state, &headers)?;
    let run = state
        .store
        .run(&RunId::new(run_id))?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "run not found"))?;
    Ok(Json(run_response(&state, &run)?))
}

/// Approval resolution request body.
#[derive(Debug, Deserialize)]
pub struct ResolveApprovalRequest {
    /// Operator decision.
    pub decision: ApprovalDecision,
    /// Resolving principal.
    #[serde(default)]
    pub resolved_by: Option<String>,
}

/// `POST /v1/runs/{id}/approvals/{aid}` — resolve a pending approval.
pub async fn resolve_approval(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((run_id, approval_id)): Path<(String, String)>,
    Json(body): Json<ResolveApprovalRequest>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    require_bearer(&state, &headers)?;
    let run_id = RunId::new(run_id);
    let approval_id = ApprovalId::new(approval_id);
    let run = state
        .store
        .run(&run_id)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "run not found"))?;
    let approval = state
        .store
        .approval(&run_id, &approval_id)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "approval not found"))?;

    if approval.status == ApprovalStatus::Pending {
        let status = match body.decision {
            ApprovalDecision::Approve => ApprovalStatus::Approved,
            ApprovalDecision::Deny => ApprovalStatus::Denied,
        };
        state.store.resolve_approval(
            &approval_id,
            status,
            body.resolved_by.as_deref(),
            Timestamp::now(),
        )?;
        match status {
            ApprovalStatus::Approved => {
                if run.status == RunStatus::BlockedForApproval {
                    state.store.set_run_status(&run_id, RunStatus::Queued)?;
                }
            }
            _ => {
                state.store.mark_run_failed(
                    &run_id,
                    RunErrorCode::ApprovalDenied,
                    &format!("Approval denied: {approval_id}"),
                    Timestamp::now(),
                )?;
            }
        }
    }

    let refreshed = state
        .store
        .run(&run_id)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "run not found"))?;
    Ok(Json(run_response(&state, &refreshed)?))
}

// ============================================================================
// SECTION: Artifact Endpoint
// ============================================================================

/// `GET /v1/runs/{id}/artifacts/{aid}` — artifact content.
pub async fn get_artifact(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path((run_id, artifact_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    require_bearer(&state, &headers)?;
    let run_id = RunId::new(run_id);
    state
        .store
        .run(&run_id)?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "run not found"))?;
    let artifact = state
        .store
        .artifact(&run_id, &ArtifactId::new(artifact_id))?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "artifact not found"))?;

    let path = safe_artifact_path(&state.artifacts_root, &artifact.uri).map_err(|error| {
        ApiError::with_api_code(StatusCode::FORBIDDEN, "ARTIFACT_PATH_REJECTED", error.to_string())
    })?;
    let (payload, text) = read_artifact(&path, &artifact.content_type, state.max_artifact_bytes)
        .map_err(|error| match error {
            ArtifactError::TooLarge { .. } => ApiError::with_api_code(
                StatusCode::PAYLOAD_TOO_LARGE,
                "ARTIFACT_TOO_LARGE",
                error.to_string(),
            ),
            ArtifactError::Missing(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "artifact file missing")
            }
            other => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        })?;
    Ok(Json(json!({
        "artifact_id": artifact.artifact_id.as_str(),
        "run_id": artifact.run_id.as_str(),
        "kind": artifact.kind,
        "content_type": artifact.content_type,
        "metadata": artifact.metadata,
        "payload": payload,
        "text": text,
    })))
}

// ============================================================================
// SECTION: Schedule and Plan Endpoints
// ============================================================================

/// `GET /v1/schedule` — enabled schedules ordered by next fire.
pub async fn list_schedule(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_bearer(&state, &headers)?;
    let schedules = state.store.enabled_schedules()?;
    Ok(Json(json!(
        schedules
            .iter()
            .map(|schedule| {
                json!({
                    "schedule_id": schedule.schedule_id.as_str(),
                    "broker_id": schedule.broker_id.as_str(),
                    "scan_type": schedule.scan_type,
                    "next_run_at": schedule.next_run_at.as_millis(),
                    "last_run_at": schedule.last_run_at.map(Timestamp::as_millis),
                    "interval_days": schedule.interval_days,
                    "enabled": schedule.enabled,
                })
            })
            .collect::<Vec<_>>()
    )))
}

/// `POST /v1/schedule/{id}/trigger` — make a schedule due now (204).
pub async fn trigger_schedule(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(schedule_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_bearer(&state, &headers)?;
    let triggered =
        state.store.trigger_schedule_now(&ScheduleId::new(schedule_id), Timestamp::now())?;
    if triggered {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, "schedule not found"))
    }
}

/// `POST /v1/plans/{id}/check` — structural health report.
pub async fn check_plan(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_bearer(&state, &headers)?;
    let report = check_plan_health(&state.plans_root, &PlanId::new(plan_id));
    serde_json::to_value(&report)
        .map(Json)
        .map_err(|error| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))
}

// ============================================================================
// SECTION: Health and Metrics
// ============================================================================

/// `GET /healthz` — liveness probe.
pub async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// `GET /metrics` — Prometheus text exposition.
pub async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|error| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()))?;
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response())
}

// ============================================================================
// SECTION: Router and Serve
// ============================================================================

/// Builds the versioned API router.
#[must_use]
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/v1/runs", post(start_run))
        .route("/v1/runs/{id}", get(get_run))
        .route("/v1/runs/{id}/approvals/{aid}", post(resolve_approval))
        .route("/v1/runs/{id}/artifacts/{aid}", get(get_artifact))
        .route("/v1/schedule", get(list_schedule))
        .route("/v1/schedule/{id}/trigger", post(trigger_schedule))
        .route("/v1/plans/{id}/check", post(check_plan))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Binds and serves the API until the process is signalled.
///
/// # Errors
///
/// Returns an error message when the listener cannot bind or the server
/// loop fails.
pub async fn serve(state: Arc<ApiState>, bind_host: &str, bind_port: u16) -> Result<(), String> {
    let address = format!("{bind_host}:{bind_port}");
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|error| format!("bind {address} failed: {error}"))?;
    tracing::info!(address = %address, "api.listening");
    axum::serve(listener, build_router(state))
        .await
        .map_err(|error| format!("server error: {error}"))
}
