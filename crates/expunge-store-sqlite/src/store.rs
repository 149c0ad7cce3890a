// crates/expunge-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Orchestrator Store
// Description: Store implementation over SQLite WAL with conditional claims.
// Purpose: Provide the one relational store the run engine coordinates on.
// Dependencies: expunge-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The store keeps five tables — `runs`, `run_tasks`, `run_approvals`,
//! `run_artifacts`, `scan_schedules` — matching the engine's persisted
//! records one to one. The claim protocol is expressed as conditional
//! `UPDATE` statements whose affected-row count is the success signal; no
//! table-level locks are taken. A schema-version row guards against opening
//! databases written by an incompatible build.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;

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

// ============================================================================
// SECTION: Constants
// ============================================================================

/// SQLite schema version for the store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Milliseconds in one day, used for schedule advancement in SQL.
const MILLIS_PER_DAY: i64 = 86_400_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the SQLite orchestrator store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Path to the SQLite database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Creates a config with default pragmas for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Internal SQLite store errors before mapping onto [`StoreError`].
///
/// # Invariants
/// - Messages avoid embedding run params or PII payloads.
#[derive(Debug, Error)]
enum SqliteError {
    /// Store I/O error.
    #[allow(dead_code, reason = "constructed by future I/O error paths; kept for From<SqliteError> mapping")]
    #[error("sqlite io error: {0}")]
    Io(String),
    /// SQLite engine error.
    #[error("sqlite db error: {0}")]
    Db(String),
    /// Uniqueness conflict.
    #[error("sqlite conflict: {0}")]
    Conflict(String),
    /// Stored data failed to decode.
    #[allow(dead_code, reason = "constructed by future decode-validation paths; kept for From<SqliteError> mapping")]
    #[error("sqlite invalid data: {0}")]
    Invalid(String),
    /// Store schema version mismatch.
    #[error("sqlite schema version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<SqliteError> for StoreError {
    fn from(error: SqliteError) -> Self {
        match error {
            SqliteError::Io(message) => Self::Io(message),
            SqliteError::Db(message) | SqliteError::VersionMismatch(message) => Self::Db(message),
            SqliteError::Conflict(message) => Self::Conflict(message),
            SqliteError::Invalid(message) => Self::Invalid(message),
        }
    }
}

/// Maps a rusqlite error, classifying constraint violations as conflicts.
fn map_sql_error(context: &str, error: &rusqlite::Error) -> SqliteError {
    if let rusqlite::Error::SqliteFailure(failure, _) = error
        && failure.code == ErrorCode::ConstraintViolation
    {
        return SqliteError::Conflict(format!("{context}: {error}"));
    }
    SqliteError::Db(format!("{context}: {error}"))
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// SQLite-backed orchestrator store.
///
/// # Invariants
/// - Connection access is serialized through a mutex; every write commits in
///   its own short transaction (single-statement autocommit).
pub struct SqliteStore {
    /// Shared connection guarded by a mutex.
    connection: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (and initializes) an orchestrator store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened, migrated,
    /// or its schema version is unsupported.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::Io(format!("create store dir: {err}")))?;
        }
        let mut connection = Connection::open(&config.path)
            .map_err(|err| StoreError::Io(format!("open sqlite: {err}")))?;
        configure_connection(&connection, config).map_err(StoreError::from)?;
        initialize_schema(&mut connection).map_err(StoreError::from)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Opens a store at a bare path with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when opening fails.
    pub fn open_at(path: &Path) -> Result<Self, StoreError> {
        Self::open(&SqliteStoreConfig::new(path))
    }

    /// Acquires the connection guard.
    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Io("sqlite mutex poisoned".to_string()))
    }
}

/// Applies pragmas to a fresh connection.
fn configure_connection(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteError> {
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "journal_mode", "wal")
        .map_err(|err| SqliteError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "synchronous", "normal")
        .map_err(|err| SqliteError::Db(err.to_string()))?;
    connection
        .pragma_update(None, "foreign_keys", "on")
        .map_err(|err| SqliteError::Db(err.to_string()))?;
    Ok(())
}

/// Initializes the schema or validates an existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteError> {
    let tx = connection.transaction().map_err(|err| SqliteError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS runs (
                    run_id TEXT PRIMARY KEY,
                    plan_id TEXT NOT NULL,
                    plan_hash TEXT NOT NULL,
                    status TEXT NOT NULL,
                    requested_by TEXT,
                    idempotency_key TEXT UNIQUE,
                    created_at INTEGER NOT NULL,
                    started_at INTEGER,
                    finished_at INTEGER,
                    claimed_by TEXT,
                    claim_expires_at INTEGER,
                    params_json TEXT NOT NULL,
                    result_summary_json TEXT,
                    error_code TEXT,
                    error_message TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_runs_status_created
                    ON runs (status, created_at);
                CREATE TABLE IF NOT EXISTS run_tasks (
                    task_run_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                    task_id TEXT NOT NULL,
                    task_index INTEGER NOT NULL,
                    task_name TEXT NOT NULL,
                    task_type TEXT NOT NULL,
                    status TEXT NOT NULL,
                    attempt INTEGER NOT NULL,
                    max_attempts INTEGER NOT NULL,
                    idempotent INTEGER NOT NULL,
                    requires_approval INTEGER NOT NULL,
                    approval_id TEXT,
                    started_at INTEGER,
                    finished_at INTEGER,
                    input_json TEXT NOT NULL,
                    output_json TEXT,
                    error_code TEXT,
                    error_message TEXT,
                    UNIQUE (run_id, task_id)
                );
                CREATE TABLE IF NOT EXISTS run_approvals (
                    approval_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                    task_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    prompt TEXT NOT NULL,
                    preview_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    resolved_at INTEGER,
                    resolved_by TEXT,
                    UNIQUE (run_id, task_id)
                );
                CREATE TABLE IF NOT EXISTS run_artifacts (
                    artifact_id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    content_type TEXT NOT NULL,
                    uri TEXT NOT NULL,
                    metadata_json TEXT,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_run_artifacts_run
                    ON run_artifacts (run_id);
                CREATE TABLE IF NOT EXISTS scan_schedules (
                    schedule_id TEXT PRIMARY KEY,
                    broker_id TEXT NOT NULL,
                    profile_id TEXT NOT NULL,
                    scan_type TEXT NOT NULL,
                    next_run_at INTEGER NOT NULL,
                    last_run_id TEXT,
                    last_run_at INTEGER,
                    interval_days INTEGER NOT NULL,
                    enabled INTEGER NOT NULL,
                    created_at INTEGER NOT NULL,
                    UNIQUE (broker_id, profile_id)
                );
                CREATE INDEX IF NOT EXISTS idx_scan_schedules_due
                    ON scan_schedules (enabled, next_run_at);",
            )
            .map_err(|err| SqliteError::Db(err.to_string()))?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Row Decoding
// ============================================================================

/// Decodes an optional JSON text column.
fn decode_json_opt(raw: Option<String>, column: &str) -> Result<Option<Value>, StoreError> {
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|err| StoreError::Invalid(format!("{column} decode failed: {err}")))
    })
    .transpose()
}

/// Decodes a required JSON text column.
fn decode_json(raw: &str, column: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw)
        .map_err(|err| StoreError::Invalid(format!("{column} decode failed: {err}")))
}

/// Encodes a JSON value into its text column form.
fn encode_json(value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|err| StoreError::Invalid(format!("json encode failed: {err}")))
}

/// Column list shared by run queries.
const RUN_COLUMNS: &str = "run_id, plan_id, plan_hash, status, requested_by, idempotency_key, \
                           created_at, started_at, finished_at, claimed_by, claim_expires_at, \
                           params_json, result_summary_json, error_code, error_message";

/// Decodes one `runs` row.
fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        run_id: row.get(0)?,
        plan_id: row.get(1)?,
        plan_hash: row.get(2)?,
        status: row.get(3)?,
        requested_by: row.get(4)?,
        idempotency_key: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
        claimed_by: row.get(9)?,
        claim_expires_at: row.get(10)?,
        params_json: row.get(11)?,
        result_summary_json: row.get(12)?,
        error_code: row.get(13)?,
        error_message: row.get(14)?,
    })
}

/// Raw `runs` row before JSON and enum decoding.
struct RawRun {
    /// Run identifier.
    run_id: String,
    /// Plan identifier.
    plan_id: String,
    /// Frozen plan hash.
    plan_hash: String,
    /// Status label.
    status: String,
    /// Launch principal.
    requested_by: Option<String>,
    /// Idempotency key.
    idempotency_key: Option<String>,
    /// Enqueue time.
    created_at: i64,
    /// First-execution time.
    started_at: Option<i64>,
    /// Terminal time.
    finished_at: Option<i64>,
    /// Claiming runner.
    claimed_by: Option<String>,
    /// Lease expiry.
    claim_expires_at: Option<i64>,
    /// Params JSON text.
    params_json: String,
    /// Result summary JSON text.
    result_summary_json: Option<String>,
    /// Terminal error code.
    error_code: Option<String>,
    /// Terminal error message.
    error_message: Option<String>,
}

impl RawRun {
    /// Decodes into the typed record.
    fn into_record(self) -> Result<RunRecord, StoreError> {
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Invalid(format!("unknown run status '{}'", self.status)))?;
        Ok(RunRecord {
            run_id: RunId::new(self.run_id),
            plan_id: PlanId::new(self.plan_id),
            plan_hash: self.plan_hash,
            status,
            requested_by: self.requested_by,
            idempotency_key: self.idempotency_key,
            created_at: Timestamp::from_millis(self.created_at),
            started_at: self.started_at.map(Timestamp::from_millis),
            finished_at: self.finished_at.map(Timestamp::from_millis),
            claimed_by: self.claimed_by.map(RunnerId::new),
            claim_expires_at: self.claim_expires_at.map(Timestamp::from_millis),
            params: decode_json(&self.params_json, "params_json")?,
            result_summary: decode_json_opt(self.result_summary_json, "result_summary_json")?,
            error_code: self.error_code,
            error_message: self.error_message,
        })
    }
}

/// Column list shared by task queries.
const TASK_COLUMNS: &str = "task_run_id, run_id, task_id, task_index, task_name, task_type, \
                            status, attempt, max_attempts, idempotent, requires_approval, \
                            approval_id, started_at, finished_at, input_json, output_json, \
                            error_code, error_message";

/// Decodes one `run_tasks` row into the typed record.
fn task_from_row(row: &Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        task_run_id: row.get(0)?,
        run_id: row.get(1)?,
        task_id: row.get(2)?,
        task_index: row.get(3)?,
        task_name: row.get(4)?,
        task_type: row.get(5)?,
        status: row.get(6)?,
        attempt: row.get(7)?,
        max_attempts: row.get(8)?,
        idempotent: row.get(9)?,
        requires_approval: row.get(10)?,
        approval_id: row.get(11)?,
        started_at: row.get(12)?,
        finished_at: row.get(13)?,
        input_json: row.get(14)?,
        output_json: row.get(15)?,
        error_code: row.get(16)?,
        error_message: row.get(17)?,
    })
}

/// Raw `run_tasks` row before JSON and enum decoding.
struct RawTask {
    /// Task instance identifier.
    task_run_id: String,
    /// Owning run.
    run_id: String,
    /// Task definition identifier.
    task_id: String,
    /// Plan position.
    task_index: i64,
    /// Display name.
    task_name: String,
    /// Task type label.
    task_type: String,
    /// Status label.
    status: String,
    /// Attempts consumed.
    attempt: i64,
    /// Attempt budget.
    max_attempts: i64,
    /// Idempotency flag.
    idempotent: bool,
    /// Effective approval requirement.
    requires_approval: bool,
    /// Gate record id.
    approval_id: Option<String>,
    /// First invocation time.
    started_at: Option<i64>,
    /// Terminal time.
    finished_at: Option<i64>,
    /// Raw input JSON text.
    input_json: String,
    /// Output JSON text.
    output_json: Option<String>,
    /// Terminal error code.
    error_code: Option<String>,
    /// Terminal error message.
    error_message: Option<String>,
}

impl RawTask {
    /// Decodes into the typed record.
    fn into_record(self) -> Result<TaskInstance, StoreError> {
        let status = TaskStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Invalid(format!("unknown task status '{}'", self.status)))?;
        let task_type: TaskType =
            serde_json::from_value(Value::String(self.task_type.clone())).map_err(|_| {
                StoreError::Invalid(format!("unknown task type '{}'", self.task_type))
            })?;
        Ok(TaskInstance {
            task_run_id: TaskRunId::new(self.task_run_id),
            run_id: RunId::new(self.run_id),
            task_id: TaskId::new(self.task_id),
            task_index: u32::try_from(self.task_index)
                .map_err(|_| StoreError::Invalid("negative task_index".to_string()))?,
            task_name: self.task_name,
            task_type,
            status,
            attempt: u32::try_from(self.attempt)
                .map_err(|_| StoreError::Invalid("negative attempt".to_string()))?,
            max_attempts: u32::try_from(self.max_attempts)
                .map_err(|_| StoreError::Invalid("negative max_attempts".to_string()))?,
            idempotent: self.idempotent,
            requires_approval: self.requires_approval,
            approval_id: self.approval_id.map(ApprovalId::new),
            started_at: self.started_at.map(Timestamp::from_millis),
            finished_at: self.finished_at.map(Timestamp::from_millis),
            input: decode_json(&self.input_json, "input_json")?,
            output: decode_json_opt(self.output_json, "output_json")?,
            error_code: self.error_code,
            error_message: self.error_message,
        })
    }
}

/// Column list shared by approval queries.
const APPROVAL_COLUMNS: &str =
    "approval_id, run_id, task_id, status, prompt, preview_json, created_at, resolved_at, \
     resolved_by";

/// Decodes one `run_approvals` row.
fn approval_from_row(row: &Row<'_>) -> rusqlite::Result<RawApproval> {
    Ok(RawApproval {
        approval_id: row.get(0)?,
        run_id: row.get(1)?,
        task_id: row.get(2)?,
        status: row.get(3)?,
        prompt: row.get(4)?,
        preview_json: row.get(5)?,
        created_at: row.get(6)?,
        resolved_at: row.get(7)?,
        resolved_by: row.get(8)?,
    })
}

/// Raw `run_approvals` row before decoding.
struct RawApproval {
    /// Approval identifier.
    approval_id: String,
    /// Owning run.
    run_id: String,
    /// Gated task.
    task_id: String,
    /// Status label.
    status: String,
    /// Operator prompt.
    prompt: String,
    /// Preview JSON text.
    preview_json: String,
    /// Creation time.
    created_at: i64,
    /// Resolution time.
    resolved_at: Option<i64>,
    /// Resolving principal.
    resolved_by: Option<String>,
}

impl RawApproval {
    /// Decodes into the typed record.
    fn into_record(self) -> Result<ApprovalRecord, StoreError> {
        let status = ApprovalStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Invalid(format!("unknown approval status '{}'", self.status))
        })?;
        Ok(ApprovalRecord {
            approval_id: ApprovalId::new(self.approval_id),
            run_id: RunId::new(self.run_id),
            task_id: TaskId::new(self.task_id),
            status,
            prompt: self.prompt,
            preview: decode_json(&self.preview_json, "preview_json")?,
            created_at: Timestamp::from_millis(self.created_at),
            resolved_at: self.resolved_at.map(Timestamp::from_millis),
            resolved_by: self.resolved_by,
        })
    }
}

/// Column list shared by artifact queries.
const ARTIFACT_COLUMNS: &str =
    "artifact_id, run_id, kind, content_type, uri, metadata_json, created_at";

/// Decodes one `run_artifacts` row.
fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<RawArtifact> {
    Ok(RawArtifact {
        artifact_id: row.get(0)?,
        run_id: row.get(1)?,
        kind: row.get(2)?,
        content_type: row.get(3)?,
        uri: row.get(4)?,
        metadata_json: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Raw `run_artifacts` row before decoding.
struct RawArtifact {
    /// Artifact identifier.
    artifact_id: String,
    /// Owning run.
    run_id: String,
    /// Artifact kind.
    kind: String,
    /// Content type.
    content_type: String,
    /// Path under the artifacts root.
    uri: String,
    /// Metadata JSON text.
    metadata_json: Option<String>,
    /// Creation time.
    created_at: i64,
}

impl RawArtifact {
    /// Decodes into the typed record.
    fn into_record(self) -> Result<ArtifactRecord, StoreError> {
        Ok(ArtifactRecord {
            artifact_id: ArtifactId::new(self.artifact_id),
            run_id: RunId::new(self.run_id),
            kind: self.kind,
            content_type: self.content_type,
            uri: self.uri,
            metadata: decode_json_opt(self.metadata_json, "metadata_json")?,
            created_at: Timestamp::from_millis(self.created_at),
        })
    }
}

/// Column list shared by schedule queries.
const SCHEDULE_COLUMNS: &str = "schedule_id, broker_id, profile_id, scan_type, next_run_at, \
                                last_run_id, last_run_at, interval_days, enabled, created_at";

/// Decodes one `scan_schedules` row into the typed record.
fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRecord> {
    Ok(ScheduleRecord {
        schedule_id: ScheduleId::new(row.get::<_, String>(0)?),
        broker_id: BrokerId::new(row.get::<_, String>(1)?),
        profile_id: ProfileId::new(row.get::<_, String>(2)?),
        scan_type: row.get(3)?,
        next_run_at: Timestamp::from_millis(row.get(4)?),
        last_run_id: row.get::<_, Option<String>>(5)?.map(RunId::new),
        last_run_at: row.get::<_, Option<i64>>(6)?.map(Timestamp::from_millis),
        interval_days: row.get(7)?,
        enabled: row.get(8)?,
        created_at: Timestamp::from_millis(row.get(9)?),
    })
}

// ============================================================================
// SECTION: Store Trait Implementation
// ============================================================================

impl Store for SqliteStore {
    fn insert_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "INSERT INTO runs (run_id, plan_id, plan_hash, status, requested_by, \
                 idempotency_key, created_at, started_at, finished_at, claimed_by, \
                 claim_expires_at, params_json, result_summary_json, error_code, error_message) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    run.run_id.as_str(),
                    run.plan_id.as_str(),
                    run.plan_hash,
                    run.status.as_str(),
                    run.requested_by,
                    run.idempotency_key,
                    run.created_at.as_millis(),
                    run.started_at.map(Timestamp::as_millis),
                    run.finished_at.map(Timestamp::as_millis),
                    run.claimed_by.as_ref().map(RunnerId::as_str),
                    run.claim_expires_at.map(Timestamp::as_millis),
                    encode_json(&run.params)?,
                    run.result_summary.as_ref().map(encode_json).transpose()?,
                    run.error_code,
                    run.error_message,
                ],
            )
            .map_err(|err| StoreError::from(map_sql_error("insert run", &err)))?;
        Ok(())
    }

    fn run(&self, run_id: &RunId) -> Result<Option<RunRecord>, StoreError> {
        let guard = self.conn()?;
        let raw = guard
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1"),
                params![run_id.as_str()],
                run_from_row,
            )
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))?;
        raw.map(RawRun::into_record).transpose()
    }

    fn run_by_idempotency_key(&self, key: &str) -> Result<Option<RunRecord>, StoreError> {
        let guard = self.conn()?;
        let raw = guard
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE idempotency_key = ?1"),
                params![key],
                run_from_row,
            )
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))?;
        raw.map(RawRun::into_record).transpose()
    }

    fn claim_candidates(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let guard = self.conn()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs \
                 WHERE status IN ('queued', 'running', 'blocked_for_approval') \
                 ORDER BY created_at ASC LIMIT ?1"
            ))
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![limit], run_from_row)
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| StoreError::Db(err.to_string()))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }

    fn try_claim(
        &self,
        run_id: &RunId,
        runner_id: &RunnerId,
        lease_until: Timestamp,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let guard = self.conn()?;
        let updated = guard
            .execute(
                "UPDATE runs SET claimed_by = ?1, claim_expires_at = ?2 \
                 WHERE run_id = ?3 \
                   AND status IN ('queued', 'running', 'blocked_for_approval') \
                   AND (claimed_by IS NULL OR claimed_by = ?1 \
                        OR claim_expires_at IS NULL OR claim_expires_at < ?4)",
                params![
                    runner_id.as_str(),
                    lease_until.as_millis(),
                    run_id.as_str(),
                    now.as_millis()
                ],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(updated == 1)
    }

    fn renew_claim(
        &self,
        run_id: &RunId,
        runner_id: &RunnerId,
        lease_until: Timestamp,
    ) -> Result<bool, StoreError> {
        let guard = self.conn()?;
        // Renewal fails once the run leaves the claimable statuses, which is
        // how an external cancellation reaches a working runner.
        let updated = guard
            .execute(
                "UPDATE runs SET claim_expires_at = ?1 \
                 WHERE run_id = ?2 AND claimed_by = ?3 \
                   AND status IN ('queued', 'running', 'blocked_for_approval')",
                params![lease_until.as_millis(), run_id.as_str(), runner_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(updated == 1)
    }

    fn clear_claim(&self, run_id: &RunId) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE runs SET claimed_by = NULL, claim_expires_at = NULL WHERE run_id = ?1",
                params![run_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn set_run_status(&self, run_id: &RunId, status: RunStatus) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE runs SET status = ?1 WHERE run_id = ?2",
                params![status.as_str(), run_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn mark_run_started(&self, run_id: &RunId, started_at: Timestamp) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE runs SET status = 'running', \
                 started_at = COALESCE(started_at, ?1) WHERE run_id = ?2",
                params![started_at.as_millis(), run_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn mark_run_succeeded(
        &self,
        run_id: &RunId,
        finished_at: Timestamp,
        result_summary: Option<&Value>,
    ) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE runs SET status = 'succeeded', finished_at = ?1, \
                 result_summary_json = ?2, claimed_by = NULL, claim_expires_at = NULL \
                 WHERE run_id = ?3",
                params![
                    finished_at.as_millis(),
                    result_summary.map(encode_json).transpose()?,
                    run_id.as_str()
                ],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn mark_run_failed(
        &self,
        run_id: &RunId,
        code: RunErrorCode,
        message: &str,
        finished_at: Timestamp,
    ) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE runs SET status = 'failed', error_code = ?1, error_message = ?2, \
                 finished_at = ?3, claimed_by = NULL, claim_expires_at = NULL WHERE run_id = ?4",
                params![code.as_str(), message, finished_at.as_millis(), run_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn mark_run_blocked(&self, run_id: &RunId) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE runs SET status = 'blocked_for_approval', \
                 claimed_by = NULL, claim_expires_at = NULL WHERE run_id = ?1",
                params![run_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn task_instance(
        &self,
        run_id: &RunId,
        task_id: &TaskId,
    ) -> Result<Option<TaskInstance>, StoreError> {
        let guard = self.conn()?;
        let raw = guard
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM run_tasks WHERE run_id = ?1 AND task_id = ?2"),
                params![run_id.as_str(), task_id.as_str()],
                task_from_row,
            )
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))?;
        raw.map(RawTask::into_record).transpose()
    }

    fn succeeded_tasks(&self, run_id: &RunId) -> Result<Vec<TaskInstance>, StoreError> {
        let guard = self.conn()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM run_tasks \
                 WHERE run_id = ?1 AND status = 'succeeded' ORDER BY task_index ASC"
            ))
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![run_id.as_str()], task_from_row)
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| StoreError::Db(err.to_string()))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }

    fn running_task(&self, run_id: &RunId) -> Result<Option<TaskInstance>, StoreError> {
        let guard = self.conn()?;
        let raw = guard
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM run_tasks \
                     WHERE run_id = ?1 AND status = 'running' ORDER BY task_index ASC LIMIT 1"
                ),
                params![run_id.as_str()],
                task_from_row,
            )
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))?;
        raw.map(RawTask::into_record).transpose()
    }

    fn insert_task_instance(&self, task: &TaskInstance) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "INSERT INTO run_tasks (task_run_id, run_id, task_id, task_index, task_name, \
                 task_type, status, attempt, max_attempts, idempotent, requires_approval, \
                 approval_id, started_at, finished_at, input_json, output_json, error_code, \
                 error_message) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, \
                 ?14, ?15, ?16, ?17, ?18)",
                params![
                    task.task_run_id.as_str(),
                    task.run_id.as_str(),
                    task.task_id.as_str(),
                    task.task_index,
                    task.task_name,
                    task.task_type.as_str(),
                    task.status.as_str(),
                    task.attempt,
                    task.max_attempts,
                    task.idempotent,
                    task.requires_approval,
                    task.approval_id.as_ref().map(ApprovalId::as_str),
                    task.started_at.map(Timestamp::as_millis),
                    task.finished_at.map(Timestamp::as_millis),
                    encode_json(&task.input)?,
                    task.output.as_ref().map(encode_json).transpose()?,
                    task.error_code,
                    task.error_message,
                ],
            )
            .map_err(|err| StoreError::from(map_sql_error("insert task instance", &err)))?;
        Ok(())
    }

    fn mark_task_succeeded(
        &self,
        task_run_id: &TaskRunId,
        output: &Value,
        finished_at: Timestamp,
    ) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE run_tasks SET status = 'succeeded', output_json = ?1, \
                 attempt = attempt + 1, started_at = COALESCE(started_at, ?2), \
                 finished_at = ?2 WHERE task_run_id = ?3",
                params![encode_json(output)?, finished_at.as_millis(), task_run_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn mark_task_failed(
        &self,
        task_run_id: &TaskRunId,
        message: &str,
        finished_at: Timestamp,
    ) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE run_tasks SET status = 'failed', error_code = 'TASK_EXECUTION_FAILED', \
                 error_message = ?1, attempt = attempt + 1, \
                 started_at = COALESCE(started_at, ?2), finished_at = ?2 \
                 WHERE task_run_id = ?3",
                params![message, finished_at.as_millis(), task_run_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn approval_for_task(
        &self,
        run_id: &RunId,
        task_id: &TaskId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let guard = self.conn()?;
        let raw = guard
            .query_row(
                &format!(
                    "SELECT {APPROVAL_COLUMNS} FROM run_approvals \
                     WHERE run_id = ?1 AND task_id = ?2"
                ),
                params![run_id.as_str(), task_id.as_str()],
                approval_from_row,
            )
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))?;
        raw.map(RawApproval::into_record).transpose()
    }

    fn approval(
        &self,
        run_id: &RunId,
        approval_id: &ApprovalId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let guard = self.conn()?;
        let raw = guard
            .query_row(
                &format!(
                    "SELECT {APPROVAL_COLUMNS} FROM run_approvals \
                     WHERE approval_id = ?1 AND run_id = ?2"
                ),
                params![approval_id.as_str(), run_id.as_str()],
                approval_from_row,
            )
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))?;
        raw.map(RawApproval::into_record).transpose()
    }

    fn insert_approval(&self, approval: &ApprovalRecord) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "INSERT INTO run_approvals (approval_id, run_id, task_id, status, prompt, \
                 preview_json, created_at, resolved_at, resolved_by) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    approval.approval_id.as_str(),
                    approval.run_id.as_str(),
                    approval.task_id.as_str(),
                    approval.status.as_str(),
                    approval.prompt,
                    encode_json(&approval.preview)?,
                    approval.created_at.as_millis(),
                    approval.resolved_at.map(Timestamp::as_millis),
                    approval.resolved_by,
                ],
            )
            .map_err(|err| StoreError::from(map_sql_error("insert approval", &err)))?;
        Ok(())
    }

    fn resolve_approval(
        &self,
        approval_id: &ApprovalId,
        status: ApprovalStatus,
        resolved_by: Option<&str>,
        resolved_at: Timestamp,
    ) -> Result<bool, StoreError> {
        let guard = self.conn()?;
        let updated = guard
            .execute(
                "UPDATE run_approvals SET status = ?1, resolved_at = ?2, resolved_by = ?3 \
                 WHERE approval_id = ?4 AND status = 'pending'",
                params![status.as_str(), resolved_at.as_millis(), resolved_by, approval_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(updated == 1)
    }

    fn approvals_for_run(&self, run_id: &RunId) -> Result<Vec<ApprovalRecord>, StoreError> {
        let guard = self.conn()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {APPROVAL_COLUMNS} FROM run_approvals \
                 WHERE run_id = ?1 ORDER BY created_at ASC"
            ))
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![run_id.as_str()], approval_from_row)
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| StoreError::Db(err.to_string()))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }

    fn pending_approvals_for_run(&self, run_id: &RunId) -> Result<u64, StoreError> {
        let guard = self.conn()?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(1) FROM run_approvals WHERE run_id = ?1 AND status = 'pending'",
                params![run_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn pending_approvals_total(&self) -> Result<u64, StoreError> {
        let guard = self.conn()?;
        let count: i64 = guard
            .query_row(
                "SELECT COUNT(1) FROM run_approvals WHERE status = 'pending'",
                params![],
                |row| row.get(0),
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn insert_artifact(&self, artifact: &ArtifactRecord) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "INSERT INTO run_artifacts (artifact_id, run_id, kind, content_type, uri, \
                 metadata_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    artifact.artifact_id.as_str(),
                    artifact.run_id.as_str(),
                    artifact.kind,
                    artifact.content_type,
                    artifact.uri,
                    artifact.metadata.as_ref().map(encode_json).transpose()?,
                    artifact.created_at.as_millis(),
                ],
            )
            .map_err(|err| StoreError::from(map_sql_error("insert artifact", &err)))?;
        Ok(())
    }

    fn artifacts_for_run(&self, run_id: &RunId) -> Result<Vec<ArtifactRecord>, StoreError> {
        let guard = self.conn()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM run_artifacts \
                 WHERE run_id = ?1 ORDER BY created_at ASC"
            ))
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![run_id.as_str()], artifact_from_row)
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| StoreError::Db(err.to_string()))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }

    fn artifact(
        &self,
        run_id: &RunId,
        artifact_id: &ArtifactId,
    ) -> Result<Option<ArtifactRecord>, StoreError> {
        let guard = self.conn()?;
        let raw = guard
            .query_row(
                &format!(
                    "SELECT {ARTIFACT_COLUMNS} FROM run_artifacts \
                     WHERE artifact_id = ?1 AND run_id = ?2"
                ),
                params![artifact_id.as_str(), run_id.as_str()],
                artifact_from_row,
            )
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))?;
        raw.map(RawArtifact::into_record).transpose()
    }

    fn all_artifacts(&self) -> Result<Vec<ArtifactRecord>, StoreError> {
        let guard = self.conn()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {ARTIFACT_COLUMNS} FROM run_artifacts ORDER BY created_at ASC"
            ))
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let rows =
            stmt.query_map(params![], artifact_from_row).map_err(|err| StoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            let raw = row.map_err(|err| StoreError::Db(err.to_string()))?;
            records.push(raw.into_record()?);
        }
        Ok(records)
    }

    fn delete_artifact(&self, artifact_id: &ArtifactId) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute("DELETE FROM run_artifacts WHERE artifact_id = ?1", params![
                artifact_id.as_str()
            ])
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn insert_schedule_if_absent(&self, schedule: &ScheduleRecord) -> Result<bool, StoreError> {
        let guard = self.conn()?;
        let inserted = guard
            .execute(
                "INSERT OR IGNORE INTO scan_schedules (schedule_id, broker_id, profile_id, \
                 scan_type, next_run_at, last_run_id, last_run_at, interval_days, enabled, \
                 created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    schedule.schedule_id.as_str(),
                    schedule.broker_id.as_str(),
                    schedule.profile_id.as_str(),
                    schedule.scan_type,
                    schedule.next_run_at.as_millis(),
                    schedule.last_run_id.as_ref().map(RunId::as_str),
                    schedule.last_run_at.map(Timestamp::as_millis),
                    schedule.interval_days,
                    schedule.enabled,
                    schedule.created_at.as_millis(),
                ],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(inserted == 1)
    }

    fn schedule(&self, schedule_id: &ScheduleId) -> Result<Option<ScheduleRecord>, StoreError> {
        let guard = self.conn()?;
        guard
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM scan_schedules WHERE schedule_id = ?1"),
                params![schedule_id.as_str()],
                schedule_from_row,
            )
            .optional()
            .map_err(|err| StoreError::Db(err.to_string()))
    }

    fn due_schedules(&self, now: Timestamp) -> Result<Vec<ScheduleRecord>, StoreError> {
        let guard = self.conn()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM scan_schedules \
                 WHERE enabled = 1 AND next_run_at <= ?1 ORDER BY next_run_at ASC"
            ))
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![now.as_millis()], schedule_from_row)
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|err| StoreError::Db(err.to_string()))?);
        }
        Ok(records)
    }

    fn enabled_schedules(&self) -> Result<Vec<ScheduleRecord>, StoreError> {
        let guard = self.conn()?;
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM scan_schedules \
                 WHERE enabled = 1 ORDER BY next_run_at ASC"
            ))
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![], schedule_from_row)
            .map_err(|err| StoreError::Db(err.to_string()))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|err| StoreError::Db(err.to_string()))?);
        }
        Ok(records)
    }

    fn advance_schedule(
        &self,
        schedule_id: &ScheduleId,
        last_run_id: &RunId,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let guard = self.conn()?;
        guard
            .execute(
                "UPDATE scan_schedules SET last_run_id = ?1, last_run_at = ?2, \
                 next_run_at = ?2 + interval_days * ?3 WHERE schedule_id = ?4",
                params![
                    last_run_id.as_str(),
                    now.as_millis(),
                    MILLIS_PER_DAY,
                    schedule_id.as_str()
                ],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(())
    }

    fn disable_schedules_for_broker(&self, broker_id: &BrokerId) -> Result<u64, StoreError> {
        let guard = self.conn()?;
        let updated = guard
            .execute(
                "UPDATE scan_schedules SET enabled = 0 WHERE broker_id = ?1 AND enabled = 1",
                params![broker_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(u64::try_from(updated).unwrap_or(0))
    }

    fn trigger_schedule_now(
        &self,
        schedule_id: &ScheduleId,
        now: Timestamp,
    ) -> Result<bool, StoreError> {
        let guard = self.conn()?;
        let updated = guard
            .execute(
                "UPDATE scan_schedules SET next_run_at = ?1 WHERE schedule_id = ?2",
                params![now.as_millis(), schedule_id.as_str()],
            )
            .map_err(|err| StoreError::Db(err.to_string()))?;
        Ok(updated == 1)
    }
}
