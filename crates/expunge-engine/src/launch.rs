// crates/expunge-engine/src/launch.rs
// ============================================================================
// Module: Run Launch Gate
// Description: Idempotent run creation shared by the API and the scheduler.
// Purpose: Validate, hash, and enqueue exactly one run per idempotency key.
// Dependencies: expunge-core, expunge-plans, uuid
// ============================================================================

//! ## Overview
//! Launching a run resolves the plan, validates params against its schema,
//! freezes the canonical plan hash, and inserts a queued run. The
//! idempotency gate is two-layered: a read finds an existing run for the
//! key, and the store's unique constraint arbitrates races — the loser
//! rereads and returns the winner unchanged.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use expunge_core::RunId;
use expunge_core::RunLaunch;
use expunge_core::RunRecord;
use expunge_core::RunStatus;
use expunge_core::Store;
use expunge_core::StoreError;
use expunge_core::Timestamp;
use expunge_plans::PlanError;
use expunge_plans::hash_plan;
use expunge_plans::load_plan;
use expunge_plans::validate_params;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Launch-gate errors surfaced to API callers.
///
/// # Invariants
/// - Variants are stable for mapping onto response codes.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Policy requires an idempotency key and none was supplied.
    #[error("idempotency_key is required by policy")]
    KeyRequired,
    /// Plan resolution or validation failed.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// Concurrent launches conflicted and no winner could be reread.
    #[error("run conflict")]
    Conflict,
    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Launch
// ============================================================================

/// Validates and enqueues a run, honouring the idempotency gate.
///
/// Returns the existing run unchanged when the idempotency key is already
/// claimed (including losing a concurrent race on the unique constraint).
///
/// # Errors
///
/// Returns [`LaunchError`] when policy, plan resolution, params validation,
/// or storage fails.
pub fn launch_run(
    store: &dyn Store,
    plans_root: &Path,
    require_idempotency_key: bool,
    launch: &RunLaunch,
) -> Result<RunRecord, LaunchError> {
    if require_idempotency_key
        && launch.idempotency_key.as_deref().is_none_or(|key| key.trim().is_empty())
    {
        return Err(LaunchError::KeyRequired);
    }

    let plan = load_plan(plans_root, &launch.plan_id)?;
    let params =
        if launch.params.is_null() { Value::Object(serde_json::Map::new()) } else { launch.params.clone() };
    validate_params(&plan, &params)?;
    let plan_hash = hash_plan(&plan)?;

    if let Some(key) = launch.idempotency_key.as_deref()
        && let Some(existing) = store.run_by_idempotency_key(key)?
    {
        return Ok(existing);
    }

    let run = RunRecord {
        run_id: RunId::new(Uuid::new_v4().to_string()),
        plan_id: launch.plan_id.clone(),
        plan_hash,
        status: RunStatus::Queued,
        requested_by: launch.requested_by.clone(),
        idempotency_key: launch.idempotency_key.clone(),
        created_at: Timestamp::now(),
        started_at: None,
        finished_at: None,
        claimed_by: None,
        claim_expires_at: None,
        params,
        result_summary: None,
        error_code: None,
        error_message: None,
    };
    match store.insert_run(&run) {
        Ok(()) => Ok(run),
        Err(StoreError::Conflict(_)) => {
            // The unique constraint arbitrated a race; reread the winner.
            if let Some(key) = launch.idempotency_key.as_deref()
                && let Some(existing) = store.run_by_idempotency_key(key)?
            {
                return Ok(existing);
            }
            Err(LaunchError::Conflict)
        }
        Err(error) => Err(LaunchError::Store(error)),
    }
}
