// crates/expunge-engine/src/scheduler.rs
// ============================================================================
// Module: Scan Scheduler
// Description: Periodic worker creating runs for due broker schedules.
// Purpose: Drive re-executions against the persisted schedule table.
// Dependencies: expunge-core, expunge-plans, tracing, uuid
// ============================================================================

//! ## Overview
//! Each tick selects enabled schedules due now, deduplicates by broker so at
//! most one run per broker is created per tick, calls the run-creation hook
//! with `plan_id = "broker_" + broker_id`, and advances the schedule. A
//! schedule always advances — a failed hook records a synthetic sentinel run
//! id rather than retrying forever. Bootstrap creates one immediate schedule
//! per catalogued broker that declares a plan file.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use expunge_core::PlanId;
use expunge_core::ProfileId;
use expunge_core::RunCreator;
use expunge_core::RunId;
use expunge_core::ScheduleId;
use expunge_core::ScheduleRecord;
use expunge_core::Store;
use expunge_core::Timestamp;
use expunge_plans::BrokerCatalog;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Scan type recorded on bootstrap schedules.
const DEFAULT_SCAN_TYPE: &str = "discovery";

/// Granularity of the worker loop's stop checks.
const STOP_POLL: Duration = Duration::from_secs(1);

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Background scheduler creating runs for due broker schedules.
///
/// # Invariants
/// - Never creates more than one run per broker per tick.
pub struct ScanScheduler {
    /// Store holding the schedule table.
    store: Arc<dyn Store>,
    /// Run-creation hook.
    creator: Arc<dyn RunCreator>,
    /// Tick interval.
    poll_interval: Duration,
}

impl ScanScheduler {
    /// Creates a scheduler ticking at `poll_interval_seconds`.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        creator: Arc<dyn RunCreator>,
        poll_interval_seconds: u64,
    ) -> Self {
        Self {
            store,
            creator,
            poll_interval: Duration::from_secs(poll_interval_seconds.max(1)),
        }
    }

    /// Processes one tick; returns the number of schedules advanced.
    pub fn tick(&self, now: Timestamp) -> u32 {
        let due = match self.store.due_schedules(now) {
            Ok(due) => due,
            Err(error) => {
                tracing::error!(error = %error, "scheduler.poll_error");
                return 0;
            }
        };
        if !due.is_empty() {
            tracing::info!(count = due.len(), "scheduler.due_jobs");
        }

        let mut seen_brokers: BTreeSet<String> = BTreeSet::new();
        let mut advanced = 0;
        for schedule in due {
            if !seen_brokers.insert(schedule.broker_id.as_str().to_string()) {
                continue;
            }
            let plan_id = PlanId::new(format!("broker_{}", schedule.broker_id));
            let params = json!({
                "profile_id": schedule.profile_id.as_str(),
                "scan_type": schedule.scan_type,
            });
            let run_id = self
                .creator
                .create_run(&plan_id, params)
                .unwrap_or_else(|| RunId::new(format!("skipped-{}", Uuid::new_v4())));
            match self.store.advance_schedule(&schedule.schedule_id, &run_id, now) {
                Ok(()) => {
                    advanced += 1;
                    tracing::info!(
                        schedule = schedule.schedule_id.as_str(),
                        run = run_id.as_str(),
                        "scheduler.mark_started"
                    );
                }
                Err(error) => {
                    tracing::error!(
                        schedule = schedule.schedule_id.as_str(),
                        error = %error,
                        "scheduler.advance_failed"
                    );
                }
            }
        }
        advanced
    }

    /// Creates immediate schedules for every catalogued broker with a plan.
    ///
    /// Existing `(broker, profile)` schedules are left untouched. Returns
    /// the ids of the schedules created.
    pub fn initialize_for_profile(
        &self,
        profile_id: &ProfileId,
        catalog: &BrokerCatalog,
        now: Timestamp,
    ) -> Vec<ScheduleId> {
        let mut created = Vec::new();
        for broker in catalog.all() {
            if broker.plan_file.is_none() {
                continue;
            }
            let schedule = ScheduleRecord {
                schedule_id: ScheduleId::new(Uuid::new_v4().to_string()),
                broker_id: broker.id.clone(),
                profile_id: profile_id.clone(),
                scan_type: DEFAULT_SCAN_TYPE.to_string(),
                next_run_at: now,
                last_run_id: None,
                last_run_at: None,
                interval_days: broker.recheck_days,
                enabled: true,
                created_at: now,
            };
            match self.store.insert_schedule_if_absent(&schedule) {
                Ok(true) => created.push(schedule.schedule_id),
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(
                        broker = broker.id.as_str(),
                        error = %error,
                        "scheduler.bootstrap_failed"
                    );
                }
            }
        }
        tracing::info!(
            profile = profile_id.as_str(),
            schedules = created.len(),
            "scheduler.initialized"
        );
        created
    }

    /// Runs the tick loop until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        tracing::info!(interval_s = self.poll_interval.as_secs(), "scheduler.started");
        while !stop.load(Ordering::Relaxed) {
            self.tick(Timestamp::now());
            sleep_until_stop(self.poll_interval, stop);
        }
        tracing::info!("scheduler.stopped");
    }
}

/// Sleeps for `duration` in one-second steps, returning early on stop.
pub(crate) fn sleep_until_stop(duration: Duration, stop: &AtomicBool) {
    let mut remaining = duration;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = remaining.min(STOP_POLL);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
