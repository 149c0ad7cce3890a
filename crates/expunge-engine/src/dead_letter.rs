// crates/expunge-engine/src/dead_letter.rs
// ============================================================================
// Module: Dead-Letter Controller
// Description: Consecutive per-broker failure tracking with schedule disable.
// Purpose: Stop rescheduling brokers whose plans keep failing.
// Dependencies: expunge-core, tracing
// ============================================================================

//! ## Overview
//! The controller keeps an advisory, process-local count of consecutive run
//! failures per broker. A success resets the count; at the threshold every
//! enabled schedule for the broker is disabled in the store and an alert
//! event is emitted. Losing the counts on restart is safe — the next
//! failures rebuild them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use expunge_core::BrokerId;
use expunge_core::PlanId;
use expunge_core::RunId;
use expunge_core::Store;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Plan-id prefix produced by the scheduler for broker plans.
const BROKER_PLAN_PREFIX: &str = "broker_";

/// Derives the broker id a plan id belongs to.
#[must_use]
pub fn broker_id_for_plan(plan_id: &PlanId) -> BrokerId {
    BrokerId::new(plan_id.as_str().strip_prefix(BROKER_PLAN_PREFIX).unwrap_or(plan_id.as_str()))
}

// ============================================================================
// SECTION: Controller
// ============================================================================

/// Tracks consecutive per-broker failures and disables schedules at the cap.
///
/// # Invariants
/// - Counts are advisory and process-local.
pub struct DeadLetterController {
    /// Store used to disable schedules.
    store: Arc<dyn Store>,
    /// Failure threshold.
    max_failures: u32,
    /// Consecutive failure count per broker.
    counts: Mutex<HashMap<String, u32>>,
}

impl DeadLetterController {
    /// Creates a controller with the given threshold.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, max_failures: u32) -> Self {
        Self {
            store,
            max_failures: max_failures.max(1),
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Resets the failure count after a successful run.
    pub fn record_success(&self, broker_id: &BrokerId) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.remove(broker_id.as_str());
        }
    }

    /// Records a failed run; returns `true` when the broker was disabled.
    pub fn record_failure(&self, broker_id: &BrokerId, run_id: &RunId, error: Option<&str>) -> bool {
        let count = {
            let Ok(mut counts) = self.counts.lock() else {
                return false;
            };
            let entry = counts.entry(broker_id.as_str().to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let mut truncated_error = error.unwrap_or("").to_string();
        truncated_error
            .truncate(truncated_error.char_indices().nth(200).map_or(truncated_error.len(), |(at, _)| at));
        tracing::warn!(
            broker = broker_id.as_str(),
            count,
            max = self.max_failures,
            run = run_id.as_str(),
            error = %truncated_error,
            "dead_letter.failure"
        );
        if count >= self.max_failures {
            self.disable_broker(broker_id);
            return true;
        }
        false
    }

    /// Returns the current consecutive failure count for a broker.
    #[must_use]
    pub fn failure_count(&self, broker_id: &BrokerId) -> u32 {
        self.counts
            .lock()
            .ok()
            .and_then(|counts| counts.get(broker_id.as_str()).copied())
            .unwrap_or(0)
    }

    /// Disables every enabled schedule for a broker, logging an alert.
    fn disable_broker(&self, broker_id: &BrokerId) {
        match self.store.disable_schedules_for_broker(broker_id) {
            Ok(disabled) => {
                tracing::error!(
                    broker = broker_id.as_str(),
                    disabled_schedules = disabled,
                    threshold = self.max_failures,
                    "dead_letter.broker_disabled"
                );
            }
            Err(error) => {
                tracing::error!(
                    broker = broker_id.as_str(),
                    error = %error,
                    "dead_letter.disable_failed"
                );
            }
        }
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

    use expunge_core::PlanId;

    use super::broker_id_for_plan;

    #[test]
    fn broker_derivation_strips_the_plan_prefix() {
        assert_eq!(broker_id_for_plan(&PlanId::new("broker_peoplelens")).as_str(), "peoplelens");
        assert_eq!(broker_id_for_plan(&PlanId::new("peoplelens")).as_str(), "peoplelens");
    }
}
