// crates/expunge-engine/src/metrics.rs
// ============================================================================
// Module: Engine Metrics
// Description: Prometheus counters, histograms, and gauges for the engine.
// Purpose: Make metric handles explicit dependencies, registered at startup.
// Dependencies: prometheus
// ============================================================================

//! ## Overview
//! One [`EngineMetrics`] handle is created at process start against the
//! process registry and passed to the components that record into it; nothing
//! registers at import time. Exposition happens at the server's `/metrics`
//! endpoint through the same registry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Engine metric handles registered against one process registry.
///
/// # Invariants
/// - Registered exactly once per process; clones share the underlying series.
#[derive(Clone)]
pub struct EngineMetrics {
    /// Runs enqueued, by plan.
    pub runs_started: IntCounterVec,
    /// Runs reaching a terminal state, by plan and status.
    pub runs_finished: IntCounterVec,
    /// Task handler duration in seconds, by task type.
    pub task_duration: HistogramVec,
    /// Approvals currently pending across all runs.
    pub approvals_pending: IntGauge,
    /// Human-handoff items enqueued by handlers.
    pub human_queue_items: IntCounterVec,
}

impl EngineMetrics {
    /// Creates and registers the engine metrics.
    ///
    /// # Errors
    ///
    /// Returns [`prometheus::Error`] when a collector cannot be registered
    /// (for example, on duplicate registration).
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let runs_started = IntCounterVec::new(
            Opts::new("expunge_runs_started_total", "Total run starts"),
            &["plan_id"],
        )?;
        let runs_finished = IntCounterVec::new(
            Opts::new("expunge_runs_finished_total", "Total run terminal states"),
            &["plan_id", "status"],
        )?;
        let task_duration = HistogramVec::new(
            HistogramOpts::new("expunge_task_duration_seconds", "Task handler duration"),
            &["task_type"],
        )?;
        let approvals_pending =
            IntGauge::new("expunge_approvals_pending", "Pending approvals")?;
        let human_queue_items = IntCounterVec::new(
            Opts::new("expunge_human_queue_items_total", "Human-handoff items enqueued"),
            &["broker"],
        )?;
        registry.register(Box::new(runs_started.clone()))?;
        registry.register(Box::new(runs_finished.clone()))?;
        registry.register(Box::new(task_duration.clone()))?;
        registry.register(Box::new(approvals_pending.clone()))?;
        registry.register(Box::new(human_queue_items.clone()))?;
        Ok(Self {
            runs_started,
            runs_finished,
            task_duration,
            approvals_pending,
            human_queue_items,
        })
    }
}
