// crates/expunge-engine/src/sweeper.rs
// ============================================================================
// Module: Retention Sweeper
// Description: Periodic deletion of expired artifacts by kind.
// Purpose: Bound on-disk PII footprint while preserving the audit trail.
// Dependencies: expunge-config, expunge-core, tracing
// ============================================================================

//! ## Overview
//! The sweeper walks every artifact row, computes its age in whole days, and
//! deletes file and row when the kind's retention has lapsed. A negative
//! retention keeps that kind indefinitely. A missing file counts as already
//! deleted (the row is removed); a file that exists but cannot be unlinked
//! keeps its row so the audit trail still points at real content.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use expunge_config::RetentionSettings;
use expunge_core::ArtifactRecord;
use expunge_core::Store;
use expunge_core::Timestamp;

use crate::artifacts::safe_artifact_path;
use crate::scheduler::sleep_until_stop;

// ============================================================================
// SECTION: Report
// ============================================================================

/// Outcome of one sweep pass.
///
/// # Invariants
/// - `rows_deleted` counts store rows; `files_deleted` counts unlinked files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Artifact rows examined.
    pub examined: u64,
    /// Rows deleted, by artifact kind.
    pub rows_deleted: BTreeMap<String, u64>,
    /// Files unlinked from disk.
    pub files_deleted: u64,
    /// Files that resisted deletion (rows kept).
    pub files_failed: u64,
}

// ============================================================================
// SECTION: Sweeper
// ============================================================================

/// Background worker deleting expired artifacts.
///
/// # Invariants
/// - Never deletes an artifact whose kind's retention is negative.
pub struct RetentionSweeper {
    /// Store holding artifact rows.
    store: Arc<dyn Store>,
    /// Artifacts root directory.
    artifacts_root: PathBuf,
    /// Retention settings by kind.
    retention: RetentionSettings,
}

impl RetentionSweeper {
    /// Creates a sweeper over the artifacts root.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        artifacts_root: PathBuf,
        retention: RetentionSettings,
    ) -> Self {
        Self {
            store,
            artifacts_root,
            retention,
        }
    }

    /// Returns whether an artifact is past its kind's retention.
    fn is_expired(&self, artifact: &ArtifactRecord, now: Timestamp) -> bool {
        let age_days = now.days_since(artifact.created_at);
        match artifact.kind.as_str() {
            "html" => self.retention.html_days >= 0 && age_days > self.retention.html_days,
            "screenshot" => {
                self.retention.screenshot_days >= 0 && age_days > self.retention.screenshot_days
            }
            "confirmation" | "receipt" => {
                self.retention.confirmation_days >= 0
                    && age_days > self.retention.confirmation_days
            }
            _ => false,
        }
    }

    /// Runs one sweep pass.
    #[must_use]
    pub fn sweep_once(&self, now: Timestamp) -> SweepReport {
        let artifacts = match self.store.all_artifacts() {
            Ok(artifacts) => artifacts,
            Err(error) => {
                tracing::error!(error = %error, "artifact_sweep.scan_failed");
                return SweepReport::default();
            }
        };
        let mut report = SweepReport {
            examined: artifacts.len() as u64,
            ..SweepReport::default()
        };

        for artifact in artifacts {
            if !self.is_expired(&artifact, now) {
                continue;
            }
            match self.delete_file(&artifact) {
                FileOutcome::Deleted => report.files_deleted += 1,
                FileOutcome::AlreadyGone => {}
                FileOutcome::Failed => {
                    report.files_failed += 1;
                    continue;
                }
            }
            match self.store.delete_artifact(&artifact.artifact_id) {
                Ok(()) => {
                    *report.rows_deleted.entry(artifact.kind.clone()).or_insert(0) += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        artifact = artifact.artifact_id.as_str(),
                        error = %error,
                        "artifact_sweep.row_delete_failed"
                    );
                }
            }
        }

        if report.files_deleted > 0 || !report.rows_deleted.is_empty() {
            tracing::info!(
                examined = report.examined,
                files = report.files_deleted,
                rows = report.rows_deleted.values().sum::<u64>(),
                "artifact_sweep.completed"
            );
        }
        report
    }

    /// Unlinks the artifact file, tolerating failures.
    fn delete_file(&self, artifact: &ArtifactRecord) -> FileOutcome {
        let Ok(path) = safe_artifact_path(&self.artifacts_root, &artifact.uri) else {
            tracing::warn!(uri = %artifact.uri, "artifact_sweep.path_rejected");
            return FileOutcome::AlreadyGone;
        };
        if !path.exists() {
            return FileOutcome::AlreadyGone;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => FileOutcome::Deleted,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "artifact_sweep.delete_failed");
                FileOutcome::Failed
            }
        }
    }

    /// Runs the sweep loop at `poll_interval_seconds` until `stop` is set.
    pub fn run(&self, stop: &AtomicBool) {
        let interval = Duration::from_secs(self.retention.poll_interval_seconds.max(1));
        tracing::info!(interval_s = interval.as_secs(), "artifact_sweep.started");
        while !stop.load(Ordering::Relaxed) {
            let _ = self.sweep_once(Timestamp::now());
            sleep_until_stop(interval, stop);
        }
        tracing::info!("artifact_sweep.stopped");
    }
}

/// Outcome of one file unlink attempt.
enum FileOutcome {
    /// File removed from disk.
    Deleted,
    /// File was already absent (treated as deleted).
    AlreadyGone,
    /// Unlink failed; the row is kept.
    Failed,
}
