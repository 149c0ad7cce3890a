// crates/expunge-store-sqlite/src/lib.rs
// ============================================================================
// Module: Expunge SQLite Store Library
// Description: Durable orchestrator store backed by SQLite WAL.
// Purpose: Persist runs, tasks, approvals, artifacts, and schedules.
// Dependencies: expunge-core, rusqlite, serde_json, thiserror
// ============================================================================

//! ## Overview
//! One relational database is the single coordination point for every Expunge
//! worker. All cross-worker transitions — run claims, lease renewals,
//! approval resolutions — are conditional updates committed in short
//! transactions; the idempotent-launch gate rests on the unique constraint
//! over `idempotency_key`.
//!
//! Security posture: database contents are untrusted on load and decoded
//! fail-closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteStore;
pub use store::SqliteStoreConfig;
