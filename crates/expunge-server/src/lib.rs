// crates/expunge-server/src/lib.rs
// ============================================================================
// Module: Expunge REST Server
// Description: Thin API boundary over the store, launch gate, and artifacts.
// Purpose: Expose run, approval, schedule, and plan-check endpoints.
// Dependencies: axum, expunge-core, expunge-engine, expunge-plans,
// prometheus, sha2, subtle, tokio
// ============================================================================

//! ## Overview
//! The server is deliberately thin: every endpoint reads or writes through
//! the same store the workers use, so the API never holds state of its own.
//! Bearer auth compares SHA-256 digests in constant time. Artifact reads
//! resolve beneath the artifacts root (traversal is a 403) and are capped in
//! size (a 413). `/healthz` and `/metrics` are unauthenticated.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod api;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use api::ApiState;
pub use api::RunStatusResponse;
pub use api::build_router;
pub use api::serve;
