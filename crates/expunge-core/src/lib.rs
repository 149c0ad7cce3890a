// crates/expunge-core/src/lib.rs
// ============================================================================
// Module: Expunge Core Library
// Description: Identifiers, persisted records, hashing, retries, and interfaces.
// Purpose: Define the engine-facing contract shared by every Expunge crate.
// Dependencies: rand, serde, serde_jcs, serde_json, sha2, thiserror
// ============================================================================

//! ## Overview
//! Expunge Core defines the durable data model for erasure runs (runs, task
//! instances, approvals, artifacts, schedules), the canonical hashing used to
//! freeze plan definitions, the retry policy with its transient error
//! taxonomy, the `{{ path }}` reference-resolution grammar, and the narrow
//! interfaces the run engine uses to talk to the store and the task
//! dispatcher.
//!
//! Security posture: persisted records and task inputs are untrusted on load;
//! error strings destined for storage are scrubbed of configured PII terms.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use self::core::errors::RunErrorCode;
pub use self::core::errors::redact_error_message;
pub use self::core::hashing;
pub use self::core::identifiers::ApprovalId;
pub use self::core::identifiers::ArtifactId;
pub use self::core::identifiers::BrokerId;
pub use self::core::identifiers::PlanId;
pub use self::core::identifiers::ProfileId;
pub use self::core::identifiers::RunId;
pub use self::core::identifiers::RunnerId;
pub use self::core::identifiers::ScheduleId;
pub use self::core::identifiers::TaskId;
pub use self::core::identifiers::TaskRunId;
pub use self::core::records::ApprovalDecision;
pub use self::core::records::ApprovalRecord;
pub use self::core::records::ApprovalStatus;
pub use self::core::records::ArtifactRecord;
pub use self::core::records::RunLaunch;
pub use self::core::records::RunRecord;
pub use self::core::records::RunStatus;
pub use self::core::records::ScheduleRecord;
pub use self::core::records::TaskInstance;
pub use self::core::records::TaskStatus;
pub use self::core::records::TaskType;
pub use self::core::retry::RetryPolicy;
pub use self::core::retry::TaskError;
pub use self::core::retry::is_transient_http;
pub use self::core::retry::with_retries;
pub use self::core::retry::with_retries_using_sleep;
pub use self::core::template::ReferenceContext;
pub use self::core::template::resolve_value;
pub use self::core::time::Timestamp;
pub use self::interfaces::RunCreator;
pub use self::interfaces::Store;
pub use self::interfaces::StoreError;
pub use self::interfaces::TaskCall;
pub use self::interfaces::TaskDispatcher;
