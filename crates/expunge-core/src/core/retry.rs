// crates/expunge-core/src/core/retry.rs
// ============================================================================
// Module: Expunge Retry Controller
// Description: Attempt policy with jittered backoff and transient typing.
// Purpose: Decide, in exactly one place, whether a failed handler call loops.
// Dependencies: rand, thiserror
// ============================================================================

//! ## Overview
//! Handlers signal transience through [`TaskError`]; this module is the only
//! place that turns a transient error into another attempt. Non-idempotent
//! tasks never retry, which is the double-submit guard for side-effect task
//! types. Backoff doubles per attempt with symmetric jitter and is capped at
//! the policy maximum. The sleep function is injectable so tests never block.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::thread;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// HTTP status codes classified as transient.
pub const TRANSIENT_HTTP_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// Returns `true` when an HTTP status is in the transient set.
#[must_use]
pub fn is_transient_http(status: u16) -> bool {
    TRANSIENT_HTTP_STATUSES.contains(&status)
}

// ============================================================================
// SECTION: Task Error
// ============================================================================

/// Handler failure with an explicit transience classification.
///
/// # Invariants
/// - `transient` is the handler's judgement; the retry loop trusts it.
/// - `message` must not embed raw PII; callers scrub before persisting.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TaskError {
    /// Human-readable failure description.
    message: String,
    /// Whether the failure is eligible for retry on idempotent tasks.
    transient: bool,
    /// Optional HTTP status code attached to the failure.
    status_code: Option<u16>,
}

impl TaskError {
    /// Creates a retryable failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            status_code: None,
        }
    }

    /// Creates a terminal failure.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            status_code: None,
        }
    }

    /// Creates a failure classified by HTTP status.
    #[must_use]
    pub fn http_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            transient: is_transient_http(status),
            status_code: Some(status),
        }
    }

    /// Returns whether this failure is eligible for retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.transient
    }

    /// Returns the attached HTTP status, when present.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Retry policy: attempt budget and backoff window.
///
/// # Invariants
/// - `attempts >= 1`; callers clamp when combining with per-task budgets.
/// - `jitter` is a fraction in `[0, 1)` applied symmetrically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum handler invocations, including the first.
    pub attempts: u32,
    /// Initial backoff delay in milliseconds.
    pub min_delay_ms: u64,
    /// Backoff delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Symmetric jitter fraction applied to each sleep.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            min_delay_ms: 500,
            max_delay_ms: 60_000,
            jitter: 0.15,
        }
    }
}

impl RetryPolicy {
    /// Returns this policy with the attempt budget clamped to a task budget.
    #[must_use]
    pub fn with_task_budget(self, max_attempts: u32) -> Self {
        Self {
            attempts: self.attempts.min(max_attempts).max(1),
            ..self
        }
    }
}

// ============================================================================
// SECTION: Retry Loop
// ============================================================================

/// Runs `operation` under `policy`, sleeping with the provided function.
///
/// Retries happen only when the failure is transient, the task is
/// idempotent, and attempts remain; otherwise the last error propagates.
///
/// # Errors
///
/// Returns the final [`TaskError`] after the budget is exhausted or a
/// non-retryable failure occurs.
pub fn with_retries_using_sleep<T>(
    policy: &RetryPolicy,
    idempotent: bool,
    mut operation: impl FnMut() -> Result<T, TaskError>,
    mut sleep: impl FnMut(Duration),
) -> Result<T, TaskError> {
    let attempts = policy.attempts.max(1);
    let mut delay_ms = policy.min_delay_ms.max(1);
    let mut attempt = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !idempotent || !error.is_transient() || attempt >= attempts {
                    return Err(error);
                }
                sleep(Duration::from_millis(jittered(delay_ms, policy)));
                delay_ms = delay_ms.saturating_mul(2).min(policy.max_delay_ms);
                attempt += 1;
            }
        }
    }
}

/// Runs `operation` under `policy` with real thread sleeps.
///
/// # Errors
///
/// Returns the final [`TaskError`] after the budget is exhausted or a
/// non-retryable failure occurs.
pub fn with_retries<T>(
    policy: &RetryPolicy,
    idempotent: bool,
    operation: impl FnMut() -> Result<T, TaskError>,
) -> Result<T, TaskError> {
    with_retries_using_sleep(policy, idempotent, operation, thread::sleep)
}

/// Applies symmetric jitter to a delay, capped at the policy maximum.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    reason = "Jittered delays are bounded by max_delay_ms before conversion."
)]
fn jittered(delay_ms: u64, policy: &RetryPolicy) -> u64 {
    let jitter = policy.jitter.clamp(0.0, 0.99);
    let factor = if jitter > 0.0 {
        1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        1.0
    };
    let scaled = (delay_ms as f64 * factor).max(0.0);
    scaled.min(policy.max_delay_ms as f64) as u64
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

    use std::time::Duration;

    use super::RetryPolicy;
    use super::TaskError;
    use super::is_transient_http;
    use super::with_retries_using_sleep;

    /// Policy with no jitter so sleep expectations are exact.
    fn flat_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            min_delay_ms: 100,
            max_delay_ms: 400,
            jitter: 0.0,
        }
    }

    #[test]
    fn transient_idempotent_failures_retry_until_budget() {
        let mut calls = 0u32;
        let mut sleeps = Vec::new();
        let result: Result<(), TaskError> = with_retries_using_sleep(
            &flat_policy(3),
            true,
            || {
                calls += 1;
                Err(TaskError::transient("connection reset"))
            },
            |duration| sleeps.push(duration),
        );
        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert_eq!(sleeps, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[test]
    fn backoff_is_capped_at_policy_max() {
        let mut sleeps = Vec::new();
        let policy = RetryPolicy {
            attempts: 5,
            min_delay_ms: 300,
            max_delay_ms: 500,
            jitter: 0.0,
        };
        let result: Result<(), TaskError> = with_retries_using_sleep(
            &policy,
            true,
            || Err(TaskError::transient("busy")),
            |duration| sleeps.push(duration),
        );
        assert!(result.is_err());
        assert_eq!(
            sleeps,
            vec![
                Duration::from_millis(300),
                Duration::from_millis(500),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn non_idempotent_failures_surface_immediately() {
        let mut calls = 0u32;
        let result: Result<(), TaskError> = with_retries_using_sleep(
            &flat_policy(3),
            false,
            || {
                calls += 1;
                Err(TaskError::transient("would double-submit"))
            },
            |_| {},
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn permanent_failures_do_not_retry() {
        let mut calls = 0u32;
        let result: Result<(), TaskError> = with_retries_using_sleep(
            &flat_policy(3),
            true,
            || {
                calls += 1;
                Err(TaskError::permanent("selector not found"))
            },
            |_| {},
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn success_after_transient_failure_returns_value() {
        let mut calls = 0u32;
        let result = with_retries_using_sleep(
            &flat_policy(3),
            true,
            || {
                calls += 1;
                if calls < 2 {
                    Err(TaskError::http_status("upstream 503", 503))
                } else {
                    Ok(calls)
                }
            },
            |_| {},
        );
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn http_transient_set_matches_contract() {
        for status in [408, 409, 425, 429, 500, 502, 503, 504] {
            assert!(is_transient_http(status), "{status} should be transient");
        }
        for status in [400, 401, 403, 404, 410, 422] {
            assert!(!is_transient_http(status), "{status} should be terminal");
        }
    }

    #[test]
    fn task_budget_clamps_policy_attempts() {
        let policy = RetryPolicy::default().with_task_budget(2);
        assert_eq!(policy.attempts, 2);
        let policy = RetryPolicy::default().with_task_budget(10);
        assert_eq!(policy.attempts, 3);
    }
}
