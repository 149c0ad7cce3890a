// crates/expunge-core/src/core/errors.rs
// ============================================================================
// Module: Expunge Run Error Codes
// Description: Stable terminal error codes and PII scrubbing for messages.
// Purpose: Surface run failures with codes the API and operators can match on.
// Dependencies: regex, serde
// ============================================================================

//! ## Overview
//! Every terminal run failure carries one of these codes in `error_code`.
//! Transient failures never reach a code; they are retried or surface as
//! `TASK_EXECUTION_FAILED` once the budget is exhausted. Error messages are
//! scrubbed before persistence: built-in SSN, phone, email, and ZIP patterns
//! apply unconditionally, and caller-supplied PII terms (configured lists and
//! decrypted-profile fields) are replaced on top.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Terminal run error codes.
///
/// # Invariants
/// - Wire forms are stable SCREAMING_SNAKE strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunErrorCode {
    /// No plan file resolved for the launched plan id.
    PlanNotFound,
    /// Stored plan hash no longer matches the plan file.
    PlanHashMismatch,
    /// Launch params failed the plan's params schema.
    ParamsInvalid,
    /// A task's dependency has no succeeded task instance.
    DepUnsatisfied,
    /// An operator denied a required approval.
    ApprovalDenied,
    /// A task failed after exhausting its retry budget.
    TaskExecutionFailed,
    /// The run exceeded its wall-clock timeout.
    RunTimeout,
}

impl RunErrorCode {
    /// Returns the stable wire label for the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlanNotFound => "PLAN_NOT_FOUND",
            Self::PlanHashMismatch => "PLAN_HASH_MISMATCH",
            Self::ParamsInvalid => "PARAMS_INVALID",
            Self::DepUnsatisfied => "DEP_UNSATISFIED",
            Self::ApprovalDenied => "APPROVAL_DENIED",
            Self::TaskExecutionFailed => "TASK_EXECUTION_FAILED",
            Self::RunTimeout => "RUN_TIMEOUT",
        }
    }
}

impl fmt::Display for RunErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Redaction
// ============================================================================

/// Replacement marker for scrubbed caller-supplied terms.
const PII_REDACTED: &str = "[PII-REDACTED]";

/// Source patterns for the built-in scrub, applied in declaration order.
///
/// SSN must precede phone: both are digit runs, and the 3-2-4 grouping has to
/// win over the 3-3-4 grouping where separators make either parse possible.
const BUILTIN_PATTERN_SOURCES: [(&str, &str); 4] = [
    (r"\b\d{3}[-.]?\d{2}[-.]?\d{4}\b", "[SSN-REDACTED]"),
    (r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b", "[PHONE-REDACTED]"),
    (r"[\w.+-]+@[\w-]+\.[\w.-]+", "[EMAIL-REDACTED]"),
    (r"\b\d{5}(?:-\d{4})?\b", "[ZIP-REDACTED]"),
];

/// Returns the compiled built-in PII patterns.
fn builtin_patterns() -> &'static [(Regex, &'static str)] {
    /// Compiled pattern cache, built on first use.
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        BUILTIN_PATTERN_SOURCES
            .into_iter()
            .filter_map(|(source, marker)| Regex::new(source).ok().map(|re| (re, marker)))
            .collect()
    })
}

/// Scrubs PII from an error message before persistence.
///
/// The built-in SSN, phone, email, and ZIP patterns apply unconditionally;
/// they need no configuration and are the primary guard against profile data
/// leaking into stored error strings. Caller-supplied `terms` (configured
/// lists, decrypted-profile fields) are then replaced verbatim; terms shorter
/// than three characters are ignored to avoid destroying unrelated text.
#[must_use]
pub fn redact_error_message(message: &str, terms: &[String]) -> String {
    let mut scrubbed = message.to_string();
    for (pattern, marker) in builtin_patterns() {
        scrubbed = pattern.replace_all(&scrubbed, *marker).into_owned();
    }
    for term in terms {
        if term.len() > 2 {
            scrubbed = scrubbed.replace(term.as_str(), PII_REDACTED);
        }
    }
    scrubbed
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

    use super::RunErrorCode;
    use super::redact_error_message;

    #[test]
    fn codes_round_trip_through_serde() {
        let label = serde_json::to_string(&RunErrorCode::PlanHashMismatch).unwrap();
        assert_eq!(label, "\"PLAN_HASH_MISMATCH\"");
        let code: RunErrorCode = serde_json::from_str(&label).unwrap();
        assert_eq!(code, RunErrorCode::PlanHashMismatch);
    }

    #[test]
    fn redacts_phone_numbers_without_terms() {
        let scrubbed = redact_error_message("Call 312-555-1234 now", &[]);
        assert!(scrubbed.contains("[PHONE-REDACTED]"));
        assert!(!scrubbed.contains("312-555-1234"));
    }

    #[test]
    fn redacts_email_without_terms() {
        let scrubbed = redact_error_message("Email jane@example.com", &[]);
        assert!(scrubbed.contains("[EMAIL-REDACTED]"));
        assert!(!scrubbed.contains("jane@example.com"));
    }

    #[test]
    fn redacts_ssn_without_terms() {
        let scrubbed = redact_error_message("SSN: 123-45-6789", &[]);
        assert!(scrubbed.contains("[SSN-REDACTED]"));
        assert!(!scrubbed.contains("123-45-6789"));
    }

    #[test]
    fn redacts_zip_without_terms() {
        let scrubbed = redact_error_message("ZIP: 60601", &[]);
        assert!(scrubbed.contains("[ZIP-REDACTED]"));
        assert!(!scrubbed.contains("60601"));
    }

    #[test]
    fn redacts_custom_terms() {
        let terms = vec!["Jane Doe".to_string(), "123 Main St".to_string()];
        let scrubbed = redact_error_message("Found Jane Doe at 123 Main St", &terms);
        assert!(!scrubbed.contains("Jane Doe"));
        assert!(!scrubbed.contains("123 Main St"));
        assert!(scrubbed.contains("[PII-REDACTED]"));
    }

    #[test]
    fn ignores_short_terms() {
        let terms = vec!["IL".to_string()];
        let scrubbed = redact_error_message("State: IL", &terms);
        assert_eq!(scrubbed, "State: IL");
    }

    #[test]
    fn patterns_and_terms_compose() {
        let terms = vec!["Jane Ann Doe".to_string()];
        let scrubbed = redact_error_message(
            "form rejected for Jane Ann Doe <jane@example.net>, ssn 123-45-6789",
            &terms,
        );
        assert!(scrubbed.contains("[PII-REDACTED]"));
        assert!(scrubbed.contains("[EMAIL-REDACTED]"));
        assert!(scrubbed.contains("[SSN-REDACTED]"));
        assert!(!scrubbed.contains("Jane Ann Doe"));
        assert!(!scrubbed.contains("jane@example.net"));
        assert!(!scrubbed.contains("123-45-6789"));
    }
}
