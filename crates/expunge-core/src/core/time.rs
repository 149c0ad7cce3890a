// crates/expunge-core/src/core/time.rs
// ============================================================================
// Module: Expunge Time Model
// Description: Unix-millisecond timestamps for runs, leases, and schedules.
// Purpose: Provide one timestamp representation with lease and retention math.
// Dependencies: serde, std
// ============================================================================

//! ## Overview
//! All persisted Expunge timestamps are unix epoch milliseconds. Lease
//! expiry, run wall-clock timeouts, and artifact retention all reduce to
//! integer comparisons on this type, which keeps the claim protocol free of
//! timezone or precision concerns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Milliseconds in one day, used for schedule and retention arithmetic.
const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1_000;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Unix epoch milliseconds.
///
/// # Invariants
/// - Values are wall-clock observations; monotonicity is not guaranteed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch milliseconds.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Self(millis)
    }

    /// Returns the timestamp as unix epoch milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns this timestamp advanced by `millis` (saturating).
    #[must_use]
    pub const fn plus_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns this timestamp advanced by `seconds` (saturating).
    #[must_use]
    pub const fn plus_seconds(self, seconds: i64) -> Self {
        self.plus_millis(seconds.saturating_mul(1_000))
    }

    /// Returns this timestamp advanced by `days` (saturating).
    #[must_use]
    pub const fn plus_days(self, days: i64) -> Self {
        self.plus_millis(days.saturating_mul(MILLIS_PER_DAY))
    }

    /// Returns the elapsed milliseconds from `earlier` to `self` (zero if negative).
    #[must_use]
    pub const fn millis_since(self, earlier: Self) -> i64 {
        let delta = self.0.saturating_sub(earlier.0);
        if delta < 0 { 0 } else { delta }
    }

    /// Returns the age in whole days from `earlier` to `self`.
    #[must_use]
    pub const fn days_since(self, earlier: Self) -> i64 {
        self.millis_since(earlier) / MILLIS_PER_DAY
    }

    /// Returns `true` when this timestamp is strictly before `other`.
    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
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

    use super::Timestamp;

    #[test]
    fn day_arithmetic_round_trips() {
        let base = Timestamp::from_millis(1_000);
        let later = base.plus_days(3);
        assert_eq!(later.days_since(base), 3);
        assert_eq!(base.days_since(later), 0);
    }

    #[test]
    fn millis_since_clamps_to_zero() {
        let early = Timestamp::from_millis(10);
        let late = Timestamp::from_millis(50);
        assert_eq!(late.millis_since(early), 40);
        assert_eq!(early.millis_since(late), 0);
    }

    #[test]
    fn ordering_matches_millis() {
        assert!(Timestamp::from_millis(1).is_before(Timestamp::from_millis(2)));
        assert!(!Timestamp::from_millis(2).is_before(Timestamp::from_millis(2)));
    }
}
