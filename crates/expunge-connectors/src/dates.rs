// crates/expunge-connectors/src/dates.rs
// ============================================================================
// Module: Civil Date Helpers
// Description: Epoch-day conversions for ages and letter datelines.
// Purpose: Avoid a calendar dependency for the two date needs connectors have.
// Dependencies: expunge-core
// ============================================================================

//! ## Overview
//! Identity matching needs "age in years from a `YYYY-MM-DD` date of birth"
//! and legal letters need an ISO dateline. Both reduce to the standard
//! days-from-civil / civil-from-days conversions over the proleptic Gregorian
//! calendar.

// ============================================================================
// SECTION: Imports
// ============================================================================

use expunge_core::Timestamp;

// ============================================================================
// SECTION: Conversions
// ============================================================================

/// Days from civil date to the unix epoch (proleptic Gregorian).
#[must_use]
pub fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let year_of_era = year - era * 400;
    let month = i64::from(month);
    let day_of_year = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5
        + i64::from(day)
        - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

/// Civil date `(year, month, day)` from days since the unix epoch.
#[must_use]
pub fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let days = days + 719_468;
    let era = if days >= 0 { days } else { days - 146_096 } / 146_097;
    let day_of_era = days - era * 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1_460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let year = year_of_era + era * 400;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_index = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * month_index + 2) / 5 + 1;
    let month = if month_index < 10 { month_index + 3 } else { month_index - 9 };
    let year = if month <= 2 { year + 1 } else { year };
    (year, u32::try_from(month).unwrap_or(1), u32::try_from(day).unwrap_or(1))
}

/// Parses a `YYYY-MM-DD` date into `(year, month, day)`.
#[must_use]
pub fn parse_iso_date(text: &str) -> Option<(i64, u32, u32)> {
    let mut parts = text.trim().splitn(3, '-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let day: u32 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some((year, month, day))
}

/// Formats a timestamp's UTC calendar day as `YYYY-MM-DD`.
#[must_use]
pub fn iso_date(timestamp: Timestamp) -> String {
    let days = timestamp.as_millis().div_euclid(86_400_000);
    let (year, month, day) = civil_from_days(days);
    format!("{year:04}-{month:02}-{day:02}")
}

/// Whole years between a date of birth and a timestamp's calendar day.
#[must_use]
pub fn age_in_years(date_of_birth: &str, at: Timestamp) -> Option<i64> {
    let (birth_year, birth_month, birth_day) = parse_iso_date(date_of_birth)?;
    let today_days = at.as_millis().div_euclid(86_400_000);
    let (year, month, day) = civil_from_days(today_days);
    let mut age = year - birth_year;
    if (month, day) < (birth_month, birth_day) {
        age -= 1;
    }
    Some(age)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
