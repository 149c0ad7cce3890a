// crates/expunge-connectors/src/identity.rs
// ============================================================================
// Module: Identity Matcher
// Description: Heuristic scoring of broker listings against a PII profile.
// Purpose: Back match.identity with weighted field comparison.
// Dependencies: crate::dates, expunge-core, serde, serde_json, strsim
// ============================================================================

//! ## Overview
//! A listing is scored against a decrypted profile with weighted field
//! comparisons: normalized names (suffixes stripped, token order ignored),
//! city/state locations, age from date of birth with tolerance, phone digits
//! with a seven-digit suffix fallback, and relative-name overlap. Only the
//! fields present on both sides contribute weight, so a sparse listing is
//! judged on what it actually shows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use strsim::normalized_levenshtein;

use expunge_core::Timestamp;

use crate::dates::age_in_years;

// ============================================================================
// SECTION: Weights
// ============================================================================

/// Field weight for name comparison.
const WEIGHT_NAME: f64 = 0.35;
/// Field weight for location comparison.
const WEIGHT_LOCATION: f64 = 0.25;
/// Field weight for age comparison.
const WEIGHT_AGE: f64 = 0.15;
/// Field weight for phone comparison.
const WEIGHT_PHONE: f64 = 0.10;
/// Field weight for relatives comparison.
const WEIGHT_RELATIVES: f64 = 0.15;

/// Age tolerance in years before the score decays.
const AGE_TOLERANCE: i64 = 2;

// ============================================================================
// SECTION: Name Matching
// ============================================================================

/// Name suffixes stripped during normalization.
const NAME_SUFFIXES: [&str; 11] =
    ["jr", "sr", "ii", "iii", "iv", "v", "esq", "phd", "md", "dds", "dvm"];

/// Lowercases, strips suffixes, and collapses whitespace in a name.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .replace([',', '.'], " ")
        .split_whitespace()
        .filter(|part| !NAME_SUFFIXES.contains(part))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity of two strings in `[0, 1]`.
fn ratio(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b)
}

/// Similarity after sorting tokens, so reordered names still match.
fn token_sort_ratio(a: &str, b: &str) -> f64 {
    let mut tokens_a: Vec<&str> = a.split_whitespace().collect();
    let mut tokens_b: Vec<&str> = b.split_whitespace().collect();
    tokens_a.sort_unstable();
    tokens_b.sort_unstable();
    ratio(&tokens_a.join(" "), &tokens_b.join(" "))
}

/// Compares two names, returning a confidence score in `[0, 1]`.
///
/// 1.0 is an exact normalized match, 0.92+ token-sorted similarity passes
/// through, first+last agreement with a differing middle scores 0.75, and an
/// initial matching a full first name scores 0.65.
#[must_use]
pub fn name_score(a: &str, b: &str) -> f64 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    let token_score = token_sort_ratio(&na, &nb);
    if token_score >= 0.92 {
        return token_score;
    }
    let parts_a: Vec<&str> = na.split_whitespace().collect();
    let parts_b: Vec<&str> = nb.split_whitespace().collect();
    if parts_a.len() >= 2 && parts_b.len() >= 2 {
        let first_match = ratio(parts_a[0], parts_b[0]) >= 0.85;
        let last_match = ratio(parts_a[parts_a.len() - 1], parts_b[parts_b.len() - 1]) >= 0.85;
        if first_match && last_match {
            return 0.75;
        }
        let initial_match = (parts_a[0].len() == 1 && parts_b[0].starts_with(parts_a[0]))
            || (parts_b[0].len() == 1 && parts_a[0].starts_with(parts_b[0]));
        if initial_match && ratio(parts_a[parts_a.len() - 1], parts_b[parts_b.len() - 1]) >= 0.85 {
            return 0.65;
        }
    }
    if token_score >= 0.70 {
        return token_score * 0.8;
    }
    token_score.min(0.5)
}

// ============================================================================
// SECTION: Location Matching
// ============================================================================

/// Full state names mapped to their postal abbreviations.
const STATE_ABBREVIATIONS: [(&str, &str); 51] = [
    ("ALABAMA", "AL"),
    ("ALASKA", "AK"),
    ("ARIZONA", "AZ"),
    ("ARKANSAS", "AR"),
    ("CALIFORNIA", "CA"),
    ("COLORADO", "CO"),
    ("CONNECTICUT", "CT"),
    ("DELAWARE", "DE"),
    ("FLORIDA", "FL"),
    ("GEORGIA", "GA"),
    ("HAWAII", "HI"),
    ("IDAHO", "ID"),
    ("ILLINOIS", "IL"),
    ("INDIANA", "IN"),
    ("IOWA", "IA"),
    ("KANSAS", "KS"),
    ("KENTUCKY", "KY"),
    ("LOUISIANA", "LA"),
    ("MAINE", "ME"),
    ("MARYLAND", "MD"),
    ("MASSACHUSETTS", "MA"),
    ("MICHIGAN", "MI"),
    ("MINNESOTA", "MN"),
    ("MISSISSIPPI", "MS"),
    ("MISSOURI", "MO"),
    ("MONTANA", "MT"),
    ("NEBRASKA", "NE"),
    ("NEVADA", "NV"),
    ("NEW HAMPSHIRE", "NH"),
    ("NEW JERSEY", "NJ"),
    ("NEW MEXICO", "NM"),
    ("NEW YORK", "NY"),
    ("NORTH CAROLINA", "NC"),
    ("NORTH DAKOTA", "ND"),
    ("OHIO", "OH"),
    ("OKLAHOMA", "OK"),
    ("OREGON", "OR"),
    ("PENNSYLVANIA", "PA"),
    ("RHODE ISLAND", "RI"),
    ("SOUTH CAROLINA", "SC"),
    ("SOUTH DAKOTA", "SD"),
    ("TENNESSEE", "TN"),
    ("TEXAS", "TX"),
    ("UTAH", "UT"),
    ("VERMONT", "VT"),
    ("VIRGINIA", "VA"),
    ("WASHINGTON", "WA"),
    ("WEST VIRGINIA", "WV"),
    ("WISCONSIN", "WI"),
    ("WYOMING", "WY"),
    ("DISTRICT OF COLUMBIA", "DC"),
];

/// Normalizes a state to its uppercase postal abbreviation.
fn normalize_state(state: &str) -> String {
    let upper = state.trim().to_uppercase();
    STATE_ABBREVIATIONS
        .iter()
        .find(|(full, _)| *full == upper)
        .map_or(upper, |(_, abbrev)| (*abbrev).to_string())
}

/// Scores a `"City, ST"` listing location against profile addresses.
fn location_score(listing_location: &str, addresses: &[&Value]) -> f64 {
    if listing_location.trim().is_empty() || addresses.is_empty() {
        return 0.0;
    }
    let mut parts = listing_location.splitn(2, ',');
    let listing_city = parts.next().unwrap_or("").trim().to_lowercase();
    let listing_state = parts.next().map(normalize_state).unwrap_or_default();

    let mut best: f64 = 0.0;
    for address in addresses {
        let city = address.get("city").and_then(Value::as_str).unwrap_or("").to_lowercase();
        if city.is_empty() {
            continue;
        }
        let state =
            normalize_state(address.get("state").and_then(Value::as_str).unwrap_or_default());
        let city_score = ratio(&listing_city, &city);
        let state_match =
            listing_state.is_empty() || state.is_empty() || listing_state == state;
        if city_score >= 0.90 && state_match {
            let current = address.get("current").and_then(Value::as_bool).unwrap_or(false);
            best = best.max(if current { 1.0 } else { 0.85 });
        } else if city_score >= 0.90 {
            best = best.max(0.3);
        } else if !listing_state.is_empty() && listing_state == state {
            best = best.max(0.15);
        }
    }
    best
}

// ============================================================================
// SECTION: Age and Phone Matching
// ============================================================================

/// Scores a listing age against the profile date of birth.
fn age_score(listing_age: i64, date_of_birth: &str, at: Timestamp) -> f64 {
    let Some(actual) = age_in_years(date_of_birth, at) else {
        return 0.0;
    };
    let diff = (actual - listing_age).abs();
    if diff == 0 {
        1.0
    } else if diff <= AGE_TOLERANCE {
        let decay = 0.1 * diff as f64;
        1.0 - decay
    } else {
        (1.0 - 0.15 * diff as f64).max(0.0)
    }
}

/// Reduces a phone number to its digits, stripping a leading country 1.
fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

/// Scores a listing phone against profile phone numbers.
fn phone_score(listing_phone: &str, phones: &[&Value]) -> f64 {
    let normalized = normalize_phone(listing_phone);
    if normalized.len() < 7 {
        return 0.0;
    }
    let mut best: f64 = 0.0;
    for phone in phones {
        let number = phone
            .get("number")
            .and_then(Value::as_str)
            .map_or_else(|| phone.as_str().unwrap_or("").to_string(), str::to_string);
        let candidate = normalize_phone(&number);
        if candidate == normalized {
            return 1.0;
        }
        if candidate.len() >= 7 && candidate[candidate.len() - 7..] == normalized[normalized.len() - 7..] {
            best = best.max(0.7);
        }
    }
    best
}

/// Scores relative-name overlap as a fraction of profile relatives found.
fn relatives_score(listing_relatives: &[&str], profile_relatives: &[&str]) -> f64 {
    if listing_relatives.is_empty() || profile_relatives.is_empty() {
        return 0.0;
    }
    let mut matches = 0usize;
    for listing_relative in listing_relatives {
        if profile_relatives
            .iter()
            .any(|profile_relative| name_score(listing_relative, profile_relative) >= 0.7)
        {
            matches += 1;
        }
    }
    if matches == 0 {
        return 0.0;
    }
    (matches as f64 / profile_relatives.len().max(1) as f64).min(1.0)
}

// ============================================================================
// SECTION: Heuristic Match
// ============================================================================

/// Result of matching one listing against a profile.
///
/// # Invariants
/// - `confidence` is in `[0, 1]` and rounded to four decimals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    /// Blended confidence score.
    pub confidence: f64,
    /// Per-field scores for the fields that contributed.
    pub matched_fields: BTreeMap<String, f64>,
}

/// Collects string entries from a JSON array field.
fn string_items(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Scores a listing against a profile using weighted field comparison.
///
/// `listing` carries `name`, `location`, `age`, `phone`, and `relatives`
/// (all optional); `profile` carries `full_name`, `aliases`, `addresses`,
/// `date_of_birth`, `phone_numbers`, and `relatives`.
#[must_use]
pub fn heuristic_match(listing: &Value, profile: &Value, at: Timestamp) -> MatchOutcome {
    let mut matched_fields = BTreeMap::new();
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    if let Some(listing_name) = listing.get("name").and_then(Value::as_str)
        && !listing_name.is_empty()
    {
        let mut best: f64 = 0.0;
        if let Some(full_name) = profile.get("full_name").and_then(Value::as_str) {
            best = best.max(name_score(listing_name, full_name));
        }
        for alias in string_items(profile.get("aliases")) {
            best = best.max(name_score(listing_name, alias));
        }
        matched_fields.insert("name".to_string(), best);
        weighted_sum += best * WEIGHT_NAME;
        total_weight += WEIGHT_NAME;
    }

    if let Some(listing_location) = listing.get("location").and_then(Value::as_str)
        && !listing_location.is_empty()
        && let Some(addresses) = profile.get("addresses").and_then(Value::as_array)
        && !addresses.is_empty()
    {
        let address_refs: Vec<&Value> =
            addresses.iter().filter(|address| address.is_object()).collect();
        let score = location_score(listing_location, &address_refs);
        matched_fields.insert("location".to_string(), score);
        weighted_sum += score * WEIGHT_LOCATION;
        total_weight += WEIGHT_LOCATION;
    }

    let listing_age = listing.get("age").and_then(|age| {
        age.as_i64().or_else(|| age.as_str().and_then(|text| text.trim().parse().ok()))
    });
    if let Some(listing_age) = listing_age
        && let Some(date_of_birth) = profile.get("date_of_birth").and_then(Value::as_str)
    {
        let score = age_score(listing_age, date_of_birth, at);
        matched_fields.insert("age".to_string(), score);
        weighted_sum += score * WEIGHT_AGE;
        total_weight += WEIGHT_AGE;
    }

    if let Some(listing_phone) = listing.get("phone").and_then(Value::as_str)
        && !listing_phone.is_empty()
        && let Some(phones) = profile.get("phone_numbers").and_then(Value::as_array)
        && !phones.is_empty()
    {
        let phone_refs: Vec<&Value> = phones.iter().collect();
        let score = phone_score(listing_phone, &phone_refs);
        matched_fields.insert("phone".to_string(), score);
        weighted_sum += score * WEIGHT_PHONE;
        total_weight += WEIGHT_PHONE;
    }

    let listing_relatives = string_items(listing.get("relatives"));
    let profile_relatives = string_items(profile.get("relatives"));
    if !listing_relatives.is_empty() && !profile_relatives.is_empty() {
        let score = relatives_score(&listing_relatives, &profile_relatives);
        matched_fields.insert("relatives".to_string(), score);
        weighted_sum += score * WEIGHT_RELATIVES;
        total_weight += WEIGHT_RELATIVES;
    }

    let confidence = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.0 };
    MatchOutcome {
        confidence: (confidence * 10_000.0).round() / 10_000.0,
        matched_fields,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
