// crates/expunge-connectors/src/legal.rs
// ============================================================================
// Module: Legal Letter Rendering
// Description: CCPA deletion and GDPR erasure request letters.
// Purpose: Back legal.generate_request with template rendering from a profile.
// Dependencies: crate::dates, expunge-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Two letter templates are supported: `ccpa_deletion` (Cal. Civ. Code
//! § 1798.100 et seq.) and `gdpr_erasure` (GDPR Article 17). Identity fields
//! are injected from the decrypted profile at render time; optional sections
//! (aliases, date of birth, phones, address history) are dropped when the
//! profile does not carry them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

use expunge_core::TaskError;
use expunge_core::Timestamp;

use crate::dates::iso_date;

// ============================================================================
// SECTION: Templates
// ============================================================================

/// CCPA deletion request template.
const CCPA_DELETION_TEMPLATE: &str = "\
$full_name
$address_line
$city_state_zip

$date

$broker_name
$broker_address

Re: Request to Delete Personal Information Under the California Consumer \
Privacy Act (CCPA)

Dear $broker_name Privacy Team,

I am writing to exercise my rights under the California Consumer Privacy Act \
(Cal. Civ. Code \u{a7} 1798.100 et seq.) to request the deletion of any and all \
personal information your organization has collected, stored, or sold about me.

My identifying information:
- Full Name: $full_name
$aliases_line$dob_line- Email: $email
$phone_line$address_block
I request that you:
1. Delete all personal information you have collected about me.
2. Direct any service providers with whom you have shared my personal \
information to delete my data as well.
3. Confirm the completion of this deletion within 45 days, as required by the \
CCPA.

If you are unable to verify my identity, please contact me at the email \
address provided above, and I will provide additional verification as needed.

Please note that under the CCPA, you may not discriminate against me for \
exercising my privacy rights.

Sincerely,

$full_name
$email
";

/// GDPR Article 17 erasure request template.
const GDPR_ERASURE_TEMPLATE: &str = "\
$full_name
$address_line
$city_state_zip

$date

$broker_name
$broker_address

Re: Request for Erasure of Personal Data Under Article 17 of the General Data \
Protection Regulation (GDPR)

Dear Data Protection Officer,

I am writing to request the erasure of my personal data that your organisation \
holds, pursuant to Article 17 of the General Data Protection Regulation (EU) \
2016/679.

My identifying information:
- Full Name: $full_name
$aliases_line$dob_line- Email: $email
$phone_line$address_block
I request that you erase all personal data relating to me without undue delay. \
Under Article 17(1), you are required to do so where one of the following \
grounds applies:

(a) the personal data are no longer necessary in relation to the purposes for \
which they were collected or otherwise processed;
(b) I withdraw my consent on which the processing is based;
(d) the personal data have been unlawfully processed;
(f) the personal data have to be erased for compliance with a legal obligation.

If you have made my personal data public, I also request that you take \
reasonable steps, including technical measures, to inform other controllers \
processing the data that I have requested the erasure of any links to, or \
copies or replications of, that data (Article 17(2)).

Please respond to this request within one month, as required by Article 12(3). \
If you do not comply, I reserve the right to lodge a complaint with the \
relevant supervisory authority.

Yours faithfully,

$full_name
$email
";

/// Template ids accepted by the handler.
const TEMPLATE_IDS: [&str; 2] = ["ccpa_deletion", "gdpr_erasure"];

// ============================================================================
// SECTION: Rendered Letter
// ============================================================================

/// Rendered legal letter ready for dispatch.
///
/// # Invariants
/// - `body` contains no remaining `$placeholder` markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedLetter {
    /// Template identifier used.
    pub template_id: String,
    /// Suggested subject line.
    pub subject: String,
    /// Letter body.
    pub body: String,
    /// Recipient display name.
    pub recipient_name: String,
    /// Recipient mailing address.
    pub recipient_address: String,
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders a legal letter template against a decrypted profile.
///
/// # Errors
///
/// Returns a terminal [`TaskError`] for unknown template ids.
pub fn render_letter(
    template_id: &str,
    profile: &Value,
    broker_name: &str,
    broker_address: &str,
    at: Timestamp,
) -> Result<RenderedLetter, TaskError> {
    let template = match template_id {
        "ccpa_deletion" => CCPA_DELETION_TEMPLATE,
        "gdpr_erasure" => GDPR_ERASURE_TEMPLATE,
        other => {
            return Err(TaskError::permanent(format!(
                "unknown template '{other}'; available: {}",
                TEMPLATE_IDS.join(", ")
            )));
        }
    };

    let full_name = profile.get("full_name").and_then(Value::as_str).unwrap_or("");
    let addresses = profile.get("addresses").and_then(Value::as_array);
    let primary = addresses.and_then(|list| {
        list.iter()
            .find(|address| address.get("current").and_then(Value::as_bool).unwrap_or(false))
            .or_else(|| list.first())
    });
    let address_line =
        primary.and_then(|address| address.get("street")).and_then(Value::as_str).unwrap_or("");
    let city_state_zip = primary.map_or(String::new(), format_city_state_zip);

    let aliases: Vec<&str> = profile
        .get("aliases")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let aliases_line = if aliases.is_empty() {
        String::new()
    } else {
        format!("- Also known as: {}\n", aliases.join(", "))
    };

    let dob_line = profile
        .get("date_of_birth")
        .and_then(Value::as_str)
        .map_or(String::new(), |dob| format!("- Date of Birth: {dob}\n"));

    let email = profile
        .get("email_addresses")
        .and_then(Value::as_array)
        .and_then(|list| list.first())
        .and_then(Value::as_str)
        .unwrap_or("");

    let phones: Vec<String> = profile
        .get("phone_numbers")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|phone| {
                    phone
                        .get("number")
                        .and_then(Value::as_str)
                        .or_else(|| phone.as_str())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();
    let phone_line = if phones.is_empty() {
        String::new()
    } else {
        format!("- Phone: {}\n", phones.join(", "))
    };

    let address_block = addresses.map_or(String::new(), |a| format_address_block(a));

    let recipient_address =
        if broker_address.is_empty() { "[Address Not Available]" } else { broker_address };

    let body = fill_template(template, &[
        ("$full_name", full_name),
        ("$address_line", address_line),
        ("$city_state_zip", &city_state_zip),
        ("$date", &iso_date(at)),
        ("$broker_name", broker_name),
        ("$broker_address", recipient_address),
        ("$aliases_line", &aliases_line),
        ("$dob_line", &dob_line),
        ("$email", email),
        ("$phone_line", &phone_line),
        ("$address_block", &address_block),
    ]);

    let subject = match template_id {
        "ccpa_deletion" => format!("CCPA Deletion Request \u{2014} {full_name}"),
        _ => format!("GDPR Erasure Request \u{2014} {full_name}"),
    };

    Ok(RenderedLetter {
        template_id: template_id.to_string(),
        subject,
        body,
        recipient_name: broker_name.to_string(),
        recipient_address: recipient_address.to_string(),
    })
}

/// Substitutes `$placeholder` pairs, longest names first.
fn fill_template(template: &str, pairs: &[(&str, &str)]) -> String {
    let mut ordered: Vec<&(&str, &str)> = pairs.iter().collect();
    ordered.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
    let mut output = template.to_string();
    for (name, value) in ordered {
        output = output.replace(name, value);
    }
    output
}

/// Formats the `City, ST ZIP` line for a primary address.
fn format_city_state_zip(address: &Value) -> String {
    let mut parts = Vec::new();
    if let Some(city) = address.get("city").and_then(Value::as_str) {
        parts.push(city.to_string());
    }
    if let Some(state) = address.get("state").and_then(Value::as_str) {
        parts.push(state.to_string());
    }
    let city_state = parts.join(", ");
    if city_state.is_empty() {
        return String::new();
    }
    match address.get("zip").and_then(Value::as_str) {
        Some(zip) => format!("{city_state} {zip}"),
        None => city_state,
    }
}

/// Builds the multi-line address-history block.
fn format_address_block(addresses: &[Value]) -> String {
    let mut lines = Vec::new();
    for address in addresses {
        let mut parts = Vec::new();
        if let Some(street) = address.get("street").and_then(Value::as_str) {
            parts.push(street.to_string());
        }
        let city_state_zip = format_city_state_zip(address);
        if !city_state_zip.is_empty() {
            parts.push(city_state_zip);
        }
        if !parts.is_empty() {
            lines.push(parts.join("; "));
        }
    }
    if lines.is_empty() {
        return String::new();
    }
    let mut block = String::from("- Address(es):\n");
    for line in lines {
        block.push_str("  - ");
        block.push_str(&line);
        block.push('\n');
    }
    block
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

    use serde_json::json;

    use expunge_core::Timestamp;

    use super::render_letter;

    /// Profile fixture with full identity fields.
    fn profile() -> serde_json::Value {
        json!({
            "full_name": "Jane Ann Doe",
            "aliases": ["Janie Doe"],
            "addresses": [
                {"street": "12 Oak St", "city": "Chicago", "state": "IL", "zip": "60601",
                 "current": true},
                {"street": "9 Elm Ave", "city": "Austin", "state": "TX"},
            ],
            "date_of_birth": "1985-03-10",
            "email_addresses": ["jane@example.net"],
            "phone_numbers": [{"number": "312-555-0134"}],
        })
    }

    /// Fixed render instant: 2025-01-01 UTC.
    fn at() -> Timestamp {
        Timestamp::from_millis(1_735_689_600_000)
    }

    #[test]
    fn ccpa_letter_carries_identity_and_dateline() {
        let letter =
            render_letter("ccpa_deletion", &profile(), "PeopleLens", "1 Broker Way", at()).unwrap();
        assert!(letter.subject.starts_with("CCPA Deletion Request"));
        assert!(letter.body.contains("Jane Ann Doe"));
        assert!(letter.body.contains("2025-01-01"));
        assert!(letter.body.contains("- Also known as: Janie Doe"));
        assert!(letter.body.contains("- Date of Birth: 1985-03-10"));
        assert!(letter.body.contains("12 Oak St"));
        assert!(letter.body.contains("9 Elm Ave"));
        assert!(!letter.body.contains('$'), "unfilled placeholder in body");
        assert_eq!(letter.recipient_address, "1 Broker Way");
    }

    #[test]
    fn gdpr_letter_uses_article_17_language() {
        let letter = render_letter("gdpr_erasure", &profile(), "ShadowTrace", "", at()).unwrap();
        assert!(letter.body.contains("Article 17"));
        assert_eq!(letter.recipient_address, "[Address Not Available]");
    }

    #[test]
    fn sparse_profile_drops_optional_sections() {
        let letter = render_letter(
            "ccpa_deletion",
            &json!({"full_name": "Jane Doe", "email_addresses": ["j@example.net"]}),
            "PeopleLens",
            "",
            at(),
        )
        .unwrap();
        assert!(!letter.body.contains("Also known as"));
        assert!(!letter.body.contains("Date of Birth"));
        assert!(!letter.body.contains("Address(es)"));
    }

    #[test]
    fn unknown_template_is_terminal() {
        let error = render_letter("sue_everyone", &profile(), "X", "", at()).unwrap_err();
        assert!(!error.is_transient());
    }
}
