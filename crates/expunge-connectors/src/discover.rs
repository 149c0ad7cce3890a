// crates/expunge-connectors/src/discover.rs
// ============================================================================
// Module: Search-Engine Discovery
// Description: SERP query building, result parsing, and broker classification.
// Purpose: Back discover.search_engine with known-domain and keyword signals.
// Dependencies: crate::scrape, serde, serde_json, url
// ============================================================================

//! ## Overview
//! Discovery builds a small query set from a person's name and location,
//! fetches search-engine result pages, extracts candidate links, and
//! classifies each by three signals: a known data-broker domain (strongest),
//! people-search URL shapes, and people-search phrases in the visible text.
//! Classification is pure; fetching belongs to the dispatcher so its HTTP
//! transience policy applies.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;
use url::Url;
use url::form_urlencoded;

use crate::scrape;

// ============================================================================
// SECTION: Signals
// ============================================================================

/// Known data-broker domains (strongest classification signal).
const KNOWN_BROKER_DOMAINS: [&str; 30] = [
    "spokeo.com",
    "beenverified.com",
    "intelius.com",
    "whitepages.com",
    "truepeoplesearch.com",
    "fastpeoplesearch.com",
    "peoplefinder.com",
    "familytreenow.com",
    "radaris.com",
    "acxiom.com",
    "mylife.com",
    "peekyou.com",
    "zabasearch.com",
    "pipl.com",
    "thatsthem.com",
    "ussearch.com",
    "instantcheckmate.com",
    "truthfinder.com",
    "clustrmaps.com",
    "nuwber.com",
    "publicrecordsnow.com",
    "cyberbackgroundchecks.com",
    "neighborwho.com",
    "addresses.com",
    "advancedbackgroundchecks.com",
    "anywho.com",
    "checkpeople.com",
    "publicdatacheck.com",
    "usphonebook.com",
    "voterrecords.com",
];

/// URL path fragments that indicate a people-search profile page.
const PROFILE_PATH_MARKERS: [&str; 4] = ["/people/", "/name/", "/person/", "/profile/"];

/// Search-engine domains skipped during result extraction.
const ENGINE_DOMAINS: [&str; 4] =
    ["google.com", "bing.com", "google.co.uk", "webcache.googleusercontent.com"];

/// People-search phrases looked for in titles and snippets.
const TEXT_SIGNALS: [&str; 10] = [
    "phone number",
    "address history",
    "background check",
    "public record",
    "people search",
    "find people",
    "find anyone",
    "relatives",
    "associates",
    "opt out",
];

// ============================================================================
// SECTION: Types
// ============================================================================

/// One raw search-engine result.
///
/// # Invariants
/// - `position` is 1-based in extraction order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    /// Result URL.
    pub url: String,
    /// Result title text.
    pub title: String,
    /// Result snippet text (best effort).
    pub snippet: String,
    /// 1-based result position.
    pub position: u32,
}

/// A search result with its broker classification.
///
/// # Invariants
/// - `confidence` is in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedHit {
    /// Result URL.
    pub url: String,
    /// Result title text.
    pub title: String,
    /// Result snippet text.
    pub snippet: String,
    /// 1-based result position.
    pub position: u32,
    /// Registrable domain of the URL.
    pub domain: String,
    /// Whether the domain is a catalogued broker domain.
    pub is_known_broker: bool,
    /// Whether the combined signals clear the likely-broker bar.
    pub is_likely_broker: bool,
    /// Combined signal confidence.
    pub confidence: f64,
    /// Signal labels that fired.
    pub signals: Vec<String>,
}

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Builds the discovery query set for a person.
#[must_use]
pub fn build_search_queries(full_name: &str, city: &str, state: &str) -> Vec<String> {
    let name = full_name.trim();
    if name.is_empty() {
        return Vec::new();
    }
    let mut queries = vec![format!("\"{name}\"")];
    let location = [city.trim(), state.trim()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if !location.is_empty() {
        queries.push(format!("\"{name}\" {location}"));
    }
    queries.push(format!("\"{name}\" public records"));
    queries.push(format!("\"{name}\" people search"));
    if !location.is_empty() {
        queries.push(format!("\"{name}\" {location} address phone"));
    }
    queries
}

/// Builds a search-engine URL for a query.
#[must_use]
pub fn build_search_url(query: &str, engine: &str, start: u32) -> String {
    let encoded: String = form_urlencoded::byte_serialize(query.as_bytes()).collect();
    if engine == "bing" {
        let mut url = format!("https://www.bing.com/search?q={encoded}");
        if start > 0 {
            url.push_str(&format!("&first={}", start + 1));
        }
        return url;
    }
    let mut url = format!("https://www.google.com/search?q={encoded}&num=20");
    if start > 0 {
        url.push_str(&format!("&start={start}"));
    }
    url
}

/// Extracts the registrable domain (minus `www.`) from a URL.
#[must_use]
pub fn extract_domain(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        .map(|host| host.strip_prefix("www.").map_or_else(|| host.clone(), str::to_string))
        .unwrap_or_default()
}

// ============================================================================
// SECTION: Result Extraction
// ============================================================================

/// Extracts candidate result links from a SERP document.
///
/// Engine-internal links and duplicates are skipped; position reflects
/// extraction order.
#[must_use]
pub fn parse_search_hits(html: &str) -> Vec<SearchHit> {
    let page = scrape::parse_page(html);
    let mut hits = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    let Some(links) = page.get("links").and_then(Value::as_array) else {
        return hits;
    };
    let mut position = 0u32;
    for link in links {
        let href = link.get("href").and_then(Value::as_str).unwrap_or("");
        let text = link.get("text").and_then(Value::as_str).unwrap_or("");
        if !href.starts_with("http") {
            continue;
        }
        let domain = extract_domain(href);
        if domain.is_empty() || ENGINE_DOMAINS.contains(&domain.as_str()) {
            continue;
        }
        if href.contains("/search?") || href.contains("/images/") || href.contains("/maps/") {
            continue;
        }
        if seen.iter().any(|existing| existing == href) {
            continue;
        }
        seen.push(href.to_string());
        position += 1;
        let mut title = text.to_string();
        title.truncate(title.char_indices().nth(200).map_or(title.len(), |(at, _)| at));
        hits.push(SearchHit {
            url: href.to_string(),
            title,
            snippet: String::new(),
            position,
        });
    }
    hits
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Returns `true` when a URL path looks like a people-search profile page.
fn has_profile_path(url: &str) -> bool {
    let lower = url.to_lowercase();
    if PROFILE_PATH_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return true;
    }
    if lower.contains("/search?") && lower.contains("name=") {
        return true;
    }
    // FirstName-LastName path segments: two capitalized words joined by '-'.
    Url::parse(url).is_ok_and(|parsed| {
        parsed.path_segments().is_some_and(|segments| {
            segments.filter(|segment| !segment.is_empty()).any(|segment| {
                let words: Vec<&str> = segment.split('-').collect();
                words.len() == 2
                    && words.iter().all(|word| {
                        word.chars().next().is_some_and(char::is_uppercase)
                            && word.chars().skip(1).all(char::is_lowercase)
                            && word.len() > 1
                    })
            })
        })
    })
}

/// Classifies one search hit by domain, URL shape, and text signals.
#[must_use]
pub fn classify_hit(hit: &SearchHit) -> ClassifiedHit {
    let domain = extract_domain(&hit.url);
    let mut signals = Vec::new();
    let mut score = 0.0;

    let is_known = KNOWN_BROKER_DOMAINS.contains(&domain.as_str());
    if is_known {
        signals.push(format!("known_broker_domain:{domain}"));
        score += 0.7;
    }

    if has_profile_path(&hit.url) {
        signals.push("profile_url_pattern".to_string());
        score += 0.15;
    }

    let text = format!("{} {}", hit.title, hit.snippet).to_lowercase();
    let mut text_hits = 0;
    for signal in TEXT_SIGNALS {
        if text.contains(signal) {
            signals.push(format!("text_signal:{signal}"));
            text_hits += 1;
            if text_hits >= 3 {
                break;
            }
        }
    }
    score += f64::from(text_hits) * 0.1;

    let confidence = score.min(1.0_f64);
    ClassifiedHit {
        url: hit.url.clone(),
        title: hit.title.clone(),
        snippet: hit.snippet.clone(),
        position: hit.position,
        domain,
        is_known_broker: is_known,
        is_likely_broker: confidence >= 0.3,
        confidence,
        signals,
    }
}

/// Classifies hits and returns the likely brokers, best first.
#[must_use]
pub fn discover_brokers(hits: &[SearchHit]) -> Vec<ClassifiedHit> {
    let mut likely: Vec<ClassifiedHit> =
        hits.iter().map(classify_hit).filter(|hit| hit.is_likely_broker).collect();
    likely.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.position.cmp(&b.position))
    });
    likely
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

    use super::SearchHit;
    use super::build_search_queries;
    use super::build_search_url;
    use super::classify_hit;
    use super::discover_brokers;
    use super::extract_domain;
    use super::parse_search_hits;

    #[test]
    fn query_set_covers_name_location_and_targeted_forms() {
        let queries = build_search_queries("Jane Doe", "Chicago", "IL");
        assert_eq!(queries.len(), 5);
        assert_eq!(queries[0], "\"Jane Doe\"");
        assert_eq!(queries[1], "\"Jane Doe\" Chicago, IL");
        assert!(queries[2].contains("public records"));
        assert!(build_search_queries("  ", "Chicago", "IL").is_empty());
    }

    #[test]
    fn search_urls_encode_and_paginate() {
        let url = build_search_url("\"Jane Doe\" Chicago", "google", 20);
        assert!(url.starts_with("https://www.google.com/search?q=%22Jane+Doe%22+Chicago"));
        assert!(url.ends_with("&start=20"));
        let bing = build_search_url("x", "bing", 10);
        assert!(bing.contains("bing.com/search"));
        assert!(bing.ends_with("&first=11"));
    }

    #[test]
    fn domains_strip_www() {
        assert_eq!(extract_domain("https://www.spokeo.com/Jane-Doe"), "spokeo.com");
        assert_eq!(extract_domain("not a url"), "");
    }

    #[test]
    fn serp_extraction_skips_engine_links_and_dupes() {
        let html = r#"<html><body>
<a href="https://www.google.com/search?q=next">next</a>
<a href="https://www.spokeo.com/Jane-Doe">Jane Doe - People Search</a>
<a href="https://www.spokeo.com/Jane-Doe">duplicate</a>
<a href="/relative">rel</a>
<a href="https://blog.example/post">post</a>
</body></html>"#;
        let hits = parse_search_hits(html);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://www.spokeo.com/Jane-Doe");
        assert_eq!(hits[0].position, 1);
    }

    #[test]
    fn known_domain_plus_patterns_scores_high() {
        let hit = SearchHit {
            url: "https://www.spokeo.com/Jane-Doe".to_string(),
            title: "Jane Doe - phone number, address history, relatives".to_string(),
            snippet: String::new(),
            position: 1,
        };
        let classified = classify_hit(&hit);
        assert!(classified.is_known_broker);
        assert!(classified.is_likely_broker);
        assert!(classified.confidence >= 0.9, "confidence {}", classified.confidence);
    }

    #[test]
    fn unrelated_site_is_not_likely() {
        let hit = SearchHit {
            url: "https://recipes.example/cake".to_string(),
            title: "Chocolate cake recipe".to_string(),
            snippet: String::new(),
            position: 3,
        };
        let classified = classify_hit(&hit);
        assert!(!classified.is_likely_broker);
        assert!(classified.confidence < 0.3);
    }

    #[test]
    fn discovery_sorts_by_confidence_then_position() {
        let hits = vec![
            SearchHit {
                url: "https://whitepages.com/name/Jane-Doe".to_string(),
                title: "Jane Doe public record".to_string(),
                snippet: String::new(),
                position: 2,
            },
            SearchHit {
                url: "https://recipes.example/cake".to_string(),
                title: "cake".to_string(),
                snippet: String::new(),
                position: 1,
            },
            SearchHit {
                url: "https://unknown-people.example/people/jane".to_string(),
                title: "people search".to_string(),
                snippet: String::new(),
                position: 3,
            },
        ];
        let likely = discover_brokers(&hits);
        assert_eq!(likely.len(), 2);
        assert_eq!(likely[0].domain, "whitepages.com");
    }
}
