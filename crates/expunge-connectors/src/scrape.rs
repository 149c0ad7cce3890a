// crates/expunge-connectors/src/scrape.rs
// ============================================================================
// Module: Static Scrape Connector
// Description: CSS-selector extraction and structural parsing of HTML blobs.
// Purpose: Back scrape.static and post-render extraction.
// Dependencies: expunge-core, scraper, serde_json
// ============================================================================

//! ## Overview
//! Two entry points: [`parse_page`] extracts general page structure (title,
//! meta description, text, links, forms), and [`extract_by_selectors`] runs a
//! named CSS-selector map. A selector of the form `"<css> @<attr>"` yields
//! attribute values instead of text. Invalid selectors are terminal errors;
//! parsing never fails on malformed HTML.

// ============================================================================
// SECTION: Imports
// ============================================================================

use scraper::Html;
use scraper::Selector;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use expunge_core::TaskError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Cap on extracted page text.
const MAX_TEXT_CONTENT: usize = 50_000;

// ============================================================================
// SECTION: Structural Parse
// ============================================================================

/// Parses an HTML page into general structural data.
#[must_use]
pub fn parse_page(html: &str) -> Value {
    let document = Html::parse_document(html);

    let title = select_first_text(&document, "title");
    let meta_description = Selector::parse("meta[name=\"description\"]")
        .ok()
        .and_then(|selector| document.select(&selector).next())
        .and_then(|element| element.value().attr("content"))
        .map(|content| content.trim().to_string());

    let mut text_content = document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    text_content.truncate(floor_char_boundary(&text_content, MAX_TEXT_CONTENT));

    let links = Selector::parse("a[href]").map_or_else(
        |_| Vec::new(),
        |selector| {
            document
                .select(&selector)
                .map(|anchor| {
                    json!({
                        "href": anchor.value().attr("href").unwrap_or(""),
                        "text": element_text(&anchor),
                    })
                })
                .collect()
        },
    );

    let forms = Selector::parse("form").map_or_else(
        |_| Vec::new(),
        |selector| document.select(&selector).map(|form| form_summary(&form)).collect(),
    );

    json!({
        "title": title,
        "meta_description": meta_description,
        "text_content": text_content,
        "links": links,
        "forms": forms,
    })
}

/// Summarizes one form element: action, method, and named inputs.
fn form_summary(form: &scraper::ElementRef<'_>) -> Value {
    let inputs = Selector::parse("input, select, textarea").map_or_else(
        |_| Vec::new(),
        |selector| {
            form.select(&selector)
                .filter(|input| input.value().attr("name").is_some_and(|name| !name.is_empty()))
                .map(|input| {
                    json!({
                        "name": input.value().attr("name").unwrap_or(""),
                        "type": input.value().attr("type").unwrap_or("text"),
                        "id": input.value().attr("id").unwrap_or(""),
                    })
                })
                .collect()
        },
    );
    json!({
        "action": form.value().attr("action").unwrap_or(""),
        "method": form.value().attr("method").unwrap_or("GET").to_ascii_uppercase(),
        "inputs": inputs,
    })
}

/// Returns the trimmed text of the first match for a selector.
fn select_first_text(document: &Html, css: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    let element = document.select(&selector).next()?;
    let text = element_text(&element);
    if text.is_empty() { None } else { Some(text) }
}

/// Joins an element's text nodes with single spaces.
fn element_text(element: &scraper::ElementRef<'_>) -> String {
    element.text().map(str::trim).filter(|chunk| !chunk.is_empty()).collect::<Vec<_>>().join(" ")
}

/// Largest index `<= at` that lands on a char boundary.
fn floor_char_boundary(text: &str, at: usize) -> usize {
    if at >= text.len() {
        return text.len();
    }
    let mut index = at;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ============================================================================
// SECTION: Selector Extraction
// ============================================================================

/// Extracts values for a named selector map.
///
/// Each entry maps a result key to a CSS selector; the `"<css> @<attr>"`
/// form collects attribute values instead of element text.
///
/// # Errors
///
/// Returns a terminal [`TaskError`] for selectors that fail to parse.
pub fn extract_by_selectors(
    html: &str,
    selectors: &Map<String, Value>,
) -> Result<Value, TaskError> {
    let document = Html::parse_document(html);
    let mut results = Map::new();
    for (key, raw_selector) in selectors {
        let Some(spec) = raw_selector.as_str() else {
            return Err(TaskError::permanent(format!("selector for '{key}' must be a string")));
        };
        let (css, attr) = match spec.rsplit_once(" @") {
            Some((css, attr)) => (css, Some(attr.trim())),
            None => (spec, None),
        };
        let selector = Selector::parse(css)
            .map_err(|err| TaskError::permanent(format!("invalid selector '{css}': {err}")))?;
        let values: Vec<Value> = document
            .select(&selector)
            .map(|element| match attr {
                Some(attr) => Value::String(element.value().attr(attr).unwrap_or("").to_string()),
                None => Value::String(element_text(&element)),
            })
            .collect();
        results.insert(key.clone(), Value::Array(values));
    }
    Ok(Value::Object(results))
}

/// Returns `true` when a selector matches anywhere in the document.
#[must_use]
pub fn selector_matches(html: &str, css: &str) -> bool {
    let document = Html::parse_document(html);
    Selector::parse(css).is_ok_and(|selector| document.select(&selector).next().is_some())
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

    use serde_json::Map;
    use serde_json::json;

    use super::extract_by_selectors;
    use super::parse_page;
    use super::selector_matches;

    /// Listing page fixture with names, links, and an opt-out form.
    const PAGE: &str = r#"<html><head><title>People Finder</title>
<meta name="description" content="Find anyone"></head><body>
<div class="card"><span class="name">Jane Doe</span>
<a class="profile" href="/person/jane-doe">view</a></div>
<div class="card"><span class="name">John Roe</span>
<a class="profile" href="/person/john-roe">view</a></div>
<form action="/optout" method="post">
<input name="email" type="email" id="em"><input type="submit" value="go">
</form></body></html>"#;

    #[test]
    fn parse_page_collects_structure() {
        let parsed = parse_page(PAGE);
        assert_eq!(parsed["title"], json!("People Finder"));
        assert_eq!(parsed["meta_description"], json!("Find anyone"));
        assert_eq!(parsed["links"].as_array().unwrap().len(), 2);
        let form = &parsed["forms"][0];
        assert_eq!(form["action"], json!("/optout"));
        assert_eq!(form["method"], json!("POST"));
        assert_eq!(form["inputs"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn selectors_extract_text_and_attributes() {
        let mut selectors = Map::new();
        selectors.insert("names".to_string(), json!(".card .name"));
        selectors.insert("urls".to_string(), json!(".card a.profile @href"));
        let extracted = extract_by_selectors(PAGE, &selectors).unwrap();
        assert_eq!(extracted["names"], json!(["Jane Doe", "John Roe"]));
        assert_eq!(extracted["urls"], json!(["/person/jane-doe", "/person/john-roe"]));
    }

    #[test]
    fn invalid_selector_is_terminal() {
        let mut selectors = Map::new();
        selectors.insert("bad".to_string(), json!("..["));
        let error = extract_by_selectors(PAGE, &selectors).unwrap_err();
        assert!(!error.is_transient());
    }

    #[test]
    fn selector_presence_check() {
        assert!(selector_matches(PAGE, "form input[name=email]"));
        assert!(!selector_matches(PAGE, "#missing"));
    }
}
