// crates/expunge-connectors/src/browser.rs
// ============================================================================
// Module: Browser Driver Interface
// Description: Rendered-fetch and form-submit seam with a no-JS reference impl.
// Purpose: Keep JS-rendering engines external while the engine stays testable.
// Dependencies: crate::{http, scrape}, expunge-core, serde, serde_json, url
// ============================================================================

//! ## Overview
//! `scrape.rendered`, `form.submit`, and `email.click_verify` execute through
//! the [`BrowserDriver`] trait. The [`FetchBrowser`] reference implementation
//! fetches over plain HTTP, honours robots.txt, and verifies `wait_for`
//! selectors against the fetched document; it cannot execute scripts or click,
//! which is exactly the boundary the deployment's JS driver fills in.
//! Failure classification follows the rendered-scrape policy: timeouts and
//! network errors are transient, missing selectors and robots refusals are
//! terminal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use expunge_core::TaskError;
use expunge_core::Timestamp;

use crate::http::HttpConnector;
use crate::scrape;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// One scripted page action.
///
/// # Invariants
/// - Variants are stable for plan-file round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageAction {
    /// Fill a field identified by selector.
    Fill {
        /// Target field selector.
        selector: String,
        /// Value to enter.
        #[serde(default)]
        value: String,
    },
    /// Click an element, optionally waiting for a selector afterwards.
    Click {
        /// Target element selector.
        selector: String,
        /// Selector to wait for after the click.
        #[serde(default)]
        wait_for: Option<String>,
    },
}

/// Rendered-fetch request.
///
/// # Invariants
/// - `url` is absolute; target resolution happens in the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// Absolute URL to render.
    pub url: String,
    /// Selector that must be present after load.
    pub wait_for: Option<String>,
    /// Scripted actions executed after load.
    pub actions: Vec<PageAction>,
    /// Capture a screenshot of the final state.
    pub screenshot: bool,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Rendered page snapshot.
///
/// # Invariants
/// - `html` is the final document after any actions.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    /// Final URL.
    pub url: String,
    /// Final HTTP status.
    pub status: u16,
    /// Final document HTML.
    pub html: String,
    /// Screenshot path, when the driver captured one.
    pub screenshot_path: Option<String>,
}

/// Form-submit request.
///
/// # Invariants
/// - `fields` values are fully resolved strings.
#[derive(Debug, Clone, PartialEq)]
pub struct FormSubmitRequest {
    /// Page URL carrying the form.
    pub url: String,
    /// Selector that must be present after load.
    pub wait_for: Option<String>,
    /// Form-detection hints (`selector`, `field_map`, keyword overrides).
    pub form_hints: Option<Value>,
    /// Field values keyed by field name.
    pub fields: BTreeMap<String, String>,
    /// Capture before/after screenshots.
    pub screenshot: bool,
    /// Per-call timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Form-submit outcome.
///
/// # Invariants
/// - `success` is `false` only with `error` set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSubmitOutcome {
    /// Page URL the form was found on.
    pub url: String,
    /// Resolved form action URL.
    pub form_action: String,
    /// Form method.
    pub form_method: String,
    /// Names of the submitted fields.
    pub fields_submitted: Vec<String>,
    /// Whether submission completed.
    pub success: bool,
    /// Failure description, when unsuccessful.
    pub error: Option<String>,
    /// Screenshot path, when captured.
    pub screenshot_path: Option<String>,
    /// Excerpt of the response body.
    pub response_excerpt: String,
}

// ============================================================================
// SECTION: Driver Trait
// ============================================================================

/// Browser seam used by rendered-scrape and form-submit handlers.
pub trait BrowserDriver: Send + Sync {
    /// Renders a page and returns the final document.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] — transient for timeouts and network failures,
    /// terminal for missing selectors and robots refusals.
    fn render(&self, request: &RenderRequest) -> Result<RenderedPage, TaskError>;

    /// Detects, fills, and submits a form on a page.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] under the rendered-scrape classification; a
    /// page without a detectable form is terminal.
    fn submit_form(&self, request: &FormSubmitRequest) -> Result<FormSubmitOutcome, TaskError>;
}

// ============================================================================
// SECTION: Rate Limiter
// ============================================================================

/// Milliseconds in one rate-limit window.
const RATE_WINDOW_MS: i64 = 3_600_000;

/// Process-local per-broker hourly rate limiter.
///
/// # Invariants
/// - Advisory only; losing the counts on restart is safe.
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Window start and count per broker.
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl RateLimiter {
    /// Creates an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes one slot for a broker, failing transiently when exhausted.
    ///
    /// # Errors
    ///
    /// Returns a transient [`TaskError`] when the hourly budget is spent, so
    /// idempotent tasks back off and retry.
    pub fn acquire(&self, broker_id: &str, budget: u32, now: Timestamp) -> Result<(), TaskError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| TaskError::permanent("rate limiter mutex poisoned"))?;
        let now_ms = now.as_millis();
        let entry = windows.entry(broker_id.to_string()).or_insert((now_ms, 0));
        if now_ms - entry.0 >= RATE_WINDOW_MS {
            *entry = (now_ms, 0);
        }
        if entry.1 >= budget {
            return Err(TaskError::transient(format!(
                "hourly request budget exhausted for broker {broker_id}"
            )));
        }
        entry.1 += 1;
        Ok(())
    }
}

// ============================================================================
// SECTION: Fetch Browser
// ============================================================================

/// Keywords that mark a form as a removal/opt-out form.
const FORM_KEYWORDS: [&str; 6] = ["opt-out", "optout", "opt_out", "remove", "privacy", "delete"];

/// No-JS reference driver: plain fetch + selector checks + robots gate.
///
/// # Invariants
/// - Never executes scripts; `Click` actions are refused as terminal errors.
pub struct FetchBrowser {
    /// HTTP connector used for fetches.
    connector_timeout_ms: u64,
    /// Consult robots.txt before fetching.
    check_robots_txt: bool,
    /// Allow private-network targets (tests only).
    allow_private_networks: bool,
}

impl FetchBrowser {
    /// Creates a fetch-based driver.
    #[must_use]
    pub const fn new(timeout_ms: u64, check_robots_txt: bool) -> Self {
        Self {
            connector_timeout_ms: timeout_ms,
            check_robots_txt,
            allow_private_networks: false,
        }
    }

    /// Returns this driver with private-network targets allowed.
    #[must_use]
    pub const fn with_private_networks(mut self) -> Self {
        self.allow_private_networks = true;
        self
    }

    /// Builds the connector for one call, honouring the call timeout.
    fn connector(&self, timeout_ms: u64) -> HttpConnector {
        let timeout = if timeout_ms > 0 { timeout_ms } else { self.connector_timeout_ms };
        let connector = HttpConnector::new(timeout);
        if self.allow_private_networks { connector.with_private_networks() } else { connector }
    }

    /// Refuses URLs a site's robots.txt disallows for all agents.
    fn enforce_robots(&self, connector: &HttpConnector, url: &str) -> Result<(), TaskError> {
        if !self.check_robots_txt {
            return Ok(());
        }
        let parsed = Url::parse(url)
            .map_err(|err| TaskError::permanent(format!("invalid url: {err}")))?;
        let Some(host) = parsed.host_str() else {
            return Err(TaskError::permanent("url has no host"));
        };
        let robots_url = format!(
            "{}://{}{}/robots.txt",
            parsed.scheme(),
            host,
            parsed.port().map_or(String::new(), |port| format!(":{port}"))
        );
        let Ok(response) = connector.request("GET", &robots_url, None, None, None) else {
            // Unreachable robots.txt does not block the fetch.
            return Ok(());
        };
        if response.status != 200 {
            return Ok(());
        }
        if robots_disallows(&response.text, parsed.path()) {
            return Err(TaskError::permanent(format!("robots.txt disallows {}", parsed.path())));
        }
        Ok(())
    }
}

/// Returns `true` when the wildcard agent group disallows the path.
fn robots_disallows(robots: &str, path: &str) -> bool {
    let mut applies = false;
    for line in robots.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if let Some(agent) = line.strip_prefix("User-agent:").map(str::trim) {
            applies = agent == "*";
        } else if applies
            && let Some(rule) = line.strip_prefix("Disallow:").map(str::trim)
            && !rule.is_empty()
            && path.starts_with(rule)
        {
            return true;
        }
    }
    false
}

impl BrowserDriver for FetchBrowser {
    fn render(&self, request: &RenderRequest) -> Result<RenderedPage, TaskError> {
        for action in &request.actions {
            if let PageAction::Click {
                selector, ..
            } = action
            {
                return Err(TaskError::permanent(format!(
                    "fetch browser cannot click '{selector}'; a rendering driver is required"
                )));
            }
        }
        let connector = self.connector(request.timeout_ms);
        self.enforce_robots(&connector, &request.url)?;
        let response = connector.request("GET", &request.url, None, None, None)?;
        if let Some(wait_for) = &request.wait_for
            && !scrape::selector_matches(&response.text, wait_for)
        {
            return Err(TaskError::permanent(format!("selector not found: {wait_for}")));
        }
        Ok(RenderedPage {
            url: request.url.clone(),
            status: response.status,
            html: response.text,
            screenshot_path: None,
        })
    }

    fn submit_form(&self, request: &FormSubmitRequest) -> Result<FormSubmitOutcome, TaskError> {
        let connector = self.connector(request.timeout_ms);
        self.enforce_robots(&connector, &request.url)?;
        let response = connector.request("GET", &request.url, None, None, None)?;
        if let Some(wait_for) = &request.wait_for
            && !scrape::selector_matches(&response.text, wait_for)
        {
            return Err(TaskError::permanent(format!("selector not found: {wait_for}")));
        }

        let page = scrape::parse_page(&response.text);
        let form = detect_form(&page, request.form_hints.as_ref())
            .ok_or_else(|| TaskError::permanent("no form detected on page"))?;
        let action = form.get("action").and_then(Value::as_str).unwrap_or("");
        let method =
            form.get("method").and_then(Value::as_str).unwrap_or("POST").to_ascii_uppercase();
        let action_url = resolve_form_action(&request.url, action)?;

        let submit_response = connector.request_form(&method, &action_url, &request.fields)?;
        let success = submit_response.status < 400;
        let mut excerpt = submit_response.text;
        excerpt.truncate(excerpt.char_indices().nth(5_000).map_or(excerpt.len(), |(at, _)| at));
        Ok(FormSubmitOutcome {
            url: request.url.clone(),
            form_action: action_url,
            form_method: method,
            fields_submitted: request.fields.keys().cloned().collect(),
            success,
            error: if success {
                None
            } else {
                Some(format!("form endpoint returned {}", submit_response.status))
            },
            screenshot_path: None,
            response_excerpt: excerpt,
        })
    }
}

/// Picks the form matching explicit hints or the opt-out keyword heuristics.
fn detect_form(page: &Value, hints: Option<&Value>) -> Option<Value> {
    let forms = page.get("forms")?.as_array()?;
    if forms.is_empty() {
        return None;
    }
    if let Some(action_hint) =
        hints.and_then(|hints| hints.get("action_contains")).and_then(Value::as_str)
    {
        for form in forms {
            let action = form.get("action").and_then(Value::as_str).unwrap_or("");
            if action.to_lowercase().contains(&action_hint.to_lowercase()) {
                return Some(form.clone());
            }
        }
    }
    for form in forms {
        let action = form.get("action").and_then(Value::as_str).unwrap_or("").to_lowercase();
        if FORM_KEYWORDS.iter().any(|keyword| action.contains(keyword)) {
            return Some(form.clone());
        }
    }
    forms.first().cloned()
}

/// Resolves a form action relative to the page URL.
fn resolve_form_action(page_url: &str, action: &str) -> Result<String, TaskError> {
    let base =
        Url::parse(page_url).map_err(|err| TaskError::permanent(format!("invalid url: {err}")))?;
    if action.is_empty() {
        return Ok(base.to_string());
    }
    base.join(action)
        .map(|resolved| resolved.to_string())
        .map_err(|err| TaskError::permanent(format!("invalid form action '{action}': {err}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
