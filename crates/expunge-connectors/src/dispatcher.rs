// crates/expunge-connectors/src/dispatcher.rs
// ============================================================================
// Module: Task Dispatcher
// Description: Maps task types to handlers with reference resolution.
// Purpose: Execute one resolved task call with a per-call timeout.
// Dependencies: crate connectors, expunge-config, expunge-core, tracing, uuid
// ============================================================================

//! ## Overview
//! The dispatcher resolves `{{ path }}` references in the task input, picks
//! the handler for the task type, and times the call, emitting a structured
//! `task.execute` event with type and duration. Handlers classify their own
//! failures; the dispatcher never retries — that is the engine's retry
//! controller's job. Browser-backed handlers pass through the per-broker
//! rate limiter first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use uuid::Uuid;

use expunge_config::AgentEmailSettings;
use expunge_config::ExecutorConfig;
use expunge_config::LlmSettings;
use expunge_core::ReferenceContext;
use expunge_core::TaskCall;
use expunge_core::TaskDispatcher;
use expunge_core::TaskError;
use expunge_core::TaskType;
use expunge_core::Timestamp;
use expunge_core::resolve_value;

use crate::browser::BrowserDriver;
use crate::browser::FormSubmitRequest;
use crate::browser::PageAction;
use crate::browser::RateLimiter;
use crate::browser::RenderRequest;
use crate::discover;
use crate::email::MailQuery;
use crate::email::MailTransport;
use crate::email::Mailbox;
use crate::email::OutboundEmail;
use crate::email::poll_mailbox;
use crate::http::HttpConnector;
use crate::identity;
use crate::legal;
use crate::llm;
use crate::scrape;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Cap on HTML and text payloads stored in task outputs.
const MAX_OUTPUT_TEXT: usize = 200_000;

/// Longest delay `wait.delay` sleeps inline, in seconds.
const MAX_INLINE_DELAY_SECONDS: u64 = 300;

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Dispatcher settings snapshot taken from the executor config.
///
/// # Invariants
/// - Values are frozen at construction; handlers never re-read config.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Fallback per-call timeout in milliseconds.
    pub default_timeout_ms: u64,
    /// Default identity-match confidence threshold.
    pub confidence_threshold: f64,
    /// LLM provider settings.
    pub llm: LlmSettings,
    /// Agent mailbox settings.
    pub agent_email: AgentEmailSettings,
    /// Per-broker hourly budget for browser-backed handlers.
    pub browser_rate_limit_per_hour: u32,
    /// Allow private-network HTTP targets (tests and lab rigs only).
    pub allow_private_networks: bool,
}

impl DispatcherSettings {
    /// Snapshots dispatcher settings from the executor config.
    #[must_use]
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            default_timeout_ms: config.default_timeout_ms,
            confidence_threshold: config.policy.confidence_threshold,
            llm: config.llm.clone(),
            agent_email: config.agent_email.clone(),
            browser_rate_limit_per_hour: config.browser.rate_limit_per_broker_per_hour,
            allow_private_networks: false,
        }
    }

    /// Returns these settings with private-network HTTP targets allowed.
    #[must_use]
    pub const fn with_private_networks(mut self) -> Self {
        self.allow_private_networks = true;
        self
    }
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// Sleep function used for inline delays and inbox polling.
type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Task dispatcher wiring every task type to its connector.
///
/// # Invariants
/// - Holds no per-run state; safe to share across runner threads.
pub struct ConnectorDispatcher {
    /// Settings snapshot.
    settings: DispatcherSettings,
    /// Browser seam for rendered fetches and form submits.
    browser: Arc<dyn BrowserDriver>,
    /// Outbound mail seam.
    mail_transport: Arc<dyn MailTransport>,
    /// Inbox search seam.
    mailbox: Arc<dyn Mailbox>,
    /// Per-broker hourly rate limiter.
    rate_limiter: RateLimiter,
    /// Sleep function (injectable for tests).
    sleeper: Sleeper,
}

impl ConnectorDispatcher {
    /// Creates a dispatcher over the provided connector seams.
    #[must_use]
    pub fn new(
        settings: DispatcherSettings,
        browser: Arc<dyn BrowserDriver>,
        mail_transport: Arc<dyn MailTransport>,
        mailbox: Arc<dyn Mailbox>,
    ) -> Self {
        Self {
            settings,
            browser,
            mail_transport,
            mailbox,
            rate_limiter: RateLimiter::new(),
            sleeper: Arc::new(|duration| std::thread::sleep(duration)),
        }
    }

    /// Replaces the sleep function (tests use a recording no-op).
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Builds the HTTP connector for one call.
    fn http(&self, timeout_ms: u64) -> HttpConnector {
        let timeout =
            if timeout_ms > 0 { timeout_ms } else { self.settings.default_timeout_ms };
        let connector = HttpConnector::new(timeout);
        if self.settings.allow_private_networks {
            connector.with_private_networks()
        } else {
            connector
        }
    }

    /// Applies the per-broker rate limit when the input names a broker.
    fn rate_limit(&self, input: &Value) -> Result<(), TaskError> {
        if let Some(broker_id) = input.get("broker_id").and_then(Value::as_str) {
            self.rate_limiter.acquire(
                broker_id,
                self.settings.browser_rate_limit_per_hour,
                Timestamp::now(),
            )?;
        }
        Ok(())
    }
}

impl TaskDispatcher for ConnectorDispatcher {
    fn execute(&self, call: &TaskCall, ctx: &ReferenceContext) -> Result<Value, TaskError> {
        let input = resolve_value(&call.input, ctx);
        let started = Instant::now();
        let result = match call.task_type {
            TaskType::HttpRequest => self.execute_http(&input, ctx, call.timeout_ms),
            TaskType::ScrapeStatic => execute_scrape_static(&input, ctx),
            TaskType::ScrapeRendered => self.execute_scrape_rendered(&input, ctx, call.timeout_ms),
            TaskType::FormSubmit => self.execute_form_submit(&input, ctx, call.timeout_ms),
            TaskType::EmailSend => self.execute_email_send(&input),
            TaskType::EmailCheck => self.execute_email_check(&input),
            TaskType::EmailClickVerify => self.execute_click_verify(&input, ctx, call.timeout_ms),
            TaskType::MatchIdentity => self.execute_match_identity(&input, ctx),
            TaskType::BrokerUpdateStatus => execute_update_status(&input, ctx),
            TaskType::QueueHumanAction => execute_queue_human_action(&input, ctx),
            TaskType::CaptchaSolve => execute_captcha_solve(&input, ctx),
            TaskType::WaitDelay => self.execute_wait_delay(&input),
            TaskType::LlmJson => self.execute_llm_json(&input, ctx, call.timeout_ms),
            TaskType::LegalGenerateRequest => self.execute_legal_request(&input, ctx, call.timeout_ms),
            TaskType::DiscoverSearchEngine => self.execute_discovery(&input, ctx, call.timeout_ms),
        };
        let duration_ms = started.elapsed().as_millis();
        tracing::info!(
            task_type = call.task_type.as_str(),
            task_id = call.task_id.as_str(),
            duration_ms = u64::try_from(duration_ms).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "task.execute"
        );
        result
    }
}

// ============================================================================
// SECTION: Input Helpers
// ============================================================================

/// Reads an optional string field.
fn input_str<'v>(input: &'v Value, key: &str) -> Option<&'v str> {
    input.get(key).and_then(Value::as_str).filter(|text| !text.is_empty())
}

/// Reads an optional unsigned integer field (numbers or numeric strings).
fn input_u64(input: &Value, key: &str) -> Option<u64> {
    input.get(key).and_then(|value| {
        value.as_u64().or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
    })
}

/// Reads an object field into a string map, stringifying scalar values.
fn input_string_map(input: &Value, key: &str) -> BTreeMap<String, String> {
    input.get(key).and_then(Value::as_object).map_or_else(BTreeMap::new, |map| {
        map.iter()
            .map(|(name, value)| {
                let rendered = match value {
                    Value::String(text) => text.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (name.clone(), rendered)
            })
            .collect()
    })
}

/// Resolves a reference path to a cloned value.
fn value_from_ref(reference: &str, ctx: &ReferenceContext) -> Option<Value> {
    ctx.lookup(reference).cloned()
}

/// Joins a base URL and a path template into an absolute URL.
fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Resolves the base URL from an explicit field or a named target.
fn resolve_base_url(input: &Value, ctx: &ReferenceContext) -> Option<String> {
    if let Some(base_url) = input_str(input, "base_url") {
        return Some(base_url.to_string());
    }
    let target_id = input_str(input, "target_id")?;
    ctx.lookup(&format!("targets.{target_id}.base_url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Caps a string to the output text limit on a char boundary.
fn cap_output_text(text: &str) -> String {
    let mut capped = text.to_string();
    capped.truncate(capped.char_indices().nth(MAX_OUTPUT_TEXT).map_or(capped.len(), |(at, _)| at));
    capped
}

// ============================================================================
// SECTION: HTTP and Scrape Handlers
// ============================================================================

impl ConnectorDispatcher {
    /// `http.request`: bounded HTTP call; status >= 400 fails.
    fn execute_http(
        &self,
        input: &Value,
        ctx: &ReferenceContext,
        timeout_ms: u64,
    ) -> Result<Value, TaskError> {
        let base_url = resolve_base_url(input, ctx).ok_or_else(|| {
            TaskError::permanent("http.request requires base_url or target_id with base_url")
        })?;
        let method = input_str(input, "method").unwrap_or("GET");
        let path = input_str(input, "path").unwrap_or("/");
        let url = join_url(&base_url, path);
        let headers = input_string_map(input, "headers");
        let query = input_string_map(input, "params");
        let response = self.http(timeout_ms).request(
            method,
            &url,
            if headers.is_empty() { None } else { Some(&headers) },
            if query.is_empty() { None } else { Some(&query) },
            input.get("json_body"),
        )?;
        if response.status >= 400 {
            return Err(TaskError::http_status(
                format!(
                    "http.request failed status={} method={} url={url}",
                    response.status,
                    method.to_ascii_uppercase()
                ),
                response.status,
            ));
        }
        Ok(json!({
            "url": url,
            "status_code": response.status,
            "headers": response.headers,
            "text": cap_output_text(&response.text),
            "json": response.json,
        }))
    }

    /// `scrape.rendered`: browser fetch with wait, actions, and extraction.
    fn execute_scrape_rendered(
        &self,
        input: &Value,
        ctx: &ReferenceContext,
        timeout_ms: u64,
    ) -> Result<Value, TaskError> {
        self.rate_limit(input)?;
        let base_url = resolve_base_url(input, ctx).unwrap_or_default();
        let url = join_url(&base_url, input_str(input, "url_template").unwrap_or("/"));
        let actions = parse_actions(input, ctx)?;
        let request = RenderRequest {
            url,
            wait_for: input_str(input, "wait_for").map(str::to_string),
            actions,
            screenshot: input.get("screenshot").and_then(Value::as_bool).unwrap_or(false),
            timeout_ms,
        };
        let page = self.browser.render(&request)?;
        let extracted = match input.get("extract").and_then(Value::as_object) {
            Some(extract) if !extract.is_empty() => {
                let fields = extract
                    .get("fields")
                    .and_then(Value::as_object)
                    .unwrap_or(extract);
                Some(scrape::extract_by_selectors(&page.html, fields)?)
            }
            _ => None,
        };
        Ok(json!({
            "url": page.url,
            "status": page.status,
            "html": cap_output_text(&page.html),
            "extracted": extracted,
            "screenshot_path": page.screenshot_path,
        }))
    }

    /// `form.submit`: detect, fill, and submit an opt-out form.
    fn execute_form_submit(
        &self,
        input: &Value,
        ctx: &ReferenceContext,
        timeout_ms: u64,
    ) -> Result<Value, TaskError> {
        self.rate_limit(input)?;
        let base_url = resolve_base_url(input, ctx).unwrap_or_default();
        let url = join_url(&base_url, input_str(input, "url_template").unwrap_or("/"));
        let request = FormSubmitRequest {
            url,
            wait_for: input_str(input, "wait_for").map(str::to_string),
            form_hints: input.get("form_hints").cloned(),
            fields: input_string_map(input, "fields"),
            screenshot: input.get("screenshot").and_then(Value::as_bool).unwrap_or(true),
            timeout_ms,
        };
        let outcome = self.browser.submit_form(&request)?;
        serde_json::to_value(&outcome)
            .map_err(|err| TaskError::permanent(format!("form outcome encode failed: {err}")))
    }
}

/// `scrape.static`: selector extraction over an HTML blob.
fn execute_scrape_static(input: &Value, ctx: &ReferenceContext) -> Result<Value, TaskError> {
    let mut html = input_str(input, "html").map(str::to_string);
    if let Some(reference) = input_str(input, "html_ref")
        && let Some(candidate) = value_from_ref(reference, ctx)
    {
        html = match candidate {
            Value::Object(map) => {
                map.get("text").or_else(|| map.get("html")).and_then(Value::as_str).map(str::to_string)
            }
            Value::String(text) => Some(text),
            _ => None,
        };
    }
    let html =
        html.ok_or_else(|| TaskError::permanent("scrape.static requires html or html_ref"))?;
    match input.get("extract").and_then(Value::as_object) {
        Some(selectors) => scrape::extract_by_selectors(&html, selectors),
        None => Ok(scrape::parse_page(&html)),
    }
}

/// Parses the scripted action list, resolving `value_ref` entries.
fn parse_actions(input: &Value, ctx: &ReferenceContext) -> Result<Vec<PageAction>, TaskError> {
    let Some(actions) = input.get("actions").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut parsed = Vec::with_capacity(actions.len());
    for action in actions {
        let mut action = action.clone();
        if let Some(map) = action.as_object_mut()
            && let Some(reference) = map.get("value_ref").and_then(Value::as_str)
        {
            let resolved = value_from_ref(reference, ctx)
                .map_or(String::new(), |value| match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                });
            map.remove("value_ref");
            map.insert("value".to_string(), Value::String(resolved));
        }
        let action: PageAction = serde_json::from_value(action)
            .map_err(|err| TaskError::permanent(format!("invalid page action: {err}")))?;
        parsed.push(action);
    }
    Ok(parsed)
}

// ============================================================================
// SECTION: Email Handlers
// ============================================================================

impl ConnectorDispatcher {
    /// `email.send`: SMTP send from the agent mailbox.
    fn execute_email_send(&self, input: &Value) -> Result<Value, TaskError> {
        if self.settings.agent_email.address.is_empty() {
            return Err(TaskError::permanent("email.send requires agent_email configuration"));
        }
        let to = input_str(input, "to")
            .ok_or_else(|| TaskError::permanent("email.send requires 'to'"))?;
        let body = input_str(input, "body")
            .or_else(|| input_str(input, "body_template"))
            .unwrap_or("");
        let email = OutboundEmail {
            to: to.to_string(),
            subject: input_str(input, "subject").unwrap_or("Data Removal Request").to_string(),
            body: body.to_string(),
        };
        let receipt = self.mail_transport.send(&email)?;
        serde_json::to_value(&receipt)
            .map_err(|err| TaskError::permanent(format!("receipt encode failed: {err}")))
    }

    /// `email.check`: inbox poll with a wall-clock deadline.
    fn execute_email_check(&self, input: &Value) -> Result<Value, TaskError> {
        let query = MailQuery {
            from_filter: input_str(input, "from_filter").map(str::to_string),
            subject_filter: input_str(input, "subject_filter").map(str::to_string),
        };
        let wait_minutes = input_u64(input, "wait_minutes").unwrap_or(0);
        let poll_interval = input_u64(input, "poll_interval_seconds").unwrap_or(30);
        let sleeper = Arc::clone(&self.sleeper);
        let messages = poll_mailbox(self.mailbox.as_ref(), &query, wait_minutes, poll_interval, |duration| {
            sleeper(duration);
        })?;
        let mut output = json!({
            "found": messages.len(),
            "messages": messages
                .iter()
                .map(|message| json!({
                    "from": message.from_addr,
                    "subject": message.subject,
                    "links": message.links,
                }))
                .collect::<Vec<_>>(),
        });
        if input.get("extract_links").and_then(Value::as_bool).unwrap_or(false)
            && !messages.is_empty()
            && let Some(object) = output.as_object_mut()
        {
            let links: Vec<String> =
                messages.iter().flat_map(|message| message.links.iter().cloned()).collect();
            object.insert("links".to_string(), json!(links));
        }
        Ok(output)
    }

    /// `email.click_verify`: follow a verification URL via the browser.
    fn execute_click_verify(
        &self,
        input: &Value,
        ctx: &ReferenceContext,
        timeout_ms: u64,
    ) -> Result<Value, TaskError> {
        let mut link = input_str(input, "link").map(str::to_string);
        if let Some(reference) = input_str(input, "link_ref")
            && let Some(resolved) = value_from_ref(reference, ctx)
        {
            link = match resolved {
                Value::String(text) => Some(text),
                Value::Array(items) => {
                    items.first().and_then(Value::as_str).map(str::to_string)
                }
                _ => None,
            };
        }
        let link = link
            .filter(|text| !text.is_empty())
            .ok_or_else(|| TaskError::permanent("email.click_verify requires link or link_ref"))?;
        let request = RenderRequest {
            url: link,
            wait_for: input_str(input, "wait_for").map(str::to_string),
            actions: Vec::new(),
            screenshot: true,
            timeout_ms,
        };
        let page = self.browser.render(&request)?;
        Ok(json!({
            "url": page.url,
            "status": page.status,
            "html": cap_output_text(&page.html),
            "screenshot_path": page.screenshot_path,
        }))
    }
}

// ============================================================================
// SECTION: Matching, Status, and Queue Handlers
// ============================================================================

impl ConnectorDispatcher {
    /// `match.identity`: heuristic confidence per candidate listing.
    fn execute_match_identity(
        &self,
        input: &Value,
        ctx: &ReferenceContext,
    ) -> Result<Value, TaskError> {
        let profile = input_str(input, "profile_ref")
            .and_then(|reference| value_from_ref(reference, ctx))
            .or_else(|| value_from_ref("profile_data", ctx))
            .filter(Value::is_object)
            .ok_or_else(|| {
                TaskError::permanent(
                    "match.identity: could not resolve profile data from profile_ref or \
                     state.profile_data",
                )
            })?;

        let listings = input_str(input, "listings_ref")
            .and_then(|reference| value_from_ref(reference, ctx))
            .map_or_else(Vec::new, |raw| match raw {
                Value::Array(items) => items,
                Value::Object(map) => map
                    .get("extracted")
                    .and_then(Value::as_object)
                    .map(listings_from_extracted)
                    .unwrap_or_default(),
                _ => Vec::new(),
            });
        if listings.is_empty() {
            return Ok(json!({"matched": [], "all_results": [], "count": 0}));
        }

        let threshold = input
            .get("threshold")
            .and_then(Value::as_f64)
            .unwrap_or(self.settings.confidence_threshold);
        let now = Timestamp::now();
        let mut all_results = Vec::with_capacity(listings.len());
        let mut matched = Vec::new();
        for listing in &listings {
            if !listing.is_object() {
                continue;
            }
            let outcome = identity::heuristic_match(listing, &profile, now);
            let above = outcome.confidence >= threshold;
            let entry = json!({
                "listing": listing,
                "confidence": outcome.confidence,
                "matched_fields": outcome.matched_fields,
                "above_threshold": above,
            });
            if above {
                matched.push(entry.clone());
            }
            all_results.push(entry);
        }
        Ok(json!({"matched": matched, "all_results": all_results, "count": matched.len()}))
    }
}

/// Converts selector-extracted column data into row-wise listing objects.
fn listings_from_extracted(extracted: &Map<String, Value>) -> Vec<Value> {
    let field_names = [
        ("names", "name"),
        ("name", "name"),
        ("locations", "location"),
        ("location", "location"),
        ("ages", "age"),
        ("age", "age"),
        ("phones", "phone"),
        ("phone", "phone"),
        ("links", "profile_url"),
        ("urls", "profile_url"),
    ];
    let mut columns: Vec<(String, &Vec<Value>)> = Vec::new();
    let mut max_len = 0;
    for (key, values) in extracted {
        let Some(values) = values.as_array() else {
            continue;
        };
        let field = field_names
            .iter()
            .find(|(from, _)| *from == key.as_str())
            .map_or(key.as_str(), |(_, to)| to);
        columns.push((field.to_string(), values));
        max_len = max_len.max(values.len());
    }
    let mut listings = Vec::with_capacity(max_len);
    for index in 0..max_len {
        let mut listing = Map::new();
        for (field, values) in &columns {
            if let Some(value) = values.get(index) {
                listing.insert(field.clone(), value.clone());
            }
        }
        listings.push(Value::Object(listing));
    }
    listings
}

/// `broker.update_status`: compose a listing status-update record.
fn execute_update_status(input: &Value, ctx: &ReferenceContext) -> Result<Value, TaskError> {
    let broker_id = input_str(input, "broker_id").unwrap_or("unknown");
    let new_status = input_str(input, "status").unwrap_or("found");
    let listing_id = input_str(input, "listing_id")
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
    let recheck_days = input_u64(input, "recheck_days").unwrap_or(30);
    let now = Timestamp::now();

    let listing_snapshot =
        input_str(input, "listing_ref").and_then(|reference| value_from_ref(reference, ctx));
    let matched_fields =
        input_str(input, "matched_fields_ref").and_then(|reference| value_from_ref(reference, ctx));

    let mut record = Map::new();
    record.insert("listing_id".to_string(), json!(listing_id));
    record.insert("broker_id".to_string(), json!(broker_id));
    record.insert("profile_id".to_string(), json!(input_str(input, "profile_id")));
    record.insert("status".to_string(), json!(new_status));
    record.insert("listing_url".to_string(), json!(input_str(input, "listing_url")));
    record.insert(
        "confidence".to_string(),
        json!(input.get("confidence").and_then(Value::as_f64).unwrap_or(0.0)),
    );
    record.insert("matched_fields".to_string(), matched_fields.unwrap_or(Value::Null));
    record.insert("listing_snapshot".to_string(), listing_snapshot.unwrap_or(Value::Null));
    record.insert("notes".to_string(), json!(input_str(input, "notes")));
    record.insert(
        "recheck_after".to_string(),
        if new_status == "removed" {
            Value::Null
        } else {
            json!(now.plus_days(i64::try_from(recheck_days).unwrap_or(30)).as_millis())
        },
    );
    record.insert("updated_at".to_string(), json!(now.as_millis()));
    record.insert("last_checked_at".to_string(), json!(now.as_millis()));

    match new_status {
        "found" => {
            record.insert("discovered_at".to_string(), json!(now.as_millis()));
        }
        "removal_submitted" => {
            record.insert("removal_sent_at".to_string(), json!(now.as_millis()));
        }
        "removed" | "verified_removed" => {
            record.insert("verified_at".to_string(), json!(now.as_millis()));
        }
        _ => {}
    }

    if matches!(new_status, "removal_submitted" | "removal_failed") {
        record.insert(
            "removal_action".to_string(),
            json!({
                "action_id": Uuid::new_v4().to_string(),
                "listing_id": record["listing_id"],
                "run_id": input_str(input, "run_id"),
                "action_type": input_str(input, "action_type").unwrap_or("web_form"),
                "request_summary": format!("Status update to {new_status} for {broker_id}"),
                "response_status": new_status,
                "confirmation_id": input_str(input, "confirmation_id"),
                "error_message": input_str(input, "error_message"),
            }),
        );
    }

    tracing::info!(broker = broker_id, status = new_status, "broker.update_status");
    Ok(Value::Object(record))
}

/// `queue.human_action`: enqueue a human-handoff record; succeeds immediately.
fn execute_queue_human_action(input: &Value, ctx: &ReferenceContext) -> Result<Value, TaskError> {
    let broker_id = input_str(input, "broker_id").unwrap_or("unknown");
    let action_needed = input_str(input, "action_needed").unwrap_or("manual action required");
    let mut instructions = input_str(input, "instructions").map(str::to_string);
    if let Some(reference) = input_str(input, "instructions_ref")
        && let Some(Value::String(resolved)) = value_from_ref(reference, ctx)
    {
        instructions = Some(resolved);
    }
    let queue_id = Uuid::new_v4().to_string();
    tracing::info!(broker = broker_id, action = action_needed, queue_id = %queue_id, "queue.human_action");
    Ok(json!({
        "queue_id": queue_id,
        "broker_id": broker_id,
        "listing_id": input_str(input, "listing_id"),
        "action_needed": action_needed,
        "instructions": instructions,
        "priority": input_u64(input, "priority").unwrap_or(0),
        "status": "pending",
    }))
}

/// `captcha.solve`: human-handoff wrapper for CAPTCHA with a screenshot ref.
fn execute_captcha_solve(input: &Value, ctx: &ReferenceContext) -> Result<Value, TaskError> {
    let screenshot = input_str(input, "screenshot_ref")
        .and_then(|reference| value_from_ref(reference, ctx))
        .and_then(|value| {
            value
                .get("screenshot_path")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| value.as_str().map(str::to_string))
        });
    let mut wrapped = input.clone();
    if let Some(map) = wrapped.as_object_mut() {
        map.insert("action_needed".to_string(), json!("solve_captcha"));
        let instructions = map
            .get("instructions")
            .and_then(Value::as_str)
            .map_or_else(|| "Solve the CAPTCHA to continue the removal".to_string(), str::to_string);
        map.insert("instructions".to_string(), json!(instructions));
    }
    let mut output = execute_queue_human_action(&wrapped, ctx)?;
    if let Some(object) = output.as_object_mut() {
        object.insert("screenshot_path".to_string(), json!(screenshot));
    }
    Ok(output)
}

// ============================================================================
// SECTION: Delay, LLM, Legal, and Discovery Handlers
// ============================================================================

impl ConnectorDispatcher {
    /// `wait.delay`: inline sleep up to the cap, deferred marker beyond it.
    fn execute_wait_delay(&self, input: &Value) -> Result<Value, TaskError> {
        let total_seconds = input_u64(input, "hours").unwrap_or(0) * 3_600
            + input_u64(input, "minutes").unwrap_or(0) * 60
            + input_u64(input, "seconds").unwrap_or(0);
        let reason = input_str(input, "reason").unwrap_or("");
        let now = Timestamp::now();

        if total_seconds <= MAX_INLINE_DELAY_SECONDS {
            if total_seconds > 0 {
                tracing::info!(seconds = total_seconds, reason, "wait.delay inline_sleep");
                (self.sleeper)(Duration::from_secs(total_seconds));
            }
            return Ok(json!({
                "delayed_seconds": total_seconds,
                "reason": reason,
                "mode": "inline_sleep",
                "resumed_at": Timestamp::now().as_millis(),
            }));
        }

        let resume_at = now.plus_seconds(i64::try_from(total_seconds).unwrap_or(i64::MAX));
        tracing::info!(
            seconds = total_seconds,
            resume_at = resume_at.as_millis(),
            reason,
            "wait.delay deferred"
        );
        Ok(json!({
            "delayed_seconds": total_seconds,
            "reason": reason,
            "mode": "deferred",
            "resume_at": resume_at.as_millis(),
        }))
    }

    /// `llm.json`: deterministic stub or schema-validated provider call.
    fn execute_llm_json(
        &self,
        input: &Value,
        ctx: &ReferenceContext,
        timeout_ms: u64,
    ) -> Result<Value, TaskError> {
        let source =
            input_str(input, "json_ref").and_then(|reference| value_from_ref(reference, ctx));
        llm::execute_llm_json(
            &self.settings.llm,
            &self.http(timeout_ms),
            input_str(input, "prompt").unwrap_or(""),
            input.get("schema").filter(|schema| schema.is_object()),
            source.as_ref(),
        )
    }

    /// `legal.generate_request`: render a deletion letter from the profile.
    fn execute_legal_request(
        &self,
        input: &Value,
        ctx: &ReferenceContext,
        timeout_ms: u64,
    ) -> Result<Value, TaskError> {
        let profile = input_str(input, "profile_ref")
            .and_then(|reference| value_from_ref(reference, ctx))
            .or_else(|| value_from_ref("profile_data", ctx))
            .filter(Value::is_object)
            .ok_or_else(|| {
                TaskError::permanent(
                    "legal.generate_request: could not resolve profile data from profile_ref or \
                     state.profile_data",
                )
            })?;
        let template_id = input_str(input, "template_id").unwrap_or("ccpa_deletion");
        let broker_name = input_str(input, "broker_name").unwrap_or("Data Broker");
        let letter = legal::render_letter(
            template_id,
            &profile,
            broker_name,
            input_str(input, "broker_address").unwrap_or(""),
            Timestamp::now(),
        )?;
        let mut output = serde_json::to_value(&letter)
            .map_err(|err| TaskError::permanent(format!("letter encode failed: {err}")))?;

        // Optional LLM pass tightens the body while keeping the legal basis.
        let refine = input.get("refine").and_then(Value::as_bool).unwrap_or(false);
        if refine && self.settings.llm.provider != expunge_config::LlmProvider::Mock {
            let schema = json!({
                "type": "object",
                "required": ["subject", "body"],
                "properties": {
                    "subject": {"type": "string"},
                    "body": {"type": "string"},
                },
            });
            let refined = llm::execute_llm_json(
                &self.settings.llm,
                &self.http(timeout_ms),
                "Polish this legal deletion request without changing its legal basis, \
                 recipient, or identifying details.",
                Some(&schema),
                Some(&output),
            )?;
            if let (Some(object), Some(result)) =
                (output.as_object_mut(), refined.get("output").and_then(Value::as_object))
            {
                if let Some(subject) = result.get("subject").and_then(Value::as_str) {
                    object.insert("subject".to_string(), json!(subject));
                }
                if let Some(body) = result.get("body").and_then(Value::as_str) {
                    object.insert("body".to_string(), json!(body));
                }
            }
        }
        Ok(output)
    }

    /// `discover.search_engine`: fetch SERPs and classify candidate brokers.
    fn execute_discovery(
        &self,
        input: &Value,
        ctx: &ReferenceContext,
        timeout_ms: u64,
    ) -> Result<Value, TaskError> {
        let full_name = input_str(input, "full_name")
            .map(str::to_string)
            .or_else(|| {
                input_str(input, "profile_ref")
                    .and_then(|reference| value_from_ref(reference, ctx))
                    .and_then(|profile| {
                        profile.get("full_name").and_then(Value::as_str).map(str::to_string)
                    })
            })
            .ok_or_else(|| {
                TaskError::permanent("discover.search_engine requires full_name or profile_ref")
            })?;
        let city = input_str(input, "city").unwrap_or("");
        let state = input_str(input, "state").unwrap_or("");
        let engine = input_str(input, "engine").unwrap_or("google");
        let max_queries = usize::try_from(input_u64(input, "max_queries").unwrap_or(3)).unwrap_or(3);

        let queries = discover::build_search_queries(&full_name, city, state);
        let connector = self.http(timeout_ms);
        let mut hits = Vec::new();
        let mut executed = Vec::new();
        for query in queries.iter().take(max_queries.max(1)) {
            let url = discover::build_search_url(query, engine, 0);
            let response = connector.request("GET", &url, None, None, None)?;
            if response.status >= 400 {
                return Err(TaskError::http_status(
                    format!("search engine returned status={}", response.status),
                    response.status,
                ));
            }
            executed.push(query.clone());
            for hit in discover::parse_search_hits(&response.text) {
                if !hits.iter().any(|existing: &discover::SearchHit| existing.url == hit.url) {
                    hits.push(hit);
                }
            }
        }
        let likely = discover::discover_brokers(&hits);
        Ok(json!({
            "queries": executed,
            "result_count": hits.len(),
            "results": hits,
            "likely_brokers": likely,
        }))
    }
}
