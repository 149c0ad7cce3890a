// crates/expunge-connectors/tests/dispatcher_unit.rs
// ============================================================================
// Module: Dispatcher Unit Tests
// Description: Task-type routing with scripted browser and mailbox seams.
// ============================================================================
//! ## Overview
//! Exercises the dispatcher's reference resolution, handler routing, and
//! output contracts with in-memory fixtures; no network is touched.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Value;
use serde_json::json;

use expunge_config::AgentEmailSettings;
use expunge_config::LlmSettings;
use expunge_connectors::BrowserDriver;
use expunge_connectors::ConnectorDispatcher;
use expunge_connectors::DispatcherSettings;
use expunge_connectors::FormSubmitOutcome;
use expunge_connectors::FormSubmitRequest;
use expunge_connectors::InMemoryMailbox;
use expunge_connectors::MailTransport;
use expunge_connectors::OutboundEmail;
use expunge_connectors::RenderRequest;
use expunge_connectors::RenderedPage;
use expunge_connectors::email::SendReceipt;
use expunge_core::ReferenceContext;
use expunge_core::RunId;
use expunge_core::TaskCall;
use expunge_core::TaskDispatcher;
use expunge_core::TaskError;
use expunge_core::TaskId;
use expunge_core::TaskType;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Browser double returning a canned page and recording requests.
struct ScriptedBrowser {
    /// HTML returned by render.
    html: String,
    /// Render requests observed.
    rendered: Mutex<Vec<RenderRequest>>,
}

impl ScriptedBrowser {
    fn new(html: &str) -> Self {
        Self {
            html: html.to_string(),
            rendered: Mutex::new(Vec::new()),
        }
    }
}

impl BrowserDriver for ScriptedBrowser {
    fn render(&self, request: &RenderRequest) -> Result<RenderedPage, TaskError> {
        self.rendered.lock().unwrap().push(request.clone());
        Ok(RenderedPage {
            url: request.url.clone(),
            status: 200,
            html: self.html.clone(),
            screenshot_path: request.screenshot.then(|| "shots/page.png".to_string()),
        })
    }

    fn submit_form(&self, request: &FormSubmitRequest) -> Result<FormSubmitOutcome, TaskError> {
        Ok(FormSubmitOutcome {
            url: request.url.clone(),
            form_action: format!("{}/optout", request.url.trim_end_matches('/')),
            form_method: "POST".to_string(),
            fields_submitted: request.fields.keys().cloned().collect(),
            success: true,
            error: None,
            screenshot_path: request.screenshot.then(|| "shots/form.png".to_string()),
            response_excerpt: "Your request was received".to_string(),
        })
    }
}

/// Mail transport double recording outbound messages.
#[derive(Default)]
struct RecordingTransport {
    /// Messages sent.
    sent: Mutex<Vec<OutboundEmail>>,
}

impl MailTransport for RecordingTransport {
    fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TaskError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(SendReceipt {
            to: email.to.clone(),
            subject: email.subject.clone(),
            sent: true,
        })
    }
}

/// Dispatcher over scripted seams with a recording sleeper.
fn dispatcher_with(
    browser: Arc<ScriptedBrowser>,
    transport: Arc<RecordingTransport>,
    mailbox: Arc<InMemoryMailbox>,
) -> (ConnectorDispatcher, Arc<Mutex<Vec<std::time::Duration>>>) {
    let settings = DispatcherSettings {
        default_timeout_ms: 5_000,
        confidence_threshold: 0.8,
        llm: LlmSettings::default(),
        agent_email: AgentEmailSettings {
            address: "agent@expunge.example".to_string(),
            smtp_host: "smtp.expunge.example".to_string(),
            ..AgentEmailSettings::default()
        },
        browser_rate_limit_per_hour: 30,
        allow_private_networks: true,
    };
    let sleeps = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&sleeps);
    let dispatcher = ConnectorDispatcher::new(settings, browser, transport, mailbox)
        .with_sleeper(Arc::new(move |duration| recorded.lock().unwrap().push(duration)));
    (dispatcher, sleeps)
}

/// Builds a task call for a type and input.
fn call(task_type: TaskType, input: Value) -> TaskCall {
    TaskCall {
        run_id: RunId::new("r-1"),
        task_id: TaskId::new("t-1"),
        task_type,
        input,
        timeout_ms: 5_000,
    }
}

/// Context with one website target and some prior task state.
fn context() -> ReferenceContext {
    ReferenceContext::new(
        json!({"profile_id": "p-1"}),
        json!({"site": {"base_url": "https://broker.example", "kind": "website"}}),
        json!({
            "profile_data": {
                "full_name": "Jane Ann Doe",
                "addresses": [{"city": "Chicago", "state": "IL", "current": true}],
            },
            "scan": {
                "extracted": {
                    "names": ["Jane A Doe", "Someone Else"],
                    "locations": ["Chicago, IL", "Miami, FL"],
                },
            },
            "verify_mail": {"links": ["https://broker.example/verify?t=9"]},
        }),
    )
}

/// Default scripted seams.
fn seams() -> (Arc<ScriptedBrowser>, Arc<RecordingTransport>, Arc<InMemoryMailbox>) {
    (
        Arc::new(ScriptedBrowser::new(
            "<html><body><div id='ready'><span class='name'>Jane A Doe</span></div></body></html>",
        )),
        Arc::new(RecordingTransport::default()),
        Arc::new(InMemoryMailbox::new()),
    )
}

// ============================================================================
// SECTION: Scrape and Browser Routing
// ============================================================================

#[test]
fn scrape_static_uses_html_ref_from_state() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(browser, transport, mailbox);
    let ctx = ReferenceContext::new(
        json!({}),
        json!({}),
        json!({"fetch": {"text": "<p class='msg'>removed</p>"}}),
    );
    let output = dispatcher
        .execute(
            &call(
                TaskType::ScrapeStatic,
                json!({"html_ref": "fetch", "extract": {"messages": ".msg"}}),
            ),
            &ctx,
        )
        .unwrap();
    assert_eq!(output, json!({"messages": ["removed"]}));
}

#[test]
fn scrape_rendered_resolves_target_and_extracts() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(Arc::clone(&browser), transport, mailbox);
    let output = dispatcher
        .execute(
            &call(
                TaskType::ScrapeRendered,
                json!({
                    "target_id": "site",
                    "url_template": "/search?name={{ params.profile_id }}",
                    "wait_for": "#ready",
                    "extract": {"names": ".name"},
                    "screenshot": true,
                }),
            ),
            &context(),
        )
        .unwrap();
    assert_eq!(output["url"], json!("https://broker.example/search?name=p-1"));
    assert_eq!(output["extracted"], json!({"names": ["Jane A Doe"]}));
    assert_eq!(output["screenshot_path"], json!("shots/page.png"));
    let rendered = browser.rendered.lock().unwrap();
    assert_eq!(rendered[0].wait_for.as_deref(), Some("#ready"));
}

#[test]
fn form_submit_passes_resolved_fields() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(browser, transport, mailbox);
    let output = dispatcher
        .execute(
            &call(
                TaskType::FormSubmit,
                json!({
                    "target_id": "site",
                    "url_template": "/optout",
                    "fields": {"email": "agent@expunge.example", "profile": "{{ params.profile_id }}"},
                }),
            ),
            &context(),
        )
        .unwrap();
    assert_eq!(output["success"], json!(true));
    assert_eq!(output["fields_submitted"], json!(["email", "profile"]));
}

// ============================================================================
// SECTION: Email Routing
// ============================================================================

#[test]
fn email_send_uses_transport_and_defaults_subject() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(browser, Arc::clone(&transport), mailbox);
    let output = dispatcher
        .execute(
            &call(
                TaskType::EmailSend,
                json!({"to": "privacy@broker.example", "body": "Please delete my data."}),
            ),
            &context(),
        )
        .unwrap();
    assert_eq!(output["sent"], json!(true));
    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent[0].subject, "Data Removal Request");
}

#[test]
fn email_check_returns_matches_and_links() {
    let (browser, transport, mailbox) = seams();
    mailbox.deliver(
        "noreply@broker.example",
        "Confirm removal",
        "Click https://broker.example/verify?t=9 to confirm",
    );
    let (dispatcher, sleeps) = dispatcher_with(browser, transport, Arc::clone(&mailbox));
    let output = dispatcher
        .execute(
            &call(
                TaskType::EmailCheck,
                json!({
                    "from_filter": "broker.example",
                    "subject_filter": "confirm",
                    "wait_minutes": 5,
                    "extract_links": true,
                }),
            ),
            &context(),
        )
        .unwrap();
    assert_eq!(output["found"], json!(1));
    assert_eq!(output["links"], json!(["https://broker.example/verify?t=9"]));
    // Message was already present, so the deadline never slept.
    assert!(sleeps.lock().unwrap().is_empty());
}

#[test]
fn click_verify_follows_link_ref() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(Arc::clone(&browser), transport, mailbox);
    let output = dispatcher
        .execute(
            &call(TaskType::EmailClickVerify, json!({"link_ref": "verify_mail.links"})),
            &context(),
        )
        .unwrap();
    assert_eq!(output["url"], json!("https://broker.example/verify?t=9"));
    assert_eq!(output["status"], json!(200));
    let rendered = browser.rendered.lock().unwrap();
    assert!(rendered[0].screenshot);
}

// ============================================================================
// SECTION: Matching and Status Routing
// ============================================================================

#[test]
fn match_identity_consumes_extracted_columns() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(browser, transport, mailbox);
    let output = dispatcher
        .execute(
            &call(
                TaskType::MatchIdentity,
                json!({"listings_ref": "scan", "threshold": 0.6}),
            ),
            &context(),
        )
        .unwrap();
    assert_eq!(output["all_results"].as_array().unwrap().len(), 2);
    assert_eq!(output["count"], json!(1));
    let matched = &output["matched"][0];
    assert_eq!(matched["listing"]["name"], json!("Jane A Doe"));
    assert_eq!(matched["above_threshold"], json!(true));
}

#[test]
fn update_status_builds_removal_action_for_submissions() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(browser, transport, mailbox);
    let output = dispatcher
        .execute(
            &call(
                TaskType::BrokerUpdateStatus,
                json!({
                    "broker_id": "peoplelens",
                    "profile_id": "p-1",
                    "status": "removal_submitted",
                    "confidence": 0.91,
                    "action_type": "web_form",
                }),
            ),
            &context(),
        )
        .unwrap();
    assert_eq!(output["status"], json!("removal_submitted"));
    assert!(output["removal_sent_at"].is_i64());
    assert!(output["recheck_after"].is_i64());
    let action = &output["removal_action"];
    assert_eq!(action["action_type"], json!("web_form"));
    assert_eq!(action["response_status"], json!("removal_submitted"));

    let removed = dispatcher
        .execute(
            &call(
                TaskType::BrokerUpdateStatus,
                json!({"broker_id": "peoplelens", "status": "removed"}),
            ),
            &context(),
        )
        .unwrap();
    assert!(removed["recheck_after"].is_null());
    assert!(removed["verified_at"].is_i64());
}

#[test]
fn captcha_solve_wraps_human_queue_with_screenshot() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(browser, transport, mailbox);
    let ctx = ReferenceContext::new(
        json!({}),
        json!({}),
        json!({"page": {"screenshot_path": "shots/captcha.png"}}),
    );
    let output = dispatcher
        .execute(
            &call(
                TaskType::CaptchaSolve,
                json!({"broker_id": "peoplelens", "screenshot_ref": "page"}),
            ),
            &ctx,
        )
        .unwrap();
    assert_eq!(output["action_needed"], json!("solve_captcha"));
    assert_eq!(output["status"], json!("pending"));
    assert_eq!(output["screenshot_path"], json!("shots/captcha.png"));
    assert!(output["queue_id"].as_str().is_some());
}

// ============================================================================
// SECTION: Delay and LLM Routing
// ============================================================================

#[test]
fn short_delays_sleep_inline() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, sleeps) = dispatcher_with(browser, transport, mailbox);
    let output = dispatcher
        .execute(&call(TaskType::WaitDelay, json!({"seconds": 30, "reason": "settle"})), &context())
        .unwrap();
    assert_eq!(output["mode"], json!("inline_sleep"));
    assert_eq!(output["delayed_seconds"], json!(30));
    assert_eq!(sleeps.lock().unwrap().as_slice(), &[std::time::Duration::from_secs(30)]);
}

#[test]
fn long_delays_defer_without_sleeping() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, sleeps) = dispatcher_with(browser, transport, mailbox);
    let output = dispatcher
        .execute(&call(TaskType::WaitDelay, json!({"hours": 2})), &context())
        .unwrap();
    assert_eq!(output["mode"], json!("deferred"));
    assert_eq!(output["delayed_seconds"], json!(7_200));
    assert!(output["resume_at"].is_i64());
    assert!(sleeps.lock().unwrap().is_empty());
}

#[test]
fn llm_json_mock_reads_json_ref() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(browser, transport, mailbox);
    let output = dispatcher
        .execute(
            &call(
                TaskType::LlmJson,
                json!({
                    "prompt": "classify",
                    "json_ref": "scan",
                    "schema": {"type": "object", "required": ["label"],
                               "properties": {"label": {"type": "string"}}},
                }),
            ),
            &context(),
        )
        .unwrap();
    assert_eq!(output["mode"], json!("deterministic_stub"));
    assert_eq!(output["output"], json!({"label": "UNSPECIFIED"}));
    assert!(output["source_excerpt"].as_str().unwrap().contains("Jane A Doe"));
}

#[test]
fn legal_request_renders_from_profile_state() {
    let (browser, transport, mailbox) = seams();
    let (dispatcher, _) = dispatcher_with(browser, transport, mailbox);
    let output = dispatcher
        .execute(
            &call(
                TaskType::LegalGenerateRequest,
                json!({"template_id": "gdpr_erasure", "broker_name": "PeopleLens"}),
            ),
            &context(),
        )
        .unwrap();
    assert_eq!(output["template_id"], json!("gdpr_erasure"));
    assert!(output["body"].as_str().unwrap().contains("Jane Ann Doe"));
    assert!(output["subject"].as_str().unwrap().contains("GDPR"));
}
