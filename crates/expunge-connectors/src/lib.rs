// crates/expunge-connectors/src/lib.rs
// ============================================================================
// Module: Expunge Connectors Library
// Description: Task handlers and the dispatcher for every plan task type.
// Purpose: Map task types to handlers behind narrow, swappable interfaces.
// Dependencies: expunge-core, expunge-config, jsonschema, lettre, reqwest,
// scraper, strsim, tracing, url, uuid
// ============================================================================

//! ## Overview
//! Every plan task type resolves to a handler here. Handlers that touch the
//! outside world sit behind traits ([`browser::BrowserDriver`],
//! [`email::MailTransport`], [`email::Mailbox`]) so deployments can swap the
//! JS-rendering browser or the IMAP backend without touching the engine.
//! Handlers classify their own failures as transient or terminal; the retry
//! controller in the engine is the only place that loops.
//!
//! Security posture: task inputs, fetched HTML, and inbound mail are
//! untrusted. Outbound HTTP refuses private-network targets.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod browser;
pub mod dates;
pub mod discover;
pub mod dispatcher;
pub mod email;
pub mod http;
pub mod identity;
pub mod legal;
pub mod llm;
pub mod scrape;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use browser::BrowserDriver;
pub use browser::FetchBrowser;
pub use browser::FormSubmitOutcome;
pub use browser::FormSubmitRequest;
pub use browser::PageAction;
pub use browser::RateLimiter;
pub use browser::RenderRequest;
pub use browser::RenderedPage;
pub use dispatcher::ConnectorDispatcher;
pub use dispatcher::DispatcherSettings;
pub use email::InMemoryMailbox;
pub use email::InboundMessage;
pub use email::MailQuery;
pub use email::MailTransport;
pub use email::Mailbox;
pub use email::OutboundEmail;
pub use email::SmtpMailTransport;
pub use http::HttpConnector;
pub use http::HttpResponse;
