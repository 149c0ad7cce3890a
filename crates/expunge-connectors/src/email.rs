// crates/expunge-connectors/src/email.rs
// ============================================================================
// Module: Email Connectors
// Description: Mail transport and mailbox seams with an SMTP implementation.
// Purpose: Back email.send and email.check behind swappable interfaces.
// Dependencies: expunge-config, expunge-core, lettre, serde
// ============================================================================

//! ## Overview
//! Outbound mail goes through [`MailTransport`]; the shipped implementation
//! is SMTP over STARTTLS via `lettre`. Inbox search goes through [`Mailbox`];
//! the IMAP backend is deployment-provided, and [`InMemoryMailbox`] ships for
//! tests and dry runs. [`poll_mailbox`] layers the wall-clock polling
//! deadline `email.check` requires over any mailbox. Network failures are
//! transient; configuration gaps are terminal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;

use lettre::Message;
use lettre::SmtpTransport;
use lettre::Transport;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use serde::Serialize;

use expunge_config::AgentEmailSettings;
use expunge_core::TaskError;

// ============================================================================
// SECTION: Messages
// ============================================================================

/// Outbound message from the agent mailbox.
///
/// # Invariants
/// - `to` is a single recipient address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Delivery receipt for an outbound message.
///
/// # Invariants
/// - Returned only after the transport accepted the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Whether the transport accepted the message.
    pub sent: bool,
}

/// Inbound message snapshot returned by mailbox search.
///
/// # Invariants
/// - `links` holds the URLs extracted from the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    /// Sender address.
    pub from_addr: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// URLs extracted from the body.
    pub links: Vec<String>,
}

/// Inbox search filters.
///
/// # Invariants
/// - Filters are case-insensitive substring matches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MailQuery {
    /// Sender filter.
    pub from_filter: Option<String>,
    /// Subject filter.
    pub subject_filter: Option<String>,
}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Outbound mail seam.
pub trait MailTransport: Send + Sync {
    /// Sends one message.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] — transient for transport failures, terminal for
    /// configuration or addressing problems.
    fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TaskError>;
}

/// Inbox search seam.
pub trait Mailbox: Send + Sync {
    /// Returns the messages matching a query.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] — transient for backend failures.
    fn search(&self, query: &MailQuery) -> Result<Vec<InboundMessage>, TaskError>;
}

// ============================================================================
// SECTION: SMTP Transport
// ============================================================================

/// SMTP transport over STARTTLS using the agent mailbox settings.
///
/// # Invariants
/// - Requires `address` and `smtp_host` to be configured.
pub struct SmtpMailTransport {
    /// Agent mailbox settings.
    settings: AgentEmailSettings,
}

impl SmtpMailTransport {
    /// Creates a transport from agent mailbox settings.
    #[must_use]
    pub const fn new(settings: AgentEmailSettings) -> Self {
        Self {
            settings,
        }
    }
}

impl MailTransport for SmtpMailTransport {
    fn send(&self, email: &OutboundEmail) -> Result<SendReceipt, TaskError> {
        if self.settings.address.is_empty() || self.settings.smtp_host.is_empty() {
            return Err(TaskError::permanent("agent email is not configured"));
        }
        let message = Message::builder()
            .from(
                self.settings
                    .address
                    .parse()
                    .map_err(|err| TaskError::permanent(format!("invalid from address: {err}")))?,
            )
            .to(email
                .to
                .parse()
                .map_err(|err| TaskError::permanent(format!("invalid recipient: {err}")))?)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())
            .map_err(|err| TaskError::permanent(format!("message build failed: {err}")))?;

        let transport = SmtpTransport::starttls_relay(&self.settings.smtp_host)
            .map_err(|err| TaskError::transient(format!("smtp relay setup failed: {err}")))?
            .port(self.settings.smtp_port)
            .credentials(Credentials::new(
                self.settings.address.clone(),
                self.settings.password.clone(),
            ))
            .build();
        transport
            .send(&message)
            .map_err(|err| TaskError::transient(format!("smtp send failed: {err}")))?;
        Ok(SendReceipt {
            to: email.to.clone(),
            subject: email.subject.clone(),
            sent: true,
        })
    }
}

// ============================================================================
// SECTION: In-Memory Mailbox
// ============================================================================

/// In-memory mailbox for tests and deployments without IMAP wired.
///
/// # Invariants
/// - Messages are matched with case-insensitive substring filters.
#[derive(Debug, Default)]
pub struct InMemoryMailbox {
    /// Stored messages.
    messages: Mutex<Vec<InboundMessage>>,
}

impl InMemoryMailbox {
    /// Creates an empty mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a message into the mailbox, extracting body links.
    pub fn deliver(&self, from_addr: &str, subject: &str, body: &str) {
        let message = InboundMessage {
            from_addr: from_addr.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            links: extract_links(body),
        };
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }
}

impl Mailbox for InMemoryMailbox {
    fn search(&self, query: &MailQuery) -> Result<Vec<InboundMessage>, TaskError> {
        let messages = self
            .messages
            .lock()
            .map_err(|_| TaskError::permanent("mailbox mutex poisoned"))?;
        Ok(messages
            .iter()
            .filter(|message| {
                let from_ok = query.from_filter.as_deref().is_none_or(|filter| {
                    message.from_addr.to_lowercase().contains(&filter.to_lowercase())
                });
                let subject_ok = query.subject_filter.as_deref().is_none_or(|filter| {
                    message.subject.to_lowercase().contains(&filter.to_lowercase())
                });
                from_ok && subject_ok
            })
            .cloned()
            .collect())
    }
}

// ============================================================================
// SECTION: Polling
// ============================================================================

/// Polls a mailbox until messages match or the wall-clock deadline passes.
///
/// A zero `wait_minutes` performs a single search. The sleep function is
/// injectable so tests never block.
///
/// # Errors
///
/// Returns [`TaskError`] from the underlying mailbox.
pub fn poll_mailbox(
    mailbox: &dyn Mailbox,
    query: &MailQuery,
    wait_minutes: u64,
    poll_interval_seconds: u64,
    mut sleep: impl FnMut(Duration),
) -> Result<Vec<InboundMessage>, TaskError> {
    let mut remaining_ms = wait_minutes.saturating_mul(60_000);
    loop {
        let messages = mailbox.search(query)?;
        if !messages.is_empty() || remaining_ms == 0 {
            return Ok(messages);
        }
        let step_ms = poll_interval_seconds.max(1).saturating_mul(1_000).min(remaining_ms);
        sleep(Duration::from_millis(step_ms));
        remaining_ms -= step_ms;
    }
}

/// Extracts `http(s)` URLs from a text body.
#[must_use]
pub fn extract_links(body: &str) -> Vec<String> {
    let mut links = Vec::new();
    for token in body.split(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '"' | '\'')) {
        let trimmed = token.trim_end_matches([')', ']', ',', '.', ';']);
        if (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
            && !links.iter().any(|existing| existing == trimmed)
        {
            links.push(trimmed.to_string());
        }
    }
    links
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

    use std::time::Duration;

    use super::InMemoryMailbox;
    use super::MailQuery;
    use super::Mailbox;
    use super::extract_links;
    use super::poll_mailbox;

    #[test]
    fn filters_match_case_insensitively() {
        let mailbox = InMemoryMailbox::new();
        mailbox.deliver("noreply@broker.example", "Confirm your opt-out", "click here");
        mailbox.deliver("other@elsewhere.example", "Newsletter", "hi");

        let query = MailQuery {
            from_filter: Some("BROKER.example".to_string()),
            subject_filter: Some("opt-out".to_string()),
        };
        let found = mailbox.search(&query).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subject, "Confirm your opt-out");
    }

    #[test]
    fn links_are_extracted_and_deduplicated() {
        let body = "Verify: https://broker.example/verify?t=1.\n\
                    Again https://broker.example/verify?t=1 or http://alt.example/x)";
        let links = extract_links(body);
        assert_eq!(links, vec![
            "https://broker.example/verify?t=1".to_string(),
            "http://alt.example/x".to_string(),
        ]);
    }

    #[test]
    fn polling_sleeps_until_deadline_then_returns_empty() {
        let mailbox = InMemoryMailbox::new();
        let mut slept = Vec::new();
        let found = poll_mailbox(&mailbox, &MailQuery::default(), 1, 30, |duration| {
            slept.push(duration);
        })
        .unwrap();
        assert!(found.is_empty());
        assert_eq!(slept, vec![Duration::from_millis(30_000), Duration::from_millis(30_000)]);
    }

    #[test]
    fn polling_stops_on_first_match() {
        let mailbox = InMemoryMailbox::new();
        mailbox.deliver("a@b.example", "hello", "https://x.example/1");
        let mut sleeps = 0;
        let found = poll_mailbox(&mailbox, &MailQuery::default(), 5, 30, |_| sleeps += 1).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(sleeps, 0);
        assert_eq!(found[0].links, vec!["https://x.example/1".to_string()]);
    }
}
