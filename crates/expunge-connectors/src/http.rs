// crates/expunge-connectors/src/http.rs
// ============================================================================
// Module: HTTP Connector
// Description: Blocking HTTP client with a private-network guard.
// Purpose: Back http.request, llm.json, and discovery fetches.
// Dependencies: expunge-core, reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! Outbound HTTP enforces a strict policy before any connection: only `http`
//! and `https` schemes, no credential-bearing URLs, and no hosts that resolve
//! to loopback, private, or link-local addresses. Redirects are followed but
//! every hop is re-validated. Response bodies are capped. Network failures
//! and the standard transient status set are classified retryable; policy
//! violations are terminal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Read;
use std::net::IpAddr;
use std::net::ToSocketAddrs;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde_json::Value;
use url::Url;

use expunge_core::TaskError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default response-body cap in bytes.
const DEFAULT_MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

/// User agent attached to outbound requests.
const USER_AGENT: &str = "expunge/0.1";

// ============================================================================
// SECTION: URL Policy
// ============================================================================

/// Validates scheme, credentials, and resolved peers for a URL.
///
/// # Errors
///
/// Returns a terminal [`TaskError`] naming the violated rule.
pub fn validate_url(url: &Url, allow_private_networks: bool) -> Result<(), TaskError> {
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(TaskError::permanent(format!("url scheme not allowed: {other}"))),
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(TaskError::permanent("urls with embedded credentials are not allowed"));
    }
    if allow_private_networks {
        return Ok(());
    }
    let Some(host) = url.host_str() else {
        return Err(TaskError::permanent("url has no host"));
    };
    if let Ok(literal) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return check_peer(host, literal);
    }
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| TaskError::transient(format!("dns resolution failed for {host}: {err}")))?;
    for addr in addrs {
        check_peer(host, addr.ip())?;
    }
    Ok(())
}

/// Rejects loopback, private, link-local, and unspecified peers.
fn check_peer(host: &str, ip: IpAddr) -> Result<(), TaskError> {
    let blocked = match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    };
    if blocked {
        return Err(TaskError::permanent(format!("{host} resolves to blocked address {ip}")));
    }
    Ok(())
}

// ============================================================================
// SECTION: Connector
// ============================================================================

/// HTTP response snapshot handed to task handlers.
///
/// # Invariants
/// - `text` is capped by the connector's response limit.
/// - `json` is `Some` only when the body parses as JSON.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final response status.
    pub status: u16,
    /// Response headers (last value wins on duplicates).
    pub headers: BTreeMap<String, String>,
    /// Body text.
    pub text: String,
    /// Body parsed as JSON, when it is JSON.
    pub json: Option<Value>,
}

/// Blocking HTTP connector with the outbound policy applied.
///
/// # Invariants
/// - Every redirect hop is re-validated against the URL policy.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    /// Per-request timeout in milliseconds.
    timeout_ms: u64,
    /// Response-body cap in bytes.
    max_response_bytes: usize,
    /// Allow private-network targets (tests and lab deployments only).
    allow_private_networks: bool,
}

impl HttpConnector {
    /// Creates a connector with the given request timeout.
    #[must_use]
    pub const fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            allow_private_networks: false,
        }
    }

    /// Returns this connector with private-network targets allowed.
    #[must_use]
    pub const fn with_private_networks(mut self) -> Self {
        self.allow_private_networks = true;
        self
    }

    /// Issues a request with an optional JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] — transient for network failures, terminal for
    /// policy violations. HTTP error statuses are returned as responses, not
    /// errors; handlers classify them.
    pub fn request(
        &self,
        method: &str,
        url: &str,
        headers: Option<&BTreeMap<String, String>>,
        query: Option<&BTreeMap<String, String>>,
        json_body: Option<&Value>,
    ) -> Result<HttpResponse, TaskError> {
        self.send(method, url, headers, query, json_body, None)
    }

    /// Issues a request with a form-encoded body.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError`] under the same classification as [`Self::request`].
    pub fn request_form(
        &self,
        method: &str,
        url: &str,
        form: &BTreeMap<String, String>,
    ) -> Result<HttpResponse, TaskError> {
        self.send(method, url, None, None, None, Some(form))
    }

    /// Shared request path.
    fn send(
        &self,
        method: &str,
        url: &str,
        headers: Option<&BTreeMap<String, String>>,
        query: Option<&BTreeMap<String, String>>,
        json_body: Option<&Value>,
        form_body: Option<&BTreeMap<String, String>>,
    ) -> Result<HttpResponse, TaskError> {
        let parsed =
            Url::parse(url).map_err(|err| TaskError::permanent(format!("invalid url: {err}")))?;
        validate_url(&parsed, self.allow_private_networks)?;

        let allow_private = self.allow_private_networks;
        let redirect_policy = Policy::custom(move |attempt| {
            if attempt.previous().len() > 5 {
                return attempt.error("too many redirects");
            }
            match validate_url(attempt.url(), allow_private) {
                Ok(()) => attempt.follow(),
                Err(error) => attempt.error(error.message().to_string()),
            }
        });
        let client = Client::builder()
            .timeout(Duration::from_millis(self.timeout_ms))
            .redirect(redirect_policy)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| TaskError::permanent(format!("http client build failed: {err}")))?;

        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| TaskError::permanent(format!("invalid http method: {method}")))?;
        let mut request = client.request(method, parsed);
        if let Some(headers) = headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(query) = query {
            request = request.query(&query.iter().collect::<Vec<_>>());
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }
        if let Some(form) = form_body {
            request = request.form(&form.iter().collect::<Vec<_>>());
        }

        let response = request.send().map_err(|err| {
            if err.is_timeout() {
                TaskError::transient(format!("http request timed out: {err}"))
            } else if err.is_redirect() {
                TaskError::permanent(format!("redirect refused: {err}"))
            } else {
                TaskError::transient(format!("http request failed: {err}"))
            }
        })?;

        let status = response.status().as_u16();
        let mut header_map = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(text) = value.to_str() {
                header_map.insert(name.as_str().to_string(), text.to_string());
            }
        }
        let body = self.read_capped(response)?;
        let text = String::from_utf8_lossy(&body).into_owned();
        let json = serde_json::from_str(&text).ok();
        Ok(HttpResponse {
            status,
            headers: header_map,
            text,
            json,
        })
    }

    /// Reads a response body up to the configured cap.
    fn read_capped(&self, response: reqwest::blocking::Response) -> Result<Vec<u8>, TaskError> {
        let cap = self.max_response_bytes;
        let mut buffer = Vec::new();
        let mut limited = response.take(u64::try_from(cap).unwrap_or(u64::MAX) + 1);
        limited
            .read_to_end(&mut buffer)
            .map_err(|err| TaskError::transient(format!("http body read failed: {err}")))?;
        if buffer.len() > cap {
            return Err(TaskError::permanent(format!("response exceeds {cap} byte cap")));
        }
        Ok(buffer)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
