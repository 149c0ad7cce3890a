// crates/expunge-connectors/tests/http_connector.rs
// ============================================================================
// Module: HTTP Connector Tests
// Description: Connector behavior against a local test server.
// ============================================================================
//! ## Overview
//! Exercises the blocking HTTP connector against a `tiny_http` server:
//! response decoding, error-status passthrough, and the private-network
//! guard.

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

use std::thread;

use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

use expunge_connectors::HttpConnector;

/// Starts a one-shot server returning `status` with a JSON body.
fn serve_once(status: u16, body: &'static str) -> String {
    let server = Server::http("127.0.0.1:0").expect("bind test server");
    let address = format!("http://{}", server.server_addr());
    thread::spawn(move || {
        if let Ok(request) = server.recv() {
            let header: Header = "Content-Type: application/json".parse().expect("header");
            let response =
                Response::from_string(body).with_status_code(status).with_header(header);
            let _ = request.respond(response);
        }
    });
    address
}

#[test]
fn decodes_json_bodies_and_headers() {
    let address = serve_once(200, "{\"ok\": true}");
    let connector = HttpConnector::new(5_000).with_private_networks();
    let response = connector.request("GET", &format!("{address}/x"), None, None, None).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.json, Some(serde_json::json!({"ok": true})));
    assert_eq!(response.headers.get("content-type").map(String::as_str), Some("application/json"));
}

#[test]
fn error_statuses_are_returned_not_raised() {
    let address = serve_once(503, "busy");
    let connector = HttpConnector::new(5_000).with_private_networks();
    let response = connector.request("GET", &address, None, None, None).unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.text, "busy");
    assert!(response.json.is_none());
}

#[test]
fn loopback_is_refused_without_the_override() {
    let connector = HttpConnector::new(5_000);
    let error =
        connector.request("GET", "http://127.0.0.1:9/never", None, None, None).unwrap_err();
    assert!(!error.is_transient());
}
