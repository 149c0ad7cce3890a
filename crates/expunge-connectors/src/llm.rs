// crates/expunge-connectors/src/llm.rs
// ============================================================================
// Module: LLM JSON Connector
// Description: Deterministic stub and OpenAI-compatible JSON-only calls.
// Purpose: Back llm.json with schema-validated structured output.
// Dependencies: crate::http, expunge-config, expunge-core, jsonschema, serde_json
// ============================================================================

//! ## Overview
//! With the `mock` provider, `llm.json` produces a deterministic placeholder
//! instance derived from the embedded schema (required object properties
//! only) so plans behave identically in tests and dry runs. With an
//! OpenAI-compatible provider, the connector demands JSON-only output, strips
//! markdown fences defensively, and validates the parsed result against the
//! schema before returning it. Provider HTTP failures follow the standard
//! transient-status policy.

// ============================================================================
// SECTION: Imports
// ============================================================================

use jsonschema::Draft;
use serde_json::Value;
use serde_json::json;

use expunge_config::LlmProvider;
use expunge_config::LlmSettings;
use expunge_core::TaskError;

use crate::http::HttpConnector;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Cap on the source excerpt forwarded to the provider.
const MAX_SOURCE_EXCERPT: usize = 12_000;

/// Cap on the source excerpt echoed by the mock provider.
const MAX_STUB_EXCERPT: usize = 400;

/// System prompt demanding JSON-only output.
const SYSTEM_PROMPT: &str =
    "You are a JSON generation engine. Always return one JSON object and nothing else.";

// ============================================================================
// SECTION: Placeholder Generation
// ============================================================================

/// Builds a deterministic placeholder instance for a schema.
///
/// Objects materialize their required properties only; strings become
/// `"UNSPECIFIED"`, numbers `0`, booleans `false`, arrays empty.
#[must_use]
pub fn placeholder_for_schema(schema: &Value) -> Value {
    match schema.get("type").and_then(Value::as_str) {
        Some("string") => Value::String("UNSPECIFIED".to_string()),
        Some("integer" | "number") => json!(0),
        Some("boolean") => json!(false),
        Some("array") => json!([]),
        Some("object") => {
            let required: Vec<&str> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let properties = schema.get("properties").and_then(Value::as_object);
            let mut output = serde_json::Map::new();
            if let Some(properties) = properties {
                for (key, property) in properties {
                    if required.contains(&key.as_str()) {
                        output.insert(key.clone(), placeholder_for_schema(property));
                    }
                }
            }
            Value::Object(output)
        }
        _ => Value::Null,
    }
}

// ============================================================================
// SECTION: Response Parsing
// ============================================================================

/// Strips markdown fences from a model response and parses it as JSON.
///
/// # Errors
///
/// Returns a terminal [`TaskError`] when the content is not valid JSON.
pub fn parse_json_response(content: &str) -> Result<Value, TaskError> {
    let mut text = content.trim();
    if text.starts_with("```") {
        let parts: Vec<&str> = text.split("```").collect();
        if parts.len() >= 3 {
            text = parts[1].trim();
            if let Some(stripped) = text.strip_prefix("json") {
                text = stripped.trim();
            }
        }
    }
    serde_json::from_str(text)
        .map_err(|err| TaskError::permanent(format!("provider returned non-json content: {err}")))
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Executes an `llm.json` call under the configured provider.
///
/// `source` is the resolved `json_ref` value forwarded as context.
///
/// # Errors
///
/// Returns [`TaskError`] — HTTP transience follows the standard status set;
/// schema violations and malformed provider output are terminal.
pub fn execute_llm_json(
    settings: &LlmSettings,
    http: &HttpConnector,
    prompt: &str,
    schema: Option<&Value>,
    source: Option<&Value>,
) -> Result<Value, TaskError> {
    if settings.provider == LlmProvider::Mock {
        let output = schema.map_or_else(
            || json!({"summary": "llm.json executed without external model"}),
            placeholder_for_schema,
        );
        return Ok(json!({
            "mode": "deterministic_stub",
            "output": output,
            "source_excerpt": source.map(|value| excerpt(value, MAX_STUB_EXCERPT)),
        }));
    }

    let endpoint = settings
        .endpoint
        .as_deref()
        .ok_or_else(|| TaskError::permanent("llm endpoint not configured"))?;
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or_else(|| TaskError::permanent("llm api key not configured"))?;
    let model =
        settings.model.as_deref().ok_or_else(|| TaskError::permanent("llm model not configured"))?;

    let schema_json =
        schema.map_or_else(|| "{}".to_string(), |schema| schema.to_string());
    let user_message = format!(
        "Return ONLY JSON that matches the provided schema. Do not include markdown fences or \
         extra commentary.\n\nInstruction:\n{prompt}\n\nSchema:\n{schema_json}\n\nSource \
         excerpt:\n{}",
        source.map(|value| excerpt(value, MAX_SOURCE_EXCERPT)).unwrap_or_default()
    );

    let mut headers = std::collections::BTreeMap::new();
    headers.insert("Authorization".to_string(), format!("Bearer {api_key}"));
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    let body = json!({
        "model": model,
        "temperature": 0,
        "response_format": {"type": "json_object"},
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": user_message},
        ],
    });
    let url = format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'));
    let response = http.request("POST", &url, Some(&headers), None, Some(&body))?;
    if response.status >= 400 {
        return Err(TaskError::http_status(
            format!("llm provider failed status={}", response.status),
            response.status,
        ));
    }
    let Some(payload) = response.json else {
        return Err(TaskError::permanent("llm provider returned non-json body"));
    };
    let content = payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::permanent("llm provider returned no message content"))?;

    let output = parse_json_response(content)?;
    if let Some(schema) = schema {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(schema)
            .map_err(|err| TaskError::permanent(format!("llm schema does not compile: {err}")))?;
        if let Err(violation) = validator.validate(&output) {
            return Err(TaskError::permanent(format!(
                "llm output failed schema validation: {violation}"
            )));
        }
    }
    Ok(json!({"mode": "openai_compatible", "model": model, "output": output}))
}

/// Renders a source value into a capped excerpt string.
fn excerpt(value: &Value, cap: usize) -> String {
    let mut text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    text.truncate(text.char_indices().nth(cap).map_or(text.len(), |(at, _)| at));
    text
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

    use expunge_config::LlmSettings;

    use super::execute_llm_json;
    use super::parse_json_response;
    use super::placeholder_for_schema;
    use crate::http::HttpConnector;

    #[test]
    fn placeholder_materializes_required_properties_only() {
        let schema = json!({
            "type": "object",
            "required": ["is_match", "confidence"],
            "properties": {
                "is_match": {"type": "boolean"},
                "confidence": {"type": "number"},
                "reasoning": {"type": "string"},
            },
        });
        assert_eq!(
            placeholder_for_schema(&schema),
            json!({"is_match": false, "confidence": 0})
        );
    }

    #[test]
    fn fenced_json_is_stripped_before_parsing() {
        let content = "```json\n{\"ok\": true}\n```";
        assert_eq!(parse_json_response(content).unwrap(), json!({"ok": true}));
        assert!(parse_json_response("not json").is_err());
    }

    #[test]
    fn mock_provider_is_deterministic() {
        let settings = LlmSettings::default();
        let http = HttpConnector::new(1_000);
        let schema = json!({"type": "object", "required": ["summary"],
                            "properties": {"summary": {"type": "string"}}});
        let first =
            execute_llm_json(&settings, &http, "summarize", Some(&schema), Some(&json!("text")))
                .unwrap();
        let second =
            execute_llm_json(&settings, &http, "summarize", Some(&schema), Some(&json!("text")))
                .unwrap();
        assert_eq!(first, second);
        assert_eq!(first["mode"], json!("deterministic_stub"));
        assert_eq!(first["output"], json!({"summary": "UNSPECIFIED"}));
    }
}
