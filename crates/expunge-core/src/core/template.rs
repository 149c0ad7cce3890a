// crates/expunge-core/src/core/template.rs
// ============================================================================
// Module: Expunge Reference Templates
// Description: `{{ path }}` substitution over the run reference context.
// Purpose: Resolve task-input references without expression evaluation.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Task inputs may reference launch params, plan targets, and the outputs of
//! already-succeeded tasks through `{{ path }}` placeholders. The grammar is
//! deliberately small: dot-separated identifiers with optional `[index]`
//! array access. Missing paths render as empty strings; resolution is deep
//! over objects and arrays. There is no expression evaluation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Path Grammar
// ============================================================================

/// One segment of a reference path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    /// Object key lookup.
    Key(String),
    /// Array index lookup.
    Index(usize),
}

/// Parses a dotted reference path into segments.
///
/// Accepted characters are alphanumerics, `_`, `-`, `.`, and `[index]`
/// suffixes. Returns `None` for empty or malformed paths.
fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        if part.is_empty() {
            return None;
        }
        let (head, indexes) = match part.find('[') {
            Some(at) => part.split_at(at),
            None => (part, ""),
        };
        if !head.is_empty() {
            if !head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return None;
            }
            segments.push(PathSegment::Key(head.to_string()));
        }
        let mut rest = indexes;
        while !rest.is_empty() {
            let close = rest.find(']')?;
            let digits = rest.get(1..close)?;
            let index: usize = digits.parse().ok()?;
            segments.push(PathSegment::Index(index));
            rest = rest.get(close + 1..)?;
        }
    }
    if segments.is_empty() { None } else { Some(segments) }
}

/// Navigates a value along parsed path segments.
fn navigate<'v>(root: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    let mut current = root;
    for segment in segments {
        current = match segment {
            PathSegment::Key(key) => current.as_object()?.get(key)?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

// ============================================================================
// SECTION: Reference Context
// ============================================================================

/// Resolution context exposing `params`, `targets`, and `state`.
///
/// # Invariants
/// - `state` carries outputs of already-succeeded tasks keyed by task id and
///   by `save_as` aliases; earlier writes are never mutated.
#[derive(Debug, Clone, Default)]
pub struct ReferenceContext {
    /// Combined context object navigated by reference paths.
    root: Value,
}

impl ReferenceContext {
    /// Builds a context from launch params, plan targets, and run state.
    #[must_use]
    pub fn new(params: Value, targets: Value, state: Value) -> Self {
        let mut root = Map::new();
        root.insert("params".to_string(), params);
        root.insert("targets".to_string(), targets);
        root.insert("state".to_string(), state);
        Self {
            root: Value::Object(root),
        }
    }

    /// Looks up a reference path, trying bare state keys first.
    ///
    /// A path like `search_results` resolves against `state` directly (the
    /// common case for task-output references); otherwise the path is
    /// navigated from the context root (`params.`, `targets.`, `state.`).
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let segments = parse_path(path)?;
        if let Some(state) = self.root.get("state")
            && let Some(found) = navigate(state, &segments)
        {
            return Some(found);
        }
        navigate(&self.root, &segments)
    }

    /// Renders one string, substituting every `{{ path }}` placeholder.
    ///
    /// Missing paths substitute as empty strings. Non-string scalars render
    /// via their JSON display form.
    #[must_use]
    pub fn render_string(&self, template: &str) -> String {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            let Some(close_offset) = rest[open + 2..].find("}}") else {
                break;
            };
            output.push_str(&rest[..open]);
            let path = &rest[open + 2..open + 2 + close_offset];
            output.push_str(&self.lookup(path).map_or_else(String::new, render_scalar));
            rest = &rest[open + 2 + close_offset + 2..];
        }
        output.push_str(rest);
        output
    }
}

/// Renders a resolved value into its string substitution form.
fn render_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Deeply resolves `{{ path }}` placeholders in a task-input value.
///
/// Strings are rendered; objects and arrays are resolved element-wise; other
/// scalars pass through unchanged.
#[must_use]
pub fn resolve_value(value: &Value, ctx: &ReferenceContext) -> Value {
    match value {
        Value::String(text) => Value::String(ctx.render_string(text)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| resolve_value(item, ctx)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter().map(|(key, item)| (key.clone(), resolve_value(item, ctx))).collect(),
        ),
        other => other.clone(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
