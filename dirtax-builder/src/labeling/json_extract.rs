//! JSON object extraction from completion text
//!
//! Models asked for JSON still wrap it in markdown fences or surround it
//! with prose. Extraction is tried in order:
//! 1. The whole (trimmed) text as JSON
//! 2. The body of the first fenced code block
//! 3. The first well-formed JSON object starting at any `{`

use crate::services::ServiceError;
use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

fn expect_object(value: Value) -> Result<JsonObject, ServiceError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ServiceError::Parse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Body of the first ```` ``` ```` block, without the language tag
fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    let close = body.find("```").unwrap_or(body.len());
    Some(body[..close].trim())
}

fn first_embedded_object(text: &str) -> Option<JsonObject> {
    for (pos, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            return Some(map);
        }
    }
    None
}

/// Extract the JSON object a completion was asked to return.
///
/// A text that is itself valid JSON but not an object is rejected rather
/// than searched further.
pub fn parse_json_object(text: &str) -> Result<JsonObject, ServiceError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Parse("empty completion".to_string()));
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return expect_object(value);
    }

    if let Some(body) = fenced_body(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return expect_object(value);
        }
    }

    first_embedded_object(trimmed).ok_or_else(|| {
        let preview: String = trimmed.chars().take(80).collect();
        ServiceError::Parse(format!("no JSON object found in completion: {}", preview))
    })
}
