use serde_json::{Map, Value};

use crate::explorer::json_kind;

/// Why a model reply could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("reply was empty")]
    Empty,

    #[error("reply is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("reply is {0}, expected a JSON object")]
    NotAnObject(&'static str),
}

/// Read a model reply as exactly one JSON object.
///
/// Surrounding whitespace and a single Markdown code fence (with or without a
/// language tag) are tolerated. Nothing else is: prose before or after the
/// object is rejected.
pub fn parse_object(reply: &str) -> Result<Map<String, Value>, ParseError> {
    let body = strip_fence(reply.trim());
    if body.is_empty() {
        return Err(ParseError::Empty);
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ParseError::NotAnObject(json_kind(&other))),
        Err(e) => Err(ParseError::InvalidJson(e.to_string())),
    }
}

fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return text;
    };
    // A `json` tag may run straight into the body with no newline.
    if let Some(body) = inner
        .strip_prefix("json")
        .filter(|b| !b.starts_with(|c: char| c.is_ascii_alphanumeric()))
    {
        return body.trim();
    }
    // Drop any other info string on the opening line.
    match inner.find('\n') {
        Some(nl) => inner[nl + 1..].trim(),
        None => inner.trim(),
    }
}
