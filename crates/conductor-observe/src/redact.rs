//! Secret masking for anything that reaches a session file or an exported
//! correlation context.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;

pub const REDACTED: &str = "[REDACTED]";

static SENSITIVE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(password|passwd|secret|token|api[_-]?key|authorization|cookie|credential|private[_-]?key)",
    )
    .unwrap_or_else(|e| panic!("invalid sensitive key pattern: {e}"))
});

static BEARER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(bearer)\s+[A-Za-z0-9._~+/=-]+")
        .unwrap_or_else(|e| panic!("invalid bearer pattern: {e}"))
});

static KEY_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|passwd|secret|token|api[_-]?key)\s*([=:])\s*[^\s,;&]+")
        .unwrap_or_else(|e| panic!("invalid assignment pattern: {e}"))
});

static PREFIXED_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:sk|pk|ghp|gho|xox[abp])[-_][A-Za-z0-9_-]{8,}")
        .unwrap_or_else(|e| panic!("invalid key pattern: {e}"))
});

/// Whether a structured field name looks like it holds a secret
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY.is_match(key)
}

/// Mask secrets embedded in free text
pub fn redact_text(text: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(text);
    if BEARER.is_match(&out) {
        out = Cow::Owned(BEARER.replace_all(&out, "$1 [REDACTED]").into_owned());
    }
    if KEY_ASSIGNMENT.is_match(&out) {
        out = Cow::Owned(
            KEY_ASSIGNMENT
                .replace_all(&out, "$1$2[REDACTED]")
                .into_owned(),
        );
    }
    if PREFIXED_KEY.is_match(&out) {
        out = Cow::Owned(PREFIXED_KEY.replace_all(&out, REDACTED).into_owned());
    }
    out
}

/// Recursively mask sensitive fields and secret-looking strings
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, inner) in map {
                let masked = if is_sensitive_key(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    redact_value(inner)
                };
                out.insert(key.clone(), masked);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(s).into_owned()),
        other => other.clone(),
    }
}
