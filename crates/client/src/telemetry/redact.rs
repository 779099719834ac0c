//! Redaction of sensitive fields before anything reaches the request log.

use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Field-name fragments that mark a value as sensitive. Matching is
/// case-insensitive substring containment, which errs toward over-redaction.
const SENSITIVE_MARKERS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "secret",
    "key",
    "authorization",
    "cookie",
    "card",
    "cvv",
    "cvc",
    "ssn",
];

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| key.contains(marker))
}

/// Return a copy of `value` with every sensitive field replaced by
/// [`REDACTED`], recursively through nested objects and arrays.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = if is_sensitive_key(key) {
                        Value::String(REDACTED.to_string())
                    } else {
                        redact_value(value)
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}
