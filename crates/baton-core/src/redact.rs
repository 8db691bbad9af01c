//! Payload sanitization applied to ledger reads and dataset exports.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passphrase",
    "secret",
    "client_secret",
    "api_key",
    "apikey",
    "authorization",
    "access_token",
    "refresh_token",
    "bearer_token",
    "private_key",
];

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)bearer\s+[a-z0-9._\-]+",
        r"(?i)sk-[a-z0-9]{12,}",
        r"(?i)(api[_\-]?key|password|secret)\s*[:=]\s*[\w\-]+",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&normalized.as_str())
}

/// Replace secret-looking substrings in free text.
pub fn redact_text(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in SECRET_PATTERNS.iter() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, REDACTED).into_owned();
        }
    }
    out
}

/// Redact a payload map: sensitive keys are blanked whole, strings elsewhere
/// are scanned for secret patterns. Non-string scalars are kept as-is.
pub fn redact_payload(payload: &Map<String, Value>) -> Map<String, Value> {
    payload
        .iter()
        .map(|(key, value)| {
            let redacted = if is_sensitive_key(key) {
                Value::String(REDACTED.to_string())
            } else {
                redact_value(value)
            };
            (key.clone(), redacted)
        })
        .collect()
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_payload(map)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(s)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sensitive_keys_are_blanked_recursively() {
        let payload = json!({
            "step": 2,
            "api_key": "sk-super-secret-value",
            "nested": {"Password": "hunter2", "ok": "fine"},
            "list": [{"access_token": "abc"}]
        });
        let Value::Object(map) = payload else { unreachable!() };
        let out = Value::Object(redact_payload(&map));
        assert_eq!(out["step"], json!(2));
        assert_eq!(out["api_key"], json!(REDACTED));
        assert_eq!(out["nested"]["Password"], json!(REDACTED));
        assert_eq!(out["nested"]["ok"], json!("fine"));
        assert_eq!(out["list"][0]["access_token"], json!(REDACTED));
    }

    #[test]
    fn test_secret_values_are_scrubbed_from_text() {
        assert_eq!(
            redact_text("use Bearer abc.def-123 now"),
            format!("use {REDACTED} now")
        );
        assert_eq!(redact_text("key sk-abcdefghijklmnop"), format!("key {REDACTED}"));
        assert_eq!(redact_text("password=letmein"), REDACTED);
        assert_eq!(redact_text("nothing to see"), "nothing to see");
    }
}
