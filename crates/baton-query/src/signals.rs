//! Keyword signals mined from free-text payload content.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use baton_core::model::LedgerRecord;

const RELIABILITY: &[&str] = &[
    "error", "exception", "fail", "failed", "timeout", "retry", "fallback", "missing", "invalid",
    "crash",
];
const DEBATE: &[&str] = &[
    "disagree", "conflict", "counter", "challenge", "argue", "risk", "tradeoff", "compromise",
    "blocked",
];
const DECISION: &[&str] = &[
    "decide", "decision", "approved", "rejected", "selected", "deploy", "final", "resolved",
];
const CONTEXT: &[&str] = &[
    "context", "handoff", "window", "summary", "resume", "continuity", "memory", "drift",
];
const SECURITY: &[&str] = &[
    "secret", "token", "auth", "redacted", "permission", "malicious", "access", "credential",
];

/// Keyword hit counts. Hits are substring occurrences, so `failed` counts
/// for both `fail` and `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSignals {
    pub reliability_hits: usize,
    pub debate_hits: usize,
    pub decision_hits: usize,
    pub context_hits: usize,
    pub security_hits: usize,
    /// Whitespace-separated words across all payloads.
    pub payload_token_estimate: usize,
}

impl PayloadSignals {
    pub fn collect<'a>(records: impl IntoIterator<Item = &'a LedgerRecord>) -> Self {
        let mut signals = Self::default();
        for record in records {
            let mut text = String::new();
            flatten_map(&record.envelope.payload, &mut text);
            let lowered = text.to_lowercase();
            signals.payload_token_estimate += lowered.split_whitespace().count();
            signals.reliability_hits += hits(&lowered, RELIABILITY);
            signals.debate_hits += hits(&lowered, DEBATE);
            signals.decision_hits += hits(&lowered, DECISION);
            signals.context_hits += hits(&lowered, CONTEXT);
            signals.security_hits += hits(&lowered, SECURITY);
        }
        signals
    }
}

fn hits(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().map(|k| text.matches(k).count()).sum()
}

fn flatten_map(map: &serde_json::Map<String, Value>, out: &mut String) {
    for (key, value) in map {
        push_word(out, key);
        flatten(value, out);
    }
}

/// Keys and scalar values, space separated, depth first.
fn flatten(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => flatten_map(map, out),
        Value::Array(items) => items.iter().for_each(|v| flatten(v, out)),
        Value::String(s) => push_word(out, s),
        Value::Null => {}
        other => push_word(out, &other.to_string()),
    }
}

fn push_word(out: &mut String, word: &str) {
    if word.is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push(' ');
    }
    out.push_str(word);
}
