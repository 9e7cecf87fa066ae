//! Best-effort PII detection and redaction for message payloads.
//!
//! Never a compliance gate: a pattern that fails to compile is logged and
//! skipped, and text it would have matched passes through as written.

use std::borrow::Cow;
use std::sync::LazyLock;

use agent_bus_types::Payload;
use regex::Regex;
use serde::Serialize;
use tracing::error;

/// Replacement for every redacted match.
pub const REDACTED: &str = "[REDACTED]";

/// Category of personal data a pattern recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    Ssn,
    CreditCard,
    Phone,
    Ipv4,
}

/// One detected span. Only the location is kept, never the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PiiMatch {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
}

struct PiiPattern {
    kind: PiiKind,
    regex: Regex,
}

static PII_PATTERNS: LazyLock<Vec<PiiPattern>> = LazyLock::new(|| {
    [
        (
            PiiKind::Email,
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        ),
        (PiiKind::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
        (PiiKind::CreditCard, r"\b(?:\d[ -]?){12,15}\d\b"),
        (
            PiiKind::Phone,
            r"(?:\+1[-. ]?)?(?:\(\d{3}\)\s?|\b\d{3}[-. ])\d{3}[-. ]\d{4}\b",
        ),
        (
            PiiKind::Ipv4,
            r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
        ),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| match Regex::new(pattern) {
        Ok(regex) => Some(PiiPattern { kind, regex }),
        Err(e) => {
            error!(?kind, error = %e, "PII pattern failed to compile; skipping");
            None
        }
    })
    .collect()
});

/// All PII spans in `text`, ordered by position, overlaps merged.
///
/// Where spans overlap, the kind of the earliest-starting one is kept.
pub fn detect_pii(text: &str) -> Vec<PiiMatch> {
    let mut found: Vec<PiiMatch> = PII_PATTERNS
        .iter()
        .flat_map(|pattern| {
            pattern.regex.find_iter(text).map(|m| PiiMatch {
                kind: pattern.kind,
                start: m.start(),
                end: m.end(),
            })
        })
        .collect();
    found.sort_by_key(|m| (m.start, std::cmp::Reverse(m.end)));

    let mut merged: Vec<PiiMatch> = Vec::with_capacity(found.len());
    for m in found {
        match merged.last_mut() {
            Some(last) if m.start < last.end => last.end = last.end.max(m.end),
            _ => merged.push(m),
        }
    }
    merged
}

/// `text` with every PII span replaced by [`REDACTED`].
pub fn redact_pii(text: &str) -> Cow<'_, str> {
    let matches = detect_pii(text);
    if matches.is_empty() {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for m in &matches {
        out.push_str(&text[cursor..m.start]);
        out.push_str(REDACTED);
        cursor = m.end;
    }
    out.push_str(&text[cursor..]);
    Cow::Owned(out)
}

/// Redact every string inside a payload, recursively. Returns the number of
/// spans replaced.
pub fn redact_payload(payload: &mut Payload) -> usize {
    payload.values_mut().map(redact_value).sum()
}

fn redact_value(value: &mut serde_json::Value) -> usize {
    match value {
        serde_json::Value::String(s) => {
            let count = detect_pii(s).len();
            if count > 0 {
                *s = redact_pii(s).into_owned();
            }
            count
        }
        serde_json::Value::Array(items) => items.iter_mut().map(redact_value).sum(),
        serde_json::Value::Object(map) => map.values_mut().map(redact_value).sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detects_common_identifiers() {
        let text = "mail jane.doe@example.com, ssn 123-45-6789, card 4111 1111 1111 1111";
        let kinds: Vec<PiiKind> = detect_pii(text).iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![PiiKind::Email, PiiKind::Ssn, PiiKind::CreditCard]);
    }

    #[test]
    fn redaction_replaces_with_marker() {
        let redacted = redact_pii("call (555) 123-4567 or ping 10.0.0.12 today");
        assert_eq!(redacted, "call [REDACTED] or ping [REDACTED] today");
    }

    #[test]
    fn clean_text_is_borrowed() {
        assert!(matches!(redact_pii("nothing to see here"), Cow::Borrowed(_)));
    }

    #[test]
    fn payload_redaction_walks_nested_values() {
        let mut payload = Payload::new();
        payload.insert("contact".into(), json!("ops@example.org"));
        payload.insert(
            "history".into(),
            json!([{"note": "ssn 987-65-4321"}, 42, "plain"]),
        );

        assert_eq!(redact_payload(&mut payload), 2);
        assert_eq!(payload["contact"], json!(REDACTED));
        assert_eq!(payload["history"][0]["note"], json!("ssn [REDACTED]"));
        assert_eq!(payload["history"][2], json!("plain"));
    }
}
