//! Inbound frame decoding.
//!
//! The gateway pushes JSON objects whose kind is implied by which keys are
//! present. They are decoded once here into [`Frame`] values; the session never
//! inspects raw JSON.

use serde::Serialize;
use serde_json::{Map, Value};

/// Token usage and latency reported by the gateway. Each report replaces the last.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub latency_ms: u64,
}

impl Metrics {
    /// Output tokens per second over the reported latency, if any latency was reported.
    pub fn output_tokens_per_second(&self) -> Option<f64> {
        (self.latency_ms > 0).then(|| self.output_tokens as f64 * 1000.0 / self.latency_ms as f64)
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Content(String),
    Reasoning(String),
    ReasoningRedacted,
    Metrics(Metrics),
    Error(String),
    EndOfStream,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content(_) => "content",
            Self::Reasoning(_) => "reasoning",
            Self::ReasoningRedacted => "reasoning_redacted",
            Self::Metrics(_) => "metrics",
            Self::Error(_) => "error",
            Self::EndOfStream => "end_of_stream",
        }
    }
}

const UNKNOWN_ERROR: &str = "unknown error";

/// Decode one text message into the frames it carries, in dispatch order.
///
/// Only text that is not JSON at all becomes a raw [`Frame::Content`]. Fields of
/// a JSON object are read one by one, so a field of an unexpected type is
/// skipped without losing the rest. Non-object JSON is ignored.
/// An error object yields only the error, whatever else it carries.
pub fn decode(text: &str) -> Vec<Frame> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(bytes = text.len(), "unparseable frame appended as raw content: {e}");
            return vec![Frame::Content(text.to_string())];
        }
    };
    let Some(obj) = value.as_object() else {
        tracing::debug!("frame is not a JSON object, ignoring");
        return Vec::new();
    };

    if obj.get("action").and_then(Value::as_str) == Some("error") {
        let message = obj
            .get("error")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(UNKNOWN_ERROR);
        return vec![Frame::Error(message.to_string())];
    }

    let mut frames = Vec::new();

    if let Some(text) = text_field(obj, &["thinking", "reasoning"]) {
        frames.push(Frame::Reasoning(text));
    }
    if flag(obj, &["redactedThinking", "redacted"]) {
        frames.push(Frame::ReasoningRedacted);
    }
    if let Some(text) = text_field(obj, &["messages", "content"]) {
        frames.push(Frame::Content(text));
    }
    if let Some(m) = obj.get("metrics").and_then(Value::as_object) {
        let usage = m.get("usage").and_then(Value::as_object);
        frames.push(Frame::Metrics(Metrics {
            input_tokens: count(usage.and_then(|u| first(u, &["inputTokens", "inputTokenCount"]))),
            output_tokens: count(usage.and_then(|u| first(u, &["outputTokens", "outputTokenCount"]))),
            latency_ms: count(first(m, &["latencyMs", "invocationLatency"])),
        }));
    }
    if flag(obj, &["endOfMessage"]) {
        frames.push(Frame::EndOfStream);
    }

    if frames.is_empty() {
        tracing::debug!("frame carried no recognized fields, ignoring");
    }
    frames
}

/// First present, non-null value among `keys`.
fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    first(obj, keys)
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// JavaScript-style truthiness: `true`, non-zero numbers, non-empty strings,
/// and any array or object.
fn flag(obj: &Map<String, Value>, keys: &[&str]) -> bool {
    match first(obj, keys) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Non-negative integer count; fractional values are rounded, anything else is 0.
fn count(value: Option<&Value>) -> u64 {
    value
        .and_then(|v| {
            v.as_u64().or_else(|| {
                v.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0)
                    .map(|f| f.round() as u64)
            })
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_truthiness() {
        let obj = serde_json::json!({"a": 1, "b": 0, "c": "", "d": "yes", "e": null, "f": []});
        let obj = obj.as_object().unwrap();
        assert!(flag(obj, &["a"]));
        assert!(!flag(obj, &["b"]));
        assert!(!flag(obj, &["c"]));
        assert!(flag(obj, &["d"]));
        assert!(!flag(obj, &["e"]));
        assert!(flag(obj, &["f"]));
        assert!(!flag(obj, &["missing"]));
    }

    #[test]
    fn counts_accept_floats_and_skip_garbage() {
        assert_eq!(count(Some(&serde_json::json!(12.5))), 13);
        assert_eq!(count(Some(&serde_json::json!(7))), 7);
        assert_eq!(count(Some(&serde_json::json!(-3))), 0);
        assert_eq!(count(Some(&serde_json::json!("12"))), 0);
        assert_eq!(count(None), 0);
    }

    #[test]
    fn throughput_requires_latency() {
        let m = Metrics {
            input_tokens: 5,
            output_tokens: 100,
            latency_ms: 0,
        };
        assert_eq!(m.output_tokens_per_second(), None);

        let m = Metrics {
            latency_ms: 2000,
            ..m
        };
        assert_eq!(m.output_tokens_per_second(), Some(50.0));
        assert_eq!(m.total_tokens(), 105);
    }
}
