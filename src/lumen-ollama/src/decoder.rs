//! Classification of Ollama stream records.
//!
//! Upstream records are loosely typed: every field may be missing and counters
//! are plain JSON numbers. All coercion happens here so that nothing
//! downstream has to look at raw JSON again.

use lumen_protocol::CompletionCounters;
use serde_json::{Map, Value};
use tracing::{trace, warn};

/// One decoded upstream record.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// Incremental generated text.
    ContentDelta { text: String },
    /// Final record (`done: true`).
    ///
    /// `trailing_text` holds any non-empty content carried on the same line.
    Completion {
        counters: CompletionCounters,
        trailing_text: Option<String>,
    },
    /// Valid JSON that carries nothing we use.
    Unrecognized,
}

/// Decode one line of an Ollama NDJSON stream.
///
/// Returns `None` for lines that are not JSON objects; such lines are noise
/// (keep-alives, proxies) and are never an error.
pub fn decode_line(line: &str) -> Option<UpstreamEvent> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            trace!(error = %e, len = line.len(), "Dropping non-JSON upstream line");
            return None;
        }
    };

    let Some(object) = value.as_object() else {
        trace!("Dropping non-object upstream line");
        return None;
    };

    let text = content_of(object);
    let done = object.get("done").and_then(Value::as_bool).unwrap_or(false);

    if done {
        return Some(UpstreamEvent::Completion {
            counters: counters_of(object),
            trailing_text: text.map(str::to_string),
        });
    }

    match text {
        Some(text) => Some(UpstreamEvent::ContentDelta {
            text: text.to_string(),
        }),
        None => {
            if let Some(message) = object.get("error").and_then(Value::as_str) {
                warn!(error = %message, "Upstream reported an error record");
            }
            Some(UpstreamEvent::Unrecognized)
        }
    }
}

/// Non-empty `message.content`, or the generate-style `response` field.
fn content_of(object: &Map<String, Value>) -> Option<&str> {
    object
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .or_else(|| object.get("response").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
}

fn counters_of(object: &Map<String, Value>) -> CompletionCounters {
    CompletionCounters {
        eval_count: counter(object, "eval_count"),
        eval_duration: counter(object, "eval_duration"),
        prompt_eval_count: counter(object, "prompt_eval_count"),
        prompt_eval_duration: counter(object, "prompt_eval_duration"),
        total_duration: counter(object, "total_duration"),
    }
}

fn counter(object: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = object.get(key)?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n as u64)
    })
}
