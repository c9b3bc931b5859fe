//! Generation statistics derived from the inference server's counters.

use serde::{Deserialize, Serialize};

const NANOS_PER_SECOND: f64 = 1e9;

/// Raw counters reported on the inference server's final record.
///
/// Every field is optional; durations are in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionCounters {
    pub eval_count: Option<u64>,
    pub eval_duration: Option<u64>,
    pub prompt_eval_count: Option<u64>,
    pub prompt_eval_duration: Option<u64>,
    pub total_duration: Option<u64>,
}

/// Summary of one completed generation, as shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_time_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_time_seconds: Option<f64>,
}

impl GenerationStats {
    /// Derive display statistics from raw counters.
    ///
    /// Throughput fields are `count / seconds` rounded to one decimal and are
    /// left out whenever the count is missing or the duration is missing or
    /// zero.
    pub fn from_counters(counters: &CompletionCounters) -> Self {
        Self {
            tokens_per_second: throughput(counters.eval_count, counters.eval_duration),
            prompt_tokens_per_second: throughput(
                counters.prompt_eval_count,
                counters.prompt_eval_duration,
            ),
            total_tokens: counters.eval_count,
            prompt_tokens: counters.prompt_eval_count,
            generation_time_seconds: counters.eval_duration.map(nanos_to_seconds),
            total_time_seconds: counters.total_duration.map(nanos_to_seconds),
        }
    }

    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn nanos_to_seconds(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_SECOND
}

fn throughput(count: Option<u64>, duration_nanos: Option<u64>) -> Option<f64> {
    let count = count?;
    let nanos = duration_nanos.filter(|d| *d > 0)?;
    let rate = count as f64 / nanos_to_seconds(nanos);
    let rounded = (rate * 10.0).round() / 10.0;
    rounded.is_finite().then_some(rounded)
}
