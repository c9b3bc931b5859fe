//! Tests for generation statistics.

use crate::stats::*;

#[test]
fn test_throughput_from_counters() {
    let stats = GenerationStats::from_counters(&CompletionCounters {
        eval_count: Some(5),
        eval_duration: Some(2_000_000_000),
        ..Default::default()
    });

    assert_eq!(stats.tokens_per_second, Some(2.5));
    assert_eq!(stats.total_tokens, Some(5));
    assert_eq!(stats.generation_time_seconds, Some(2.0));
    assert_eq!(stats.prompt_tokens_per_second, None);
    assert_eq!(stats.total_time_seconds, None);
}

#[test]
fn test_throughput_rounds_to_one_decimal() {
    let stats = GenerationStats::from_counters(&CompletionCounters {
        eval_count: Some(100),
        eval_duration: Some(3_000_000_000),
        prompt_eval_count: Some(26),
        prompt_eval_duration: Some(130_000_000),
        total_duration: Some(3_500_000_000),
    });

    assert_eq!(stats.tokens_per_second, Some(33.3));
    assert_eq!(stats.prompt_tokens_per_second, Some(200.0));
    assert_eq!(stats.prompt_tokens, Some(26));
    assert_eq!(stats.total_time_seconds, Some(3.5));
}

#[test]
fn test_zero_duration_omits_throughput() {
    let stats = GenerationStats::from_counters(&CompletionCounters {
        eval_count: Some(12),
        eval_duration: Some(0),
        prompt_eval_count: Some(3),
        prompt_eval_duration: Some(0),
        ..Default::default()
    });

    assert_eq!(stats.tokens_per_second, None);
    assert_eq!(stats.prompt_tokens_per_second, None);
    assert_eq!(stats.total_tokens, Some(12));

    let json = serde_json::to_string(&stats).unwrap();
    assert!(!json.contains("tokensPerSecond"));
    assert!(!json.contains("NaN"));
    assert!(!json.contains("inf"));
}

#[test]
fn test_missing_duration_omits_throughput() {
    let stats = GenerationStats::from_counters(&CompletionCounters {
        eval_count: Some(7),
        ..Default::default()
    });
    assert_eq!(stats.tokens_per_second, None);
    assert_eq!(stats.generation_time_seconds, None);
}

#[test]
fn test_missing_count_omits_throughput() {
    let stats = GenerationStats::from_counters(&CompletionCounters {
        eval_duration: Some(1_000_000_000),
        ..Default::default()
    });
    assert_eq!(stats.tokens_per_second, None);
    assert_eq!(stats.generation_time_seconds, Some(1.0));
}

#[test]
fn test_empty_counters_give_empty_stats() {
    let stats = GenerationStats::from_counters(&CompletionCounters::default());
    assert!(stats.is_empty());
    assert_eq!(serde_json::to_string(&stats).unwrap(), "{}");
}

#[test]
fn test_camel_case_field_names() {
    let stats = GenerationStats {
        tokens_per_second: Some(1.5),
        prompt_tokens_per_second: Some(2.0),
        total_tokens: Some(3),
        prompt_tokens: Some(4),
        generation_time_seconds: Some(2.0),
        total_time_seconds: Some(2.5),
    };
    let value = serde_json::to_value(&stats).unwrap();
    for key in [
        "tokensPerSecond",
        "promptTokensPerSecond",
        "totalTokens",
        "promptTokens",
        "generationTimeSeconds",
        "totalTimeSeconds",
    ] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
}
