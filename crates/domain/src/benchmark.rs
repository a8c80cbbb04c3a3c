use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header row for one benchmark job's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub id: String,
    pub user_id: String,
    pub job_id: String,
    pub experiment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub config_json: serde_json::Value,
}

/// One row per (model, tier, run-ordinal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub id: String,
    pub run_id: String,
    pub provider_key: String,
    pub model_id: String,
    pub context_tier: u32,
    pub run_ordinal: u32,
    pub ttft_ms: Option<u64>,
    pub total_time_s: Option<f64>,
    pub output_tokens: Option<u32>,
    pub input_tokens: Option<u32>,
    pub tokens_per_second: Option<f64>,
    pub input_tokens_per_second: Option<f64>,
    pub cost: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
}

impl BenchmarkResult {
    /// `tokens_per_second = output_tokens / total_time`.
    pub fn compute_tokens_per_second(output_tokens: u32, total_time_s: f64) -> Option<f64> {
        if total_time_s > 0.0 {
            Some(output_tokens as f64 / total_time_s)
        } else {
            None
        }
    }

    /// `input_tokens_per_second = input_tokens / (ttft_ms/1000)` when TTFT and
    /// input_tokens are both positive.
    pub fn compute_input_tokens_per_second(input_tokens: u32, ttft_ms: u64) -> Option<f64> {
        if ttft_ms > 0 && input_tokens > 0 {
            Some(input_tokens as f64 / (ttft_ms as f64 / 1000.0))
        } else {
            None
        }
    }

    /// A (model, tier) is eligible when `tier <= context_window - max_tokens - 100`.
    pub fn tier_eligible(tier: u32, context_window: u32, max_tokens: u32) -> bool {
        let budget = context_window.saturating_sub(max_tokens).saturating_sub(100);
        tier <= budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_per_second_basic() {
        assert_eq!(
            BenchmarkResult::compute_tokens_per_second(100, 2.0),
            Some(50.0)
        );
    }

    #[test]
    fn tokens_per_second_zero_time_is_none() {
        assert_eq!(BenchmarkResult::compute_tokens_per_second(100, 0.0), None);
    }

    #[test]
    fn input_tokens_per_second_requires_both_positive() {
        assert_eq!(
            BenchmarkResult::compute_input_tokens_per_second(1000, 500),
            Some(2000.0)
        );
        assert_eq!(BenchmarkResult::compute_input_tokens_per_second(0, 500), None);
        assert_eq!(BenchmarkResult::compute_input_tokens_per_second(1000, 0), None);
    }

    #[test]
    fn tier_eligibility_boundary() {
        // context_window=8192, max_tokens=92 -> budget = 8000
        assert!(BenchmarkResult::tier_eligible(8000, 8192, 92));
        assert!(!BenchmarkResult::tier_eligible(8001, 8192, 92));
    }

    #[test]
    fn tier_eligibility_saturates_instead_of_underflow() {
        // max_tokens larger than context_window must not panic/underflow.
        assert!(!BenchmarkResult::tier_eligible(1, 100, 1000));
    }
}
