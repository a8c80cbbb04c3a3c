use serde::{Deserialize, Serialize};

fn d_benchmarks_per_hour() -> u32 {
    20
}

fn d_max_concurrent() -> u32 {
    1
}

/// Rate Policy defaults. Per-user overrides live in the store, not here;
/// this is the process-wide fallback read at startup and overridable via
/// `BENCHMARK_RATE_LIMIT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_benchmarks_per_hour")]
    pub benchmarks_per_hour: u32,

    #[serde(default = "d_max_concurrent")]
    pub max_concurrent: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            benchmarks_per_hour: d_benchmarks_per_hour(),
            max_concurrent: d_max_concurrent(),
        }
    }
}

impl RateLimitConfig {
    /// `BENCHMARK_RATE_LIMIT` overrides `benchmarks_per_hour` when present
    /// and parseable; invalid values are ignored (fall back to config/default).
    pub fn apply_env_override(&mut self, raw: Option<&str>) {
        if let Some(v) = raw.and_then(|s| s.parse::<u32>().ok()) {
            self.benchmarks_per_hour = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = RateLimitConfig::default();
        assert_eq!(cfg.benchmarks_per_hour, 20);
        assert_eq!(cfg.max_concurrent, 1);
    }

    #[test]
    fn env_override_applies_valid_value() {
        let mut cfg = RateLimitConfig::default();
        cfg.apply_env_override(Some("50"));
        assert_eq!(cfg.benchmarks_per_hour, 50);
    }

    #[test]
    fn env_override_ignores_garbage() {
        let mut cfg = RateLimitConfig::default();
        cfg.apply_env_override(Some("not-a-number"));
        assert_eq!(cfg.benchmarks_per_hour, 20);
        cfg.apply_env_override(None);
        assert_eq!(cfg.benchmarks_per_hour, 20);
    }
}
