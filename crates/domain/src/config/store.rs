use serde::{Deserialize, Serialize};

fn d_db_path() -> String {
    "data/bench.db".to_string()
}

fn d_busy_timeout_ms() -> u32 {
    5000
}

fn d_max_runs_in_memory() -> usize {
    2000
}

/// Persistence store connection knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "d_db_path")]
    pub db_path: String,

    #[serde(default = "d_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// In-memory job-run cache cap, bounding process memory regardless of
    /// total row count in the backing database.
    #[serde(default = "d_max_runs_in_memory")]
    pub max_runs_in_memory: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: d_db_path(),
            busy_timeout_ms: d_busy_timeout_ms(),
            max_runs_in_memory: d_max_runs_in_memory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = StoreConfig::default();
        assert_eq!(cfg.busy_timeout_ms, 5000);
        assert_eq!(cfg.max_runs_in_memory, 2000);
    }
}
