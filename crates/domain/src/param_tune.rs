use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header row for a grid/random sweep over provider params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamTuneRun {
    pub id: String,
    pub user_id: String,
    pub job_id: String,
    pub experiment_id: Option<String>,
    pub provider_key: String,
    pub model_id: String,
    pub search_strategy: String, // "grid" | "random"
    pub objective: String,       // e.g. "tokens_per_second", "quality_score"
    pub prompt_text: String,
    pub created_at: DateTime<Utc>,
}

/// One sampled point in the parameter space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamTuneCombo {
    pub id: String,
    pub run_id: String,
    pub params_json: serde_json::Value,
    pub objective_value: Option<f64>,
    pub ttft_ms: Option<u64>,
    pub total_time_s: Option<f64>,
    pub tokens_per_second: Option<f64>,
    pub output_sample: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub is_best: bool,
}

impl ParamTuneCombo {
    /// Grid size is the Cartesian product of each axis' candidate count.
    pub fn grid_size(axis_sizes: &[usize]) -> usize {
        axis_sizes.iter().product()
    }

    /// Pick the best combo by objective value: higher is better unless
    /// `minimize` is set (e.g. latency objectives). Ties keep the earliest.
    pub fn pick_best<'a>(
        combos: &'a [ParamTuneCombo],
        minimize: bool,
    ) -> Option<&'a ParamTuneCombo> {
        combos
            .iter()
            .filter(|c| c.success)
            .filter_map(|c| c.objective_value.map(|v| (c, v)))
            .fold(None, |acc, (c, v)| match acc {
                None => Some((c, v)),
                Some((_, best_v)) => {
                    let better = if minimize { v < best_v } else { v > best_v };
                    if better {
                        Some((c, v))
                    } else {
                        acc
                    }
                }
            })
            .map(|(c, _)| c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo(id: &str, objective: Option<f64>, success: bool) -> ParamTuneCombo {
        ParamTuneCombo {
            id: id.into(),
            run_id: "r1".into(),
            params_json: serde_json::json!({}),
            objective_value: objective,
            ttft_ms: None,
            total_time_s: None,
            tokens_per_second: None,
            output_sample: None,
            success,
            error: None,
            is_best: false,
        }
    }

    #[test]
    fn grid_size_is_product() {
        assert_eq!(ParamTuneCombo::grid_size(&[3, 2, 4]), 24);
        assert_eq!(ParamTuneCombo::grid_size(&[]), 1);
    }

    #[test]
    fn pick_best_maximizes_by_default() {
        let combos = vec![
            combo("a", Some(1.0), true),
            combo("b", Some(5.0), true),
            combo("c", Some(3.0), true),
        ];
        assert_eq!(ParamTuneCombo::pick_best(&combos, false).unwrap().id, "b");
    }

    #[test]
    fn pick_best_minimizes_when_requested() {
        let combos = vec![
            combo("a", Some(1.0), true),
            combo("b", Some(5.0), true),
        ];
        assert_eq!(ParamTuneCombo::pick_best(&combos, true).unwrap().id, "a");
    }

    #[test]
    fn pick_best_ignores_failed_and_missing_objective() {
        let combos = vec![
            combo("a", Some(9.0), false),
            combo("b", None, true),
            combo("c", Some(2.0), true),
        ];
        assert_eq!(ParamTuneCombo::pick_best(&combos, false).unwrap().id, "c");
    }

    #[test]
    fn pick_best_empty_is_none() {
        assert!(ParamTuneCombo::pick_best(&[], false).is_none());
    }
}
