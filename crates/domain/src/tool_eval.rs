use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamScoring {
    Exact,
    Fuzzy,
    Contains,
    Semantic,
}

impl ParamScoring {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Contains => "contains",
            Self::Semantic => "semantic",
        }
    }
}

impl std::str::FromStr for ParamScoring {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "fuzzy" => Ok(Self::Fuzzy),
            "contains" => Ok(Self::Contains),
            "semantic" => Ok(Self::Semantic),
            other => Err(crate::error::Error::Validation(format!(
                "unknown param_scoring: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSuite {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: String,
    pub suite_id: String,
    pub sort_order: i32,
    pub name: String,
    pub description: String,
    pub parameters_json: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTestCase {
    pub id: String,
    pub suite_id: String,
    pub prompt: String,
    pub expected_tool: serde_json::Value, // string or array (any-of)
    pub expected_params_json: Option<serde_json::Value>,
    pub param_scoring: ParamScoring,
    pub multi_turn_config_json: Option<serde_json::Value>,
    pub scoring_config_json: Option<serde_json::Value>,
    pub should_call_tool: bool,
    pub category: Option<String>,
}

impl ToolTestCase {
    /// case-insensitive match; list-expected means any-of.
    pub fn matches_expected_tool(&self, actual: &str) -> bool {
        let actual_lc = actual.to_lowercase();
        match &self.expected_tool {
            serde_json::Value::String(s) => s.to_lowercase() == actual_lc,
            serde_json::Value::Array(arr) => arr
                .iter()
                .filter_map(|v| v.as_str())
                .any(|s| s.to_lowercase() == actual_lc),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvalRun {
    pub id: String,
    pub user_id: String,
    pub job_id: String,
    pub suite_id: String,
    pub experiment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: String,
    pub run_id: String,
    pub test_case_id: String,
    pub provider_key: String,
    pub model_id: String,
    pub tool_selection_score: f64,
    pub param_accuracy: Option<f64>,
    pub overall_score: f64,
    pub irrelevance_score: Option<f64>,
    pub actual_tool: Option<String>,
    pub actual_params_json: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub raw_request: Option<serde_json::Value>,
    pub raw_response: Option<serde_json::Value>,
    // Multi-turn extras
    pub completion_score: Option<f64>,
    pub efficiency_score: Option<f64>,
    pub redundancy_penalty: Option<f64>,
    pub detour_penalty: Option<f64>,
    pub tool_chain_json: Option<serde_json::Value>,
}

impl CaseResult {
    /// `overall_score = tool_selection_score * param_accuracy` when an
    /// expectation exists, else just `tool_selection_score`.
    pub fn compute_overall_score(tool_selection_score: f64, param_accuracy: Option<f64>) -> f64 {
        match param_accuracy {
            Some(p) => tool_selection_score * p,
            None => tool_selection_score,
        }
    }

    /// `efficiency_score = min(1, optimal_hops / rounds_used)` (multi-turn).
    pub fn compute_efficiency_score(optimal_hops: u32, rounds_used: u32) -> f64 {
        if rounds_used == 0 {
            return 0.0;
        }
        (optimal_hops as f64 / rounds_used as f64).min(1.0)
    }

    /// Did the chain both land on the expected tool and stay on a path made
    /// only of the case's declared valid intermediate hops. A matching final
    /// call reached by way of an off-path detour scores half credit rather
    /// than the full 1.0 a clean run gets.
    pub fn compute_completion_score(final_tool_matched: bool, path_valid: bool) -> f64 {
        match (final_tool_matched, path_valid) {
            (true, true) => 1.0,
            (true, false) => 0.5,
            (false, _) => 0.0,
        }
    }

    /// Fraction of intermediate tool calls that repeat a tool already called
    /// earlier in the same chain (looping instead of progressing).
    pub fn compute_redundancy_penalty(intermediate_tool_names: &[String]) -> f64 {
        if intermediate_tool_names.is_empty() {
            return 0.0;
        }
        let mut seen = std::collections::HashSet::new();
        let repeats = intermediate_tool_names.iter().filter(|name| !seen.insert(name.as_str())).count();
        repeats as f64 / intermediate_tool_names.len() as f64
    }

    /// Fraction of intermediate tool calls outside the case's declared
    /// `valid_prerequisites`. An empty prerequisite list means the case
    /// places no constraint on intermediate hops, so no detour is possible.
    pub fn compute_detour_penalty(intermediate_tool_names: &[String], valid_prerequisites: &[String]) -> f64 {
        if intermediate_tool_names.is_empty() || valid_prerequisites.is_empty() {
            return 0.0;
        }
        let off_path = intermediate_tool_names.iter().filter(|name| !valid_prerequisites.iter().any(|p| p == *name)).count();
        off_path as f64 / intermediate_tool_names.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(expected: serde_json::Value) -> ToolTestCase {
        ToolTestCase {
            id: "c1".into(),
            suite_id: "s1".into(),
            prompt: "p".into(),
            expected_tool: expected,
            expected_params_json: None,
            param_scoring: ParamScoring::Exact,
            multi_turn_config_json: None,
            scoring_config_json: None,
            should_call_tool: true,
            category: None,
        }
    }

    #[test]
    fn matches_single_expected_case_insensitive() {
        let c = case(serde_json::json!("SearchWeb"));
        assert!(c.matches_expected_tool("searchweb"));
        assert!(!c.matches_expected_tool("other"));
    }

    #[test]
    fn matches_any_of_list() {
        let c = case(serde_json::json!(["Alpha", "Beta"]));
        assert!(c.matches_expected_tool("beta"));
        assert!(!c.matches_expected_tool("gamma"));
    }

    #[test]
    fn overall_score_with_and_without_param_accuracy() {
        assert_eq!(CaseResult::compute_overall_score(1.0, Some(0.5)), 0.5);
        assert_eq!(CaseResult::compute_overall_score(1.0, None), 1.0);
        assert_eq!(CaseResult::compute_overall_score(0.0, Some(1.0)), 0.0);
    }

    #[test]
    fn efficiency_score_caps_at_one() {
        assert_eq!(CaseResult::compute_efficiency_score(2, 1), 1.0);
        assert_eq!(CaseResult::compute_efficiency_score(1, 2), 0.5);
        assert_eq!(CaseResult::compute_efficiency_score(1, 0), 0.0);
    }

    #[test]
    fn completion_score_half_credits_a_valid_final_call_via_a_detour() {
        assert_eq!(CaseResult::compute_completion_score(true, true), 1.0);
        assert_eq!(CaseResult::compute_completion_score(true, false), 0.5);
        assert_eq!(CaseResult::compute_completion_score(false, true), 0.0);
        assert_eq!(CaseResult::compute_completion_score(false, false), 0.0);
    }

    #[test]
    fn redundancy_penalty_counts_repeated_intermediate_calls() {
        let names = vec!["search".to_string(), "search".to_string(), "lookup".to_string()];
        assert_eq!(CaseResult::compute_redundancy_penalty(&names), 1.0 / 3.0);
        assert_eq!(CaseResult::compute_redundancy_penalty(&[]), 0.0);
    }

    #[test]
    fn detour_penalty_counts_hops_outside_valid_prerequisites() {
        let names = vec!["search".to_string(), "weather".to_string()];
        let valid = vec!["search".to_string()];
        assert_eq!(CaseResult::compute_detour_penalty(&names, &valid), 0.5);
        assert_eq!(CaseResult::compute_detour_penalty(&names, &[]), 0.0);
    }
}
