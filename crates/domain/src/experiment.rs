//! Experiment Coordinator — pure aggregator, no background work of its own.
//!
//! Open-question decisions this module bakes in (see DESIGN.md for the full
//! write-up):
//! - `result_ref` is published eagerly by handlers before a job reaches a
//!   terminal status; readers here treat `None` as "not yet available", not
//!   as an error, regardless of job status.
//! - Leaderboard-style weighted averages (used by [`TimelineEntry::delta`]
//!   consumers) weight every metric by `sample_count`, including
//!   latency/throughput, for consistency across metric kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineSource {
    ToolEval,
    ParamTune,
    PromptTune,
    Judge,
}

impl TimelineSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolEval => "tool_eval",
            Self::ParamTune => "param_tune",
            Self::PromptTune => "prompt_tune",
            Self::Judge => "judge",
        }
    }
}

impl std::str::FromStr for TimelineSource {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool_eval" => Ok(Self::ToolEval),
            "param_tune" => Ok(Self::ParamTune),
            "prompt_tune" => Ok(Self::PromptTune),
            "judge" => Ok(Self::Judge),
            other => Err(crate::error::Error::Validation(format!(
                "unknown best_source: {other}"
            ))),
        }
    }
}

/// A named container grouping a suite's runs with a
/// pinned baseline and a running best.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub suite_id: String,
    pub baseline_run_id: Option<String>,
    pub baseline_score: Option<f64>,
    pub best_score: Option<f64>,
    pub best_config_json: Option<serde_json::Value>,
    pub best_source: Option<TimelineSource>,
    pub best_source_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, suite_id: impl Into<String>) -> Self {
        Self {
            id: crate::ids::new_id(),
            user_id: user_id.into(),
            name: name.into(),
            suite_id: suite_id.into(),
            baseline_run_id: None,
            baseline_score: None,
            best_score: None,
            best_config_json: None,
            best_source: None,
            best_source_id: None,
            created_at: Utc::now(),
        }
    }

    /// `pin_baseline`: validate that `eval_run_suite_id` matches the
    /// experiment's suite, then record the eval run as baseline.
    pub fn pin_baseline(
        &mut self,
        eval_run_id: impl Into<String>,
        eval_run_suite_id: &str,
        baseline_score: f64,
    ) -> crate::error::Result<()> {
        if eval_run_suite_id != self.suite_id {
            return Err(crate::error::Error::Validation(format!(
                "eval run suite {eval_run_suite_id} does not match experiment suite {}",
                self.suite_id
            )));
        }
        self.baseline_run_id = Some(eval_run_id.into());
        self.baseline_score = Some(baseline_score);
        Ok(())
    }

    /// `maybe_update_best`: null best is treated as −∞, so any first score wins.
    /// Returns `true` if the best was updated.
    pub fn maybe_update_best(
        &mut self,
        score: f64,
        config_json: serde_json::Value,
        source: TimelineSource,
        source_id: impl Into<String>,
    ) -> bool {
        let current = self.best_score.unwrap_or(f64::NEG_INFINITY);
        if score > current {
            self.best_score = Some(score);
            self.best_config_json = Some(config_json);
            self.best_source = Some(source);
            self.best_source_id = Some(source_id.into());
            true
        } else {
            false
        }
    }
}

/// One row in a [`Experiment`] timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub source: TimelineSource,
    pub source_id: String,
    pub score: f64,
    pub delta: Option<f64>,
    pub config_summary: serde_json::Value,
    pub is_promotion: bool,
    pub created_at: DateTime<Utc>,
}

/// A row from any of the four linked tables, as fed into [`timeline`].
#[derive(Debug, Clone)]
pub struct TimelineSourceRow {
    pub source: TimelineSource,
    pub source_id: String,
    pub score: f64,
    pub config_summary: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// `timeline`: union of eval/param_tune/prompt_tune/judge rows linked to an
/// experiment, sorted by timestamp, each annotated with
/// `delta = score - baseline_score` and a promotion marker for the row (if
/// any) that matches the experiment's current best.
pub fn timeline(exp: &Experiment, rows: &[TimelineSourceRow]) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = rows
        .iter()
        .map(|r| {
            let is_promotion = exp.best_source == Some(r.source) && exp.best_source_id.as_deref() == Some(r.source_id.as_str());
            TimelineEntry {
                source: r.source,
                source_id: r.source_id.clone(),
                score: r.score,
                delta: exp.baseline_score.map(|b| r.score - b),
                config_summary: r.config_summary.clone(),
                is_promotion,
                created_at: r.created_at,
            }
        })
        .collect();
    entries.sort_by_key(|e| e.created_at);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(source: TimelineSource, id: &str, score: f64, secs: i64) -> TimelineSourceRow {
        TimelineSourceRow {
            source,
            source_id: id.into(),
            score,
            config_summary: serde_json::json!({}),
            created_at: Utc::now() + chrono::Duration::seconds(secs),
        }
    }

    #[test]
    fn pin_baseline_rejects_mismatched_suite() {
        let mut exp = Experiment::new("u1", "exp1", "suite-a");
        let err = exp.pin_baseline("run1", "suite-b", 0.8).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(exp.baseline_run_id.is_none());
    }

    #[test]
    fn pin_baseline_records_score_on_match() {
        let mut exp = Experiment::new("u1", "exp1", "suite-a");
        exp.pin_baseline("run1", "suite-a", 0.8).unwrap();
        assert_eq!(exp.baseline_run_id.as_deref(), Some("run1"));
        assert_eq!(exp.baseline_score, Some(0.8));
    }

    #[test]
    fn maybe_update_best_null_is_negative_infinity() {
        let mut exp = Experiment::new("u1", "exp1", "suite-a");
        assert!(exp.maybe_update_best(-5.0, serde_json::json!({"a":1}), TimelineSource::ParamTune, "c1"));
        assert_eq!(exp.best_score, Some(-5.0));
    }

    #[test]
    fn maybe_update_best_only_replaces_on_strict_improvement() {
        let mut exp = Experiment::new("u1", "exp1", "suite-a");
        exp.maybe_update_best(0.5, serde_json::json!({}), TimelineSource::ToolEval, "a");
        assert!(!exp.maybe_update_best(0.5, serde_json::json!({}), TimelineSource::ToolEval, "b"));
        assert!(exp.maybe_update_best(0.6, serde_json::json!({}), TimelineSource::ToolEval, "c"));
        assert_eq!(exp.best_source_id.as_deref(), Some("c"));
    }

    #[test]
    fn timeline_sorted_with_delta_and_promotion_marker() {
        let mut exp = Experiment::new("u1", "exp1", "suite-a");
        exp.pin_baseline("run0", "suite-a", 0.5).unwrap();
        exp.maybe_update_best(0.9, serde_json::json!({}), TimelineSource::ParamTune, "p2");

        let rows = vec![
            row(TimelineSource::ParamTune, "p2", 0.9, 20),
            row(TimelineSource::ToolEval, "t1", 0.6, 5),
            row(TimelineSource::Judge, "j1", 0.7, 10),
        ];
        let tl = timeline(&exp, &rows);
        assert_eq!(
            tl.iter().map(|e| e.source_id.as_str()).collect::<Vec<_>>(),
            vec!["t1", "j1", "p2"]
        );
        assert_eq!(tl[0].delta, Some(0.1));
        assert!(tl.iter().find(|e| e.source_id == "p2").unwrap().is_promotion);
        assert!(!tl.iter().find(|e| e.source_id == "t1").unwrap().is_promotion);
    }

    #[test]
    fn timeline_without_baseline_has_no_delta() {
        let exp = Experiment::new("u1", "exp1", "suite-a");
        let rows = vec![row(TimelineSource::ToolEval, "t1", 0.6, 0)];
        let tl = timeline(&exp, &rows);
        assert_eq!(tl[0].delta, None);
    }
}
