use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header row for an evolutionary prompt search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTuneRun {
    pub id: String,
    pub user_id: String,
    pub job_id: String,
    pub experiment_id: Option<String>,
    pub provider_key: String,
    pub model_id: String,
    pub base_prompt: String,
    pub eval_criteria: String,
    pub generations: u32,
    pub population_size: u32,
    pub created_at: DateTime<Utc>,
}

/// One generation boundary within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTuneGeneration {
    pub id: String,
    pub run_id: String,
    pub generation_index: u32,
    pub best_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// One prompt variant evaluated within a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTuneCandidate {
    pub id: String,
    pub generation_id: String,
    pub prompt_text: String,
    pub parent_candidate_id: Option<String>,
    pub mutation_kind: Option<String>,
    pub score: Option<f64>,
    pub judge_rationale: Option<String>,
    pub output_sample: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub is_best_overall: bool,
}

impl PromptTuneCandidate {
    /// Best-of-generation by score; ties keep the earliest candidate.
    pub fn pick_best<'a>(candidates: &'a [PromptTuneCandidate]) -> Option<&'a PromptTuneCandidate> {
        candidates
            .iter()
            .filter(|c| c.success)
            .filter_map(|c| c.score.map(|s| (c, s)))
            .fold(None, |acc, (c, s)| match acc {
                None => Some((c, s)),
                Some((_, best)) if s > best => Some((c, s)),
                _ => acc,
            })
            .map(|(c, _)| c)
    }

    /// A survivor pool for the next generation: top `keep` candidates by score,
    /// descending, ties broken by original order.
    pub fn top_n(candidates: &[PromptTuneCandidate], keep: usize) -> Vec<&PromptTuneCandidate> {
        let mut scored: Vec<&PromptTuneCandidate> = candidates
            .iter()
            .filter(|c| c.success && c.score.is_some())
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(keep);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: Option<f64>, success: bool) -> PromptTuneCandidate {
        PromptTuneCandidate {
            id: id.into(),
            generation_id: "g1".into(),
            prompt_text: "p".into(),
            parent_candidate_id: None,
            mutation_kind: None,
            score,
            judge_rationale: None,
            output_sample: None,
            success,
            error: None,
            is_best_overall: false,
        }
    }

    #[test]
    fn pick_best_by_score() {
        let cands = vec![
            candidate("a", Some(0.5), true),
            candidate("b", Some(0.9), true),
            candidate("c", Some(0.7), true),
        ];
        assert_eq!(PromptTuneCandidate::pick_best(&cands).unwrap().id, "b");
    }

    #[test]
    fn pick_best_skips_failures() {
        let cands = vec![candidate("a", Some(0.9), false), candidate("b", Some(0.1), true)];
        assert_eq!(PromptTuneCandidate::pick_best(&cands).unwrap().id, "b");
    }

    #[test]
    fn top_n_orders_descending_and_truncates() {
        let cands = vec![
            candidate("a", Some(0.2), true),
            candidate("b", Some(0.8), true),
            candidate("c", Some(0.5), true),
            candidate("d", None, true),
        ];
        let top = PromptTuneCandidate::top_n(&cands, 2);
        assert_eq!(top.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
    }
}
