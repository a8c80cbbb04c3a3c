use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single LLM-as-judge evaluation, possibly a revision
/// of a previous one (`parent_report_id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeReport {
    pub id: String,
    pub user_id: String,
    pub job_id: String,
    pub experiment_id: Option<String>,
    pub subject_ref: String, // e.g. benchmark_run_id / tool_eval_run_id being judged
    pub judge_provider_key: String,
    pub judge_model_id: String,
    pub criteria: String,
    pub parent_report_id: Option<String>,
    pub version: u32,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One per-subject verdict row within a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub id: String,
    pub report_id: String,
    pub target_ref: String, // which result/candidate this verdict is about
    pub score: f64,
    pub rationale: String,
    pub raw_response: Option<serde_json::Value>,
}

impl JudgeReport {
    /// The root of a report's version chain: its own id if it has no parent,
    /// else its `parent_report_id` (chains are never more than one level deep
    /// by construction — every revision points at the original, not its
    /// immediate predecessor).
    pub fn chain_root<'a>(&'a self) -> &'a str {
        self.parent_report_id.as_deref().unwrap_or(&self.id)
    }

    /// Testable property #14: the full version chain for a report is every
    /// report whose id equals the chain root, or whose `parent_report_id`
    /// equals the chain root, ordered by version ascending.
    pub fn version_chain<'a>(
        reports: &'a [JudgeReport],
        report_id: &str,
    ) -> Vec<&'a JudgeReport> {
        let root = reports
            .iter()
            .find(|r| r.id == report_id)
            .map(|r| r.chain_root().to_string());

        let Some(root) = root else {
            return Vec::new();
        };

        let mut chain: Vec<&JudgeReport> = reports
            .iter()
            .filter(|r| r.id == root || r.parent_report_id.as_deref() == Some(root.as_str()))
            .collect();
        chain.sort_by_key(|r| r.version);
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(id: &str, parent: Option<&str>, version: u32) -> JudgeReport {
        JudgeReport {
            id: id.into(),
            user_id: "u1".into(),
            job_id: "j1".into(),
            experiment_id: None,
            subject_ref: "s1".into(),
            judge_provider_key: "openai".into(),
            judge_model_id: "gpt-4o".into(),
            criteria: "accuracy".into(),
            parent_report_id: parent.map(String::from),
            version,
            summary: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn chain_root_is_self_when_no_parent() {
        let r = report("r1", None, 1);
        assert_eq!(r.chain_root(), "r1");
    }

    #[test]
    fn chain_root_is_parent_when_revision() {
        let r = report("r2", Some("r1"), 2);
        assert_eq!(r.chain_root(), "r1");
    }

    #[test]
    fn version_chain_collects_root_and_all_revisions_sorted() {
        let reports = vec![
            report("r1", None, 1),
            report("r3", Some("r1"), 3),
            report("r2", Some("r1"), 2),
        ];
        let chain = JudgeReport::version_chain(&reports, "r2");
        assert_eq!(
            chain.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["r1", "r2", "r3"]
        );
    }

    #[test]
    fn version_chain_from_root_itself_matches_from_any_revision() {
        let reports = vec![
            report("r1", None, 1),
            report("r2", Some("r1"), 2),
        ];
        let from_root = JudgeReport::version_chain(&reports, "r1");
        let from_rev = JudgeReport::version_chain(&reports, "r2");
        let ids_a: Vec<_> = from_root.iter().map(|r| r.id.clone()).collect();
        let ids_b: Vec<_> = from_rev.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn version_chain_unknown_report_is_empty() {
        let reports = vec![report("r1", None, 1)];
        assert!(JudgeReport::version_chain(&reports, "missing").is_empty());
    }
}
