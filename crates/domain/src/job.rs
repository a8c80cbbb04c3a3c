//! Job entity and status machine — the core unit the Job Registry schedules.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of eight job types the registry can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Benchmark,
    ToolEval,
    ParamTune,
    PromptTune,
    Judge,
    JudgeCompare,
    ExperimentRunBest,
    Schedule,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Benchmark => "benchmark",
            JobType::ToolEval => "tool_eval",
            JobType::ParamTune => "param_tune",
            JobType::PromptTune => "prompt_tune",
            JobType::Judge => "judge",
            JobType::JudgeCompare => "judge_compare",
            JobType::ExperimentRunBest => "experiment_run_best",
            JobType::Schedule => "schedule",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "benchmark" => Ok(JobType::Benchmark),
            "tool_eval" => Ok(JobType::ToolEval),
            "param_tune" => Ok(JobType::ParamTune),
            "prompt_tune" => Ok(JobType::PromptTune),
            "judge" => Ok(JobType::Judge),
            "judge_compare" => Ok(JobType::JudgeCompare),
            "experiment_run_best" => Ok(JobType::ExperimentRunBest),
            "schedule" => Ok(JobType::Schedule),
            other => Err(crate::error::Error::Validation(format!(
                "unknown job_type: {other}"
            ))),
        }
    }
}

/// Job lifecycle status. See [`allowed_transitions`] for the transition relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
    Interrupted,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Interrupted => "interrupted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Interrupted
        )
    }
}

impl std::str::FromStr for JobStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            "interrupted" => Ok(JobStatus::Interrupted),
            other => Err(crate::error::Error::Validation(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// The allowed-transition relation for job status changes. Anything else is
/// an integrity violation: callers log a warning but still accept the write,
/// since a job stuck mid-transition must never block on a registry bug.
pub fn allowed_transitions(from: JobStatus) -> HashSet<JobStatus> {
    use JobStatus::*;
    match from {
        Pending => [Queued, Running, Cancelled].into_iter().collect(),
        Queued => [Running, Cancelled].into_iter().collect(),
        Running => [Done, Failed, Cancelled, Interrupted].into_iter().collect(),
        Done | Failed | Cancelled | Interrupted => HashSet::new(),
    }
}

pub fn is_valid_transition(from: JobStatus, to: JobStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// A job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub progress_detail: String,
    pub params_json: serde_json::Value,
    pub result_ref: Option<String>,
    pub experiment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub timeout_seconds: i64,
    pub error: Option<String>,
}

pub const DEFAULT_TIMEOUT_SECONDS: i64 = 7200;

impl Job {
    pub fn new(
        user_id: impl Into<String>,
        job_type: JobType,
        params_json: serde_json::Value,
        timeout_seconds: i64,
        progress_detail: impl Into<String>,
    ) -> Self {
        Self {
            id: crate::ids::new_id(),
            user_id: user_id.into(),
            job_type,
            status: JobStatus::Pending,
            progress_pct: 0,
            progress_detail: progress_detail.into(),
            params_json,
            result_ref: None,
            experiment_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            timeout_at: None,
            timeout_seconds,
            error: None,
        }
    }

    /// Invariant (i): a job is terminal iff `completed_at` is set.
    pub fn invariant_terminal_matches_completed_at(&self) -> bool {
        self.status.is_terminal() == self.completed_at.is_some()
    }

    /// Invariant (ii): `timeout_at` is non-null iff `status = running`.
    pub fn invariant_timeout_matches_running(&self) -> bool {
        (self.status == JobStatus::Running) == self.timeout_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_from_pending() {
        assert!(is_valid_transition(JobStatus::Pending, JobStatus::Queued));
        assert!(is_valid_transition(JobStatus::Pending, JobStatus::Running));
        assert!(is_valid_transition(JobStatus::Pending, JobStatus::Cancelled));
        assert!(!is_valid_transition(JobStatus::Pending, JobStatus::Done));
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for s in [
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Interrupted,
        ] {
            assert!(allowed_transitions(s).is_empty());
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn running_can_reach_all_terminal_states() {
        for to in [
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Interrupted,
        ] {
            assert!(is_valid_transition(JobStatus::Running, to));
        }
    }

    #[test]
    fn new_job_is_pending_and_not_terminal() {
        let job = Job::new("u1", JobType::Benchmark, serde_json::json!({}), 60, "queued");
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.invariant_terminal_matches_completed_at());
        assert!(job.invariant_timeout_matches_running());
    }

    #[test]
    fn job_type_round_trips_through_str() {
        for jt in [
            JobType::Benchmark,
            JobType::ToolEval,
            JobType::ParamTune,
            JobType::PromptTune,
            JobType::Judge,
            JobType::JudgeCompare,
            JobType::ExperimentRunBest,
            JobType::Schedule,
        ] {
            let s = jt.as_str();
            let parsed: JobType = s.parse().unwrap();
            assert_eq!(parsed, jt, "round trip failed for {s}");
        }
    }

    #[test]
    fn unknown_job_type_is_rejected() {
        assert!("not_a_type".parse::<JobType>().is_err());
    }
}
