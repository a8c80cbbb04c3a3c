//! The closed set of WebSocket frame types exchanged between the gateway
//! and a connected client. Every server→client frame shares the shape
//! `{type, job_id?, ...payload}`; client→server traffic is limited to
//! `ping` and `cancel`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::Job;

/// A job as it appears in a `sync` frame — the subset a reconnecting
/// client needs to repaint its UI without replaying history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub job_type: String,
    pub status: String,
    pub progress_pct: u8,
    pub progress_detail: String,
    pub result_ref: Option<String>,
    pub created_at: String,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.as_str().to_string(),
            status: job.status.as_str().to_string(),
            progress_pct: job.progress_pct,
            progress_detail: job.progress_detail.clone(),
            result_ref: job.result_ref.clone(),
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

/// Every frame the gateway can push to a client, tagged by `type`.
///
/// Handler-specific payloads (`benchmark_result`, `combo_result`, ...) carry
/// an arbitrary `serde_json::Value` rather than a dedicated struct per
/// frame — the handler crate owns the shape of its own payloads and this
/// type only needs to guarantee the envelope and the closed tag set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Sync {
        active_jobs: Vec<JobSummary>,
        recent_jobs: Vec<JobSummary>,
    },
    JobCreated { job_id: String, job_type: String },
    JobStarted { job_id: String },
    JobProgress { job_id: String, progress_pct: u8, detail: String },
    JobCompleted { job_id: String, result_ref: Option<String> },
    JobFailed { job_id: String, error: String },
    JobCancelled { job_id: String },

    BenchmarkInit { job_id: String, payload: Value },
    BenchmarkProgress { job_id: String, payload: Value },
    BenchmarkResult { job_id: String, payload: Value },

    ToolEvalInit { job_id: String, payload: Value },
    ToolEvalProgress { job_id: String, payload: Value },
    ToolEvalResult { job_id: String, payload: Value },
    ToolEvalSummary { job_id: String, payload: Value },
    ToolEvalComplete { job_id: String, payload: Value },

    TuneStart { job_id: String, payload: Value },
    ComboResult { job_id: String, payload: Value },
    TuneComplete { job_id: String, payload: Value },
    EvalPromoted { job_id: String, payload: Value },

    GenerationStart { job_id: String, payload: Value },
    PromptGenerated { job_id: String, payload: Value },
    PromptEvalStart { job_id: String, payload: Value },
    PromptEvalResult { job_id: String, payload: Value },
    GenerationComplete { job_id: String, payload: Value },

    JudgeStart { job_id: String, payload: Value },
    JudgeVerdict { job_id: String, payload: Value },
    JudgeReport { job_id: String, payload: Value },
    JudgeComplete { job_id: String, payload: Value },

    CompareStart { job_id: String, payload: Value },
    CompareCase { job_id: String, payload: Value },
    CompareComplete { job_id: String, payload: Value },

    Pong { timestamp: i64 },
    Heartbeat,
}

/// Frames a client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping { timestamp: i64 },
    Cancel { job_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_message_tags_as_snake_case_type_field() {
        let msg = ServerMessage::JobStarted { job_id: "abc".into() };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "job_started");
        assert_eq!(json["job_id"], "abc");
    }

    #[test]
    fn client_ping_round_trips() {
        let raw = r#"{"type":"ping","timestamp":123}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        matches!(msg, ClientMessage::Ping { timestamp: 123 });
    }

    #[test]
    fn client_cancel_round_trips() {
        let raw = r#"{"type":"cancel","job_id":"j1"}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Cancel { job_id } => assert_eq!(job_id, "j1"),
            _ => panic!("wrong variant"),
        }
    }
}
