//! The contract every job type implements (§ handler contract).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use bg_store::Db;

use crate::cancel::CancelEvent;
use crate::ws::WsHub;

/// Fire-and-forget progress reporting: updates the job row and broadcasts
/// `job_progress` over the WS hub. Cloning is cheap — handlers may stash a
/// clone and call it from anywhere in their execution.
#[derive(Clone)]
pub struct ProgressReporter {
    db: Arc<Db>,
    hub: Arc<WsHub>,
    job_id: String,
    user_id: String,
}

impl ProgressReporter {
    pub fn new(db: Arc<Db>, hub: Arc<WsHub>, job_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { db, hub, job_id: job_id.into(), user_id: user_id.into() }
    }

    pub fn report(&self, pct: u8, detail: &str) {
        if let Err(err) = self.db.set_progress(&self.job_id, pct, detail) {
            tracing::warn!(job_id = %self.job_id, %err, "failed to persist job progress");
        }
        self.hub.send_to_user(
            &self.user_id,
            bg_domain::ws::ServerMessage::JobProgress {
                job_id: self.job_id.clone(),
                progress_pct: pct,
                detail: detail.to_owned(),
            },
        );
    }

    /// Publishes a discoverable result reference before the handler
    /// completes, so a reconnecting client can find it early.
    pub fn publish_result_ref(&self, result_ref: &str) {
        if let Err(err) = self.db.set_result_ref(&self.job_id, result_ref) {
            tracing::warn!(job_id = %self.job_id, %err, "failed to publish early result_ref");
        }
    }

    /// Broadcasts a handler-specific typed frame (`benchmark_result`,
    /// `judge_verdict`, ...) straight to the WS hub. Unlike [`Self::report`]
    /// this is not persisted — the handler's own tables already hold the
    /// durable record, so this is a best-effort live-view push only.
    pub fn emit(&self, msg: bg_domain::ws::ServerMessage) {
        self.hub.send_to_user(&self.user_id, msg);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// Everything a handler needs to run one job.
pub struct HandlerContext {
    pub job_id: String,
    pub user_id: String,
    pub params: Value,
    pub cancel_event: CancelEvent,
    pub progress: ProgressReporter,
    pub db: Arc<Db>,
}

/// Outcome of a handler run: `Ok(Some(ref))` / `Ok(None)` for a normal
/// return, `Err` for a handler-level failure (the registry truncates the
/// message before persisting it).
pub type HandlerResult = std::result::Result<Option<String>, String>;

/// A job type's execution logic. Implementors must poll
/// `ctx.cancel_event.is_set()` at every suspension point (between
/// sub-tasks, inside inner loops, before each provider call) and return
/// promptly once it fires — the registry does not forcibly abort the
/// future, it only stops waiting on it after cleanup starts.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult;
}
