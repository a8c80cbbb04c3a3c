//! Dispatches a triggered schedule into whichever handler the schedule
//! targets. The cron/interval bookkeeping (when to fire next) lives in the
//! gateway, same as the Job Registry's watchdog timer — this handler only
//! runs the one job a firing produced.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bg_domain::job::JobType;
use bg_registry::{HandlerContext, HandlerResult, JobHandler};
use serde::Deserialize;

pub type HandlerMap = HashMap<JobType, Arc<dyn JobHandler>>;

#[derive(Debug, Deserialize)]
struct ScheduleParams {
    target_job_type: JobType,
    target_params: serde_json::Value,
}

/// Bound to the full handler map after `build_handlers` constructs it, since
/// the map can't contain itself while it's still being built.
pub struct ScheduleHandler {
    handlers: OnceLock<HandlerMap>,
}

impl ScheduleHandler {
    pub fn new() -> Self {
        Self { handlers: OnceLock::new() }
    }

    pub fn bind(&self, handlers: HandlerMap) {
        let _ = self.handlers.set(handlers);
    }
}

impl Default for ScheduleHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobHandler for ScheduleHandler {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult {
        let params: ScheduleParams = serde_json::from_value(ctx.params.clone()).map_err(|e| e.to_string())?;
        let handlers = self.handlers.get().ok_or("schedule handler not bound to the handler map")?;
        let target = handlers
            .get(&params.target_job_type)
            .ok_or_else(|| format!("no handler registered for {:?}", params.target_job_type))?
            .clone();

        let HandlerContext { job_id, user_id, params: _, cancel_event, progress, db } = ctx;
        let delegate_ctx = HandlerContext { job_id, user_id, params: params.target_params, cancel_event, progress, db };
        target.run(delegate_ctx).await
    }
}
