//! Re-runs an experiment's current best configuration through whichever
//! handler originally produced it, so a caller can re-validate a winner
//! (e.g. after a provider update) without re-deriving the winning config by
//! hand.

use std::sync::Arc;

use bg_domain::experiment::TimelineSource;
use bg_providers::ProviderRegistry;
use bg_registry::{HandlerContext, HandlerResult, JobHandler};
use serde::Deserialize;

use crate::judge::JudgeHandler;
use crate::param_tune::ParamTuneHandler;
use crate::prompt_tune::PromptTuneHandler;
use crate::tool_eval::ToolEvalHandler;

#[derive(Debug, Deserialize)]
struct ExperimentRunBestParams {
    experiment_id: String,
}

pub struct ExperimentRunBestHandler {
    providers: Arc<ProviderRegistry>,
}

impl ExperimentRunBestHandler {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

#[async_trait::async_trait]
impl JobHandler for ExperimentRunBestHandler {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult {
        let params: ExperimentRunBestParams = serde_json::from_value(ctx.params.clone()).map_err(|e| e.to_string())?;

        let exp = ctx
            .db
            .get_experiment(&params.experiment_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("experiment {} not found", params.experiment_id))?;
        let best_config = exp.best_config_json.clone().ok_or("experiment has no best config yet")?;
        let source = exp.best_source.ok_or("experiment has a best score but no recorded source")?;

        let HandlerContext { job_id, user_id, params: _, cancel_event, progress, db } = ctx;
        let delegate_ctx = HandlerContext { job_id, user_id, params: best_config, cancel_event, progress, db };

        match source {
            TimelineSource::ToolEval => ToolEvalHandler::new(self.providers.clone()).run(delegate_ctx).await,
            TimelineSource::ParamTune => ParamTuneHandler::new(self.providers.clone()).run(delegate_ctx).await,
            TimelineSource::PromptTune => PromptTuneHandler::new(self.providers.clone()).run(delegate_ctx).await,
            TimelineSource::Judge => JudgeHandler::new(self.providers.clone()).run(delegate_ctx).await,
        }
    }
}
