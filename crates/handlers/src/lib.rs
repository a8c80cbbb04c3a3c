//! Job handlers: one `JobHandler` impl per `JobType`, assembled into
//! the map the gateway hands to the Job Registry at startup.

pub mod benchmark;
pub mod common;
pub mod experiment;
pub mod experiment_run_best;
pub mod judge;
pub mod judge_compare;
pub mod param_tune;
pub mod prompt_tune;
pub mod schedule;
pub mod target;
pub mod tool_eval;

use std::collections::HashMap;
use std::sync::Arc;

use bg_domain::job::JobType;
use bg_providers::ProviderRegistry;

pub use benchmark::BenchmarkHandler;
pub use experiment_run_best::ExperimentRunBestHandler;
pub use judge::JudgeHandler;
pub use judge_compare::JudgeCompareHandler;
pub use param_tune::ParamTuneHandler;
pub use prompt_tune::PromptTuneHandler;
pub use schedule::{HandlerMap, ScheduleHandler};
pub use tool_eval::ToolEvalHandler;

/// Builds every handler the registry can dispatch to, wired against a
/// shared provider registry. `JobType::Schedule` is bound to the finished
/// map after the fact, since a schedule needs to be able to dispatch into
/// any other job type including itself.
pub fn build_handlers(providers: Arc<ProviderRegistry>) -> HandlerMap {
    let mut handlers: HandlerMap = HashMap::new();
    handlers.insert(JobType::Benchmark, Arc::new(BenchmarkHandler::new(providers.clone())));
    handlers.insert(JobType::ToolEval, Arc::new(ToolEvalHandler::new(providers.clone())));
    handlers.insert(JobType::ParamTune, Arc::new(ParamTuneHandler::new(providers.clone())));
    handlers.insert(JobType::PromptTune, Arc::new(PromptTuneHandler::new(providers.clone())));
    handlers.insert(JobType::Judge, Arc::new(JudgeHandler::new(providers.clone())));
    handlers.insert(JobType::JudgeCompare, Arc::new(JudgeCompareHandler::new(providers.clone())));
    handlers.insert(JobType::ExperimentRunBest, Arc::new(ExperimentRunBestHandler::new(providers.clone())));

    let schedule = Arc::new(ScheduleHandler::new());
    handlers.insert(JobType::Schedule, schedule.clone());
    schedule.bind(handlers.clone());

    handlers
}
