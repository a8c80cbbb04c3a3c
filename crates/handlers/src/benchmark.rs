//! Benchmark handler: streams N models across C context tiers for R runs
//! each, measuring time-to-first-token and throughput.
//!
//! Runs one independent provider call per (target, tier, ordinal) instead
//! of a multi-turn session.

use std::sync::Arc;

use bg_domain::benchmark::{BenchmarkResult, BenchmarkRun};
use bg_domain::ids::new_id;
use bg_domain::tool::Message;
use bg_providers::streaming::StreamAggregator;
use bg_providers::ProviderRegistry;
use bg_registry::{HandlerContext, HandlerResult, JobHandler};
use futures_util::StreamExt;
use serde::Deserialize;

use crate::common::{check_cancelled, group_by_provider, join_provider_groups, truncate_error};
use crate::target::{build_chat_request, resolve_target, RequestedSampling, ResolvedTarget};

#[derive(Debug, Clone, Deserialize)]
struct BenchmarkTarget {
    provider_key: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct BenchmarkParams {
    targets: Vec<BenchmarkTarget>,
    context_tiers: Vec<u32>,
    #[serde(default = "default_runs")]
    runs_per_tier: u32,
    prompt: String,
    #[serde(default)]
    sampling: RequestedSampling,
}

fn default_runs() -> u32 {
    3
}

pub struct BenchmarkHandler {
    providers: Arc<ProviderRegistry>,
}

impl BenchmarkHandler {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    async fn run_target(
        &self,
        ctx: &HandlerContext,
        run_id: &str,
        raw: BenchmarkTarget,
        context_tiers: &[u32],
        runs_per_tier: u32,
        prompt: &str,
        sampling: &RequestedSampling,
    ) -> Vec<BenchmarkResult> {
        let target = match resolve_target(&ctx.db, &self.providers, &ctx.user_id, &raw.provider_key, &raw.model_id) {
            Ok(t) => t,
            Err(err) => {
                return vec![failed_result(run_id, &raw.provider_key, &raw.model_id, 0, 0, truncate_error(err))];
            }
        };

        let max_tokens = sampling.max_tokens.unwrap_or(1024) as u32;
        let context_window = target.capabilities.context_window_tokens.unwrap_or(target.model.context_window);

        let mut results = Vec::new();
        for &tier in context_tiers {
            if check_cancelled(&ctx.cancel_event).is_err() {
                return results;
            }
            if !BenchmarkResult::tier_eligible(tier, context_window, max_tokens) {
                continue;
            }
            for ordinal in 0..runs_per_tier {
                if check_cancelled(&ctx.cancel_event).is_err() {
                    return results;
                }
                let result = self.run_one(ctx, &target, prompt, sampling, tier, ordinal, run_id).await;
                ctx.progress.report(
                    0,
                    &format!(
                        "{}/{} tier={} run={} success={}",
                        result.provider_key, result.model_id, result.context_tier, result.run_ordinal, result.success
                    ),
                );
                ctx.progress.emit(bg_domain::ws::ServerMessage::BenchmarkResult {
                    job_id: ctx.progress.job_id().to_string(),
                    payload: serde_json::to_value(&result).unwrap_or(serde_json::json!({})),
                });
                results.push(result);
            }
        }
        results
    }

    async fn run_one(
        &self,
        ctx: &HandlerContext,
        target: &ResolvedTarget,
        prompt: &str,
        sampling: &RequestedSampling,
        tier: u32,
        ordinal: u32,
        run_id: &str,
    ) -> BenchmarkResult {
        let messages = vec![Message::user(prompt)];
        let (req, _adjustments) = match build_chat_request(target, messages, Vec::new(), sampling, false) {
            Ok(v) => v,
            Err(err) => {
                return failed_result(run_id, &target.provider_key, &target.model_id, tier, ordinal, truncate_error(err));
            }
        };

        let mut agg = StreamAggregator::new();
        let mut success = true;
        let mut error = None;
        match target.provider.chat_stream(&req).await {
            Ok(mut stream) => loop {
                match tokio::time::timeout(std::time::Duration::from_secs(15), stream.next()).await {
                    Ok(Some(Ok(ev))) => agg.on_event(&ev),
                    Ok(Some(Err(err))) => {
                        success = false;
                        error = Some(truncate_error(err));
                        break;
                    }
                    Ok(None) => break,
                    Err(_elapsed) => {
                        ctx.progress.emit(bg_domain::ws::ServerMessage::BenchmarkProgress {
                            job_id: ctx.job_id.clone(),
                            payload: serde_json::json!({
                                "provider_key": target.provider_key,
                                "model_id": target.model_id,
                                "tier": tier,
                                "ordinal": ordinal,
                                "status": "idle",
                            }),
                        });
                    }
                }
            },
            Err(err) => {
                success = false;
                error = Some(truncate_error(err));
            }
        }

        let output_tokens = agg.output_tokens();
        let input_tokens = agg.input_tokens();
        let total_time_s = agg.total_time_s();
        let ttft_ms = agg.ttft_ms();
        let input_tokens_per_second = match (input_tokens, ttft_ms) {
            (Some(it), Some(t)) => BenchmarkResult::compute_input_tokens_per_second(it, t),
            _ => None,
        };

        BenchmarkResult {
            id: new_id(),
            run_id: run_id.to_string(),
            provider_key: target.provider_key.clone(),
            model_id: target.model_id.clone(),
            context_tier: tier,
            run_ordinal: ordinal,
            ttft_ms,
            total_time_s: Some(total_time_s),
            output_tokens: Some(output_tokens),
            input_tokens,
            tokens_per_second: BenchmarkResult::compute_tokens_per_second(output_tokens, total_time_s),
            input_tokens_per_second,
            cost: None,
            success,
            error,
        }
    }
}

fn failed_result(run_id: &str, provider_key: &str, model_id: &str, tier: u32, ordinal: u32, error: String) -> BenchmarkResult {
    BenchmarkResult {
        id: new_id(),
        run_id: run_id.to_string(),
        provider_key: provider_key.to_string(),
        model_id: model_id.to_string(),
        context_tier: tier,
        run_ordinal: ordinal,
        ttft_ms: None,
        total_time_s: None,
        output_tokens: None,
        input_tokens: None,
        tokens_per_second: None,
        input_tokens_per_second: None,
        cost: None,
        success: false,
        error: Some(error),
    }
}

#[async_trait::async_trait]
impl JobHandler for BenchmarkHandler {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult {
        let params: BenchmarkParams = serde_json::from_value(ctx.params.clone()).map_err(|e| e.to_string())?;
        if params.targets.is_empty() {
            return Err("benchmark job has no targets".into());
        }
        if params.context_tiers.is_empty() {
            return Err("benchmark job has no context tiers".into());
        }

        let run = BenchmarkRun {
            id: new_id(),
            user_id: ctx.user_id.clone(),
            job_id: ctx.job_id.clone(),
            experiment_id: None,
            created_at: chrono::Utc::now(),
            config_json: ctx.params.clone(),
        };
        ctx.db.insert_benchmark_run(&run).map_err(|e| e.to_string())?;
        ctx.progress.publish_result_ref(&run.id);
        ctx.progress.emit(bg_domain::ws::ServerMessage::BenchmarkInit {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({
                "run_id": run.id,
                "target_count": params.targets.len(),
                "context_tiers": params.context_tiers,
                "runs_per_tier": params.runs_per_tier,
            }),
        });

        let groups = group_by_provider(params.targets.clone(), |t| &t.provider_key);
        let futures = groups.into_values().map(|targets| {
            let ctx = &ctx;
            let run_id = run.id.clone();
            let context_tiers = params.context_tiers.clone();
            let prompt = params.prompt.clone();
            let sampling = params.sampling.clone();
            async move {
                let mut out = Vec::new();
                for target in targets {
                    out.extend(
                        self.run_target(
                            ctx,
                            &run_id,
                            target,
                            &context_tiers,
                            params.runs_per_tier,
                            &prompt,
                            &sampling,
                        )
                        .await,
                    );
                }
                out
            }
        });

        let results: Vec<BenchmarkResult> = join_provider_groups(futures.collect()).await.into_iter().flatten().collect();
        if !results.is_empty() {
            ctx.db.insert_benchmark_results(&results).map_err(|e| e.to_string())?;
        }

        Ok(Some(run.id))
    }
}
