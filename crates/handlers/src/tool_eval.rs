//! Tool-eval handler: for each (model, case) pair, drives a single-turn or
//! multi-turn tool-calling exchange and scores the result.

use std::sync::Arc;

use bg_domain::experiment::TimelineSource;
use bg_domain::ids::new_id;
use bg_domain::judge::JudgeReport;
use bg_domain::tool::{Message, ToolCall};
use bg_domain::tool_eval::{CaseResult, ParamScoring, ToolEvalRun, ToolTestCase};
use bg_providers::ProviderRegistry;
use bg_registry::{HandlerContext, HandlerResult, JobHandler};
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::common::{check_cancelled, group_by_provider, join_provider_groups, truncate_error};
use crate::experiment as coordinator;
use crate::judge::judge_single_verdict;
use crate::target::{build_chat_request, resolve_target, RequestedSampling, ResolvedTarget};

#[derive(Debug, Clone, Deserialize)]
struct EvalTarget {
    provider_key: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct ToolEvalParams {
    suite_id: String,
    targets: Vec<EvalTarget>,
    #[serde(default)]
    sampling: RequestedSampling,
    #[serde(default)]
    experiment_id: Option<String>,
    #[serde(default)]
    max_rounds: u32,
    #[serde(default)]
    judge_provider_key: Option<String>,
    #[serde(default)]
    judge_model_id: Option<String>,
    #[serde(default)]
    judge_instructions: Option<String>,
    #[serde(default = "default_judge_concurrency")]
    judge_concurrency: usize,
}

fn default_max_rounds(v: u32) -> u32 {
    if v == 0 {
        4
    } else {
        v
    }
}

fn default_judge_concurrency() -> usize {
    4
}

pub struct ToolEvalHandler {
    providers: Arc<ProviderRegistry>,
}

impl ToolEvalHandler {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    async fn run_case(
        &self,
        ctx: &HandlerContext,
        target: &ResolvedTarget,
        case: &ToolTestCase,
        tool_defs: &[bg_domain::tool::ToolDefinition],
        sampling: &RequestedSampling,
        run_id: &str,
        max_rounds: u32,
        completed: &std::sync::atomic::AtomicUsize,
        total: usize,
    ) -> CaseResult {
        let mut messages = vec![Message::user(case.prompt.clone())];
        let mut tool_chain: Vec<serde_json::Value> = Vec::new();
        let mut intermediate_tool_names: Vec<String> = Vec::new();
        let mut rounds_used: u32 = 0;
        let mut final_call: Option<ToolCall> = None;
        let mut raw_request = None;
        let mut raw_response = None;
        let mut last_error = None;

        let valid_prerequisites: Vec<String> = case
            .multi_turn_config_json
            .as_ref()
            .and_then(|cfg| cfg.get("valid_prerequisites"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let optimal_hops = case
            .multi_turn_config_json
            .as_ref()
            .and_then(|cfg| cfg.get("optimal_hops"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(2);

        loop {
            let (req, _adjustments) = match build_chat_request(target, messages.clone(), tool_defs.to_vec(), sampling, false) {
                Ok(v) => v,
                Err(err) => {
                    last_error = Some(truncate_error(err));
                    break;
                }
            };
            if raw_request.is_none() {
                raw_request = serde_json::to_value(&req.model).ok();
            }

            rounds_used += 1;
            let response = match target.provider.chat(&req).await {
                Ok(r) => r,
                Err(err) => {
                    last_error = Some(truncate_error(err));
                    break;
                }
            };
            raw_response = serde_json::to_value(&response.content).ok();

            let call = response
                .tool_calls
                .first()
                .cloned()
                .or_else(|| extract_json_tool_call(&response.content));

            let Some(call) = call else {
                final_call = None;
                break;
            };

            tool_chain.push(serde_json::json!({
                "round": rounds_used,
                "tool_name": call.tool_name,
                "arguments": call.arguments,
            }));

            if !case.should_call_tool || case.matches_expected_tool(&call.tool_name) || rounds_used >= max_rounds {
                final_call = Some(call);
                break;
            }

            intermediate_tool_names.push(call.tool_name.clone());
            messages.push(Message::assistant_tool_call(&call));
            let mock_response = mock_tool_response(case, &call.tool_name);
            messages.push(Message::tool_result(call.call_id.clone(), mock_response, false));
        }

        let actual_tool = final_call.as_ref().map(|c| c.tool_name.clone());
        let actual_params_json = final_call.as_ref().map(|c| c.arguments.clone());

        let (tool_selection_score, irrelevance_score) = if case.should_call_tool {
            let score = match &actual_tool {
                Some(t) if case.matches_expected_tool(t) => 1.0,
                _ => 0.0,
            };
            (score, None)
        } else {
            let score = if actual_tool.is_none() { 1.0 } else { 0.0 };
            (score, Some(score))
        };

        let param_accuracy = if case.should_call_tool {
            case.expected_params_json
                .as_ref()
                .zip(actual_params_json.as_ref())
                .map(|(expected, actual)| score_params(case.param_scoring, expected, actual))
        } else {
            None
        };

        let overall_score = CaseResult::compute_overall_score(tool_selection_score, param_accuracy);

        let (efficiency_score, completion_score, redundancy_penalty, detour_penalty) = if case.multi_turn_config_json.is_some() {
            let final_matched = actual_tool.as_ref().map(|t| case.matches_expected_tool(t)).unwrap_or(false);
            let path_valid = valid_prerequisites.is_empty() || intermediate_tool_names.iter().all(|n| valid_prerequisites.contains(n));
            (
                Some(CaseResult::compute_efficiency_score(optimal_hops, rounds_used.max(1))),
                Some(CaseResult::compute_completion_score(final_matched, path_valid)),
                Some(CaseResult::compute_redundancy_penalty(&intermediate_tool_names)),
                Some(CaseResult::compute_detour_penalty(&intermediate_tool_names, &valid_prerequisites)),
            )
        } else {
            (None, None, None, None)
        };

        let result = CaseResult {
            id: new_id(),
            run_id: run_id.to_string(),
            test_case_id: case.id.clone(),
            provider_key: target.provider_key.clone(),
            model_id: target.model_id.clone(),
            tool_selection_score,
            param_accuracy,
            overall_score,
            irrelevance_score,
            actual_tool,
            actual_params_json,
            success: last_error.is_none(),
            error: last_error,
            latency_ms: 0,
            raw_request,
            raw_response,
            completion_score,
            efficiency_score,
            redundancy_penalty,
            detour_penalty,
            tool_chain_json: if tool_chain.is_empty() { None } else { Some(serde_json::json!(tool_chain)) },
        };

        ctx.progress.emit(bg_domain::ws::ServerMessage::ToolEvalResult {
            job_id: ctx.job_id.clone(),
            payload: serde_json::to_value(&result).unwrap_or(serde_json::json!({})),
        });
        let done = completed.fetch_add(1, std::sync::atomic::Ordering::Relaxed) + 1;
        ctx.progress.emit(bg_domain::ws::ServerMessage::ToolEvalProgress {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"completed": done, "total": total}),
        });

        result
    }

    /// Post-eval inline judging: once every case result for this run is
    /// durable, fans a verdict request per case out through a
    /// semaphore-bounded pool (default width `judge_concurrency`, capped to
    /// 1 when the judge shares a provider credential with any eval target
    /// so a single slow endpoint can't self-contend) and persists a
    /// `JudgeReport` the same shape `judge.rs` produces for a standalone
    /// judging job, with `subject_ref` pointing at this run directly instead
    /// of requiring a second, explicitly-submitted job.
    async fn judge_inline(
        &self,
        ctx: &HandlerContext,
        params: &ToolEvalParams,
        judge_provider_key: &str,
        judge_model_id: &str,
        run_id: &str,
        results: &[CaseResult],
    ) {
        let judge_target = match resolve_target(&ctx.db, &self.providers, &ctx.user_id, judge_provider_key, judge_model_id) {
            Ok(t) => t,
            Err(err) => {
                tracing::warn!(%err, "skipping inline tool-eval judging: judge target unresolvable");
                return;
            }
        };

        let shares_endpoint = params.targets.iter().any(|t| t.provider_key == judge_provider_key);
        let concurrency = if shares_endpoint { 1 } else { params.judge_concurrency.max(1) };

        let report = JudgeReport {
            id: new_id(),
            user_id: ctx.user_id.clone(),
            job_id: ctx.job_id.clone(),
            experiment_id: params.experiment_id.clone(),
            subject_ref: run_id.to_string(),
            judge_provider_key: judge_provider_key.to_string(),
            judge_model_id: judge_model_id.to_string(),
            criteria: params.judge_instructions.clone().unwrap_or_default(),
            parent_report_id: None,
            version: 1,
            summary: None,
            created_at: chrono::Utc::now(),
        };
        if let Err(err) = ctx.db.insert_judge_report_header(&report) {
            tracing::warn!(%err, "skipping inline tool-eval judging: report insert failed");
            return;
        }
        ctx.progress.emit(bg_domain::ws::ServerMessage::JudgeStart {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"report_id": report.id, "case_count": results.len(), "concurrency": concurrency}),
        });

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = Vec::with_capacity(results.len());
        for case in results.iter().cloned() {
            if check_cancelled(&ctx.cancel_event).is_err() {
                break;
            }
            let semaphore = semaphore.clone();
            let judge_target = judge_target.clone();
            let report_id = report.id.clone();
            let instructions = params.judge_instructions.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                judge_single_verdict(&judge_target, &report_id, instructions.as_deref(), &case).await
            }));
        }

        let mut verdicts = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Ok(verdict) = task.await {
                ctx.progress.emit(bg_domain::ws::ServerMessage::JudgeVerdict {
                    job_id: ctx.job_id.clone(),
                    payload: serde_json::to_value(&verdict).unwrap_or(serde_json::json!({})),
                });
                verdicts.push(verdict);
            }
        }

        let avg_judge_score = if verdicts.is_empty() { 0.0 } else { verdicts.iter().map(|v| v.score).sum::<f64>() / verdicts.len() as f64 };
        let summary = format!("judged {} cases, average score {:.2}", verdicts.len(), avg_judge_score);
        if !verdicts.is_empty() {
            if let Err(err) = ctx.db.insert_judge_verdicts(&verdicts) {
                tracing::warn!(%err, "inline tool-eval judging: verdict insert failed");
            }
        }
        if let Err(err) = ctx.db.set_judge_summary(&report.id, &summary) {
            tracing::warn!(%err, "inline tool-eval judging: summary persist failed");
        }
        ctx.progress.emit(bg_domain::ws::ServerMessage::JudgeReport {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"report_id": report.id, "summary": summary}),
        });
        ctx.progress.emit(bg_domain::ws::ServerMessage::JudgeComplete {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"report_id": report.id, "verdict_count": verdicts.len()}),
        });
    }
}

/// Falls back to regex-extracting a JSON object from plain content when a
/// model produced JSON-shaped text instead of a structured tool call.
fn extract_json_tool_call(content: &str) -> Option<ToolCall> {
    let re = regex::Regex::new(r"\{[\s\S]*\}").ok()?;
    let m = re.find(content)?;
    let value: serde_json::Value = serde_json::from_str(m.as_str()).ok()?;
    let tool_name = value.get("tool_name").or_else(|| value.get("name"))?.as_str()?.to_string();
    let arguments = value.get("arguments").or_else(|| value.get("parameters")).cloned().unwrap_or(serde_json::json!({}));
    Some(ToolCall { call_id: new_id(), tool_name, arguments })
}

fn mock_tool_response(case: &ToolTestCase, tool_name: &str) -> String {
    case.multi_turn_config_json
        .as_ref()
        .and_then(|cfg| cfg.get("mock_responses"))
        .and_then(|mocks| mocks.get(tool_name))
        .map(|v| v.to_string())
        .unwrap_or_else(|| serde_json::json!({"status": "ok"}).to_string())
}

fn score_params(scoring: ParamScoring, expected: &serde_json::Value, actual: &serde_json::Value) -> f64 {
    match scoring {
        ParamScoring::Exact => {
            if expected == actual {
                1.0
            } else {
                0.0
            }
        }
        // `contains`: every expected key must be present in `actual` with an
        // exactly equal value — extra keys in `actual` are fine, but no
        // tolerance for near-misses. Distinct from `fuzzy`/`semantic` below,
        // which tolerate case/whitespace and substring drift.
        ParamScoring::Contains => {
            let (Some(expected_obj), Some(actual_obj)) = (expected.as_object(), actual.as_object()) else {
                return if expected == actual { 1.0 } else { 0.0 };
            };
            if expected_obj.is_empty() {
                return 1.0;
            }
            let matched = expected_obj.iter().filter(|(k, v)| actual_obj.get(*k) == Some(*v)).count();
            matched as f64 / expected_obj.len() as f64
        }
        // `fuzzy`/`semantic` both collapse to the same key-overlap heuristic
        // with loose string comparison — this workspace has no embedding or
        // NLI primitive to tell them apart, so `semantic` degrades to fuzzy
        // string matching rather than a disguised no-op over `exact`.
        ParamScoring::Fuzzy | ParamScoring::Semantic => {
            let (Some(expected_obj), Some(actual_obj)) = (expected.as_object(), actual.as_object()) else {
                return if values_roughly_equal(expected, actual) { 1.0 } else { 0.0 };
            };
            if expected_obj.is_empty() {
                return 1.0;
            }
            let matched = expected_obj
                .iter()
                .filter(|(k, v)| actual_obj.get(*k).map(|av| values_roughly_equal(v, av)).unwrap_or(false))
                .count();
            matched as f64 / expected_obj.len() as f64
        }
    }
}

/// Loose equality for `fuzzy`/`semantic` scoring: case/whitespace-insensitive
/// for strings, and a substring match counts as equal in either direction.
fn values_roughly_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a.as_str(), b.as_str()) {
        (Some(sa), Some(sb)) => {
            let (sa, sb) = (sa.trim().to_lowercase(), sb.trim().to_lowercase());
            sa == sb || sa.contains(&sb) || sb.contains(&sa)
        }
        _ => a == b,
    }
}

#[async_trait::async_trait]
impl JobHandler for ToolEvalHandler {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult {
        let mut params: ToolEvalParams = serde_json::from_value(ctx.params.clone()).map_err(|e| e.to_string())?;
        params.max_rounds = default_max_rounds(params.max_rounds);
        if params.targets.is_empty() {
            return Err("tool-eval job has no targets".into());
        }

        let tool_rows = ctx.db.list_tool_definitions(&params.suite_id).map_err(|e| e.to_string())?;
        let cases = ctx.db.list_tool_test_cases(&params.suite_id).map_err(|e| e.to_string())?;
        if cases.is_empty() {
            return Err("suite has no test cases".into());
        }
        let tool_defs: Vec<bg_domain::tool::ToolDefinition> = tool_rows
            .iter()
            .map(|t| bg_domain::tool::ToolDefinition {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters_json.clone(),
            })
            .collect();

        let run = ToolEvalRun {
            id: new_id(),
            user_id: ctx.user_id.clone(),
            job_id: ctx.job_id.clone(),
            suite_id: params.suite_id.clone(),
            experiment_id: params.experiment_id.clone(),
            created_at: chrono::Utc::now(),
        };
        ctx.db.insert_tool_eval_run(&run).map_err(|e| e.to_string())?;
        ctx.progress.publish_result_ref(&run.id);

        let total = params.targets.len() * cases.len();
        ctx.progress.emit(bg_domain::ws::ServerMessage::ToolEvalInit {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"run_id": run.id, "suite_id": params.suite_id, "total_cases": total}),
        });
        let completed = std::sync::atomic::AtomicUsize::new(0);

        let groups = group_by_provider(params.targets.clone(), |t| &t.provider_key);
        let futures = groups.into_values().map(|targets| async {
            let mut out = Vec::new();
            for raw in targets {
                if check_cancelled(&ctx.cancel_event).is_err() {
                    return out;
                }
                let target = match resolve_target(&ctx.db, &self.providers, &ctx.user_id, &raw.provider_key, &raw.model_id) {
                    Ok(t) => t,
                    Err(err) => {
                        tracing::warn!(provider = %raw.provider_key, model = %raw.model_id, %err, "skipping unresolvable tool-eval target");
                        continue;
                    }
                };
                for case in &cases {
                    if check_cancelled(&ctx.cancel_event).is_err() {
                        return out;
                    }
                    let result = self
                        .run_case(&ctx, &target, case, &tool_defs, &params.sampling, &run.id, params.max_rounds, &completed, total)
                        .await;
                    out.push(result);
                }
            }
            out
        });

        let results: Vec<CaseResult> = join_provider_groups(futures.collect()).await.into_iter().flatten().collect();
        let done = completed.load(std::sync::atomic::Ordering::Relaxed);
        ctx.progress.report(((done * 100) / total.max(1)) as u8, &format!("{done}/{total} cases scored"));

        if !results.is_empty() {
            ctx.db.insert_case_results(&results).map_err(|e| e.to_string())?;
        }

        feed_leaderboard(&ctx, &self.providers, &results);

        let avg_score = average_overall_score(&results);
        let success_count = results.iter().filter(|r| r.success).count();
        ctx.progress.emit(bg_domain::ws::ServerMessage::ToolEvalSummary {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({
                "run_id": run.id,
                "total_cases": results.len(),
                "success_count": success_count,
                "average_overall_score": avg_score,
            }),
        });

        if let Some(experiment_id) = &params.experiment_id {
            if let Some(mut exp) = coordinator::load(&ctx.db, Some(experiment_id)).map_err(|e| e.to_string())? {
                if exp.baseline_run_id.is_none() {
                    coordinator::maybe_pin_baseline(&ctx.db, &mut exp, &run.id, &params.suite_id, avg_score).map_err(|e| e.to_string())?;
                }
                coordinator::maybe_promote(&ctx.db, &mut exp, avg_score, ctx.params.clone(), TimelineSource::ToolEval, &run.id)
                    .map_err(|e| e.to_string())?;
            }
        }

        if let (Some(judge_provider_key), Some(judge_model_id)) = (&params.judge_provider_key, &params.judge_model_id) {
            if !results.is_empty() {
                self.judge_inline(&ctx, &params, judge_provider_key, judge_model_id, &run.id, &results).await;
            }
        }

        ctx.progress.emit(bg_domain::ws::ServerMessage::ToolEvalComplete {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"run_id": run.id}),
        });

        Ok(Some(run.id))
    }
}

/// Opted-in users get their per-target accuracy folded into the public
/// leaderboard as soon as a run's results are durable. `tokens_per_second`/
/// `ttft_ms` stay 0 here — tool-eval doesn't measure latency or throughput,
/// only `benchmark.rs` feeds those columns; the weighted average tolerates
/// a zero-valued contributor the same way it tolerates any other sample.
fn feed_leaderboard(ctx: &HandlerContext, providers: &ProviderRegistry, results: &[CaseResult]) {
    let Ok(Some(user)) = ctx.db.get_user(&ctx.user_id) else {
        return;
    };
    if !user.leaderboard_opt_in {
        return;
    }

    let mut per_target: std::collections::BTreeMap<(String, String), Vec<f64>> = std::collections::BTreeMap::new();
    for r in results {
        per_target.entry((r.provider_key.clone(), r.model_id.clone())).or_default().push(r.overall_score);
    }

    for ((provider_key, model_id), scores) in per_target {
        let target = match resolve_target(&ctx.db, providers, &ctx.user_id, &provider_key, &model_id) {
            Ok(t) => t,
            Err(_) => continue,
        };
        let accuracy = scores.iter().sum::<f64>() / scores.len() as f64;
        if let Err(err) = ctx.db.leaderboard_upsert(&target.model.id, &target.model.display_name, accuracy, 0.0, 0.0, scores.len() as i64) {
            tracing::warn!(%err, model_db_id = %target.model.id, "leaderboard upsert failed");
        }
    }
}

fn average_overall_score(results: &[CaseResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.overall_score).sum::<f64>() / results.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_requires_exact_values_fuzzy_tolerates_near_misses() {
        let expected = serde_json::json!({"city": "Boston"});
        let near_miss = serde_json::json!({"city": " boston "});

        assert_eq!(score_params(ParamScoring::Contains, &expected, &near_miss), 0.0);
        assert_eq!(score_params(ParamScoring::Fuzzy, &expected, &near_miss), 1.0);
        assert_eq!(score_params(ParamScoring::Semantic, &expected, &near_miss), 1.0);
    }

    #[test]
    fn contains_ignores_extra_actual_keys() {
        let expected = serde_json::json!({"city": "Boston"});
        let actual = serde_json::json!({"city": "Boston", "units": "metric"});
        assert_eq!(score_params(ParamScoring::Contains, &expected, &actual), 1.0);
    }

    #[test]
    fn exact_rejects_any_deviation_fuzzy_does_not() {
        let expected = serde_json::json!({"query": "hello world"});
        let actual = serde_json::json!({"query": "hello"});
        assert_eq!(score_params(ParamScoring::Exact, &expected, &actual), 0.0);
        assert_eq!(score_params(ParamScoring::Fuzzy, &expected, &actual), 1.0);
    }

    #[test]
    fn partial_key_overlap_scores_fractionally() {
        let expected = serde_json::json!({"a": "1", "b": "2"});
        let actual = serde_json::json!({"a": "1", "b": "3"});
        assert_eq!(score_params(ParamScoring::Contains, &expected, &actual), 0.5);
    }
}
