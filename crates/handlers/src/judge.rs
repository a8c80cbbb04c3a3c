//! Judge handler: scores a completed tool-eval run with an LLM judge,
//! one verdict per case, fanned out through a semaphore so a slow judge
//! endpoint never serializes behind itself.

use std::sync::Arc;

use bg_domain::ids::new_id;
use bg_domain::judge::{JudgeReport, JudgeVerdict};
use bg_domain::tool::Message;
use bg_domain::tool_eval::CaseResult;
use bg_providers::retry::with_backoff;
use bg_providers::ProviderRegistry;
use bg_registry::{HandlerContext, HandlerResult, JobHandler};
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::common::check_cancelled;
use crate::target::{build_chat_request, resolve_target, RequestedSampling, ResolvedTarget};

#[derive(Debug, Deserialize)]
struct JudgeParams {
    eval_run_id: String,
    judge_provider_key: String,
    judge_model_id: String,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    experiment_id: Option<String>,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

pub struct JudgeHandler {
    providers: Arc<ProviderRegistry>,
}

impl JudgeHandler {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

/// One call to the judge model about a single case result. Non-streaming,
/// retried on transient provider errors the same way the meta-model path is.
pub(crate) async fn judge_single_verdict(
    judge: &ResolvedTarget,
    report_id: &str,
    instructions: Option<&str>,
    case: &CaseResult,
) -> JudgeVerdict {
    let criteria = instructions.unwrap_or("Judge whether the tool call and its parameters correctly satisfy the user's request.");
    let prompt = format!(
        "{criteria}\n\nTool called: {:?}\nParameters: {:?}\nExpected-tool match score: {:.2}\n\nRespond with a JSON object: {{\"score\": <0..1>, \"rationale\": \"...\"}}",
        case.actual_tool, case.actual_params_json, case.tool_selection_score,
    );
    let messages = vec![Message::user(prompt)];
    let sampling = RequestedSampling::default();

    let verdict = match build_chat_request(judge, messages, Vec::new(), &sampling, true) {
        Ok((req, _)) => with_backoff(&[2, 4, 8], || {
            let req = req.clone();
            async move { judge.provider.chat(&req).await }
        })
        .await
        .ok()
        .and_then(|resp| parse_verdict(&resp.content)),
        Err(_) => None,
    };

    let (score, rationale) = verdict.unwrap_or((case.overall_score, "judge response unparsable; falling back to the eval score".to_string()));

    JudgeVerdict {
        id: new_id(),
        report_id: report_id.to_string(),
        target_ref: case.id.clone(),
        score,
        rationale,
        raw_response: None,
    }
}

fn parse_verdict(content: &str) -> Option<(f64, String)> {
    let re = regex::Regex::new(r"\{[\s\S]*\}").ok()?;
    let m = re.find(content)?;
    let value: serde_json::Value = serde_json::from_str(m.as_str()).ok()?;
    let score = value.get("score")?.as_f64()?.clamp(0.0, 1.0);
    let rationale = value.get("rationale").and_then(|v| v.as_str()).unwrap_or("").to_string();
    Some((score, rationale))
}

/// Cross-case analysis once every verdict for a model has landed: asks the
/// judge for a one-line letter grade summarizing the whole set.
async fn summarize_model(judge: &ResolvedTarget, model_id: &str, verdicts: &[JudgeVerdict]) -> String {
    let avg = if verdicts.is_empty() { 0.0 } else { verdicts.iter().map(|v| v.score).sum::<f64>() / verdicts.len() as f64 };
    let prompt = format!(
        "Model {model_id} scored an average of {avg:.2} across {} judged cases. Give a one-sentence summary and a letter grade (A-F).",
        verdicts.len()
    );
    let messages = vec![Message::user(prompt)];
    let sampling = RequestedSampling::default();
    match build_chat_request(judge, messages, Vec::new(), &sampling, false) {
        Ok((req, _)) => with_backoff(&[2, 4, 8], || {
            let req = req.clone();
            async move { judge.provider.chat(&req).await }
        })
        .await
        .map(|r| r.content.trim().to_string())
        .unwrap_or_else(|_| format!("{model_id}: average score {avg:.2}")),
        Err(_) => format!("{model_id}: average score {avg:.2}"),
    }
}

#[async_trait::async_trait]
impl JobHandler for JudgeHandler {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult {
        let params: JudgeParams = serde_json::from_value(ctx.params.clone()).map_err(|e| e.to_string())?;

        let eval_run = ctx
            .db
            .get_tool_eval_run(&params.eval_run_id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("eval run {} not found", params.eval_run_id))?;
        let cases = ctx.db.list_case_results(&eval_run.id).map_err(|e| e.to_string())?;
        if cases.is_empty() {
            return Err("eval run has no case results to judge".into());
        }

        let judge = resolve_target(&ctx.db, &self.providers, &ctx.user_id, &params.judge_provider_key, &params.judge_model_id)
            .map_err(|e| e.to_string())?;

        // Capped to 1 when the judge shares an api_base with any target
        // already judged, so a single slow endpoint can't self-contend.
        let shares_endpoint = cases.iter().any(|c| c.provider_key == params.judge_provider_key);
        let concurrency = if shares_endpoint { 1 } else { params.concurrency.max(1) };

        let report = JudgeReport {
            id: new_id(),
            user_id: ctx.user_id.clone(),
            job_id: ctx.job_id.clone(),
            experiment_id: params.experiment_id.clone(),
            subject_ref: eval_run.id.clone(),
            judge_provider_key: params.judge_provider_key.clone(),
            judge_model_id: params.judge_model_id.clone(),
            criteria: params.instructions.clone().unwrap_or_default(),
            parent_report_id: None,
            version: 1,
            summary: None,
            created_at: chrono::Utc::now(),
        };
        // Inserted empty first so the UI can bind to result_ref immediately;
        // verdicts and the final summary are added once everything completes.
        ctx.db.insert_judge_report_header(&report).map_err(|e| e.to_string())?;
        ctx.progress.publish_result_ref(&report.id);
        ctx.progress.emit(bg_domain::ws::ServerMessage::JudgeStart {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"report_id": report.id, "case_count": cases.len(), "concurrency": concurrency}),
        });

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = Vec::with_capacity(cases.len());
        for case in cases.iter().cloned() {
            if check_cancelled(&ctx.cancel_event).is_err() {
                break;
            }
            let semaphore = semaphore.clone();
            let judge = judge.clone();
            let report_id = report.id.clone();
            let instructions = params.instructions.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                judge_single_verdict(&judge, &report_id, instructions.as_deref(), &case).await
            }));
        }

        let mut verdicts = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Ok(verdict) = task.await {
                ctx.progress.report(0, &format!("verdict for case {} scored", verdict.target_ref));
                ctx.progress.emit(bg_domain::ws::ServerMessage::JudgeVerdict {
                    job_id: ctx.job_id.clone(),
                    payload: serde_json::to_value(&verdict).unwrap_or(serde_json::json!({})),
                });
                verdicts.push(verdict);
            }
        }

        // Group by model via target_ref, since spawned tasks complete out of
        // the order `cases` was iterated in.
        let mut by_model: std::collections::BTreeMap<String, Vec<JudgeVerdict>> = std::collections::BTreeMap::new();
        for verdict in &verdicts {
            if let Some(case) = cases.iter().find(|c| c.id == verdict.target_ref) {
                by_model.entry(case.model_id.clone()).or_default().push(verdict.clone());
            }
        }

        let mut per_model = Vec::new();
        for (model_id, model_verdicts) in &by_model {
            let avg = model_verdicts.iter().map(|v| v.score).sum::<f64>() / model_verdicts.len().max(1) as f64;
            let grade = summarize_model(&judge, model_id, model_verdicts).await;
            per_model.push((model_id.clone(), avg, grade));
        }
        // Report-level grade is simply the best-scoring model's own summary.
        let best = per_model.iter().max_by(|a, b| a.1.total_cmp(&b.1));
        let header = best.map(|(model_id, avg, _)| format!("Best: {model_id} ({avg:.2})")).unwrap_or_default();
        let summary = std::iter::once(header)
            .chain(per_model.iter().map(|(_, _, grade)| grade.clone()))
            .collect::<Vec<_>>()
            .join("\n");

        if !verdicts.is_empty() {
            ctx.db.insert_judge_verdicts(&verdicts).map_err(|e| e.to_string())?;
        }
        ctx.db.set_judge_summary(&report.id, &summary).map_err(|e| e.to_string())?;
        ctx.progress.emit(bg_domain::ws::ServerMessage::JudgeReport {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"report_id": report.id, "summary": summary}),
        });
        ctx.progress.emit(bg_domain::ws::ServerMessage::JudgeComplete {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"report_id": report.id, "verdict_count": verdicts.len()}),
        });

        Ok(Some(report.id))
    }
}
