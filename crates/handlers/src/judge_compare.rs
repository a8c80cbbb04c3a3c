//! Judge-compare handler: head-to-head comparison of two tool-eval runs
//! over their shared test cases, judged by a third model.
//!
//! `JudgeReport`/`JudgeVerdict` only carry a single subject_ref/target_ref
//! each, with no dedicated "compare two subjects" shape. This handler
//! encodes the two runs being compared as `subject_ref = "{a}::{b}"`, each
//! verdict's `target_ref` as the shared test_case_id, and signs `score` so
//! +1.0 means model_a won the case, -1.0 means model_b won, 0.0 is a tie —
//! the per-model average score elsewhere in the crate already reads as
//! "higher is better", so this keeps the same convention instead of adding
//! a separate winner column.

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
struct JudgeCompareParams {
    eval_run_id_a: String,
    eval_run_id_b: String,
    judge_provider_key: String,
    judge_model_id: String,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default = "default_concurrency")]
    concurrency: usize,
}

fn default_concurrency() -> usize {
    4
}

pub struct JudgeCompareHandler {
    providers: Arc<ProviderRegistry>,
}

impl JudgeCompareHandler {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Winner {
    A,
    B,
    Tie,
}

impl Winner {
    fn score(self) -> f64 {
        match self {
            Winner::A => 1.0,
            Winner::B => -1.0,
            Winner::Tie => 0.0,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Winner::A => "model_a",
            Winner::B => "model_b",
            Winner::Tie => "tie",
        }
    }
}

async fn judge_one_case(judge: &ResolvedTarget, instructions: Option<&str>, a: &CaseResult, b: &CaseResult) -> (Winner, String) {
    let criteria = instructions.unwrap_or("Judge which response better satisfies the test case's intent.");
    let prompt = format!(
        "{criteria}\n\nModel A called tool {:?} with params {:?} (score {:.2}).\n\
         Model B called tool {:?} with params {:?} (score {:.2}).\n\n\
         Respond with JSON: {{\"winner\": \"model_a\"|\"model_b\"|\"tie\", \"rationale\": \"...\"}}",
        a.actual_tool, a.actual_params_json, a.overall_score, b.actual_tool, b.actual_params_json, b.overall_score,
    );
    let messages = vec![Message::user(prompt)];
    let sampling = RequestedSampling::default();

    let parsed = match build_chat_request(judge, messages, Vec::new(), &sampling, true) {
        Ok((req, _)) => with_backoff(&[2, 4, 8], || {
            let req = req.clone();
            async move { judge.provider.chat(&req).await }
        })
        .await
        .ok()
        .and_then(|resp| parse_case_verdict(&resp.content)),
        Err(_) => None,
    };

    parsed.unwrap_or_else(|| {
        // Fallback: compare the eval's own overall_score directly.
        let winner = if a.overall_score > b.overall_score {
            Winner::A
        } else if b.overall_score > a.overall_score {
            Winner::B
        } else {
            Winner::Tie
        };
        (winner, "judge response unparsable; falling back to eval scores".to_string())
    })
}

fn parse_case_verdict(content: &str) -> Option<(Winner, String)> {
    let re = regex::Regex::new(r"\{[\s\S]*\}").ok()?;
    let m = re.find(content)?;
    let value: serde_json::Value = serde_json::from_str(m.as_str()).ok()?;
    let winner = match value.get("winner")?.as_str()? {
        "model_a" => Winner::A,
        "model_b" => Winner::B,
        _ => Winner::Tie,
    };
    let rationale = value.get("rationale").and_then(|v| v.as_str()).unwrap_or("").to_string();
    Some((winner, rationale))
}

/// Asks the judge for one overall verdict across every per-case result.
/// Falls back to tallying per-case winners if the summary doesn't parse.
fn synthesize_summary(case_winners: &[Winner], model_summary: Option<String>) -> String {
    if let Some(summary) = model_summary {
        if !summary.trim().is_empty() {
            return summary;
        }
    }
    let a_wins = case_winners.iter().filter(|w| **w == Winner::A).count();
    let b_wins = case_winners.iter().filter(|w| **w == Winner::B).count();
    let ties = case_winners.iter().filter(|w| **w == Winner::Tie).count();
    let overall = if a_wins > b_wins {
        Winner::A
    } else if b_wins > a_wins {
        Winner::B
    } else {
        Winner::Tie
    };
    format!("{} (a_wins={a_wins}, b_wins={b_wins}, ties={ties})", overall.label())
}

#[async_trait::async_trait]
impl JobHandler for JudgeCompareHandler {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult {
        let params: JudgeCompareParams = serde_json::from_value(ctx.params.clone()).map_err(|e| e.to_string())?;

        let run_a = ctx
            .db
            .get_tool_eval_run(&params.eval_run_id_a)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("eval run {} not found", params.eval_run_id_a))?;
        let run_b = ctx
            .db
            .get_tool_eval_run(&params.eval_run_id_b)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("eval run {} not found", params.eval_run_id_b))?;

        let cases_a = ctx.db.list_case_results(&run_a.id).map_err(|e| e.to_string())?;
        let cases_b = ctx.db.list_case_results(&run_b.id).map_err(|e| e.to_string())?;

        let mut paired = Vec::new();
        for a in &cases_a {
            if let Some(b) = cases_b.iter().find(|b| b.test_case_id == a.test_case_id) {
                paired.push((a.clone(), b.clone()));
            }
        }
        if paired.is_empty() {
            return Err("the two eval runs share no test cases to compare".into());
        }

        let judge = resolve_target(&ctx.db, &self.providers, &ctx.user_id, &params.judge_provider_key, &params.judge_model_id)
            .map_err(|e| e.to_string())?;

        let report = JudgeReport {
            id: new_id(),
            user_id: ctx.user_id.clone(),
            job_id: ctx.job_id.clone(),
            experiment_id: None,
            subject_ref: format!("{}::{}", run_a.id, run_b.id),
            judge_provider_key: params.judge_provider_key.clone(),
            judge_model_id: params.judge_model_id.clone(),
            criteria: params.instructions.clone().unwrap_or_default(),
            parent_report_id: None,
            version: 1,
            summary: None,
            created_at: chrono::Utc::now(),
        };
        ctx.db.insert_judge_report_header(&report).map_err(|e| e.to_string())?;
        ctx.progress.publish_result_ref(&report.id);
        ctx.progress.emit(bg_domain::ws::ServerMessage::CompareStart {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"report_id": report.id, "run_id_a": run_a.id, "run_id_b": run_b.id, "case_count": paired.len()}),
        });

        let semaphore = Arc::new(Semaphore::new(params.concurrency.max(1)));
        let mut tasks = Vec::with_capacity(paired.len());
        for (a, b) in paired {
            if check_cancelled(&ctx.cancel_event).is_err() {
                break;
            }
            let semaphore = semaphore.clone();
            let judge = judge.clone();
            let instructions = params.instructions.clone();
            let report_id = report.id.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let (winner, rationale) = judge_one_case(&judge, instructions.as_deref(), &a, &b).await;
                let verdict = JudgeVerdict {
                    id: new_id(),
                    report_id,
                    target_ref: a.test_case_id.clone(),
                    score: winner.score(),
                    rationale,
                    raw_response: None,
                };
                (winner, verdict)
            }));
        }

        let mut case_winners = Vec::with_capacity(tasks.len());
        let mut verdicts = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Ok((winner, verdict)) = task.await {
                ctx.progress.report(0, &format!("case {} judged: {}", verdict.target_ref, winner.label()));
                ctx.progress.emit(bg_domain::ws::ServerMessage::CompareCase {
                    job_id: ctx.job_id.clone(),
                    payload: serde_json::json!({
                        "test_case_id": verdict.target_ref,
                        "winner": winner.label(),
                        "rationale": verdict.rationale,
                    }),
                });
                case_winners.push(winner);
                verdicts.push(verdict);
            }
        }

        let a_wins = case_winners.iter().filter(|w| **w == Winner::A).count();
        let b_wins = case_winners.iter().filter(|w| **w == Winner::B).count();
        let summary_prompt = format!(
            "Across {} compared cases, model A won {a_wins} and model B won {b_wins}. \
             Write one sentence declaring the overall winner (model_a, model_b, or tie) and why.",
            case_winners.len()
        );
        let model_summary = match build_chat_request(&judge, vec![Message::user(summary_prompt)], Vec::new(), &RequestedSampling::default(), false) {
            Ok((req, _)) => with_backoff(&[2, 4, 8], || {
                let req = req.clone();
                let provider = judge.provider.clone();
                async move { provider.chat(&req).await }
            })
            .await
            .ok()
            .map(|r| r.content.trim().to_string()),
            Err(_) => None,
        };

        let summary = synthesize_summary(&case_winners, model_summary);

        if !verdicts.is_empty() {
            ctx.db.insert_judge_verdicts(&verdicts).map_err(|e| e.to_string())?;
        }
        ctx.db.set_judge_summary(&report.id, &summary).map_err(|e| e.to_string())?;
        ctx.progress.emit(bg_domain::ws::ServerMessage::CompareComplete {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"report_id": report.id, "a_wins": a_wins, "b_wins": b_wins, "summary": summary}),
        });

        Ok(Some(report.id))
    }
}
