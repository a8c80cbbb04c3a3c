//! Prompt-tune handler: quick single-generation search or a full
//! evolutionary loop, driven by a meta model that proposes candidate system
//! prompts, scored against a base model.

use std::sync::Arc;

use bg_domain::experiment::TimelineSource;
use bg_domain::ids::new_id;
use bg_domain::prompt_tune::{PromptTuneCandidate, PromptTuneGeneration, PromptTuneRun};
use bg_domain::tool::Message;
use bg_providers::ProviderRegistry;
use bg_registry::{HandlerContext, HandlerResult, JobHandler};
use serde::Deserialize;

use crate::common::{check_cancelled, truncate_error};
use crate::experiment as coordinator;
use crate::target::{build_chat_request, resolve_target, RequestedSampling, ResolvedTarget};

#[derive(Debug, Deserialize)]
struct PromptTuneParams {
    provider_key: String,
    model_id: String,
    base_prompt: String,
    eval_criteria: String,
    #[serde(default = "default_mode")]
    mode: String, // "quick" | "evolutionary"
    #[serde(default = "default_generations")]
    generations: u32,
    #[serde(default = "default_population")]
    population_size: u32,
    #[serde(default = "default_selection_ratio")]
    selection_ratio: f64,
    #[serde(default)]
    meta_provider_key: Option<String>,
    #[serde(default)]
    meta_model_id: Option<String>,
    #[serde(default)]
    experiment_id: Option<String>,
    /// User turns each candidate system prompt is evaluated against. A
    /// single legacy `eval_prompt` still works and becomes a one-case list.
    #[serde(default)]
    eval_cases: Vec<String>,
    #[serde(default)]
    eval_prompt: Option<String>,
}

fn default_mode() -> String {
    "quick".to_string()
}
fn default_generations() -> u32 {
    1
}
fn default_population() -> u32 {
    4
}
fn default_selection_ratio() -> f64 {
    0.5
}

pub struct PromptTuneHandler {
    providers: Arc<ProviderRegistry>,
}

impl PromptTuneHandler {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }

    /// Asks the meta model for `count` candidate system prompts mutating
    /// `seed_prompts` toward `eval_criteria`. Falls back to a templated
    /// mutation if the meta call fails, so a flaky meta model never stalls
    /// the whole generation.
    async fn propose_candidates(
        &self,
        meta_target: &ResolvedTarget,
        seed_prompts: &[(String, Option<String>)],
        eval_criteria: &str,
        count: u32,
    ) -> Vec<(String, Option<String>, Option<String>)> {
        let mut out = Vec::new();
        for i in 0..count {
            let (seed, parent_id) = seed_prompts[i as usize % seed_prompts.len()].clone();
            let instruction = format!(
                "Rewrite this system prompt to better satisfy: {eval_criteria}\n\nCurrent prompt:\n{seed}\n\nReturn only the rewritten prompt text."
            );
            let messages = vec![Message::user(instruction)];
            let sampling = RequestedSampling { temperature: Some(0.9), max_tokens: None, top_p: None };
            let candidate = match build_chat_request(meta_target, messages, Vec::new(), &sampling, false) {
                Ok((req, _)) => match bg_providers::retry::with_backoff(&[2, 4, 8], || {
                    let req = req.clone();
                    async move { meta_target.provider.chat(&req).await }
                })
                .await
                {
                    Ok(resp) if !resp.content.trim().is_empty() => resp.content.trim().to_string(),
                    _ => mutate_textually(&seed),
                },
                Err(_) => mutate_textually(&seed),
            };
            out.push((candidate, parent_id, Some("meta_rewrite".to_string())));
        }
        out
    }
}

fn mutate_textually(seed: &str) -> String {
    format!("{seed}\n\nBe precise and avoid unnecessary detail.")
}

/// Runs a candidate system prompt against every eval case and has the meta
/// model judge each completion against `eval_criteria`, averaging the
/// per-case judge scores into the candidate's score. Mirrors the
/// target-then-judge shape `judge.rs::judge_single_verdict` uses, just with
/// the completion generated fresh instead of read back from a prior run.
async fn score_candidate(
    target: &ResolvedTarget,
    judge: &ResolvedTarget,
    system_prompt: &str,
    eval_criteria: &str,
    eval_cases: &[String],
) -> (Option<f64>, bool, Option<String>, Option<String>) {
    let mut scores = Vec::with_capacity(eval_cases.len());
    let mut sample = None;
    let mut last_error = None;

    for eval_prompt in eval_cases {
        let messages = vec![Message::system(system_prompt.to_string()), Message::user(eval_prompt.clone())];
        let sampling = RequestedSampling::default();
        let response = match build_chat_request(target, messages, Vec::new(), &sampling, false) {
            Ok((req, _)) => target.provider.chat(&req).await,
            Err(err) => Err(err),
        };
        match response {
            Ok(resp) if !resp.content.trim().is_empty() => {
                let score = judge_prompt_quality(judge, eval_criteria, eval_prompt, &resp.content).await;
                if sample.is_none() {
                    sample = Some(resp.content.chars().take(500).collect::<String>());
                }
                scores.push(score);
            }
            Ok(_) => scores.push(0.0),
            Err(err) => last_error = Some(truncate_error(err)),
        }
    }

    if scores.is_empty() {
        return (None, false, Some(last_error.unwrap_or_else(|| "candidate produced no usable completions".to_string())), None);
    }

    let avg = scores.iter().sum::<f64>() / scores.len() as f64;
    (Some(avg), true, None, sample)
}

/// One judge call per case, scoring a candidate's completion against
/// `eval_criteria`. Falls back to 0.0 (not an error) when the judge call
/// fails or its response is unparsable, same degrade-gracefully behavior
/// `judge.rs::judge_single_verdict` uses for an unparsable verdict.
async fn judge_prompt_quality(judge: &ResolvedTarget, eval_criteria: &str, eval_prompt: &str, completion: &str) -> f64 {
    let prompt = format!(
        "Judge how well this completion satisfies the criteria below.\n\nCriteria: {eval_criteria}\n\nUser message: {eval_prompt}\n\nCompletion:\n{completion}\n\nRespond with a JSON object: {{\"score\": <0..1>, \"rationale\": \"...\"}}"
    );
    let messages = vec![Message::user(prompt)];
    let sampling = RequestedSampling::default();
    let score = match build_chat_request(judge, messages, Vec::new(), &sampling, true) {
        Ok((req, _)) => bg_providers::retry::with_backoff(&[2, 4, 8], || {
            let req = req.clone();
            async move { judge.provider.chat(&req).await }
        })
        .await
        .ok()
        .and_then(|resp| parse_quality_score(&resp.content)),
        Err(_) => None,
    };
    score.unwrap_or(0.0)
}

fn parse_quality_score(content: &str) -> Option<f64> {
    let re = regex::Regex::new(r"\{[\s\S]*\}").ok()?;
    let m = re.find(content)?;
    let value: serde_json::Value = serde_json::from_str(m.as_str()).ok()?;
    value.get("score")?.as_f64().map(|s| s.clamp(0.0, 1.0))
}

#[async_trait::async_trait]
impl JobHandler for PromptTuneHandler {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult {
        let params: PromptTuneParams = serde_json::from_value(ctx.params.clone()).map_err(|e| e.to_string())?;

        let target = resolve_target(&ctx.db, &self.providers, &ctx.user_id, &params.provider_key, &params.model_id)
            .map_err(|e| e.to_string())?;
        let meta_provider_key = params.meta_provider_key.as_deref().unwrap_or(&params.provider_key);
        let meta_model_id = params.meta_model_id.as_deref().unwrap_or(&params.model_id);
        let meta_target = resolve_target(&ctx.db, &self.providers, &ctx.user_id, meta_provider_key, meta_model_id).map_err(|e| e.to_string())?;

        let eval_cases: Vec<String> = if !params.eval_cases.is_empty() {
            params.eval_cases.clone()
        } else {
            params.eval_prompt.clone().into_iter().collect()
        };
        if eval_cases.is_empty() {
            return Err("prompt-tune requires at least one eval_prompt or eval_cases entry".into());
        }

        let generations = if params.mode == "evolutionary" { params.generations.max(1) } else { 1 };
        let population_size = params.population_size.max(1);

        let run = PromptTuneRun {
            id: new_id(),
            user_id: ctx.user_id.clone(),
            job_id: ctx.job_id.clone(),
            experiment_id: params.experiment_id.clone(),
            provider_key: params.provider_key.clone(),
            model_id: params.model_id.clone(),
            base_prompt: params.base_prompt.clone(),
            eval_criteria: params.eval_criteria.clone(),
            generations,
            population_size,
            created_at: chrono::Utc::now(),
        };
        ctx.db.insert_prompt_tune_run(&run).map_err(|e| e.to_string())?;
        ctx.progress.publish_result_ref(&run.id);

        let mut survivors: Vec<(String, Option<String>)> = vec![(params.base_prompt.clone(), None)];
        let mut overall_best: Option<PromptTuneCandidate> = None;

        for gen_index in 0..generations {
            if check_cancelled(&ctx.cancel_event).is_err() {
                break;
            }
            let generation = PromptTuneGeneration {
                id: new_id(),
                run_id: run.id.clone(),
                generation_index: gen_index,
                best_score: None,
                created_at: chrono::Utc::now(),
            };
            ctx.db.insert_prompt_tune_generation(&generation).map_err(|e| e.to_string())?;
            ctx.progress.emit(bg_domain::ws::ServerMessage::GenerationStart {
                job_id: ctx.job_id.clone(),
                payload: serde_json::json!({"generation_index": gen_index, "population_size": population_size}),
            });

            let proposals = if gen_index == 0 {
                vec![(params.base_prompt.clone(), None::<String>, None::<String>)]
                    .into_iter()
                    .chain(
                        self.propose_candidates(&meta_target, &survivors, &params.eval_criteria, population_size.saturating_sub(1))
                            .await,
                    )
                    .collect::<Vec<_>>()
            } else {
                self.propose_candidates(&meta_target, &survivors, &params.eval_criteria, population_size).await
            };

            let mut candidates = Vec::new();
            for (prompt_text, parent_id, mutation_kind) in proposals {
                if check_cancelled(&ctx.cancel_event).is_err() {
                    break;
                }
                ctx.progress.emit(bg_domain::ws::ServerMessage::PromptGenerated {
                    job_id: ctx.job_id.clone(),
                    payload: serde_json::json!({"generation_index": gen_index, "prompt_text": prompt_text, "parent_candidate_id": parent_id}),
                });
                ctx.progress.emit(bg_domain::ws::ServerMessage::PromptEvalStart {
                    job_id: ctx.job_id.clone(),
                    payload: serde_json::json!({"generation_index": gen_index}),
                });
                let (score, success, error, output_sample) =
                    score_candidate(&target, &meta_target, &prompt_text, &params.eval_criteria, &eval_cases).await;
                let candidate = PromptTuneCandidate {
                    id: new_id(),
                    generation_id: generation.id.clone(),
                    prompt_text,
                    parent_candidate_id: parent_id,
                    mutation_kind,
                    score,
                    judge_rationale: None,
                    output_sample,
                    success,
                    error,
                    is_best_overall: false,
                };
                ctx.db.insert_prompt_tune_candidate(&candidate).map_err(|e| e.to_string())?;
                ctx.progress.emit(bg_domain::ws::ServerMessage::PromptEvalResult {
                    job_id: ctx.job_id.clone(),
                    payload: serde_json::to_value(&candidate).unwrap_or(serde_json::json!({})),
                });
                candidates.push(candidate);
            }

            ctx.progress.report(
                (((gen_index + 1) * 100) / generations) as u8,
                &format!("generation {}/{} scored", gen_index + 1, generations),
            );

            if let Some(best) = PromptTuneCandidate::pick_best(&candidates) {
                if overall_best.as_ref().and_then(|b| b.score).unwrap_or(f64::NEG_INFINITY) < best.score.unwrap_or(f64::NEG_INFINITY) {
                    overall_best = Some(best.clone());
                }
            }

            let keep = ((population_size as f64) * params.selection_ratio).ceil() as usize;
            survivors = PromptTuneCandidate::top_n(&candidates, keep.max(1))
                .into_iter()
                .map(|c| (c.prompt_text.clone(), Some(c.id.clone())))
                .collect();
            if survivors.is_empty() {
                survivors = vec![(params.base_prompt.clone(), None)];
            }

            let gen_best_score = PromptTuneCandidate::pick_best(&candidates).and_then(|c| c.score);
            ctx.db.set_generation_best_score(&generation.id, gen_best_score).map_err(|e| e.to_string())?;
            ctx.progress.emit(bg_domain::ws::ServerMessage::GenerationComplete {
                job_id: ctx.job_id.clone(),
                payload: serde_json::json!({"generation_index": gen_index, "best_score": gen_best_score}),
            });
        }

        if let Some(best) = &overall_best {
            ctx.db.mark_best_overall_for_run(&run.id, &best.id).map_err(|e| e.to_string())?;

            if let Some(experiment_id) = &params.experiment_id {
                if let Some(mut exp) = coordinator::load(&ctx.db, Some(experiment_id)).map_err(|e| e.to_string())? {
                    if let Some(score) = best.score {
                        coordinator::maybe_promote(
                            &ctx.db,
                            &mut exp,
                            score,
                            serde_json::json!({"prompt_text": best.prompt_text}),
                            TimelineSource::PromptTune,
                            &best.id,
                        )
                        .map_err(|e| e.to_string())?;
                    }
                }
            }
        }

        ctx.progress.emit(bg_domain::ws::ServerMessage::TuneComplete {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"run_id": run.id, "generations_run": generations}),
        });

        Ok(Some(run.id))
    }
}
