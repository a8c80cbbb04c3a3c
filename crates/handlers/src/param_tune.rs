//! Param-tune handler: expands a search space into combos for one
//! (provider, model) target, validates and deduplicates them against the
//! provider's conflict table, runs each against a prompt, and picks a
//! winner by objective.

use std::collections::BTreeMap;
use std::sync::Arc;

use bg_domain::experiment::TimelineSource;
use bg_domain::ids::new_id;
use bg_domain::param_tune::{ParamTuneCombo, ParamTuneRun};
use bg_domain::tool::Message;
use bg_providers::params::RequestedParam;
use bg_providers::streaming::StreamAggregator;
use bg_providers::ProviderRegistry;
use bg_registry::{HandlerContext, HandlerResult, JobHandler};
use futures_util::StreamExt;
use rand::Rng;
use serde::Deserialize;

use crate::common::{check_cancelled, truncate_error};
use crate::experiment as coordinator;
use crate::target::{build_chat_request, resolve_target, RequestedSampling};

#[derive(Debug, Clone, Deserialize)]
struct AxisRange {
    min: f64,
    max: f64,
    step: f64,
}

#[derive(Debug, Deserialize)]
struct ParamTuneParams {
    provider_key: String,
    model_id: String,
    prompt_text: String,
    #[serde(default = "default_strategy")]
    search_strategy: String,
    #[serde(default = "default_objective")]
    objective: String,
    #[serde(default)]
    ranges: BTreeMap<String, AxisRange>,
    #[serde(default)]
    categorical: BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default = "default_random_trials")]
    random_trials: usize,
    #[serde(default)]
    experiment_id: Option<String>,
}

fn default_strategy() -> String {
    "grid".to_string()
}
fn default_objective() -> String {
    "tokens_per_second".to_string()
}
fn default_random_trials() -> usize {
    10
}

/// One axis' candidate values, already typed as JSON for combo storage.
struct Axis {
    name: String,
    values: Vec<serde_json::Value>,
}

fn axis_values(ranges: &BTreeMap<String, AxisRange>, categorical: &BTreeMap<String, Vec<serde_json::Value>>) -> Vec<Axis> {
    let mut axes: Vec<Axis> = ranges
        .iter()
        .map(|(name, r)| {
            let mut values = Vec::new();
            let mut v = r.min;
            while v <= r.max + f64::EPSILON {
                values.push(serde_json::json!(v));
                v += r.step.max(f64::MIN_POSITIVE);
                if r.step <= 0.0 {
                    break;
                }
            }
            Axis { name: name.clone(), values }
        })
        .collect();
    axes.extend(categorical.iter().map(|(name, values)| Axis { name: name.clone(), values: values.clone() }));
    axes
}

fn grid_combos(axes: &[Axis]) -> Vec<BTreeMap<String, serde_json::Value>> {
    let mut combos: Vec<BTreeMap<String, serde_json::Value>> = vec![BTreeMap::new()];
    for axis in axes {
        let mut next = Vec::with_capacity(combos.len() * axis.values.len());
        for combo in &combos {
            for v in &axis.values {
                let mut c = combo.clone();
                c.insert(axis.name.clone(), v.clone());
                next.push(c);
            }
        }
        combos = next;
    }
    combos
}

fn random_combos(axes: &[Axis], trials: usize) -> Vec<BTreeMap<String, serde_json::Value>> {
    let mut rng = rand::thread_rng();
    (0..trials)
        .map(|_| {
            axes.iter()
                .filter_map(|axis| {
                    if axis.values.is_empty() {
                        None
                    } else {
                        let idx = rng.gen_range(0..axis.values.len());
                        Some((axis.name.clone(), axis.values[idx].clone()))
                    }
                })
                .collect()
        })
        .collect()
}

fn combo_to_sampling(combo: &BTreeMap<String, serde_json::Value>) -> RequestedSampling {
    RequestedSampling {
        temperature: combo.get("temperature").and_then(|v| v.as_f64()),
        max_tokens: combo.get("max_tokens").and_then(|v| v.as_u64()),
        top_p: combo.get("top_p").and_then(|v| v.as_f64()),
    }
}

/// Dedup key: the sorted tuple of params actually sent after clamping, so
/// combos that collapse into identical wire calls merge into one.
fn resolved_key(resolved: &[RequestedParam]) -> String {
    let mut parts: Vec<String> = resolved.iter().map(|p| format!("{}={}", p.name, p.value)).collect();
    parts.sort();
    parts.join("&")
}

pub struct ParamTuneHandler {
    providers: Arc<ProviderRegistry>,
}

impl ParamTuneHandler {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self { providers }
    }
}

#[async_trait::async_trait]
impl JobHandler for ParamTuneHandler {
    async fn run(&self, ctx: HandlerContext) -> HandlerResult {
        let params: ParamTuneParams = serde_json::from_value(ctx.params.clone()).map_err(|e| e.to_string())?;

        let target = resolve_target(&ctx.db, &self.providers, &ctx.user_id, &params.provider_key, &params.model_id)
            .map_err(|e| e.to_string())?;

        let axes = axis_values(&params.ranges, &params.categorical);
        let raw_combos = if params.search_strategy == "random" {
            random_combos(&axes, params.random_trials)
        } else {
            grid_combos(&axes)
        };

        let run = ParamTuneRun {
            id: new_id(),
            user_id: ctx.user_id.clone(),
            job_id: ctx.job_id.clone(),
            experiment_id: params.experiment_id.clone(),
            provider_key: params.provider_key.clone(),
            model_id: params.model_id.clone(),
            search_strategy: params.search_strategy.clone(),
            objective: params.objective.clone(),
            prompt_text: params.prompt_text.clone(),
            created_at: chrono::Utc::now(),
        };
        ctx.db.insert_param_tune_run(&run).map_err(|e| e.to_string())?;
        ctx.progress.publish_result_ref(&run.id);

        let mut seen_keys = std::collections::HashSet::new();
        let mut stored = Vec::new();
        let total = raw_combos.len().max(1);
        ctx.progress.emit(bg_domain::ws::ServerMessage::TuneStart {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"run_id": run.id, "total_combos": total, "strategy": params.search_strategy}),
        });

        for (i, combo) in raw_combos.into_iter().enumerate() {
            if check_cancelled(&ctx.cancel_event).is_err() {
                break;
            }
            let sampling = combo_to_sampling(&combo);
            let messages = vec![Message::user(params.prompt_text.clone())];
            let (req, adjustments) = match build_chat_request(&target, messages, Vec::new(), &sampling, false) {
                Ok(v) => v,
                Err(err) => {
                    stored.push(ParamTuneCombo {
                        id: new_id(),
                        run_id: run.id.clone(),
                        params_json: serde_json::json!({"requested": combo, "adjustments": []}),
                        objective_value: None,
                        ttft_ms: None,
                        total_time_s: None,
                        tokens_per_second: None,
                        output_sample: None,
                        success: false,
                        error: Some(truncate_error(err)),
                        is_best: false,
                    });
                    continue;
                }
            };

            let key = resolved_key(&[
                req.temperature.map(|v| RequestedParam { name: "temperature".into(), value: serde_json::json!(v) }),
                req.max_tokens.map(|v| RequestedParam { name: "max_tokens".into(), value: serde_json::json!(v) }),
                req.top_p.map(|v| RequestedParam { name: "top_p".into(), value: serde_json::json!(v) }),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>());
            if !seen_keys.insert(key) {
                continue;
            }

            let mut agg = StreamAggregator::new();
            let mut success = true;
            let mut error = None;
            match target.provider.chat_stream(&req).await {
                Ok(mut stream) => {
                    while let Some(event) = stream.next().await {
                        match event {
                            Ok(ev) => agg.on_event(&ev),
                            Err(err) => {
                                success = false;
                                error = Some(truncate_error(err));
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    success = false;
                    error = Some(truncate_error(err));
                }
            }

            let total_time_s = agg.total_time_s();
            let output_tokens = agg.output_tokens();
            let tokens_per_second = if success {
                bg_domain::benchmark::BenchmarkResult::compute_tokens_per_second(output_tokens, total_time_s)
            } else {
                None
            };
            let objective_value = if success {
                match params.objective.as_str() {
                    "tokens_per_second" => tokens_per_second,
                    "ttft_ms" => agg.ttft_ms().map(|v| -(v as f64)),
                    _ => tokens_per_second,
                }
            } else {
                None
            };

            let combo_row = ParamTuneCombo {
                id: new_id(),
                run_id: run.id.clone(),
                params_json: serde_json::json!({"requested": combo, "adjustments": adjustments}),
                objective_value,
                ttft_ms: agg.ttft_ms(),
                total_time_s: Some(total_time_s),
                tokens_per_second,
                output_sample: Some(agg.text().chars().take(500).collect()),
                success,
                error,
                is_best: false,
            };
            ctx.db.insert_param_tune_combo(&combo_row).map_err(|e| e.to_string())?;
            ctx.progress.report(
                (((i + 1) * 100) / total) as u8,
                &format!("combo {}/{}", i + 1, total),
            );
            ctx.progress.emit(bg_domain::ws::ServerMessage::ComboResult {
                job_id: ctx.job_id.clone(),
                payload: serde_json::to_value(&combo_row).unwrap_or(serde_json::json!({})),
            });
            stored.push(combo_row);
        }

        let minimize = params.objective == "ttft_ms";
        if let Some(best) = ParamTuneCombo::pick_best(&stored, minimize) {
            ctx.db.set_best_combo(&run.id, &best.id).map_err(|e| e.to_string())?;

            if let Some(experiment_id) = &params.experiment_id {
                if let Some(mut exp) = coordinator::load(&ctx.db, Some(experiment_id)).map_err(|e| e.to_string())? {
                    if let Some(score) = best.objective_value {
                        let promoted = coordinator::maybe_promote(
                            &ctx.db,
                            &mut exp,
                            score,
                            best.params_json.clone(),
                            TimelineSource::ParamTune,
                            &best.id,
                        )
                        .map_err(|e| e.to_string())?;
                        if promoted {
                            ctx.progress.emit(bg_domain::ws::ServerMessage::EvalPromoted {
                                job_id: ctx.job_id.clone(),
                                payload: serde_json::json!({"combo_id": best.id, "score": score}),
                            });
                        }
                    }
                }
            }
        }

        ctx.progress.emit(bg_domain::ws::ServerMessage::TuneComplete {
            job_id: ctx.job_id.clone(),
            payload: serde_json::json!({"run_id": run.id, "combos_run": stored.len()}),
        });

        Ok(Some(run.id))
    }
}
