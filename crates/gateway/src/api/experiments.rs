//! Experiment Coordinator surface: create/list/get, baseline pinning, and
//! timeline assembly. `run-best` is a convenience alias over the generic
//! job-submission endpoint — rerunning a best config is just another
//! `experiment_run_best` job.

use axum::extract::{Path, State};
use axum::Json;
use bg_domain::error::Error;
use bg_domain::experiment::{timeline, Experiment, TimelineSource, TimelineSourceRow};
use bg_domain::job::{JobType, DEFAULT_TIMEOUT_SECONDS};
use bg_registry::SubmitDenial;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn owned_or_admin(exp: &Experiment, user: &AuthUser) -> ApiResult<()> {
    if exp.user_id == user.user_id || user.is_admin() {
        Ok(())
    } else {
        Err(Error::NotFound("experiment not found".into()).into())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateExperimentBody {
    pub name: String,
    pub suite_id: String,
}

pub async fn create(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateExperimentBody>,
) -> ApiResult<Json<Experiment>> {
    let exp = Experiment::new(&user.user_id, body.name, body.suite_id);
    state.db.insert_experiment(&exp)?;
    Ok(Json(exp))
}

pub async fn list(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let experiments = state.db.list_experiments_for_user(&user.user_id)?;
    Ok(Json(json!({ "experiments": experiments })))
}

pub async fn get(State(state): State<AppState>, user: AuthUser, Path(id): Path<String>) -> ApiResult<Json<Experiment>> {
    let exp = state.db.get_experiment(&id)?.ok_or_else(|| Error::NotFound("experiment not found".into()))?;
    owned_or_admin(&exp, &user)?;
    Ok(Json(exp))
}

pub async fn delete(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let exp = state.db.get_experiment(&id)?.ok_or_else(|| Error::NotFound("experiment not found".into()))?;
    owned_or_admin(&exp, &user)?;
    state.db.delete_experiment(&id)?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct PinBaselineBody {
    pub eval_run_id: String,
    pub suite_id: String,
    pub baseline_score: f64,
}

pub async fn pin_baseline(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<PinBaselineBody>,
) -> ApiResult<Json<Experiment>> {
    let mut exp = state.db.get_experiment(&id)?.ok_or_else(|| Error::NotFound("experiment not found".into()))?;
    owned_or_admin(&exp, &user)?;
    exp.pin_baseline(body.eval_run_id, &body.suite_id, body.baseline_score)?;
    state.db.update_baseline(&exp)?;
    Ok(Json(exp))
}

/// Builds the union of tool-eval/param-tune/prompt-tune/judge rows linked to
/// an experiment. Param-tune and prompt-tune report at run granularity (the
/// run's winning combo/candidate) rather than every sampled point, since
/// only the winner carries a timestamp worth plotting.
pub async fn get_timeline(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let exp = state.db.get_experiment(&id)?.ok_or_else(|| Error::NotFound("experiment not found".into()))?;
    owned_or_admin(&exp, &user)?;

    let mut rows: Vec<TimelineSourceRow> = Vec::new();

    for run in state.db.list_tool_eval_runs_for_experiment(&id)? {
        let cases = state.db.list_case_results(&run.id)?;
        if cases.is_empty() {
            continue;
        }
        let avg = cases.iter().map(|c| c.overall_score).sum::<f64>() / cases.len() as f64;
        rows.push(TimelineSourceRow {
            source: TimelineSource::ToolEval,
            source_id: run.id.clone(),
            score: avg,
            config_summary: json!({ "suite_id": run.suite_id }),
            created_at: run.created_at,
        });
    }

    for run in state.db.list_param_tune_runs_for_experiment(&id)? {
        let combos = state.db.list_param_tune_combos(&run.id)?;
        if let Some(best) = bg_domain::param_tune::ParamTuneCombo::pick_best(&combos, false) {
            rows.push(TimelineSourceRow {
                source: TimelineSource::ParamTune,
                source_id: best.id.clone(),
                score: best.objective_value.unwrap_or(0.0),
                config_summary: best.params_json.clone(),
                created_at: run.created_at,
            });
        }
    }

    for run in state.db.list_prompt_tune_runs_for_experiment(&id)? {
        let generations = state.db.list_prompt_tune_generations(&run.id)?;
        let mut all_candidates = Vec::new();
        for g in &generations {
            all_candidates.extend(state.db.list_prompt_tune_candidates(&g.id)?);
        }
        if let Some(best) = bg_domain::prompt_tune::PromptTuneCandidate::pick_best(&all_candidates) {
            rows.push(TimelineSourceRow {
                source: TimelineSource::PromptTune,
                source_id: best.id.clone(),
                score: best.score.unwrap_or(0.0),
                config_summary: json!({ "prompt_text": best.prompt_text }),
                created_at: run.created_at,
            });
        }
    }

    for report in state.db.list_judge_reports_for_experiment(&id)? {
        let verdicts = state.db.list_verdicts(&report.id)?;
        if verdicts.is_empty() {
            continue;
        }
        let avg = verdicts.iter().map(|v| v.score).sum::<f64>() / verdicts.len() as f64;
        rows.push(TimelineSourceRow {
            source: TimelineSource::Judge,
            source_id: report.id.clone(),
            score: avg,
            config_summary: json!({ "criteria": report.criteria, "judge_model_id": report.judge_model_id }),
            created_at: report.created_at,
        });
    }

    rows.sort_by_key(|r| r.created_at);
    let entries = timeline(&exp, &rows);
    Ok(Json(json!({ "timeline": entries })))
}

pub async fn run_best(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let exp = state.db.get_experiment(&id)?.ok_or_else(|| Error::NotFound("experiment not found".into()))?;
    owned_or_admin(&exp, &user)?;
    if exp.best_config_json.is_none() {
        return Err(Error::Conflict("experiment has no best config yet".into()).into());
    }

    match state.registry.submit(
        JobType::ExperimentRunBest,
        &user.user_id,
        json!({ "experiment_id": id }),
        DEFAULT_TIMEOUT_SECONDS,
        "re-running experiment best config",
    )? {
        Ok(job) => Ok(Json(json!({ "job_id": job.id, "status": "submitted" }))),
        Err(SubmitDenial::HourlyQuotaExceeded) => {
            Err(ApiError::from(Error::RateLimited("hourly benchmark quota exceeded".into())))
        }
    }
}
