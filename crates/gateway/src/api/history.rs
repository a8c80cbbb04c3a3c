//! Run-history endpoints: list/get/delete for benchmark, tool-eval,
//! param-tune, and prompt-tune runs, plus judge reports. Every handler here
//! follows the same shape — list scoped to the caller, get/delete checked
//! against ownership (or admin) before touching the row.

use axum::extract::{Path, State};
use axum::Json;
use bg_domain::error::Error;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

fn owned_or_admin(owner: &str, user: &AuthUser) -> ApiResult<()> {
    if owner == user.user_id || user.is_admin() {
        Ok(())
    } else {
        Err(Error::NotFound("run not found".into()).into())
    }
}

pub async fn list_benchmark_runs(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let runs = state.db.list_benchmark_runs_for_user(&user.user_id)?;
    Ok(Json(json!({ "runs": runs })))
}

pub async fn get_benchmark_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state.db.get_benchmark_run(&id)?.ok_or_else(|| Error::NotFound("run not found".into()))?;
    owned_or_admin(&run.user_id, &user)?;
    let results = state.db.list_benchmark_results(&id)?;
    Ok(Json(json!({ "run": run, "results": results })))
}

pub async fn delete_benchmark_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state.db.get_benchmark_run(&id)?.ok_or_else(|| Error::NotFound("run not found".into()))?;
    owned_or_admin(&run.user_id, &user)?;
    state.db.delete_benchmark_run(&id)?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn list_tool_eval_runs(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let runs = state.db.list_tool_eval_runs_for_user(&user.user_id)?;
    Ok(Json(json!({ "runs": runs })))
}

pub async fn get_tool_eval_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state.db.get_tool_eval_run(&id)?.ok_or_else(|| Error::NotFound("run not found".into()))?;
    owned_or_admin(&run.user_id, &user)?;
    let results = state.db.list_case_results(&id)?;
    Ok(Json(json!({ "run": run, "results": results })))
}

pub async fn delete_tool_eval_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state.db.get_tool_eval_run(&id)?.ok_or_else(|| Error::NotFound("run not found".into()))?;
    owned_or_admin(&run.user_id, &user)?;
    state.db.delete_tool_eval_run(&id)?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn list_param_tune_runs(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let runs = state.db.list_param_tune_runs_for_user(&user.user_id)?;
    Ok(Json(json!({ "runs": runs })))
}

pub async fn get_param_tune_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state.db.get_param_tune_run(&id)?.ok_or_else(|| Error::NotFound("run not found".into()))?;
    owned_or_admin(&run.user_id, &user)?;
    let combos = state.db.list_param_tune_combos(&id)?;
    Ok(Json(json!({ "run": run, "combos": combos })))
}

pub async fn delete_param_tune_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state.db.get_param_tune_run(&id)?.ok_or_else(|| Error::NotFound("run not found".into()))?;
    owned_or_admin(&run.user_id, &user)?;
    state.db.delete_param_tune_run(&id)?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn list_prompt_tune_runs(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let runs = state.db.list_prompt_tune_runs_for_user(&user.user_id)?;
    Ok(Json(json!({ "runs": runs })))
}

pub async fn get_prompt_tune_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state.db.get_prompt_tune_run(&id)?.ok_or_else(|| Error::NotFound("run not found".into()))?;
    owned_or_admin(&run.user_id, &user)?;
    let generations = state.db.list_prompt_tune_generations(&id)?;
    let mut candidates = Vec::new();
    for g in &generations {
        candidates.extend(state.db.list_prompt_tune_candidates(&g.id)?);
    }
    Ok(Json(json!({ "run": run, "generations": generations, "candidates": candidates })))
}

pub async fn delete_prompt_tune_run(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run = state.db.get_prompt_tune_run(&id)?.ok_or_else(|| Error::NotFound("run not found".into()))?;
    owned_or_admin(&run.user_id, &user)?;
    state.db.delete_prompt_tune_run(&id)?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn list_judge_reports(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let reports = state.db.list_judge_reports_for_user(&user.user_id)?;
    Ok(Json(json!({ "reports": reports })))
}

pub async fn get_judge_report(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let report = state.db.get_judge_report(&id)?.ok_or_else(|| Error::NotFound("report not found".into()))?;
    owned_or_admin(&report.user_id, &user)?;
    let verdicts = state.db.list_verdicts(&id)?;
    let chain = state.db.list_version_chain(&id)?;
    Ok(Json(json!({ "report": report, "verdicts": verdicts, "version_chain": chain })))
}

pub async fn delete_judge_report(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let report = state.db.get_judge_report(&id)?.ok_or_else(|| Error::NotFound("report not found".into()))?;
    owned_or_admin(&report.user_id, &user)?;
    state.db.delete_judge_report(&id)?;
    Ok(Json(json!({ "status": "ok" })))
}
