//! Schedules, model profiles, prompt versions, and per-user judge defaults.
//! None of these carry enough behavior to need their own module, matching
//! how the store layer groups them.

use axum::extract::{Path, State};
use axum::Json;
use bg_domain::error::Error;
use bg_domain::ids::new_id;
use bg_domain::job::JobType;
use bg_store::{ModelProfile, PromptVersion, RateLimitOverride, Schedule, UserJudgeSettings};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateScheduleBody {
    pub job_type: String,
    pub params: Value,
    pub cron_expr: String,
}

pub async fn list_schedules(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let schedules = state.db.list_schedules_for_user(&user.user_id)?;
    Ok(Json(json!({ "schedules": schedules })))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateScheduleBody>,
) -> ApiResult<Json<Schedule>> {
    JobType::from_str(&body.job_type).map_err(|_| Error::Validation(format!("unknown job type {}", body.job_type)))?;
    if !bg_domain::cron::is_valid(&body.cron_expr) {
        return Err(Error::Validation(format!("invalid cron expression: {}", body.cron_expr)).into());
    }
    let now = chrono::Utc::now();
    let next_run_at = bg_domain::cron::next_after(&body.cron_expr, &now);
    let schedule = Schedule {
        id: new_id(),
        user_id: user.user_id.clone(),
        job_type: body.job_type,
        params_json: body.params,
        cron_expr: body.cron_expr,
        enabled: true,
        last_run_at: None,
        next_run_at,
        created_at: now,
    };
    state.db.insert_schedule(&schedule)?;
    Ok(Json(schedule))
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledBody {
    pub enabled: bool,
}

pub async fn set_schedule_enabled(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SetEnabledBody>,
) -> ApiResult<Json<Value>> {
    let schedule = state.db.get_schedule(&id)?.ok_or_else(|| Error::NotFound("schedule not found".into()))?;
    if schedule.user_id != user.user_id && !user.is_admin() {
        return Err(Error::NotFound("schedule not found".into()).into());
    }
    state.db.set_schedule_enabled(&id, body.enabled)?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let schedule = state.db.get_schedule(&id)?.ok_or_else(|| Error::NotFound("schedule not found".into()))?;
    if schedule.user_id != user.user_id && !user.is_admin() {
        return Err(Error::NotFound("schedule not found".into()).into());
    }
    state.db.delete_schedule(&id)?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct CreateModelProfileBody {
    pub name: String,
    pub targets: Value,
}

pub async fn list_model_profiles(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let profiles = state.db.list_model_profiles_for_user(&user.user_id)?;
    Ok(Json(json!({ "profiles": profiles })))
}

pub async fn create_model_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateModelProfileBody>,
) -> ApiResult<Json<ModelProfile>> {
    let profile = ModelProfile {
        id: new_id(),
        user_id: user.user_id,
        name: body.name,
        targets_json: body.targets,
        created_at: chrono::Utc::now(),
    };
    state.db.insert_model_profile(&profile)?;
    Ok(Json(profile))
}

pub async fn delete_model_profile(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let owns = state.db.list_model_profiles_for_user(&user.user_id)?.iter().any(|p| p.id == id);
    if !owns && !user.is_admin() {
        return Err(Error::NotFound("model profile not found".into()).into());
    }
    state.db.delete_model_profile(&id)?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct CreatePromptVersionBody {
    pub name: String,
    pub prompt_text: String,
}

pub async fn list_prompt_versions(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let versions = state.db.list_prompt_versions_for_user(&user.user_id)?;
    Ok(Json(json!({ "prompt_versions": versions })))
}

pub async fn create_prompt_version(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreatePromptVersionBody>,
) -> ApiResult<Json<PromptVersion>> {
    let version = PromptVersion {
        id: new_id(),
        user_id: user.user_id,
        name: body.name,
        prompt_text: body.prompt_text,
        created_at: chrono::Utc::now(),
    };
    state.db.insert_prompt_version(&version)?;
    Ok(Json(version))
}

pub async fn get_judge_settings(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<UserJudgeSettings>> {
    let settings = state.db.get_user_judge_settings(&user.user_id)?.unwrap_or(UserJudgeSettings {
        user_id: user.user_id,
        ..Default::default()
    });
    Ok(Json(settings))
}

#[derive(Debug, Deserialize)]
pub struct JudgeSettingsBody {
    #[serde(default)]
    pub default_judge_provider_key: Option<String>,
    #[serde(default)]
    pub default_judge_model_id: Option<String>,
    #[serde(default)]
    pub default_criteria: Option<String>,
}

pub async fn set_judge_settings(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<JudgeSettingsBody>,
) -> ApiResult<Json<Value>> {
    state.db.set_user_judge_settings(&UserJudgeSettings {
        user_id: user.user_id,
        default_judge_provider_key: body.default_judge_provider_key,
        default_judge_model_id: body.default_judge_model_id,
        default_criteria: body.default_criteria,
    })?;
    Ok(Json(json!({ "status": "ok" })))
}

#[derive(Debug, Deserialize)]
pub struct RateLimitOverrideBody {
    #[serde(default)]
    pub benchmarks_per_hour: Option<i64>,
    #[serde(default)]
    pub max_concurrent: Option<i64>,
}

/// Admin-only: sets a per-user override for the default hourly/concurrency
/// limits baked into `Config.limits`.
pub async fn set_rate_limit_override(
    State(state): State<AppState>,
    user: AuthUser,
    Path(target_user_id): Path<String>,
    Json(body): Json<RateLimitOverrideBody>,
) -> ApiResult<Json<Value>> {
    user.require_admin().map_err(|_| Error::Auth("admin role required".into()))?;
    state.db.set_rate_limit_override(&RateLimitOverride {
        user_id: target_user_id,
        benchmarks_per_hour: body.benchmarks_per_hour,
        max_concurrent: body.max_concurrent,
    })?;
    Ok(Json(json!({ "status": "ok" })))
}
