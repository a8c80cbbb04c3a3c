//! Job submission, listing, and cancellation. One generic submit endpoint
//! dispatches on the `{job_type}` path segment rather than one handler per
//! job type — every job type's params are opaque `Value` as far as the
//! registry and this layer are concerned; only `crates/handlers` knows their
//! shape.

use axum::extract::{Path, Query, State};
use axum::Json;
use bg_domain::error::Error;
use bg_domain::job::{Job, JobType, DEFAULT_TIMEOUT_SECONDS};
use bg_registry::{CancelError, CancelOutcome, SubmitDenial};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn parse_job_type(raw: &str) -> ApiResult<JobType> {
    raw.replace('-', "_").parse::<JobType>().map_err(ApiError::from)
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub progress_detail: String,
    #[serde(flatten)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: &'static str,
}

pub async fn submit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_type): Path<String>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<Json<SubmitResponse>> {
    let job_type = parse_job_type(&job_type)?;
    if job_type == JobType::Schedule {
        return Err(ApiError::from(Error::Validation(
            "schedule jobs are only created by the schedule runner, not submitted directly".into(),
        )));
    }

    let timeout = body.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
    let detail = if body.progress_detail.is_empty() { "queued" } else { &body.progress_detail };

    match state.registry.submit(job_type, &user.user_id, body.params, timeout, detail)? {
        Ok(job) => Ok(Json(SubmitResponse { job_id: job.id, status: "submitted" })),
        Err(SubmitDenial::HourlyQuotaExceeded) => {
            Err(ApiError::from(Error::RateLimited("hourly benchmark quota exceeded".into())))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub active: Vec<Job>,
    pub recent: Vec<Job>,
}

pub async fn list(State(state): State<AppState>, user: AuthUser, Query(q): Query<ListQuery>) -> ApiResult<Json<JobList>> {
    let active = state.db.list_active_jobs_for_user(&user.user_id)?;
    let limit = q.limit.unwrap_or(20).min(200);
    let recent = state.db.list_recent_terminal_jobs(&user.user_id, limit)?;

    let filtered = |jobs: Vec<Job>| -> Vec<Job> {
        match &q.status {
            Some(s) => jobs.into_iter().filter(|j| j.status.as_str() == s).collect(),
            None => jobs,
        }
    };

    Ok(Json(JobList { active: filtered(active), recent: filtered(recent) }))
}

pub async fn get(State(state): State<AppState>, user: AuthUser, Path(job_id): Path<String>) -> ApiResult<Json<Job>> {
    let job = state.db.get_job(&job_id)?.ok_or_else(|| Error::NotFound("job not found".into()))?;
    if job.user_id != user.user_id && !user.is_admin() {
        return Err(ApiError::from(Error::NotFound("job not found".into())));
    }
    Ok(Json(job))
}

pub async fn cancel(State(state): State<AppState>, user: AuthUser, Path(job_id): Path<String>) -> ApiResult<Json<Value>> {
    match state.registry.cancel(&job_id, &user.user_id, user.is_admin())? {
        Ok(CancelOutcome::CancelledImmediately) => Ok(Json(json!({"status": "ok"}))),
        Ok(CancelOutcome::SignalSent) => Ok(Json(json!({"status": "ok"}))),
        Ok(CancelOutcome::ForcedInterrupted { was_orphan }) => Ok(Json(json!({"status": "ok", "was_orphan": was_orphan}))),
        Err(CancelError::NotFound) => Err(ApiError::from(Error::NotFound("job not found".into()))),
        Err(CancelError::NotOwner) => Err(ApiError::from(Error::NotFound("job not found".into()))),
        Err(CancelError::AlreadyTerminal) => Err(ApiError::from(Error::Conflict("job already finished".into()))),
    }
}

/// `GET /api/admin/jobs`: every active job across every user. The `jobs`
/// table has no owning-admin concept beyond the caller's own role, so this
/// is the only endpoint in this module that scans across users.
pub async fn admin_list(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    user.require_admin().map_err(|_| ApiError::from(Error::Auth("admin role required".into())))?;
    let stale = state.db.list_timed_out_jobs(chrono::Utc::now())?;
    Ok(Json(json!({ "timed_out": stale })))
}

pub async fn admin_cancel(State(state): State<AppState>, user: AuthUser, Path(job_id): Path<String>) -> ApiResult<Json<Value>> {
    user.require_admin().map_err(|_| ApiError::from(Error::Auth("admin role required".into())))?;
    match state.registry.cancel(&job_id, &user.user_id, true)? {
        Ok(outcome) => Ok(Json(json!({ "status": "ok", "outcome": format!("{outcome:?}") }))),
        Err(CancelError::NotFound) => Err(ApiError::from(Error::NotFound("job not found".into()))),
        Err(CancelError::NotOwner) => unreachable!("admin cancel bypasses ownership"),
        Err(CancelError::AlreadyTerminal) => Err(ApiError::from(Error::Conflict("job already finished".into()))),
    }
}
