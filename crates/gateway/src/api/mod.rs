pub mod admin;
pub mod auth;
pub mod catalog;
pub mod experiments;
pub mod history;
pub mod jobs;
pub mod leaderboard;
pub mod misc;

use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::state::AppState;

/// Every route in one flat chain, grouped by resource. Authorization is
/// enforced per-handler by whether the handler takes an `AuthUser` extractor
/// at all, not by a public/protected router split.
pub fn router(state: AppState) -> Router {
    Router::new()
        // ── Auth ──────────────────────────────────────────────────────
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/refresh", post(auth::refresh))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/auth/cli-token", post(auth::cli_token))
        // ── Jobs ──────────────────────────────────────────────────────
        .route("/api/jobs/{job_id}", post(jobs::submit))
        .route("/api/jobs", get(jobs::list))
        .route("/api/jobs/{job_id}", get(jobs::get))
        .route("/api/jobs/{job_id}/cancel", post(jobs::cancel))
        .route("/api/admin/jobs", get(jobs::admin_list))
        .route("/api/admin/jobs/{job_id}/cancel", post(jobs::admin_cancel))
        // ── Run history ──────────────────────────────────────────────
        .route("/api/runs/benchmarks", get(history::list_benchmark_runs))
        .route("/api/runs/benchmarks/{id}", get(history::get_benchmark_run))
        .route("/api/runs/benchmarks/{id}", delete(history::delete_benchmark_run))
        .route("/api/runs/tool-evals", get(history::list_tool_eval_runs))
        .route("/api/runs/tool-evals/{id}", get(history::get_tool_eval_run))
        .route("/api/runs/tool-evals/{id}", delete(history::delete_tool_eval_run))
        .route("/api/runs/param-tunes", get(history::list_param_tune_runs))
        .route("/api/runs/param-tunes/{id}", get(history::get_param_tune_run))
        .route("/api/runs/param-tunes/{id}", delete(history::delete_param_tune_run))
        .route("/api/runs/prompt-tunes", get(history::list_prompt_tune_runs))
        .route("/api/runs/prompt-tunes/{id}", get(history::get_prompt_tune_run))
        .route("/api/runs/prompt-tunes/{id}", delete(history::delete_prompt_tune_run))
        .route("/api/runs/judge-reports", get(history::list_judge_reports))
        .route("/api/runs/judge-reports/{id}", get(history::get_judge_report))
        .route("/api/runs/judge-reports/{id}", delete(history::delete_judge_report))
        // ── Catalog ──────────────────────────────────────────────────
        .route("/api/catalog/kinds", get(catalog::available_kinds))
        .route("/api/catalog/providers", get(catalog::list_providers))
        .route("/api/catalog/providers", post(catalog::create_provider))
        .route("/api/catalog/providers/{provider_id}", delete(catalog::delete_provider))
        .route("/api/catalog/providers/{provider_id}/models", get(catalog::list_models))
        .route("/api/catalog/providers/{provider_id}/models", post(catalog::create_model))
        // ── Schedules, model profiles, prompt versions, judge settings ─
        .route("/api/schedules", get(misc::list_schedules))
        .route("/api/schedules", post(misc::create_schedule))
        .route("/api/schedules/{id}/enabled", put(misc::set_schedule_enabled))
        .route("/api/schedules/{id}", delete(misc::delete_schedule))
        .route("/api/model-profiles", get(misc::list_model_profiles))
        .route("/api/model-profiles", post(misc::create_model_profile))
        .route("/api/model-profiles/{id}", delete(misc::delete_model_profile))
        .route("/api/prompt-versions", get(misc::list_prompt_versions))
        .route("/api/prompt-versions", post(misc::create_prompt_version))
        .route("/api/judge-settings", get(misc::get_judge_settings))
        .route("/api/judge-settings", put(misc::set_judge_settings))
        .route("/api/admin/users/{user_id}/rate-limit", put(misc::set_rate_limit_override))
        // ── Experiment coordinator ───────────────────────────────────
        .route("/api/experiments", post(experiments::create))
        .route("/api/experiments", get(experiments::list))
        .route("/api/experiments/{id}", get(experiments::get))
        .route("/api/experiments/{id}", delete(experiments::delete))
        .route("/api/experiments/{id}/pin-baseline", post(experiments::pin_baseline))
        .route("/api/experiments/{id}/timeline", get(experiments::get_timeline))
        .route("/api/experiments/{id}/run-best", post(experiments::run_best))
        // ── Leaderboard ──────────────────────────────────────────────
        .route("/api/leaderboard", get(leaderboard::get))
        .route("/api/leaderboard/opt-in", put(leaderboard::set_opt_in))
        // ── Admin ────────────────────────────────────────────────────
        .route("/api/admin/health", get(admin::health))
        .route("/api/admin/readiness", get(admin::readiness))
        .route("/api/admin/metrics", get(admin::metrics))
        .route("/api/admin/audit", get(admin::audit_log))
        .route("/ws", get(crate::ws::upgrade))
        .with_state(state)
}
