//! Operator-facing surface: readiness, process metrics, and the audit
//! trail — a public lightweight probe plus an admin-gated metrics/audit
//! view, narrowed to what this platform actually has to report on.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use bg_domain::error::Error;
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /api/admin/health` — public, no auth. A load balancer only needs a
/// fast 200/5xx, so this never touches the database beyond the fact that
/// it's holding a live `Arc<Db>`.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// `GET /api/admin/readiness` — store connectivity plus provider init
/// errors, admin-only since it can surface masked-but-still-sensitive
/// provider configuration detail (kind, key) alongside the error text.
pub async fn readiness(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    user.require_admin().map_err(|_| Error::Auth("admin role required".into()))?;

    let store_ok = state.db.count_users().is_ok();
    let init_errors: Vec<_> = state
        .providers
        .init_errors()
        .iter()
        .map(|e| json!({ "provider_key": e.provider_key, "kind": e.kind, "error": e.error }))
        .collect();

    Ok(Json(json!({
        "store_connected": store_ok,
        "providers_configured": state.providers.len(),
        "provider_init_errors": init_errors,
    })))
}

/// `GET /api/admin/metrics` — job counts by status, queue depth proxy
/// (pending + queued), and live WebSocket connection count for the caller.
/// Connection counts are reported only for the requesting admin's own
/// `user_id`, since `WsHub` is keyed per-user and has no whole-process
/// connection tally.
pub async fn metrics(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    user.require_admin().map_err(|_| Error::Auth("admin role required".into()))?;

    let by_status = state.db.count_jobs_by_status()?;
    let count_of = |status: &str| by_status.iter().find(|(s, _)| s == status).map(|(_, n)| *n).unwrap_or(0);

    Ok(Json(json!({
        "jobs": {
            "pending": count_of("pending"),
            "queued": count_of("queued"),
            "running": count_of("running"),
            "done": count_of("done"),
            "failed": count_of("failed"),
            "cancelled": count_of("cancelled"),
            "interrupted": count_of("interrupted"),
        },
        "ws_connections_for_caller": state.hub.connection_count(&user.user_id),
        "providers_configured": state.providers.len(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u32>,
}

/// `GET /api/admin/audit?limit=` — the caller's own audit trail. There is
/// no cross-user audit query in the store layer (`audit_log` has no
/// "list everything" method), so admin and non-admin callers see the same
/// thing: their own history.
pub async fn audit_log(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<AuditQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = q.limit.unwrap_or(50).min(500);
    let entries = state.db.list_audit_entries_for_user(&user.user_id, limit)?;
    Ok(Json(json!({ "entries": entries })))
}
