//! Public leaderboard read surface plus the per-user opt-in toggle that
//! controls whether a user's own runs ever feed it.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// `GET /api/leaderboard` — no auth required, it's the whole point of the
/// feature: a public comparison surface across opted-in users' results.
pub async fn get(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let entries = state.db.list_leaderboard()?;
    Ok(Json(json!({ "leaderboard": entries })))
}

#[derive(Debug, Deserialize)]
pub struct OptInBody {
    pub opt_in: bool,
}

pub async fn set_opt_in(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<OptInBody>,
) -> ApiResult<Json<Value>> {
    state.db.set_leaderboard_opt_in(&user.user_id, body.opt_in)?;
    Ok(Json(json!({ "leaderboard_opt_in": body.opt_in })))
}
