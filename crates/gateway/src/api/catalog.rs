//! Per-user provider/model catalog scoping. A `Provider` row here never
//! carries a secret — it records which server-configured catalog `kind` a
//! user has opted into. The live adapter and its credentials live in the
//! global [`bg_providers::ProviderRegistry`] built once at startup.

use axum::extract::{Path, State};
use axum::Json;
use bg_domain::error::Error;
use bg_domain::ids::new_id;
use bg_domain::user::{Model, Provider};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// The catalog kinds the server knows how to talk to, independent of
/// whether any are currently live (an entry can be configured but failed
/// to initialize — see `admin::provider_status`).
pub async fn available_kinds(State(state): State<AppState>, _user: AuthUser) -> ApiResult<Json<Value>> {
    let kinds: Vec<&str> = state
        .config
        .llm
        .catalog
        .iter()
        .map(|entry| entry.kind.as_str())
        .collect();
    Ok(Json(json!({ "kinds": kinds })))
}

pub async fn list_providers(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<Value>> {
    let providers = state.db.list_providers_for_user(&user.user_id)?;
    Ok(Json(json!({ "providers": providers })))
}

#[derive(Debug, Deserialize)]
pub struct CreateProviderBody {
    pub key: String,
    pub display_name: String,
    pub kind: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

pub async fn create_provider(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateProviderBody>,
) -> ApiResult<Json<Provider>> {
    let known = state.config.llm.catalog.iter().any(|entry| entry.kind == body.kind);
    if !known {
        return Err(Error::Validation(format!("unknown provider kind {}", body.kind)).into());
    }
    if state.db.get_provider_by_key(&user.user_id, &body.key)?.is_some() {
        return Err(Error::Conflict(format!("provider key {} already registered", body.key)).into());
    }
    let provider = Provider {
        id: new_id(),
        user_id: user.user_id.clone(),
        key: body.key,
        display_name: body.display_name,
        kind: body.kind,
        api_base: body.api_base,
        created_at: chrono::Utc::now(),
    };
    state.db.insert_provider(&provider)?;
    Ok(Json(provider))
}

pub async fn delete_provider(
    State(state): State<AppState>,
    user: AuthUser,
    Path(provider_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let owns = state
        .db
        .list_providers_for_user(&user.user_id)?
        .iter()
        .any(|p| p.id == provider_id);
    if !owns {
        return Err(Error::NotFound("provider not found".into()).into());
    }
    state.db.delete_provider(&provider_id)?;
    Ok(Json(json!({ "status": "ok" })))
}

pub async fn list_models(
    State(state): State<AppState>,
    user: AuthUser,
    Path(provider_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let owns = state
        .db
        .list_providers_for_user(&user.user_id)?
        .iter()
        .any(|p| p.id == provider_id);
    if !owns {
        return Err(Error::NotFound("provider not found".into()).into());
    }
    let models = state.db.list_models_for_provider(&provider_id)?;
    Ok(Json(json!({ "models": models })))
}

#[derive(Debug, Deserialize)]
pub struct CreateModelBody {
    pub litellm_id: String,
    pub display_name: String,
    pub context_window: u32,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub skip_params: Vec<String>,
}

pub async fn create_model(
    State(state): State<AppState>,
    user: AuthUser,
    Path(provider_id): Path<String>,
    Json(body): Json<CreateModelBody>,
) -> ApiResult<Json<Model>> {
    let owns = state
        .db
        .list_providers_for_user(&user.user_id)?
        .iter()
        .any(|p| p.id == provider_id);
    if !owns {
        return Err(Error::NotFound("provider not found".into()).into());
    }
    let model = Model {
        id: new_id(),
        provider_id,
        litellm_id: body.litellm_id,
        display_name: body.display_name,
        context_window: body.context_window,
        max_output_tokens: body.max_output_tokens,
        skip_params: body.skip_params,
    };
    state.db.insert_model(&model)?;
    Ok(Json(model))
}
