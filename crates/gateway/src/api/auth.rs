//! Account lifecycle: register, login, refresh, logout, profile, and the
//! password-reset flow. Refresh tokens never leave the server as JWTs —
//! they're opaque, hashed at rest, and travel only in an HttpOnly cookie
//! scoped to `/api/auth` so no other route (and no inline script) can read
//! them.

use axum::extract::{ConnectInfo, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bg_domain::error::Error;
use bg_domain::ids::new_id;
use bg_domain::user::{Role, User};
use bg_store::{PasswordResetToken, RefreshToken};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;

use crate::auth::{client_ip, jwt, password, tokens, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const REFRESH_COOKIE: &str = "refresh_token";

/// What a client is actually allowed to see about an account —
/// `User` itself carries `password_hash` and must never be serialized
/// straight into a response.
#[derive(Debug, Serialize)]
struct UserView {
    id: String,
    email: String,
    role: Role,
}

impl From<&User> for UserView {
    fn from(u: &User) -> Self {
        Self { id: u.id.clone(), email: u.email.clone(), role: u.role }
    }
}

fn refresh_cookie(value: &str, max_age_secs: i64, secure: bool) -> HeaderValue {
    let secure_attr = if secure { "; Secure" } else { "" };
    let raw = format!(
        "{REFRESH_COOKIE}={value}; Path=/api/auth; HttpOnly; SameSite=Strict; Max-Age={max_age_secs}{secure_attr}"
    );
    HeaderValue::from_str(&raw).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn expire_cookie(secure: bool) -> HeaderValue {
    let secure_attr = if secure { "; Secure" } else { "" };
    let raw = format!("{REFRESH_COOKIE}=; Path=/api/auth; HttpOnly; SameSite=Strict; Max-Age=0{secure_attr}");
    HeaderValue::from_str(&raw).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let part = part.trim();
        let (k, v) = part.split_once('=')?;
        if k == name {
            Some(v.to_string())
        } else {
            None
        }
    })
}

async fn issue_session(state: &AppState, user: &User) -> ApiResult<(String, String)> {
    let access = jwt::issue_access_token(&state.config.jwt, user)?;
    let raw_refresh = tokens::generate_opaque_token();
    let now = Utc::now();
    let rt = RefreshToken {
        id: new_id(),
        user_id: user.id.clone(),
        token_hash: tokens::hash_token(&raw_refresh),
        created_at: now,
        expires_at: now + Duration::seconds(state.config.jwt.refresh_token_ttl_secs),
        revoked_at: None,
    };
    state.db.insert_refresh_token(&rt)?;
    Ok((access.token, raw_refresh))
}

fn audit(state: &AppState, user_id: Option<&str>, action: &str, detail: serde_json::Value) {
    let entry = bg_store::AuditEntry {
        id: new_id(),
        user_id: user_id.map(String::from),
        action: action.to_string(),
        detail_json: Some(detail),
        created_at: Utc::now(),
    };
    if let Err(e) = state.db.insert_audit_entry(&entry) {
        tracing::warn!(error = %e, action, "failed to write audit entry");
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub email: String,
    pub password: String,
}

/// The first account ever created is seeded as admin so a fresh deployment
/// always has somewhere to sign in, unless `ADMIN_EMAIL`/`ADMIN_PASSWORD`
/// already bootstrapped one.
pub async fn register(State(state): State<AppState>, Json(body): Json<RegisterBody>) -> ApiResult<Response> {
    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') || email.len() > 254 {
        return Err(Error::Validation("valid email required".into()).into());
    }
    if body.password.len() < 8 {
        return Err(Error::Validation("password must be at least 8 characters".into()).into());
    }
    if state.db.get_user_by_email(&email)?.is_some() {
        return Err(Error::Conflict("email already registered".into()).into());
    }

    let role = if state.db.count_users()? == 0 { Role::Admin } else { Role::User };
    let user = User::new(&email, password::hash_password(&body.password), role);
    state.db.insert_user(&user)?;
    audit(&state, Some(&user.id), "user_register", json!({ "email": email }));

    let (access, refresh) = issue_session(&state, &user).await?;
    let body = Json(json!({ "user": UserView::from(&user), "access_token": access }));
    let mut resp = body.into_response();
    resp.headers_mut().insert(
        SET_COOKIE,
        refresh_cookie(&refresh, state.config.jwt.refresh_token_ttl_secs, state.config.server.cookie_secure),
    );
    Ok(resp)
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginBody>,
) -> ApiResult<Response> {
    let ip = client_ip(&headers, Some(remote));
    if let Err(until) = state.login_limiter.check(ip) {
        return Err(ApiError::from(Error::RateLimited(format!("too many login attempts, try again at {until}"))));
    }

    let email = body.email.trim().to_lowercase();
    let user = state.db.get_user_by_email(&email)?;
    let valid = user.as_ref().is_some_and(|u| password::verify_password(&body.password, &u.password_hash));

    if !valid {
        state.login_limiter.record_failure(ip);
        audit(&state, user.as_ref().map(|u| u.id.as_str()), "user_login_failed", json!({ "email": email }));
        return Err(Error::Auth("invalid email or password".into()).into());
    }
    let user = user.expect("valid implies present");
    state.login_limiter.record_success(ip);
    audit(&state, Some(&user.id), "user_login", json!({ "email": email }));

    let (access, refresh) = issue_session(&state, &user).await?;
    let body = Json(json!({ "user": UserView::from(&user), "access_token": access }));
    let mut resp = body.into_response();
    resp.headers_mut().insert(
        SET_COOKIE,
        refresh_cookie(&refresh, state.config.jwt.refresh_token_ttl_secs, state.config.server.cookie_secure),
    );
    Ok(resp)
}

/// Exchanges a still-valid refresh cookie for a fresh access token. The
/// refresh token itself is not rotated — it stays live until its own
/// expiry or an explicit logout.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<serde_json::Value>> {
    let raw = read_cookie(&headers, REFRESH_COOKIE).ok_or_else(|| Error::Auth("no refresh token".into()))?;
    let stored = state
        .db
        .get_refresh_token_by_hash(&tokens::hash_token(&raw))?
        .ok_or_else(|| Error::Auth("refresh token revoked".into()))?;
    if stored.revoked_at.is_some() || stored.expires_at < Utc::now() {
        return Err(Error::Auth("refresh token expired".into()).into());
    }
    let user = state.db.get_user(&stored.user_id)?.ok_or_else(|| Error::Auth("user not found".into()))?;
    let access = jwt::issue_access_token(&state.config.jwt, &user)?;
    audit(&state, Some(&user.id), "token_refresh", json!({}));
    Ok(Json(json!({ "user": UserView::from(&user), "access_token": access.token })))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(raw) = read_cookie(&headers, REFRESH_COOKIE) {
        if let Some(stored) = state.db.get_refresh_token_by_hash(&tokens::hash_token(&raw))? {
            state.db.revoke_refresh_token(&stored.id)?;
            audit(&state, Some(&stored.user_id), "user_logout", json!({}));
        }
    }
    let body = Json(json!({ "status": "ok" }));
    let mut resp = body.into_response();
    resp.headers_mut().insert(SET_COOKIE, expire_cookie(state.config.server.cookie_secure));
    Ok(resp)
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    let account = state.db.get_user(&user.user_id)?.ok_or_else(|| Error::Auth("user not found".into()))?;
    Ok(Json(json!({ "user": UserView::from(&account) })))
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordBody {
    pub email: String,
}

/// Always responds 200 with the same message whether or not the email is
/// registered, so the endpoint can't be used to enumerate accounts.
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(body): Json<ForgotPasswordBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let ip = client_ip(&headers, Some(remote));
    if let Err(until) = state.login_limiter.check(ip) {
        return Err(ApiError::from(Error::RateLimited(format!("too many requests, try again at {until}"))));
    }

    let email = body.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::Validation("valid email required".into()).into());
    }

    let generic = json!({ "message": "If that email exists, a reset link has been sent." });
    let Some(user) = state.db.get_user_by_email(&email)? else {
        return Ok(Json(generic));
    };

    let raw_token = tokens::generate_opaque_token();
    let now = Utc::now();
    let reset = PasswordResetToken {
        id: new_id(),
        user_id: user.id.clone(),
        token_hash: tokens::hash_token(&raw_token),
        created_at: now,
        expires_at: now + Duration::hours(1),
        used_at: None,
    };
    state.db.insert_password_reset_token(&reset)?;

    // No SMTP client lives in this workspace's dependency stack, so the
    // reset link is logged instead of mailed — same "external collaborator,
    // log in place of it" treatment as provider calls in dev mode.
    let reset_link = format!("{}/reset-password?token={}", state.config.server.app_base_url, raw_token);
    tracing::info!(email = %email, reset_link = %reset_link, "password reset requested");

    audit(&state, Some(&user.id), "password_reset_request", json!({ "email": email }));
    Ok(Json(generic))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordBody {
    pub token: String,
    pub password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.token.trim().is_empty() {
        return Err(Error::Validation("token is required".into()).into());
    }
    if body.password.len() < 8 {
        return Err(Error::Validation("password must be at least 8 characters".into()).into());
    }

    let record = state
        .db
        .get_password_reset_token_by_hash(&tokens::hash_token(&body.token))?
        .ok_or_else(|| Error::Validation("invalid or expired reset token".into()))?;
    if record.used_at.is_some() || record.expires_at < Utc::now() {
        return Err(Error::Validation("invalid or expired reset token".into()).into());
    }

    state.db.mark_password_reset_token_used(&record.id)?;
    state.db.update_password_hash(&record.user_id, &password::hash_password(&body.password))?;
    state.db.revoke_all_refresh_tokens(&record.user_id)?;

    audit(&state, Some(&record.user_id), "password_reset_complete", json!({}));
    Ok(Json(json!({ "message": "password updated successfully" })))
}

/// Issues a 30-day JWT for CLI use. The CLI has nowhere to keep a refresh
/// cookie, so this trades the usual 24h/7d split for one long-lived bearer
/// token instead of a session pair.
pub async fn cli_token(State(state): State<AppState>, user: AuthUser) -> ApiResult<Json<serde_json::Value>> {
    let account = state.db.get_user(&user.user_id)?.ok_or_else(|| Error::Auth("user not found".into()))?;
    let mut cfg = state.config.jwt.clone();
    cfg.access_token_ttl_secs = 30 * 24 * 3600;
    let issued = jwt::issue_access_token(&cfg, &account)?;
    Ok(Json(json!({ "token": issued.token, "expires_in_days": 30 })))
}
