pub mod jwt;
pub mod login_limiter;
pub mod password;
pub mod tokens;

pub use jwt::Claims;
pub use login_limiter::LoginLimiter;

use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bg_domain::user::Role;
use serde_json::json;

use crate::state::AppState;

/// Extracted from a valid `Authorization: Bearer <jwt>` header. Cheap to
/// pull into any handler's signature — the role check composes on top of it
/// rather than needing a second middleware layer.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), AuthRejection> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthRejection::Forbidden)
        }
    }
}

pub enum AuthRejection {
    Missing,
    Invalid,
    Forbidden,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthRejection::Missing => (StatusCode::UNAUTHORIZED, "missing bearer token"),
            AuthRejection::Invalid => (StatusCode::UNAUTHORIZED, "invalid or expired token"),
            AuthRejection::Forbidden => (StatusCode::FORBIDDEN, "admin role required"),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(axum::http::header::AUTHORIZATION).ok_or(AuthRejection::Missing)?;
        let header = header.to_str().map_err(|_| AuthRejection::Invalid)?;
        let token = header.strip_prefix("Bearer ").ok_or(AuthRejection::Invalid)?;
        let claims = jwt::verify_access_token(&state.config.jwt, token).map_err(|_| AuthRejection::Invalid)?;
        let role = jwt::claims_role(&claims);
        Ok(AuthUser { user_id: claims.sub, role })
    }
}

/// Pulls the caller's IP for the login rate limiter, preferring a trusted
/// proxy header over the socket address since the gateway typically runs
/// behind a reverse proxy in production.
pub fn client_ip(headers: &axum::http::HeaderMap, remote: Option<std::net::SocketAddr>) -> std::net::IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return ip;
            }
        }
    }
    remote.map(|a| a.ip()).unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST))
}

pub type AppStateRef = State<AppState>;
