//! Maps `bg_domain::Error` (and a few gateway-local failure shapes) onto the
//! `{error: "..."}` envelope the HTTP surface returns for every non-2xx
//! response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError(bg_domain::Error);

impl From<bg_domain::Error> for ApiError {
    fn from(e: bg_domain::Error) -> Self {
        Self(e)
    }
}

impl From<String> for ApiError {
    fn from(message: String) -> Self {
        Self(bg_domain::Error::Internal(message))
    }
}

impl From<&str> for ApiError {
    fn from(message: &str) -> Self {
        Self(bg_domain::Error::Internal(message.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, kind = self.0.kind(), "internal error");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
