/// Shared error type used across all platform crates.
///
/// Every variant maps to exactly one HTTP status / taxonomy bucket from the
/// error design: validation (400), auth (401/403), rate_limited (429),
/// not_found (404), conflict (409), provider_error (502), internal (500).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Taxonomy bucket name, used for audit logging and the HTTP error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Auth(_) => "auth",
            Error::RateLimited(_) => "rate_limited",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Provider { .. } => "provider_error",
            Error::Io(_) | Error::Json(_) | Error::Store(_) | Error::Config(_) | Error::Internal(_) => {
                "internal"
            }
        }
    }

    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Auth(_) => 401,
            Error::RateLimited(_) => 429,
            Error::NotFound(_) => 404,
            Error::Conflict(_) => 409,
            Error::Provider { .. } => 502,
            Error::Io(_) | Error::Json(_) | Error::Store(_) | Error::Config(_) | Error::Internal(_) => {
                500
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Strip any substring equal to `secret` from `message`. Used before any
/// error string reaches a user, an audit row, or a log line, per the
/// error-handling design's sanitizer rule.
pub fn sanitize(message: &str, secret: Option<&str>) -> String {
    match secret {
        Some(s) if !s.is_empty() && message.contains(s) => message.replace(s, "***"),
        _ => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping() {
        assert_eq!(Error::Validation("x".into()).kind(), "validation");
        assert_eq!(Error::RateLimited("x".into()).kind(), "rate_limited");
        assert_eq!(
            Error::Provider {
                provider: "openai".into(),
                message: "boom".into()
            }
            .kind(),
            "provider_error"
        );
    }

    #[test]
    fn sanitize_strips_secret() {
        let msg = "request failed: key sk-abc123 rejected";
        assert_eq!(
            sanitize(msg, Some("sk-abc123")),
            "request failed: key *** rejected"
        );
    }

    #[test]
    fn sanitize_no_secret_configured() {
        assert_eq!(sanitize("unchanged", None), "unchanged");
    }

    #[test]
    fn sanitize_secret_not_present() {
        assert_eq!(sanitize("unchanged", Some("nope")), "unchanged");
    }
}
