mod jwt;
mod llm;
mod rate_limit;
mod server;
mod smtp;
mod store;

pub use jwt::JwtConfig;
pub use llm::{LlmConfig, ProviderCatalogEntry};
pub use rate_limit::RateLimitConfig;
pub use server::ServerConfig;
pub use smtp::SmtpConfig;
pub use store::StoreConfig;

use serde::{Deserialize, Serialize};

/// Bootstrap admin account, created on first startup if both env vars are set.
#[derive(Debug, Clone, Default)]
pub struct AdminBootstrap {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Top-level layered config: `config.toml` supplies structural defaults,
/// environment variables supply secrets and per-deploy overrides, read once
/// at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(skip)]
    pub fernet_key: Option<String>,
    #[serde(skip)]
    pub admin_bootstrap: AdminBootstrap,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> crate::error::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Overlays the process environment on top of whatever `config.toml`
    /// supplied. Matches Environment: `JWT_SECRET`, `FERNET_KEY`,
    /// `ADMIN_EMAIL`/`ADMIN_PASSWORD`, `COOKIE_SECURE`, `BENCHMARK_RATE_LIMIT`.
    pub fn apply_env(&mut self, getenv: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = getenv("JWT_SECRET") {
            self.jwt.secret = secret;
        }
        self.fernet_key = getenv("FERNET_KEY");
        self.admin_bootstrap.email = getenv("ADMIN_EMAIL");
        self.admin_bootstrap.password = getenv("ADMIN_PASSWORD");
        if let Some(v) = getenv("COOKIE_SECURE") {
            self.server.cookie_secure = v != "0" && v.to_lowercase() != "false";
        }
        self.rate_limit
            .apply_env_override(getenv("BENCHMARK_RATE_LIMIT").as_deref());
    }

    /// Used by `doctor`/`config validate`: every condition that must hold
    /// before the gateway can serve traffic.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.jwt.is_ready() {
            problems.push("JWT_SECRET is not set".to_string());
        }
        if self.fernet_key.is_none() {
            problems.push("FERNET_KEY is not set".to_string());
        }
        if self.rate_limit.max_concurrent == 0 {
            problems.push("rate_limit.max_concurrent must be >= 1".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_produces_full_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.rate_limit.benchmarks_per_hour, 20);
        assert_eq!(cfg.server.max_ws_connections_per_user, 5);
    }

    #[test]
    fn apply_env_overlays_secrets_and_overrides() {
        let mut cfg = Config::default();
        let env = std::collections::HashMap::from([
            ("JWT_SECRET".to_string(), "s3cr3t".to_string()),
            ("FERNET_KEY".to_string(), "fkey".to_string()),
            ("COOKIE_SECURE".to_string(), "false".to_string()),
            ("BENCHMARK_RATE_LIMIT".to_string(), "99".to_string()),
        ]);
        cfg.apply_env(|k| env.get(k).cloned());
        assert_eq!(cfg.jwt.secret, "s3cr3t");
        assert_eq!(cfg.fernet_key.as_deref(), Some("fkey"));
        assert!(!cfg.server.cookie_secure);
        assert_eq!(cfg.rate_limit.benchmarks_per_hour, 99);
    }

    #[test]
    fn validate_flags_missing_secrets() {
        let cfg = Config::default();
        let problems = cfg.validate();
        assert!(problems.iter().any(|p| p.contains("JWT_SECRET")));
        assert!(problems.iter().any(|p| p.contains("FERNET_KEY")));
    }

    #[test]
    fn validate_passes_when_ready() {
        let mut cfg = Config::default();
        cfg.jwt.secret = "x".into();
        cfg.fernet_key = Some("y".into());
        assert!(cfg.validate().is_empty());
    }
}
