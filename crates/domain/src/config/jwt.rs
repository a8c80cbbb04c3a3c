use serde::{Deserialize, Serialize};

fn d_access_token_ttl_secs() -> i64 {
    24 * 3600
}

fn d_refresh_token_ttl_secs() -> i64 {
    7 * 24 * 3600
}

fn d_issuer() -> String {
    "bench-gateway".to_string()
}

/// JWT issuance config. `secret` is read from the `JWT_SECRET` environment
/// variable at startup, never from `config.toml` (it must never be
/// checked into a repo alongside the rest of this struct).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    #[serde(default = "d_access_token_ttl_secs")]
    pub access_token_ttl_secs: i64,

    #[serde(default = "d_refresh_token_ttl_secs")]
    pub refresh_token_ttl_secs: i64,

    #[serde(default = "d_issuer")]
    pub issuer: String,

    #[serde(skip)]
    pub secret: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: d_access_token_ttl_secs(),
            refresh_token_ttl_secs: d_refresh_token_ttl_secs(),
            issuer: d_issuer(),
            secret: String::new(),
        }
    }
}

impl JwtConfig {
    pub fn is_ready(&self) -> bool {
        !self.secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttls_match_spec() {
        let cfg = JwtConfig::default();
        assert_eq!(cfg.access_token_ttl_secs, 86_400);
        assert_eq!(cfg.refresh_token_ttl_secs, 604_800);
    }

    #[test]
    fn is_ready_requires_secret() {
        let mut cfg = JwtConfig::default();
        assert!(!cfg.is_ready());
        cfg.secret = "x".into();
        assert!(cfg.is_ready());
    }
}
