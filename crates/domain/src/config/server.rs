use serde::{Deserialize, Serialize};

fn d_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn d_app_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn d_cookie_secure() -> bool {
    true
}

fn d_max_ws_connections_per_user() -> usize {
    5
}

fn d_ws_receive_timeout_secs() -> u64 {
    90
}

/// HTTP/WS surface knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "d_app_base_url")]
    pub app_base_url: String,

    /// Mirrors `COOKIE_SECURE`; forced true unless explicitly disabled for
    /// local development over plain HTTP.
    #[serde(default = "d_cookie_secure")]
    pub cookie_secure: bool,

    #[serde(default = "d_max_ws_connections_per_user")]
    pub max_ws_connections_per_user: usize,

    #[serde(default = "d_ws_receive_timeout_secs")]
    pub ws_receive_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: d_bind_addr(),
            app_base_url: d_app_base_url(),
            cookie_secure: d_cookie_secure(),
            max_ws_connections_per_user: d_max_ws_connections_per_user(),
            ws_receive_timeout_secs: d_ws_receive_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_toml_fields() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:8080");
        assert!(cfg.cookie_secure);
        assert_eq!(cfg.max_ws_connections_per_user, 5);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg: ServerConfig = toml::from_str(r#"bind_addr = "127.0.0.1:9000""#).unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.ws_receive_timeout_secs, 90);
    }
}
