use serde::{Deserialize, Serialize};

fn d_smtp_port() -> u16 {
    587
}

fn d_from_address() -> String {
    "noreply@localhost".to_string()
}

/// Password-reset email delivery. Outbound mail
/// itself is an external collaborator; this is just the dial-in config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,

    #[serde(default = "d_smtp_port")]
    pub port: u16,

    pub username: Option<String>,

    #[serde(skip)]
    pub password: Option<String>,

    #[serde(default = "d_from_address")]
    pub from_address: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: d_smtp_port(),
            username: None,
            password: None,
            from_address: d_from_address(),
        }
    }
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unconfigured() {
        let cfg = SmtpConfig::default();
        assert!(!cfg.is_configured());
        assert_eq!(cfg.port, 587);
    }

    #[test]
    fn host_present_marks_configured() {
        let mut cfg = SmtpConfig::default();
        cfg.host = Some("smtp.example.com".into());
        assert!(cfg.is_configured());
    }
}
