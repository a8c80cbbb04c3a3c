use serde::{Deserialize, Serialize};

fn d_default_context_window() -> u32 {
    8192
}

fn d_default_max_output_tokens() -> u32 {
    4096
}

fn d_retry_backoff_secs() -> Vec<u64> {
    vec![2, 4, 8]
}

/// Static provider catalog entry (kind + how to resolve its auth from the
/// environment). User-supplied keys live in the store, encrypted by the
/// external vault (`FERNET_KEY`); this only names which env var a provider
/// falls back to when the user has not configured one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCatalogEntry {
    pub kind: String,
    pub display_name: String,
    pub auth_env_var: Option<String>,
    pub api_base_env_var: Option<String>,
}

/// LLM call defaults shared across providers until a model-specific override
/// applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_default_context_window")]
    pub default_context_window: u32,

    #[serde(default = "d_default_max_output_tokens")]
    pub default_max_output_tokens: u32,

    /// Backoff schedule (seconds) for transient provider errors, applied to
    /// the non-streaming retry path used by judge/meta calls.
    #[serde(default = "d_retry_backoff_secs")]
    pub retry_backoff_secs: Vec<u64>,

    #[serde(default)]
    pub catalog: Vec<ProviderCatalogEntry>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_context_window: d_default_context_window(),
            default_max_output_tokens: d_default_max_output_tokens(),
            retry_backoff_secs: d_retry_backoff_secs(),
            catalog: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retry_schedule_is_exponential() {
        let cfg = LlmConfig::default();
        assert_eq!(cfg.retry_backoff_secs, vec![2, 4, 8]);
    }

    #[test]
    fn empty_catalog_by_default() {
        let cfg: LlmConfig = toml::from_str("").unwrap();
        assert!(cfg.catalog.is_empty());
        assert_eq!(cfg.default_context_window, 8192);
    }
}
