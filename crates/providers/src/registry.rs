//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances. At startup the
//! registry takes a resolved [`ProviderInit`] per configured target (secrets
//! already decrypted) and instantiates the matching adapter.

use crate::anthropic::AnthropicProvider;
use crate::bedrock::BedrockProvider;
use crate::google::GoogleProvider;
use crate::init::ProviderInit;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use bg_domain::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Whether the gateway may boot with zero working providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPolicy {
    RequireOne,
    AllowNone,
}

/// Holds all instantiated LLM providers, keyed by `provider_key`.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_key: String,
    pub kind: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Mask substrings that look like API keys or bearer tokens in an error
/// message. This prevents raw secrets from leaking into logs, readiness
/// endpoints, or dashboard UIs.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20 && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Build the registry from resolved provider construction inputs.
    ///
    /// Providers that fail to initialize are logged and skipped rather than
    /// aborting the entire startup, unless `policy` is `RequireOne` and every
    /// single one fails.
    pub fn from_inits(inits: &[ProviderInit], policy: StartupPolicy) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors: Vec<ProviderInitError> = Vec::new();

        for init in inits {
            let result: Result<Arc<dyn LlmProvider>> = match init.kind.as_str() {
                "anthropic" => AnthropicProvider::from_init(init).map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                "google" | "gemini" => GoogleProvider::from_init(init).map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                "aws_bedrock" => BedrockProvider::from_init(init).map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                _ => OpenAiCompatProvider::from_init(init).map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_key = %init.provider_key, kind = %init.kind, "registered LLM provider");
                    providers.insert(init.provider_key.clone(), provider);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider_key = %init.provider_key,
                        kind = %init.kind,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_key: init.provider_key.clone(),
                        kind: init.kind.clone(),
                        error: safe_error,
                    });
                }
            }
        }

        if providers.is_empty() && !inits.is_empty() && policy == StartupPolicy::RequireOne {
            return Err(Error::Config("all configured LLM providers failed to initialize".into()));
        }

        if providers.is_empty() && !inits.is_empty() {
            tracing::warn!(
                failed_providers = init_errors.len(),
                "no LLM providers initialized; gateway will boot but benchmark jobs \
                 targeting these providers will fail until credentials are fixed"
            );
        }

        Ok(Self { providers, init_errors })
    }

    pub fn get(&self, provider_key: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_key).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn LlmProvider>)> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.providers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Provider initialization errors (empty if all succeeded). Surfaced in
    /// the readiness/admin endpoints so operators can diagnose missing API
    /// keys without scraping startup logs.
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init(key: &str, kind: &str) -> ProviderInit {
        ProviderInit {
            provider_key: key.into(),
            kind: kind.into(),
            api_key: "sk-test".into(),
            api_base: None,
            default_model: None,
        }
    }

    #[test]
    fn mask_secrets_redacts_long_tokens() {
        let msg = "request failed with key sk-proj-abcdefghijklmnopqrstuvwxyz rejected";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("abcdefghijklmnopqrstuvwxyz"));
    }

    #[test]
    fn mask_secrets_leaves_short_words_alone() {
        assert_eq!(mask_secrets("temperature out of range"), "temperature out of range");
    }

    #[test]
    fn registers_providers_by_kind() {
        let inits = vec![init("openai", "openai_compat"), init("anthropic", "anthropic"), init("bedrock", "aws_bedrock")];
        let registry = ProviderRegistry::from_inits(&inits, StartupPolicy::AllowNone).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.get("openai").is_some());
        assert_eq!(registry.list_providers(), vec!["anthropic", "bedrock", "openai"]);
    }

    #[test]
    fn empty_inits_never_errors_even_with_require_one() {
        let registry = ProviderRegistry::from_inits(&[], StartupPolicy::RequireOne).unwrap();
        assert!(registry.is_empty());
    }
}
