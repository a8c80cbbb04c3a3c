//! AWS Bedrock stub adapter.
//!
//! Native Bedrock SigV4 authentication requires the `aws-sigv4` and
//! `aws-credential-types` crates, which add significant dependency weight.
//! This stub registers the `aws_bedrock` provider kind so that the config
//! option is recognized, but all runtime methods return an actionable error
//! directing users to Bedrock's OpenAI-compatible gateway instead.
//!
//! Users who need Bedrock today can register a provider with:
//! ```toml
//! kind = "openai_compat"
//! api_base = "https://bedrock-runtime.us-east-1.amazonaws.com/v1"
//! ```
//! with IAM auth configured externally (e.g. IAM Roles Anywhere, credential
//! helper, or `aws-vault`).

use crate::init::ProviderInit;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use bg_domain::capability::LlmCapabilities;
use bg_domain::error::{Error, Result};
use bg_domain::stream::{BoxStream, StreamEvent};

const STUB_MSG: &str = "\
AWS Bedrock native SigV4 auth is not yet implemented (requires the \
aws-sdk-bedrockruntime crate). Register a provider with kind = \"openai_compat\" \
and api_base = \"https://bedrock-runtime.<region>.amazonaws.com/v1\" instead, \
with IAM credentials configured externally.";

/// Stub LLM provider for AWS Bedrock.
///
/// All runtime methods return an error with guidance on how to use
/// Bedrock via the OpenAI-compatible gateway. The provider is registered
/// successfully so that configuration validation passes and the config
/// option is discoverable.
pub struct BedrockProvider {
    id: String,
    capabilities: LlmCapabilities,
}

impl BedrockProvider {
    /// Always succeeds so the provider appears in the registry, but all
    /// operational methods return an error with guidance.
    pub fn from_init(init: &ProviderInit) -> Result<Self> {
        tracing::warn!(
            provider_id = %init.provider_key,
            "AWS Bedrock provider registered as a stub — native SigV4 auth \
             not yet implemented. Use kind = \"openai_compat\" with Bedrock's \
             OpenAI-compatible endpoint for now."
        );

        Ok(Self { id: init.provider_key.clone(), capabilities: LlmCapabilities::default() })
    }

    fn stub_error(&self) -> Error {
        Error::Provider { provider: self.id.clone(), message: STUB_MSG.into() }
    }
}

#[async_trait::async_trait]
impl LlmProvider for BedrockProvider {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
        Err(self.stub_error())
    }

    async fn chat_stream(&self, _req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        Err(self.stub_error())
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_returns_guidance_error() {
        let init = ProviderInit {
            provider_key: "bedrock".into(),
            kind: "aws_bedrock".into(),
            api_key: String::new(),
            api_base: None,
            default_model: None,
        };
        let provider = BedrockProvider::from_init(&init).unwrap();
        let result = provider.chat(&ChatRequest::default()).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), "provider_error");
    }
}
