use bg_domain::capability::LlmCapabilities;
use bg_domain::error::Result;
use bg_domain::stream::{BoxStream, StreamEvent, Usage};
use bg_domain::tool::{Message, ToolCall, ToolDefinition};

/// The resolved wire-call descriptor a job handler sends to a provider
/// adapter. Built by [`crate::params::resolve`] from a job's raw requested
/// params plus the target's conflict rules — never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub json_mode: bool,
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Every adapter implements this contract; job handlers (`bg-handlers`) and
/// the parameter-resolution pipeline never talk to a provider's wire format
/// directly.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;

    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    fn capabilities(&self) -> &LlmCapabilities;

    fn provider_id(&self) -> &str;
}
