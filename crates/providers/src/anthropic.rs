//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API including tool use, streaming, and
//! the Anthropic-specific message structure where system messages go in a
//! separate top-level `system` field.

use crate::init::ProviderInit;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::from_reqwest;
use bg_domain::capability::LlmCapabilities;
use bg_domain::error::{Error, Result};
use bg_domain::stream::{BoxStream, StreamEvent, Usage};
use bg_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use serde_json::Value;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// An LLM provider adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    capabilities: LlmCapabilities,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_init(init: &ProviderInit) -> Result<Self> {
        let base_url = init
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let default_model = init
            .default_model
            .clone()
            .unwrap_or_else(|| "claude-sonnet-4-20250514".into());

        let capabilities = LlmCapabilities {
            supports_tools: bg_domain::capability::ToolSupport::StrictJson,
            supports_streaming: true,
            supports_json_mode: false,
            supports_vision: true,
            context_window_tokens: Some(200_000),
            max_output_tokens: Some(8_192),
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| from_reqwest(&init.provider_key, e))?;

        Ok(Self {
            id: init.provider_key.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: init.api_key.clone(),
            default_model,
            capabilities,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }

    fn build_messages_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());

        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.extract_all_text()),
                Role::User => api_messages.push(user_msg_to_anthropic(msg)),
                Role::Assistant => api_messages.push(assistant_msg_to_anthropic(msg)),
                Role::Tool => api_messages.push(tool_result_to_anthropic(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "stream": stream,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_anthropic).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        let max_tokens = req.max_tokens.unwrap_or(4096);
        body["max_tokens"] = serde_json::json!(max_tokens);

        body
    }
}

fn user_msg_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({"role": "user", "content": t}),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
                    ContentPart::Image { url } => Some(serde_json::json!({
                        "type": "image",
                        "source": { "type": "base64", "media_type": "image/png", "data": url }
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({"role": "user", "content": content})
        }
    }
}

fn assistant_msg_to_anthropic(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Text(t) => serde_json::json!({
            "role": "assistant",
            "content": [{"type": "text", "text": t}],
        }),
        MessageContent::Parts(parts) => {
            let content: Vec<Value> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
                    ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                        "type": "tool_use", "id": id, "name": name, "input": input,
                    })),
                    _ => None,
                })
                .collect();
            serde_json::json!({"role": "assistant", "content": content})
        }
    }
}

fn tool_result_to_anthropic(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult { tool_use_id, content, is_error } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result", "tool_use_id": "", "content": t,
        })],
    };
    serde_json::json!({"role": "user", "content": content})
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn parse_anthropic_response(body: &Value, provider_id: &str) -> Result<ChatResponse> {
    let content_arr = body.get("content").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &content_arr {
        let block_type = block.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match block_type {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t.to_string());
                }
            }
            "tool_use" => {
                let call_id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let tool_name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                let arguments = block.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                tool_calls.push(ToolCall { call_id, tool_name, arguments });
            }
            _ => {}
        }
    }

    if content_arr.is_empty() && body.get("error").is_some() {
        let msg = body.get("error").and_then(|e| e.get("message")).and_then(|v| v.as_str()).unwrap_or("unknown error");
        return Err(Error::Provider { provider: provider_id.into(), message: msg.into() });
    }

    let model = body.get("model").and_then(|v| v.as_str()).unwrap_or("unknown").to_string();
    let finish_reason = body.get("stop_reason").and_then(|v| v.as_str()).map(normalize_stop_reason);
    let usage = body.get("usage").and_then(parse_anthropic_usage);

    Ok(ChatResponse { content: text_parts.join(""), tool_calls, usage, model, finish_reason })
}

fn normalize_stop_reason(s: &str) -> String {
    match s {
        "end_turn" => "stop".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

fn parse_anthropic_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()? as u32;
    let output = v.get("output_tokens")?.as_u64()? as u32;
    Some(Usage { prompt_tokens: input, completion_tokens: output, total_tokens: input + output })
}

/// Internal state for assembling tool calls from streaming content blocks.
struct StreamState {
    active_tool_calls: std::collections::HashMap<u64, String>,
    usage: Option<Usage>,
    done_emitted: bool,
}

impl StreamState {
    fn new() -> Self {
        Self { active_tool_calls: std::collections::HashMap::new(), usage: None, done_emitted: false }
    }
}

fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let event_type = v.get("type").and_then(|v| v.as_str()).unwrap_or("");

    match event_type {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_anthropic_usage);
            }
        }
        "content_block_start" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|v| v.as_str()) == Some("tool_use") {
                    let call_id = block.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let name = block.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    events.push(Ok(StreamEvent::ToolCallStarted { call_id: call_id.clone(), tool_name: name }));
                    state.active_tool_calls.insert(idx, call_id);
                }
            }
        }
        "content_block_delta" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|v| v.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::Token { text: text.to_string() }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                            if let Some(call_id) = state.active_tool_calls.get(&idx) {
                                events.push(Ok(StreamEvent::ToolCallDelta { call_id: call_id.clone(), delta: partial.to_string() }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        "content_block_stop" => {
            let idx = v.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(call_id) = state.active_tool_calls.remove(&idx) {
                events.push(Ok(StreamEvent::ToolCallFinished { call_id }));
            }
        }
        "message_delta" => {
            if let Some(output) = v.get("usage").and_then(|u| u.get("output_tokens")).and_then(|v| v.as_u64()) {
                if let Some(ref mut u) = state.usage {
                    u.completion_tokens = output as u32;
                    u.total_tokens = u.prompt_tokens + u.completion_tokens;
                }
            }
            let stop_reason = v.get("delta").and_then(|d| d.get("stop_reason")).and_then(|v| v.as_str()).map(normalize_stop_reason);
            if stop_reason.is_some() {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done { usage: state.usage, finish_reason: stop_reason }));
            }
        }
        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done { usage: state.usage, finish_reason: Some("stop".into()) }));
            }
        }
        "error" => {
            let msg = v.get("error").and_then(|e| e.get("message")).and_then(|v| v.as_str()).unwrap_or("unknown error");
            events.push(Ok(StreamEvent::Error { message: msg.to_string() }));
        }
        _ => {}
    }

    events
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req, false);

        tracing::debug!(provider = %self.id, url = %url, "anthropic chat request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(|e| from_reqwest(&self.id, e))?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(|e| from_reqwest(&self.id, e))?;

        if !status.is_success() {
            return Err(Error::Provider { provider: self.id.clone(), message: format!("HTTP {} - {}", status.as_u16(), resp_text) });
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_anthropic_response(&resp_json, &self.id)
    }

    async fn chat_stream(&self, req: &ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req, true);
        let provider_id = self.id.clone();

        tracing::debug!(provider = %self.id, url = %url, "anthropic stream request");

        let resp = self.authed_post(&url).json(&body).send().await.map_err(|e| from_reqwest(&provider_id, e))?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(|e| from_reqwest(&provider_id, e))?;
            return Err(Error::Provider { provider: provider_id, message: format!("HTTP {} - {}", status.as_u16(), err_text) });
        }

        let mut state = StreamState::new();
        Ok(crate::sse::sse_response_stream(provider_id, resp, move |data| parse_anthropic_sse(data, &mut state)))
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

    #[test]
    fn parses_text_and_usage() {
        let body = serde_json::json!({
            "content": [{"type": "text", "text": "hello"}],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 3}
        });
        let resp = parse_anthropic_response(&body, "anthropic").unwrap();
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 13);
    }

    #[test]
    fn parses_tool_use_block() {
        let body = serde_json::json!({
            "content": [{"type": "tool_use", "id": "call1", "name": "search", "input": {"q": "rust"}}],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
        });
        let resp = parse_anthropic_response(&body, "anthropic").unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn sse_content_block_delta_yields_token() {
        let mut state = StreamState::new();
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#;
        let events = parse_anthropic_sse(data, &mut state);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Ok(StreamEvent::Token { text }) => assert_eq!(text, "hi"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sse_tool_use_lifecycle_starts_deltas_and_finishes() {
        let mut state = StreamState::new();
        let start = r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"call1","name":"search"}}"#;
        let delta = r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"q\":1}"}}"#;
        let stop = r#"{"type":"content_block_stop","index":0}"#;

        let started = parse_anthropic_sse(start, &mut state);
        assert!(matches!(started[0], Ok(StreamEvent::ToolCallStarted { .. })));

        let deltas = parse_anthropic_sse(delta, &mut state);
        assert!(matches!(deltas[0], Ok(StreamEvent::ToolCallDelta { .. })));

        let finished = parse_anthropic_sse(stop, &mut state);
        assert!(matches!(finished[0], Ok(StreamEvent::ToolCallFinished { .. })));
    }
}
