//! Resolves a `(provider_key, model_id)` compound-key target into a live
//! provider adapter plus the catalog rows describing it, and builds the
//! wire-ready [`ChatRequest`] the provider call layer sends.

use std::sync::Arc;

use bg_domain::capability::LlmCapabilities;
use bg_domain::error::{Error, Result};
use bg_domain::tool::{Message, ToolDefinition};
use bg_domain::user::Model;
use bg_providers::params::{self, RequestedParam};
use bg_providers::{ChatRequest, LlmProvider, ProviderRegistry};
use bg_store::Db;

/// A resolved `(provider_key, model_id)` target, ready to drive one or more
/// calls. Cheap to clone (an `Arc<dyn LlmProvider>` plus small rows).
#[derive(Clone)]
pub struct ResolvedTarget {
    pub provider_key: String,
    pub model_id: String,
    pub kind: String,
    pub provider: Arc<dyn LlmProvider>,
    pub model: Model,
    pub capabilities: LlmCapabilities,
}

pub fn resolve_target(
    db: &Db,
    providers: &ProviderRegistry,
    user_id: &str,
    provider_key: &str,
    model_id: &str,
) -> Result<ResolvedTarget> {
    let provider_row = db
        .get_provider_by_key(user_id, provider_key)?
        .ok_or_else(|| Error::NotFound(format!("provider {provider_key} is not configured for this account")))?;
    let model = db
        .get_model(&provider_row.id, model_id)?
        .ok_or_else(|| Error::NotFound(format!("model {model_id} is not registered under {provider_key}")))?;
    let provider = providers.get(provider_key).ok_or_else(|| Error::Provider {
        provider: provider_key.to_string(),
        message: "no live adapter initialized for this provider".into(),
    })?;

    let mut capabilities = provider.capabilities().clone();
    capabilities.context_window_tokens = Some(model.context_window);
    if model.max_output_tokens.is_some() {
        capabilities.max_output_tokens = model.max_output_tokens;
    }

    Ok(ResolvedTarget {
        provider_key: provider_key.to_string(),
        model_id: model_id.to_string(),
        kind: provider_row.kind,
        provider,
        model,
        capabilities,
    })
}

/// Requested sampling params before provider-specific resolution, as taken
/// straight from a job's `params_json`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RequestedSampling {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub top_p: Option<f64>,
}

impl RequestedSampling {
    fn as_requested(&self) -> Vec<RequestedParam> {
        let mut out = Vec::new();
        if let Some(t) = self.temperature {
            out.push(RequestedParam { name: "temperature".into(), value: serde_json::json!(t) });
        }
        if let Some(m) = self.max_tokens {
            out.push(RequestedParam { name: "max_tokens".into(), value: serde_json::json!(m) });
        }
        if let Some(p) = self.top_p {
            out.push(RequestedParam { name: "top_p".into(), value: serde_json::json!(p) });
        }
        out
    }
}

/// Runs a target's requested sampling params through its provider's
/// conflict table, then assembles the final [`ChatRequest`]. Returns the
/// adjustment log alongside the request so callers can surface it (the
/// tool-eval and benchmark payloads both echo it back to the client).
pub fn build_chat_request(
    target: &ResolvedTarget,
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    sampling: &RequestedSampling,
    json_mode: bool,
) -> Result<(ChatRequest, Vec<params::Adjustment>)> {
    let rules = if target.model.skip_params.is_empty() {
        params::ProviderRules::for_kind(&target.kind)
    } else {
        let mut rules = params::ProviderRules::for_kind(&target.kind);
        rules.unsupported.extend(target.model.skip_params.iter().cloned());
        rules
    };

    let requested = sampling.as_requested();
    let (resolved, adjustments) = params::resolve(&rules, &target.model_id, &requested);
    params::ensure_required(&rules, &resolved)?;

    let mut req = ChatRequest {
        messages,
        tools,
        json_mode: json_mode && target.capabilities.supports_json_mode,
        model: Some(target.model_id.clone()),
        ..Default::default()
    };
    for p in &resolved {
        match p.name.as_str() {
            "temperature" => req.temperature = p.value.as_f64().map(|v| v as f32),
            // max_tokens may arrive renamed (e.g. OpenAI's o-series
            // max_completion_tokens) — the wire key name is the adapter's
            // concern, not ChatRequest's.
            "max_tokens" | "max_completion_tokens" => req.max_tokens = p.value.as_u64().map(|v| v as u32),
            "top_p" => req.top_p = p.value.as_f64().map(|v| v as f32),
            _ => {}
        }
    }

    Ok((req, adjustments))
}
