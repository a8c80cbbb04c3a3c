//! Offline benchmark CLI — the same (target, tier, run) sweep as the
//! `benchmark` job handler, minus the job-registry/store path: results are
//! written to a timestamped JSON file instead of persisted rows, and
//! providers/models are addressed by substring against the configured
//! catalog rather than by a user's stored provider/model rows.

use std::time::Instant;

use bg_domain::tool::Message;
use bg_providers::init::ProviderInit;
use bg_providers::registry::{ProviderRegistry, StartupPolicy};
use bg_providers::traits::ChatRequest;
use clap::Parser;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Parser)]
#[command(name = "benchmark", about = "Offline provider latency/throughput sweep")]
struct Args {
    #[arg(long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "1")]
    runs: u32,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long, default_value = "Say hello in one short sentence.")]
    prompt: String,
    #[arg(long, default_value = "256")]
    max_tokens: u32,
    #[arg(long, default_value = "0.7")]
    temperature: f32,
    #[arg(long)]
    no_save: bool,
    #[arg(long, default_value = "0")]
    context_tiers: String,
}

#[derive(Debug, Serialize)]
struct RunResult {
    provider_key: String,
    context_tier: u32,
    ordinal: u32,
    latency_ms: u64,
    output_tokens: Option<u32>,
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.config).unwrap_or_default();
    let config = if raw.is_empty() {
        bg_domain::config::Config::default()
    } else {
        bg_domain::config::Config::from_toml_str(&raw)?
    };

    let catalog: Vec<_> = config
        .llm
        .catalog
        .iter()
        .filter(|entry| match &args.provider {
            Some(substr) => entry.kind.contains(substr.as_str()) || entry.display_name.contains(substr.as_str()),
            None => true,
        })
        .cloned()
        .collect();

    if catalog.is_empty() {
        eprintln!("no provider in the catalog matches {:?}", args.provider);
        std::process::exit(1);
    }

    let inits: Vec<ProviderInit> = catalog
        .iter()
        .map(|entry| ProviderInit {
            provider_key: entry.kind.clone(),
            kind: entry.kind.clone(),
            api_key: entry.auth_env_var.as_deref().and_then(|v| std::env::var(v).ok()).unwrap_or_default(),
            api_base: entry.api_base_env_var.as_deref().and_then(|v| std::env::var(v).ok()),
            default_model: args.model.clone(),
        })
        .collect();

    let registry = ProviderRegistry::from_inits(&inits, StartupPolicy::AllowNone)?;
    for err in registry.init_errors() {
        eprintln!("warning: provider {} failed to initialize: {}", err.provider_key, err.error);
    }

    let tiers: Vec<u32> = args.context_tiers.split(',').filter_map(|s| s.trim().parse::<u32>().ok()).collect();
    let tiers = if tiers.is_empty() { vec![0] } else { tiers };

    let Some(model) = args.model.clone() else {
        eprintln!("--model is required (no per-kind default model is configured)");
        std::process::exit(1);
    };

    let mut results = Vec::new();

    for key in registry.list_providers() {
        let provider = registry.get(&key).expect("key came from list_providers");

        for &tier in &tiers {
            for ordinal in 0..args.runs {
                let padding = "x ".repeat(tier as usize);
                let req = ChatRequest {
                    messages: vec![Message::user(format!("{padding}{}", args.prompt))],
                    tools: vec![],
                    temperature: Some(args.temperature),
                    max_tokens: Some(args.max_tokens),
                    top_p: None,
                    json_mode: false,
                    model: Some(model.clone()),
                };

                let started = Instant::now();
                let outcome = provider.chat(&req).await;
                let latency_ms = started.elapsed().as_millis() as u64;

                match outcome {
                    Ok(resp) => {
                        results.push(RunResult {
                            provider_key: key.clone(),
                            context_tier: tier,
                            ordinal,
                            latency_ms,
                            output_tokens: resp.usage.map(|u| u.completion_tokens),
                            error: None,
                        });
                        println!("{key} tier={tier} run={ordinal} latency_ms={latency_ms}");
                    }
                    Err(err) => {
                        let msg = bg_providers::registry::mask_secrets(&err.to_string());
                        results.push(RunResult {
                            provider_key: key.clone(),
                            context_tier: tier,
                            ordinal,
                            latency_ms,
                            output_tokens: None,
                            error: Some(msg.clone()),
                        });
                        eprintln!("{key} tier={tier} run={ordinal} error={msg}");
                    }
                }
            }
        }
    }

    if !args.no_save {
        let path = format!("benchmark-{}.json", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
        std::fs::write(&path, serde_json::to_string_pretty(&json!({ "results": results }))?)?;
        println!("wrote {path}");
    }

    Ok(())
}
