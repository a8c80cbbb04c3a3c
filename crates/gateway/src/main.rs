use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use bg_domain::config::Config;
use bg_gateway::auth::LoginLimiter;
use bg_gateway::cli::{Cli, Command, ConfigCommand};
use bg_gateway::state::AppState;
use bg_gateway::{api, schedule_runner};
use bg_providers::registry::{ProviderRegistry, StartupPolicy};
use bg_providers::init::ProviderInit;
use bg_registry::JobRegistry;
use bg_store::Db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = bg_gateway::cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = bg_gateway::cli::load_config()?;
            let passed = bg_gateway::cli::doctor::run(&config, &config_path)?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = bg_gateway::cli::load_config()?;
            let valid = bg_gateway::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = bg_gateway::cli::load_config()?;
            bg_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("bench-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,bg_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("bench-gateway starting");

    // ── Config validation ────────────────────────────────────────────
    // FERNET_KEY gates an external-vault feature this gateway never
    // implements, so it's permanently unsatisfiable and only ever warned
    // about. JWT_SECRET missing is the only condition we refuse to serve on.
    let issues = config.validate();
    for issue in &issues {
        tracing::warn!("config: {issue}");
    }
    if !config.jwt.is_ready() {
        anyhow::bail!("JWT_SECRET is not set; refusing to start");
    }

    // ── Store ─────────────────────────────────────────────────────────
    let db = Arc::new(Db::open(&config.store.db_path, config.store.busy_timeout_ms)?);
    tracing::info!(path = %config.store.db_path, "store opened");

    // ── Provider registry ────────────────────────────────────────────
    let inits: Vec<ProviderInit> = config
        .llm
        .catalog
        .iter()
        .map(|entry| ProviderInit {
            provider_key: entry.kind.clone(),
            kind: entry.kind.clone(),
            api_key: entry.auth_env_var.as_deref().and_then(|v| std::env::var(v).ok()).unwrap_or_default(),
            api_base: entry.api_base_env_var.as_deref().and_then(|v| std::env::var(v).ok()),
            default_model: None,
        })
        .collect();
    let providers = Arc::new(ProviderRegistry::from_inits(&inits, StartupPolicy::AllowNone)?);
    tracing::info!(count = providers.len(), "provider registry ready");

    // ── Jobs ──────────────────────────────────────────────────────────
    let hub = Arc::new(bg_registry::ws::WsHub::new(config.server.max_ws_connections_per_user));
    let handlers = bg_handlers::build_handlers(providers.clone());
    let registry = JobRegistry::new(db.clone(), hub.clone(), handlers);
    registry.spawn_watchdog();

    let state = AppState {
        config: config.clone(),
        db,
        hub,
        providers,
        registry,
        login_limiter: Arc::new(LoginLimiter::new()),
    };

    // ── Schedule runner (tick every 30s, trigger due schedules) ───────
    schedule_runner::spawn(state.clone());
    tracing::info!("schedule runner started (30s tick)");

    // ── CORS layer ────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.app_base_url);

    // ── Concurrency limit (backpressure protection) ──────────────────
    let max_concurrent =
        std::env::var("BENCH_GATEWAY_MAX_CONCURRENT_REQUESTS").ok().and_then(|v| v.parse::<usize>().ok()).unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    let router = api::router(state).layer(cors_layer).layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));

    // ── Per-IP rate limit (optional, env-driven — no config section for
    // this exists since [rate_limit] governs per-user job quotas, not the
    // HTTP layer) ──────────────────────────────────────────────────────
    let rate_limit_env = std::env::var("BENCH_GATEWAY_RATE_LIMIT_RPS").ok().and_then(|v| v.parse::<u64>().ok());
    let app = if let Some(rps) = rate_limit_env {
        use tower_governor::governor::GovernorConfigBuilder;
        let burst = std::env::var("BENCH_GATEWAY_RATE_LIMIT_BURST").ok().and_then(|v| v.parse::<u32>().ok()).unwrap_or(20);
        let gov_config = GovernorConfigBuilder::default()
            .per_second(rps)
            .burst_size(burst)
            .finish()
            .expect("BENCH_GATEWAY_RATE_LIMIT_RPS/BURST must be > 0");
        tracing::info!(rps, burst, "per-IP rate limiting enabled");
        router.layer(tower_governor::GovernorLayer::new(Arc::new(gov_config)))
    } else {
        router
    };

    let addr = config.server.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;
    Ok(())
}

fn build_cors_layer(app_base_url: &str) -> CorsLayer {
    let origin = app_base_url.parse::<HeaderValue>().map(AllowOrigin::exact).unwrap_or_else(|_| AllowOrigin::any());
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_credentials(true)
        .allow_headers(tower_http::cors::Any)
}

