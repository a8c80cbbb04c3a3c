pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// bench-gateway — multi-tenant LLM benchmarking service.
#[derive(Debug, Parser)]
#[command(name = "bench-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP/WebSocket server (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults filled in) as TOML.
    Show,
}

/// Loads configuration from the path named by `BENCH_GATEWAY_CONFIG` (or
/// `config.toml`), falling back to defaults when the file doesn't exist, then
/// overlays secrets and overrides from the process environment.
pub fn load_config() -> anyhow::Result<(bg_domain::config::Config, String)> {
    let config_path = std::env::var("BENCH_GATEWAY_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let mut config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        bg_domain::config::Config::from_toml_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        bg_domain::config::Config::default()
    };

    config.apply_env(|k| std::env::var(k).ok());
    Ok((config, config_path))
}
