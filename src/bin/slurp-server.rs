#![forbid(unsafe_code)]
//! Slurp HTTP gateway
//!
//! Reads `config.toml` (or the path given with `--config`) plus environment
//! overrides and serves the REST API.

use clap::Parser;
use colored::*;
use slurp::api::{run_api_server, Gateway};
use slurp::config::{load_config_from, DEFAULT_CONFIG_PATH};
use slurp::provider;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config_from(&cli.config).map_err(|e| {
        eprintln!("{}", format!("❌ {}", e).red().bold());
        e
    })?;

    let provider = provider::from_config(&config.provider)?;
    info!(
        provider = provider.name(),
        network = config.provider.network.as_str(),
        endpoint = %config.provider.endpoint(),
        "Chain provider ready"
    );
    if config.faucet.signing_key.is_none() {
        warn!("No faucet signing key configured; /api/slurp will answer 503");
    }
    if config.deposit.treasury_address.is_none() {
        warn!("No treasury address configured; deposits are disabled");
    }

    let gateway = Arc::new(Gateway::new(&config, provider)?);

    println!(
        "{}",
        format!(
            "🚀 Slurp gateway on http://{}:{} ({})",
            config.server.bind,
            config.server.port,
            config.provider.network.as_str()
        )
        .bright_green()
        .bold()
    );

    run_api_server(gateway).await
}
