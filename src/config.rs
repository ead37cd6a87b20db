//! Configuration management for the Slurp gateway
//!
//! Values come from `config.toml` (all sections optional) and are then
//! overridden by environment variables, so secrets never need to live in
//! the file.

use crate::address::{CardanoAddress, Network};
use crate::error::{GatewayError, Result};
use crate::units::Lovelace;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub deposit: DepositConfig,
    #[serde(default)]
    pub faucet: FaucetConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
}

/// `development` exposes internal error messages; `production` hides them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub environment: Environment,
    /// Allowed CORS origins; empty mirrors the request origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            environment: Environment::default(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Blockfrost,
    Koios,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    #[serde(default = "default_network")]
    pub network: Network,
    /// Overrides the network's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Blockfrost project id or Koios bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            network: default_network(),
            base_url: None,
            api_key: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl ProviderConfig {
    pub fn endpoint(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match self.kind {
                ProviderKind::Blockfrost => self.network.blockfrost_url().to_string(),
                ProviderKind::Koios => self.network.koios_url().to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositConfig {
    /// Address receiving deposits. Deposits are refused while unset.
    #[serde(default)]
    pub treasury_address: Option<String>,
    #[serde(default = "default_min_deposit")]
    pub min_deposit: Lovelace,
    #[serde(default = "default_max_deposit")]
    pub max_deposit: Lovelace,
    #[serde(default = "default_ttl_slots")]
    pub ttl_slots: u64,
    /// Fee parameters used when the provider cannot report them.
    #[serde(default = "default_fallback_min_fee_a")]
    pub fallback_min_fee_a: u64,
    #[serde(default = "default_fallback_min_fee_b")]
    pub fallback_min_fee_b: u64,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            treasury_address: None,
            min_deposit: default_min_deposit(),
            max_deposit: default_max_deposit(),
            ttl_slots: default_ttl_slots(),
            fallback_min_fee_a: default_fallback_min_fee_a(),
            fallback_min_fee_b: default_fallback_min_fee_b(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaucetConfig {
    /// Hex ed25519 seed of the faucet wallet. The faucet is disabled while unset.
    #[serde(default)]
    pub signing_key: Option<String>,
    #[serde(default)]
    pub policy_id: String,
    /// Hex-encoded asset name.
    #[serde(default)]
    pub asset_name: String,
    #[serde(default = "default_token_amount")]
    pub token_amount: u64,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_claim_capacity")]
    pub ledger_capacity: usize,
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            signing_key: None,
            policy_id: String::new(),
            asset_name: String::new(),
            token_amount: default_token_amount(),
            cooldown_secs: default_cooldown(),
            ledger_capacity: default_claim_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_requests")]
    pub requests: u32,
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_requests(),
            window_secs: default_rate_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_max_transactions")]
    pub max_transactions: usize,
    #[serde(default = "default_max_addresses")]
    pub max_addresses: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_transactions: default_max_transactions(),
            max_addresses: default_max_addresses(),
        }
    }
}

/// Load `config.toml` from the working directory, then apply env overrides.
pub fn load_config() -> Result<Config> {
    load_config_from(DEFAULT_CONFIG_PATH)
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config> {
    let config_str = fs::read_to_string(path.as_ref()).unwrap_or_default();
    let mut config = parse_config(&config_str)?;
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Parses TOML text; empty input yields the defaults.
pub fn parse_config(config_str: &str) -> Result<Config> {
    if config_str.trim().is_empty() {
        return Ok(Config::default());
    }
    toml::from_str(config_str).map_err(|e| GatewayError::ConfigError(e.to_string()))
}

impl Config {
    /// Applies environment overrides through `lookup` so tests need not touch the process env.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| GatewayError::ConfigError(format!("PORT '{}' is not a port", port)))?;
        }
        if let Some(env) = lookup("SLURP_ENV") {
            self.server.environment = match env.to_ascii_lowercase().as_str() {
                "production" | "prod" => Environment::Production,
                _ => Environment::Development,
            };
        }
        if let Some(network) = lookup("SLURP_NETWORK") {
            self.provider.network = network.parse()?;
        }
        if let Some(project_id) = lookup("BLOCKFROST_PROJECT_ID") {
            if self.provider.kind == ProviderKind::Blockfrost {
                self.provider.api_key = Some(project_id);
            }
        }
        if let Some(token) = lookup("KOIOS_TOKEN") {
            if self.provider.kind == ProviderKind::Koios {
                self.provider.api_key = Some(token);
            }
        }
        if let Some(key) = lookup("FAUCET_SIGNING_KEY") {
            self.faucet.signing_key = Some(key);
        }
        if let Some(treasury) = lookup("TREASURY_ADDRESS") {
            self.deposit.treasury_address = Some(treasury);
        }
        Ok(())
    }

    /// Validate critical values
    pub fn validate(&self) -> Result<()> {
        if self.deposit.min_deposit > self.deposit.max_deposit {
            return Err(GatewayError::ConfigError(
                "deposit.min_deposit must not exceed deposit.max_deposit".to_string(),
            ));
        }
        if let Some(treasury) = &self.deposit.treasury_address {
            let address = CardanoAddress::parse(treasury)
                .map_err(|e| GatewayError::ConfigError(format!("deposit.treasury_address: {}", e)))?;
            address
                .ensure_network(self.provider.network)
                .map_err(|e| GatewayError::ConfigError(format!("deposit.treasury_address: {}", e)))?;
        }
        if self.faucet.signing_key.is_some() {
            if hex::decode(&self.faucet.policy_id).map(|b| b.len()) != Ok(28) {
                return Err(GatewayError::ConfigError(
                    "faucet.policy_id must be 56 hex characters".to_string(),
                ));
            }
            match hex::decode(&self.faucet.asset_name) {
                Ok(name) if name.len() <= 32 => {}
                _ => {
                    return Err(GatewayError::ConfigError(
                        "faucet.asset_name must be hex of at most 32 bytes".to_string(),
                    ))
                }
            }
            if self.faucet.token_amount == 0 {
                return Err(GatewayError::ConfigError(
                    "faucet.token_amount must be positive".to_string(),
                ));
            }
        }
        if self.rate_limit.requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(GatewayError::ConfigError(
                "rate_limit.requests and rate_limit.window_secs must be positive".to_string(),
            ));
        }
        if self.analyzer.max_addresses < 2 {
            return Err(GatewayError::ConfigError(
                "analyzer.max_addresses must allow at least two addresses".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    3000
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_network() -> Network {
    Network::Preprod
}

fn default_timeout() -> u64 {
    30
}

fn default_min_deposit() -> Lovelace {
    Lovelace(2_000_000)
}

fn default_max_deposit() -> Lovelace {
    Lovelace(10_000_000_000)
}

fn default_ttl_slots() -> u64 {
    7200
}

fn default_fallback_min_fee_a() -> u64 {
    44
}

fn default_fallback_min_fee_b() -> u64 {
    155_381
}

fn default_token_amount() -> u64 {
    1_000_000
}

fn default_cooldown() -> u64 {
    24 * 60 * 60
}

fn default_claim_capacity() -> usize {
    50_000
}

fn default_rate_requests() -> u32 {
    100
}

fn default_rate_window() -> u64 {
    60
}

fn default_max_transactions() -> usize {
    25
}

fn default_max_addresses() -> usize {
    10
}
