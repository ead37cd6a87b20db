//! Chain access through third-party indexers
//!
//! The gateway never talks to a node directly. Everything it needs (UTxOs,
//! balances, transaction history, protocol parameters, submission) goes
//! through a [`ChainProvider`]. Blockfrost and Koios are supported over
//! REST; [`InMemoryProvider`] serves fixtures for tests and dry runs.

pub mod blockfrost;
pub mod koios;
pub mod memory;

pub use blockfrost::BlockfrostProvider;
pub use koios::KoiosProvider;
pub use memory::InMemoryProvider;

use crate::config::{ProviderConfig, ProviderKind};
use crate::units::Lovelace;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Native asset identifier, both parts hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId {
    pub policy_id: String,
    pub asset_name: String,
}

impl AssetId {
    pub fn new(policy_id: impl Into<String>, asset_name: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into().to_ascii_lowercase(),
            asset_name: asset_name.into().to_ascii_lowercase(),
        }
    }

    /// Blockfrost-style unit: policy id immediately followed by asset name.
    pub fn from_unit(unit: &str) -> Option<Self> {
        if unit.len() < 56 || !unit.is_char_boundary(56) {
            return None;
        }
        let (policy, name) = unit.split_at(56);
        Some(Self::new(policy, name))
    }

    pub fn unit(&self) -> String {
        format!("{}{}", self.policy_id, self.asset_name)
    }
}

pub type AssetBundle = BTreeMap<AssetId, u64>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub tx_hash: String,
    pub output_index: u32,
    pub address: String,
    pub lovelace: Lovelace,
    #[serde(default, with = "asset_list")]
    pub assets: AssetBundle,
}

impl Utxo {
    pub fn asset_quantity(&self, asset: &AssetId) -> u64 {
        self.assets.get(asset).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressBalance {
    pub address: String,
    pub lovelace: Lovelace,
    #[serde(with = "asset_list")]
    pub assets: AssetBundle,
    pub tx_count: u64,
}

/// A transaction touching an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRef {
    pub tx_hash: String,
    pub block_height: u64,
    /// Unix seconds.
    pub block_time: i64,
}

/// Addresses on both sides of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxParties {
    pub hash: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    pub min_fee_a: u64,
    pub min_fee_b: u64,
    pub coins_per_utxo_byte: u64,
    pub max_tx_size: usize,
}

impl Default for ProtocolParameters {
    /// Mainnet values at the start of the Conway era.
    fn default() -> Self {
        Self {
            min_fee_a: 44,
            min_fee_b: 155_381,
            coins_per_utxo_byte: 4_310,
            max_tx_size: 16_384,
        }
    }
}

#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Short name for logs and the health endpoint.
    fn name(&self) -> &'static str;

    async fn protocol_parameters(&self) -> ProviderResult<ProtocolParameters>;

    async fn latest_slot(&self) -> ProviderResult<u64>;

    /// UTxOs at `address`; an address never seen on chain has none.
    async fn address_utxos(&self, address: &str) -> ProviderResult<Vec<Utxo>>;

    async fn address_balance(&self, address: &str) -> ProviderResult<AddressBalance>;

    /// Most recent transactions first, at most `limit`.
    async fn address_transactions(&self, address: &str, limit: usize) -> ProviderResult<Vec<TxRef>>;

    async fn transaction_parties(&self, tx_hash: &str) -> ProviderResult<TxParties>;

    /// Submits a signed transaction and returns its id.
    async fn submit_transaction(&self, cbor: &[u8]) -> ProviderResult<String>;
}

/// Builds the provider selected by configuration.
pub fn from_config(config: &ProviderConfig) -> ProviderResult<Arc<dyn ChainProvider>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(concat!("slurp-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Transport(format!("Failed to build client: {}", e)))?;

    let provider: Arc<dyn ChainProvider> = match config.kind {
        ProviderKind::Blockfrost => {
            let project_id = config.api_key.clone().ok_or_else(|| {
                ProviderError::Transport("Blockfrost requires a project id".to_string())
            })?;
            Arc::new(BlockfrostProvider::new(client, config.endpoint(), project_id))
        }
        ProviderKind::Koios => Arc::new(KoiosProvider::new(
            client,
            config.endpoint(),
            config.api_key.clone(),
        )),
    };
    Ok(provider)
}

/// Maps a non-success HTTP status to a provider error.
pub(crate) async fn check_status(
    response: reqwest::Response,
    what: &str,
) -> ProviderResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        404 => Err(ProviderError::NotFound(what.to_string())),
        429 => Err(ProviderError::RateLimited),
        code => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::Upstream { status: code, body })
        }
    }
}

/// Parses an integer that indexers deliver as a JSON string.
pub(crate) fn parse_quantity(raw: &str, field: &str) -> ProviderResult<u64> {
    raw.parse::<u64>()
        .map_err(|_| ProviderError::Decode(format!("{} '{}' is not an integer", field, raw)))
}

/// Adds `quantity` of `asset` to `bundle`; totals past `u64::MAX` are a decode error.
pub(crate) fn add_quantity(bundle: &mut AssetBundle, asset: AssetId, quantity: u64) -> ProviderResult<()> {
    let held = bundle.entry(asset).or_insert(0);
    *held = held.checked_add(quantity).ok_or_else(|| {
        ProviderError::Decode("asset quantity total exceeds u64".to_string())
    })?;
    Ok(())
}

/// Serializes an [`AssetBundle`] as a list of `{policy_id, asset_name, quantity}`.
mod asset_list {
    use super::{AssetBundle, AssetId};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        policy_id: String,
        asset_name: String,
        quantity: u64,
    }

    pub fn serialize<S: Serializer>(bundle: &AssetBundle, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry> = bundle
            .iter()
            .map(|(id, quantity)| Entry {
                policy_id: id.policy_id.clone(),
                asset_name: id.asset_name.clone(),
                quantity: *quantity,
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AssetBundle, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| (AssetId::new(e.policy_id, e.asset_name), e.quantity))
            .collect())
    }
}
