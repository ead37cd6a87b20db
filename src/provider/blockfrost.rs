//! Blockfrost REST client

use super::{
    add_quantity, check_status, parse_quantity, AddressBalance, AssetBundle, AssetId, ChainProvider,
    ProtocolParameters, ProviderError, ProviderResult, TxParties, TxRef, Utxo,
};
use crate::units::Lovelace;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Blockfrost caps page size at 100.
const MAX_PAGE_SIZE: usize = 100;

pub struct BlockfrostProvider {
    client: Client,
    base_url: String,
    project_id: String,
}

#[derive(Deserialize)]
struct Amount {
    unit: String,
    quantity: String,
}

#[derive(Deserialize)]
struct AddressResponse {
    amount: Vec<Amount>,
}

#[derive(Deserialize)]
struct AddressTotalResponse {
    tx_count: u64,
}

#[derive(Deserialize)]
struct UtxoResponse {
    tx_hash: String,
    output_index: u32,
    address: String,
    amount: Vec<Amount>,
}

#[derive(Deserialize)]
struct AddressTxResponse {
    tx_hash: String,
    block_height: u64,
    block_time: i64,
}

#[derive(Deserialize)]
struct TxUtxoEntry {
    address: String,
    #[serde(default)]
    collateral: bool,
    #[serde(default)]
    reference: bool,
}

#[derive(Deserialize)]
struct TxUtxosResponse {
    hash: String,
    inputs: Vec<TxUtxoEntry>,
    outputs: Vec<TxUtxoEntry>,
}

#[derive(Deserialize)]
struct LatestBlockResponse {
    slot: Option<u64>,
}

#[derive(Deserialize)]
struct ParametersResponse {
    min_fee_a: u64,
    min_fee_b: u64,
    max_tx_size: usize,
    coins_per_utxo_size: Option<String>,
}

fn split_amounts(amounts: &[Amount]) -> ProviderResult<(Lovelace, AssetBundle)> {
    let mut lovelace = Lovelace::ZERO;
    let mut assets = AssetBundle::new();
    for amount in amounts {
        let quantity = parse_quantity(&amount.quantity, "quantity")?;
        if amount.unit == "lovelace" {
            lovelace = Lovelace(quantity);
        } else if let Some(asset) = AssetId::from_unit(&amount.unit) {
            add_quantity(&mut assets, asset, quantity)?;
        }
    }
    Ok((lovelace, assets))
}

impl BlockfrostProvider {
    pub fn new(client: Client, base_url: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            project_id: project_id.into(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(provider = "blockfrost", %url, "GET");
        let response = self
            .client
            .get(&url)
            .header("project_id", &self.project_id)
            .send()
            .await?;
        let response = check_status(response, what).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl ChainProvider for BlockfrostProvider {
    fn name(&self) -> &'static str {
        "blockfrost"
    }

    async fn protocol_parameters(&self) -> ProviderResult<ProtocolParameters> {
        let params: ParametersResponse = self
            .get("/epochs/latest/parameters", "protocol parameters")
            .await?;
        let coins_per_utxo_byte = match params.coins_per_utxo_size {
            Some(raw) => parse_quantity(&raw, "coins_per_utxo_size")?,
            None => ProtocolParameters::default().coins_per_utxo_byte,
        };
        Ok(ProtocolParameters {
            min_fee_a: params.min_fee_a,
            min_fee_b: params.min_fee_b,
            coins_per_utxo_byte,
            max_tx_size: params.max_tx_size,
        })
    }

    async fn latest_slot(&self) -> ProviderResult<u64> {
        let block: LatestBlockResponse = self.get("/blocks/latest", "latest block").await?;
        block
            .slot
            .ok_or_else(|| ProviderError::Decode("latest block has no slot".to_string()))
    }

    async fn address_utxos(&self, address: &str) -> ProviderResult<Vec<Utxo>> {
        let mut utxos = Vec::new();
        let mut page = 1;
        loop {
            let path = format!(
                "/addresses/{}/utxos?count={}&page={}",
                address, MAX_PAGE_SIZE, page
            );
            let batch: Vec<UtxoResponse> = match self.get(&path, address).await {
                Ok(batch) => batch,
                Err(ProviderError::NotFound(_)) => Vec::new(),
                Err(e) => return Err(e),
            };
            let done = batch.len() < MAX_PAGE_SIZE;
            for entry in batch {
                let (lovelace, assets) = split_amounts(&entry.amount)?;
                utxos.push(Utxo {
                    tx_hash: entry.tx_hash,
                    output_index: entry.output_index,
                    address: entry.address,
                    lovelace,
                    assets,
                });
            }
            if done {
                break;
            }
            page += 1;
        }
        Ok(utxos)
    }

    async fn address_balance(&self, address: &str) -> ProviderResult<AddressBalance> {
        let info_path = format!("/addresses/{}", address);
        let total_path = format!("/addresses/{}/total", address);
        let (info, total) = tokio::try_join!(
            self.get::<AddressResponse>(&info_path, address),
            self.get::<AddressTotalResponse>(&total_path, address),
        )?;
        let (lovelace, assets) = split_amounts(&info.amount)?;
        Ok(AddressBalance {
            address: address.to_string(),
            lovelace,
            assets,
            tx_count: total.tx_count,
        })
    }

    async fn address_transactions(&self, address: &str, limit: usize) -> ProviderResult<Vec<TxRef>> {
        let count = limit.clamp(1, MAX_PAGE_SIZE);
        let path = format!("/addresses/{}/transactions?count={}&order=desc", address, count);
        let txs: Vec<AddressTxResponse> = match self.get(&path, address).await {
            Ok(txs) => txs,
            Err(ProviderError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        Ok(txs
            .into_iter()
            .take(limit)
            .map(|tx| TxRef {
                tx_hash: tx.tx_hash,
                block_height: tx.block_height,
                block_time: tx.block_time,
            })
            .collect())
    }

    async fn transaction_parties(&self, tx_hash: &str) -> ProviderResult<TxParties> {
        let path = format!("/txs/{}/utxos", tx_hash);
        let utxos: TxUtxosResponse = self.get(&path, tx_hash).await?;
        let keep = |e: &TxUtxoEntry| !e.collateral && !e.reference;
        Ok(TxParties {
            hash: utxos.hash,
            inputs: utxos.inputs.iter().filter(|e| keep(*e)).map(|e| e.address.clone()).collect(),
            outputs: utxos.outputs.iter().filter(|e| keep(*e)).map(|e| e.address.clone()).collect(),
        })
    }

    async fn submit_transaction(&self, cbor: &[u8]) -> ProviderResult<String> {
        let url = format!("{}/tx/submit", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("project_id", &self.project_id)
            .header(CONTENT_TYPE, "application/cbor")
            .body(cbor.to_vec())
            .send()
            .await?;
        if response.status().as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(body));
        }
        let response = check_status(response, "transaction submission").await?;
        Ok(response.json::<String>().await?)
    }
}
