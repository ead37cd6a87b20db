//! Koios REST client
//!
//! Koios takes address and transaction lists as POST bodies and returns
//! quantities as strings. A bearer token is optional on the free tier.

use super::{
    add_quantity, check_status, parse_quantity, AddressBalance, AssetBundle, AssetId, ChainProvider,
    ProtocolParameters, ProviderError, ProviderResult, TxParties, TxRef, Utxo,
};
use crate::units::Lovelace;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

pub struct KoiosProvider {
    client: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct TipResponse {
    abs_slot: u64,
}

#[derive(Deserialize)]
struct EpochParamsResponse {
    min_fee_a: u64,
    min_fee_b: u64,
    max_tx_size: usize,
    coins_per_utxo_size: Option<String>,
}

#[derive(Deserialize)]
struct KoiosAsset {
    policy_id: String,
    #[serde(default)]
    asset_name: Option<String>,
    quantity: String,
}

#[derive(Deserialize)]
struct KoiosUtxo {
    tx_hash: String,
    tx_index: u32,
    #[serde(default)]
    address: Option<String>,
    value: String,
    #[serde(default)]
    asset_list: Vec<KoiosAsset>,
}

#[derive(Deserialize)]
struct AddressInfoResponse {
    balance: String,
    #[serde(default)]
    utxo_set: Vec<KoiosUtxo>,
}

#[derive(Deserialize)]
struct AddressTxResponse {
    tx_hash: String,
    block_height: Option<u64>,
    block_time: i64,
}

#[derive(Deserialize)]
struct PaymentAddr {
    bech32: String,
}

#[derive(Deserialize)]
struct TxIo {
    payment_addr: PaymentAddr,
}

#[derive(Deserialize)]
struct TxUtxosResponse {
    tx_hash: String,
    inputs: Vec<TxIo>,
    outputs: Vec<TxIo>,
}

fn collect_assets(list: &[KoiosAsset]) -> ProviderResult<AssetBundle> {
    let mut assets = AssetBundle::new();
    for asset in list {
        let quantity = parse_quantity(&asset.quantity, "asset quantity")?;
        let id = AssetId::new(
            asset.policy_id.clone(),
            asset.asset_name.clone().unwrap_or_default(),
        );
        add_quantity(&mut assets, id, quantity)?;
    }
    Ok(assets)
}

/// Total row count from a PostgREST `Content-Range` header (`0-0/1234`).
fn content_range_total(header: &str) -> Option<u64> {
    let (_, total) = header.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn to_utxo(raw: KoiosUtxo, fallback_address: &str) -> ProviderResult<Utxo> {
    Ok(Utxo {
        lovelace: Lovelace(parse_quantity(&raw.value, "value")?),
        assets: collect_assets(&raw.asset_list)?,
        tx_hash: raw.tx_hash,
        output_index: raw.tx_index,
        address: raw.address.unwrap_or_else(|| fallback_address.to_string()),
    })
}

impl KoiosProvider {
    pub fn new(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, what: &str) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(provider = "koios", %url, "GET");
        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = check_status(response, what).await?;
        Ok(response.json::<T>().await?)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(provider = "koios", %url, "POST");
        let response = self.authorize(self.client.post(&url)).json(body).send().await?;
        let response = check_status(response, what).await?;
        Ok(response.json::<T>().await?)
    }

    /// Counts an address's transactions without paging through them.
    ///
    /// Koios pages responses at 1000 rows, so the count comes from the
    /// `Content-Range` total requested with `Prefer: count=exact`.
    async fn address_tx_count(&self, address: &str) -> ProviderResult<u64> {
        let url = format!("{}/address_txs?select=tx_hash&limit=1", self.base_url);
        debug!(provider = "koios", %url, "POST count");
        let response = self
            .authorize(self.client.post(&url))
            .header("Prefer", "count=exact")
            .json(&json!({ "_addresses": [address] }))
            .send()
            .await?;
        let response = check_status(response, address).await?;
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(content_range_total)
            .ok_or_else(|| ProviderError::Decode("missing Content-Range total".to_string()))
    }
}

#[async_trait]
impl ChainProvider for KoiosProvider {
    fn name(&self) -> &'static str {
        "koios"
    }

    async fn protocol_parameters(&self) -> ProviderResult<ProtocolParameters> {
        let mut params: Vec<EpochParamsResponse> = self
            .get("/epoch_params?order=epoch_no.desc&limit=1", "protocol parameters")
            .await?;
        let params = params
            .pop()
            .ok_or_else(|| ProviderError::NotFound("protocol parameters".to_string()))?;
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
        let mut tip: Vec<TipResponse> = self.get("/tip", "chain tip").await?;
        tip.pop()
            .map(|t| t.abs_slot)
            .ok_or_else(|| ProviderError::Decode("empty tip response".to_string()))
    }

    async fn address_utxos(&self, address: &str) -> ProviderResult<Vec<Utxo>> {
        let body = json!({ "_addresses": [address], "_extended": true });
        let raw: Vec<KoiosUtxo> = self.post("/address_utxos", &body, address).await?;
        raw.into_iter().map(|u| to_utxo(u, address)).collect()
    }

    async fn address_balance(&self, address: &str) -> ProviderResult<AddressBalance> {
        let info_body = json!({ "_addresses": [address] });
        let (mut info, tx_count) = tokio::try_join!(
            self.post::<_, Vec<AddressInfoResponse>>("/address_info", &info_body, address),
            self.address_tx_count(address),
        )?;
        let info = info
            .pop()
            .ok_or_else(|| ProviderError::NotFound(address.to_string()))?;

        let mut assets = AssetBundle::new();
        for utxo in &info.utxo_set {
            for (id, quantity) in collect_assets(&utxo.asset_list)? {
                add_quantity(&mut assets, id, quantity)?;
            }
        }
        Ok(AddressBalance {
            address: address.to_string(),
            lovelace: Lovelace(parse_quantity(&info.balance, "balance")?),
            assets,
            tx_count,
        })
    }

    async fn address_transactions(&self, address: &str, limit: usize) -> ProviderResult<Vec<TxRef>> {
        let path = format!("/address_txs?order=block_height.desc&limit={}", limit.max(1));
        let body = json!({ "_addresses": [address] });
        let txs: Vec<AddressTxResponse> = self.post(&path, &body, address).await?;
        Ok(txs
            .into_iter()
            .take(limit)
            .map(|tx| TxRef {
                tx_hash: tx.tx_hash,
                block_height: tx.block_height.unwrap_or(0),
                block_time: tx.block_time,
            })
            .collect())
    }

    async fn transaction_parties(&self, tx_hash: &str) -> ProviderResult<TxParties> {
        let body = json!({ "_tx_hashes": [tx_hash] });
        let mut txs: Vec<TxUtxosResponse> = self.post("/tx_utxos", &body, tx_hash).await?;
        let tx = txs
            .pop()
            .ok_or_else(|| ProviderError::NotFound(tx_hash.to_string()))?;
        Ok(TxParties {
            hash: tx.tx_hash,
            inputs: tx.inputs.into_iter().map(|io| io.payment_addr.bech32).collect(),
            outputs: tx.outputs.into_iter().map(|io| io.payment_addr.bech32).collect(),
        })
    }

    async fn submit_transaction(&self, cbor: &[u8]) -> ProviderResult<String> {
        let url = format!("{}/submittx", self.base_url);
        let response = self
            .authorize(self.client.post(&url))
            .header(CONTENT_TYPE, "application/cbor")
            .body(cbor.to_vec())
            .send()
            .await?;
        if response.status().as_u16() == 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(body));
        }
        let response = check_status(response, "transaction submission").await?;
        let text = response.text().await?;
        Ok(text.trim().trim_matches('"').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_koios_utxo_decoding() {
        let raw: KoiosUtxo = serde_json::from_value(json!({
            "tx_hash": "aa".repeat(32),
            "tx_index": 3,
            "value": "2000000",
            "asset_list": [
                { "policy_id": "bb".repeat(28), "asset_name": "534c555250", "quantity": "5" }
            ]
        }))
        .unwrap();
        let utxo = to_utxo(raw, "addr_test1fallback").unwrap();
        assert_eq!(utxo.address, "addr_test1fallback");
        assert_eq!(utxo.lovelace, Lovelace(2_000_000));
        assert_eq!(utxo.output_index, 3);
        assert_eq!(utxo.asset_quantity(&AssetId::new("bb".repeat(28), "534c555250")), 5);
    }

    #[test]
    fn test_content_range_total() {
        assert_eq!(content_range_total("0-0/4821"), Some(4821));
        assert_eq!(content_range_total("*/0"), Some(0));
        assert_eq!(content_range_total("0-0/*"), None);
        assert_eq!(content_range_total("garbage"), None);
    }

    #[test]
    fn test_asset_totals_overflow_is_decode_error() {
        let huge = (i64::MAX as u64).to_string();
        let list: Vec<KoiosAsset> = serde_json::from_value(json!([
            { "policy_id": "bb".repeat(28), "asset_name": "534c555250", "quantity": huge },
            { "policy_id": "bb".repeat(28), "asset_name": "534c555250", "quantity": huge },
            { "policy_id": "bb".repeat(28), "asset_name": "534c555250", "quantity": huge }
        ]))
        .unwrap();
        assert!(matches!(collect_assets(&list), Err(ProviderError::Decode(_))));
    }
}
