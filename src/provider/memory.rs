//! In-memory chain provider backed by fixtures

use super::{
    add_quantity, AddressBalance, AssetBundle, ChainProvider, ProtocolParameters, ProviderError,
    ProviderResult, TxParties, TxRef, Utxo,
};
use crate::transaction::SignedTransaction;
use crate::units::Lovelace;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct Ledger {
    utxos: HashMap<String, Vec<Utxo>>,
    history: HashMap<String, Vec<TxRef>>,
    parties: HashMap<String, TxParties>,
    submitted: Vec<Vec<u8>>,
}

/// Serves UTxOs, histories and transaction parties registered up front.
pub struct InMemoryProvider {
    ledger: RwLock<Ledger>,
    params: ProtocolParameters,
    slot: u64,
    params_unavailable: AtomicBool,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::with_parameters(ProtocolParameters::default(), 100_000_000)
    }

    pub fn with_parameters(params: ProtocolParameters, slot: u64) -> Self {
        Self {
            ledger: RwLock::new(Ledger::default()),
            params,
            slot,
            params_unavailable: AtomicBool::new(false),
        }
    }

    pub fn add_utxo(&self, utxo: Utxo) {
        self.ledger
            .write()
            .utxos
            .entry(utxo.address.clone())
            .or_default()
            .push(utxo);
    }

    /// Registers a transaction and indexes it under every address it touches.
    pub fn add_transaction(&self, parties: TxParties, block_height: u64, block_time: i64) {
        let mut ledger = self.ledger.write();
        let tx_ref = TxRef {
            tx_hash: parties.hash.clone(),
            block_height,
            block_time,
        };
        let mut touched: Vec<&String> = parties.inputs.iter().chain(parties.outputs.iter()).collect();
        touched.sort();
        touched.dedup();
        for address in touched {
            ledger
                .history
                .entry(address.clone())
                .or_default()
                .push(tx_ref.clone());
        }
        ledger.parties.insert(parties.hash.clone(), parties);
    }

    /// Makes `protocol_parameters` fail, as an unreachable indexer would.
    pub fn set_parameters_unavailable(&self, unavailable: bool) {
        self.params_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<Vec<u8>> {
        self.ledger.read().submitted.clone()
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn protocol_parameters(&self) -> ProviderResult<ProtocolParameters> {
        if self.params_unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("parameters unavailable".to_string()));
        }
        Ok(self.params)
    }

    async fn latest_slot(&self) -> ProviderResult<u64> {
        Ok(self.slot)
    }

    async fn address_utxos(&self, address: &str) -> ProviderResult<Vec<Utxo>> {
        Ok(self.ledger.read().utxos.get(address).cloned().unwrap_or_default())
    }

    async fn address_balance(&self, address: &str) -> ProviderResult<AddressBalance> {
        let ledger = self.ledger.read();
        let utxos = ledger.utxos.get(address);
        let tx_count = ledger.history.get(address).map(|h| h.len()).unwrap_or(0);
        if utxos.is_none() && tx_count == 0 {
            return Err(ProviderError::NotFound(address.to_string()));
        }

        let mut assets = AssetBundle::new();
        let mut lovelace = Lovelace::ZERO;
        for utxo in utxos.into_iter().flatten() {
            lovelace = Lovelace(lovelace.0.checked_add(utxo.lovelace.0).ok_or_else(|| {
                ProviderError::Decode("lovelace total exceeds u64".to_string())
            })?);
            for (id, quantity) in &utxo.assets {
                add_quantity(&mut assets, id.clone(), *quantity)?;
            }
        }
        Ok(AddressBalance {
            address: address.to_string(),
            lovelace,
            assets,
            tx_count: tx_count as u64,
        })
    }

    async fn address_transactions(&self, address: &str, limit: usize) -> ProviderResult<Vec<TxRef>> {
        let ledger = self.ledger.read();
        let mut txs = ledger.history.get(address).cloned().unwrap_or_default();
        txs.sort_by(|a, b| b.block_height.cmp(&a.block_height));
        txs.truncate(limit);
        Ok(txs)
    }

    async fn transaction_parties(&self, tx_hash: &str) -> ProviderResult<TxParties> {
        self.ledger
            .read()
            .parties
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(tx_hash.to_string()))
    }

    async fn submit_transaction(&self, cbor: &[u8]) -> ProviderResult<String> {
        let tx = SignedTransaction::from_cbor(cbor)
            .map_err(|e| ProviderError::Rejected(e.to_string()))?;
        if tx.vkey_witness_count() == 0 {
            return Err(ProviderError::Rejected("transaction carries no witnesses".to_string()));
        }
        let id = tx.id_hex();
        self.ledger.write().submitted.push(cbor.to_vec());
        Ok(id)
    }
}
