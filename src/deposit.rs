//! ADA deposit flow
//!
//! The gateway builds an unsigned transaction paying the treasury from the
//! user's UTxOs, the browser wallet signs it (CIP-30 `signTx`) and hands the
//! witness set back, and the gateway assembles and submits the result.

use crate::address::{CardanoAddress, Network};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::provider::{ChainProvider, ProtocolParameters};
use crate::transaction::{verify_vkey_witnesses, SignedTransaction, TxBuilder, TxOutput, TxValue};
use crate::units::Lovelace;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeSource {
    Network,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositPreview {
    pub amount: Lovelace,
    pub amount_ada: String,
    pub estimated_fee: Lovelace,
    pub total: Lovelace,
    pub total_ada: String,
    pub fee_source: FeeSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnsignedDeposit {
    pub tx_cbor: String,
    pub tx_hash: String,
    pub fee: Lovelace,
    pub amount: Lovelace,
    pub treasury: String,
    pub inputs: usize,
    pub change: Lovelace,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedTransaction {
    pub tx_hash: String,
    pub witnesses: usize,
}

pub struct DepositService {
    provider: Arc<dyn ChainProvider>,
    network: Network,
    treasury: Option<CardanoAddress>,
    min_deposit: Lovelace,
    max_deposit: Lovelace,
    ttl_slots: u64,
    fallback_params: ProtocolParameters,
}

impl DepositService {
    pub fn from_config(config: &Config, provider: Arc<dyn ChainProvider>) -> Result<Self> {
        let treasury = config
            .deposit
            .treasury_address
            .as_deref()
            .map(CardanoAddress::parse)
            .transpose()?;
        Ok(Self {
            provider,
            network: config.provider.network,
            treasury,
            min_deposit: config.deposit.min_deposit,
            max_deposit: config.deposit.max_deposit,
            ttl_slots: config.deposit.ttl_slots,
            fallback_params: ProtocolParameters {
                min_fee_a: config.deposit.fallback_min_fee_a,
                min_fee_b: config.deposit.fallback_min_fee_b,
                ..ProtocolParameters::default()
            },
        })
    }

    pub fn treasury(&self) -> Option<&CardanoAddress> {
        self.treasury.as_ref()
    }

    fn require_treasury(&self) -> Result<&CardanoAddress> {
        self.treasury
            .as_ref()
            .ok_or_else(|| GatewayError::ConfigError("Deposits are not configured".to_string()))
    }

    fn check_amount(&self, amount: Lovelace) -> Result<()> {
        if amount < self.min_deposit || amount > self.max_deposit {
            return Err(GatewayError::InvalidAmount(format!(
                "Deposit must be between {} and {} ADA",
                self.min_deposit.to_ada_string(),
                self.max_deposit.to_ada_string()
            )));
        }
        Ok(())
    }

    async fn parameters_or_fallback(&self) -> (ProtocolParameters, FeeSource) {
        match self.provider.protocol_parameters().await {
            Ok(params) => (params, FeeSource::Network),
            Err(e) => {
                warn!(error = %e, "Protocol parameters unavailable, using fallback fee parameters");
                (self.fallback_params, FeeSource::Fallback)
            }
        }
    }

    /// Estimated fee and total for depositing `amount`.
    pub async fn preview(&self, amount: Lovelace) -> Result<DepositPreview> {
        self.check_amount(amount)?;
        let treasury = self.require_treasury()?;
        let (params, fee_source) = self.parameters_or_fallback().await;
        let estimated_fee = TxBuilder::new(params).estimate_simple_fee(treasury, amount)?;
        let total = amount
            .checked_add(estimated_fee)
            .ok_or_else(|| GatewayError::InvalidAmount("Deposit overflows".to_string()))?;
        Ok(DepositPreview {
            amount,
            amount_ada: amount.to_ada_string(),
            estimated_fee,
            total,
            total_ada: total.to_ada_string(),
            fee_source,
        })
    }

    /// Builds the unsigned transaction for `sender` to deposit `amount`.
    pub async fn build(&self, sender: &str, amount: Lovelace) -> Result<UnsignedDeposit> {
        self.check_amount(amount)?;
        let treasury = self.require_treasury()?.clone();
        let sender = CardanoAddress::parse(sender)?;
        sender.ensure_network(self.network)?;
        if !sender.can_receive_funds() {
            return Err(GatewayError::InvalidAddress(
                "Deposits must come from a payment address".to_string(),
            ));
        }

        let (params, slot, utxos) = tokio::try_join!(
            self.provider.protocol_parameters(),
            self.provider.latest_slot(),
            self.provider.address_utxos(sender.as_bech32()),
        )?;
        if utxos.is_empty() {
            return Err(GatewayError::InsufficientFunds(format!(
                "{} has no spendable outputs",
                sender
            )));
        }

        let builder = TxBuilder::new(params).with_ttl(slot + self.ttl_slots);
        let output = TxOutput::new(treasury.as_bytes().to_vec(), TxValue::lovelace(amount.as_u64()));
        let built = builder.build(&utxos, vec![output], &sender)?;

        let deposit = UnsignedDeposit {
            tx_cbor: built.transaction.to_hex()?,
            tx_hash: built.id_hex(),
            fee: built.fee,
            amount,
            treasury: treasury.to_string(),
            inputs: built.selected.len(),
            change: Lovelace(built.change.as_ref().map(|c| c.value.lovelace).unwrap_or(0)),
        };
        info!(
            sender = %sender,
            amount = amount.as_u64(),
            fee = deposit.fee.as_u64(),
            tx_hash = %deposit.tx_hash,
            "deposit.built"
        );
        Ok(deposit)
    }

    /// Merges the wallet witness set (if given), checks signatures and submits.
    pub async fn submit(&self, tx_cbor: &str, witness_set: Option<&str>) -> Result<SubmittedTransaction> {
        let mut tx = SignedTransaction::from_hex(tx_cbor)?;
        if let Some(witness_set) = witness_set.filter(|w| !w.trim().is_empty()) {
            tx.merge_witness_set_hex(witness_set)?;
        }
        if tx.vkey_witness_count() == 0 {
            return Err(GatewayError::InvalidTransaction(
                "Transaction is not signed".to_string(),
            ));
        }
        verify_vkey_witnesses(&tx).map_err(|e| GatewayError::InvalidTransaction(e.to_string()))?;

        let local_id = tx.id_hex();
        let tx_hash = self.provider.submit_transaction(&tx.to_cbor()?).await?;
        if tx_hash != local_id {
            warn!(%local_id, %tx_hash, "Provider reported a different transaction id");
        }
        info!(%tx_hash, witnesses = tx.vkey_witness_count(), "deposit.submitted");
        Ok(SubmittedTransaction {
            tx_hash,
            witnesses: tx.vkey_witness_count(),
        })
    }
}
