//! Token faucet
//!
//! Each claimant address may receive `token_amount` of the configured asset
//! once per cooldown window. Claims are built, signed with the faucet key and
//! submitted server side.

use crate::address::{CardanoAddress, Network};
use crate::cache::ClaimLedger;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::provider::{AssetId, ChainProvider};
use crate::transaction::{PaymentSigner, SignedTransaction, TxBuilder, TxOutput, TxValue};
use crate::units::Lovelace;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize)]
pub struct FaucetClaim {
    pub tx_hash: String,
    pub recipient: String,
    pub token_amount: u64,
    pub lovelace: Lovelace,
    pub fee: Lovelace,
    pub next_claim_in_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaucetStatus {
    pub enabled: bool,
    pub address: Option<String>,
    pub asset: Option<String>,
    pub token_amount: u64,
    pub cooldown_secs: u64,
}

struct FaucetWallet {
    signer: PaymentSigner,
    address: CardanoAddress,
}

pub struct Faucet {
    provider: Arc<dyn ChainProvider>,
    network: Network,
    wallet: Option<FaucetWallet>,
    asset: AssetId,
    token_amount: u64,
    cooldown: Duration,
    claims: ClaimLedger,
    ttl_slots: u64,
    /// Serializes claims so two of them never select the same faucet UTxOs.
    submit_lock: Mutex<()>,
}

impl Faucet {
    pub fn from_config(config: &Config, provider: Arc<dyn ChainProvider>) -> Result<Self> {
        let network = config.provider.network;
        let wallet = match config.faucet.signing_key.as_deref() {
            Some(key) => {
                let signer = PaymentSigner::from_hex(key)?;
                let address = signer.address(network)?;
                Some(FaucetWallet { signer, address })
            }
            None => None,
        };
        Ok(Self {
            provider,
            network,
            wallet,
            asset: AssetId::new(&config.faucet.policy_id, &config.faucet.asset_name),
            token_amount: config.faucet.token_amount,
            cooldown: Duration::seconds(config.faucet.cooldown_secs as i64),
            claims: ClaimLedger::new(config.faucet.ledger_capacity),
            ttl_slots: config.deposit.ttl_slots,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.wallet.is_some()
    }

    pub fn status(&self) -> FaucetStatus {
        FaucetStatus {
            enabled: self.is_enabled(),
            address: self.wallet.as_ref().map(|w| w.address.to_string()),
            asset: self.wallet.as_ref().map(|_| self.asset.unit()),
            token_amount: self.token_amount,
            cooldown_secs: self.cooldown.num_seconds().max(0) as u64,
        }
    }

    /// Sends tokens to `address` unless it claimed within the cooldown.
    pub async fn claim(&self, address: &str) -> Result<FaucetClaim> {
        let wallet = self.wallet.as_ref().ok_or(GatewayError::FaucetDisabled)?;
        let recipient = CardanoAddress::parse(address)?;
        recipient.ensure_network(self.network)?;
        if !recipient.can_receive_funds() {
            return Err(GatewayError::InvalidAddress(
                "Stake addresses cannot receive tokens".to_string(),
            ));
        }
        let key = recipient.as_bech32().to_string();

        let _guard = self.submit_lock.lock().await;
        if let Some(remaining_secs) = self
            .claims
            .remaining_cooldown(&key, self.cooldown, Utc::now())
            .await
        {
            return Err(GatewayError::CooldownActive { remaining_secs });
        }

        let (params, slot, utxos) = tokio::try_join!(
            self.provider.protocol_parameters(),
            self.provider.latest_slot(),
            self.provider.address_utxos(wallet.address.as_bech32()),
        )?;

        let builder = TxBuilder::new(params).with_ttl(slot + self.ttl_slots);
        let output = builder.with_min_lovelace(TxOutput::new(
            recipient.as_bytes().to_vec(),
            TxValue::lovelace(0).with_asset(self.asset.clone(), self.token_amount),
        ))?;
        let lovelace = Lovelace(output.value.lovelace);

        let built = builder
            .build(&utxos, vec![output], &wallet.address)
            .map_err(|e| match e {
                GatewayError::InsufficientFunds(msg) => {
                    error!(faucet = %wallet.address, %msg, "faucet.depleted");
                    GatewayError::InsufficientFunds("Faucet is out of funds".to_string())
                }
                other => other,
            })?;

        let mut tx: SignedTransaction = built.transaction;
        wallet.signer.sign(&mut tx)?;
        let tx_hash = self.provider.submit_transaction(&tx.to_cbor()?).await?;

        self.claims.record_claim(key.clone(), Utc::now()).await;
        info!(
            recipient = %key,
            %tx_hash,
            tokens = self.token_amount,
            lovelace = lovelace.as_u64(),
            fee = built.fee.as_u64(),
            "faucet.claimed"
        );

        Ok(FaucetClaim {
            tx_hash,
            recipient: key,
            token_amount: self.token_amount,
            lovelace,
            fee: built.fee,
            next_claim_in_secs: self.cooldown.num_seconds().max(0) as u64,
        })
    }
}
