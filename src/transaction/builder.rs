/// Coin selection, fee balancing and change handling
use crate::address::CardanoAddress;
use crate::error::{GatewayError, Result};
use crate::provider::{AssetBundle, ProtocolParameters, Utxo};
use crate::transaction::types::{
    SignedTransaction, TxBody, TxInput, TxOutput, TxValue, SIGNATURE_SIZE, VKEY_SIZE,
};
use crate::units::Lovelace;
use std::collections::HashSet;
use tracing::debug;

/// Upper bound on fee raises; convergence normally takes two or three.
/// Input selection is bounded by the candidate list instead.
const MAX_FEE_ROUNDS: usize = 32;

/// Result of balancing: the body plus what went into it.
#[derive(Debug, Clone)]
pub struct BuiltTransaction {
    pub body: TxBody,
    pub transaction: SignedTransaction,
    pub fee: Lovelace,
    pub selected: Vec<Utxo>,
    pub change: Option<TxOutput>,
}

impl BuiltTransaction {
    pub fn id_hex(&self) -> String {
        self.transaction.id_hex()
    }
}

pub struct TxBuilder {
    params: ProtocolParameters,
    ttl: Option<u64>,
}

impl TxBuilder {
    pub fn new(params: ProtocolParameters) -> Self {
        Self { params, ttl: None }
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn params(&self) -> &ProtocolParameters {
        &self.params
    }

    /// Linear fee for a transaction of `size` bytes.
    pub fn fee_for_size(&self, size: usize) -> u64 {
        self.params.min_fee_a * size as u64 + self.params.min_fee_b
    }

    pub fn min_lovelace(&self, output: &TxOutput) -> Result<u64> {
        output.min_lovelace(self.params.coins_per_utxo_byte)
    }

    /// Raises the output's lovelace to the minimum it must carry.
    pub fn with_min_lovelace(&self, mut output: TxOutput) -> Result<TxOutput> {
        let min = self.min_lovelace(&output)?;
        if output.value.lovelace < min {
            output.value.lovelace = min;
        }
        Ok(output)
    }

    /// Fee of a simple one-input, two-output payment, for previews.
    pub fn estimate_simple_fee(&self, recipient: &CardanoAddress, amount: Lovelace) -> Result<Lovelace> {
        let body = TxBody {
            inputs: vec![TxInput {
                tx_hash: [0; 32],
                index: 0,
            }],
            outputs: vec![
                TxOutput::new(recipient.as_bytes().to_vec(), TxValue::lovelace(amount.as_u64())),
                TxOutput::new(recipient.as_bytes().to_vec(), TxValue::lovelace(u64::MAX)),
            ],
            fee: u64::from(u32::MAX),
            ttl: self.ttl.or(Some(u64::from(u32::MAX))),
        };
        let size = witnessed_size(&body, 1)?;
        Ok(Lovelace(self.fee_for_size(size)))
    }

    /// Selects inputs from `utxos`, balances the fee and returns change to `change_address`.
    pub fn build(
        &self,
        utxos: &[Utxo],
        outputs: Vec<TxOutput>,
        change_address: &CardanoAddress,
    ) -> Result<BuiltTransaction> {
        if outputs.is_empty() {
            return Err(GatewayError::InvalidTransaction("No outputs requested".to_string()));
        }

        let mut required = TxValue::default();
        for output in &outputs {
            let min = self.min_lovelace(output)?;
            if output.value.lovelace < min {
                return Err(GatewayError::InvalidAmount(format!(
                    "Output carries {} but needs at least {}",
                    Lovelace(output.value.lovelace),
                    Lovelace(min)
                )));
            }
            required.add(&output.value)?;
        }

        let candidates = order_candidates(utxos, &required.assets);
        let mut selected: Vec<Utxo> = Vec::new();
        let mut remaining = candidates.into_iter();
        let mut fee = self.params.min_fee_b;
        let mut fee_rounds = 0;

        loop {
            let input_total = total_value(&selected)?;
            let covers = input_total.covers_assets(&required.assets)
                && input_total.lovelace >= required.lovelace.saturating_add(fee);
            if !covers {
                match remaining.next() {
                    Some(utxo) => {
                        selected.push(utxo);
                        continue;
                    }
                    None => return Err(shortfall(&input_total, &required, fee)),
                }
            }

            let change_lovelace = input_total.lovelace - required.lovelace - fee;
            let change_assets = input_total
                .assets_minus(&required.assets)
                .unwrap_or_default();

            let mut body_outputs = outputs.clone();
            let mut change = None;
            let mut body_fee = fee;
            if change_lovelace > 0 || !change_assets.is_empty() {
                let candidate = TxOutput::new(
                    change_address.as_bytes().to_vec(),
                    TxValue {
                        lovelace: change_lovelace,
                        assets: change_assets.clone(),
                    },
                );
                if change_lovelace >= self.min_lovelace(&candidate)? {
                    body_outputs.push(candidate.clone());
                    change = Some(candidate);
                } else if let Some(utxo) = remaining.next() {
                    selected.push(utxo);
                    continue;
                } else if change_assets.is_empty() {
                    // dust change goes to the fee
                    body_fee += change_lovelace;
                } else {
                    return Err(GatewayError::InsufficientFunds(
                        "Not enough ADA to return leftover tokens as change".to_string(),
                    ));
                }
            }

            let body = TxBody {
                inputs: selected
                    .iter()
                    .map(TxInput::from_utxo)
                    .collect::<Result<Vec<_>>>()?,
                outputs: body_outputs,
                fee: body_fee,
                ttl: self.ttl,
            };
            let size = witnessed_size(&body, signer_count(&selected))?;
            let needed = self.fee_for_size(size);
            if needed > fee {
                fee_rounds += 1;
                if fee_rounds > MAX_FEE_ROUNDS {
                    return Err(GatewayError::InvalidTransaction(
                        "Fee did not converge".to_string(),
                    ));
                }
                debug!(fee, needed, size, "raising fee");
                fee = needed;
                continue;
            }
            if size > self.params.max_tx_size {
                return Err(GatewayError::TransactionTooLarge {
                    size,
                    max: self.params.max_tx_size,
                });
            }

            let transaction = SignedTransaction::unsigned(&body)?;
            return Ok(BuiltTransaction {
                fee: Lovelace(body.fee),
                body,
                transaction,
                selected,
                change,
            });
        }
    }
}

/// UTxOs holding requested assets first, then by lovelace, largest first.
fn order_candidates(utxos: &[Utxo], wanted: &AssetBundle) -> Vec<Utxo> {
    let mut candidates: Vec<Utxo> = utxos.to_vec();
    candidates.sort_by(|a, b| {
        let a_has = wanted.keys().any(|asset| a.asset_quantity(asset) > 0);
        let b_has = wanted.keys().any(|asset| b.asset_quantity(asset) > 0);
        b_has
            .cmp(&a_has)
            .then_with(|| b.lovelace.cmp(&a.lovelace))
            .then_with(|| a.tx_hash.cmp(&b.tx_hash))
            .then_with(|| a.output_index.cmp(&b.output_index))
    });
    candidates
}

fn total_value(utxos: &[Utxo]) -> Result<TxValue> {
    let mut total = TxValue::default();
    for utxo in utxos {
        total.add(&TxValue::from_utxo(utxo))?;
    }
    Ok(total)
}

/// Distinct payment keys among the inputs; at least one.
fn signer_count(utxos: &[Utxo]) -> usize {
    let keys: HashSet<[u8; 28]> = utxos
        .iter()
        .filter_map(|u| CardanoAddress::parse(&u.address).ok())
        .filter_map(|a| a.payment_key_hash())
        .collect();
    keys.len().max(1)
}

/// Serialized size once `signers` vkey witnesses are attached.
fn witnessed_size(body: &TxBody, signers: usize) -> Result<usize> {
    let mut tx = SignedTransaction::unsigned(body)?;
    for i in 0..signers {
        let mut vkey = vec![0u8; VKEY_SIZE];
        vkey[..8].copy_from_slice(&(i as u64).to_be_bytes());
        tx.add_vkey_witness(vkey, vec![0u8; SIGNATURE_SIZE])?;
    }
    Ok(tx.to_cbor()?.len())
}

fn shortfall(have: &TxValue, required: &TxValue, fee: u64) -> GatewayError {
    if !have.covers_assets(&required.assets) {
        return GatewayError::InsufficientFunds("Wallet does not hold the requested tokens".to_string());
    }
    GatewayError::InsufficientFunds(format!(
        "Need {} including fee, wallet holds {}",
        Lovelace(required.lovelace.saturating_add(fee)).to_ada_string(),
        Lovelace(have.lovelace).to_ada_string()
    ))
}
