/// Transaction types and their CBOR encoding
use crate::error::{GatewayError, Result};
use crate::provider::{AssetBundle, AssetId, Utxo};
use crate::transaction::blake2b_256;
use ciborium::Value;
use std::collections::BTreeMap;

/// Ed25519 public key size.
pub const VKEY_SIZE: usize = 32;
/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Fixed per-output overhead added to the serialized size for min-UTxO purposes.
const UTXO_ENTRY_OVERHEAD: u64 = 160;

const BODY_INPUTS: u64 = 0;
const BODY_OUTPUTS: u64 = 1;
const BODY_FEE: u64 = 2;
const BODY_TTL: u64 = 3;
const WITNESS_VKEYS: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TxInput {
    pub tx_hash: [u8; 32],
    pub index: u32,
}

impl TxInput {
    pub fn from_utxo(utxo: &Utxo) -> Result<Self> {
        let bytes = hex::decode(&utxo.tx_hash)?;
        let tx_hash: [u8; 32] = bytes.try_into().map_err(|_| {
            GatewayError::InvalidTransaction(format!("UTxO hash {} is not 32 bytes", utxo.tx_hash))
        })?;
        Ok(TxInput {
            tx_hash,
            index: utxo.output_index,
        })
    }

    fn to_cbor(&self) -> Value {
        Value::Array(vec![
            Value::Bytes(self.tx_hash.to_vec()),
            Value::Integer(self.index.into()),
        ])
    }
}

/// Lovelace plus native assets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxValue {
    pub lovelace: u64,
    pub assets: AssetBundle,
}

impl TxValue {
    pub fn lovelace(lovelace: u64) -> Self {
        Self {
            lovelace,
            assets: AssetBundle::new(),
        }
    }

    pub fn with_asset(mut self, asset: AssetId, quantity: u64) -> Self {
        if quantity > 0 {
            let held = self.assets.entry(asset).or_insert(0);
            *held = held.saturating_add(quantity);
        }
        self
    }

    /// Adds `other` into `self`, failing if any quantity leaves the u64 range.
    pub fn add(&mut self, other: &TxValue) -> Result<()> {
        self.lovelace = self
            .lovelace
            .checked_add(other.lovelace)
            .ok_or_else(|| GatewayError::InvalidAmount("Lovelace total overflows".to_string()))?;
        for (asset, quantity) in &other.assets {
            let held = self.assets.entry(asset.clone()).or_insert(0);
            *held = held.checked_add(*quantity).ok_or_else(|| {
                GatewayError::InvalidAmount(format!("Quantity of {} overflows", asset.unit()))
            })?;
        }
        Ok(())
    }

    pub fn from_utxo(utxo: &Utxo) -> Self {
        Self {
            lovelace: utxo.lovelace.as_u64(),
            assets: utxo.assets.clone(),
        }
    }

    /// `self - other` for assets only; `None` when any asset would go negative.
    pub fn assets_minus(&self, other: &AssetBundle) -> Option<AssetBundle> {
        let mut remaining = self.assets.clone();
        for (asset, quantity) in other {
            let held = remaining.get_mut(asset)?;
            *held = held.checked_sub(*quantity)?;
            if *held == 0 {
                remaining.remove(asset);
            }
        }
        Some(remaining)
    }

    pub fn covers_assets(&self, required: &AssetBundle) -> bool {
        self.assets_minus(required).is_some()
    }

    fn to_cbor(&self) -> Result<Value> {
        if self.assets.is_empty() {
            return Ok(Value::Integer(self.lovelace.into()));
        }
        let mut policies: BTreeMap<Vec<u8>, Vec<(Value, Value)>> = BTreeMap::new();
        for (asset, quantity) in &self.assets {
            let policy = hex::decode(&asset.policy_id)?;
            let name = hex::decode(&asset.asset_name)?;
            policies
                .entry(policy)
                .or_default()
                .push((Value::Bytes(name), Value::Integer((*quantity).into())));
        }
        let multiasset = policies
            .into_iter()
            .map(|(policy, names)| (Value::Bytes(policy), Value::Map(names)))
            .collect();
        Ok(Value::Array(vec![
            Value::Integer(self.lovelace.into()),
            Value::Map(multiasset),
        ]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Vec<u8>,
    pub value: TxValue,
}

impl TxOutput {
    pub fn new(address: Vec<u8>, value: TxValue) -> Self {
        Self { address, value }
    }

    fn to_cbor(&self) -> Result<Value> {
        Ok(Value::Array(vec![
            Value::Bytes(self.address.clone()),
            self.value.to_cbor()?,
        ]))
    }

    pub fn serialized_size(&self) -> Result<usize> {
        Ok(encode(&self.to_cbor()?)?.len())
    }

    /// Minimum lovelace this output must carry.
    pub fn min_lovelace(&self, coins_per_utxo_byte: u64) -> Result<u64> {
        // size with the lovelace field at its widest so the result is stable
        let mut widest = self.clone();
        widest.value.lovelace = u64::MAX;
        let size = widest.serialized_size()? as u64;
        Ok((UTXO_ENTRY_OVERHEAD + size) * coins_per_utxo_byte)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxBody {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    pub ttl: Option<u64>,
}

impl TxBody {
    pub fn to_cbor_value(&self) -> Result<Value> {
        let mut inputs = self.inputs.clone();
        inputs.sort();
        let inputs = inputs.iter().map(TxInput::to_cbor).collect();
        let outputs = self
            .outputs
            .iter()
            .map(TxOutput::to_cbor)
            .collect::<Result<Vec<_>>>()?;

        let mut fields = vec![
            (Value::Integer(BODY_INPUTS.into()), Value::Array(inputs)),
            (Value::Integer(BODY_OUTPUTS.into()), Value::Array(outputs)),
            (Value::Integer(BODY_FEE.into()), Value::Integer(self.fee.into())),
        ];
        if let Some(ttl) = self.ttl {
            fields.push((Value::Integer(BODY_TTL.into()), Value::Integer(ttl.into())));
        }
        Ok(Value::Map(fields))
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        encode(&self.to_cbor_value()?)
    }

    pub fn hash(&self) -> Result<[u8; 32]> {
        Ok(blake2b_256(&self.to_cbor()?))
    }
}

/// A full transaction: body, witness set, validity flag and no auxiliary data.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    body: Value,
    body_bytes: Vec<u8>,
    witnesses: Vec<(Vec<u8>, Vec<u8>)>,
}

impl SignedTransaction {
    pub fn unsigned(body: &TxBody) -> Result<Self> {
        let body_value = body.to_cbor_value()?;
        let body_bytes = encode(&body_value)?;
        Ok(Self {
            body: body_value,
            body_bytes,
            witnesses: Vec::new(),
        })
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value = decode(bytes)?;
        let mut parts = match value {
            Value::Array(parts) if parts.len() == 3 || parts.len() == 4 => parts,
            _ => {
                return Err(GatewayError::InvalidTransaction(
                    "Expected a 3 or 4 element transaction array".to_string(),
                ))
            }
        };
        let witness_set = parts.swap_remove(1);
        let body = parts.swap_remove(0);
        if !matches!(body, Value::Map(_)) {
            return Err(GatewayError::InvalidTransaction(
                "Transaction body is not a map".to_string(),
            ));
        }
        let body_bytes = encode(&body)?;
        let mut tx = Self {
            body,
            body_bytes,
            witnesses: Vec::new(),
        };
        tx.merge_witness_value(witness_set)?;
        Ok(tx)
    }

    pub fn from_hex(input: &str) -> Result<Self> {
        Self::from_cbor(&hex::decode(input.trim())?)
    }

    pub fn id(&self) -> [u8; 32] {
        blake2b_256(&self.body_bytes)
    }

    pub fn id_hex(&self) -> String {
        hex::encode(self.id())
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body_bytes
    }

    pub fn vkey_witness_count(&self) -> usize {
        self.witnesses.len()
    }

    pub fn vkey_witnesses(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.witnesses
    }

    /// Adds a witness unless one for the same key is already present.
    pub fn add_vkey_witness(&mut self, vkey: Vec<u8>, signature: Vec<u8>) -> Result<()> {
        if vkey.len() != VKEY_SIZE || signature.len() != SIGNATURE_SIZE {
            return Err(GatewayError::InvalidTransaction(format!(
                "Witness must be a {}-byte key and a {}-byte signature",
                VKEY_SIZE, SIGNATURE_SIZE
            )));
        }
        if !self.witnesses.iter().any(|(existing, _)| *existing == vkey) {
            self.witnesses.push((vkey, signature));
        }
        Ok(())
    }

    /// Merges a CIP-30 `signTx` witness set (hex CBOR map) into this transaction.
    pub fn merge_witness_set_hex(&mut self, witness_hex: &str) -> Result<()> {
        let value = decode(&hex::decode(witness_hex.trim())?)?;
        self.merge_witness_value(value)
    }

    fn merge_witness_value(&mut self, value: Value) -> Result<()> {
        let entries = match value {
            Value::Map(entries) => entries,
            _ => {
                return Err(GatewayError::InvalidTransaction(
                    "Witness set is not a map".to_string(),
                ))
            }
        };
        for (key, witnesses) in entries {
            if integer_key(&key) != Some(WITNESS_VKEYS) {
                continue;
            }
            let list = match witnesses {
                Value::Array(list) => list,
                // Conway wraps sets in tag 258
                Value::Tag(258, inner) => match *inner {
                    Value::Array(list) => list,
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            for witness in list {
                match witness {
                    Value::Array(mut pair) if pair.len() == 2 => {
                        let signature = pair.pop().and_then(into_bytes);
                        let vkey = pair.pop().and_then(into_bytes);
                        match (vkey, signature) {
                            (Some(vkey), Some(signature)) => self.add_vkey_witness(vkey, signature)?,
                            _ => {
                                return Err(GatewayError::InvalidTransaction(
                                    "Malformed vkey witness".to_string(),
                                ))
                            }
                        }
                    }
                    _ => {
                        return Err(GatewayError::InvalidTransaction(
                            "Malformed vkey witness".to_string(),
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    fn witness_set_value(&self) -> Value {
        if self.witnesses.is_empty() {
            return Value::Map(Vec::new());
        }
        let list = self
            .witnesses
            .iter()
            .map(|(vkey, sig)| Value::Array(vec![Value::Bytes(vkey.clone()), Value::Bytes(sig.clone())]))
            .collect();
        Value::Map(vec![(Value::Integer(WITNESS_VKEYS.into()), Value::Array(list))])
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        encode(&Value::Array(vec![
            self.body.clone(),
            self.witness_set_value(),
            Value::Bool(true),
            Value::Null,
        ]))
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.to_cbor()?))
    }

    /// Fee field of the body, if present.
    pub fn fee(&self) -> Option<u64> {
        match &self.body {
            Value::Map(fields) => fields
                .iter()
                .find(|(k, _)| integer_key(k) == Some(BODY_FEE))
                .and_then(|(_, v)| v.as_integer())
                .and_then(|i| u64::try_from(i).ok()),
            _ => None,
        }
    }
}

fn integer_key(value: &Value) -> Option<u64> {
    value.as_integer().and_then(|i| u64::try_from(i).ok())
}

fn into_bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Some(bytes),
        _ => None,
    }
}

pub(crate) fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| GatewayError::CborError(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Value> {
    ciborium::de::from_reader(bytes).map_err(|e| GatewayError::CborError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Lovelace;

    fn sample_body() -> TxBody {
        TxBody {
            inputs: vec![TxInput {
                tx_hash: [7; 32],
                index: 1,
            }],
            outputs: vec![TxOutput::new(vec![0x60; 29], TxValue::lovelace(2_000_000))],
            fee: 170_000,
            ttl: Some(1_000),
        }
    }

    #[test]
    fn test_body_encoding_layout() {
        let bytes = sample_body().to_cbor().unwrap();
        // map(4) followed by key 0
        assert_eq!(bytes[0], 0xa4);
        assert_eq!(bytes[1], 0x00);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, sample_body().to_cbor_value().unwrap());
    }

    #[test]
    fn test_multiasset_value_encoding() {
        let asset = AssetId::new("ab".repeat(28), "534c555250");
        let value = TxValue::lovelace(1_500_000).with_asset(asset, 1_000);
        let encoded = value.to_cbor().unwrap();
        let parts = encoded.as_array().unwrap();
        assert_eq!(parts.len(), 2);
        let policies = parts[1].as_map().unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].0, Value::Bytes(vec![0xab; 28]));
    }

    #[test]
    fn test_assets_minus() {
        let asset = AssetId::new("ab".repeat(28), "");
        let held = TxValue::lovelace(0).with_asset(asset.clone(), 10);
        let mut want = AssetBundle::new();
        want.insert(asset.clone(), 4);
        assert_eq!(held.assets_minus(&want).unwrap().get(&asset), Some(&6));
        want.insert(asset, 11);
        assert!(held.assets_minus(&want).is_none());
    }

    #[test]
    fn test_min_lovelace_grows_with_assets() {
        let plain = TxOutput::new(vec![0x00; 57], TxValue::lovelace(0));
        let with_token = TxOutput::new(
            vec![0x00; 57],
            TxValue::lovelace(0).with_asset(AssetId::new("cd".repeat(28), "74"), 5),
        );
        let a = plain.min_lovelace(4_310).unwrap();
        let b = with_token.min_lovelace(4_310).unwrap();
        assert!(a > Lovelace::from_ada(1).unwrap().as_u64() / 2);
        assert!(b > a);
    }

    #[test]
    fn test_transaction_roundtrip_keeps_id() {
        let body = sample_body();
        let mut tx = SignedTransaction::unsigned(&body).unwrap();
        assert_eq!(tx.id(), body.hash().unwrap());
        tx.add_vkey_witness(vec![1; VKEY_SIZE], vec![2; SIGNATURE_SIZE]).unwrap();

        let reparsed = SignedTransaction::from_cbor(&tx.to_cbor().unwrap()).unwrap();
        assert_eq!(reparsed.id(), tx.id());
        assert_eq!(reparsed.vkey_witness_count(), 1);
        assert_eq!(reparsed.fee(), Some(170_000));
    }

    #[test]
    fn test_merge_witness_set_dedups() {
        let mut tx = SignedTransaction::unsigned(&sample_body()).unwrap();
        let witness_set = Value::Map(vec![(
            Value::Integer(0.into()),
            Value::Array(vec![Value::Array(vec![
                Value::Bytes(vec![9; VKEY_SIZE]),
                Value::Bytes(vec![8; SIGNATURE_SIZE]),
            ])]),
        )]);
        let witness_hex = hex::encode(encode(&witness_set).unwrap());
        tx.merge_witness_set_hex(&witness_hex).unwrap();
        tx.merge_witness_set_hex(&witness_hex).unwrap();
        assert_eq!(tx.vkey_witness_count(), 1);
    }

    #[test]
    fn test_rejects_non_transaction() {
        let not_tx = encode(&Value::Integer(5.into())).unwrap();
        assert!(SignedTransaction::from_cbor(&not_tx).is_err());
        assert!(SignedTransaction::from_hex("zz").is_err());
    }
}
