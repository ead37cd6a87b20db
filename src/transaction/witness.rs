/// Ed25519 payment keys and vkey witnesses
use crate::address::{CardanoAddress, Network};
use crate::error::{GatewayError, Result};
use crate::transaction::blake2b_224;
use crate::transaction::types::SignedTransaction;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// A payment key held by the gateway (the faucet wallet).
pub struct PaymentSigner {
    signing_key: SigningKey,
}

impl PaymentSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Parses a 32-byte hex seed, optionally in the `5820`-prefixed CBOR form cardano-cli writes.
    pub fn from_hex(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let trimmed = match trimmed.strip_prefix("5820") {
            Some(rest) if rest.len() == 64 => rest,
            _ => trimmed,
        };
        let bytes = hex::decode(trimmed)
            .map_err(|e| GatewayError::CryptoError(format!("Invalid signing key hex: {}", e)))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            GatewayError::CryptoError(format!("Signing key must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    pub fn verification_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn key_hash(&self) -> [u8; 28] {
        blake2b_224(&self.verification_key())
    }

    /// Enterprise address controlled by this key.
    pub fn address(&self, network: Network) -> Result<CardanoAddress> {
        CardanoAddress::enterprise(&self.key_hash(), network)
    }

    /// Signs the transaction id and attaches the witness.
    pub fn sign(&self, tx: &mut SignedTransaction) -> Result<()> {
        let signature = self.signing_key.sign(&tx.id());
        tx.add_vkey_witness(
            self.verification_key().to_vec(),
            signature.to_bytes().to_vec(),
        )
    }
}

/// Checks every vkey witness signs the transaction id.
pub fn verify_vkey_witnesses(tx: &SignedTransaction) -> Result<()> {
    let id = tx.id();
    for (vkey, signature) in tx.vkey_witnesses() {
        let vkey: [u8; 32] = vkey
            .as_slice()
            .try_into()
            .map_err(|_| GatewayError::InvalidTransaction("Witness key must be 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&vkey)
            .map_err(|e| GatewayError::InvalidTransaction(format!("Invalid witness key: {}", e)))?;
        let signature = Signature::from_slice(signature)
            .map_err(|e| GatewayError::InvalidTransaction(format!("Invalid signature: {}", e)))?;
        key.verify(&id, &signature).map_err(|_| {
            GatewayError::InvalidTransaction(format!(
                "Witness from key {} does not sign transaction {}",
                hex::encode(blake2b_224(&vkey)),
                hex::encode(id)
            ))
        })?;
    }
    Ok(())
}
