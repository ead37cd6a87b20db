//! Transaction module split into types, building and witnessing
//!
//! Covers exactly what the deposit and faucet flows need: plain payment
//! transactions with optional native assets, balanced with a change
//! output and witnessed by ed25519 payment keys.

pub mod builder;
pub mod types;
pub mod witness;

pub use builder::{BuiltTransaction, TxBuilder};
pub use types::*;
pub use witness::{verify_vkey_witnesses, PaymentSigner};

/// blake2b-256, the transaction id hash.
pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let hash = blake2b_simd::Params::new().hash_length(32).hash(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

/// blake2b-224, the key hash used in payment credentials.
pub fn blake2b_224(data: &[u8]) -> [u8; 28] {
    let hash = blake2b_simd::Params::new().hash_length(28).hash(data);
    let mut out = [0u8; 28];
    out.copy_from_slice(hash.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blake2b_lengths_and_determinism() {
        assert_eq!(blake2b_256(b"slurp"), blake2b_256(b"slurp"));
        assert_ne!(blake2b_256(b"slurp"), blake2b_256(b"slurP"));
        assert_eq!(blake2b_224(b"slurp").len(), 28);
    }

    #[test]
    fn test_blake2b_256_known_vector() {
        // blake2b-256 of the empty string
        assert_eq!(
            hex::encode(blake2b_256(b"")),
            "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
        );
    }
}
