//! Cardano address handling
//!
//! Shelley addresses are bech32 strings over a one-byte header followed by
//! one or two 28-byte credentials. The header's high nibble is the address
//! type and the low nibble the network id. CIP-30 wallets hand out the raw
//! bytes hex-encoded, so both forms are accepted and normalised to bech32.

use crate::error::{GatewayError, Result};
use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Hrp};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Length of a blake2b-224 key or script hash.
pub const CREDENTIAL_HASH_SIZE: usize = 28;

static HRP_ADDR: Lazy<Hrp> = Lazy::new(|| Hrp::parse_unchecked("addr"));
static HRP_ADDR_TEST: Lazy<Hrp> = Lazy::new(|| Hrp::parse_unchecked("addr_test"));
static HRP_STAKE: Lazy<Hrp> = Lazy::new(|| Hrp::parse_unchecked("stake"));
static HRP_STAKE_TEST: Lazy<Hrp> = Lazy::new(|| Hrp::parse_unchecked("stake_test"));

/// Cardano networks the gateway can be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Preprod,
    Preview,
}

impl Network {
    pub fn network_id(self) -> u8 {
        match self {
            Network::Mainnet => 1,
            Network::Preprod | Network::Preview => 0,
        }
    }

    pub fn is_mainnet(self) -> bool {
        self.network_id() == 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Preprod => "preprod",
            Network::Preview => "preview",
        }
    }

    pub fn blockfrost_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://cardano-mainnet.blockfrost.io/api/v0",
            Network::Preprod => "https://cardano-preprod.blockfrost.io/api/v0",
            Network::Preview => "https://cardano-preview.blockfrost.io/api/v0",
        }
    }

    pub fn koios_url(self) -> &'static str {
        match self {
            Network::Mainnet => "https://api.koios.rest/api/v1",
            Network::Preprod => "https://preprod.koios.rest/api/v1",
            Network::Preview => "https://preview.koios.rest/api/v1",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "preprod" => Ok(Network::Preprod),
            "preview" => Ok(Network::Preview),
            other => Err(GatewayError::ConfigError(format!("Unknown network '{}'", other))),
        }
    }
}

/// What the header byte says about the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    Base,
    Pointer,
    Enterprise,
    Reward,
}

/// A decoded Shelley-era address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardanoAddress {
    bech32: String,
    bytes: Vec<u8>,
}

impl CardanoAddress {
    /// Parses either a bech32 string or a hex-encoded raw address.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(GatewayError::InvalidAddress("Address cannot be empty".to_string()));
        }
        if has_known_prefix(input) {
            Self::from_bech32(input)
        } else if input.chars().all(|c| c.is_ascii_hexdigit()) {
            let bytes = hex::decode(input)
                .map_err(|e| GatewayError::InvalidAddress(format!("Invalid hex address: {}", e)))?;
            Self::from_bytes(bytes)
        } else {
            Err(GatewayError::InvalidAddress(format!(
                "'{}' is neither a bech32 nor a hex Cardano address",
                input
            )))
        }
    }

    pub fn from_bech32(input: &str) -> Result<Self> {
        let checked = CheckedHrpstring::new::<Bech32>(input)
            .map_err(|e| GatewayError::InvalidAddress(format!("{}: {}", input, e)))?;
        let hrp = checked.hrp();
        let bytes: Vec<u8> = checked.byte_iter().collect();
        let address = Self::from_bytes(bytes)?;

        if hrp.to_lowercase() != expected_hrp(address.header()).as_str() {
            return Err(GatewayError::InvalidAddress(format!(
                "Prefix '{}' does not match address header",
                hrp.as_str()
            )));
        }
        Ok(address)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = *bytes
            .first()
            .ok_or_else(|| GatewayError::InvalidAddress("Address has no header byte".to_string()))?;
        let expected_len = match header >> 4 {
            0..=3 => 1 + 2 * CREDENTIAL_HASH_SIZE,
            4 | 5 => {
                // pointer addresses carry variable-length trailing integers
                if bytes.len() <= 1 + CREDENTIAL_HASH_SIZE {
                    return Err(GatewayError::InvalidAddress(
                        "Pointer address is truncated".to_string(),
                    ));
                }
                bytes.len()
            }
            6 | 7 | 14 | 15 => 1 + CREDENTIAL_HASH_SIZE,
            8 => {
                return Err(GatewayError::InvalidAddress(
                    "Byron addresses are not supported".to_string(),
                ))
            }
            t => {
                return Err(GatewayError::InvalidAddress(format!("Unknown address type {}", t)))
            }
        };
        if bytes.len() != expected_len {
            return Err(GatewayError::InvalidAddress(format!(
                "Address must be {} bytes, got {}",
                expected_len,
                bytes.len()
            )));
        }

        let bech32 = bech32::encode::<Bech32>(expected_hrp(header), &bytes)
            .map_err(|e| GatewayError::InvalidAddress(format!("Failed to encode address: {}", e)))?;
        Ok(CardanoAddress { bech32, bytes })
    }

    /// Builds an enterprise (payment key only) address.
    pub fn enterprise(key_hash: &[u8; CREDENTIAL_HASH_SIZE], network: Network) -> Result<Self> {
        let mut bytes = Vec::with_capacity(1 + CREDENTIAL_HASH_SIZE);
        bytes.push(0x60 | network.network_id());
        bytes.extend_from_slice(key_hash);
        Self::from_bytes(bytes)
    }

    pub fn header(&self) -> u8 {
        self.bytes[0]
    }

    pub fn network_id(&self) -> u8 {
        self.header() & 0x0f
    }

    pub fn kind(&self) -> AddressKind {
        match self.header() >> 4 {
            0..=3 => AddressKind::Base,
            4 | 5 => AddressKind::Pointer,
            6 | 7 => AddressKind::Enterprise,
            _ => AddressKind::Reward,
        }
    }

    /// Payment key hash, when the payment credential is a key rather than a script.
    pub fn payment_key_hash(&self) -> Option<[u8; CREDENTIAL_HASH_SIZE]> {
        let address_type = self.header() >> 4;
        if address_type >= 8 || address_type % 2 == 1 {
            return None;
        }
        self.bytes[1..1 + CREDENTIAL_HASH_SIZE].try_into().ok()
    }

    /// Reward addresses cannot receive transaction outputs.
    pub fn can_receive_funds(&self) -> bool {
        self.kind() != AddressKind::Reward
    }

    pub fn ensure_network(&self, network: Network) -> Result<()> {
        if self.network_id() != network.network_id() {
            return Err(GatewayError::InvalidAddress(format!(
                "{} is not a {} address",
                self.bech32,
                network.as_str()
            )));
        }
        Ok(())
    }

    pub fn as_bech32(&self) -> &str {
        &self.bech32
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl std::fmt::Display for CardanoAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.bech32)
    }
}

fn has_known_prefix(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    lower.starts_with("addr1")
        || lower.starts_with("addr_test1")
        || lower.starts_with("stake1")
        || lower.starts_with("stake_test1")
}

fn expected_hrp(header: u8) -> Hrp {
    let mainnet = header & 0x0f == 1;
    let reward = header >> 4 >= 14;
    match (reward, mainnet) {
        (false, true) => *HRP_ADDR,
        (false, false) => *HRP_ADDR_TEST,
        (true, true) => *HRP_STAKE,
        (true, false) => *HRP_STAKE_TEST,
    }
}

/// Cheap prefix check used where a full decode is not needed.
pub fn looks_like_address(input: &str) -> bool {
    has_known_prefix(input.trim())
}
