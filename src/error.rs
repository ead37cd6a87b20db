//! Error types for the Slurp gateway

use std::fmt;

use crate::provider::ProviderError;

#[derive(Debug, Clone)]
pub enum GatewayError {
    InvalidAddress(String),
    InvalidAmount(String),
    InvalidTransaction(String),
    InsufficientFunds(String),
    TransactionTooLarge { size: usize, max: usize },
    NotFound(String),
    ProviderError(String),
    ProviderRateLimited,
    CooldownActive { remaining_secs: u64 },
    FaucetDisabled,
    ConfigError(String),
    CborError(String),
    CryptoError(String),
    IoError(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GatewayError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            GatewayError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),
            GatewayError::InvalidTransaction(msg) => write!(f, "Invalid transaction: {}", msg),
            GatewayError::InsufficientFunds(msg) => write!(f, "Insufficient funds: {}", msg),
            GatewayError::TransactionTooLarge { size, max } => {
                write!(f, "Transaction too large: {} bytes (max: {})", size, max)
            }
            GatewayError::NotFound(msg) => write!(f, "Not found: {}", msg),
            GatewayError::ProviderError(msg) => write!(f, "Chain provider error: {}", msg),
            GatewayError::ProviderRateLimited => write!(f, "Chain provider rate limit reached"),
            GatewayError::CooldownActive { remaining_secs } => write!(
                f,
                "Faucet cooldown active, try again in {} seconds",
                remaining_secs
            ),
            GatewayError::FaucetDisabled => write!(f, "Faucet is disabled"),
            GatewayError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            GatewayError::CborError(msg) => write!(f, "CBOR error: {}", msg),
            GatewayError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            GatewayError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(what) => GatewayError::NotFound(what),
            ProviderError::RateLimited => GatewayError::ProviderRateLimited,
            ProviderError::Rejected(reason) => GatewayError::InvalidTransaction(reason),
            other => GatewayError::ProviderError(other.to_string()),
        }
    }
}

impl From<hex::FromHexError> for GatewayError {
    fn from(err: hex::FromHexError) -> Self {
        GatewayError::InvalidTransaction(format!("Invalid hex: {}", err))
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, GatewayError>;
