//! ADA amounts. All arithmetic happens in lovelace.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lovelace per ADA.
pub const LOVELACE_PER_ADA: u64 = 1_000_000;

const ADA_DECIMALS: usize = 6;

/// An amount of lovelace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lovelace(pub u64);

impl Lovelace {
    pub const ZERO: Lovelace = Lovelace(0);

    pub fn from_ada(ada: u64) -> Result<Self> {
        ada.checked_mul(LOVELACE_PER_ADA)
            .map(Lovelace)
            .ok_or_else(|| GatewayError::InvalidAmount(format!("{} ADA overflows", ada)))
    }

    /// Parses a decimal ADA string such as `"12"` or `"1.5"`.
    pub fn parse_ada(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(GatewayError::InvalidAmount("Amount cannot be empty".to_string()));
        }

        let (whole, fraction) = match input.split_once('.') {
            Some((w, f)) => (w, f),
            None => (input, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(GatewayError::InvalidAmount(input.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(GatewayError::InvalidAmount(format!("'{}' is not a decimal ADA amount", input)));
        }
        if fraction.len() > ADA_DECIMALS {
            return Err(GatewayError::InvalidAmount(format!(
                "'{}' has more than {} decimal places",
                input, ADA_DECIMALS
            )));
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| GatewayError::InvalidAmount(format!("'{}' is out of range", input)))?
        };
        let padded = format!("{:0<width$}", fraction, width = ADA_DECIMALS);
        let fraction: u64 = padded
            .parse()
            .map_err(|_| GatewayError::InvalidAmount(input.to_string()))?;

        Lovelace::from_ada(whole)?
            .checked_add(Lovelace(fraction))
            .ok_or_else(|| GatewayError::InvalidAmount(format!("'{}' is out of range", input)))
    }

    pub fn checked_add(self, other: Lovelace) -> Option<Lovelace> {
        self.0.checked_add(other.0).map(Lovelace)
    }

    pub fn checked_sub(self, other: Lovelace) -> Option<Lovelace> {
        self.0.checked_sub(other.0).map(Lovelace)
    }

    pub fn saturating_sub(self, other: Lovelace) -> Lovelace {
        Lovelace(self.0.saturating_sub(other.0))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Formats as an ADA decimal string with all six places.
    pub fn to_ada_string(self) -> String {
        format!(
            "{}.{:06}",
            self.0 / LOVELACE_PER_ADA,
            self.0 % LOVELACE_PER_ADA
        )
    }
}

impl fmt::Display for Lovelace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} lovelace", self.0)
    }
}

impl FromStr for Lovelace {
    type Err = GatewayError;

    /// Plain integers are lovelace; anything with a decimal point is ADA.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.contains('.') {
            return Lovelace::parse_ada(s);
        }
        s.parse::<u64>()
            .map(Lovelace)
            .map_err(|_| GatewayError::InvalidAmount(format!("'{}' is not a lovelace amount", s)))
    }
}

impl std::iter::Sum for Lovelace {
    fn sum<I: Iterator<Item = Lovelace>>(iter: I) -> Self {
        Lovelace(iter.map(|l| l.0).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ada() {
        assert_eq!(Lovelace::parse_ada("1").unwrap(), Lovelace(1_000_000));
        assert_eq!(Lovelace::parse_ada("1.5").unwrap(), Lovelace(1_500_000));
        assert_eq!(Lovelace::parse_ada("0.000001").unwrap(), Lovelace(1));
        assert_eq!(Lovelace::parse_ada(".25").unwrap(), Lovelace(250_000));
    }

    #[test]
    fn test_parse_ada_rejects_garbage() {
        assert!(Lovelace::parse_ada("").is_err());
        assert!(Lovelace::parse_ada(".").is_err());
        assert!(Lovelace::parse_ada("-1").is_err());
        assert!(Lovelace::parse_ada("1.0000001").is_err());
        assert!(Lovelace::parse_ada("1e6").is_err());
        assert!(Lovelace::parse_ada("99999999999999999999").is_err());
    }

    #[test]
    fn test_from_str_distinguishes_units() {
        assert_eq!("2500000".parse::<Lovelace>().unwrap(), Lovelace(2_500_000));
        assert_eq!("2.5".parse::<Lovelace>().unwrap(), Lovelace(2_500_000));
    }

    #[test]
    fn test_ada_string() {
        assert_eq!(Lovelace(1_500_000).to_ada_string(), "1.500000");
        assert_eq!(Lovelace(42).to_ada_string(), "0.000042");
    }
}
