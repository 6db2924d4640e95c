//! Wei and ether amounts.
//!
//! Explorer values arrive as base-10 wei strings. They are parsed into an
//! integer [`Wei`] and converted to ether through `rust_decimal`, so no value
//! ever passes through floating point.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::{Error, Result};

/// Decimal places between wei and ether.
pub const ETHER_DECIMALS: u32 = 18;

/// An amount in wei.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Wei(u128);

impl Wei {
    pub fn new(value: u128) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn to_ether(self) -> Result<Ether> {
        let signed = i128::try_from(self.0)
            .map_err(|_| Error::Amount(format!("{} wei is out of range", self.0)))?;
        let decimal = Decimal::try_from_i128_with_scale(signed, ETHER_DECIMALS)
            .map_err(|e| Error::Amount(format!("{} wei is out of range: {e}", self.0)))?;
        Ok(Ether(decimal))
    }
}

impl FromStr for Wei {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Amount(format!("'{s}' is not a wei amount")));
        }
        trimmed
            .parse::<u128>()
            .map(Wei)
            .map_err(|e| Error::Amount(format!("'{s}' is not a wei amount: {e}")))
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An amount in ether.
///
/// Displays with trailing zeros removed but always with a fractional part:
/// `2`, `1.5`, `0.000000000000000001` render as `2.0`, `1.5` and
/// `0.000000000000000001`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ether(Decimal);

impl Ether {
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Ether {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let normalized = self.0.normalize();
        if normalized.scale() == 0 {
            write!(f, "{}.0", normalized)
        } else {
            write!(f, "{}", normalized)
        }
    }
}
