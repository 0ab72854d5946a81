//! Fixed-scale decimal amount.

use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ParseBigDecimalError, RoundingMode};
use serde::{Deserialize, Serialize};

/// Decimal amount held at a fixed scale of two places.
///
/// Construction always rounds half-up (ties away from zero), so every
/// `Amount` in the system compares and sums exactly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(BigDecimal);

impl Amount {
    /// Number of fractional digits every amount carries.
    pub const SCALE: i64 = 2;

    /// `0.00`.
    #[must_use]
    pub fn zero() -> Self {
        Self(BigDecimal::from(0).with_scale(Self::SCALE))
    }

    /// Round an arbitrary decimal to two places, half-up.
    #[must_use]
    pub fn round_half_up(value: &BigDecimal) -> Self {
        Self(value.with_scale_round(Self::SCALE, RoundingMode::HalfUp))
    }

    /// Borrow the underlying decimal.
    #[must_use]
    pub fn as_decimal(&self) -> &BigDecimal {
        &self.0
    }

    /// Mean of `sum` over `count` items, rounded half-up. `None` for zero items.
    #[must_use]
    pub fn mean(sum: &Self, count: u64) -> Option<Self> {
        if count == 0 {
            return None;
        }
        let quotient = &sum.0 / BigDecimal::from(count);
        Some(Self::round_half_up(&quotient))
    }

    /// Signed difference `self - other`.
    #[must_use]
    pub fn delta(&self, other: &Self) -> Self {
        Self(&self.0 - &other.0)
    }
}

impl Default for Amount {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses stored text (`"10.01"`). Inputs with more precision are rounded.
impl FromStr for Amount {
    type Err = ParseBigDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BigDecimal::from_str(s.trim()).map(|d| Self::round_half_up(&d))
    }
}

impl Add for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[test]
    fn zero_displays_two_places() {
        assert_eq!(Amount::zero().to_string(), "0.00");
    }

    #[test]
    fn rounds_half_up_away_from_zero() {
        assert_eq!(amt("10.005").to_string(), "10.01");
        assert_eq!(amt("10.004").to_string(), "10.00");
        assert_eq!(amt("-10.005").to_string(), "-10.01");
        assert_eq!(amt("3").to_string(), "3.00");
    }

    #[test]
    fn mean_rounds_and_handles_empty() {
        let sum = amt("10.00");
        assert_eq!(Amount::mean(&sum, 3).unwrap(), amt("3.33"));
        assert_eq!(Amount::mean(&amt("0.05"), 2).unwrap(), amt("0.03"));
        assert!(Amount::mean(&sum, 0).is_none());
    }

    #[test]
    fn addition_is_exact() {
        let total = &amt("0.10") + &amt("0.20");
        assert_eq!(total, amt("0.30"));
    }

    #[test]
    fn ordering_is_numeric() {
        assert!(amt("9.99") < amt("10.00"));
        assert!(amt("-1.00") < amt("0.00"));
    }

    #[test]
    fn serde_roundtrip_preserves_value() {
        let a = amt("12.34");
        let json = serde_json::to_string(&a).unwrap();
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
