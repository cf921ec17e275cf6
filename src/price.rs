// =============================================================================
// Scaled-integer price representation
// =============================================================================
//
// All prices that flow through sizing, stop-ratchet, and take-profit
// comparisons are stored as integers scaled by `SCALE` (four decimal
// places) rather than `f64`, so that ratchet/ordering invariants never
// depend on floating-point rounding. Conversion to/from `f64` only
// happens at the I/O boundary (parsing broker responses, formatting for
// logs or outbound JSON).
// =============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point scale: four decimal places.
pub const SCALE: i64 = 10_000;

/// A price or price-like quantity stored as an integer number of
/// ten-thousandths of a dollar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub i64);

impl Price {
    pub const ZERO: Price = Price(0);

    /// Build a `Price` from a floating-point dollar amount, rounding to
    /// the nearest tick.
    pub fn from_f64(value: f64) -> Self {
        Price((value * SCALE as f64).round() as i64)
    }

    /// Convert back to a floating-point dollar amount (for logging,
    /// display, or outbound wire formats only — never for comparisons).
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    /// Multiply by a floating-point factor (e.g. `1.0 - trail_pct`),
    /// rounding to the nearest tick. Used for stop/TP distance math
    /// where the factor itself is derived from continuous indicators.
    pub fn scaled_by(self, factor: f64) -> Self {
        Price((self.0 as f64 * factor).round() as i64)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl From<f64> for Price {
    fn from(value: f64) -> Self {
        Price::from_f64(value)
    }
}

impl From<Price> for f64 {
    fn from(p: Price) -> Self {
        p.as_f64()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.as_f64())
    }
}

impl std::ops::Add for Price {
    type Output = Price;
    fn add(self, rhs: Price) -> Price {
        Price(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Price {
    type Output = Price;
    fn sub(self, rhs: Price) -> Price {
        Price(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_f64() {
        let p = Price::from_f64(50.00);
        assert_eq!(p.0, 500_000);
        assert!((p.as_f64() - 50.00).abs() < 1e-9);
    }

    #[test]
    fn ordering_is_exact() {
        let a = Price::from_f64(49.00);
        let b = Price::from_f64(50.05);
        assert!(a < b);
        assert!(b >= a);
    }

    #[test]
    fn scaled_by_rounds() {
        let p = Price::from_f64(100.0);
        let trailed = p.scaled_by(0.99);
        assert_eq!(trailed, Price::from_f64(99.0));
    }
}
