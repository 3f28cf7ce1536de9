//! Rounding policy for fractional credit amounts.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CreditError;

/// How fractional credit amounts become integers.
///
/// `Ceil` is the default: an operation or refund is never undercharged.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingStrategy {
    #[default]
    Ceil,
    Floor,
    Round,
}

impl RoundingStrategy {
    /// Round `numerator / denominator` using exact integer arithmetic.
    ///
    /// `denominator` must be positive; `numerator` must be non-negative.
    pub fn apply_ratio(self, numerator: i128, denominator: i128) -> Result<i64, CreditError> {
        if denominator <= 0 {
            return Err(CreditError::invalid_argument("ratio denominator must be positive"));
        }
        if numerator < 0 {
            return Err(CreditError::invalid_argument("ratio numerator must not be negative"));
        }

        let quotient = numerator / denominator;
        let remainder = numerator % denominator;
        let rounded = match self {
            RoundingStrategy::Floor => quotient,
            RoundingStrategy::Ceil if remainder > 0 => quotient + 1,
            RoundingStrategy::Ceil => quotient,
            RoundingStrategy::Round if remainder * 2 >= denominator => quotient + 1,
            RoundingStrategy::Round => quotient,
        };

        i64::try_from(rounded).map_err(|_| CreditError::invalid_argument("credit amount overflow"))
    }

    /// Round a floating-point amount (used for custom cost functions).
    pub fn apply_f64(self, value: f64) -> Result<i64, CreditError> {
        if !value.is_finite() || value < 0.0 {
            return Err(CreditError::invalid_argument(format!(
                "credit amount must be a finite non-negative number, got {value}"
            )));
        }
        let rounded = match self {
            RoundingStrategy::Ceil => value.ceil(),
            RoundingStrategy::Floor => value.floor(),
            RoundingStrategy::Round => value.round(),
        };
        if rounded > i64::MAX as f64 {
            return Err(CreditError::invalid_argument("credit amount overflow"));
        }
        Ok(rounded as i64)
    }
}

impl FromStr for RoundingStrategy {
    type Err = CreditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ceil" | "up" => Ok(Self::Ceil),
            "floor" | "down" => Ok(Self::Floor),
            "round" | "nearest" => Ok(Self::Round),
            other => Err(CreditError::invalid_argument(format!(
                "unknown rounding strategy: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_never_undercharges() {
        assert_eq!(RoundingStrategy::Ceil.apply_ratio(1000 * 30, 100).unwrap(), 300);
        assert_eq!(RoundingStrategy::Ceil.apply_ratio(1001 * 30, 100).unwrap(), 301);
        assert_eq!(RoundingStrategy::Ceil.apply_ratio(0, 7).unwrap(), 0);
    }

    #[test]
    fn floor_and_round_behave_as_named() {
        assert_eq!(RoundingStrategy::Floor.apply_ratio(7, 2).unwrap(), 3);
        assert_eq!(RoundingStrategy::Round.apply_ratio(7, 2).unwrap(), 4);
        assert_eq!(RoundingStrategy::Round.apply_ratio(5, 4).unwrap(), 1);
    }

    #[test]
    fn zero_denominator_is_rejected() {
        assert!(RoundingStrategy::Ceil.apply_ratio(1, 0).is_err());
    }

    #[test]
    fn float_rounding() {
        assert_eq!(RoundingStrategy::Ceil.apply_f64(2.1).unwrap(), 3);
        assert_eq!(RoundingStrategy::Floor.apply_f64(2.9).unwrap(), 2);
        assert!(RoundingStrategy::Ceil.apply_f64(f64::NAN).is_err());
        assert!(RoundingStrategy::Ceil.apply_f64(-1.0).is_err());
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("UP".parse::<RoundingStrategy>().unwrap(), RoundingStrategy::Ceil);
        assert_eq!("floor".parse::<RoundingStrategy>().unwrap(), RoundingStrategy::Floor);
        assert!("banker".parse::<RoundingStrategy>().is_err());
    }
}
