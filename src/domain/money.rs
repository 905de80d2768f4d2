use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Integer storage form of an amount at a given [`Scale`], so the guarded
/// `balance + ? <= ?` arithmetic in SQL stays exact.
pub type MinorUnits = i64;

/// Fractional digits kept in storage. A database keeps one scale for life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Scale(u32);

impl Scale {
    /// 10^18 is the largest power of ten that fits in `MinorUnits`.
    pub const MAX_DIGITS: u32 = 18;

    pub const DEFAULT: Scale = Scale(8);

    pub fn new(digits: u32) -> Result<Self, UnsupportedScale> {
        if digits > Self::MAX_DIGITS {
            return Err(UnsupportedScale(digits));
        }
        Ok(Self(digits))
    }

    pub fn digits(&self) -> u32 {
        self.0
    }

    /// Convert into storage units, rejecting digits below the scale instead
    /// of truncating them.
    pub fn to_units(&self, value: Decimal) -> Result<MinorUnits, AmountError> {
        let factor = Decimal::from(10i64.pow(self.0));
        let scaled = value
            .checked_mul(factor)
            .ok_or(AmountError::OutOfRange(value))?;
        if !scaled.fract().is_zero() {
            return Err(AmountError::TooPrecise {
                value,
                digits: self.0,
            });
        }
        scaled.to_i64().ok_or(AmountError::OutOfRange(value))
    }

    pub fn from_units(&self, units: MinorUnits) -> Decimal {
        Decimal::new(units, self.0).normalize()
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u32> for Scale {
    type Error = UnsupportedScale;

    fn try_from(digits: u32) -> Result<Self, Self::Error> {
        Self::new(digits)
    }
}

impl From<Scale> for u32 {
    fn from(scale: Scale) -> Self {
        scale.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("amount scale {0} is not supported, expected at most {max}", max = Scale::MAX_DIGITS)]
pub struct UnsupportedScale(pub u32);

/// A strictly positive decimal amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        Ok(Self(value.normalize()))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_amount(self.0))
    }
}

/// Render with at least two fractional digits and no trailing zeros beyond.
/// Example: 50 -> "50.00", 12.5 -> "12.50", 0.005 -> "0.005"
pub fn format_amount(value: Decimal) -> String {
    let mut shown = value.normalize();
    if shown.scale() < 2 {
        shown.rescale(2);
    }
    shown.to_string()
}

/// Parse user input such as "50", "12.5" or "0.005" into a positive amount.
pub fn parse_amount(input: &str) -> Result<Amount, AmountError> {
    let value: Decimal = input
        .trim()
        .parse()
        .map_err(|_| AmountError::InvalidFormat(input.trim().to_string()))?;
    Amount::new(value)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must be positive, got {0}")]
    NotPositive(Decimal),

    #[error("amount {value} is finer than the ledger's {digits} decimal places")]
    TooPrecise { value: Decimal, digits: u32 },

    #[error("amount {0} is too large to store")]
    OutOfRange(Decimal),

    #[error("invalid money format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(dec!(50)), "50.00");
        assert_eq!(format_amount(dec!(12.34)), "12.34");
        assert_eq!(format_amount(dec!(12.5)), "12.50");
        assert_eq!(format_amount(dec!(0.005)), "0.005");
        assert_eq!(format_amount(dec!(7.12500000)), "7.125");
        assert_eq!(format_amount(Decimal::ZERO), "0.00");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("50").unwrap().value(), dec!(50));
        assert_eq!(parse_amount(" 0.01 ").unwrap().value(), dec!(0.01));
        assert_eq!(parse_amount("0.005").unwrap().value(), dec!(0.005));
        assert_eq!(parse_amount("100.10").unwrap().value(), dec!(100.1));
    }

    #[test]
    fn test_parse_amount_invalid() {
        assert!(matches!(
            parse_amount("abc"),
            Err(AmountError::InvalidFormat(_))
        ));
        assert!(matches!(parse_amount("0"), Err(AmountError::NotPositive(_))));
        assert!(matches!(
            parse_amount("-5"),
            Err(AmountError::NotPositive(_))
        ));
    }

    #[test]
    fn test_huge_amount_is_still_an_amount() {
        assert!(Amount::new(Decimal::MAX).is_ok());
    }

    #[test]
    fn test_scale_conversion() {
        let scale = Scale::DEFAULT;
        assert_eq!(scale.to_units(dec!(0.005)).unwrap(), 500_000);
        assert_eq!(scale.to_units(dec!(7.500)).unwrap(), 750_000_000);
        assert_eq!(scale.from_units(500_000), dec!(0.005));

        let cents = Scale::new(2).unwrap();
        assert_eq!(cents.to_units(dec!(12.5)).unwrap(), 1250);
        assert_eq!(
            cents.to_units(dec!(0.005)),
            Err(AmountError::TooPrecise {
                value: dec!(0.005),
                digits: 2
            })
        );
    }

    #[test]
    fn test_scale_range() {
        assert!(Scale::new(Scale::MAX_DIGITS).is_ok());
        assert_eq!(Scale::new(19), Err(UnsupportedScale(19)));
        assert!(matches!(
            Scale::DEFAULT.to_units(dec!(100000000000000000000)),
            Err(AmountError::OutOfRange(_))
        ));
        assert!(matches!(
            Scale::DEFAULT.to_units(Decimal::MAX),
            Err(AmountError::OutOfRange(_))
        ));
    }

    proptest! {
        #[test]
        fn units_roundtrip_preserves_value(units in 1i64..=100_000_000_000_000i64, digits in 0u32..=8) {
            let scale = Scale::new(digits).unwrap();
            let value = scale.from_units(units);
            prop_assert_eq!(scale.to_units(value).unwrap(), units);
        }
    }
}
