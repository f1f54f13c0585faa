//! Fixed-point money arithmetic for FundFlow.
//!
//! Every quantity has an explicit scale: currency amounts use
//! [`AMOUNT_SCALE`], exchange rates [`RATE_SCALE`] and rule percentages
//! [`PERCENT_SCALE`]. All rounding goes through [`quantize`], which applies
//! round-half-even so fee, conversion and distribution agree on one rule.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits of a currency amount.
pub const AMOUNT_SCALE: u32 = 2;

/// Fractional digits of an exchange rate.
pub const RATE_SCALE: u32 = 8;

/// Fractional digits of a distribution percentage.
pub const PERCENT_SCALE: u32 = 2;

/// Rounding rule shared by every money computation.
pub const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointNearestEven;

/// Round `value` to `scale` fractional digits and pad it to exactly that scale.
///
/// `quantize(1.005, 2) == 1.00`, `quantize(1.015, 2) == 1.02`,
/// `quantize(100, 2)` renders as `100.00`.
pub fn quantize(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, ROUNDING);
    rounded.rescale(scale);
    rounded
}

/// `value × percentage / 100`, unrounded.
pub fn percent_of(value: Decimal, percentage: Decimal) -> Decimal {
    value * percentage / Decimal::ONE_HUNDRED
}

/// Errors from [`parse_amount`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    /// Not a decimal number.
    #[error("'{0}' is not a decimal amount")]
    Malformed(String),

    /// More fractional digits than a currency amount carries.
    #[error("'{0}' has more than two decimal places")]
    TooPrecise(String),
}

/// Parse a decimal-string amount into a scale-2 value.
///
/// Only plain `[+-]digits[.digits]` is accepted: no exponent, no digit
/// separators. Sign is not checked here; callers decide what a non-positive
/// amount means.
pub fn parse_amount(text: &str) -> Result<Decimal, AmountError> {
    let trimmed = text.trim();
    if !is_plain_decimal(trimmed) {
        return Err(AmountError::Malformed(trimmed.to_string()));
    }
    let value =
        Decimal::from_str(trimmed).map_err(|_| AmountError::Malformed(trimmed.to_string()))?;

    if value.normalize().scale() > AMOUNT_SCALE {
        return Err(AmountError::TooPrecise(trimmed.to_string()));
    }

    Ok(quantize(value, AMOUNT_SCALE))
}

fn is_plain_decimal(text: &str) -> bool {
    let unsigned = text.strip_prefix(['+', '-']).unwrap_or(text);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    digits(whole) && fraction.map_or(true, digits)
}

/// Currencies an account may be denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Chf,
    Cad,
}

impl Currency {
    /// All supported currencies.
    pub const ALL: [Currency; 5] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Chf,
        Currency::Cad,
    ];

    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Chf => "CHF",
            Currency::Cad => "CAD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unknown currency code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported currency code '{0}'")]
pub struct ParseCurrencyError(pub String);

impl FromStr for Currency {
    type Err = ParseCurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        Currency::ALL
            .into_iter()
            .find(|c| c.code() == code)
            .ok_or(ParseCurrencyError(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quantize_rounds_half_even() {
        assert_eq!(quantize(dec!(1.005), 2), dec!(1.00));
        assert_eq!(quantize(dec!(1.015), 2), dec!(1.02));
        assert_eq!(quantize(dec!(1.0051), 2), dec!(1.01));
        assert_eq!(quantize(dec!(-1.005), 2), dec!(-1.00));
    }

    #[test]
    fn test_quantize_pads_scale() {
        let value = quantize(dec!(100), AMOUNT_SCALE);
        assert_eq!(value.to_string(), "100.00");

        let rate = quantize(dec!(0.9), RATE_SCALE);
        assert_eq!(rate.to_string(), "0.90000000");
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(dec!(100.00), dec!(2.0)), dec!(2));
        assert_eq!(quantize(percent_of(dec!(88.20), dec!(60.00)), 2), dec!(52.92));
        assert_eq!(quantize(percent_of(dec!(88.20), dec!(40.00)), 2), dec!(35.28));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("100").unwrap().to_string(), "100.00");
        assert_eq!(parse_amount(" 12.5 ").unwrap(), dec!(12.50));
        assert_eq!(parse_amount("7.000").unwrap(), dec!(7.00));
        assert_eq!(parse_amount("-3.25").unwrap(), dec!(-3.25));
        assert!(matches!(parse_amount("abc"), Err(AmountError::Malformed(_))));
        assert!(matches!(parse_amount(""), Err(AmountError::Malformed(_))));
        assert!(matches!(parse_amount("1.005"), Err(AmountError::TooPrecise(_))));
        assert_eq!(parse_amount("+4.10").unwrap(), dec!(4.10));
    }

    #[test]
    fn test_parse_amount_rejects_non_plain_forms() {
        for text in ["1_000.00", "1e3", "1.", ".5", "--1", "1.2.3", "0x10", "１"] {
            assert!(
                matches!(parse_amount(text), Err(AmountError::Malformed(_))),
                "{} should be malformed",
                text
            );
        }
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("usd".parse::<Currency>().unwrap(), Currency::Usd);
        assert_eq!(" EUR".parse::<Currency>().unwrap(), Currency::Eur);
        assert!("XYZ".parse::<Currency>().is_err());
        assert_eq!(Currency::Gbp.to_string(), "GBP");
    }

    #[test]
    fn test_currency_serde_uses_codes() {
        let json = serde_json::to_string(&Currency::Chf).unwrap();
        assert_eq!(json, "\"CHF\"");
        let back: Currency = serde_json::from_str("\"CAD\"").unwrap();
        assert_eq!(back, Currency::Cad);
    }

    proptest! {
        #[test]
        fn prop_quantize_is_idempotent(units in -1_000_000_000i64..1_000_000_000i64, scale in 0u32..6) {
            let value = Decimal::new(units, scale);
            let once = quantize(value, AMOUNT_SCALE);
            prop_assert_eq!(quantize(once, AMOUNT_SCALE), once);
            prop_assert_eq!(once.scale(), AMOUNT_SCALE);
        }

        #[test]
        fn prop_quantize_error_is_at_most_half_cent(units in -1_000_000_000i64..1_000_000_000i64, scale in 0u32..8) {
            let value = Decimal::new(units, scale);
            let diff = (quantize(value, AMOUNT_SCALE) - value).abs();
            prop_assert!(diff <= dec!(0.005));
        }
    }
}
