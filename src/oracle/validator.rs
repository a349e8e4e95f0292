//! Price validation.
//!
//! Turns a raw JSON price field into a positive, bounded [`Decimal`].
//! String and numeric inputs go through the same textual parse so that
//! `"10.5"` and `10.5` always validate to the same value.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{ErrorContext, OracleError, Result, ValidationKind};
use crate::types::DEFAULT_MAX_PRICE;

/// Stateless price validator with a configurable upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceValidator {
    max_price: Decimal,
}

impl Default for PriceValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PRICE)
    }
}

impl PriceValidator {
    pub fn new(max_price: Decimal) -> Self {
        Self { max_price }
    }

    pub fn max_price(&self) -> Decimal {
        self.max_price
    }

    /// Validate a raw price reported by `source` for `symbol`.
    pub fn validate(&self, raw: Option<&Value>, symbol: &str, source: &str) -> Result<Decimal> {
        let context = || ErrorContext::new("validate_price").with_exchange(source);

        let raw = match raw {
            None | Some(Value::Null) => {
                return Err(OracleError::validation(
                    ValidationKind::MissingField,
                    format!("{}: missing price for {}", source, symbol),
                    context(),
                ))
            }
            Some(raw) => raw,
        };

        let invalid = || {
            OracleError::validation(
                ValidationKind::InvalidData,
                format!("{}: invalid price for {}: {}", source, symbol, raw),
                context(),
            )
        };
        let out_of_range = |shown: &dyn std::fmt::Display| {
            OracleError::validation(
                ValidationKind::OutOfRange,
                format!(
                    "{}: price {} for {} outside (0, {}]",
                    source, shown, symbol, self.max_price
                ),
                context(),
            )
        };

        let price = match coerce(raw) {
            Coerced::Exact(price) => price,
            Coerced::Overflow(value) => {
                let bound = self.max_price.to_f64().unwrap_or(f64::MAX);
                if value <= 0.0 || value > bound {
                    return Err(out_of_range(&value));
                }
                return Err(invalid());
            }
            Coerced::Invalid => return Err(invalid()),
        };

        if price <= Decimal::ZERO || price > self.max_price {
            return Err(out_of_range(&price));
        }

        Ok(price)
    }
}

enum Coerced {
    Exact(Decimal),
    /// Finite number that does not fit a `Decimal`
    Overflow(f64),
    Invalid,
}

fn coerce(raw: &Value) -> Coerced {
    match raw {
        Value::String(text) => parse_decimal(text.trim()),
        Value::Number(number) => parse_decimal(&number.to_string()),
        _ => Coerced::Invalid,
    }
}

fn parse_decimal(text: &str) -> Coerced {
    if text.is_empty() {
        return Coerced::Invalid;
    }
    if let Ok(price) = Decimal::from_str(text).or_else(|_| Decimal::from_scientific(text)) {
        return Coerced::Exact(price);
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Coerced::Overflow(value),
        _ => Coerced::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn validate(raw: Value) -> Result<Decimal> {
        PriceValidator::default().validate(Some(&raw), "ETHUSDT", "Binance")
    }

    #[test]
    fn string_and_number_agree() {
        for p in ["10.5", "0.001", "9999.999", "3000", "1234.5678"] {
            let from_str = validate(json!(p)).unwrap();
            let from_num = validate(serde_json::from_str::<Value>(p).unwrap()).unwrap();
            assert_eq!(from_str, from_num, "input {}", p);
        }
    }

    #[test]
    fn missing_field() {
        let err = PriceValidator::default()
            .validate(None, "ETHUSDT", "Binance")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationMissingField);
        assert_eq!(validate(Value::Null).unwrap_err().code(), ErrorCode::ValidationMissingField);
    }

    #[test]
    fn non_numeric_is_invalid_data() {
        for raw in [json!("abc"), json!("NaN"), json!("inf"), json!(""), json!(true), json!([1])] {
            let err = validate(raw.clone()).unwrap_err();
            assert_eq!(err.code(), ErrorCode::ValidationInvalidData, "input {}", raw);
        }
    }

    #[test]
    fn out_of_range() {
        for raw in [json!(0), json!("-1"), json!(10000.001), json!("1e5")] {
            let err = validate(raw.clone()).unwrap_err();
            assert_eq!(err.code(), ErrorCode::ValidationOutOfRange, "input {}", raw);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn huge_values_are_out_of_range() {
        let digits = "9".repeat(32);
        for raw in [json!(1e30), json!("1e40"), json!(-1e30), json!(digits), json!("-1e40")] {
            let err = validate(raw.clone()).unwrap_err();
            assert_eq!(err.code(), ErrorCode::ValidationOutOfRange, "input {}", raw);
        }
    }

    #[test]
    fn bound_is_inclusive() {
        assert_eq!(validate(json!(10000)).unwrap(), dec!(10000));
    }

    #[test]
    fn scientific_notation_is_accepted() {
        assert_eq!(validate(json!("2.5e2")).unwrap(), dec!(250));
    }

    #[test]
    fn custom_bound() {
        let validator = PriceValidator::new(dec!(100000));
        let price = validator
            .validate(Some(&json!("65000.12")), "BTCUSDT", "Bybit")
            .unwrap();
        assert_eq!(price, dec!(65000.12));
    }
}
