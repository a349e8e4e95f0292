//! Core types used throughout the oracle feeder
//!
//! Defines the tracked asset, per-exchange price outcomes and the
//! rounding rule every published price goes through.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of decimal places every published price carries.
pub const PRICE_DECIMALS: u32 = 3;

/// Default sanity bound for the reference asset.
pub const DEFAULT_MAX_PRICE: Decimal = dec!(10000);

/// Round a price to [`PRICE_DECIMALS`] places, half away from zero.
pub fn round_price(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRICE_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Arithmetic mean, unrounded. `None` for an empty slice.
pub fn mean(values: &[Decimal]) -> Option<Decimal> {
    if values.is_empty() {
        return None;
    }
    let sum: Decimal = values.iter().copied().sum();
    Some(sum / Decimal::from(values.len()))
}

/// The asset whose price is being derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAsset {
    /// Base symbol, e.g. "ETH"
    pub symbol: String,
    /// Quote currencies queried on exchanges that list several pairs
    pub quotes: Vec<String>,
    /// Upper sanity bound for validated prices
    pub max_price: Decimal,
}

impl Default for TrackedAsset {
    fn default() -> Self {
        Self::new("ETH", ["USDT", "USDC"])
    }
}

impl TrackedAsset {
    pub fn new<I, S>(symbol: &str, quotes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbol: symbol.trim().to_uppercase(),
            quotes: quotes
                .into_iter()
                .map(|q| q.into().trim().to_uppercase())
                .collect(),
            max_price: DEFAULT_MAX_PRICE,
        }
    }

    pub fn with_max_price(mut self, max_price: Decimal) -> Self {
        self.max_price = max_price;
        self
    }

    /// Pair without separator (e.g., "ETHUSDT")
    pub fn concat_pair(&self, quote: &str) -> String {
        format!("{}{}", self.symbol, quote)
    }

    /// Pair with dash separator (e.g., "ETH-USDT")
    pub fn dashed_pair(&self, quote: &str) -> String {
        format!("{}-{}", self.symbol, quote)
    }
}

impl fmt::Display for TrackedAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// Outcome of one provider in one aggregation round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangePrice {
    pub exchange: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExchangePrice {
    pub fn ok(exchange: impl Into<String>, price: Decimal) -> Self {
        Self {
            exchange: exchange.into(),
            price: Some(price),
            success: true,
            error: None,
        }
    }

    pub fn failed(exchange: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            price: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// A successful [`ExchangePrice`] with its configured weight attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedExchangePrice {
    #[serde(flatten)]
    pub entry: ExchangePrice,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_weight: Option<f64>,
}

impl WeightedExchangePrice {
    pub fn new(entry: ExchangePrice, weight: f64) -> Self {
        Self {
            entry,
            weight,
            normalized_weight: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_price(dec!(10.0005)), dec!(10.001));
        assert_eq!(round_price(dec!(10.0004)), dec!(10.000));
        assert_eq!(round_price(dec!(3000.12349)), dec!(3000.123));
    }

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[dec!(1), dec!(2)]), Some(dec!(1.5)));
    }

    #[test]
    fn tracked_asset_pairs() {
        let asset = TrackedAsset::new("eth", ["usdt"]);
        assert_eq!(asset.concat_pair("USDT"), "ETHUSDT");
        assert_eq!(asset.dashed_pair("USD"), "ETH-USD");
        assert_eq!(asset.quotes, vec!["USDT".to_string()]);
        assert_eq!(asset.max_price, DEFAULT_MAX_PRICE);
    }

    #[test]
    fn failed_entry_serializes_without_price() {
        let entry = ExchangePrice::failed("Kraken", "boom");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("price").is_none());
        assert_eq!(json["error"], "boom");
    }
}
