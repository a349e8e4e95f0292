//! Kraken public ticker source

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::Result;
use crate::oracle::sources::{PriceProvider, ProviderSettings, SourceCore};

const KRAKEN_REST_URL: &str = "https://api.kraken.com/0/public/Ticker";

/// Kraken still names bitcoin XBT on its REST API.
fn kraken_symbol(symbol: &str) -> &str {
    match symbol {
        "BTC" => "XBT",
        other => other,
    }
}

pub struct KrakenProvider {
    core: SourceCore,
    pair: String,
    base_url: String,
}

impl KrakenProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            core: SourceCore::new("Kraken", settings),
            pair: format!("{}USD", kraken_symbol(&settings.asset.symbol)),
            base_url: KRAKEN_REST_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_ticker(&self) -> Result<Decimal> {
        let url = format!("{}?pair={}", self.base_url, self.pair);
        let response = self.core.get_json(&url).await?;

        let errors: Vec<&str> = response
            .get("error")
            .and_then(|e| e.as_array())
            .map(|list| list.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !errors.is_empty() {
            return Err(self.core.body_error(&errors.join(", ")));
        }

        // The result key is Kraken's internal pair name (e.g., XETHZUSD),
        // so take the only entry. "c" is [last trade price, lot volume].
        let last = response
            .get("result")
            .and_then(|r| r.as_object())
            .and_then(|r| r.values().next())
            .and_then(|ticker| ticker.pointer("/c/0"));
        self.core.validate(last, &self.pair)
    }
}

#[async_trait]
impl PriceProvider for KrakenProvider {
    fn exchange_name(&self) -> &str {
        self.core.name()
    }

    async fn get_price(&self) -> Result<Decimal> {
        self.core.fetch_with_retry(|| self.fetch_ticker()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::oracle::sources::testing::settings_with;
    use crate::types::TrackedAsset;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn reads_last_trade_from_result() {
        let settings = settings_with(vec![(
            "pair=ETHUSD",
            200,
            r#"{"error":[],"result":{"XETHZUSD":{"a":["3003.1","1","1.0"],"b":["3003.0","2","2.0"],"c":["3003.0500","0.01"]}}}"#,
        )]);
        let provider = KrakenProvider::new(&settings).unwrap();
        assert_eq!(provider.get_price().await.unwrap(), dec!(3003.05));
    }

    #[tokio::test]
    async fn error_array_is_classified() {
        let settings = settings_with(vec![(
            "pair=ETHUSD",
            200,
            r#"{"error":["EAPI:Rate limit exceeded"]}"#,
        )]);
        let provider = KrakenProvider::new(&settings).unwrap();
        let err = provider.get_price().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApiRateLimited);
    }

    #[tokio::test]
    async fn unknown_pair_error_is_invalid_response() {
        let settings = settings_with(vec![(
            "pair=ETHUSD",
            200,
            r#"{"error":["EQuery:Unknown asset pair"]}"#,
        )]);
        let provider = KrakenProvider::new(&settings).unwrap();
        let err = provider.get_price().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApiInvalidResponse);
        assert!(err.to_string().contains("Unknown asset pair"));
    }

    #[test]
    fn bitcoin_uses_xbt() {
        let mut settings = settings_with(vec![]);
        settings.asset = TrackedAsset::new("btc", ["USDT"]);
        let provider = KrakenProvider::new(&settings).unwrap();
        assert_eq!(provider.pair, "XBTUSD");
    }

    #[tokio::test]
    async fn custom_base_url_is_queried() {
        let settings = settings_with(vec![(
            "http://mirror.test/Ticker?pair=ETHUSD",
            200,
            r#"{"error":[],"result":{"XETHZUSD":{"c":["3003.5","0.1"]}}}"#,
        )]);
        let provider = KrakenProvider::new(&settings)
            .unwrap()
            .with_base_url("http://mirror.test/Ticker");
        assert_eq!(provider.get_price().await.unwrap(), dec!(3003.5));
    }
}
