//! Coinbase Exchange REST ticker source
//!
//! Coinbase lists the asset against USD only, so a single product is
//! queried regardless of the configured quote currencies.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::oracle::sources::{PriceProvider, ProviderSettings, SourceCore};

const COINBASE_REST_URL: &str = "https://api.exchange.coinbase.com/products";

pub struct CoinbaseProvider {
    core: SourceCore,
    product_id: String,
    base_url: String,
}

impl CoinbaseProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            core: SourceCore::new("Coinbase", settings),
            product_id: settings.asset.dashed_pair("USD"),
            base_url: COINBASE_REST_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_ticker(&self) -> Result<Decimal> {
        let url = format!("{}/{}/ticker", self.base_url, self.product_id);
        let response = self.core.get_json(&url).await?;

        // {"message":"NotFound"} on unknown products
        if let Some(message) = response.get("message").and_then(|m| m.as_str()) {
            return Err(self.core.body_error(message));
        }

        self.core.validate(response.get("price"), &self.product_id)
    }
}

#[async_trait]
impl PriceProvider for CoinbaseProvider {
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
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn reads_usd_ticker() {
        let settings = settings_with(vec![(
            "/ETH-USD/ticker",
            200,
            r#"{"trade_id":1,"price":"3002.45678","size":"0.1","bid":"3002.4","ask":"3002.5","volume":"1"}"#,
        )]);
        let provider = CoinbaseProvider::new(&settings).unwrap();
        assert_eq!(provider.get_price().await.unwrap(), dec!(3002.457));
    }

    #[tokio::test]
    async fn numeric_price_is_accepted() {
        let settings = settings_with(vec![("/ETH-USD/ticker", 200, r#"{"price":2999.5}"#)]);
        let provider = CoinbaseProvider::new(&settings).unwrap();
        assert_eq!(provider.get_price().await.unwrap(), dec!(2999.5));
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let settings = settings_with(vec![]);
        let provider = CoinbaseProvider::new(&settings).unwrap();
        let err = provider.get_price().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApiNotFound);
        assert_eq!(err.exchange(), Some("Coinbase"));
    }

    #[tokio::test]
    async fn out_of_range_price_is_rejected() {
        let settings = settings_with(vec![("/ETH-USD/ticker", 200, r#"{"price":"250000"}"#)]);
        let provider = CoinbaseProvider::new(&settings).unwrap();
        let err = provider.get_price().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationOutOfRange);
    }

    #[tokio::test]
    async fn custom_base_url_is_queried() {
        let settings = settings_with(vec![("http://mirror.test/products/ETH-USD/ticker", 200, r#"{"price":"2999.25"}"#)]);
        let provider = CoinbaseProvider::new(&settings)
            .unwrap()
            .with_base_url("http://mirror.test/products");
        assert_eq!(provider.get_price().await.unwrap(), dec!(2999.25));
    }
}
