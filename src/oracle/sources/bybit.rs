//! Bybit v5 spot ticker source

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::oracle::sources::{average_pairs, PriceProvider, ProviderSettings, SourceCore};

const BYBIT_REST_URL: &str = "https://api.bybit.com/v5/market/tickers";

pub struct BybitProvider {
    core: SourceCore,
    symbols: Vec<String>,
    base_url: String,
}

impl BybitProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let symbols = settings
            .require_quotes("Bybit")?
            .iter()
            .map(|quote| settings.asset.concat_pair(quote))
            .collect();

        Ok(Self {
            core: SourceCore::new("Bybit", settings),
            symbols,
            base_url: BYBIT_REST_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_pair(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}?category=spot&symbol={}", self.base_url, symbol);
        let response = self.core.get_json(&url).await?;

        let ret_code = response.get("retCode").and_then(|c| c.as_i64()).unwrap_or(0);
        if ret_code != 0 {
            let msg = response
                .get("retMsg")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(self.core.body_error(&format!("retCode {}: {}", ret_code, msg)));
        }

        let ticker = response
            .pointer("/result/list")
            .and_then(|list| list.as_array())
            .and_then(|list| list.iter().find(|t| t["symbol"].as_str() == Some(symbol)));
        self.core
            .validate(ticker.and_then(|t| t.get("lastPrice")), symbol)
    }
}

#[async_trait]
impl PriceProvider for BybitProvider {
    fn exchange_name(&self) -> &str {
        self.core.name()
    }

    async fn get_price(&self) -> Result<Decimal> {
        self.core
            .fetch_with_retry(|| {
                let pairs = self
                    .symbols
                    .iter()
                    .map(|symbol| (symbol.clone(), self.fetch_pair(symbol)))
                    .collect();
                average_pairs(self.core.name(), pairs)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::oracle::sources::testing::settings_with;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn parses_last_price() {
        let settings = settings_with(vec![
            (
                "symbol=ETHUSDT",
                200,
                r#"{"retCode":0,"retMsg":"OK","result":{"category":"spot","list":[{"symbol":"ETHUSDT","lastPrice":"3001.2"}]}}"#,
            ),
            (
                "symbol=ETHUSDC",
                200,
                r#"{"retCode":0,"retMsg":"OK","result":{"category":"spot","list":[{"symbol":"ETHUSDC","lastPrice":"3001.4"}]}}"#,
            ),
        ]);
        let provider = BybitProvider::new(&settings).unwrap();
        assert_eq!(provider.get_price().await.unwrap(), dec!(3001.3));
    }

    #[tokio::test]
    async fn ret_code_error_is_reported() {
        let settings = settings_with(vec![(
            "symbol=ETH",
            200,
            r#"{"retCode":10001,"retMsg":"params error: symbol invalid","result":{}}"#,
        )]);
        let provider = BybitProvider::new(&settings).unwrap();
        let err = provider.get_price().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApiInvalidResponse);
        assert!(err.to_string().contains("symbol invalid"));
    }

    #[tokio::test]
    async fn empty_list_is_missing_field() {
        let settings = settings_with(vec![(
            "symbol=ETH",
            200,
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[]}}"#,
        )]);
        let provider = BybitProvider::new(&settings).unwrap();
        let err = provider.get_price().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationMissingField);
    }

    #[tokio::test]
    async fn custom_base_url_is_queried() {
        let settings = settings_with(vec![(
            "http://mirror.test/tickers?category=spot&symbol=ETHUSDT",
            200,
            r#"{"retCode":0,"retMsg":"OK","result":{"list":[{"symbol":"ETHUSDT","lastPrice":"3001.2"}]}}"#,
        )]);
        let provider = BybitProvider::new(&settings)
            .unwrap()
            .with_base_url("http://mirror.test/tickers");
        assert_eq!(provider.get_price().await.unwrap(), dec!(3001.2));
    }
}
