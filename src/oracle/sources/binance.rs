//! Binance spot ticker source
//!
//! Queries one symbol per configured quote currency (e.g., ETHUSDT and
//! ETHUSDC) and averages whichever respond.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::oracle::sources::{average_pairs, PriceProvider, ProviderSettings, SourceCore};

const BINANCE_REST_URL: &str = "https://api.binance.com/api/v3/ticker/price";

pub struct BinanceProvider {
    core: SourceCore,
    symbols: Vec<String>,
    base_url: String,
}

impl BinanceProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let symbols = settings
            .require_quotes("Binance")?
            .iter()
            .map(|quote| settings.asset.concat_pair(quote))
            .collect();

        Ok(Self {
            core: SourceCore::new("Binance", settings),
            symbols,
            base_url: BINANCE_REST_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_pair(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}?symbol={}", self.base_url, symbol);
        let response = self.core.get_json(&url).await?;

        // Error bodies look like {"code":-1121,"msg":"Invalid symbol."}
        if let Some(msg) = response.get("msg").and_then(|m| m.as_str()) {
            return Err(self.core.body_error(msg));
        }

        self.core.validate(response.get("price"), symbol)
    }
}

#[async_trait]
impl PriceProvider for BinanceProvider {
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
