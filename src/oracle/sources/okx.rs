//! OKX v5 market ticker source

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::oracle::sources::{average_pairs, PriceProvider, ProviderSettings, SourceCore};

const OKX_REST_URL: &str = "https://www.okx.com/api/v5/market/ticker";

pub struct OkxProvider {
    core: SourceCore,
    instruments: Vec<String>,
    base_url: String,
}

impl OkxProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let instruments = settings
            .require_quotes("OKX")?
            .iter()
            .map(|quote| settings.asset.dashed_pair(quote))
            .collect();

        Ok(Self {
            core: SourceCore::new("OKX", settings),
            instruments,
            base_url: OKX_REST_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_instrument(&self, inst_id: &str) -> Result<Decimal> {
        let url = format!("{}?instId={}", self.base_url, inst_id);
        let response = self.core.get_json(&url).await?;

        // OKX returns code as a string; "0" means success
        let code = response.get("code").and_then(|c| c.as_str()).unwrap_or("0");
        if code != "0" {
            let msg = response
                .get("msg")
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or("unknown error");
            return Err(self.core.body_error(&format!("code {}: {}", code, msg)));
        }

        self.core
            .validate(response.pointer("/data/0/last"), inst_id)
    }
}

#[async_trait]
impl PriceProvider for OkxProvider {
    fn exchange_name(&self) -> &str {
        self.core.name()
    }

    async fn get_price(&self) -> Result<Decimal> {
        self.core
            .fetch_with_retry(|| {
                let pairs = self
                    .instruments
                    .iter()
                    .map(|inst_id| (inst_id.clone(), self.fetch_instrument(inst_id)))
                    .collect();
                average_pairs(self.core.name(), pairs)
            })
            .await
    }
}
