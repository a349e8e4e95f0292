//! Price source implementations (Binance, Bybit, Coinbase, Kraken, OKX)

mod binance;
mod bybit;
mod coinbase;
mod kraken;
mod okx;

pub use binance::BinanceProvider;
pub use bybit::BybitProvider;
pub use coinbase::CoinbaseProvider;
pub use kraken::KrakenProvider;
pub use okx::OkxProvider;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::{classify, ConfigKind, ErrorContext, OracleError, RawFailure, Result};
use crate::oracle::http::{HttpTransport, JsonFetcher, DEFAULT_REQUEST_TIMEOUT};
use crate::oracle::retry::{with_retry, RetryPolicy};
use crate::oracle::validator::PriceValidator;
use crate::types::{mean, round_price, TrackedAsset};

/// Capability shared by every exchange: fetch the tracked asset's price.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    /// Stable display name (e.g., "Binance")
    fn exchange_name(&self) -> &str;

    /// Fetch, validate and round the current price.
    async fn get_price(&self) -> Result<Decimal>;
}

/// Everything a provider needs to be constructed.
#[derive(Clone)]
pub struct ProviderSettings {
    pub asset: TrackedAsset,
    pub transport: Arc<dyn HttpTransport>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProviderSettings {
    pub fn new(asset: TrackedAsset, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            asset,
            transport,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn validator(&self) -> PriceValidator {
        PriceValidator::new(self.asset.max_price)
    }

    pub fn fetcher(&self) -> JsonFetcher {
        JsonFetcher::new(Arc::clone(&self.transport), self.timeout)
    }

    /// Quote currencies, failing if the asset lists none.
    pub(crate) fn require_quotes(&self, exchange: &str) -> Result<&[String]> {
        if self.asset.quotes.is_empty() {
            return Err(OracleError::configuration(
                ConfigKind::InvalidProvider,
                format!("{}: tracked asset {} has no quote currencies", exchange, self.asset),
                ErrorContext::new("materialize_provider").with_exchange(exchange),
            ));
        }
        Ok(&self.asset.quotes)
    }
}

/// Internal plumbing every exchange shares: fetcher, validator, retry.
#[derive(Clone)]
pub(crate) struct SourceCore {
    name: &'static str,
    fetcher: JsonFetcher,
    validator: PriceValidator,
    retry: RetryPolicy,
}

impl SourceCore {
    pub(crate) fn new(name: &'static str, settings: &ProviderSettings) -> Self {
        Self {
            name,
            fetcher: settings.fetcher(),
            validator: settings.validator(),
            retry: settings.retry,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) async fn get_json(&self, url: &str) -> Result<Value> {
        self.fetcher.get_json(self.name, "get_price", url).await
    }

    pub(crate) fn validate(&self, raw: Option<&Value>, symbol: &str) -> Result<Decimal> {
        self.validator.validate(raw, symbol, self.name)
    }

    /// Error reported inside a 2xx body (e.g., `retCode != 0`).
    pub(crate) fn body_error(&self, message: &str) -> OracleError {
        classify(
            &RawFailure::message(message),
            ErrorContext::new("get_price").with_exchange(self.name),
        )
    }

    /// Wrap one full fetch in the retry policy and round the result.
    pub(crate) async fn fetch_with_retry<F, Fut>(&self, op: F) -> Result<Decimal>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Decimal>>,
    {
        let price = with_retry(self.name, self.retry, op).await?;
        Ok(round_price(price))
    }
}

/// Query several trading pairs concurrently and average the ones that
/// succeed. The mean is left unrounded.
pub(crate) async fn average_pairs<F>(exchange: &str, pairs: Vec<(String, F)>) -> Result<Decimal>
where
    F: Future<Output = Result<Decimal>>,
{
    let (symbols, futures): (Vec<String>, Vec<F>) = pairs.into_iter().unzip();
    let outcomes = join_all(futures).await;

    let mut prices = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (symbol, outcome) in symbols.into_iter().zip(outcomes) {
        match outcome {
            Ok(price) => prices.push(price),
            Err(err) => {
                tracing::debug!(exchange = %exchange, pair = %symbol, error = %err, "Pair fetch failed");
                failures.push((symbol, err));
            }
        }
    }

    if let Some(avg) = mean(&prices) {
        return Ok(avg);
    }

    if failures.is_empty() {
        return Err(OracleError::configuration(
            ConfigKind::InvalidProvider,
            format!("{}: no trading pairs to query", exchange),
            ErrorContext::new("get_price").with_exchange(exchange),
        ));
    }

    // No pair worked. Surface a retryable failure if there is one so the
    // retry helper keeps going.
    let summary = failures
        .iter()
        .map(|(symbol, err)| format!("{}: {}", symbol, err))
        .collect::<Vec<_>>()
        .join("; ");
    let index = failures
        .iter()
        .position(|(_, err)| err.is_retryable())
        .unwrap_or(0);
    let (_, err) = failures.swap_remove(index);
    Err(err.map_message(|_| format!("{}: no trading pair returned a price ({})", exchange, summary)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use rust_decimal_macros::dec;

    fn ok(price: Decimal) -> impl Future<Output = Result<Decimal>> {
        async move { Ok(price) }
    }

    #[tokio::test]
    async fn averages_successful_pairs_only() {
        let failing = async {
            Err::<Decimal, _>(classify(
                &RawFailure::status(500, None),
                ErrorContext::new("get_price").with_exchange("Test"),
            ))
        };
        let pairs: Vec<(String, std::pin::Pin<Box<dyn Future<Output = Result<Decimal>> + Send>>)> = vec![
            ("ETHUSDT".to_string(), Box::pin(ok(dec!(3000.1)))),
            ("ETHUSDC".to_string(), Box::pin(ok(dec!(3000.4)))),
            ("ETHBUSD".to_string(), Box::pin(failing)),
        ];
        let avg = average_pairs("Test", pairs).await.unwrap();
        assert_eq!(avg, dec!(3000.25));
    }

    #[tokio::test]
    async fn all_pairs_failing_names_exchange_and_keeps_retryable_code() {
        let not_found = async {
            Err::<Decimal, _>(classify(
                &RawFailure::status(404, None),
                ErrorContext::new("get_price").with_exchange("Test"),
            ))
        };
        let server = async {
            Err::<Decimal, _>(classify(
                &RawFailure::status(502, None),
                ErrorContext::new("get_price").with_exchange("Test"),
            ))
        };
        let pairs: Vec<(String, std::pin::Pin<Box<dyn Future<Output = Result<Decimal>> + Send>>)> = vec![
            ("ETHUSDT".to_string(), Box::pin(not_found)),
            ("ETHUSDC".to_string(), Box::pin(server)),
        ];
        let err = average_pairs("Test", pairs).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ApiServerError);
        assert!(err.to_string().starts_with("Test: no trading pair returned a price"));
        assert!(err.to_string().contains("ETHUSDT"));
    }
}
