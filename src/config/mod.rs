//! Configuration management for the oracle feeder
//!
//! Loads built-in defaults, then `config/default.*` and `config/local.*`,
//! then `ORACLE__SECTION__KEY` environment variables (a `.env` file is read
//! first). The provider list can additionally be overridden at runtime with
//! a JSON array in `ORACLE_PROVIDERS`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::failover::FailoverSettings;
use crate::oracle::http::HttpTransport;
use crate::oracle::registry::{default_descriptors, ProviderDescriptor, ProviderRegistry};
use crate::oracle::retry::RetryPolicy;
use crate::oracle::sources::ProviderSettings;
use crate::oracle::AggregatorSettings;
use crate::types::TrackedAsset;

/// Environment variable holding the JSON provider override.
pub const PROVIDER_OVERRIDE_ENV: &str = "ORACLE_PROVIDERS";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub asset: AssetConfig,
    pub provider_defaults: ProviderDefaults,
    /// Static, ordered provider list
    #[serde(default = "default_descriptors")]
    pub providers: Vec<ProviderDescriptor>,
    pub aggregator: AggregatorConfig,
    pub failover: FailoverConfig,
    pub publisher: PublisherConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetConfig {
    /// Base symbol (ETH)
    pub symbol: String,
    /// Quote currencies for exchanges that list several pairs
    pub quotes: Vec<String>,
    /// Sanity bound for validated prices
    pub max_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderDefaults {
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Tries per fetch, including the first
    pub retry_attempts: u32,
    /// Base backoff between tries in milliseconds
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Rounds before giving up
    pub max_retries: u32,
    /// Deadline of one round in milliseconds
    pub round_timeout_ms: u64,
    /// Pause unit between rounds in milliseconds
    pub round_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FailoverConfig {
    /// Backend endpoints in preference order
    pub endpoints: Vec<String>,
    pub timeout_ms: u64,
    /// Attempts per operation (defaults to twice the endpoint count)
    #[serde(default)]
    pub max_retries: Option<u32>,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Seconds between published prices
    pub interval_secs: u64,
    /// Log prices instead of submitting them
    pub dry_run: bool,
    /// Path the price is POSTed to on the current endpoint
    pub path: String,
}

impl AppConfig {
    /// Builder with every built-in default set and no external sources.
    pub fn builder() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Asset defaults
            .set_default("asset.symbol", "ETH")?
            .set_default("asset.quotes", vec!["USDT", "USDC"])?
            .set_default("asset.max_price", 10_000.0)?
            // Provider defaults
            .set_default("provider_defaults.timeout_ms", 10_000)?
            .set_default("provider_defaults.retry_attempts", 3)?
            .set_default("provider_defaults.retry_delay_ms", 1_000)?
            // Aggregator defaults
            .set_default("aggregator.max_retries", 3)?
            .set_default("aggregator.round_timeout_ms", 5_000)?
            .set_default("aggregator.round_retry_delay_ms", 2_000)?
            // Failover defaults
            .set_default("failover.endpoints", Vec::<String>::new())?
            .set_default("failover.timeout_ms", 10_000)?
            .set_default("failover.base_delay_ms", 500)?
            .set_default("failover.max_delay_ms", 5_000)?
            .set_default("failover.jitter_ms", 100)?
            // Publisher defaults
            .set_default("publisher.interval_secs", 60)?
            .set_default("publisher.dry_run", true)?
            .set_default("publisher.path", "/prices")?;
        Ok(builder)
    }

    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (ORACLE__*)
            .add_source(
                Environment::with_prefix("ORACLE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("asset.quotes")
                    .with_list_parse_key("failover.endpoints")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Built-in defaults only
    pub fn defaults() -> Result<Self> {
        Self::builder()?
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Raw `ORACLE_PROVIDERS` value, if set
    pub fn provider_override() -> Option<String> {
        std::env::var(PROVIDER_OVERRIDE_ENV).ok()
    }

    pub fn validate(&self) -> Result<()> {
        if self.asset.symbol.trim().is_empty() {
            bail!("asset.symbol must not be empty");
        }
        if !self.asset.max_price.is_finite() || self.asset.max_price <= 0.0 {
            bail!("asset.max_price must be a positive number");
        }
        if !self.publisher.dry_run && self.failover.endpoints.is_empty() {
            bail!("publisher.dry_run is false but failover.endpoints is empty");
        }
        if self.publisher.interval_secs == 0 {
            bail!("publisher.interval_secs must be at least 1");
        }
        Ok(())
    }

    pub fn tracked_asset(&self) -> Result<TrackedAsset> {
        let max_price = Decimal::from_f64(self.asset.max_price)
            .with_context(|| format!("asset.max_price {} is not representable", self.asset.max_price))?;
        Ok(TrackedAsset::new(&self.asset.symbol, self.asset.quotes.iter().cloned()).with_max_price(max_price))
    }

    /// Shared provider settings over `transport`.
    pub fn provider_settings(&self, transport: Arc<dyn HttpTransport>) -> Result<ProviderSettings> {
        let defaults = &self.provider_defaults;
        Ok(ProviderSettings::new(self.tracked_asset()?, transport)
            .with_timeout(Duration::from_millis(defaults.timeout_ms))
            .with_retry(RetryPolicy::new(
                defaults.retry_attempts,
                Duration::from_millis(defaults.retry_delay_ms),
            )))
    }

    /// Registry over the configured providers with `override_json` applied
    /// on top.
    pub fn build_registry(
        &self,
        transport: Arc<dyn HttpTransport>,
        override_json: Option<&str>,
    ) -> Result<ProviderRegistry> {
        let settings = self.provider_settings(transport)?;
        Ok(ProviderRegistry::new(settings, self.providers.clone()).with_override_json(override_json))
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            max_retries: self.aggregator.max_retries,
            round_timeout: Duration::from_millis(self.aggregator.round_timeout_ms),
            round_retry_delay: Duration::from_millis(self.aggregator.round_retry_delay_ms),
        }
    }

    pub fn failover_settings(&self) -> FailoverSettings {
        let failover = &self.failover;
        let mut settings = FailoverSettings::new(failover.endpoints.iter().cloned())
            .with_timeout(Duration::from_millis(failover.timeout_ms))
            .with_backoff(
                Duration::from_millis(failover.base_delay_ms),
                Duration::from_millis(failover.max_delay_ms),
                Duration::from_millis(failover.jitter_ms),
            );
        settings.max_retries = failover.max_retries;
        settings
    }

    /// One-line summary for startup logs
    pub fn digest(&self) -> String {
        let providers: Vec<&str> = self
            .providers
            .iter()
            .filter(|p| p.enabled)
            .map(|p| p.name.as_str())
            .collect();
        format!(
            "asset={} quotes={:?} providers={:?} rounds={} round_timeout_ms={} endpoints={} dry_run={}",
            self.asset.symbol,
            self.asset.quotes,
            providers,
            self.aggregator.max_retries,
            self.aggregator.round_timeout_ms,
            self.failover.endpoints.len(),
            self.publisher.dry_run
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
