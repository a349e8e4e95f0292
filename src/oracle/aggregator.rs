//! Oracle Aggregator - Combines prices from every active exchange
//!
//! One round queries all active providers concurrently under a shared
//! deadline. Successful prices are combined with a plain mean, or with a
//! weighted mean as soon as any provider carries a weight other than 1.0.
//! Rounds with no usable price are retried with a growing pause.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::{timeout_at, Instant};

use crate::error::{AggregationKind, ConfigKind, ErrorContext, OracleError, Result};
use crate::oracle::registry::{ActiveProvider, ProviderRegistry};
use crate::types::{mean, round_price, ExchangePrice, WeightedExchangePrice};

/// Round-level retry and deadline settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorSettings {
    /// Total rounds, including the first
    pub max_retries: u32,
    /// Deadline for one round
    pub round_timeout: Duration,
    /// Pause after round `n` is `round_retry_delay * n`
    pub round_retry_delay: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            round_timeout: Duration::from_millis(5_000),
            round_retry_delay: Duration::from_millis(2_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMethod {
    Mean,
    WeightedMean,
}

/// Result of combining one round's successful prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedPrice {
    pub price: Decimal,
    pub method: CombineMethod,
    pub components: Vec<WeightedExchangePrice>,
}

/// Everything observed during one round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    /// One entry per provider, in registry order
    pub prices: Vec<ExchangePrice>,
    /// At least one provider had not settled when the deadline passed
    pub deadline_hit: bool,
    pub elapsed: Duration,
}

impl RoundReport {
    pub fn successes(&self) -> usize {
        self.prices.iter().filter(|p| p.success).count()
    }
}

/// Combine successful prices into one rounded value.
///
/// Uses the weighted mean when any weight differs from 1.0, the plain mean
/// otherwise. Failed entries are ignored. Rounding happens once, on the
/// final value.
pub fn combine(prices: Vec<WeightedExchangePrice>) -> Result<CombinedPrice> {
    let mut components: Vec<WeightedExchangePrice> = prices
        .into_iter()
        .filter(|p| p.entry.success && p.entry.price.is_some())
        .collect();

    let context = || ErrorContext::new("combine_prices");
    let zero_weight = || {
        OracleError::aggregation(
            AggregationKind::ZeroWeight,
            "total weight of successful providers is zero",
            context(),
        )
    };

    if components.is_empty() {
        return Err(OracleError::aggregation(
            AggregationKind::NoPrices,
            "no successful provider prices to combine",
            context(),
        ));
    }

    let values: Vec<Decimal> = components.iter().filter_map(|p| p.entry.price).collect();
    let weighted = components.iter().any(|p| p.weight != 1.0);

    if !weighted {
        let avg = mean(&values).ok_or_else(zero_weight)?;
        return Ok(CombinedPrice {
            price: round_price(avg),
            method: CombineMethod::Mean,
            components,
        });
    }

    let total_weight: f64 = components.iter().map(|p| p.weight).sum();
    let total = Decimal::from_f64(total_weight).ok_or_else(zero_weight)?;
    if total.is_zero() {
        return Err(zero_weight());
    }

    let mut weighted_sum = Decimal::ZERO;
    for (price, component) in values.iter().zip(&components) {
        let weight = Decimal::from_f64(component.weight).ok_or_else(zero_weight)?;
        weighted_sum += *price * weight;
    }
    for component in &mut components {
        component.normalized_weight = Some(component.weight / total_weight);
    }

    Ok(CombinedPrice {
        price: round_price(weighted_sum / total),
        method: CombineMethod::WeightedMean,
        components,
    })
}

/// Orchestrates rounds over the registry's active providers.
pub struct PriceAggregator {
    registry: Arc<ProviderRegistry>,
    settings: AggregatorSettings,
}

impl PriceAggregator {
    pub fn new(registry: Arc<ProviderRegistry>, settings: AggregatorSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn settings(&self) -> AggregatorSettings {
        self.settings
    }

    /// Query every provider once, concurrently, under the round deadline.
    ///
    /// Each fetch runs as its own task, so one provider can neither block
    /// nor cancel another. Tasks still running at the deadline are left to
    /// finish in the background; the round simply stops waiting for them.
    pub async fn run_round(&self, providers: &[ActiveProvider]) -> RoundReport {
        let started = Instant::now();
        let deadline = started + self.settings.round_timeout;

        let handles: Vec<_> = providers
            .iter()
            .map(|active| {
                let provider = Arc::clone(&active.provider);
                tokio::spawn(async move { provider.get_price().await })
            })
            .collect();

        let mut prices = Vec::with_capacity(providers.len());
        let mut deadline_hit = false;
        for (active, handle) in providers.iter().zip(handles) {
            let exchange = active.provider.exchange_name().to_string();
            let entry = match timeout_at(deadline, handle).await {
                Ok(Ok(Ok(price))) => ExchangePrice::ok(exchange, price),
                Ok(Ok(Err(e))) => ExchangePrice::failed(exchange, e.to_string()),
                Ok(Err(join_error)) => {
                    ExchangePrice::failed(exchange, format!("price task failed: {}", join_error))
                }
                Err(_) => {
                    deadline_hit = true;
                    ExchangePrice::failed(
                        exchange,
                        format!(
                            "did not respond within {}ms",
                            self.settings.round_timeout.as_millis()
                        ),
                    )
                }
            };
            prices.push(entry);
        }

        RoundReport {
            prices,
            deadline_hit,
            elapsed: started.elapsed(),
        }
    }

    /// Aggregated, rounded price across all active providers.
    pub async fn get_aggregated_price(&self) -> Result<Decimal> {
        let providers = self.registry.active_providers();
        if providers.is_empty() {
            return Err(OracleError::configuration(
                ConfigKind::NoProviders,
                "no usable price providers are configured",
                ErrorContext::new("get_aggregated_price"),
            ));
        }

        let rounds = self.settings.max_retries.max(1);
        for round in 1..=rounds {
            let report = self.run_round(&providers).await;

            if report.deadline_hit {
                tracing::warn!(
                    round,
                    settled = report.successes(),
                    timeout_ms = self.settings.round_timeout.as_millis() as u64,
                    "Price round hit its deadline"
                );
            } else if report.successes() > 0 {
                let weighted = report
                    .prices
                    .into_iter()
                    .zip(&providers)
                    .map(|(entry, active)| WeightedExchangePrice::new(entry, active.weight))
                    .collect();
                let combined = combine(weighted)?;
                tracing::info!(
                    round,
                    price = %combined.price,
                    method = ?combined.method,
                    sources = combined.components.len(),
                    providers = providers.len(),
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Aggregated price"
                );
                return Ok(combined.price);
            } else {
                tracing::warn!(round, providers = providers.len(), "No provider returned a price");
            }

            if round < rounds {
                let delay = self.settings.round_retry_delay.saturating_mul(round);
                tracing::info!(round, delay_ms = delay.as_millis() as u64, "Retrying price round");
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(rounds, "Price aggregation failed, rounds exhausted");
        Err(OracleError::aggregation(
            AggregationKind::RoundsExhausted,
            format!(
                "failed to aggregate a price after {} attempts: no provider returned a valid price",
                rounds
            ),
            ErrorContext::new("get_aggregated_price"),
        ))
    }

    /// Per-provider outcomes of one round, for diagnostics.
    ///
    /// Never fails: providers that cannot be built, that fail, or that miss
    /// the deadline show up as failed entries.
    pub async fn get_detailed_prices(&self) -> Vec<ExchangePrice> {
        let mut providers = Vec::new();
        let mut unavailable = Vec::new();
        for descriptor in self.registry.descriptors().filter(|d| d.enabled) {
            match self.registry.get_provider(&descriptor.name) {
                Ok(provider) => providers.push(ActiveProvider {
                    name: descriptor.name.clone(),
                    weight: descriptor.weight,
                    provider,
                }),
                Err(e) => unavailable.push(ExchangePrice::failed(descriptor.name.clone(), e.to_string())),
            }
        }

        let mut prices = self.run_round(&providers).await.prices;
        prices.extend(unavailable);
        prices
    }
}
