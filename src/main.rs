//! Oracle feeder CLI
//!
//! | Command | Description |
//! |---------|-------------|
//! | `price` | Print one aggregated price |
//! | `detailed` | Print per-exchange outcomes as JSON |
//! | `run` | Aggregate and publish on an interval until Ctrl-C |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use oracle_feeder::config::AppConfig;
use oracle_feeder::failover::http::{HttpConnector, HttpEndpoint};
use oracle_feeder::failover::FailoverClient;
use oracle_feeder::oracle::http::ReqwestTransport;
use oracle_feeder::oracle::PriceAggregator;

#[derive(Debug, Parser)]
#[command(
    name = "oracle-feeder",
    version,
    about = "Aggregate exchange prices and publish them to a backend"
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch and print one aggregated price
    Price,
    /// Print every provider's outcome for one round
    Detailed {
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Publish a price every `publisher.interval_secs` until interrupted
    Run,
}

fn init_tracing(json_logs: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json_logs {
        registry.with(fmt::layer().json().with_current_span(false)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = AppConfig::load()?;
    tracing::info!(config = %config.digest(), "Configuration loaded");

    let transport = Arc::new(ReqwestTransport::new().context("Failed to build HTTP client")?);
    let registry = config.build_registry(transport, AppConfig::provider_override().as_deref())?;
    let aggregator = PriceAggregator::new(Arc::new(registry), config.aggregator_settings());

    match cli.command {
        Command::Price => {
            let price = aggregator.get_aggregated_price().await?;
            println!("{}", price);
        }
        Command::Detailed { pretty } => {
            let prices = aggregator.get_detailed_prices().await;
            let output = if pretty {
                serde_json::to_string_pretty(&prices)?
            } else {
                serde_json::to_string(&prices)?
            };
            println!("{}", output);
        }
        Command::Run => run(&config, &aggregator).await?,
    }

    Ok(())
}

async fn run(config: &AppConfig, aggregator: &PriceAggregator) -> Result<()> {
    let mut publisher = if config.publisher.dry_run {
        tracing::warn!("Dry run: prices will be logged, not submitted");
        None
    } else {
        let client = reqwest::Client::builder()
            .user_agent(concat!("oracle-feeder/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build publisher HTTP client")?;
        let mut failover = FailoverClient::new(HttpConnector::new(client), config.failover_settings());
        failover
            .initialize()
            .await
            .context("Failed to connect to any backend endpoint")?;
        Some(failover)
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(config.publisher.interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {}
        }

        let price = match aggregator.get_aggregated_price().await {
            Ok(price) => price,
            Err(e) => {
                tracing::error!(code = %e.code(), error = %e, "Price aggregation failed");
                continue;
            }
        };

        match publisher.as_mut() {
            None => tracing::info!(asset = %config.asset.symbol, price = %price, "Price (dry run)"),
            Some(client) => publish(client, config, price).await,
        }
    }

    Ok(())
}

async fn publish(client: &mut FailoverClient<HttpConnector>, config: &AppConfig, price: Decimal) {
    let payload = json!({
        "asset": config.asset.symbol,
        "price": price,
        "timestamp": Utc::now().to_rfc3339(),
    });
    let path = config.publisher.path.as_str();

    let result = client
        .execute("publish_price", |endpoint: HttpEndpoint| {
            let payload = payload.clone();
            async move { endpoint.post_json::<_, Value>(path, &payload).await }
        })
        .await;

    match result {
        Ok(_) => tracing::info!(
            asset = %config.asset.symbol,
            price = %price,
            endpoint = client.current_endpoint().unwrap_or("-"),
            "Price published"
        ),
        Err(e) => tracing::error!(
            asset = %config.asset.symbol,
            price = %price,
            error = %e,
            "Failed to publish price"
        ),
    }
}
