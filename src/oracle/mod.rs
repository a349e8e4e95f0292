//! Oracle module - Multi-exchange price aggregation
//!
//! Fetches the tracked asset's price from Binance, Bybit, Coinbase, Kraken
//! and OKX over REST, validates each value and combines the survivors into
//! one price rounded to three decimals.

mod aggregator;
pub mod http;
pub mod registry;
pub mod retry;
pub mod sources;
pub mod validator;

pub use aggregator::{
    combine, AggregatorSettings, CombineMethod, CombinedPrice, PriceAggregator, RoundReport,
};
pub use registry::{ActiveProvider, ProviderDescriptor, ProviderFactory, ProviderRegistry};
pub use sources::{PriceProvider, ProviderSettings};
pub use validator::PriceValidator;
