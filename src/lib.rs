//! Oracle Feeder Library
//!
//! Multi-exchange price aggregation and resilient backend endpoint failover

pub mod config;
pub mod error;
pub mod failover;
pub mod oracle;
pub mod types;

pub use error::{ErrorCode, OracleError, Result};
pub use types::{ExchangePrice, TrackedAsset, WeightedExchangePrice};
