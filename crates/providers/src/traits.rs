//! Capability traits for external market data sources
//!
//! A source implements whichever capabilities it can serve; the registry
//! holds each capability separately so one source can be primary for
//! chains and a fallback for candles.

use crate::error::ProviderResult;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{Candle, CandleInterval, OptionChain, OptionSnapshot, Tick};
use tokio::sync::mpsc;

/// Real-time tick stream
#[async_trait]
pub trait LiveStreamProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn subscribe(&self, symbols: &[String], interval: CandleInterval) -> ProviderResult<()>;

    async fn unsubscribe(&self, symbol: &str, interval: CandleInterval) -> ProviderResult<()>;

    /// Begin delivering ticks for subscribed symbols into `sink`
    async fn start(&self, sink: mpsc::Sender<Tick>) -> ProviderResult<()>;

    async fn stop(&self) -> ProviderResult<()>;

    fn is_connected(&self) -> bool;
}

/// Option chain and open-interest snapshots
#[async_trait]
pub trait OptionsDataProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_option_chain(&self, underlying: &str) -> ProviderResult<OptionChain>;

    /// Legs of one expiry as they stood at `as_of`
    async fn get_oi_snapshot(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        as_of: DateTime<Utc>,
    ) -> ProviderResult<Vec<OptionSnapshot>>;

    async fn get_expiries(&self, underlying: &str) -> ProviderResult<Vec<NaiveDate>>;
}

/// Historical OHLCV bars
#[async_trait]
pub trait HistoricalDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Most recent `count` bars, oldest first
    async fn get_candles(&self, symbol: &str, interval: CandleInterval, count: usize) -> ProviderResult<Vec<Candle>>;
}
