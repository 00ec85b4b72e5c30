//! Replays recorded chains, ticks and candles from a JSON fixture

use crate::error::{ProviderError, ProviderResult};
use crate::stream::StreamControl;
use crate::traits::{HistoricalDataProvider, LiveStreamProvider, OptionsDataProvider};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{Candle, CandleInterval, OptionChain, OptionSnapshot, Tick};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// On-disk fixture layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayFixture {
    pub chains: Vec<OptionChain>,
    #[serde(default)]
    pub ticks: Vec<Tick>,
    #[serde(default)]
    pub candles: Vec<Candle>,
}

impl ReplayFixture {
    pub fn load(path: impl AsRef<Path>) -> common::Result<Self> {
        common::error::load_json(path.as_ref())
    }
}

struct ReplayData {
    fixture: ReplayFixture,
    stream: StreamControl,
}

/// Serves each recorded chain once, in order, then reports no data so the
/// registry falls through to the next source.
pub struct ReplayProvider {
    name: String,
    data: Arc<ReplayData>,
    cursors: Mutex<HashMap<String, usize>>,
    pace: Duration,
}

impl ReplayProvider {
    pub fn new(name: impl Into<String>, mut fixture: ReplayFixture) -> Self {
        fixture.chains.sort_by_key(|c| c.timestamp);
        fixture.ticks.sort_by_key(|t| t.timestamp);
        fixture.candles.sort_by_key(|c| c.open_time);
        Self {
            name: name.into(),
            data: Arc::new(ReplayData {
                fixture,
                stream: StreamControl::default(),
            }),
            cursors: Mutex::new(HashMap::new()),
            pace: Duration::ZERO,
        }
    }

    pub fn from_path(name: impl Into<String>, path: impl AsRef<Path>) -> ProviderResult<Self> {
        let fixture = ReplayFixture::load(path)?;
        Ok(Self::new(name, fixture))
    }

    /// Delay between streamed ticks
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }

    fn chains_for<'a>(&'a self, underlying: &'a str) -> impl Iterator<Item = &'a OptionChain> + 'a {
        self.data.fixture.chains.iter().filter(move |c| c.underlying == underlying)
    }

    /// Chains not yet served for an underlying
    pub fn remaining(&self, underlying: &str) -> usize {
        let served = self.cursors.lock().get(underlying).copied().unwrap_or(0);
        self.chains_for(underlying).count().saturating_sub(served)
    }
}

#[async_trait]
impl OptionsDataProvider for ReplayProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_option_chain(&self, underlying: &str) -> ProviderResult<OptionChain> {
        let mut cursors = self.cursors.lock();
        let cursor = cursors.entry(underlying.to_string()).or_insert(0);
        let chain = self
            .chains_for(underlying)
            .nth(*cursor)
            .cloned()
            .ok_or_else(|| ProviderError::NoData(format!("{} (replay exhausted)", underlying)))?;
        *cursor += 1;
        Ok(chain)
    }

    async fn get_oi_snapshot(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        as_of: DateTime<Utc>,
    ) -> ProviderResult<Vec<OptionSnapshot>> {
        self.chains_for(underlying)
            .filter(|c| c.timestamp <= as_of)
            .last()
            .map(|c| c.for_expiry(expiry).cloned().collect::<Vec<_>>())
            .filter(|legs| !legs.is_empty())
            .ok_or_else(|| ProviderError::NoData(format!("{} {} as of {}", underlying, expiry, as_of)))
    }

    async fn get_expiries(&self, underlying: &str) -> ProviderResult<Vec<NaiveDate>> {
        let expiries: BTreeSet<NaiveDate> = self
            .chains_for(underlying)
            .flat_map(|c| c.snapshots.iter().map(|s| s.contract.expiry))
            .collect();
        if expiries.is_empty() {
            return Err(ProviderError::NoData(underlying.to_string()));
        }
        Ok(expiries.into_iter().collect())
    }
}

#[async_trait]
impl HistoricalDataProvider for ReplayProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_candles(&self, symbol: &str, interval: CandleInterval, count: usize) -> ProviderResult<Vec<Candle>> {
        let matching: Vec<Candle> = self
            .data
            .fixture
            .candles
            .iter()
            .filter(|c| c.symbol == symbol && c.interval == interval)
            .cloned()
            .collect();
        if matching.is_empty() {
            return Err(ProviderError::NoData(format!("{} {}", symbol, interval.as_str())));
        }
        let skip = matching.len().saturating_sub(count);
        Ok(matching.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl LiveStreamProvider for ReplayProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, symbols: &[String], _interval: CandleInterval) -> ProviderResult<()> {
        self.data.stream.subscribe(symbols);
        Ok(())
    }

    async fn unsubscribe(&self, symbol: &str, _interval: CandleInterval) -> ProviderResult<()> {
        self.data.stream.unsubscribe(symbol);
        Ok(())
    }

    async fn start(&self, sink: mpsc::Sender<Tick>) -> ProviderResult<()> {
        if self.data.fixture.ticks.is_empty() {
            return Err(ProviderError::NoData("replay fixture has no ticks".into()));
        }
        let token = self.data.stream.begin();
        let data = self.data.clone();
        let pace = self.pace;
        info!(provider = %self.name, ticks = data.fixture.ticks.len(), "Replay stream started");

        tokio::spawn(async move {
            for tick in &data.fixture.ticks {
                if token.is_cancelled() {
                    break;
                }
                if !data.stream.is_subscribed(&tick.symbol) {
                    continue;
                }
                if sink.send(tick.clone()).await.is_err() {
                    break;
                }
                if !pace.is_zero() {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(pace) => {}
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> ProviderResult<()> {
        self.data.stream.stop();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.data.stream.is_running()
    }
}
