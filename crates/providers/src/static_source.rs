//! Synthetic market source for paper runs and demos
//!
//! Spot follows a slow deterministic oscillation around each underlying's
//! reference price. Chains are priced with Black-Scholes on a mild smile,
//! with put OI stacked below spot and call OI above so the analytics have
//! something to find.

use crate::error::{ProviderError, ProviderResult};
use crate::stream::StreamControl;
use crate::traits::{HistoricalDataProvider, LiveStreamProvider, OptionsDataProvider};
use analytics::black_scholes::{black_scholes_price, time_to_expiry};
use analytics::BsInputs;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use common::{Candle, CandleInterval, OptionChain, OptionContract, OptionSnapshot, OptionType, Tick};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const STRIKES_EACH_SIDE: i64 = 10;
const BASE_VOL: f64 = 0.14;
const RATE: f64 = 0.10;
const SWING_AMPLITUDE: f64 = 0.003;

#[derive(Debug, Clone, Copy)]
struct Underlying {
    reference: f64,
    step: f64,
}

/// State shared with the spawned stream task
#[derive(Default)]
struct SyntheticMarket {
    underlyings: RwLock<HashMap<String, Underlying>>,
    /// Advances once per chain fetch
    cycle: AtomicU64,
    /// Advances once per streamed tick round
    stream_step: AtomicU64,
    legs: Mutex<HashMap<String, OptionContract>>,
    stream: StreamControl,
}

pub struct StaticProvider {
    name: String,
    market: Arc<SyntheticMarket>,
    tick_interval: Duration,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            market: Arc::new(SyntheticMarket::default()),
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn with_underlying(self, symbol: impl Into<String>, reference: f64, step: f64) -> Self {
        self.market
            .underlyings
            .write()
            .insert(symbol.into(), Underlying { reference, step });
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}

impl SyntheticMarket {
    fn underlying(&self, symbol: &str) -> ProviderResult<Underlying> {
        self.underlyings
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| ProviderError::NoData(symbol.to_string()))
    }

    fn spot_at(reference: f64, step: u64) -> f64 {
        reference * (1.0 + SWING_AMPLITUDE * (step as f64 * 0.45).sin())
    }

    fn smile_vol(spot: f64, strike: f64, option_type: OptionType) -> f64 {
        let wing = 2.0 * (strike / spot).ln().abs();
        let put_premium = if option_type == OptionType::Put { 0.01 } else { 0.0 };
        BASE_VOL * (1.0 + wing) + put_premium
    }

    /// Next two weekly (Thursday) expiries strictly after `today`
    fn expiries(today: NaiveDate) -> Vec<NaiveDate> {
        let ahead = (7 + Weekday::Thu.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64) % 7;
        let first = today + ChronoDuration::days(if ahead == 0 { 7 } else { ahead });
        vec![first, first + ChronoDuration::days(7)]
    }

    fn build_chain(&self, symbol: &str, u: Underlying, step: u64, now: DateTime<Utc>) -> OptionChain {
        let spot = Self::spot_at(u.reference, step);
        let atm = (spot / u.step).round() * u.step;
        let growth = step as f64 * 0.02;
        let mut snapshots = Vec::new();
        let mut legs = self.legs.lock();

        for (e_idx, expiry) in Self::expiries(now.date_naive()).into_iter().enumerate() {
            let t = time_to_expiry(expiry, now);
            for i in -STRIKES_EACH_SIDE..=STRIKES_EACH_SIDE {
                let strike = atm + i as f64 * u.step;
                for option_type in [OptionType::Call, OptionType::Put] {
                    let vol = Self::smile_vol(spot, strike, option_type);
                    let inputs = BsInputs {
                        spot,
                        strike,
                        time: t,
                        vol,
                        rate: RATE,
                        option_type,
                    };
                    let Some(price) = black_scholes_price(&inputs) else {
                        continue;
                    };

                    // writers crowd two steps out of the money
                    let offset = match option_type {
                        OptionType::Put => (i + 2).abs(),
                        OptionType::Call => (i - 2).abs(),
                    } as f64;
                    let base_oi = 150_000.0 / (1.0 + offset) / (1.0 + e_idx as f64);
                    let oi = (base_oi * (1.0 + growth)).round() as u64;
                    let oi_change = (base_oi * 0.02).round() as i64;

                    let contract = OptionContract::new(symbol, expiry, strike, option_type);
                    legs.insert(contract.symbol(), contract.clone());
                    snapshots.push(OptionSnapshot {
                        contract,
                        ltp: (price * 20.0).round() / 20.0,
                        oi,
                        oi_change,
                        volume: oi / 10,
                        underlying_price: spot,
                        iv: Some(vol),
                        timestamp: now,
                    });
                }
            }
        }

        OptionChain {
            underlying: symbol.to_string(),
            spot,
            timestamp: now,
            snapshots,
        }
    }

    /// Current price for an underlying or a leg symbol seen in a chain
    fn quote(&self, symbol: &str, step: u64, now: DateTime<Utc>) -> Option<f64> {
        if let Ok(u) = self.underlying(symbol) {
            return Some(Self::spot_at(u.reference, step));
        }
        let contract = self.legs.lock().get(symbol).cloned()?;
        let u = self.underlying(&contract.underlying).ok()?;
        let spot = Self::spot_at(u.reference, step);
        black_scholes_price(&BsInputs {
            spot,
            strike: contract.strike,
            time: time_to_expiry(contract.expiry, now),
            vol: Self::smile_vol(spot, contract.strike, contract.option_type),
            rate: RATE,
            option_type: contract.option_type,
        })
    }
}

#[async_trait]
impl OptionsDataProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_option_chain(&self, underlying: &str) -> ProviderResult<OptionChain> {
        let u = self.market.underlying(underlying)?;
        let step = self.market.cycle.fetch_add(1, Ordering::Relaxed);
        let chain = self.market.build_chain(underlying, u, step, Utc::now());
        debug!(provider = %self.name, underlying, legs = chain.snapshots.len(), "Synthetic chain built");
        Ok(chain)
    }

    async fn get_oi_snapshot(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        as_of: DateTime<Utc>,
    ) -> ProviderResult<Vec<OptionSnapshot>> {
        let u = self.market.underlying(underlying)?;
        let step = self.market.cycle.load(Ordering::Relaxed);
        let legs: Vec<_> = self
            .market
            .build_chain(underlying, u, step, as_of)
            .snapshots
            .into_iter()
            .filter(|s| s.contract.expiry == expiry)
            .collect();
        if legs.is_empty() {
            return Err(ProviderError::NoData(format!("{} {}", underlying, expiry)));
        }
        Ok(legs)
    }

    async fn get_expiries(&self, underlying: &str) -> ProviderResult<Vec<NaiveDate>> {
        self.market.underlying(underlying)?;
        Ok(SyntheticMarket::expiries(Utc::now().date_naive()))
    }
}

#[async_trait]
impl HistoricalDataProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_candles(&self, symbol: &str, interval: CandleInterval, count: usize) -> ProviderResult<Vec<Candle>> {
        let u = self.market.underlying(symbol)?;
        let secs = interval.as_seconds();
        let now = Utc::now().timestamp().div_euclid(secs) * secs;

        let candles = (0..count as u64)
            .filter_map(|i| {
                let open_time = DateTime::from_timestamp(now - (count as i64 - i as i64) * secs, 0)?;
                let open = SyntheticMarket::spot_at(u.reference, i.saturating_sub(1));
                let close = SyntheticMarket::spot_at(u.reference, i);
                let mut candle = Candle::open_with(symbol, interval, open_time, open, 500);
                candle.update(close, 500);
                Some(candle)
            })
            .collect();
        Ok(candles)
    }
}

#[async_trait]
impl LiveStreamProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn subscribe(&self, symbols: &[String], _interval: CandleInterval) -> ProviderResult<()> {
        self.market.stream.subscribe(symbols);
        Ok(())
    }

    async fn unsubscribe(&self, symbol: &str, _interval: CandleInterval) -> ProviderResult<()> {
        self.market.stream.unsubscribe(symbol);
        Ok(())
    }

    async fn start(&self, sink: mpsc::Sender<Tick>) -> ProviderResult<()> {
        let token = self.market.stream.begin();
        let interval = self.tick_interval;
        let market = self.market.clone();
        info!(provider = %self.name, symbols = ?market.stream.symbols(), "Synthetic stream started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let step = market.stream_step.fetch_add(1, Ordering::Relaxed);
                        let now = Utc::now();
                        for symbol in market.stream.symbols() {
                            let Some(price) = market.quote(&symbol, step, now) else {
                                continue;
                            };
                            if sink.send(Tick::new(symbol, price, 50, now)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn stop(&self) -> ProviderResult<()> {
        if self.market.stream.stop() {
            info!(provider = %self.name, "Synthetic stream stopped");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.market.stream.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticProvider {
        StaticProvider::new("static")
            .with_underlying("NIFTY", 25000.0, 50.0)
            .with_tick_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_weekly_expiries() {
        // Monday, Thursday
        let monday = NaiveDate::from_ymd_opt(2024, 10, 21).unwrap();
        let thursday = NaiveDate::from_ymd_opt(2024, 10, 24).unwrap();
        assert_eq!(SyntheticMarket::expiries(monday)[0], thursday);
        assert_eq!(SyntheticMarket::expiries(thursday)[0], NaiveDate::from_ymd_opt(2024, 10, 31).unwrap());
    }

    #[tokio::test]
    async fn test_chain_shape() {
        let provider = provider();
        let chain = provider.get_option_chain("NIFTY").await.unwrap();
        assert_eq!(chain.expiries().len(), 2);
        assert_eq!(chain.snapshots.len(), 2 * 21 * 2);
        assert!(chain.snapshots.iter().all(|s| s.ltp >= 0.0 && s.iv.is_some()));

        // heaviest put OI sits below spot, heaviest call OI above
        let front = chain.nearest_expiry().unwrap();
        let max_oi = |t: OptionType| {
            chain
                .for_expiry(front)
                .filter(|s| s.contract.option_type == t)
                .max_by_key(|s| s.oi)
                .map(|s| s.contract.strike)
                .unwrap()
        };
        assert!(max_oi(OptionType::Put) < chain.spot);
        assert!(max_oi(OptionType::Call) > chain.spot);

        let expiry = provider.get_expiries("NIFTY").await.unwrap()[0];
        let legs = provider.get_oi_snapshot("NIFTY", expiry, Utc::now()).await.unwrap();
        assert_eq!(legs.len(), 42);
        assert!(provider.get_option_chain("SENSEX").await.is_err());
    }

    #[tokio::test]
    async fn test_candles() {
        let candles = provider().get_candles("NIFTY", CandleInterval::OneMinute, 30).await.unwrap();
        assert_eq!(candles.len(), 30);
        assert!(candles.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }

    #[tokio::test]
    async fn test_stream_quotes_underlying_and_legs() {
        let provider = provider();
        let chain = provider.get_option_chain("NIFTY").await.unwrap();
        let leg = chain.snapshots[0].contract.symbol();

        let (tx, mut rx) = mpsc::channel(16);
        provider
            .subscribe(&["NIFTY".to_string(), leg.clone(), "UNKNOWN".to_string()], CandleInterval::OneMinute)
            .await
            .unwrap();
        provider.start(tx).await.unwrap();
        assert!(provider.is_connected());

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let tick = rx.recv().await.unwrap();
            seen.push(tick.symbol);
        }
        assert!(seen.contains(&"NIFTY".to_string()));
        assert!(seen.contains(&leg));

        provider.stop().await.unwrap();
        assert!(!provider.is_connected());
    }
}
