use crate::black_scholes::{GreeksEngine, GreeksEngineConfig};
use crate::candles::CandleBuilder;
use crate::error::AnalyticsError;
use crate::iv::{IvAnalysis, IvAnalyzer, IvAnalyzerConfig};
use crate::levels::{LevelDetector, LevelDetectorConfig, LevelInputs, SupportResistanceLevel};
use crate::oi_buildup::{BuildupClassifierConfig, BuildupSummary, OiBuildupClassifier, OiBuildupRecord};
use crate::pcr::{PcrPoint, PcrTracker, DEFAULT_NEAR_STRIKES, DEFAULT_PCR_HISTORY};
use crate::strategy::{recommend, MarketView, Recommendation, Strategy, StrategyBuilder};
use crate::surface::VolSurface;
use crate::tick_buffer::TickBuffer;
use crate::types::GreeksResult;
use common::{Candle, CandleInterval, OptionChain, OptionContract, Sentiment, Tick};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Latest chain together with its per-leg pricing
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedChain {
    pub chain: OptionChain,
    pub greeks: Vec<GreeksResult>,
}

/// What one chain ingestion produced
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub underlying: String,
    pub legs: usize,
    pub priced: usize,
    pub low_confidence: usize,
    pub representative_iv: Option<f64>,
    pub buildup: Option<BuildupSummary>,
    pub pcr: Option<PcrPoint>,
    pub levels: usize,
}

/// Owns every analytics component and serializes access per component.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct AnalyticsCoordinator {
    greeks: Arc<GreeksEngine>,
    iv: Arc<RwLock<IvAnalyzer>>,
    buildup: Arc<RwLock<OiBuildupClassifier>>,
    levels: Arc<RwLock<LevelDetector>>,
    pcr: Arc<RwLock<PcrTracker>>,
    ticks: Arc<RwLock<HashMap<String, TickBuffer>>>,
    candles: Arc<RwLock<CandleBuilder>>,
    chains: Arc<RwLock<HashMap<String, EnrichedChain>>>,
    tick_capacity: usize,
    skew_distance: f64,
}

impl Default for AnalyticsCoordinator {
    fn default() -> Self {
        Self::from_config(&config::generate_default_config())
    }
}

impl AnalyticsCoordinator {
    pub fn from_config(config: &config::MasterConfig) -> Self {
        let iv_config = IvAnalyzerConfig::from(&config.iv);
        let skew_distance = iv_config.skew_moneyness;
        Self {
            greeks: Arc::new(GreeksEngine::new(GreeksEngineConfig::from(&config.greeks))),
            iv: Arc::new(RwLock::new(IvAnalyzer::new(iv_config))),
            buildup: Arc::new(RwLock::new(OiBuildupClassifier::new(BuildupClassifierConfig::from(
                &config.buildup,
            )))),
            levels: Arc::new(RwLock::new(LevelDetector::new(LevelDetectorConfig::from(&config.levels)))),
            pcr: Arc::new(RwLock::new(PcrTracker::new(DEFAULT_PCR_HISTORY, DEFAULT_NEAR_STRIKES))),
            ticks: Arc::new(RwLock::new(HashMap::new())),
            candles: Arc::new(RwLock::new(CandleBuilder::default())),
            chains: Arc::new(RwLock::new(HashMap::new())),
            tick_capacity: config.scalper.tick_buffer.max(1),
            skew_distance,
        }
    }

    pub fn greeks_engine(&self) -> &GreeksEngine {
        &self.greeks
    }

    /// Run every chain-driven component over a fresh snapshot
    #[instrument(skip(self, chain), fields(underlying = %chain.underlying))]
    pub async fn ingest_chain(&self, chain: OptionChain) -> Result<CycleReport, AnalyticsError> {
        if chain.snapshots.is_empty() {
            return Err(AnalyticsError::EmptyChain(chain.underlying));
        }

        let greeks = self.greeks.enrich_chain(&chain);
        let low_confidence = greeks.iter().filter(|g| g.is_low_confidence()).count();
        let surface = VolSurface::from_results(&chain.underlying, chain.spot, chain.timestamp, &greeks);
        let representative_iv = surface.representative_iv();

        {
            let mut iv = self.iv.write().await;
            if let Some(value) = representative_iv {
                if let Err(e) = iv.record(&chain.underlying, value, chain.timestamp.date_naive()) {
                    warn!(error = %e, "IV history not updated");
                }
            }
            if !surface.is_empty() {
                iv.update_surface(surface);
            }
        }

        let buildup = self.buildup.write().await.ingest_chain(&chain);
        let pcr = self.pcr.write().await.record(&chain);
        let levels = self.refresh_levels(&chain.underlying, chain.spot, Some(&chain)).await.len();

        let report = CycleReport {
            underlying: chain.underlying.clone(),
            legs: chain.snapshots.len(),
            priced: greeks.len(),
            low_confidence,
            representative_iv,
            buildup,
            pcr,
            levels,
        };

        debug!(
            legs = report.legs,
            priced = report.priced,
            low_confidence = report.low_confidence,
            levels = report.levels,
            "Chain ingested"
        );

        self.chains
            .write()
            .await
            .insert(chain.underlying.clone(), EnrichedChain { chain, greeks });
        Ok(report)
    }

    /// Record a tick. The first tick of a new trading date restarts the
    /// symbol's VWAP and drops its bars from earlier sessions.
    pub async fn on_tick(&self, tick: Tick) {
        let rolled = {
            let mut ticks = self.ticks.write().await;
            let buffer = ticks
                .entry(tick.symbol.clone())
                .or_insert_with(|| TickBuffer::new(self.tick_capacity));
            if buffer.session().is_some_and(|current| tick.trading_date() < current) {
                debug!(symbol = %tick.symbol, "Dropping tick from a finished session");
                return;
            }
            buffer.push(tick.clone())
        };

        let mut candles = self.candles.write().await;
        if rolled {
            debug!(symbol = %tick.symbol, session = %tick.trading_date(), "New session");
            candles.retain_from(&tick.symbol, tick.trading_date());
        }
        candles.add_tick(&tick);
    }

    /// Seed bar history, typically from a historical provider
    pub async fn seed_candles(&self, candles: Vec<Candle>) {
        self.candles.write().await.seed(candles);
    }

    /// Recompute levels from the latest bars, trades and (optionally) chain
    pub async fn refresh_levels(
        &self,
        underlying: &str,
        spot: f64,
        chain: Option<&OptionChain>,
    ) -> Vec<SupportResistanceLevel> {
        let closes = self.candles.read().await.closes(underlying, CandleInterval::OneMinute);
        let trades = self
            .ticks
            .read()
            .await
            .get(underlying)
            .map(|b| b.trades())
            .unwrap_or_default();

        self.levels.write().await.refresh(
            underlying,
            LevelInputs {
                spot,
                chain,
                closes: &closes,
                trades: &trades,
            },
        )
    }

    pub async fn greeks_for(&self, contract: &OptionContract) -> Option<GreeksResult> {
        let chains = self.chains.read().await;
        chains
            .get(&contract.underlying)?
            .greeks
            .iter()
            .find(|g| &g.contract == contract)
            .cloned()
    }

    pub async fn enriched_chain(&self, underlying: &str) -> Option<EnrichedChain> {
        self.chains.read().await.get(underlying).cloned()
    }

    pub async fn spot(&self, underlying: &str) -> Option<f64> {
        if let Some(price) = self.last_price(underlying).await {
            return Some(price);
        }
        self.chains.read().await.get(underlying).map(|c| c.chain.spot)
    }

    pub async fn last_price(&self, symbol: &str) -> Option<f64> {
        self.ticks.read().await.get(symbol).and_then(|b| b.last_price())
    }

    pub async fn vwap(&self, symbol: &str) -> Option<f64> {
        self.ticks.read().await.get(symbol).and_then(|b| b.vwap())
    }

    pub async fn candles(&self, symbol: &str, interval: CandleInterval, limit: usize) -> Vec<Candle> {
        self.candles.read().await.candles(symbol, interval, limit)
    }

    pub async fn buildup_summary(&self, underlying: &str) -> Option<BuildupSummary> {
        self.buildup.read().await.summary(underlying).cloned()
    }

    pub async fn buildup_records(&self, underlying: &str) -> Vec<OiBuildupRecord> {
        self.buildup.read().await.records(underlying).to_vec()
    }

    pub async fn iv_analysis(&self, underlying: &str) -> IvAnalysis {
        self.iv.read().await.analysis(underlying)
    }

    pub fn skew_distance(&self) -> f64 {
        self.skew_distance
    }

    pub async fn support_resistance(&self, underlying: &str) -> Vec<SupportResistanceLevel> {
        self.levels.read().await.levels(underlying)
    }

    pub async fn touching_level(&self, underlying: &str, price: f64, tolerance: f64) -> Option<SupportResistanceLevel> {
        self.levels.read().await.touching(underlying, price, tolerance)
    }

    pub async fn pcr_history(&self, underlying: &str) -> Vec<PcrPoint> {
        self.pcr.read().await.history(underlying)
    }

    pub async fn latest_pcr(&self, underlying: &str) -> Option<PcrPoint> {
        self.pcr.read().await.latest(underlying)
    }

    pub async fn pcr_trend(&self, underlying: &str) -> Sentiment {
        self.pcr.read().await.trend(underlying)
    }

    /// Build a strategy against the latest chain for `underlying`
    pub async fn build_strategy<F>(&self, underlying: &str, build: F) -> Result<Strategy, AnalyticsError>
    where
        F: FnOnce(&StrategyBuilder<'_>) -> Result<Strategy, AnalyticsError>,
    {
        let chains = self.chains.read().await;
        let enriched = chains
            .get(underlying)
            .ok_or_else(|| AnalyticsError::InvalidInput(format!("no chain for {}", underlying)))?;
        build(&StrategyBuilder::new(&enriched.chain, &self.greeks))
    }

    /// Strategy ideas from the current sentiment and IV rank
    pub async fn recommend_strategies(&self, underlying: &str) -> Vec<Recommendation> {
        let view = MarketView::from(self.sentiment(underlying).await);
        let rank = self.iv_analysis(underlying).await.rank;
        recommend(view, rank)
    }

    /// Buildup verdict combined with the PCR trend
    pub async fn sentiment(&self, underlying: &str) -> Sentiment {
        let verdict = self
            .buildup
            .read()
            .await
            .summary(underlying)
            .map(|s| s.verdict)
            .unwrap_or_default();
        verdict.combine(self.pcr_trend(underlying).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::black_scholes::{black_scholes_price, time_to_expiry};
    use crate::strategy::Side;
    use crate::types::BsInputs;
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use common::{OptionSnapshot, OptionType};

    fn expiry() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 31).unwrap()
    }

    fn chain(spot: f64, minutes: i64, oi_shift: i64) -> OptionChain {
        let timestamp = Utc.with_ymd_and_hms(2024, 10, 21, 4, 0, 0).unwrap() + Duration::minutes(minutes);
        let t = time_to_expiry(expiry(), timestamp);
        let mut snapshots = Vec::new();
        for strike in [24800.0, 24900.0, 25000.0, 25100.0, 25200.0] {
            for option_type in [OptionType::Call, OptionType::Put] {
                let inputs = BsInputs {
                    spot,
                    strike,
                    time: t,
                    vol: 0.15,
                    rate: 0.10,
                    option_type,
                };
                let base_oi: i64 = if option_type == OptionType::Put && strike == 24800.0 { 90_000 } else { 20_000 };
                let oi = (base_oi + oi_shift).max(0);
                snapshots.push(OptionSnapshot {
                    contract: OptionContract::new("NIFTY", expiry(), strike, option_type),
                    ltp: black_scholes_price(&inputs).unwrap(),
                    oi: oi as u64,
                    oi_change: oi_shift,
                    volume: 1000,
                    underlying_price: spot,
                    iv: None,
                    timestamp,
                });
            }
        }
        OptionChain {
            underlying: "NIFTY".into(),
            spot,
            timestamp,
            snapshots,
        }
    }

    #[tokio::test]
    async fn test_ingest_chain_populates_queries() {
        let coordinator = AnalyticsCoordinator::default();
        let report = coordinator.ingest_chain(chain(25000.0, 0, 0)).await.unwrap();

        assert_eq!(report.legs, 10);
        assert_eq!(report.priced, 10);
        assert_eq!(report.low_confidence, 0);
        assert!((report.representative_iv.unwrap() - 0.15).abs() < 1e-3);
        assert!(report.buildup.is_none());

        let contract = OptionContract::new("NIFTY", expiry(), 25000.0, OptionType::Call);
        let greeks = coordinator.greeks_for(&contract).await.unwrap();
        assert!(greeks.delta() > 0.4 && greeks.delta() < 0.7);

        let support = coordinator.support_resistance("NIFTY").await;
        assert!(support.iter().any(|l| l.price == 24800.0));
        assert_eq!(coordinator.iv_analysis("NIFTY").await.history_len, 1);
        assert_eq!(coordinator.pcr_history("NIFTY").await.len(), 1);
    }

    #[tokio::test]
    async fn test_sentiment_from_buildup_and_pcr() {
        let coordinator = AnalyticsCoordinator::default();
        coordinator.ingest_chain(chain(25000.0, 0, 0)).await.unwrap();
        // OI added everywhere while price rises: calls and puts both long buildup
        let report = coordinator.ingest_chain(chain(25060.0, 5, 5_000)).await.unwrap();

        let summary = report.buildup.unwrap();
        assert_eq!(summary.verdict, Sentiment::Bullish);
        assert_eq!(coordinator.buildup_records("NIFTY").await.len(), 10);
        // A uniform OI shift dilutes the heavy put strike, so PCR falls and
        // the two reads disagree
        assert_eq!(coordinator.pcr_trend("NIFTY").await, Sentiment::Bearish);
        assert_eq!(coordinator.sentiment("NIFTY").await, Sentiment::Neutral);
    }

    #[tokio::test]
    async fn test_empty_chain_rejected() {
        let coordinator = AnalyticsCoordinator::default();
        let mut empty = chain(25000.0, 0, 0);
        empty.snapshots.clear();
        assert!(matches!(
            coordinator.ingest_chain(empty).await,
            Err(AnalyticsError::EmptyChain(_))
        ));
    }

    #[tokio::test]
    async fn test_ticks_feed_vwap_and_spot() {
        let coordinator = AnalyticsCoordinator::default();
        assert_eq!(coordinator.spot("NIFTY").await, None);
        let now = Utc.with_ymd_and_hms(2024, 10, 21, 4, 0, 0).unwrap();
        coordinator.on_tick(Tick::new("NIFTY", 25000.0, 10, now)).await;
        coordinator.on_tick(Tick::new("NIFTY", 25010.0, 30, now)).await;
        assert_eq!(coordinator.spot("NIFTY").await, Some(25010.0));
        assert!((coordinator.vwap("NIFTY").await.unwrap() - 25007.5).abs() < 1e-9);
        assert_eq!(coordinator.candles("NIFTY", CandleInterval::OneMinute, 0).await.len(), 1);
    }

    #[tokio::test]
    async fn test_two_sessions_reset_vwap_and_bars() {
        let coordinator = AnalyticsCoordinator::default();
        let day_one = Utc.with_ymd_and_hms(2024, 10, 21, 4, 0, 0).unwrap();
        for minute in 0..3 {
            let at = day_one + Duration::minutes(minute);
            coordinator.on_tick(Tick::new("NIFTY", 25000.0, 100, at)).await;
        }
        coordinator.on_tick(Tick::new("BANKNIFTY", 52000.0, 1, day_one)).await;
        assert_eq!(coordinator.candles("NIFTY", CandleInterval::OneMinute, 0).await.len(), 3);

        let day_two = day_one + Duration::days(1);
        coordinator.on_tick(Tick::new("NIFTY", 25300.0, 10, day_two)).await;

        assert_eq!(coordinator.vwap("NIFTY").await, Some(25300.0));
        let bars = coordinator.candles("NIFTY", CandleInterval::OneMinute, 0).await;
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, 25300.0);
        assert_eq!(coordinator.vwap("BANKNIFTY").await, Some(52000.0));
    }

    #[tokio::test]
    async fn test_strategy_from_latest_chain() {
        let coordinator = AnalyticsCoordinator::default();
        let straddle = |b: &StrategyBuilder<'_>| b.straddle(expiry(), 25000.0, Side::Long, 1);
        assert!(coordinator.build_strategy("NIFTY", straddle).await.is_err());

        coordinator.ingest_chain(chain(25000.0, 0, 0)).await.unwrap();
        let strategy = coordinator.build_strategy("NIFTY", straddle).await.unwrap();
        assert_eq!(strategy.spot, 25000.0);
        assert_eq!(strategy.net_greeks().legs, 2);
        assert_eq!(strategy.analyze(0.05, 10).breakevens.len(), 2);
        assert!(!coordinator.recommend_strategies("NIFTY").await.is_empty());
    }
}
