//! Ingestion loops feeding provider data into the analytics coordinator
//!
//! One polling task per underlying fetches its chain on a fixed interval, so
//! a slow or failing provider for one underlying never delays another. A
//! single pump task forwards streamed ticks to the coordinator and to any
//! downstream subscribers, re-attaching to a fallback stream if one closes.

use crate::error::{ProviderError, ProviderResult};
use crate::registry::DataProviders;
use analytics::{AnalyticsCoordinator, CycleReport};
use common::{CandleInterval, Tick};
use observability::{CycleTimer, PipelineMetrics};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const TICK_CHANNEL_CAPACITY: usize = 4096;
const BROADCAST_CAPACITY: usize = 1024;

/// Published after each successfully ingested chain
#[derive(Debug, Clone)]
pub struct ChainUpdate {
    pub underlying: String,
    pub report: CycleReport,
}

pub struct Pipeline {
    providers: Arc<DataProviders>,
    coordinator: AnalyticsCoordinator,
    poll_interval: Duration,
    updates: broadcast::Sender<ChainUpdate>,
    ticks: broadcast::Sender<Tick>,
    active_stream: Mutex<Option<String>>,
    streamed: Mutex<Vec<String>>,
}

impl Pipeline {
    pub fn new(providers: Arc<DataProviders>, coordinator: AnalyticsCoordinator, poll_interval: Duration) -> Self {
        let (updates, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (ticks, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            providers,
            coordinator,
            poll_interval,
            updates,
            ticks,
            active_stream: Mutex::new(None),
            streamed: Mutex::new(Vec::new()),
        }
    }

    pub fn coordinator(&self) -> &AnalyticsCoordinator {
        &self.coordinator
    }

    pub fn providers(&self) -> &Arc<DataProviders> {
        &self.providers
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<ChainUpdate> {
        self.updates.subscribe()
    }

    pub fn subscribe_ticks(&self) -> broadcast::Receiver<Tick> {
        self.ticks.subscribe()
    }

    /// Seed one-minute bars so swing levels exist before the first live bar closes
    pub async fn warm_up(&self, underlying: &str, bars: usize) {
        match self.providers.candles(underlying, CandleInterval::OneMinute, bars).await {
            Ok(candles) => {
                debug!(underlying, bars = candles.len(), "Candle history seeded");
                self.coordinator.seed_candles(candles).await;
            }
            Err(e) => warn!(underlying, error = %e, "No candle history; levels start from live data"),
        }
    }

    /// Fetch and ingest one chain. Returns `None` when the cycle was skipped.
    #[instrument(skip(self, metrics))]
    pub async fn ingest_once(&self, underlying: &str, metrics: &PipelineMetrics) -> Option<CycleReport> {
        let chain = match self.providers.option_chain(underlying).await {
            Ok(chain) => chain,
            Err(e) => {
                warn!(error = %e, "Cycle skipped; retrying next interval");
                metrics.record_skipped();
                return None;
            }
        };

        let mut timer = CycleTimer::new(metrics);
        timer.set_snapshots(chain.snapshots.len());
        match self.coordinator.ingest_chain(chain).await {
            Ok(report) => {
                let _ = self.updates.send(ChainUpdate {
                    underlying: underlying.to_string(),
                    report: report.clone(),
                });
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Chain rejected");
                None
            }
        }
    }

    /// Poll one underlying until shutdown
    pub async fn run_underlying(self: Arc<Self>, underlying: String, shutdown: CancellationToken) {
        let metrics = PipelineMetrics::new(&underlying);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(underlying = %underlying, interval_secs = self.poll_interval.as_secs(), "Ingestion loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.ingest_once(&underlying, &metrics).await;
                }
            }
        }
        info!(underlying = %underlying, "Ingestion loop stopped");
    }

    /// Start the live stream for `symbols` and pump its ticks until shutdown.
    ///
    /// When the attached stream closes, the next provider in priority order
    /// takes over with every watched symbol. The pump ends once no untried
    /// provider accepts.
    pub async fn start_stream(self: &Arc<Self>, symbols: &[String], shutdown: CancellationToken) -> ProviderResult<JoinHandle<()>> {
        *self.streamed.lock() = symbols.to_vec();
        let mut rx = self.attach_stream(&[]).await?;

        let pipeline = self.clone();
        Ok(tokio::spawn(async move {
            let mut dropped = Vec::new();
            while pipeline.pump(&mut rx, &shutdown).await {
                let Some(name) = pipeline.active_stream.lock().take() else {
                    break;
                };
                warn!(provider = %name, "Live stream closed; failing over");
                if let Some(provider) = pipeline.providers.live.get(&name) {
                    if let Err(e) = provider.stop().await {
                        debug!(provider = %name, error = %e, "Closed stream did not stop cleanly");
                    }
                }
                dropped.push(name);
                match pipeline.attach_stream(&dropped).await {
                    Ok(next) => rx = next,
                    Err(e) => {
                        warn!(error = %e, "No live stream left");
                        break;
                    }
                }
            }
            pipeline.active_stream.lock().take();
            pipeline.providers.stop_streams().await;
        }))
    }

    async fn attach_stream(&self, skip: &[String]) -> ProviderResult<mpsc::Receiver<Tick>> {
        let (tx, rx) = mpsc::channel::<Tick>(TICK_CHANNEL_CAPACITY);
        let symbols = self.streamed.lock().clone();
        let name = self
            .providers
            .start_stream_except(&symbols, CandleInterval::OneMinute, tx, skip)
            .await?;
        info!(provider = %name, symbols = symbols.len(), "Live stream attached");
        *self.active_stream.lock() = Some(name);
        Ok(rx)
    }

    /// Forward ticks; true when the stream closed, false on shutdown
    async fn pump(&self, rx: &mut mpsc::Receiver<Tick>, shutdown: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                maybe = rx.recv() => match maybe {
                    Some(tick) => {
                        self.coordinator.on_tick(tick.clone()).await;
                        let _ = self.ticks.send(tick);
                    }
                    None => return true,
                }
            }
        }
    }

    /// Name of the provider currently feeding ticks
    pub fn active_stream(&self) -> Option<String> {
        self.active_stream.lock().clone()
    }

    /// Add symbols (e.g. newly chosen option legs) to the active stream
    pub async fn watch(&self, symbols: &[String]) -> ProviderResult<()> {
        {
            let mut streamed = self.streamed.lock();
            for symbol in symbols {
                if !streamed.contains(symbol) {
                    streamed.push(symbol.clone());
                }
            }
        }
        let active = self.active_stream();
        let Some(provider) = active.and_then(|name| self.providers.live.get(&name)) else {
            return Err(ProviderError::NotConnected);
        };
        provider.subscribe(symbols, CandleInterval::OneMinute).await
    }

    /// Spawn one ingestion loop per underlying
    pub fn spawn_ingestion(self: &Arc<Self>, underlyings: &[String], shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        underlyings
            .iter()
            .map(|u| tokio::spawn(self.clone().run_underlying(u.clone(), shutdown.child_token())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_source::StaticProvider;
    use crate::traits::{LiveStreamProvider, OptionsDataProvider};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use chrono::{DateTime, NaiveDate, Utc};
    use common::{OptionChain, OptionSnapshot};

    struct Down;

    #[async_trait]
    impl OptionsDataProvider for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn get_option_chain(&self, underlying: &str) -> ProviderResult<OptionChain> {
            Err(ProviderError::failed("down", format!("{} unavailable", underlying)))
        }

        async fn get_oi_snapshot(&self, u: &str, _: NaiveDate, _: DateTime<Utc>) -> ProviderResult<Vec<OptionSnapshot>> {
            Err(ProviderError::NoData(u.into()))
        }

        async fn get_expiries(&self, u: &str) -> ProviderResult<Vec<NaiveDate>> {
            Err(ProviderError::NoData(u.into()))
        }
    }

    /// Sends one tick, then hangs up
    #[derive(Default)]
    struct OneShotStream {
        starts: AtomicUsize,
    }

    #[async_trait]
    impl LiveStreamProvider for OneShotStream {
        fn name(&self) -> &str {
            "oneshot"
        }

        async fn subscribe(&self, _: &[String], _: CandleInterval) -> ProviderResult<()> {
            Ok(())
        }

        async fn unsubscribe(&self, _: &str, _: CandleInterval) -> ProviderResult<()> {
            Ok(())
        }

        async fn start(&self, sink: mpsc::Sender<Tick>) -> ProviderResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let _ = sink.send(Tick::new("NIFTY", 1.0, 1, Utc::now())).await;
            Ok(())
        }

        async fn stop(&self) -> ProviderResult<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            false
        }
    }

    fn pipeline(with_static: bool) -> Arc<Pipeline> {
        let providers = DataProviders::new(Duration::from_secs(1));
        providers.options.register("down", 1, Arc::new(Down));
        if with_static {
            let source = Arc::new(
                StaticProvider::new("static")
                    .with_underlying("NIFTY", 25000.0, 50.0)
                    .with_tick_interval(Duration::from_millis(5)),
            );
            providers.options.register("static", 2, source.clone());
            providers.historical.register("static", 2, source.clone());
            providers.live.register("static", 2, source);
        }
        Arc::new(Pipeline::new(
            Arc::new(providers),
            AnalyticsCoordinator::default(),
            Duration::from_millis(10),
        ))
    }

    #[tokio::test]
    async fn test_failover_then_publish() {
        let pipeline = pipeline(true);
        let mut updates = pipeline.subscribe_updates();
        let metrics = PipelineMetrics::new("NIFTY");

        let report = pipeline.ingest_once("NIFTY", &metrics).await.unwrap();
        assert!(report.priced > 0);
        assert_eq!(updates.recv().await.unwrap().underlying, "NIFTY");
        assert!(pipeline.coordinator().enriched_chain("NIFTY").await.is_some());
    }

    #[tokio::test]
    async fn test_exhaustion_skips_cycle() {
        let pipeline = pipeline(false);
        let metrics = PipelineMetrics::new("NIFTY");
        assert!(pipeline.ingest_once("NIFTY", &metrics).await.is_none());
        assert!(pipeline.coordinator().enriched_chain("NIFTY").await.is_none());
    }

    #[tokio::test]
    async fn test_loops_stop_on_shutdown() {
        let pipeline = pipeline(true);
        pipeline.warm_up("NIFTY", 30).await;
        let shutdown = CancellationToken::new();
        let mut ticks = pipeline.subscribe_ticks();

        let mut handles = pipeline.spawn_ingestion(&["NIFTY".to_string()], &shutdown);
        handles.push(pipeline.start_stream(&["NIFTY".to_string()], shutdown.child_token()).await.unwrap());

        assert_eq!(ticks.recv().await.unwrap().symbol, "NIFTY");
        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(pipeline.coordinator().last_price("NIFTY").await.is_some());
        assert!(pipeline.coordinator().candles("NIFTY", CandleInterval::OneMinute, 0).await.len() >= 30);
    }

    #[tokio::test]
    async fn test_stream_fails_over_when_sender_drops() {
        let providers = DataProviders::new(Duration::from_secs(1));
        let oneshot = Arc::new(OneShotStream::default());
        providers.live.register("oneshot", 1, oneshot.clone());
        providers.live.register(
            "static",
            2,
            Arc::new(
                StaticProvider::new("static")
                    .with_underlying("NIFTY", 25000.0, 50.0)
                    .with_tick_interval(Duration::from_millis(5)),
            ),
        );
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(providers),
            AnalyticsCoordinator::default(),
            Duration::from_millis(10),
        ));
        let mut ticks = pipeline.subscribe_ticks();
        let shutdown = CancellationToken::new();
        let handle = pipeline.start_stream(&["NIFTY".to_string()], shutdown.clone()).await.unwrap();

        assert_eq!(ticks.recv().await.unwrap().price, 1.0);
        let next = ticks.recv().await.unwrap();
        assert_eq!(next.symbol, "NIFTY");
        assert!(next.price > 1000.0);
        assert_eq!(pipeline.active_stream().as_deref(), Some("static"));
        assert_eq!(oneshot.starts.load(Ordering::SeqCst), 1);

        shutdown.cancel();
        handle.await.unwrap();
        assert!(pipeline.active_stream().is_none());
    }
}
