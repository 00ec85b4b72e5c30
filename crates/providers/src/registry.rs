//! Priority-ordered provider registries with timed failover

use crate::error::{ProviderError, ProviderResult};
use crate::traits::{HistoricalDataProvider, LiveStreamProvider, OptionsDataProvider};
use chrono::{DateTime, NaiveDate, Utc};
use common::{Candle, CandleInterval, OptionChain, OptionSnapshot, Tick};
use observability::metrics::record_failover;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Entry<P: ?Sized> {
    name: String,
    priority: u32,
    provider: Arc<P>,
}

/// Providers of one capability, tried in ascending priority order
pub struct ProviderRegistry<P: ?Sized> {
    capability: &'static str,
    entries: RwLock<Vec<Entry<P>>>,
}

impl<P: ?Sized + Send + Sync> ProviderRegistry<P> {
    pub fn new(capability: &'static str) -> Self {
        Self {
            capability,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn capability(&self) -> &'static str {
        self.capability
    }

    /// Register or replace a provider by name
    pub fn register(&self, name: impl Into<String>, priority: u32, provider: Arc<P>) {
        let name = name.into();
        let mut entries = self.entries.write();
        entries.retain(|e| e.name != name);
        entries.push(Entry {
            name: name.clone(),
            priority,
            provider,
        });
        entries.sort_by_key(|e| e.priority);
        info!(capability = self.capability, provider = %name, priority, "Provider registered");
    }

    pub fn deregister(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() < before
    }

    pub fn get(&self, name: &str) -> Option<Arc<P>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.provider.clone())
    }

    pub fn primary(&self) -> Option<Arc<P>> {
        self.entries.read().first().map(|e| e.provider.clone())
    }

    /// Names in the order they will be tried
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn ordered(&self) -> Vec<(String, Arc<P>)> {
        self.entries
            .read()
            .iter()
            .map(|e| (e.name.clone(), e.provider.clone()))
            .collect()
    }

    /// Run `op` against each provider in turn until one succeeds.
    ///
    /// Each attempt is bounded by `timeout`; errors and timeouts move on to
    /// the next provider and are counted as failovers.
    pub async fn call<T, F, Fut>(&self, timeout: Duration, op: F) -> ProviderResult<T>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        self.call_except(timeout, &[], op).await
    }

    /// [`call`](Self::call) without the providers named in `skip`
    pub async fn call_except<T, F, Fut>(&self, timeout: Duration, skip: &[String], op: F) -> ProviderResult<T>
    where
        F: Fn(Arc<P>) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        if self.is_empty() {
            return Err(ProviderError::NoProviders(self.capability));
        }
        let candidates: Vec<_> = self
            .ordered()
            .into_iter()
            .filter(|(name, _)| !skip.contains(name))
            .collect();

        let attempts = candidates.len();
        for (attempt, (name, provider)) in candidates.into_iter().enumerate() {
            let error = match tokio::time::timeout(timeout, op(provider)).await {
                Ok(Ok(value)) => {
                    if attempt > 0 {
                        info!(capability = self.capability, provider = %name, attempt, "Served by fallback provider");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout {
                    provider: name.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                },
            };

            warn!(capability = self.capability, provider = %name, error = %error, "Provider call failed");
            if attempt + 1 < attempts {
                record_failover(self.capability, &name);
            }
        }

        Err(ProviderError::Exhausted {
            capability: self.capability,
            attempts,
        })
    }
}

/// The three capability registries plus the per-call timeout
pub struct DataProviders {
    pub live: ProviderRegistry<dyn LiveStreamProvider>,
    pub options: ProviderRegistry<dyn OptionsDataProvider>,
    pub historical: ProviderRegistry<dyn HistoricalDataProvider>,
    timeout: Duration,
}

impl std::fmt::Debug for DataProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProviders")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DataProviders {
    pub fn new(timeout: Duration) -> Self {
        Self {
            live: ProviderRegistry::new("live_stream"),
            options: ProviderRegistry::new("options_data"),
            historical: ProviderRegistry::new("historical_data"),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn option_chain(&self, underlying: &str) -> ProviderResult<OptionChain> {
        self.options
            .call(self.timeout, |p| async move { p.get_option_chain(underlying).await })
            .await
    }

    pub async fn oi_snapshot(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        as_of: DateTime<Utc>,
    ) -> ProviderResult<Vec<OptionSnapshot>> {
        self.options
            .call(self.timeout, |p| async move { p.get_oi_snapshot(underlying, expiry, as_of).await })
            .await
    }

    pub async fn expiries(&self, underlying: &str) -> ProviderResult<Vec<NaiveDate>> {
        self.options
            .call(self.timeout, |p| async move { p.get_expiries(underlying).await })
            .await
    }

    pub async fn candles(&self, symbol: &str, interval: CandleInterval, count: usize) -> ProviderResult<Vec<Candle>> {
        self.historical
            .call(self.timeout, |p| async move { p.get_candles(symbol, interval, count).await })
            .await
    }

    /// Subscribe and start the first live stream that accepts; returns its name
    pub async fn start_stream(
        &self,
        symbols: &[String],
        interval: CandleInterval,
        sink: mpsc::Sender<Tick>,
    ) -> ProviderResult<String> {
        self.start_stream_except(symbols, interval, sink, &[]).await
    }

    /// Like [`start_stream`](Self::start_stream), skipping streams that already dropped
    pub async fn start_stream_except(
        &self,
        symbols: &[String],
        interval: CandleInterval,
        sink: mpsc::Sender<Tick>,
        skip: &[String],
    ) -> ProviderResult<String> {
        self.live
            .call_except(self.timeout, skip, |p| {
                let sink = sink.clone();
                async move {
                    p.subscribe(symbols, interval).await?;
                    p.start(sink).await?;
                    Ok(p.name().to_string())
                }
            })
            .await
    }

    /// Stop every connected stream
    pub async fn stop_streams(&self) {
        for (name, provider) in self.live.ordered() {
            if provider.is_connected() {
                if let Err(e) = provider.stop().await {
                    warn!(provider = %name, error = %e, "Failed to stop stream");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Fail,
        Hang,
        Serve(f64),
    }

    struct Scripted {
        name: String,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl OptionsDataProvider for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn get_option_chain(&self, underlying: &str) -> ProviderResult<OptionChain> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Fail => Err(ProviderError::failed(&self.name, "upstream 503")),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::NoData(underlying.into()))
                }
                Behaviour::Serve(spot) => Ok(OptionChain {
                    underlying: underlying.into(),
                    spot,
                    timestamp: Utc::now(),
                    snapshots: Vec::new(),
                }),
            }
        }

        async fn get_oi_snapshot(&self, underlying: &str, _: NaiveDate, _: DateTime<Utc>) -> ProviderResult<Vec<OptionSnapshot>> {
            Err(ProviderError::NoData(underlying.into()))
        }

        async fn get_expiries(&self, _: &str) -> ProviderResult<Vec<NaiveDate>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_priority_order() {
        let providers = DataProviders::new(Duration::from_secs(1));
        providers.options.register("backup", 5, Scripted::new("backup", Behaviour::Serve(2.0)));
        providers.options.register("primary", 1, Scripted::new("primary", Behaviour::Serve(1.0)));

        assert_eq!(providers.options.names(), vec!["primary", "backup"]);
        assert_eq!(providers.option_chain("NIFTY").await.unwrap().spot, 1.0);
    }

    #[tokio::test]
    async fn test_failover_on_error() {
        let providers = DataProviders::new(Duration::from_secs(1));
        let primary = Scripted::new("primary", Behaviour::Fail);
        providers.options.register("primary", 1, primary.clone());
        providers.options.register("backup", 2, Scripted::new("backup", Behaviour::Serve(2.0)));

        let chain = tokio_test::assert_ok!(providers.option_chain("NIFTY").await);
        assert_eq!(chain.spot, 2.0);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_on_timeout() {
        let providers = DataProviders::new(Duration::from_millis(500));
        providers.options.register("slow", 1, Scripted::new("slow", Behaviour::Hang));
        providers.options.register("backup", 2, Scripted::new("backup", Behaviour::Serve(3.0)));

        assert_eq!(providers.option_chain("NIFTY").await.unwrap().spot, 3.0);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let providers = DataProviders::new(Duration::from_secs(1));
        assert_matches!(
            providers.option_chain("NIFTY").await,
            Err(ProviderError::NoProviders("options_data"))
        );

        providers.options.register("a", 1, Scripted::new("a", Behaviour::Fail));
        providers.options.register("b", 2, Scripted::new("b", Behaviour::Fail));
        assert_matches!(
            providers.option_chain("NIFTY").await,
            Err(ProviderError::Exhausted { capability: "options_data", attempts: 2 })
        );
    }

    #[tokio::test]
    async fn test_call_except_skips_named() {
        let providers = DataProviders::new(Duration::from_secs(1));
        let primary = Scripted::new("primary", Behaviour::Serve(1.0));
        providers.options.register("primary", 1, primary.clone());
        providers.options.register("backup", 2, Scripted::new("backup", Behaviour::Serve(2.0)));

        let skip = vec!["primary".to_string()];
        let chain = providers
            .options
            .call_except(providers.timeout(), &skip, |p| async move { p.get_option_chain("NIFTY").await })
            .await
            .unwrap();
        assert_eq!(chain.spot, 2.0);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);

        let all = vec!["primary".to_string(), "backup".to_string()];
        assert_matches!(
            providers
                .options
                .call_except(providers.timeout(), &all, |p| async move { p.get_option_chain("NIFTY").await })
                .await,
            Err(ProviderError::Exhausted { attempts: 0, .. })
        );
    }

    #[test]
    fn test_register_replaces_by_name() {
        let registry: ProviderRegistry<dyn OptionsDataProvider> = ProviderRegistry::new("options_data");
        registry.register("a", 3, Scripted::new("a", Behaviour::Fail));
        registry.register("a", 1, Scripted::new("a", Behaviour::Serve(1.0)));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a").is_some());
        assert!(registry.deregister("a"));
        assert!(registry.is_empty());
        assert!(registry.primary().is_none());
    }
}
