//! Start, stop and route inputs to per-underlying scalpers

use crate::actor::ScalperHandle;
use crate::engine::ConfluenceScalper;
use crate::error::{ScalperError, ScalperResult};
use crate::ledger::TradeLedger;
use crate::legs::atm_legs;
use crate::types::{LegMap, MarketContext, ScalperEvent, ScalperSettings, ScalperStatus};
use analytics::AnalyticsCoordinator;
use common::{CandleInterval, Tick};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVENT_CAPACITY: usize = 1024;

struct Running {
    handle: ScalperHandle,
    task: JoinHandle<()>,
}

pub struct ScalperManager {
    settings: ScalperSettings,
    ledger: Arc<dyn TradeLedger>,
    scalpers: Mutex<HashMap<String, Running>>,
    events: broadcast::Sender<ScalperEvent>,
    shutdown: CancellationToken,
}

impl ScalperManager {
    pub fn new(settings: ScalperSettings, ledger: Arc<dyn TradeLedger>, shutdown: &CancellationToken) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            ledger,
            scalpers: Mutex::new(HashMap::new()),
            events,
            shutdown: shutdown.child_token(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScalperEvent> {
        self.events.subscribe()
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scalpers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self, underlying: &str) -> bool {
        self.scalpers.lock().contains_key(underlying)
    }

    fn handle(&self, underlying: &str) -> ScalperResult<ScalperHandle> {
        self.scalpers
            .lock()
            .get(underlying)
            .map(|r| r.handle.clone())
            .ok_or_else(|| ScalperError::NotRunning(underlying.to_string()))
    }

    pub async fn start(&self, underlying: &str, legs: Option<LegMap>) -> ScalperResult<()> {
        let mut scalper = ConfluenceScalper::new(underlying, self.settings.clone(), self.ledger.clone());
        if let Some(legs) = legs {
            scalper.set_legs(legs)?;
        }

        let mut scalpers = self.scalpers.lock();
        if scalpers.contains_key(underlying) {
            return Err(ScalperError::AlreadyRunning(underlying.to_string()));
        }
        let (handle, task) = ScalperHandle::spawn(
            scalper,
            self.settings.theta_window,
            self.settings.mailbox_capacity,
            self.events.clone(),
            &self.shutdown,
        );
        scalpers.insert(underlying.to_string(), Running { handle, task });
        info!(underlying, "Scalper registered");
        Ok(())
    }

    /// Flush any open trade as a manual stop and tear the actor down.
    ///
    /// If the exit cannot be recorded the scalper stays registered and the
    /// error is returned.
    pub async fn stop(&self, underlying: &str) -> ScalperResult<ScalperStatus> {
        let handle = self.handle(underlying)?;
        let status = match handle.stop().await {
            Ok(status) => status,
            Err(e) => {
                warn!(underlying, error = %e, "Scalper stop failed; still running");
                return Err(e);
            }
        };

        let running = self.scalpers.lock().remove(underlying);
        if let Some(running) = running {
            if let Err(e) = running.task.await {
                warn!(underlying, error = %e, "Scalper task ended abnormally");
            }
        }
        info!(underlying, trades = status.trades_closed, pnl = status.realized_pnl, "Scalper stopped");
        Ok(status)
    }

    pub async fn stop_all(&self) -> Vec<(String, ScalperResult<ScalperStatus>)> {
        let mut results = Vec::new();
        for underlying in self.running() {
            let result = self.stop(&underlying).await;
            results.push((underlying, result));
        }
        results
    }

    pub async fn status(&self, underlying: &str) -> ScalperResult<ScalperStatus> {
        self.handle(underlying)?.status().await
    }

    pub async fn statuses(&self) -> Vec<ScalperStatus> {
        let handles: Vec<ScalperHandle> = self.scalpers.lock().values().map(|r| r.handle.clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(status) = handle.status().await {
                out.push(status);
            }
        }
        out.sort_by(|a, b| a.underlying.cmp(&b.underlying));
        out
    }

    pub async fn set_legs(&self, underlying: &str, legs: LegMap) -> ScalperResult<()> {
        self.handle(underlying)?.set_legs(legs).await
    }

    pub async fn update_context(&self, underlying: &str, context: MarketContext) -> ScalperResult<()> {
        self.handle(underlying)?.context(context).await
    }

    /// Offer a tick to every running scalper; each ignores symbols it does not watch.
    ///
    /// A scalper whose mailbox is full misses this tick rather than holding
    /// up the others. Returns how many mailboxes accepted it.
    pub fn route_tick(&self, tick: &Tick) -> usize {
        let scalpers = self.scalpers.lock();
        let mut delivered = 0;
        for (underlying, running) in scalpers.iter() {
            match running.handle.try_tick(tick.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(underlying = %underlying, symbol = %tick.symbol, error = %e, "Tick not delivered"),
            }
        }
        delivered
    }

    /// Push the latest analytics for `underlying` into its scalper.
    ///
    /// Returns the ATM legs when they differ from the previous selection so
    /// the caller can subscribe to them. Leg changes are skipped while a
    /// trade is open.
    pub async fn sync_from(&self, coordinator: &AnalyticsCoordinator, underlying: &str) -> ScalperResult<Option<LegMap>> {
        let handle = self.handle(underlying)?;

        let mut new_legs = None;
        if let Some(legs) = coordinator.enriched_chain(underlying).await.and_then(|e| atm_legs(&e.chain)) {
            let current = handle.status().await?.legs;
            if current.as_ref() != Some(&legs) {
                match handle.set_legs(legs.clone()).await {
                    Ok(()) => {
                        let mut history = coordinator.candles(&legs.call, CandleInterval::OneMinute, 0).await;
                        history.extend(coordinator.candles(&legs.put, CandleInterval::OneMinute, 0).await);
                        handle.seed_legs(history).await?;
                        new_legs = Some(legs);
                    }
                    Err(ScalperError::LegsLocked(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        let context = MarketContext {
            spot: coordinator.spot(underlying).await,
            levels: coordinator.support_resistance(underlying).await,
            sentiment: coordinator.sentiment(underlying).await,
        };
        handle.context(context).await?;
        Ok(new_legs)
    }
}
