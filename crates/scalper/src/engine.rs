//! Confluence scalper state machine for one underlying
//!
//! `IDLE -> ARMED -> ENTERED -> EXITED -> IDLE`. The machine is driven by
//! three inputs: market context after each analytics cycle, ticks for the
//! underlying and both option legs, and theta deadlines from the actor's
//! watchdog. It is not thread-safe on purpose; exactly one actor owns it.
//!
//! Exits are only final once the ledger accepts the trade record. Until
//! then the trade stays ENTERED with the exit pending, and every later
//! input retries the write before doing anything else.

use crate::error::{LedgerError, ScalperError, ScalperResult};
use crate::ledger::TradeLedger;
use crate::legs::{LegTracker, LegWindows};
use crate::types::{
    ArmedSetup, ConfluenceSignal, ExitReason, LegMap, MarketContext, ScalperEvent, ScalperSettings, ScalperState, ScalperStatus,
    ScalperTrade, TradeRecord,
};
use analytics::levels::touching;
use chrono::{DateTime, Utc};
use common::{Candle, Sentiment, Tick, TradeId};
use observability::ScalperMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct ConfluenceScalper {
    underlying: String,
    settings: ScalperSettings,
    ledger: Arc<dyn TradeLedger>,
    metrics: ScalperMetrics,
    state: ScalperState,
    legs: Option<LegMap>,
    trackers: HashMap<String, LegTracker>,
    spot: Option<f64>,
    context: MarketContext,
    armed: Option<ArmedSetup>,
    trade: Option<ScalperTrade>,
    pending_exit: Option<TradeRecord>,
    trades_closed: usize,
    realized_pnl: f64,
}

impl ConfluenceScalper {
    pub fn new(underlying: impl Into<String>, settings: ScalperSettings, ledger: Arc<dyn TradeLedger>) -> Self {
        let underlying = underlying.into();
        Self {
            metrics: ScalperMetrics::new(&underlying),
            underlying,
            settings,
            ledger,
            state: ScalperState::Idle,
            legs: None,
            trackers: HashMap::new(),
            spot: None,
            context: MarketContext::default(),
            armed: None,
            trade: None,
            pending_exit: None,
            trades_closed: 0,
            realized_pnl: 0.0,
        }
    }

    pub fn underlying(&self) -> &str {
        &self.underlying
    }

    pub fn state(&self) -> ScalperState {
        self.state
    }

    pub fn trade(&self) -> Option<&ScalperTrade> {
        self.trade.as_ref()
    }

    pub fn legs(&self) -> Option<&LegMap> {
        self.legs.as_ref()
    }

    pub fn status(&self) -> ScalperStatus {
        ScalperStatus {
            underlying: self.underlying.clone(),
            state: self.state,
            legs: self.legs.clone(),
            armed: self.armed.clone(),
            trade: self.trade.clone(),
            pending_exit: self.pending_exit.as_ref().map(|r| r.exit_reason),
            signal: self.signal(),
            trades_closed: self.trades_closed,
            realized_pnl: self.realized_pnl,
        }
    }

    /// Swap the watched option legs. Refused while a trade is open.
    pub fn set_legs(&mut self, legs: LegMap) -> ScalperResult<()> {
        if let Some(trade) = &self.trade {
            return Err(ScalperError::LegsLocked(trade.id));
        }
        if self.legs.as_ref() == Some(&legs) {
            return Ok(());
        }

        let windows = LegWindows {
            swing_lookback: self.settings.swing_lookback,
            opening_range_bars: self.settings.opening_range_bars,
            prev_window_bars: self.settings.prev_window_bars,
        };
        let mut trackers = HashMap::new();
        for symbol in [&legs.call, &legs.put] {
            let tracker = self
                .trackers
                .remove(symbol)
                .unwrap_or_else(|| LegTracker::new(symbol.as_str(), self.settings.tick_buffer, windows));
            trackers.insert(symbol.clone(), tracker);
        }
        self.trackers = trackers;
        info!(underlying = %self.underlying, call = %legs.call, put = %legs.put, "Legs updated");
        self.legs = Some(legs);
        Ok(())
    }

    pub fn seed_leg_history(&mut self, candles: Vec<Candle>) {
        for tracker in self.trackers.values_mut() {
            tracker.seed(candles.clone());
        }
    }

    pub fn watches(&self, symbol: &str) -> bool {
        symbol == self.underlying || self.trackers.contains_key(symbol)
    }

    pub async fn update_context(&mut self, context: MarketContext, now: DateTime<Utc>) -> Vec<ScalperEvent> {
        if let Some(spot) = context.spot {
            self.spot = Some(spot);
        }
        self.context = context;
        self.step(now).await
    }

    pub async fn on_tick(&mut self, tick: &Tick) -> Vec<ScalperEvent> {
        if tick.symbol == self.underlying {
            self.spot = Some(tick.price);
        } else if let Some(tracker) = self.trackers.get_mut(&tick.symbol) {
            tracker.on_tick(tick);
        } else {
            return Vec::new();
        }

        for tracker in self.trackers.values_mut() {
            tracker.roll(tick.timestamp);
        }
        if let Some(trade) = self.trade.as_mut().filter(|t| t.leg == tick.symbol) {
            trade.mark(tick.price);
        }
        self.step(tick.timestamp).await
    }

    /// Theta watchdog expiry for `trade_id`; stale deadlines are ignored
    pub async fn on_theta_deadline(&mut self, trade_id: TradeId, now: DateTime<Utc>) -> Vec<ScalperEvent> {
        let mut events = Vec::new();
        if self.flush_pending(&mut events).await.is_err() {
            return events;
        }

        let Some(trade) = self.trade.as_ref().filter(|t| t.id == trade_id) else {
            return events;
        };
        if trade.max_move_pct < self.settings.theta_min_move_pct {
            info!(
                underlying = %self.underlying,
                trade_id = %trade_id,
                max_move_pct = trade.max_move_pct,
                "Premium stalled; theta protection exit"
            );
            let price = trade.last_price;
            let _ = self.exit(ExitReason::ThetaProtection, price, now, &mut events).await;
        } else {
            debug!(trade_id = %trade_id, max_move_pct = trade.max_move_pct, "Theta watchdog cleared");
        }
        events
    }

    /// Flush any open trade as a manual stop and disarm
    pub async fn stop(&mut self, now: DateTime<Utc>) -> ScalperResult<Vec<ScalperEvent>> {
        let mut events = Vec::new();
        if self.pending_exit.is_none() {
            if let Some(price) = self.trade.as_ref().map(|t| t.last_price) {
                self.exit(ExitReason::ManualStop, price, now, &mut events).await?;
            }
        }
        self.flush_pending(&mut events).await?;
        if self.state == ScalperState::Armed {
            self.disarm(&mut events);
        }
        Ok(events)
    }

    async fn step(&mut self, now: DateTime<Utc>) -> Vec<ScalperEvent> {
        let mut events = Vec::new();
        if self.pending_exit.is_some() {
            let _ = self.flush_pending(&mut events).await;
            return events;
        }

        match self.state {
            ScalperState::Idle | ScalperState::Armed => {
                self.evaluate_setup(now, &mut events);
                if self.state == ScalperState::Armed {
                    self.try_enter(now, &mut events);
                }
            }
            ScalperState::Entered => self.manage_trade(now, &mut events).await,
            ScalperState::Exited => self.transition(ScalperState::Idle),
        }
        events
    }

    /// Confirming leg price when it breaks up while the inverse leg breaks down
    fn breakout(&self, direction: Sentiment) -> Option<f64> {
        let (confirm, inverse, _) = self.legs.as_ref()?.for_direction(direction)?;
        let confirm_leg = self.trackers.get(confirm)?;
        let inverse_leg = self.trackers.get(inverse)?;
        if confirm_leg.breaks_up() && inverse_leg.breaks_down() {
            confirm_leg.last_price()
        } else {
            None
        }
    }

    /// Current state of the three entry gates
    pub fn signal(&self) -> ConfluenceSignal {
        let sentiment = self.context.sentiment;
        let level = self
            .spot
            .and_then(|spot| touching(&self.context.levels, spot, self.settings.touch_tolerance));
        let implied = level.and_then(|l| l.implied_direction());
        let direction = implied.unwrap_or(sentiment);
        let trend_aligned = sentiment.is_directional() && implied.map_or(true, |d| d == sentiment);
        let confirm_price = self
            .legs
            .as_ref()
            .and_then(|legs| legs.for_direction(direction))
            .and_then(|(confirm, _, _)| self.trackers.get(confirm))
            .and_then(|leg| leg.last_price());

        ConfluenceSignal {
            at_level: level.is_some(),
            trend_aligned,
            breakout_confirmed: self.breakout(direction).is_some(),
            price: confirm_price,
            direction,
            level: level.map(|l| l.price),
        }
    }

    /// Level touch and sentiment alignment; either failing means no setup
    fn setup(&self, now: DateTime<Utc>) -> Option<ArmedSetup> {
        let spot = self.spot?;
        let sentiment = self.context.sentiment;
        if !sentiment.is_directional() {
            return None;
        }
        let level = touching(&self.context.levels, spot, self.settings.touch_tolerance)?;
        let direction = match level.implied_direction() {
            Some(implied) if implied == sentiment => implied,
            Some(_) => return None,
            None => sentiment,
        };
        Some(ArmedSetup {
            level: level.clone(),
            direction,
            armed_at: now,
        })
    }

    fn evaluate_setup(&mut self, now: DateTime<Utc>, events: &mut Vec<ScalperEvent>) {
        match (self.setup(now), self.state) {
            (Some(setup), ScalperState::Idle) => {
                info!(
                    underlying = %self.underlying,
                    level = setup.level.price,
                    kind = %setup.level.kind,
                    direction = %setup.direction,
                    "Armed"
                );
                events.push(ScalperEvent::Armed {
                    underlying: self.underlying.clone(),
                    level: setup.level.price,
                    direction: setup.direction,
                });
                self.armed = Some(setup);
                self.transition(ScalperState::Armed);
            }
            (Some(setup), _) => {
                let changed = self
                    .armed
                    .as_ref()
                    .map(|a| a.direction != setup.direction || a.level.price != setup.level.price)
                    .unwrap_or(true);
                if changed {
                    events.push(ScalperEvent::Armed {
                        underlying: self.underlying.clone(),
                        level: setup.level.price,
                        direction: setup.direction,
                    });
                    self.armed = Some(setup);
                }
            }
            (None, ScalperState::Armed) => self.disarm(events),
            (None, _) => {}
        }
    }

    fn disarm(&mut self, events: &mut Vec<ScalperEvent>) {
        debug!(underlying = %self.underlying, "Disarmed");
        self.armed = None;
        self.transition(ScalperState::Idle);
        events.push(ScalperEvent::Disarmed {
            underlying: self.underlying.clone(),
        });
    }

    /// Enter only when the bought leg breaks up and the inverse leg breaks down
    fn try_enter(&mut self, now: DateTime<Utc>, events: &mut Vec<ScalperEvent>) {
        let (Some(setup), Some(legs)) = (self.armed.as_ref(), self.legs.as_ref()) else {
            return;
        };
        let Some((confirm, _, option_type)) = legs.for_direction(setup.direction) else {
            return;
        };
        let Some(entry_price) = self.breakout(setup.direction).filter(|p| *p > 0.0) else {
            return;
        };

        let s = &self.settings;
        let stop_price = entry_price * (1.0 - s.hard_stop_pct);
        let risk = entry_price - stop_price;
        let trade = ScalperTrade {
            id: TradeId::new(),
            underlying: self.underlying.clone(),
            leg: confirm.to_string(),
            option_type,
            direction: setup.direction,
            level_price: setup.level.price,
            entry_price,
            entry_time: now,
            underlying_entry: self.spot.unwrap_or(setup.level.price),
            quantity: s.quantity_for(entry_price),
            stop_price,
            target_price: entry_price + s.target_r_multiple * risk,
            breakeven_armed: false,
            last_price: entry_price,
            max_move_pct: 0.0,
            state: ScalperState::Entered,
            pnl: 0.0,
        };

        info!(
            underlying = %self.underlying,
            trade_id = %trade.id,
            leg = %trade.leg,
            entry = entry_price,
            quantity = trade.quantity,
            stop = trade.stop_price,
            target = trade.target_price,
            "Entered"
        );
        self.metrics.record_entry();
        events.push(ScalperEvent::Entered(trade.clone()));
        self.armed = None;
        self.trade = Some(trade);
        self.transition(ScalperState::Entered);
    }

    fn level_invalidated(&self, trade: &ScalperTrade) -> bool {
        let Some(spot) = self.spot else {
            return false;
        };
        let tolerance = self.settings.invalidation_tolerance;
        match trade.direction {
            Sentiment::Bullish => spot < trade.level_price * (1.0 - tolerance),
            Sentiment::Bearish => spot > trade.level_price * (1.0 + tolerance),
            Sentiment::Neutral => false,
        }
    }

    async fn manage_trade(&mut self, now: DateTime<Utc>, events: &mut Vec<ScalperEvent>) {
        let Some(trade) = self.trade.as_ref() else {
            return;
        };
        let price = trade.last_price;
        let reason = if price <= trade.stop_price {
            Some(ExitReason::StopLoss)
        } else if self.level_invalidated(trade) {
            Some(ExitReason::LevelInvalidated)
        } else if price >= trade.target_price {
            Some(ExitReason::TargetHit)
        } else {
            None
        };

        if let Some(reason) = reason {
            let _ = self.exit(reason, price, now, events).await;
            return;
        }

        let trigger = self.settings.breakeven_trigger_pct;
        if let Some(trade) = self.trade.as_mut() {
            if !trade.breakeven_armed && trade.unrealized_pct() >= trigger {
                trade.breakeven_armed = true;
                trade.stop_price = trade.stop_price.max(trade.entry_price);
                info!(trade_id = %trade.id, stop = trade.stop_price, "Stop moved to breakeven");
                events.push(ScalperEvent::StopRaised {
                    trade_id: trade.id,
                    stop_price: trade.stop_price,
                });
            }
        }
    }

    async fn exit(
        &mut self,
        reason: ExitReason,
        price: f64,
        now: DateTime<Utc>,
        events: &mut Vec<ScalperEvent>,
    ) -> ScalperResult<()> {
        let Some(trade) = self.trade.as_ref() else {
            return Ok(());
        };
        self.pending_exit = Some(TradeRecord::close(trade, price, now, reason));
        self.flush_pending(events).await
    }

    /// Write the pending exit; on success the trade is closed
    async fn flush_pending(&mut self, events: &mut Vec<ScalperEvent>) -> ScalperResult<()> {
        let Some(record) = self.pending_exit.clone() else {
            return Ok(());
        };

        if let Err(e) = self.ledger.append(&record).await {
            error!(
                underlying = %self.underlying,
                trade_id = %record.trade_id,
                reason = %record.exit_reason,
                error = %e,
                "Trade ledger write failed; exit held pending"
            );
            self.metrics.record_ledger_failure();
            events.push(ScalperEvent::LedgerFailed {
                trade_id: record.trade_id,
                reason: record.exit_reason,
                error: e.to_string(),
            });
            return Err(ledger_error(record.trade_id, e));
        }

        self.pending_exit = None;
        self.trade = None;
        self.trades_closed += 1;
        self.realized_pnl += record.realized_pnl;
        self.metrics.record_exit(record.exit_reason.as_str(), record.realized_pnl);
        self.transition(ScalperState::Exited);
        info!(
            underlying = %self.underlying,
            trade_id = %record.trade_id,
            reason = %record.exit_reason,
            exit = record.exit_price,
            pnl = record.realized_pnl,
            "Exited"
        );
        events.push(ScalperEvent::Exited(record));
        self.transition(ScalperState::Idle);
        Ok(())
    }

    fn transition(&mut self, to: ScalperState) {
        if self.state == to {
            return;
        }
        self.metrics.record_transition(self.state.as_str(), to.as_str());
        self.state = to;
    }
}

fn ledger_error(trade_id: TradeId, source: LedgerError) -> ScalperError {
    ScalperError::Ledger { trade_id, source }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::legs::tests::{flat_bars, session_start};
    use analytics::{LevelKind, LevelSource, SupportResistanceLevel};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Duration;
    use common::OptionType;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) const CALL: &str = "NIFTY25000CE";
    pub(crate) const PUT: &str = "NIFTY25000PE";

    pub(crate) fn now() -> DateTime<Utc> {
        session_start() + Duration::minutes(20)
    }

    pub(crate) fn level(price: f64, kind: LevelKind, source: LevelSource) -> SupportResistanceLevel {
        SupportResistanceLevel {
            underlying: "NIFTY".into(),
            price,
            kind,
            sources: BTreeSet::from([source]),
            score: 1.0,
            last_reinforced: 0,
        }
    }

    pub(crate) fn bullish_context(spot: f64) -> MarketContext {
        MarketContext {
            spot: Some(spot),
            levels: vec![level(25000.0, LevelKind::Support, LevelSource::OpenInterest)],
            sentiment: Sentiment::Bullish,
        }
    }

    pub(crate) fn tick(symbol: &str, price: f64, quantity: u64) -> Tick {
        Tick::new(symbol, price, quantity, now())
    }

    /// Flips between failing and accepting writes
    #[derive(Default)]
    pub(crate) struct FlakyLedger {
        pub failing: AtomicBool,
        pub inner: InMemoryLedger,
    }

    #[async_trait]
    impl TradeLedger for FlakyLedger {
        async fn append(&self, record: &TradeRecord) -> Result<(), LedgerError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(LedgerError::Unavailable("disk full".into()));
            }
            self.inner.append(record).await
        }

        async fn records(&self, underlying: &str) -> Result<Vec<TradeRecord>, LedgerError> {
            self.inner.records(underlying).await
        }
    }

    pub(crate) fn scalper_with(ledger: Arc<dyn TradeLedger>) -> ConfluenceScalper {
        let mut scalper = ConfluenceScalper::new("NIFTY", ScalperSettings::default(), ledger);
        scalper.set_legs(LegMap::new("NIFTY", CALL, PUT)).unwrap();
        // call highs sit at 98, put lows at 98
        scalper.seed_leg_history(flat_bars(CALL, 96.0, 20));
        scalper.seed_leg_history(flat_bars(PUT, 100.0, 20));
        scalper
    }

    async fn armed(ledger: Arc<dyn TradeLedger>) -> ConfluenceScalper {
        let mut scalper = scalper_with(ledger);
        let events = scalper.update_context(bullish_context(25000.0), now()).await;
        assert_matches!(events.as_slice(), [ScalperEvent::Armed { direction: Sentiment::Bullish, .. }]);
        scalper
    }

    /// Armed, then call breaks up to 100 while put breaks down to 97
    async fn entered(ledger: Arc<dyn TradeLedger>) -> ConfluenceScalper {
        let mut scalper = armed(ledger).await;
        scalper.on_tick(&tick(PUT, 97.0, 10)).await;
        scalper.on_tick(&tick(CALL, 97.0, 100)).await;
        let events = scalper.on_tick(&tick(CALL, 100.0, 1)).await;
        assert_matches!(events.as_slice(), [ScalperEvent::Entered(_)]);
        assert_eq!(scalper.state(), ScalperState::Entered);
        scalper
    }

    #[tokio::test]
    async fn test_arm_requires_aligned_sentiment() {
        let mut scalper = scalper_with(Arc::new(InMemoryLedger::new()));

        let mut context = bullish_context(25000.0);
        context.sentiment = Sentiment::Bearish;
        assert!(scalper.update_context(context, now()).await.is_empty());
        assert_eq!(scalper.state(), ScalperState::Idle);

        let mut context = bullish_context(25000.0);
        context.sentiment = Sentiment::Neutral;
        scalper.update_context(context, now()).await;
        assert_eq!(scalper.state(), ScalperState::Idle);

        // off the level by more than the touch tolerance
        scalper.update_context(bullish_context(25100.0), now()).await;
        assert_eq!(scalper.state(), ScalperState::Idle);

        scalper.update_context(bullish_context(25005.0), now()).await;
        assert_eq!(scalper.state(), ScalperState::Armed);
    }

    #[tokio::test]
    async fn test_signal_tracks_each_gate() {
        let mut scalper = armed(Arc::new(InMemoryLedger::new())).await;
        let signal = scalper.signal();
        assert!(signal.at_level && signal.trend_aligned);
        assert!(!signal.breakout_confirmed);
        assert_eq!(signal.level, Some(25000.0));
        assert_eq!(signal.direction, Sentiment::Bullish);

        scalper.on_tick(&tick(PUT, 97.0, 10)).await;
        let signal = scalper.signal();
        assert!(!signal.breakout_confirmed);
        assert!(signal.price.is_none());

        let mut context = bullish_context(25000.0);
        context.sentiment = Sentiment::Bearish;
        scalper.update_context(context, now()).await;
        let signal = scalper.signal();
        assert!(signal.at_level);
        assert!(!signal.trend_aligned);
        assert!(!signal.is_confirmed());
    }

    #[tokio::test]
    async fn test_volume_node_takes_sentiment_direction() {
        let mut scalper = scalper_with(Arc::new(InMemoryLedger::new()));
        let context = MarketContext {
            spot: Some(25000.0),
            levels: vec![level(25000.0, LevelKind::Support, LevelSource::VolumeNode)],
            sentiment: Sentiment::Bearish,
        };
        let events = scalper.update_context(context, now()).await;
        assert_matches!(events.as_slice(), [ScalperEvent::Armed { direction: Sentiment::Bearish, .. }]);
    }

    #[tokio::test]
    async fn test_disarms_when_price_leaves_level() {
        let mut scalper = armed(Arc::new(InMemoryLedger::new())).await;
        let events = scalper.on_tick(&tick("NIFTY", 25100.0, 1)).await;
        assert_matches!(events.as_slice(), [ScalperEvent::Disarmed { .. }]);
        assert_eq!(scalper.state(), ScalperState::Idle);
    }

    #[tokio::test]
    async fn test_no_entry_without_two_sided_breakout() {
        let mut scalper = armed(Arc::new(InMemoryLedger::new())).await;

        // call clears every reference but the put holds above its lows
        scalper.on_tick(&tick(PUT, 99.0, 10)).await;
        scalper.on_tick(&tick(CALL, 97.0, 100)).await;
        scalper.on_tick(&tick(CALL, 100.0, 1)).await;
        scalper.on_tick(&tick(CALL, 101.0, 1)).await;
        assert_eq!(scalper.state(), ScalperState::Armed);

        // put breaks down while the call falls back under its highs
        scalper.on_tick(&tick(CALL, 97.5, 1)).await;
        scalper.on_tick(&tick(PUT, 97.0, 1)).await;
        assert_eq!(scalper.state(), ScalperState::Armed);
        assert!(scalper.trade().is_none());
    }

    #[tokio::test]
    async fn test_entry_sizing_and_target() {
        let scalper = entered(Arc::new(InMemoryLedger::new())).await;
        let trade = scalper.trade().unwrap();
        assert_eq!(trade.entry_price, 100.0);
        assert_eq!(trade.leg, CALL);
        assert_eq!(trade.quantity, 133);
        assert!((trade.stop_price - 85.0).abs() < 1e-9);
        assert!((trade.target_price - 137.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stop_loss_exit() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut scalper = entered(ledger.clone()).await;

        let events = scalper.on_tick(&tick(CALL, 84.9, 1)).await;
        let record = match events.as_slice() {
            [ScalperEvent::Exited(record)] => record.clone(),
            other => panic!("unexpected events {:?}", other),
        };
        assert_eq!(record.exit_reason, ExitReason::StopLoss);
        assert_eq!(record.exit_price, 84.9);
        assert!((record.realized_pnl - (84.9 - 100.0) * 133.0).abs() < 1e-6);
        assert_eq!(scalper.state(), ScalperState::Idle);
        assert_eq!(ledger.len(), 1);
        assert_eq!(scalper.status().trades_closed, 1);
    }

    #[tokio::test]
    async fn test_breakeven_ratchet_never_loosens() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut scalper = entered(ledger.clone()).await;

        let events = scalper.on_tick(&tick(CALL, 110.5, 1)).await;
        assert_matches!(events.as_slice(), [ScalperEvent::StopRaised { stop_price, .. }] if *stop_price == 100.0);

        scalper.on_tick(&tick(CALL, 104.0, 1)).await;
        assert_eq!(scalper.trade().unwrap().stop_price, 100.0);

        scalper.on_tick(&tick(CALL, 99.9, 1)).await;
        assert_eq!(ledger.all()[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(ledger.all()[0].exit_price, 99.9);
    }

    #[tokio::test]
    async fn test_target_exit() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut scalper = entered(ledger.clone()).await;
        scalper.on_tick(&tick(CALL, 138.0, 1)).await;
        assert_eq!(ledger.all()[0].exit_reason, ExitReason::TargetHit);
    }

    #[tokio::test]
    async fn test_level_invalidation_exit() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut scalper = entered(ledger.clone()).await;

        // inside the invalidation tolerance
        scalper.on_tick(&tick("NIFTY", 24980.0, 1)).await;
        assert_eq!(scalper.state(), ScalperState::Entered);

        scalper.on_tick(&tick("NIFTY", 24970.0, 1)).await;
        assert_eq!(ledger.all()[0].exit_reason, ExitReason::LevelInvalidated);
        assert_eq!(ledger.all()[0].exit_price, 100.0);
    }

    #[tokio::test]
    async fn test_bearish_put_entry_and_invalidation_exit() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut scalper = ConfluenceScalper::new("NIFTY", ScalperSettings::default(), ledger.clone());
        scalper.set_legs(LegMap::new("NIFTY", CALL, PUT)).unwrap();
        // put highs sit at 98, call lows at 98
        scalper.seed_leg_history(flat_bars(PUT, 96.0, 20));
        scalper.seed_leg_history(flat_bars(CALL, 100.0, 20));

        let context = MarketContext {
            spot: Some(25000.0),
            levels: vec![level(25000.0, LevelKind::Resistance, LevelSource::OpenInterest)],
            sentiment: Sentiment::Bearish,
        };
        let events = scalper.update_context(context, now()).await;
        assert_matches!(events.as_slice(), [ScalperEvent::Armed { direction: Sentiment::Bearish, .. }]);

        scalper.on_tick(&tick(CALL, 97.0, 10)).await;
        scalper.on_tick(&tick(PUT, 97.0, 100)).await;
        let events = scalper.on_tick(&tick(PUT, 100.0, 1)).await;
        let trade = match events.as_slice() {
            [ScalperEvent::Entered(trade)] => trade.clone(),
            other => panic!("unexpected events {:?}", other),
        };
        assert_eq!(trade.leg, PUT);
        assert_eq!(trade.option_type, OptionType::Put);
        assert_eq!(trade.direction, Sentiment::Bearish);

        // rallying through resistance, first inside then past the tolerance
        scalper.on_tick(&tick("NIFTY", 25020.0, 1)).await;
        assert_eq!(scalper.state(), ScalperState::Entered);
        scalper.on_tick(&tick("NIFTY", 25030.0, 1)).await;
        let records = ledger.all();
        let record = &records[0];
        assert_eq!(record.exit_reason, ExitReason::LevelInvalidated);
        assert_eq!(record.leg, PUT);
        assert_eq!(record.exit_price, 100.0);
        assert_eq!(scalper.state(), ScalperState::Idle);
    }

    #[tokio::test]
    async fn test_stop_checked_before_invalidation() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut scalper = entered(ledger.clone()).await;
        scalper.on_tick(&tick(CALL, 84.0, 1)).await;
        assert_eq!(ledger.all()[0].exit_reason, ExitReason::StopLoss);
    }

    #[tokio::test]
    async fn test_ledger_failure_holds_exit_until_written() {
        let ledger = Arc::new(FlakyLedger::default());
        let mut scalper = entered(ledger.clone()).await;
        ledger.failing.store(true, Ordering::SeqCst);

        let events = scalper.on_tick(&tick(CALL, 84.9, 1)).await;
        assert_matches!(events.as_slice(), [ScalperEvent::LedgerFailed { reason: ExitReason::StopLoss, .. }]);
        assert_eq!(scalper.state(), ScalperState::Entered);
        assert_eq!(scalper.status().pending_exit, Some(ExitReason::StopLoss));

        // still failing: a later tick does not re-evaluate exits
        scalper.on_tick(&tick(CALL, 140.0, 1)).await;
        assert_eq!(scalper.state(), ScalperState::Entered);

        ledger.failing.store(false, Ordering::SeqCst);
        let events = scalper.on_tick(&tick(CALL, 90.0, 1)).await;
        assert_matches!(events.as_slice(), [ScalperEvent::Exited(r)] if r.exit_price == 84.9);
        assert_eq!(scalper.state(), ScalperState::Idle);
        assert_eq!(ledger.inner.len(), 1);
    }

    #[tokio::test]
    async fn test_theta_deadline() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mut scalper = entered(ledger.clone()).await;
        let id = scalper.trade().unwrap().id;

        // stale id is ignored
        assert!(scalper.on_theta_deadline(TradeId::new(), now()).await.is_empty());

        scalper.on_tick(&tick(CALL, 100.5, 1)).await;
        let events = scalper.on_theta_deadline(id, now()).await;
        assert_matches!(events.as_slice(), [ScalperEvent::Exited(r)] if r.exit_reason == ExitReason::ThetaProtection);
    }

    #[tokio::test]
    async fn test_theta_deadline_cleared_by_movement() {
        let mut scalper = entered(Arc::new(InMemoryLedger::new())).await;
        let id = scalper.trade().unwrap().id;
        scalper.on_tick(&tick(CALL, 101.5, 1)).await;
        scalper.on_tick(&tick(CALL, 100.2, 1)).await;
        assert!(scalper.on_theta_deadline(id, now()).await.is_empty());
        assert_eq!(scalper.state(), ScalperState::Entered);
    }

    #[tokio::test]
    async fn test_manual_stop_flushes_trade() {
        let ledger = Arc::new(FlakyLedger::default());
        let mut scalper = entered(ledger.clone()).await;

        ledger.failing.store(true, Ordering::SeqCst);
        assert_matches!(scalper.stop(now()).await, Err(ScalperError::Ledger { .. }));
        assert_eq!(scalper.state(), ScalperState::Entered);

        ledger.failing.store(false, Ordering::SeqCst);
        let events = scalper.stop(now()).await.unwrap();
        assert_matches!(events.as_slice(), [ScalperEvent::Exited(r)] if r.exit_reason == ExitReason::ManualStop);
        assert_eq!(scalper.state(), ScalperState::Idle);
    }

    #[tokio::test]
    async fn test_legs_locked_while_entered() {
        let mut scalper = entered(Arc::new(InMemoryLedger::new())).await;
        assert_matches!(
            scalper.set_legs(LegMap::new("NIFTY", "NIFTY25100CE", "NIFTY25100PE")),
            Err(ScalperError::LegsLocked(_))
        );
    }
}
