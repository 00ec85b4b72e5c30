//! Scalper domain types

use analytics::SupportResistanceLevel;
use chrono::{DateTime, Utc};
use common::{OptionType, Sentiment, TradeId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalperState {
    Idle,
    Armed,
    Entered,
    Exited,
}

impl ScalperState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalperState::Idle => "idle",
            ScalperState::Armed => "armed",
            ScalperState::Entered => "entered",
            ScalperState::Exited => "exited",
        }
    }
}

impl std::fmt::Display for ScalperState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule that closed a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExitReason {
    StopLoss,
    LevelInvalidated,
    TargetHit,
    ThetaProtection,
    ManualStop,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop-loss",
            ExitReason::LevelInvalidated => "level-invalidated",
            ExitReason::TargetHit => "target-hit",
            ExitReason::ThetaProtection => "theta-protection",
            ExitReason::ManualStop => "manual-stop",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbols the scalper watches for one underlying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegMap {
    pub underlying: String,
    pub call: String,
    pub put: String,
}

impl LegMap {
    pub fn new(underlying: impl Into<String>, call: impl Into<String>, put: impl Into<String>) -> Self {
        Self {
            underlying: underlying.into(),
            call: call.into(),
            put: put.into(),
        }
    }

    pub fn symbols(&self) -> [&str; 3] {
        [&self.underlying, &self.call, &self.put]
    }

    /// Leg bought for a direction, then the leg expected to break down
    pub fn for_direction(&self, direction: Sentiment) -> Option<(&str, &str, OptionType)> {
        match direction {
            Sentiment::Bullish => Some((&self.call, &self.put, OptionType::Call)),
            Sentiment::Bearish => Some((&self.put, &self.call, OptionType::Put)),
            Sentiment::Neutral => None,
        }
    }
}

/// Chain-derived view pushed to the scalper after each analytics cycle
#[derive(Debug, Clone, Default)]
pub struct MarketContext {
    pub spot: Option<f64>,
    pub levels: Vec<SupportResistanceLevel>,
    pub sentiment: Sentiment,
}

/// Level and direction the scalper armed on
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArmedSetup {
    pub level: SupportResistanceLevel,
    pub direction: Sentiment,
    pub armed_at: DateTime<Utc>,
}

/// Entry gates as of the latest input
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ConfluenceSignal {
    pub at_level: bool,
    pub trend_aligned: bool,
    pub breakout_confirmed: bool,
    /// Last price of the confirming leg
    pub price: Option<f64>,
    pub direction: Sentiment,
    pub level: Option<f64>,
}

impl ConfluenceSignal {
    pub fn is_confirmed(&self) -> bool {
        self.at_level && self.trend_aligned && self.breakout_confirmed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScalperTrade {
    pub id: TradeId,
    pub underlying: String,
    pub leg: String,
    pub option_type: OptionType,
    pub direction: Sentiment,
    pub level_price: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub underlying_entry: f64,
    pub quantity: u64,
    pub stop_price: f64,
    pub target_price: f64,
    pub breakeven_armed: bool,
    pub last_price: f64,
    /// Largest |premium - entry| / entry seen since entry
    pub max_move_pct: f64,
    pub state: ScalperState,
    pub pnl: f64,
}

impl ScalperTrade {
    pub fn unrealized_pct(&self) -> f64 {
        (self.last_price - self.entry_price) / self.entry_price
    }

    pub fn mark(&mut self, price: f64) {
        self.last_price = price;
        let moved = ((price - self.entry_price) / self.entry_price).abs();
        self.max_move_pct = self.max_move_pct.max(moved);
        self.pnl = (price - self.entry_price) * self.quantity as f64;
    }
}

/// Immutable ledger row for a closed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: TradeId,
    pub underlying: String,
    pub leg: String,
    pub option_type: OptionType,
    pub direction: Sentiment,
    pub level_price: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    pub quantity: u64,
    pub exit_reason: ExitReason,
    pub realized_pnl: f64,
}

impl TradeRecord {
    pub fn close(trade: &ScalperTrade, exit_price: f64, exit_time: DateTime<Utc>, reason: ExitReason) -> Self {
        Self {
            trade_id: trade.id,
            underlying: trade.underlying.clone(),
            leg: trade.leg.clone(),
            option_type: trade.option_type,
            direction: trade.direction,
            level_price: trade.level_price,
            entry_price: trade.entry_price,
            entry_time: trade.entry_time,
            exit_price,
            exit_time,
            quantity: trade.quantity,
            exit_reason: reason,
            realized_pnl: (exit_price - trade.entry_price) * trade.quantity as f64,
        }
    }
}

/// Point-in-time view returned by status queries
#[derive(Debug, Clone, Serialize)]
pub struct ScalperStatus {
    pub underlying: String,
    pub state: ScalperState,
    pub legs: Option<LegMap>,
    pub armed: Option<ArmedSetup>,
    pub trade: Option<ScalperTrade>,
    pub pending_exit: Option<ExitReason>,
    pub signal: ConfluenceSignal,
    pub trades_closed: usize,
    pub realized_pnl: f64,
}

/// Broadcast to observers as the state machine moves
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScalperEvent {
    Armed {
        underlying: String,
        level: f64,
        direction: Sentiment,
    },
    Disarmed {
        underlying: String,
    },
    Entered(ScalperTrade),
    StopRaised {
        trade_id: TradeId,
        stop_price: f64,
    },
    Exited(TradeRecord),
    LedgerFailed {
        trade_id: TradeId,
        reason: ExitReason,
        error: String,
    },
}

/// Scalper tuning, mapped from the `scalper` config section
#[derive(Debug, Clone)]
pub struct ScalperSettings {
    pub risk_budget: f64,
    pub hard_stop_pct: f64,
    pub breakeven_trigger_pct: f64,
    pub target_r_multiple: f64,
    pub theta_window: Duration,
    pub theta_min_move_pct: f64,
    pub touch_tolerance: f64,
    pub invalidation_tolerance: f64,
    pub tick_buffer: usize,
    pub swing_lookback: usize,
    pub opening_range_bars: usize,
    pub prev_window_bars: usize,
    pub mailbox_capacity: usize,
}

impl From<&config::ScalperConfig> for ScalperSettings {
    fn from(c: &config::ScalperConfig) -> Self {
        Self {
            risk_budget: c.risk_budget,
            hard_stop_pct: c.hard_stop_pct,
            breakeven_trigger_pct: c.breakeven_trigger_pct,
            target_r_multiple: c.target_r_multiple,
            theta_window: Duration::from_secs(c.theta_window_secs),
            theta_min_move_pct: c.theta_min_move_pct,
            touch_tolerance: c.touch_tolerance,
            invalidation_tolerance: c.invalidation_tolerance,
            tick_buffer: c.tick_buffer,
            swing_lookback: c.swing_lookback,
            opening_range_bars: c.opening_range_bars,
            prev_window_bars: c.prev_window_bars,
            mailbox_capacity: c.mailbox_capacity,
        }
    }
}

impl Default for ScalperSettings {
    fn default() -> Self {
        Self::from(&config::ScalperConfig::default())
    }
}

impl ScalperSettings {
    /// Quantity risking the budget against the hard stop; never below one
    pub fn quantity_for(&self, entry_price: f64) -> u64 {
        let risk_per_unit = entry_price * self.hard_stop_pct;
        if risk_per_unit <= 0.0 || !risk_per_unit.is_finite() {
            return 1;
        }
        ((self.risk_budget / risk_per_unit).floor() as u64).max(1)
    }
}
