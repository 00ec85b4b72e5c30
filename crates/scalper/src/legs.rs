//! Per-leg breakout reference levels
//!
//! Each option leg keeps one-minute bars and a tick ring. A leg breaks out
//! when its price clears every upside reference (recent swing high, session
//! VWAP, previous-window high, opening-range high) and breaks down when it
//! falls under every downside reference. A missing reference fails the check.
//!
//! References describe one trading session: the first tick of a later date
//! drops the previous session's bars and restarts the VWAP.

use crate::types::LegMap;
use analytics::candles::CandleBuilder;
use analytics::TickBuffer;
use chrono::{DateTime, NaiveDate, Utc};
use common::{trading_date, Candle, CandleInterval, OptionChain, OptionType, Tick};

/// Reference prices for one leg, computed from closed bars
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegLevels {
    pub swing_high: f64,
    pub swing_low: f64,
    pub prev_window_high: f64,
    pub prev_window_low: f64,
    pub opening_range_high: f64,
    pub opening_range_low: f64,
    pub vwap: Option<f64>,
}

impl LegLevels {
    pub fn breaks_up(&self, price: f64) -> bool {
        let Some(vwap) = self.vwap else {
            return false;
        };
        let ceiling = self
            .swing_high
            .max(vwap)
            .max(self.prev_window_high)
            .max(self.opening_range_high);
        price > ceiling
    }

    pub fn breaks_down(&self, price: f64) -> bool {
        let floor = self
            .swing_low
            .min(self.prev_window_low)
            .min(self.opening_range_low);
        price < floor
    }
}

/// At-the-money call and put of the front expiry
pub fn atm_legs(chain: &OptionChain) -> Option<LegMap> {
    let expiry = chain.nearest_expiry()?;
    let strike = chain.atm_strike(expiry)?;
    let call = chain.find(expiry, strike, OptionType::Call)?;
    let put = chain.find(expiry, strike, OptionType::Put)?;
    Some(LegMap::new(
        &chain.underlying,
        call.contract.symbol(),
        put.contract.symbol(),
    ))
}

#[derive(Debug, Clone, Copy)]
pub struct LegWindows {
    pub swing_lookback: usize,
    pub opening_range_bars: usize,
    pub prev_window_bars: usize,
}

#[derive(Debug, Clone)]
pub struct LegTracker {
    symbol: String,
    bars: CandleBuilder,
    ticks: TickBuffer,
    windows: LegWindows,
    session: Option<NaiveDate>,
}

fn high_low(bars: &[Candle]) -> Option<(f64, f64)> {
    if bars.is_empty() {
        return None;
    }
    Some(bars.iter().fold((f64::MIN, f64::MAX), |(h, l), c| (h.max(c.high), l.min(c.low))))
}

impl LegTracker {
    pub fn new(symbol: impl Into<String>, tick_capacity: usize, windows: LegWindows) -> Self {
        Self {
            symbol: symbol.into(),
            bars: CandleBuilder::default(),
            ticks: TickBuffer::new(tick_capacity),
            windows,
            session: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn on_tick(&mut self, tick: &Tick) {
        let date = tick.trading_date();
        match self.session {
            Some(current) if date < current => return,
            Some(current) if date == current => {}
            _ => {
                self.bars.retain_from(&self.symbol, date);
                self.session = Some(date);
            }
        }
        self.bars.add_tick(tick);
        self.ticks.push(tick.clone());
    }

    pub fn session(&self) -> Option<NaiveDate> {
        self.session
    }

    pub fn seed(&mut self, candles: Vec<Candle>) {
        let own: Vec<Candle> = candles
            .into_iter()
            .filter(|c| c.symbol == self.symbol && c.interval == CandleInterval::OneMinute)
            .collect();
        self.bars.seed(own);
    }

    /// Close the forming bar once its minute has elapsed
    pub fn roll(&mut self, now: DateTime<Utc>) {
        self.bars.close_expired(now);
    }

    pub fn last_price(&self) -> Option<f64> {
        self.ticks.last_price()
    }

    pub fn closed_bars(&self) -> usize {
        self.bars.closed_candles(&self.symbol, CandleInterval::OneMinute).len()
    }

    /// `None` until at least `swing_lookback` bars have closed
    pub fn levels(&self) -> Option<LegLevels> {
        let bars = self.bars.closed_candles(&self.symbol, CandleInterval::OneMinute);
        let w = self.windows;
        if w.swing_lookback == 0 || bars.len() < w.swing_lookback {
            return None;
        }

        let (swing_high, swing_low) = high_low(&bars[bars.len() - w.swing_lookback..])?;

        // window ending one bar back; short histories use everything
        let prev = if bars.len() > w.prev_window_bars + 1 {
            &bars[bars.len() - 1 - w.prev_window_bars..bars.len() - 1]
        } else {
            &bars[..]
        };
        let (prev_window_high, prev_window_low) = high_low(prev)?;

        // first bars of the session the latest bar belongs to
        let session = trading_date(bars[bars.len() - 1].open_time);
        let open_idx = bars
            .iter()
            .position(|c| trading_date(c.open_time) == session)
            .unwrap_or(0);
        let opening = &bars[open_idx..(open_idx + w.opening_range_bars.max(1)).min(bars.len())];
        let (opening_range_high, opening_range_low) = high_low(opening)?;

        Some(LegLevels {
            swing_high,
            swing_low,
            prev_window_high,
            prev_window_low,
            opening_range_high,
            opening_range_low,
            vwap: self.ticks.vwap(),
        })
    }

    pub fn breaks_up(&self) -> bool {
        match (self.levels(), self.last_price()) {
            (Some(levels), Some(price)) => levels.breaks_up(price),
            _ => false,
        }
    }

    pub fn breaks_down(&self) -> bool {
        match (self.levels(), self.last_price()) {
            (Some(levels), Some(price)) => levels.breaks_down(price),
            _ => false,
        }
    }
}
