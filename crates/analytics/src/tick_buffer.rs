use chrono::NaiveDate;
use common::Tick;
use std::collections::VecDeque;

pub const DEFAULT_TICK_CAPACITY: usize = 500;

/// Fixed-capacity ring of the most recent ticks for one symbol.
///
/// Cumulative price-volume totals are kept separately from the ring so
/// VWAP covers the whole session, not only the buffered window. The first
/// tick of a later trading date starts a new session.
#[derive(Debug, Clone)]
pub struct TickBuffer {
    capacity: usize,
    ticks: VecDeque<Tick>,
    cum_pv: f64,
    cum_volume: u64,
    session: Option<NaiveDate>,
}

impl Default for TickBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_CAPACITY)
    }
}

impl TickBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ticks: VecDeque::with_capacity(capacity),
            cum_pv: 0.0,
            cum_volume: 0,
            session: None,
        }
    }

    /// Returns `true` when the tick opened a new session. Ticks dated
    /// before the current session are dropped.
    pub fn push(&mut self, tick: Tick) -> bool {
        let date = tick.trading_date();
        let rolled = match self.session {
            Some(current) if date < current => return false,
            Some(current) if date > current => {
                self.reset();
                true
            }
            _ => false,
        };
        self.session = Some(date);

        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.cum_pv += tick.price * tick.quantity as f64;
        self.cum_volume += tick.quantity;
        self.ticks.push_back(tick);
        rolled
    }

    pub fn session(&self) -> Option<NaiveDate> {
        self.session
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn last_price(&self) -> Option<f64> {
        self.ticks.back().map(|t| t.price)
    }

    /// Buffered trades as (price, quantity)
    pub fn trades(&self) -> Vec<(f64, u64)> {
        self.ticks.iter().map(|t| (t.price, t.quantity)).collect()
    }

    /// Session VWAP; `None` until some volume has traded
    pub fn vwap(&self) -> Option<f64> {
        (self.cum_volume > 0).then(|| self.cum_pv / self.cum_volume as f64)
    }

    fn reset(&mut self) {
        self.ticks.clear();
        self.cum_pv = 0.0;
        self.cum_volume = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn open() -> DateTime<Utc> {
        // 09:15 IST
        Utc.with_ymd_and_hms(2024, 10, 21, 3, 45, 0).unwrap()
    }

    fn tick(price: f64, quantity: u64) -> Tick {
        Tick::new("NIFTY", price, quantity, open())
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut buffer = TickBuffer::new(3);
        for p in [1.0, 2.0, 3.0, 4.0] {
            buffer.push(tick(p, 1));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.trades(), vec![(2.0, 1), (3.0, 1), (4.0, 1)]);
        assert_eq!(buffer.last_price(), Some(4.0));
    }

    #[test]
    fn test_vwap_spans_session() {
        let mut buffer = TickBuffer::new(2);
        assert_eq!(buffer.vwap(), None);
        buffer.push(tick(100.0, 10));
        buffer.push(tick(110.0, 30));
        buffer.push(tick(120.0, 0));
        assert!((buffer.vwap().unwrap() - 107.5).abs() < 1e-12);
    }

    #[test]
    fn test_next_trading_day_starts_fresh_vwap() {
        let mut buffer = TickBuffer::new(10);
        assert!(!buffer.push(tick(100.0, 10)));
        assert!(!buffer.push(tick(110.0, 30)));

        let next_day = Tick::new("NIFTY", 200.0, 5, open() + Duration::days(1));
        assert!(buffer.push(next_day));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.vwap(), Some(200.0));
        assert_eq!(buffer.session(), Some(chrono::NaiveDate::from_ymd_opt(2024, 10, 22).unwrap()));

        // a stale tick from the old day is dropped
        assert!(!buffer.push(tick(90.0, 5)));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.session(), Some(chrono::NaiveDate::from_ymd_opt(2024, 10, 22).unwrap()));
    }
}
