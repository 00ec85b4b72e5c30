use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use common::{trading_date, Candle, CandleInterval, Tick};
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_CANDLE_HISTORY: usize = 500;

type SeriesKey = (String, CandleInterval);

/// Aggregates ticks into OHLCV bars per (symbol, interval).
///
/// Closed bars are kept in a bounded history; the bar still forming is
/// returned as the last element of `candles`.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    closed: HashMap<SeriesKey, VecDeque<Candle>>,
    forming: HashMap<SeriesKey, Candle>,
    intervals: Vec<CandleInterval>,
    max_history: usize,
}

impl Default for CandleBuilder {
    fn default() -> Self {
        Self::new(vec![CandleInterval::OneMinute], DEFAULT_CANDLE_HISTORY)
    }
}

impl CandleBuilder {
    pub fn new(intervals: Vec<CandleInterval>, max_history: usize) -> Self {
        Self {
            closed: HashMap::new(),
            forming: HashMap::new(),
            intervals,
            max_history: max_history.max(1),
        }
    }

    fn bucket_start(timestamp: DateTime<Utc>, interval: CandleInterval) -> DateTime<Utc> {
        let secs = interval.as_seconds();
        let start = timestamp.timestamp().div_euclid(secs) * secs;
        Utc.timestamp_opt(start, 0).single().unwrap_or(timestamp)
    }

    fn push_closed(&mut self, key: SeriesKey, candle: Candle) {
        let series = self.closed.entry(key).or_default();
        series.push_back(candle);
        while series.len() > self.max_history {
            series.pop_front();
        }
    }

    pub fn add_tick(&mut self, tick: &Tick) {
        for interval in self.intervals.clone() {
            self.add_tick_to_interval(tick, interval);
        }
    }

    pub fn add_tick_to_interval(&mut self, tick: &Tick, interval: CandleInterval) {
        let key = (tick.symbol.clone(), interval);
        let open_time = Self::bucket_start(tick.timestamp, interval);

        match self.forming.get_mut(&key) {
            Some(current) if current.open_time == open_time => current.update(tick.price, tick.quantity),
            // late tick for an already closed bar
            Some(current) if open_time < current.open_time => {}
            _ => {
                let fresh = Candle::open_with(&tick.symbol, interval, open_time, tick.price, tick.quantity);
                if let Some(done) = self.forming.insert(key.clone(), fresh) {
                    self.push_closed(key, done);
                }
            }
        }
    }

    /// Most recent `limit` bars, oldest first; `limit == 0` returns all
    pub fn candles(&self, symbol: &str, interval: CandleInterval, limit: usize) -> Vec<Candle> {
        let key = (symbol.to_string(), interval);
        let mut out: Vec<Candle> = self
            .closed
            .get(&key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        if let Some(current) = self.forming.get(&key) {
            out.push(current.clone());
        }
        if limit > 0 && out.len() > limit {
            out.drain(..out.len() - limit);
        }
        out
    }

    /// Completed bars only, oldest first
    pub fn closed_candles(&self, symbol: &str, interval: CandleInterval) -> Vec<Candle> {
        self.closed
            .get(&(symbol.to_string(), interval))
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn closes(&self, symbol: &str, interval: CandleInterval) -> Vec<f64> {
        self.candles(symbol, interval, 0).iter().map(|c| c.close).collect()
    }

    /// Seed closed history, e.g. from a historical provider at startup
    pub fn seed(&mut self, candles: Vec<Candle>) {
        for candle in candles {
            let key = (candle.symbol.clone(), candle.interval);
            self.push_closed(key, candle);
        }
    }

    /// Move bars whose window has fully elapsed into closed history
    pub fn close_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<SeriesKey> = self
            .forming
            .iter()
            .filter(|(_, c)| (now - c.open_time).num_seconds() >= c.interval.as_seconds())
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            if let Some(done) = self.forming.remove(key) {
                self.push_closed(key.clone(), done);
            }
        }
        expired.len()
    }

    /// Drop `symbol`'s bars that belong to sessions before `date`
    pub fn retain_from(&mut self, symbol: &str, date: NaiveDate) {
        for ((s, _), series) in self.closed.iter_mut() {
            if s == symbol {
                series.retain(|c| trading_date(c.open_time) >= date);
            }
        }
        self.forming
            .retain(|(s, _), c| s != symbol || trading_date(c.open_time) >= date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 21, 4, 0, 0).unwrap()
    }

    fn tick(symbol: &str, price: f64, quantity: u64, secs: i64) -> Tick {
        Tick::new(symbol, price, quantity, base() + Duration::seconds(secs))
    }

    #[test]
    fn test_ticks_in_same_minute() {
        let mut builder = CandleBuilder::default();
        builder.add_tick(&tick("NIFTY", 25000.0, 10, 0));
        builder.add_tick(&tick("NIFTY", 25040.0, 5, 10));
        builder.add_tick(&tick("NIFTY", 24990.0, 5, 20));
        builder.add_tick(&tick("NIFTY", 25010.0, 0, 59));

        let bars = builder.candles("NIFTY", CandleInterval::OneMinute, 10);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, 25000.0);
        assert_eq!(bars[0].high, 25040.0);
        assert_eq!(bars[0].low, 24990.0);
        assert_eq!(bars[0].close, 25010.0);
        assert_eq!(bars[0].volume, 20);
    }

    #[test]
    fn test_rollover_and_limit() {
        let mut builder = CandleBuilder::new(vec![CandleInterval::OneMinute], 3);
        for i in 0..6 {
            builder.add_tick(&tick("NIFTY", 25000.0 + i as f64, 1, i * 60));
        }
        // 3 kept closed + 1 forming
        assert_eq!(builder.candles("NIFTY", CandleInterval::OneMinute, 0).len(), 4);
        assert_eq!(builder.closed_candles("NIFTY", CandleInterval::OneMinute).len(), 3);
        assert_eq!(builder.closes("NIFTY", CandleInterval::OneMinute), vec![25002.0, 25003.0, 25004.0, 25005.0]);
        assert_eq!(builder.candles("NIFTY", CandleInterval::OneMinute, 2).len(), 2);
    }

    #[test]
    fn test_late_tick_ignored() {
        let mut builder = CandleBuilder::default();
        builder.add_tick(&tick("NIFTY", 100.0, 1, 61));
        builder.add_tick(&tick("NIFTY", 999.0, 1, 5));
        let bars = builder.candles("NIFTY", CandleInterval::OneMinute, 0);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].high, 100.0);
    }

    #[test]
    fn test_close_expired_and_symbols() {
        let mut builder = CandleBuilder::default();
        builder.add_tick(&tick("NIFTY", 25000.0, 1, 0));
        builder.add_tick(&tick("BANKNIFTY", 52000.0, 1, 0));

        assert_eq!(builder.close_expired(base() + Duration::seconds(30)), 0);
        assert_eq!(builder.close_expired(base() + Duration::seconds(60)), 2);
        assert_eq!(builder.candles("NIFTY", CandleInterval::OneMinute, 0).len(), 1);
        assert_eq!(builder.closed_candles("BANKNIFTY", CandleInterval::OneMinute)[0].close, 52000.0);
    }

    #[test]
    fn test_retain_from_drops_earlier_sessions() {
        let mut builder = CandleBuilder::default();
        builder.add_tick(&tick("NIFTY", 25000.0, 1, 0));
        builder.add_tick(&tick("BANKNIFTY", 52000.0, 1, 0));
        let next_day = base() + Duration::days(1);
        builder.add_tick(&Tick::new("NIFTY", 25100.0, 1, next_day));

        builder.retain_from("NIFTY", trading_date(next_day));
        let bars = builder.candles("NIFTY", CandleInterval::OneMinute, 0);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].open, 25100.0);
        // other symbols keep their history
        assert_eq!(builder.candles("BANKNIFTY", CandleInterval::OneMinute, 0).len(), 1);
    }
}
