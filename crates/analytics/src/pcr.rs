//! Put/call ratios, max pain and the rolling PCR trend
//!
//! All figures use the front expiry of the chain.

use chrono::{DateTime, Utc};
use common::{OptionChain, OptionSnapshot, OptionType, Sentiment};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_PCR_HISTORY: usize = 60;
pub const DEFAULT_NEAR_STRIKES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PcrPoint {
    pub timestamp: DateTime<Utc>,
    /// Total put OI over total call OI
    pub pcr_oi: f64,
    pub pcr_volume: f64,
    pub pcr_oi_change: f64,
    /// PCR by OI over the strikes nearest spot
    pub near_pcr: f64,
    pub underlying_price: f64,
    pub max_pain: Option<f64>,
}

fn ratio(puts: f64, calls: f64) -> f64 {
    if calls != 0.0 {
        puts / calls
    } else {
        0.0
    }
}

/// Strike at which option writers pay out the least at expiry
pub fn max_pain<'a>(legs: impl IntoIterator<Item = &'a OptionSnapshot> + Clone) -> Option<f64> {
    let mut strikes: Vec<f64> = legs.clone().into_iter().map(|s| s.contract.strike).collect();
    strikes.sort_by(|a, b| a.total_cmp(b));
    strikes.dedup();

    strikes
        .into_iter()
        .map(|settle| {
            let pain: f64 = legs
                .clone()
                .into_iter()
                .map(|s| {
                    let k = s.contract.strike;
                    let payout = match s.contract.option_type {
                        OptionType::Call => (settle - k).max(0.0),
                        OptionType::Put => (k - settle).max(0.0),
                    };
                    payout * s.oi as f64
                })
                .sum();
            (settle, pain)
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(strike, _)| strike)
}

/// Compute ratios for the front expiry of a chain
pub fn pcr_point(chain: &OptionChain, near_strikes: usize) -> Option<PcrPoint> {
    let expiry = chain.nearest_expiry()?;
    let legs: Vec<&OptionSnapshot> = chain.for_expiry(expiry).collect();

    let (mut call_oi, mut put_oi) = (0.0, 0.0);
    let (mut call_vol, mut put_vol) = (0.0, 0.0);
    let (mut call_chg, mut put_chg) = (0.0, 0.0);
    for s in &legs {
        match s.contract.option_type {
            OptionType::Call => {
                call_oi += s.oi as f64;
                call_vol += s.volume as f64;
                call_chg += s.oi_change as f64;
            }
            OptionType::Put => {
                put_oi += s.oi as f64;
                put_vol += s.volume as f64;
                put_chg += s.oi_change as f64;
            }
        }
    }

    let mut strikes = chain.strikes(expiry);
    strikes.sort_by(|a, b| (a - chain.spot).abs().total_cmp(&(b - chain.spot).abs()));
    strikes.truncate(near_strikes);
    let (mut near_call, mut near_put) = (0.0, 0.0);
    for s in legs.iter().filter(|s| strikes.contains(&s.contract.strike)) {
        match s.contract.option_type {
            OptionType::Call => near_call += s.oi as f64,
            OptionType::Put => near_put += s.oi as f64,
        }
    }

    Some(PcrPoint {
        timestamp: chain.timestamp,
        pcr_oi: ratio(put_oi, call_oi),
        pcr_volume: ratio(put_vol, call_vol),
        pcr_oi_change: ratio(put_chg, call_chg),
        near_pcr: ratio(near_put, near_call),
        underlying_price: chain.spot,
        max_pain: max_pain(legs.iter().copied()),
    })
}

/// Per-underlying PCR history capped at a fixed length
#[derive(Debug)]
pub struct PcrTracker {
    capacity: usize,
    near_strikes: usize,
    history: HashMap<String, VecDeque<PcrPoint>>,
}

impl Default for PcrTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PCR_HISTORY, DEFAULT_NEAR_STRIKES)
    }
}

impl PcrTracker {
    pub fn new(capacity: usize, near_strikes: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            near_strikes: near_strikes.max(1),
            history: HashMap::new(),
        }
    }

    pub fn record(&mut self, chain: &OptionChain) -> Option<PcrPoint> {
        let point = pcr_point(chain, self.near_strikes)?;
        let series = self.history.entry(chain.underlying.clone()).or_default();
        series.push_back(point);
        while series.len() > self.capacity {
            series.pop_front();
        }
        Some(point)
    }

    pub fn latest(&self, underlying: &str) -> Option<PcrPoint> {
        self.history.get(underlying)?.back().copied()
    }

    pub fn history(&self, underlying: &str) -> Vec<PcrPoint> {
        self.history
            .get(underlying)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rising near-spot PCR reads bullish (put writing), falling bearish
    pub fn trend(&self, underlying: &str) -> Sentiment {
        let Some(series) = self.history.get(underlying) else {
            return Sentiment::Neutral;
        };
        let mut recent = series.iter().rev();
        match (recent.next(), recent.next()) {
            (Some(last), Some(prev)) if last.near_pcr > prev.near_pcr => Sentiment::Bullish,
            (Some(last), Some(prev)) if last.near_pcr < prev.near_pcr => Sentiment::Bearish,
            _ => Sentiment::Neutral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use common::OptionContract;

    fn leg(strike: f64, option_type: OptionType, oi: u64, volume: u64) -> OptionSnapshot {
        OptionSnapshot {
            contract: OptionContract::new(
                "NIFTY",
                NaiveDate::from_ymd_opt(2024, 10, 31).unwrap(),
                strike,
                option_type,
            ),
            ltp: 50.0,
            oi,
            oi_change: (oi / 10) as i64,
            volume,
            underlying_price: 25000.0,
            iv: None,
            timestamp: Utc::now(),
        }
    }

    fn chain(put_oi_at_atm: u64) -> OptionChain {
        OptionChain {
            underlying: "NIFTY".into(),
            spot: 25000.0,
            timestamp: Utc::now(),
            snapshots: vec![
                leg(24900.0, OptionType::Put, 3000, 100),
                leg(24900.0, OptionType::Call, 500, 50),
                leg(25000.0, OptionType::Put, put_oi_at_atm, 200),
                leg(25000.0, OptionType::Call, 2000, 300),
                leg(25100.0, OptionType::Put, 400, 20),
                leg(25100.0, OptionType::Call, 3500, 250),
            ],
        }
    }

    #[test]
    fn test_ratios() {
        let point = pcr_point(&chain(2000), 5).unwrap();
        assert!((point.pcr_oi - 5400.0 / 6000.0).abs() < 1e-12);
        assert!((point.pcr_volume - 320.0 / 600.0).abs() < 1e-12);
        assert!((point.pcr_oi_change - 540.0 / 600.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_pain() {
        // Heavy put OI below and call OI above pins settlement at the middle
        assert_eq!(pcr_point(&chain(2000), 5).unwrap().max_pain, Some(25000.0));
        assert_eq!(max_pain(std::iter::empty::<&OptionSnapshot>()), None);
    }

    #[test]
    fn test_trend_and_cap() {
        let mut tracker = PcrTracker::new(3, 1);
        assert_eq!(tracker.trend("NIFTY"), Sentiment::Neutral);
        tracker.record(&chain(2000));
        assert_eq!(tracker.trend("NIFTY"), Sentiment::Neutral);
        tracker.record(&chain(2600));
        assert_eq!(tracker.trend("NIFTY"), Sentiment::Bullish);
        tracker.record(&chain(1500));
        assert_eq!(tracker.trend("NIFTY"), Sentiment::Bearish);
        tracker.record(&chain(1500));
        assert_eq!(tracker.trend("NIFTY"), Sentiment::Neutral);
        assert_eq!(tracker.history("NIFTY").len(), 3);
        assert!((tracker.latest("NIFTY").unwrap().near_pcr - 0.75).abs() < 1e-12);
    }
}
