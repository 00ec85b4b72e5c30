//! Rolling implied-volatility regime analytics
//!
//! One bounded history per underlying, at most one point per trading day.
//! Rank and percentile report 0.0 until `min_history` points exist; callers
//! that need to tell "no signal" apart from a genuine zero read
//! [`IvAnalysis::sufficient_history`].

use crate::error::AnalyticsError;
use crate::surface::{SkewReading, TermPoint, VolSurface};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IvHistoryPoint {
    pub date: NaiveDate,
    pub iv: f64,
}

#[derive(Debug, Clone)]
pub struct IvAnalyzerConfig {
    pub window: usize,
    pub min_history: usize,
    pub high_rank: f64,
    pub low_rank: f64,
    pub high_percentile: f64,
    pub low_percentile: f64,
    pub spike_zscore: f64,
    pub spike_lookback: usize,
    pub skew_moneyness: f64,
    pub term_flat_threshold: f64,
}

impl Default for IvAnalyzerConfig {
    fn default() -> Self {
        Self {
            window: 252,
            min_history: 5,
            high_rank: 70.0,
            low_rank: 30.0,
            high_percentile: 80.0,
            low_percentile: 20.0,
            spike_zscore: 2.0,
            spike_lookback: 20,
            skew_moneyness: 0.02,
            term_flat_threshold: 1.0,
        }
    }
}

impl From<&config::IvConfig> for IvAnalyzerConfig {
    fn from(cfg: &config::IvConfig) -> Self {
        Self {
            window: cfg.window,
            min_history: cfg.min_history,
            high_rank: cfg.high_rank,
            low_rank: cfg.low_rank,
            high_percentile: cfg.high_percentile,
            low_percentile: cfg.low_percentile,
            spike_zscore: cfg.spike_zscore,
            spike_lookback: cfg.spike_lookback,
            skew_moneyness: cfg.skew_moneyness,
            term_flat_threshold: cfg.term_flat_threshold,
        }
    }
}

/// Volatility trading bias from rank and percentile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolSignal {
    /// IV elevated; premium selling favoured
    SellVol,
    /// IV depressed; premium buying favoured
    BuyVol,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TermShape {
    Contango,
    Backwardation,
    Flat,
}

#[derive(Debug, Clone, Serialize)]
pub struct TermStructure {
    pub points: Vec<TermPoint>,
    pub shape: TermShape,
    /// Vol points per expiry step, front to back
    pub slope: f64,
}

/// Snapshot of every IV metric for one underlying
#[derive(Debug, Clone, Serialize)]
pub struct IvAnalysis {
    pub underlying: String,
    pub current: Option<f64>,
    pub rank: f64,
    pub percentile: f64,
    pub sufficient_history: bool,
    pub history_len: usize,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub recent_average: Option<f64>,
    pub signal: VolSignal,
    pub spike: bool,
    pub skew: Option<SkewReading>,
    pub term_structure: Option<TermStructure>,
}

#[derive(Debug, Default)]
pub struct IvAnalyzer {
    config: IvAnalyzerConfig,
    history: HashMap<String, VecDeque<IvHistoryPoint>>,
    surfaces: HashMap<String, VolSurface>,
}

impl IvAnalyzer {
    pub fn new(config: IvAnalyzerConfig) -> Self {
        Self {
            config,
            history: HashMap::new(),
            surfaces: HashMap::new(),
        }
    }

    /// Record the representative IV for `date`.
    ///
    /// A second reading for the current day overwrites the first. Dates
    /// older than the latest point are rejected.
    pub fn record(&mut self, underlying: &str, iv: f64, date: NaiveDate) -> Result<(), AnalyticsError> {
        if !(iv.is_finite() && iv >= 0.0) {
            return Err(AnalyticsError::InvalidInput(format!("iv {} for {}", iv, underlying)));
        }
        let window = self.config.window.max(1);
        let series = self.history.entry(underlying.to_string()).or_default();

        match series.back_mut() {
            Some(last) if last.date == date => {
                last.iv = iv;
                return Ok(());
            }
            Some(last) if last.date > date => {
                return Err(AnalyticsError::InvalidInput(format!(
                    "iv for {} dated {} precedes latest {}",
                    underlying, date, last.date
                )));
            }
            _ => {}
        }

        series.push_back(IvHistoryPoint { date, iv });
        while series.len() > window {
            series.pop_front();
        }
        debug!(underlying, %date, iv, len = series.len(), "IV recorded");
        Ok(())
    }

    pub fn history(&self, underlying: &str) -> Vec<IvHistoryPoint> {
        self.history
            .get(underlying)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn history_len(&self, underlying: &str) -> usize {
        self.history.get(underlying).map_or(0, |s| s.len())
    }

    pub fn current(&self, underlying: &str) -> Option<f64> {
        self.history.get(underlying)?.back().map(|p| p.iv)
    }

    fn sufficient(&self, underlying: &str) -> bool {
        self.history_len(underlying) >= self.config.min_history.max(1)
    }

    /// Position of current IV within the window's range, 0..=100
    pub fn rank(&self, underlying: &str) -> f64 {
        if !self.sufficient(underlying) {
            return 0.0;
        }
        let Some(series) = self.history.get(underlying) else {
            return 0.0;
        };
        let Some(current) = series.back().map(|p| p.iv) else {
            return 0.0;
        };
        let (min, max) = series.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.iv), hi.max(p.iv))
        });
        if max <= min {
            return 0.0;
        }
        ((current - min) / (max - min)).clamp(0.0, 1.0) * 100.0
    }

    /// Share of days in the window with IV at or below current, 0..=100
    pub fn percentile(&self, underlying: &str) -> f64 {
        if !self.sufficient(underlying) {
            return 0.0;
        }
        let Some(series) = self.history.get(underlying) else {
            return 0.0;
        };
        let Some(current) = series.back().map(|p| p.iv) else {
            return 0.0;
        };
        let at_or_below = series.iter().filter(|p| p.iv <= current).count();
        at_or_below as f64 / series.len() as f64 * 100.0
    }

    pub fn signal(&self, rank: f64, percentile: f64) -> VolSignal {
        if rank > self.config.high_rank || percentile > self.config.high_percentile {
            VolSignal::SellVol
        } else if rank < self.config.low_rank || percentile < self.config.low_percentile {
            VolSignal::BuyVol
        } else {
            VolSignal::Neutral
        }
    }

    /// Current IV sits `spike_zscore` deviations above the recent mean.
    ///
    /// Needs at least half the lookback of prior points.
    pub fn is_spike(&self, underlying: &str) -> bool {
        let Some(series) = self.history.get(underlying) else {
            return false;
        };
        let Some(current) = series.back().map(|p| p.iv) else {
            return false;
        };
        let prior: Vec<f64> = series
            .iter()
            .rev()
            .skip(1)
            .take(self.config.spike_lookback)
            .map(|p| p.iv)
            .collect();
        if prior.len() < (self.config.spike_lookback / 2).max(2) {
            return false;
        }
        let mean = prior.iter().sum::<f64>() / prior.len() as f64;
        let var = prior.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (prior.len() - 1) as f64;
        let std = var.sqrt();
        std > 0.0 && (current - mean) / std > self.config.spike_zscore
    }

    /// Replace the latest smile data for an underlying
    pub fn update_surface(&mut self, surface: VolSurface) {
        self.surfaces.insert(surface.underlying.clone(), surface);
    }

    pub fn surface(&self, underlying: &str) -> Option<&VolSurface> {
        self.surfaces.get(underlying)
    }

    /// OTM put IV minus OTM call IV on the front expiry
    pub fn skew(&self, underlying: &str) -> Option<SkewReading> {
        self.surfaces.get(underlying)?.skew(self.config.skew_moneyness)
    }

    pub fn term_structure(&self, underlying: &str) -> Option<TermStructure> {
        let points = self.surfaces.get(underlying)?.term_structure();
        let (first, last) = (points.first()?, points.last()?);
        let slope = if points.len() > 1 {
            (last.iv - first.iv) * 100.0 / (points.len() - 1) as f64
        } else {
            0.0
        };
        let shape = if slope > self.config.term_flat_threshold {
            TermShape::Contango
        } else if slope < -self.config.term_flat_threshold {
            TermShape::Backwardation
        } else {
            TermShape::Flat
        };
        Some(TermStructure { points, shape, slope })
    }

    pub fn analysis(&self, underlying: &str) -> IvAnalysis {
        let series = self.history.get(underlying);
        let values: Vec<f64> = series.map(|s| s.iter().map(|p| p.iv).collect()).unwrap_or_default();
        let recent: Vec<f64> = values.iter().rev().take(self.config.spike_lookback).copied().collect();
        let rank = self.rank(underlying);
        let percentile = self.percentile(underlying);
        let sufficient_history = self.sufficient(underlying);

        IvAnalysis {
            underlying: underlying.to_string(),
            current: values.last().copied(),
            rank,
            percentile,
            sufficient_history,
            history_len: values.len(),
            high: values.iter().copied().reduce(f64::max),
            low: values.iter().copied().reduce(f64::min),
            recent_average: (!recent.is_empty()).then(|| recent.iter().sum::<f64>() / recent.len() as f64),
            signal: if sufficient_history {
                self.signal(rank, percentile)
            } else {
                VolSignal::Neutral
            },
            spike: self.is_spike(underlying),
            skew: self.skew(underlying),
            term_structure: self.term_structure(underlying),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(n as u64)
    }

    fn analyzer_with(values: &[f64]) -> IvAnalyzer {
        let mut analyzer = IvAnalyzer::default();
        for (i, v) in values.iter().enumerate() {
            analyzer.record("NIFTY", *v, day(i as u32)).unwrap();
        }
        analyzer
    }

    #[test]
    fn test_rank_reference_history() {
        let analyzer = analyzer_with(&[12.0, 14.0, 18.0, 22.0, 16.0]);
        assert!((analyzer.rank("NIFTY") - 40.0).abs() < 1e-9);
        assert!((analyzer.percentile("NIFTY") - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_history_reports_no_signal() {
        let analyzer = analyzer_with(&[12.0, 30.0, 14.0]);
        assert_eq!(analyzer.rank("NIFTY"), 0.0);
        assert_eq!(analyzer.percentile("NIFTY"), 0.0);
        let analysis = analyzer.analysis("NIFTY");
        assert!(!analysis.sufficient_history);
        assert_eq!(analysis.signal, VolSignal::Neutral);
        assert_eq!(IvAnalyzer::default().rank("UNKNOWN"), 0.0);
    }

    #[test]
    fn test_rank_always_bounded() {
        let cases: &[&[f64]] = &[
            &[10.0, 10.0, 10.0, 10.0, 10.0],
            &[50.0, 1.0, 2.0, 3.0, 0.0],
            &[1.0, 2.0, 3.0, 4.0, 99.0],
            &[0.0, 0.0, 0.0, 0.0, 0.0, 1e-12],
        ];
        for values in cases {
            let analyzer = analyzer_with(values);
            let rank = analyzer.rank("NIFTY");
            assert!((0.0..=100.0).contains(&rank), "rank {} for {:?}", rank, values);
        }
    }

    #[test]
    fn test_record_idempotent_per_day_and_windowed() {
        let mut analyzer = IvAnalyzer::new(IvAnalyzerConfig {
            window: 3,
            ..Default::default()
        });
        analyzer.record("NIFTY", 10.0, day(0)).unwrap();
        analyzer.record("NIFTY", 11.0, day(0)).unwrap();
        assert_eq!(analyzer.history_len("NIFTY"), 1);
        assert_eq!(analyzer.current("NIFTY"), Some(11.0));

        for i in 1..6 {
            analyzer.record("NIFTY", 10.0 + i as f64, day(i)).unwrap();
        }
        let history = analyzer.history("NIFTY");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].date, day(3));

        assert!(analyzer.record("NIFTY", 12.0, day(1)).is_err());
        assert!(analyzer.record("NIFTY", f64::NAN, day(9)).is_err());
    }

    #[test]
    fn test_signal_thresholds() {
        let analyzer = IvAnalyzer::default();
        assert_eq!(analyzer.signal(75.0, 50.0), VolSignal::SellVol);
        assert_eq!(analyzer.signal(50.0, 85.0), VolSignal::SellVol);
        assert_eq!(analyzer.signal(25.0, 50.0), VolSignal::BuyVol);
        assert_eq!(analyzer.signal(50.0, 50.0), VolSignal::Neutral);
    }

    #[test]
    fn test_spike_detection() {
        let mut values: Vec<f64> = (0..15).map(|i| 14.0 + (i % 3) as f64 * 0.5).collect();
        values.push(25.0);
        assert!(analyzer_with(&values).is_spike("NIFTY"));

        values.pop();
        values.push(14.5);
        assert!(!analyzer_with(&values).is_spike("NIFTY"));

        assert!(!analyzer_with(&[10.0, 30.0]).is_spike("NIFTY"));
    }
}
