//! Support and resistance detection
//!
//! Candidates come from three independent sources:
//! - open-interest concentration on the front expiry
//! - swing highs/lows on a smoothed close series
//! - high-volume nodes from price-binned traded volume
//!
//! Candidates within the merge tolerance of each other collapse into one
//! level. Levels are scored by how many sources agree, carried across
//! cycles with a decay, and dropped once they go unreinforced for
//! `staleness_cycles` refreshes.

use common::{OptionChain, OptionType, Sentiment};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Support,
    Resistance,
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelKind::Support => write!(f, "support"),
            LevelKind::Resistance => write!(f, "resistance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    OpenInterest,
    Swing,
    VolumeNode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportResistanceLevel {
    pub underlying: String,
    pub price: f64,
    pub kind: LevelKind,
    pub sources: BTreeSet<LevelSource>,
    pub score: f64,
    /// Refresh cycle in which this level last received a candidate
    pub last_reinforced: u64,
}

impl SupportResistanceLevel {
    /// A level seen only as a volume node carries no direction of its own
    pub fn is_pure_volume_node(&self) -> bool {
        self.sources.len() == 1 && self.sources.contains(&LevelSource::VolumeNode)
    }

    pub fn implied_direction(&self) -> Option<Sentiment> {
        if self.is_pure_volume_node() {
            return None;
        }
        Some(match self.kind {
            LevelKind::Support => Sentiment::Bullish,
            LevelKind::Resistance => Sentiment::Bearish,
        })
    }

    pub fn distance_pct(&self, price: f64) -> f64 {
        (price - self.price).abs() / self.price
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelCandidate {
    pub price: f64,
    /// Fixed for OI candidates, otherwise decided by position against spot
    pub kind: Option<LevelKind>,
    pub source: LevelSource,
}

#[derive(Debug, Clone)]
pub struct LevelDetectorConfig {
    pub oi_top_n: usize,
    pub merge_tolerance: f64,
    pub smoothing_window: usize,
    pub swing_min_spacing: usize,
    pub swing_min_prominence: f64,
    pub min_swing_bars: usize,
    pub hvn_bins: usize,
    pub hvn_top_n: usize,
    pub staleness_cycles: u64,
    pub decay: f64,
    pub oi_weight: f64,
    pub swing_weight: f64,
    pub volume_weight: f64,
    pub agreement_bonus: f64,
}

impl Default for LevelDetectorConfig {
    fn default() -> Self {
        Self::from(&config::LevelsConfig::default())
    }
}

impl From<&config::LevelsConfig> for LevelDetectorConfig {
    fn from(c: &config::LevelsConfig) -> Self {
        Self {
            oi_top_n: c.oi_top_n,
            merge_tolerance: c.merge_tolerance,
            smoothing_window: c.smoothing_window,
            swing_min_spacing: c.swing_min_spacing,
            swing_min_prominence: c.swing_min_prominence,
            min_swing_bars: c.min_swing_bars,
            hvn_bins: c.hvn_bins,
            hvn_top_n: c.hvn_top_n,
            staleness_cycles: c.staleness_cycles,
            decay: c.decay,
            oi_weight: c.oi_weight,
            swing_weight: c.swing_weight,
            volume_weight: c.volume_weight,
            agreement_bonus: c.agreement_bonus,
        }
    }
}

impl LevelDetectorConfig {
    fn weight(&self, source: LevelSource) -> f64 {
        match source {
            LevelSource::OpenInterest => self.oi_weight,
            LevelSource::Swing => self.swing_weight,
            LevelSource::VolumeNode => self.volume_weight,
        }
    }
}

/// Strikes with the largest put OI (support) and call OI (resistance)
pub fn oi_candidates(chain: &OptionChain, top_n: usize) -> Vec<LevelCandidate> {
    let Some(expiry) = chain.nearest_expiry() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for option_type in [OptionType::Put, OptionType::Call] {
        let mut legs: Vec<_> = chain
            .for_expiry(expiry)
            .filter(|s| s.contract.option_type == option_type && s.oi > 0)
            .collect();
        legs.sort_by(|a, b| b.oi.cmp(&a.oi));
        let kind = match option_type {
            OptionType::Put => LevelKind::Support,
            OptionType::Call => LevelKind::Resistance,
        };
        out.extend(legs.into_iter().take(top_n).map(|s| LevelCandidate {
            price: s.contract.strike,
            kind: Some(kind),
            source: LevelSource::OpenInterest,
        }));
    }
    out
}

/// Centered simple moving average, window clamped at the edges
pub fn smooth(series: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    (0..series.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(series.len());
            let slice = &series[lo..hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub is_high: bool,
}

/// Local extrema of the smoothed series.
///
/// A point qualifies when it is the extreme of the `spacing` bars on both
/// sides and stands at least `min_prominence` (fraction of price) clear of
/// the opposite extreme in that neighbourhood. The reported price is the
/// raw close at that bar.
pub fn swing_points(
    closes: &[f64],
    smoothing_window: usize,
    spacing: usize,
    min_prominence: f64,
) -> Vec<SwingPoint> {
    let spacing = spacing.max(1);
    if closes.len() < 2 * spacing + 1 {
        return Vec::new();
    }
    let smoothed = smooth(closes, smoothing_window.max(1));
    let mut points = Vec::new();

    for i in spacing..smoothed.len() - spacing {
        let window = &smoothed[i - spacing..=i + spacing];
        let here = smoothed[i];
        let max = window.iter().copied().fold(f64::MIN, f64::max);
        let min = window.iter().copied().fold(f64::MAX, f64::min);
        if here <= 0.0 {
            continue;
        }

        // strict on the left so a plateau yields one point
        if here >= max && here > smoothed[i - 1] && (here - min) / here >= min_prominence {
            points.push(SwingPoint { index: i, price: closes[i], is_high: true });
        } else if here <= min && here < smoothed[i - 1] && (max - here) / here >= min_prominence {
            points.push(SwingPoint { index: i, price: closes[i], is_high: false });
        }
    }
    points
}

/// Bin centres of the densest local maxima in the traded-volume profile
pub fn volume_nodes(trades: &[(f64, u64)], bins: usize, top_n: usize) -> Vec<f64> {
    let total: u64 = trades.iter().map(|(_, q)| q).sum();
    if trades.is_empty() || bins == 0 || total == 0 {
        return Vec::new();
    }

    let lo = trades.iter().map(|(p, _)| *p).fold(f64::MAX, f64::min);
    let hi = trades.iter().map(|(p, _)| *p).fold(f64::MIN, f64::max);
    if hi - lo <= f64::EPSILON {
        return vec![lo];
    }

    let width = (hi - lo) / bins as f64;
    let mut profile = vec![0u64; bins];
    for (price, qty) in trades {
        let idx = (((price - lo) / width) as usize).min(bins - 1);
        profile[idx] += qty;
    }

    let mut peaks: Vec<(usize, u64)> = (0..bins)
        .filter(|&i| {
            let v = profile[i];
            let left = if i == 0 { 0 } else { profile[i - 1] };
            let right = if i + 1 == bins { 0 } else { profile[i + 1] };
            v > 0 && v > left && v >= right
        })
        .map(|i| (i, profile[i]))
        .collect();
    peaks.sort_by(|a, b| b.1.cmp(&a.1));

    peaks
        .into_iter()
        .take(top_n)
        .map(|(i, _)| lo + width * (i as f64 + 0.5))
        .collect()
}

/// Inputs for one refresh cycle
#[derive(Debug, Clone, Copy)]
pub struct LevelInputs<'a> {
    pub spot: f64,
    pub chain: Option<&'a OptionChain>,
    /// Bar closes, oldest first
    pub closes: &'a [f64],
    /// Recent trades as (price, quantity)
    pub trades: &'a [(f64, u64)],
}

#[derive(Debug, Default)]
struct UnderlyingLevels {
    cycle: u64,
    levels: Vec<SupportResistanceLevel>,
}

#[derive(Debug, Default)]
pub struct LevelDetector {
    config: LevelDetectorConfig,
    state: HashMap<String, UnderlyingLevels>,
}

impl LevelDetector {
    pub fn new(config: LevelDetectorConfig) -> Self {
        Self {
            config,
            state: HashMap::new(),
        }
    }

    pub fn config(&self) -> &LevelDetectorConfig {
        &self.config
    }

    pub fn candidates(&self, inputs: &LevelInputs<'_>) -> Vec<LevelCandidate> {
        let c = &self.config;
        let mut out = Vec::new();

        if let Some(chain) = inputs.chain {
            out.extend(oi_candidates(chain, c.oi_top_n));
        }
        if inputs.closes.len() >= c.min_swing_bars {
            out.extend(
                swing_points(inputs.closes, c.smoothing_window, c.swing_min_spacing, c.swing_min_prominence)
                    .into_iter()
                    .map(|p| LevelCandidate {
                        price: p.price,
                        kind: None,
                        source: LevelSource::Swing,
                    }),
            );
        }
        out.extend(
            volume_nodes(inputs.trades, c.hvn_bins, c.hvn_top_n)
                .into_iter()
                .map(|price| LevelCandidate {
                    price,
                    kind: None,
                    source: LevelSource::VolumeNode,
                }),
        );
        out
    }

    /// Run one detection cycle and return the active levels, best first
    pub fn refresh(&mut self, underlying: &str, inputs: LevelInputs<'_>) -> Vec<SupportResistanceLevel> {
        let fresh = self.cluster(underlying, inputs.spot, self.candidates(&inputs));
        let c = &self.config;
        let entry = self.state.entry(underlying.to_string()).or_default();
        entry.cycle += 1;
        let cycle = entry.cycle;

        for level in entry.levels.iter_mut() {
            level.score *= c.decay;
        }

        for mut level in fresh {
            level.last_reinforced = cycle;
            let existing = entry
                .levels
                .iter_mut()
                .find(|l| l.distance_pct(level.price) <= c.merge_tolerance);
            match existing {
                Some(prev) => {
                    prev.price = level.price;
                    prev.kind = level.kind;
                    prev.sources = level.sources;
                    prev.score += level.score;
                    prev.last_reinforced = cycle;
                }
                None => entry.levels.push(level),
            }
        }

        let before = entry.levels.len();
        entry
            .levels
            .retain(|l| cycle - l.last_reinforced < c.staleness_cycles.max(1));
        if entry.levels.len() < before {
            debug!(underlying, dropped = before - entry.levels.len(), "stale levels dropped");
        }

        entry.levels.sort_by(|a, b| b.score.total_cmp(&a.score));
        entry.levels.clone()
    }

    fn cluster(&self, underlying: &str, spot: f64, mut candidates: Vec<LevelCandidate>) -> Vec<SupportResistanceLevel> {
        let c = &self.config;
        candidates.retain(|x| x.price.is_finite() && x.price > 0.0);
        candidates.sort_by(|a, b| a.price.total_cmp(&b.price));

        let mut groups: Vec<Vec<LevelCandidate>> = Vec::new();
        for cand in candidates {
            match groups.last_mut() {
                Some(group) if (cand.price - group[0].price).abs() / group[0].price <= c.merge_tolerance => {
                    group.push(cand)
                }
                _ => groups.push(vec![cand]),
            }
        }

        groups
            .into_iter()
            .map(|group| {
                let total_weight: f64 = group.iter().map(|x| c.weight(x.source)).sum();
                let price = if total_weight > 0.0 {
                    group.iter().map(|x| x.price * c.weight(x.source)).sum::<f64>() / total_weight
                } else {
                    group[0].price
                };

                let sources: BTreeSet<LevelSource> = group.iter().map(|x| x.source).collect();
                let score = sources.iter().map(|s| c.weight(*s)).sum::<f64>()
                    + c.agreement_bonus * (sources.len() as f64 - 1.0);

                let fixed_kinds: HashSet<LevelKind> = group.iter().filter_map(|x| x.kind).collect();
                let kind = match group.iter().find_map(|x| x.kind) {
                    Some(k) if fixed_kinds.len() == 1 => k,
                    _ if price < spot => LevelKind::Support,
                    _ => LevelKind::Resistance,
                };

                SupportResistanceLevel {
                    underlying: underlying.to_string(),
                    price,
                    kind,
                    sources,
                    score,
                    last_reinforced: 0,
                }
            })
            .collect()
    }

    pub fn levels(&self, underlying: &str) -> Vec<SupportResistanceLevel> {
        self.state
            .get(underlying)
            .map(|s| s.levels.clone())
            .unwrap_or_default()
    }

    /// Nearest active level within `tolerance` (fraction of level price)
    pub fn touching(&self, underlying: &str, price: f64, tolerance: f64) -> Option<SupportResistanceLevel> {
        touching(&self.levels(underlying), price, tolerance).cloned()
    }
}

pub fn touching(levels: &[SupportResistanceLevel], price: f64, tolerance: f64) -> Option<&SupportResistanceLevel> {
    levels
        .iter()
        .filter(|l| l.distance_pct(price) <= tolerance)
        .min_by(|a, b| a.distance_pct(price).total_cmp(&b.distance_pct(price)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use common::{OptionContract, OptionSnapshot};

    fn chain(legs: &[(f64, OptionType, u64)]) -> OptionChain {
        let expiry = NaiveDate::from_ymd_opt(2024, 10, 31).unwrap();
        OptionChain {
            underlying: "NIFTY".into(),
            spot: 25000.0,
            timestamp: Utc::now(),
            snapshots: legs
                .iter()
                .map(|(k, t, oi)| OptionSnapshot {
                    contract: OptionContract::new("NIFTY", expiry, *k, *t),
                    ltp: 10.0,
                    oi: *oi,
                    oi_change: 0,
                    volume: 0,
                    underlying_price: 25000.0,
                    iv: None,
                    timestamp: Utc::now(),
                })
                .collect(),
        }
    }

    fn config() -> LevelDetectorConfig {
        LevelDetectorConfig {
            oi_top_n: 1,
            min_swing_bars: 5,
            smoothing_window: 1,
            swing_min_spacing: 2,
            ..LevelDetectorConfig::default()
        }
    }

    #[test]
    fn test_oi_concentration() {
        let chain = chain(&[
            (24800.0, OptionType::Put, 9000),
            (24900.0, OptionType::Put, 4000),
            (25200.0, OptionType::Call, 12000),
            (25100.0, OptionType::Call, 3000),
        ]);
        let cands = oi_candidates(&chain, 1);
        assert_eq!(cands.len(), 2);
        assert!(cands.contains(&LevelCandidate {
            price: 24800.0,
            kind: Some(LevelKind::Support),
            source: LevelSource::OpenInterest
        }));
        assert!(cands.contains(&LevelCandidate {
            price: 25200.0,
            kind: Some(LevelKind::Resistance),
            source: LevelSource::OpenInterest
        }));
    }

    #[test]
    fn test_swing_points() {
        let closes = [100.0, 101.0, 103.0, 101.0, 100.0, 98.0, 96.0, 98.0, 99.0];
        let points = swing_points(&closes, 1, 2, 0.001);
        assert_eq!(points.len(), 2);
        assert!(points[0].is_high && points[0].price == 103.0);
        assert!(!points[1].is_high && points[1].price == 96.0);

        // Too shallow to count
        assert!(swing_points(&closes, 1, 2, 0.5).is_empty());
    }

    #[test]
    fn test_volume_nodes() {
        let trades = [(100.0, 10), (100.2, 5), (105.0, 50), (105.1, 40), (110.0, 30)];
        let nodes = volume_nodes(&trades, 10, 2);
        assert_eq!(nodes.len(), 2);
        assert!((nodes[0] - 105.5).abs() < 1e-9);
        assert!((nodes[1] - 109.5).abs() < 1e-9);
        assert!(volume_nodes(&[], 10, 2).is_empty());
    }

    #[test]
    fn test_agreeing_sources_merge_and_outscore() {
        let mut detector = LevelDetector::new(config());
        let chain = chain(&[(24800.0, OptionType::Put, 9000), (25300.0, OptionType::Call, 8000)]);
        let closes = [25100.0, 24950.0, 24801.0, 24950.0, 25100.0, 25150.0];
        let levels = detector.refresh(
            "NIFTY",
            LevelInputs {
                spot: 25000.0,
                chain: Some(&chain),
                closes: &closes,
                trades: &[],
            },
        );

        let top = &levels[0];
        assert_eq!(top.kind, LevelKind::Support);
        assert!(top.sources.contains(&LevelSource::OpenInterest));
        assert!(top.sources.contains(&LevelSource::Swing));
        assert!((top.price - 24800.5).abs() < 1e-9);
        assert!(top.score > levels[1].score);
        assert_eq!(top.implied_direction(), Some(Sentiment::Bullish));

        let touched = detector.touching("NIFTY", 24805.0, 0.0005).unwrap();
        assert_eq!(touched.kind, LevelKind::Support);
        assert!(detector.touching("NIFTY", 24950.0, 0.0005).is_none());
    }

    #[test]
    fn test_stale_levels_decay_out() {
        let mut detector = LevelDetector::new(LevelDetectorConfig {
            staleness_cycles: 2,
            ..config()
        });
        let chain = chain(&[(24800.0, OptionType::Put, 9000)]);
        let with_chain = LevelInputs { spot: 25000.0, chain: Some(&chain), closes: &[], trades: &[] };
        let empty = LevelInputs { spot: 25000.0, chain: None, closes: &[], trades: &[] };

        let first = detector.refresh("NIFTY", with_chain);
        assert_eq!(first.len(), 1);
        let second = detector.refresh("NIFTY", empty);
        assert_eq!(second.len(), 1);
        assert!(second[0].score < first[0].score);
        assert!(detector.refresh("NIFTY", empty).is_empty());
    }

    #[test]
    fn test_pure_volume_node_has_no_direction() {
        let mut detector = LevelDetector::new(config());
        let trades = [(25010.0, 100)];
        let levels = detector.refresh(
            "NIFTY",
            LevelInputs { spot: 25000.0, chain: None, closes: &[], trades: &trades },
        );
        assert_eq!(levels.len(), 1);
        assert!(levels[0].is_pure_volume_node());
        assert_eq!(levels[0].kind, LevelKind::Resistance);
        assert_eq!(levels[0].implied_direction(), None);
    }
}
