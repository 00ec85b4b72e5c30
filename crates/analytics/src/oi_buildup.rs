//! Open-interest buildup classification
//!
//! Each leg is compared against its previous snapshot. The sign of the OI
//! change and of the underlying's price change select exactly one pattern;
//! strength compares |delta OI| against the leg's own rolling average.

use crate::error::AnalyticsError;
use chrono::{DateTime, Utc};
use common::{OptionChain, OptionContract, OptionSnapshot, OptionType, Sentiment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildupPattern {
    LongBuildup,
    ShortBuildup,
    LongUnwinding,
    ShortCovering,
    Neutral,
}

impl BuildupPattern {
    /// Classify from OI and underlying price deltas.
    ///
    /// Moves inside the dead bands count as unchanged and classify Neutral.
    pub fn classify(delta_oi: i64, delta_price: f64, oi_dead_band: u64, price_dead_band: f64) -> Self {
        let oi_up = delta_oi > 0 && delta_oi.unsigned_abs() > oi_dead_band;
        let oi_down = delta_oi < 0 && delta_oi.unsigned_abs() > oi_dead_band;
        let price_up = delta_price > price_dead_band;
        let price_down = delta_price < -price_dead_band;

        match (oi_up, oi_down, price_up, price_down) {
            (true, _, true, _) => BuildupPattern::LongBuildup,
            (true, _, _, true) => BuildupPattern::ShortBuildup,
            (_, true, _, true) => BuildupPattern::LongUnwinding,
            (_, true, true, _) => BuildupPattern::ShortCovering,
            _ => BuildupPattern::Neutral,
        }
    }

    pub fn sentiment(&self) -> Sentiment {
        match self {
            BuildupPattern::LongBuildup | BuildupPattern::ShortCovering => Sentiment::Bullish,
            BuildupPattern::ShortBuildup | BuildupPattern::LongUnwinding => Sentiment::Bearish,
            BuildupPattern::Neutral => Sentiment::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildupPattern::LongBuildup => "long_buildup",
            BuildupPattern::ShortBuildup => "short_buildup",
            BuildupPattern::LongUnwinding => "long_unwinding",
            BuildupPattern::ShortCovering => "short_covering",
            BuildupPattern::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for BuildupPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            BuildupPattern::LongBuildup => "Long Buildup",
            BuildupPattern::ShortBuildup => "Short Buildup",
            BuildupPattern::LongUnwinding => "Long Unwinding",
            BuildupPattern::ShortCovering => "Short Covering",
            BuildupPattern::Neutral => "Neutral",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for BuildupPattern {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '-'], "_").as_str() {
            "long_buildup" => Ok(BuildupPattern::LongBuildup),
            "short_buildup" => Ok(BuildupPattern::ShortBuildup),
            "long_unwinding" => Ok(BuildupPattern::LongUnwinding),
            "short_covering" => Ok(BuildupPattern::ShortCovering),
            "neutral" => Ok(BuildupPattern::Neutral),
            _ => Err(format!("unknown buildup pattern: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildupStrength {
    Weak,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Serialize)]
pub struct OiBuildupRecord {
    pub contract: OptionContract,
    pub pattern: BuildupPattern,
    pub strength: BuildupStrength,
    pub delta_oi: i64,
    pub delta_price: f64,
    pub interpretation: String,
    pub timestamp: DateTime<Utc>,
}

fn interpret(pattern: BuildupPattern, contract: &OptionContract) -> String {
    let leg = format!("{} {}", contract.strike, contract.option_type);
    match (pattern, contract.option_type) {
        (BuildupPattern::LongBuildup, OptionType::Call) => format!("Fresh longs at {} - bullish", leg),
        (BuildupPattern::LongBuildup, OptionType::Put) => format!("Fresh longs at {} - bearish", leg),
        (BuildupPattern::ShortBuildup, OptionType::Call) => format!("Call writing at {} - resistance", leg),
        (BuildupPattern::ShortBuildup, OptionType::Put) => format!("Put writing at {} - support", leg),
        (BuildupPattern::LongUnwinding, OptionType::Call) => format!("Longs exiting at {} - bearish", leg),
        (BuildupPattern::LongUnwinding, OptionType::Put) => format!("Longs exiting at {} - bullish", leg),
        (BuildupPattern::ShortCovering, OptionType::Call) => format!("Shorts covering at {} - breakout", leg),
        (BuildupPattern::ShortCovering, OptionType::Put) => format!("Shorts covering at {} - breakdown", leg),
        (BuildupPattern::Neutral, _) => format!("No significant activity at {}", leg),
    }
}

/// Which side is adding open interest on the day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketControl {
    /// Put writers dominate
    Buyers,
    /// Call writers dominate
    Sellers,
    Balanced,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KeyLevels {
    pub support: Vec<f64>,
    pub resistance: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildupSummary {
    pub underlying: String,
    pub total: usize,
    pub distribution: BTreeMap<BuildupPattern, usize>,
    pub bullish: usize,
    pub bearish: usize,
    pub strong: usize,
    pub verdict: Sentiment,
    /// Majority exceeds minority by the configured conviction ratio
    pub conviction: bool,
    pub key_levels: KeyLevels,
    pub control: MarketControl,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BuildupClassifierConfig {
    pub rolling_window: usize,
    pub strong_ratio: f64,
    pub moderate_ratio: f64,
    pub conviction_ratio: f64,
    pub oi_dead_band: u64,
    pub price_dead_band: f64,
}

impl Default for BuildupClassifierConfig {
    fn default() -> Self {
        Self {
            rolling_window: 20,
            strong_ratio: 2.0,
            moderate_ratio: 1.0,
            conviction_ratio: 1.5,
            oi_dead_band: 0,
            price_dead_band: 0.0,
        }
    }
}

impl From<&config::BuildupConfig> for BuildupClassifierConfig {
    fn from(cfg: &config::BuildupConfig) -> Self {
        Self {
            rolling_window: cfg.rolling_window,
            strong_ratio: cfg.strong_ratio,
            moderate_ratio: cfg.moderate_ratio,
            conviction_ratio: cfg.conviction_ratio,
            oi_dead_band: cfg.oi_dead_band,
            price_dead_band: cfg.price_dead_band,
        }
    }
}

#[derive(Debug, Default)]
struct LegState {
    timestamp: Option<DateTime<Utc>>,
    oi: u64,
    underlying_price: f64,
    abs_changes: VecDeque<u64>,
}

#[derive(Debug, Default)]
pub struct OiBuildupClassifier {
    config: BuildupClassifierConfig,
    legs: HashMap<OptionContract, LegState>,
    latest: HashMap<String, Vec<OiBuildupRecord>>,
    summaries: HashMap<String, BuildupSummary>,
}

impl OiBuildupClassifier {
    pub fn new(config: BuildupClassifierConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    fn strength(&self, abs_delta: u64, history: &VecDeque<u64>) -> BuildupStrength {
        if history.is_empty() {
            return BuildupStrength::Weak;
        }
        let mean = history.iter().sum::<u64>() as f64 / history.len() as f64;
        if mean <= 0.0 {
            return if abs_delta > 0 {
                BuildupStrength::Strong
            } else {
                BuildupStrength::Weak
            };
        }
        let ratio = abs_delta as f64 / mean;
        if ratio >= self.config.strong_ratio {
            BuildupStrength::Strong
        } else if ratio >= self.config.moderate_ratio {
            BuildupStrength::Moderate
        } else {
            BuildupStrength::Weak
        }
    }

    /// Compare a snapshot with the previous one for the same contract.
    ///
    /// Returns `Ok(None)` for the first snapshot of a contract.
    pub fn ingest(&mut self, snapshot: &OptionSnapshot) -> Result<Option<OiBuildupRecord>, AnalyticsError> {
        let window = self.config.rolling_window.max(1);
        let mut state = self.legs.remove(&snapshot.contract).unwrap_or_default();

        let Some(last_ts) = state.timestamp else {
            state.timestamp = Some(snapshot.timestamp);
            state.oi = snapshot.oi;
            state.underlying_price = snapshot.underlying_price;
            self.legs.insert(snapshot.contract.clone(), state);
            return Ok(None);
        };

        if snapshot.timestamp < last_ts {
            self.legs.insert(snapshot.contract.clone(), state);
            return Err(AnalyticsError::OutOfOrderSnapshot {
                contract: snapshot.contract.clone(),
                last: last_ts,
                got: snapshot.timestamp,
            });
        }

        let delta_oi = snapshot.oi as i64 - state.oi as i64;
        let delta_price = snapshot.underlying_price - state.underlying_price;
        let pattern = BuildupPattern::classify(
            delta_oi,
            delta_price,
            self.config.oi_dead_band,
            self.config.price_dead_band,
        );
        let strength = if pattern == BuildupPattern::Neutral {
            BuildupStrength::Weak
        } else {
            self.strength(delta_oi.unsigned_abs(), &state.abs_changes)
        };

        state.abs_changes.push_back(delta_oi.unsigned_abs());
        while state.abs_changes.len() > window {
            state.abs_changes.pop_front();
        }
        state.timestamp = Some(snapshot.timestamp);
        state.oi = snapshot.oi;
        state.underlying_price = snapshot.underlying_price;
        self.legs.insert(snapshot.contract.clone(), state);

        Ok(Some(OiBuildupRecord {
            contract: snapshot.contract.clone(),
            pattern,
            strength,
            delta_oi,
            delta_price,
            interpretation: interpret(pattern, &snapshot.contract),
            timestamp: snapshot.timestamp,
        }))
    }

    /// Classify every leg in a chain and refresh the underlying's summary.
    ///
    /// Out-of-order legs are logged and skipped, and history for contracts
    /// missing from the chain (expired or dropped strikes) is discarded.
    /// Returns `None` until at least one leg has a previous snapshot to
    /// compare against.
    pub fn ingest_chain(&mut self, chain: &OptionChain) -> Option<BuildupSummary> {
        let mut records = Vec::with_capacity(chain.snapshots.len());
        for snapshot in &chain.snapshots {
            match self.ingest(snapshot) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(underlying = %chain.underlying, error = %e, "Skipping leg"),
            }
        }

        let present: HashSet<&OptionContract> = chain.snapshots.iter().map(|s| &s.contract).collect();
        let before = self.legs.len();
        self.legs
            .retain(|contract, _| contract.underlying != chain.underlying || present.contains(contract));
        if self.legs.len() < before {
            debug!(underlying = %chain.underlying, dropped = before - self.legs.len(), "Pruned legs absent from chain");
        }
        if records.is_empty() {
            return None;
        }

        let summary = self.summarize(&chain.underlying, &records, chain);
        debug!(
            underlying = %chain.underlying,
            legs = summary.total,
            bullish = summary.bullish,
            bearish = summary.bearish,
            verdict = %summary.verdict,
            "Buildup summary updated"
        );
        self.latest.insert(chain.underlying.clone(), records);
        self.summaries.insert(chain.underlying.clone(), summary.clone());
        Some(summary)
    }

    fn summarize(&self, underlying: &str, records: &[OiBuildupRecord], chain: &OptionChain) -> BuildupSummary {
        let mut distribution = BTreeMap::new();
        let mut key_levels = KeyLevels::default();
        for r in records {
            *distribution.entry(r.pattern).or_insert(0) += 1;
            match (r.pattern, r.contract.option_type) {
                (BuildupPattern::ShortBuildup, OptionType::Call)
                | (BuildupPattern::LongBuildup, OptionType::Put) => key_levels.resistance.push(r.contract.strike),
                (BuildupPattern::ShortBuildup, OptionType::Put)
                | (BuildupPattern::LongBuildup, OptionType::Call) => key_levels.support.push(r.contract.strike),
                _ => {}
            }
        }
        for levels in [&mut key_levels.support, &mut key_levels.resistance] {
            levels.sort_by(|a, b| a.total_cmp(b));
            levels.dedup();
        }

        let bullish = records.iter().filter(|r| r.pattern.sentiment() == Sentiment::Bullish).count();
        let bearish = records.iter().filter(|r| r.pattern.sentiment() == Sentiment::Bearish).count();
        let verdict = match bullish.cmp(&bearish) {
            std::cmp::Ordering::Greater => Sentiment::Bullish,
            std::cmp::Ordering::Less => Sentiment::Bearish,
            std::cmp::Ordering::Equal => Sentiment::Neutral,
        };
        let (major, minor) = (bullish.max(bearish) as f64, bullish.min(bearish) as f64);
        let conviction = verdict.is_directional() && major > minor * self.config.conviction_ratio;

        BuildupSummary {
            underlying: underlying.to_string(),
            total: records.len(),
            distribution,
            bullish,
            bearish,
            strong: records.iter().filter(|r| r.strength == BuildupStrength::Strong).count(),
            verdict,
            conviction,
            key_levels,
            control: market_control(chain, self.config.conviction_ratio),
            timestamp: chain.timestamp,
        }
    }

    pub fn summary(&self, underlying: &str) -> Option<&BuildupSummary> {
        self.summaries.get(underlying)
    }

    /// Contracts with snapshot history for `underlying`
    pub fn tracked_legs(&self, underlying: &str) -> usize {
        self.legs.keys().filter(|c| c.underlying == underlying).count()
    }

    pub fn records(&self, underlying: &str) -> &[OiBuildupRecord] {
        self.latest.get(underlying).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record_for(&self, contract: &OptionContract) -> Option<&OiBuildupRecord> {
        self.latest.get(&contract.underlying)?.iter().find(|r| &r.contract == contract)
    }
}

/// Compare aggregate put and call OI additions reported by the exchange
pub fn market_control(chain: &OptionChain, ratio: f64) -> MarketControl {
    let (mut calls, mut puts) = (0i64, 0i64);
    for s in &chain.snapshots {
        match s.contract.option_type {
            OptionType::Call => calls += s.oi_change,
            OptionType::Put => puts += s.oi_change,
        }
    }
    if puts > 0 && puts as f64 > calls.max(0) as f64 * ratio {
        MarketControl::Buyers
    } else if calls > 0 && calls as f64 > puts.max(0) as f64 * ratio {
        MarketControl::Sellers
    } else {
        MarketControl::Balanced
    }
}
