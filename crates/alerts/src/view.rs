//! Point-in-time market readings an alert condition is checked against

use analytics::{AnalyticsCoordinator, BuildupPattern, Greeks};
use chrono::{DateTime, Utc};
use common::{CandleInterval, OptionContract};
use serde::Serialize;
use std::collections::HashMap;

/// Bars averaged for the volume baseline
pub const VOLUME_LOOKBACK: usize = 20;

/// Everything alerts can observe for one underlying.
///
/// A reading that is unavailable is `None`; conditions over it do not fire.
#[derive(Debug, Clone, Serialize)]
pub struct MarketView {
    pub underlying: String,
    pub timestamp: DateTime<Utc>,
    pub price: Option<f64>,
    /// Change from the open of the oldest retained one-minute bar, in percent
    pub price_change_pct: Option<f64>,
    /// Chain-wide OI change relative to the previous day's OI, in percent
    pub oi_change_pct: Option<f64>,
    pub pcr: Option<f64>,
    /// Only present once the IV history is long enough to rank
    pub iv_rank: Option<f64>,
    pub volume: Option<f64>,
    pub avg_volume: Option<f64>,
    /// Most frequent non-neutral buildup in the latest chain
    pub buildup: Option<BuildupPattern>,
    /// OI-weighted Greeks summed over the chain
    pub net_greeks: Option<Greeks>,
}

impl MarketView {
    pub fn new(underlying: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            underlying: underlying.into(),
            timestamp,
            price: None,
            price_change_pct: None,
            oi_change_pct: None,
            pcr: None,
            iv_rank: None,
            volume: None,
            avg_volume: None,
            buildup: None,
            net_greeks: None,
        }
    }

    /// Read the current state of `underlying` out of the coordinator
    pub async fn capture(coordinator: &AnalyticsCoordinator, underlying: &str, now: DateTime<Utc>) -> Self {
        let mut view = Self::new(underlying, now);
        view.price = coordinator.spot(underlying).await;

        let bars = coordinator.candles(underlying, CandleInterval::OneMinute, 0).await;
        if let (Some(first), Some(price)) = (bars.first(), view.price) {
            if first.open > 0.0 {
                view.price_change_pct = Some((price - first.open) / first.open * 100.0);
            }
        }
        if let Some((last, previous)) = bars.split_last() {
            view.volume = Some(last.volume as f64);
            let baseline = &previous[previous.len().saturating_sub(VOLUME_LOOKBACK)..];
            if !baseline.is_empty() {
                let total: u64 = baseline.iter().map(|c| c.volume).sum();
                view.avg_volume = Some(total as f64 / baseline.len() as f64);
            }
        }

        view.pcr = coordinator.latest_pcr(underlying).await.map(|p| p.pcr_oi);

        let iv = coordinator.iv_analysis(underlying).await;
        if iv.sufficient_history {
            view.iv_rank = Some(iv.rank);
        }

        view.buildup = coordinator.buildup_summary(underlying).await.and_then(|summary| {
            summary
                .distribution
                .iter()
                .filter(|(pattern, count)| **pattern != BuildupPattern::Neutral && **count > 0)
                .max_by_key(|(_, count)| **count)
                .map(|(pattern, _)| *pattern)
        });

        if let Some(enriched) = coordinator.enriched_chain(underlying).await {
            let (oi, change) = enriched
                .chain
                .snapshots
                .iter()
                .fold((0i64, 0i64), |(oi, change), s| (oi + s.oi as i64, change + s.oi_change));
            let previous = oi - change;
            if previous > 0 {
                view.oi_change_pct = Some(change as f64 / previous as f64 * 100.0);
            }

            let open_interest: HashMap<&OptionContract, f64> = enriched
                .chain
                .snapshots
                .iter()
                .map(|s| (&s.contract, s.oi as f64))
                .collect();
            if !enriched.greeks.is_empty() {
                let mut net = Greeks {
                    delta: 0.0,
                    gamma: 0.0,
                    theta: 0.0,
                    vega: 0.0,
                    rho: 0.0,
                };
                for result in &enriched.greeks {
                    let weight = open_interest.get(&result.contract).copied().unwrap_or(0.0);
                    net.delta += result.greeks.delta * weight;
                    net.gamma += result.greeks.gamma * weight;
                    net.theta += result.greeks.theta * weight;
                    net.vega += result.greeks.vega * weight;
                    net.rho += result.greeks.rho * weight;
                }
                view.net_greeks = Some(net);
            }
        }

        view
    }
}
