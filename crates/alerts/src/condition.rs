//! Alert conditions and their evaluation

use crate::view::MarketView;
use analytics::{BuildupPattern, Greeks};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GreekKind {
    Delta,
    Gamma,
    Theta,
    Vega,
    Rho,
}

impl GreekKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GreekKind::Delta => "delta",
            GreekKind::Gamma => "gamma",
            GreekKind::Theta => "theta",
            GreekKind::Vega => "vega",
            GreekKind::Rho => "rho",
        }
    }

    pub fn of(&self, greeks: &Greeks) -> f64 {
        match self {
            GreekKind::Delta => greeks.delta,
            GreekKind::Gamma => greeks.gamma,
            GreekKind::Theta => greeks.theta,
            GreekKind::Vega => greeks.vega,
            GreekKind::Rho => greeks.rho,
        }
    }
}

impl fmt::Display for GreekKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_spike_multiple() -> f64 {
    2.0
}

/// What an alert watches for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertCondition {
    PriceAbove {
        threshold: f64,
    },
    PriceBelow {
        threshold: f64,
    },
    /// `Above` fires on a rise beyond `threshold` percent, `Below` on a fall beyond it
    PriceChangePct {
        threshold: f64,
        #[serde(default)]
        direction: Direction,
    },
    /// Fires when the absolute OI change exceeds `threshold` percent
    OiChangePct {
        threshold: f64,
    },
    PcrAbove {
        threshold: f64,
    },
    PcrBelow {
        threshold: f64,
    },
    IvRankAbove {
        threshold: f64,
    },
    IvRankBelow {
        threshold: f64,
    },
    /// Current bar volume exceeds `multiple` times the recent average
    VolumeSpike {
        #[serde(default = "default_spike_multiple")]
        multiple: f64,
    },
    Buildup {
        pattern: BuildupPattern,
    },
    GreeksThreshold {
        greek: GreekKind,
        threshold: f64,
        #[serde(default)]
        direction: Direction,
    },
}

/// Result of a condition that held
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// The reading that crossed, when the condition is numeric
    pub value: Option<f64>,
}

impl AlertCondition {
    pub fn kind(&self) -> &'static str {
        match self {
            AlertCondition::PriceAbove { .. } => "price_above",
            AlertCondition::PriceBelow { .. } => "price_below",
            AlertCondition::PriceChangePct { .. } => "price_change_pct",
            AlertCondition::OiChangePct { .. } => "oi_change_pct",
            AlertCondition::PcrAbove { .. } => "pcr_above",
            AlertCondition::PcrBelow { .. } => "pcr_below",
            AlertCondition::IvRankAbove { .. } => "iv_rank_above",
            AlertCondition::IvRankBelow { .. } => "iv_rank_below",
            AlertCondition::VolumeSpike { .. } => "volume_spike",
            AlertCondition::Buildup { .. } => "buildup",
            AlertCondition::GreeksThreshold { .. } => "greeks_threshold",
        }
    }

    pub fn threshold(&self) -> Option<f64> {
        match self {
            AlertCondition::PriceAbove { threshold }
            | AlertCondition::PriceBelow { threshold }
            | AlertCondition::PriceChangePct { threshold, .. }
            | AlertCondition::OiChangePct { threshold }
            | AlertCondition::PcrAbove { threshold }
            | AlertCondition::PcrBelow { threshold }
            | AlertCondition::IvRankAbove { threshold }
            | AlertCondition::IvRankBelow { threshold }
            | AlertCondition::GreeksThreshold { threshold, .. } => Some(*threshold),
            AlertCondition::VolumeSpike { multiple } => Some(*multiple),
            AlertCondition::Buildup { .. } => None,
        }
    }

    /// Reject thresholds that could never compare meaningfully
    pub fn validate(&self) -> Result<(), String> {
        if let Some(threshold) = self.threshold() {
            if !threshold.is_finite() {
                return Err(format!("{} threshold must be finite", self.kind()));
            }
        }
        match self {
            AlertCondition::VolumeSpike { multiple } if *multiple <= 0.0 => {
                Err("volume spike multiple must be positive".to_string())
            }
            AlertCondition::OiChangePct { threshold } if *threshold < 0.0 => {
                Err("OI change threshold must not be negative".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Check the condition; a missing reading never triggers
    pub fn evaluate(&self, view: &MarketView) -> Option<Trigger> {
        let fired = |value: f64| Some(Trigger { value: Some(value) });
        match *self {
            AlertCondition::PriceAbove { threshold } => view.price.filter(|p| *p > threshold).and_then(fired),
            AlertCondition::PriceBelow { threshold } => view.price.filter(|p| *p < threshold).and_then(fired),
            AlertCondition::PriceChangePct { threshold, direction } => view
                .price_change_pct
                .filter(|v| match direction {
                    Direction::Above => *v > threshold,
                    Direction::Below => *v < -threshold,
                })
                .and_then(fired),
            AlertCondition::OiChangePct { threshold } => {
                view.oi_change_pct.filter(|v| v.abs() > threshold).and_then(fired)
            }
            AlertCondition::PcrAbove { threshold } => view.pcr.filter(|v| *v > threshold).and_then(fired),
            AlertCondition::PcrBelow { threshold } => view.pcr.filter(|v| *v < threshold).and_then(fired),
            AlertCondition::IvRankAbove { threshold } => view.iv_rank.filter(|v| *v > threshold).and_then(fired),
            AlertCondition::IvRankBelow { threshold } => view.iv_rank.filter(|v| *v < threshold).and_then(fired),
            AlertCondition::VolumeSpike { multiple } => match (view.volume, view.avg_volume) {
                (Some(volume), Some(avg)) if avg > 0.0 && volume > avg * multiple => fired(volume),
                _ => None,
            },
            AlertCondition::Buildup { pattern } => {
                (view.buildup == Some(pattern)).then_some(Trigger { value: None })
            }
            AlertCondition::GreeksThreshold {
                greek,
                threshold,
                direction,
            } => view
                .net_greeks
                .map(|g| greek.of(&g))
                .filter(|v| match direction {
                    Direction::Above => *v > threshold,
                    Direction::Below => *v < threshold,
                })
                .and_then(fired),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn view() -> MarketView {
        MarketView::new("NIFTY", Utc::now())
    }

    #[test]
    fn test_missing_reading_never_fires() {
        let v = view();
        for condition in [
            AlertCondition::PriceAbove { threshold: 0.0 },
            AlertCondition::PcrBelow { threshold: 10.0 },
            AlertCondition::IvRankBelow { threshold: 100.0 },
            AlertCondition::VolumeSpike { multiple: 2.0 },
            AlertCondition::Buildup {
                pattern: BuildupPattern::LongBuildup,
            },
        ] {
            assert!(condition.evaluate(&v).is_none(), "{} fired", condition.kind());
        }
    }

    #[test]
    fn test_price_change_direction() {
        let mut v = view();
        v.price_change_pct = Some(-1.5);
        let rise = AlertCondition::PriceChangePct {
            threshold: 1.0,
            direction: Direction::Above,
        };
        let fall = AlertCondition::PriceChangePct {
            threshold: 1.0,
            direction: Direction::Below,
        };
        assert!(rise.evaluate(&v).is_none());
        assert_eq!(fall.evaluate(&v).unwrap().value, Some(-1.5));
    }

    #[test]
    fn test_oi_change_uses_magnitude() {
        let mut v = view();
        v.oi_change_pct = Some(-12.0);
        assert!(AlertCondition::OiChangePct { threshold: 10.0 }.evaluate(&v).is_some());
        v.oi_change_pct = Some(8.0);
        assert!(AlertCondition::OiChangePct { threshold: 10.0 }.evaluate(&v).is_none());
    }

    #[test]
    fn test_volume_spike_needs_baseline() {
        let mut v = view();
        v.volume = Some(5000.0);
        v.avg_volume = Some(0.0);
        let spike = AlertCondition::VolumeSpike { multiple: 2.0 };
        assert!(spike.evaluate(&v).is_none());
        v.avg_volume = Some(2000.0);
        assert!(spike.evaluate(&v).is_some());
    }

    #[test]
    fn test_greeks_threshold_on_net_exposure() {
        let mut v = view();
        v.net_greeks = Some(Greeks {
            delta: -1200.0,
            gamma: 3.0,
            theta: -50.0,
            vega: 80.0,
            rho: 10.0,
        });
        let short_delta = AlertCondition::GreeksThreshold {
            greek: GreekKind::Delta,
            threshold: -1000.0,
            direction: Direction::Below,
        };
        assert_eq!(short_delta.evaluate(&v).unwrap().value, Some(-1200.0));
    }

    #[test]
    fn test_condition_from_json() {
        let condition: AlertCondition =
            serde_json::from_str(r#"{"kind":"buildup","pattern":"short_covering"}"#).unwrap();
        assert_eq!(
            condition,
            AlertCondition::Buildup {
                pattern: BuildupPattern::ShortCovering
            }
        );
        let spike: AlertCondition = serde_json::from_str(r#"{"kind":"volume_spike"}"#).unwrap();
        assert_eq!(spike, AlertCondition::VolumeSpike { multiple: 2.0 });
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        assert!(AlertCondition::PcrAbove { threshold: f64::NAN }.validate().is_err());
        assert!(AlertCondition::VolumeSpike { multiple: 0.0 }.validate().is_err());
        assert!(AlertCondition::PcrAbove { threshold: 1.5 }.validate().is_ok());
    }
}
