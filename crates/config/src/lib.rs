use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root of the YAML configuration file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    pub app: AppConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Prometheus exporter; disabled when absent
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    pub underlyings: Vec<UnderlyingConfig>,
    #[serde(default)]
    pub greeks: GreeksConfig,
    #[serde(default)]
    pub iv: IvConfig,
    #[serde(default)]
    pub buildup: BuildupConfig,
    #[serde(default)]
    pub levels: LevelsConfig,
    #[serde(default)]
    pub scalper: ScalperConfig,
    #[serde(default)]
    pub alerts: Option<AlertsConfig>,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub ledger: Option<LedgerConfig>,
}

impl MasterConfig {
    pub fn alerts_or_default(&self) -> AlertsConfig {
        self.alerts.clone().unwrap_or_default()
    }

    pub fn ledger_or_default(&self) -> LedgerConfig {
        self.ledger.clone().unwrap_or_default()
    }

    pub fn enabled_underlyings(&self) -> impl Iterator<Item = &UnderlyingConfig> {
        self.underlyings.iter().filter(|u| u.enabled)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Per-crate level overrides, e.g. `scalper: debug`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            modules: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnderlyingConfig {
    pub symbol: String,
    #[serde(default = "default_strike_step")]
    pub strike_step: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Run the confluence scalper for this underlying
    #[serde(default = "default_enabled")]
    pub scalp: bool,
    /// Starting spot for the static provider
    #[serde(default)]
    pub reference_price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GreeksConfig {
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_volatility")]
    pub default_volatility: f64,
    /// |strike - spot| / spot at or below which a strike is ATM
    #[serde(default = "default_atm_band")]
    pub atm_band: f64,
    #[serde(default = "default_iv_max_iterations")]
    pub iv_max_iterations: u32,
    #[serde(default = "default_iv_tolerance")]
    pub iv_tolerance: f64,
}

impl Default for GreeksConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: default_risk_free_rate(),
            default_volatility: default_volatility(),
            atm_band: default_atm_band(),
            iv_max_iterations: default_iv_max_iterations(),
            iv_tolerance: default_iv_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IvConfig {
    #[serde(default = "default_iv_window")]
    pub window: usize,
    #[serde(default = "default_iv_min_history")]
    pub min_history: usize,
    #[serde(default = "default_high_rank")]
    pub high_rank: f64,
    #[serde(default = "default_low_rank")]
    pub low_rank: f64,
    #[serde(default = "default_high_percentile")]
    pub high_percentile: f64,
    #[serde(default = "default_low_percentile")]
    pub low_percentile: f64,
    #[serde(default = "default_spike_zscore")]
    pub spike_zscore: f64,
    #[serde(default = "default_spike_lookback")]
    pub spike_lookback: usize,
    /// OTM distance (fraction of spot) used to match skew strikes
    #[serde(default = "default_skew_moneyness")]
    pub skew_moneyness: f64,
    /// Front-to-back slope (vol points) inside which the curve is flat
    #[serde(default = "default_term_flat_threshold")]
    pub term_flat_threshold: f64,
}

impl Default for IvConfig {
    fn default() -> Self {
        Self {
            window: default_iv_window(),
            min_history: default_iv_min_history(),
            high_rank: default_high_rank(),
            low_rank: default_low_rank(),
            high_percentile: default_high_percentile(),
            low_percentile: default_low_percentile(),
            spike_zscore: default_spike_zscore(),
            spike_lookback: default_spike_lookback(),
            skew_moneyness: default_skew_moneyness(),
            term_flat_threshold: default_term_flat_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildupConfig {
    #[serde(default = "default_buildup_window")]
    pub rolling_window: usize,
    #[serde(default = "default_strong_ratio")]
    pub strong_ratio: f64,
    #[serde(default = "default_moderate_ratio")]
    pub moderate_ratio: f64,
    /// Majority must exceed minority by this factor for a conviction call
    #[serde(default = "default_conviction_ratio")]
    pub conviction_ratio: f64,
    /// |delta OI| at or below this is treated as unchanged
    #[serde(default)]
    pub oi_dead_band: u64,
    /// |delta price| at or below this is treated as unchanged
    #[serde(default)]
    pub price_dead_band: f64,
}

impl Default for BuildupConfig {
    fn default() -> Self {
        Self {
            rolling_window: default_buildup_window(),
            strong_ratio: default_strong_ratio(),
            moderate_ratio: default_moderate_ratio(),
            conviction_ratio: default_conviction_ratio(),
            oi_dead_band: 0,
            price_dead_band: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LevelsConfig {
    #[serde(default = "default_levels_top_n")]
    pub oi_top_n: usize,
    /// Levels closer than this fraction of price are merged
    #[serde(default = "default_merge_tolerance")]
    pub merge_tolerance: f64,
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
    #[serde(default = "default_swing_spacing")]
    pub swing_min_spacing: usize,
    /// Minimum swing prominence as a fraction of price
    #[serde(default = "default_swing_prominence")]
    pub swing_min_prominence: f64,
    #[serde(default = "default_min_swing_bars")]
    pub min_swing_bars: usize,
    #[serde(default = "default_hvn_bins")]
    pub hvn_bins: usize,
    #[serde(default = "default_hvn_top_n")]
    pub hvn_top_n: usize,
    #[serde(default = "default_staleness_cycles")]
    pub staleness_cycles: u64,
    #[serde(default = "default_level_decay")]
    pub decay: f64,
    #[serde(default = "default_oi_weight")]
    pub oi_weight: f64,
    #[serde(default = "default_swing_weight")]
    pub swing_weight: f64,
    #[serde(default = "default_volume_weight")]
    pub volume_weight: f64,
    #[serde(default = "default_agreement_bonus")]
    pub agreement_bonus: f64,
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            oi_top_n: default_levels_top_n(),
            merge_tolerance: default_merge_tolerance(),
            smoothing_window: default_smoothing_window(),
            swing_min_spacing: default_swing_spacing(),
            swing_min_prominence: default_swing_prominence(),
            min_swing_bars: default_min_swing_bars(),
            hvn_bins: default_hvn_bins(),
            hvn_top_n: default_hvn_top_n(),
            staleness_cycles: default_staleness_cycles(),
            decay: default_level_decay(),
            oi_weight: default_oi_weight(),
            swing_weight: default_swing_weight(),
            volume_weight: default_volume_weight(),
            agreement_bonus: default_agreement_bonus(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScalperConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_risk_budget")]
    pub risk_budget: f64,
    #[serde(default = "default_hard_stop_pct")]
    pub hard_stop_pct: f64,
    #[serde(default = "default_breakeven_trigger_pct")]
    pub breakeven_trigger_pct: f64,
    #[serde(default = "default_target_r_multiple")]
    pub target_r_multiple: f64,
    #[serde(default = "default_theta_window_secs")]
    pub theta_window_secs: u64,
    #[serde(default = "default_theta_min_move_pct")]
    pub theta_min_move_pct: f64,
    #[serde(default = "default_touch_tolerance")]
    pub touch_tolerance: f64,
    #[serde(default = "default_invalidation_tolerance")]
    pub invalidation_tolerance: f64,
    #[serde(default = "default_tick_buffer")]
    pub tick_buffer: usize,
    #[serde(default = "default_swing_lookback")]
    pub swing_lookback: usize,
    #[serde(default = "default_opening_range_bars")]
    pub opening_range_bars: usize,
    #[serde(default = "default_prev_window_bars")]
    pub prev_window_bars: usize,
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

impl Default for ScalperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            risk_budget: default_risk_budget(),
            hard_stop_pct: default_hard_stop_pct(),
            breakeven_trigger_pct: default_breakeven_trigger_pct(),
            target_r_multiple: default_target_r_multiple(),
            theta_window_secs: default_theta_window_secs(),
            theta_min_move_pct: default_theta_min_move_pct(),
            touch_tolerance: default_touch_tolerance(),
            invalidation_tolerance: default_invalidation_tolerance(),
            tick_buffer: default_tick_buffer(),
            swing_lookback: default_swing_lookback(),
            opening_range_bars: default_opening_range_bars(),
            prev_window_bars: default_prev_window_bars(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsConfig {
    #[serde(default = "default_cooldown_minutes")]
    pub default_cooldown_minutes: u32,
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
    /// Install the built-in PCR, OI and IV-rank alerts per underlying
    #[serde(default = "default_enabled")]
    pub presets: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            default_cooldown_minutes: default_cooldown_minutes(),
            max_alerts: default_max_alerts(),
            presets: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    pub sources: Vec<ProviderSourceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSourceConfig {
    pub name: String,
    pub kind: ProviderKind,
    /// Lower value is tried first
    pub priority: u32,
    /// Fixture file for replay providers
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Replays option chains and ticks recorded to a JSON file
    Replay,
    /// Serves a synthetic chain around a fixed spot per underlying
    Static,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    pub kind: LedgerKind,
    #[serde(default = "default_ledger_path")]
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            kind: LedgerKind::Jsonl,
            path: default_ledger_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Memory,
    Jsonl,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
app:
  name: confluence
underlyings:
  - symbol: NIFTY
providers:
  sources:
    - name: replay
      kind: replay
      priority: 1
      path: fixtures/nifty.json
"#;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: MasterConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(config.app.environment, "paper");
        assert_eq!(config.underlyings[0].strike_step, 50.0);
        assert!(config.underlyings[0].scalp);
        assert_eq!(config.iv.window, 252);
        assert_eq!(config.scalper.risk_budget, 2000.0);
        assert_eq!(config.scalper.theta_window_secs, 180);
        assert_eq!(config.providers.timeout_ms, 5000);
        assert!(config.alerts.is_none());
        assert_eq!(config.alerts_or_default().default_cooldown_minutes, 15);
        assert_eq!(config.ledger_or_default().kind, LedgerKind::Jsonl);
    }

    #[test]
    fn test_default_config_roundtrips_through_yaml() {
        let config = generate_default_config();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: MasterConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.underlyings.len(), config.underlyings.len());
        assert_eq!(parsed.providers.sources[0].kind, ProviderKind::Static);
    }
}
