pub fn default_enabled() -> bool {
    true
}

pub fn default_environment() -> String {
    "paper".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}

pub fn default_strike_step() -> f64 {
    50.0
}

// === Greeks ===

pub fn default_risk_free_rate() -> f64 {
    0.10
}

pub fn default_volatility() -> f64 {
    0.20
}

pub fn default_atm_band() -> f64 {
    0.005
}

pub fn default_iv_max_iterations() -> u32 {
    50
}

pub fn default_iv_tolerance() -> f64 {
    1e-4
}

// === IV analytics ===

pub fn default_iv_window() -> usize {
    252
}

pub fn default_iv_min_history() -> usize {
    5
}

pub fn default_high_rank() -> f64 {
    70.0
}

pub fn default_low_rank() -> f64 {
    30.0
}

pub fn default_high_percentile() -> f64 {
    80.0
}

pub fn default_low_percentile() -> f64 {
    20.0
}

pub fn default_spike_zscore() -> f64 {
    2.0
}

pub fn default_spike_lookback() -> usize {
    20
}

pub fn default_skew_moneyness() -> f64 {
    0.02
}

pub fn default_term_flat_threshold() -> f64 {
    1.0
}

// === OI buildup ===

pub fn default_buildup_window() -> usize {
    20
}

pub fn default_strong_ratio() -> f64 {
    2.0
}

pub fn default_moderate_ratio() -> f64 {
    1.0
}

pub fn default_conviction_ratio() -> f64 {
    1.5
}

// === Levels ===

pub fn default_levels_top_n() -> usize {
    3
}

pub fn default_merge_tolerance() -> f64 {
    0.0005
}

pub fn default_smoothing_window() -> usize {
    3
}

pub fn default_swing_spacing() -> usize {
    5
}

pub fn default_swing_prominence() -> f64 {
    0.0005
}

pub fn default_min_swing_bars() -> usize {
    20
}

pub fn default_hvn_bins() -> usize {
    40
}

pub fn default_hvn_top_n() -> usize {
    5
}

pub fn default_staleness_cycles() -> u64 {
    5
}

pub fn default_level_decay() -> f64 {
    0.8
}

pub fn default_oi_weight() -> f64 {
    1.0
}

pub fn default_swing_weight() -> f64 {
    1.0
}

pub fn default_volume_weight() -> f64 {
    0.75
}

pub fn default_agreement_bonus() -> f64 {
    0.5
}

// === Scalper ===

pub fn default_risk_budget() -> f64 {
    2000.0
}

pub fn default_hard_stop_pct() -> f64 {
    0.15
}

pub fn default_breakeven_trigger_pct() -> f64 {
    0.10
}

pub fn default_target_r_multiple() -> f64 {
    2.5
}

pub fn default_theta_window_secs() -> u64 {
    180
}

pub fn default_theta_min_move_pct() -> f64 {
    0.01
}

pub fn default_touch_tolerance() -> f64 {
    0.0005
}

pub fn default_invalidation_tolerance() -> f64 {
    0.001
}

pub fn default_tick_buffer() -> usize {
    500
}

pub fn default_swing_lookback() -> usize {
    5
}

pub fn default_opening_range_bars() -> usize {
    15
}

pub fn default_prev_window_bars() -> usize {
    15
}

pub fn default_mailbox_capacity() -> usize {
    1024
}

// === Alerts ===

pub fn default_cooldown_minutes() -> u32 {
    15
}

pub fn default_max_alerts() -> usize {
    50
}

// === Providers & ledger ===

pub fn default_provider_timeout_ms() -> u64 {
    5000
}

pub fn default_poll_interval_secs() -> u64 {
    60
}

pub fn default_ledger_path() -> String {
    "trades/ledger.jsonl".to_string()
}
