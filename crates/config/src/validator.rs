use crate::*;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Application name is required")]
    MissingAppName,

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("Invalid log level '{level}' for {target}")]
    InvalidLogLevel { target: String, level: String },

    #[error("At least one underlying must be enabled")]
    NoEnabledUnderlyings,

    #[error("Duplicate underlying '{0}'")]
    DuplicateUnderlying(String),

    #[error("Underlying '{symbol}': {message}")]
    InvalidUnderlying { symbol: String, message: String },

    #[error("At least one data provider must be enabled")]
    NoEnabledProviders,

    #[error("Providers '{first}' and '{second}' share priority {priority}")]
    DuplicateProviderPriority {
        first: String,
        second: String,
        priority: u32,
    },

    #[error("Provider '{name}': {message}")]
    InvalidProvider { name: String, message: String },

    #[error("{field} must be a positive number")]
    InvalidPositive { field: String },

    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: f64, max: f64 },

    #[error("{low_field} must be below {high_field}")]
    InvertedThresholds { low_field: String, high_field: String },

    #[error("Ledger path is required for the jsonl ledger")]
    MissingLedgerPath,

    #[error("Environment variable placeholder left unresolved in '{field}'")]
    UnresolvedEnvVar { field: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }

    fn require_positive(&mut self, field: &str, value: f64) {
        if !(value > 0.0 && value.is_finite()) {
            self.add_error(ValidationError::InvalidPositive {
                field: field.to_string(),
            });
        }
    }

    fn require_range(&mut self, field: &str, value: f64, min: f64, max: f64) {
        if !(min..=max).contains(&value) {
            self.add_error(ValidationError::OutOfRange {
                field: field.to_string(),
                min,
                max,
            });
        }
    }

    fn require_ordered(&mut self, low_field: &str, low: f64, high_field: &str, high: f64) {
        if low >= high {
            self.add_error(ValidationError::InvertedThresholds {
                low_field: low_field.to_string(),
                high_field: high_field.to_string(),
            });
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_app(config, &mut report);
    validate_underlyings(&config.underlyings, &mut report);
    validate_greeks(&config.greeks, &mut report);
    validate_iv(&config.iv, &mut report);
    validate_buildup(&config.buildup, &mut report);
    validate_levels(&config.levels, &mut report);
    validate_scalper(&config.scalper, &mut report);
    validate_alerts(config.alerts.as_ref(), &mut report);
    validate_providers(&config.providers, &mut report);
    validate_ledger(config.ledger.as_ref(), &mut report);

    report
}

fn validate_app(config: &MasterConfig, report: &mut ValidationReport) {
    if config.app.name.trim().is_empty() {
        report.add_error(ValidationError::MissingAppName);
    }

    if !["pretty", "json", "compact"].contains(&config.logging.format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(config.logging.format.clone()));
    }

    const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];
    for (target, level) in &config.logging.modules {
        if !LEVELS.contains(&level.to_lowercase().as_str()) {
            report.add_error(ValidationError::InvalidLogLevel {
                target: target.clone(),
                level: level.clone(),
            });
        }
    }

    match &config.metrics {
        None => report.add_default("metrics", "disabled"),
        Some(metrics) if metrics.enabled && metrics.port == 0 => {
            report.add_error(ValidationError::InvalidPositive {
                field: "metrics.port".to_string(),
            });
        }
        Some(_) => {}
    }
}

fn validate_underlyings(underlyings: &[UnderlyingConfig], report: &mut ValidationReport) {
    if !underlyings.iter().any(|u| u.enabled) {
        report.add_error(ValidationError::NoEnabledUnderlyings);
    }

    let mut seen = HashSet::new();
    for underlying in underlyings {
        if underlying.symbol.trim().is_empty() {
            report.add_error(ValidationError::InvalidUnderlying {
                symbol: underlying.symbol.clone(),
                message: "symbol must not be empty".to_string(),
            });
        }
        if !seen.insert(underlying.symbol.to_uppercase()) {
            report.add_error(ValidationError::DuplicateUnderlying(underlying.symbol.clone()));
        }
        if underlying.strike_step <= 0.0 {
            report.add_error(ValidationError::InvalidUnderlying {
                symbol: underlying.symbol.clone(),
                message: "strike_step must be positive".to_string(),
            });
        }
        if underlying.scalp && !underlying.enabled {
            report.add_warning(
                &format!("underlyings.{}.scalp", underlying.symbol),
                "scalping requested for a disabled underlying; it will not run",
            );
        }
    }
}

fn validate_greeks(greeks: &GreeksConfig, report: &mut ValidationReport) {
    report.require_range("greeks.risk_free_rate", greeks.risk_free_rate, 0.0, 1.0);
    report.require_range("greeks.default_volatility", greeks.default_volatility, 0.01, 5.0);
    report.require_range("greeks.atm_band", greeks.atm_band, 0.0, 0.1);
    if greeks.iv_max_iterations == 0 {
        report.add_error(ValidationError::InvalidPositive {
            field: "greeks.iv_max_iterations".to_string(),
        });
    }
    report.require_positive("greeks.iv_tolerance", greeks.iv_tolerance);
}

fn validate_iv(iv: &IvConfig, report: &mut ValidationReport) {
    if iv.window == 0 {
        report.add_error(ValidationError::InvalidPositive {
            field: "iv.window".to_string(),
        });
    }
    if iv.min_history < 2 {
        report.add_warning(
            "iv.min_history",
            "fewer than two history points makes rank meaningless",
        );
    }
    if iv.min_history > iv.window {
        report.add_error(ValidationError::OutOfRange {
            field: "iv.min_history".to_string(),
            min: 0.0,
            max: iv.window as f64,
        });
    }
    report.require_range("iv.high_rank", iv.high_rank, 0.0, 100.0);
    report.require_range("iv.low_rank", iv.low_rank, 0.0, 100.0);
    report.require_ordered("iv.low_rank", iv.low_rank, "iv.high_rank", iv.high_rank);
    report.require_ordered(
        "iv.low_percentile",
        iv.low_percentile,
        "iv.high_percentile",
        iv.high_percentile,
    );
    report.require_positive("iv.spike_zscore", iv.spike_zscore);
    report.require_range("iv.skew_moneyness", iv.skew_moneyness, 0.0, 0.5);
}

fn validate_buildup(buildup: &BuildupConfig, report: &mut ValidationReport) {
    if buildup.rolling_window == 0 {
        report.add_error(ValidationError::InvalidPositive {
            field: "buildup.rolling_window".to_string(),
        });
    }
    report.require_ordered(
        "buildup.moderate_ratio",
        buildup.moderate_ratio,
        "buildup.strong_ratio",
        buildup.strong_ratio,
    );
    if buildup.conviction_ratio < 1.0 {
        report.add_error(ValidationError::OutOfRange {
            field: "buildup.conviction_ratio".to_string(),
            min: 1.0,
            max: f64::INFINITY,
        });
    }
}

fn validate_levels(levels: &LevelsConfig, report: &mut ValidationReport) {
    report.require_range("levels.merge_tolerance", levels.merge_tolerance, 0.0, 0.05);
    report.require_range("levels.decay", levels.decay, 0.0, 1.0);
    if levels.hvn_bins < 2 {
        report.add_error(ValidationError::OutOfRange {
            field: "levels.hvn_bins".to_string(),
            min: 2.0,
            max: f64::INFINITY,
        });
    }
    if levels.staleness_cycles == 0 {
        report.add_error(ValidationError::InvalidPositive {
            field: "levels.staleness_cycles".to_string(),
        });
    }
}

fn validate_scalper(scalper: &ScalperConfig, report: &mut ValidationReport) {
    report.require_positive("scalper.risk_budget", scalper.risk_budget);
    report.require_range("scalper.hard_stop_pct", scalper.hard_stop_pct, 0.001, 0.99);
    report.require_range(
        "scalper.breakeven_trigger_pct",
        scalper.breakeven_trigger_pct,
        0.0,
        10.0,
    );
    report.require_positive("scalper.target_r_multiple", scalper.target_r_multiple);
    if scalper.theta_window_secs == 0 {
        report.add_error(ValidationError::InvalidPositive {
            field: "scalper.theta_window_secs".to_string(),
        });
    }
    report.require_positive("scalper.touch_tolerance", scalper.touch_tolerance);
    if scalper.tick_buffer < scalper.opening_range_bars + scalper.prev_window_bars {
        report.add_warning(
            "scalper.tick_buffer",
            "buffer shorter than opening range plus previous window",
        );
    }
    if scalper.mailbox_capacity == 0 {
        report.add_error(ValidationError::InvalidPositive {
            field: "scalper.mailbox_capacity".to_string(),
        });
    }
}

fn validate_alerts(alerts: Option<&AlertsConfig>, report: &mut ValidationReport) {
    match alerts {
        None => {
            report.add_default("alerts.default_cooldown_minutes", &default_cooldown_minutes().to_string());
            report.add_default("alerts.max_alerts", &default_max_alerts().to_string());
        }
        Some(alerts) => {
            if alerts.max_alerts == 0 {
                report.add_warning("alerts.max_alerts", "alert creation is effectively disabled");
            }
        }
    }
}

fn validate_providers(providers: &ProvidersConfig, report: &mut ValidationReport) {
    let enabled: Vec<&ProviderSourceConfig> =
        providers.sources.iter().filter(|s| s.enabled).collect();
    if enabled.is_empty() {
        report.add_error(ValidationError::NoEnabledProviders);
    }

    for (i, a) in enabled.iter().enumerate() {
        if let Some(b) = enabled[i + 1..].iter().find(|b| b.priority == a.priority) {
            report.add_error(ValidationError::DuplicateProviderPriority {
                first: a.name.clone(),
                second: b.name.clone(),
                priority: a.priority,
            });
        }
    }

    for source in &providers.sources {
        if source.kind == ProviderKind::Replay {
            match source.path.as_deref() {
                None | Some("") => report.add_error(ValidationError::InvalidProvider {
                    name: source.name.clone(),
                    message: "replay providers require a fixture path".to_string(),
                }),
                Some(path) if has_unresolved_env_vars(path) => {
                    report.add_error(ValidationError::UnresolvedEnvVar {
                        field: format!("providers.{}.path", source.name),
                    })
                }
                Some(_) => {}
            }
        }
    }

    if providers.timeout_ms == 0 {
        report.add_error(ValidationError::InvalidPositive {
            field: "providers.timeout_ms".to_string(),
        });
    }
    if providers.poll_interval_secs == 0 {
        report.add_error(ValidationError::InvalidPositive {
            field: "providers.poll_interval_secs".to_string(),
        });
    }
    if providers.timeout_ms / 1000 >= providers.poll_interval_secs {
        report.add_warning(
            "providers.timeout_ms",
            "provider timeout is not shorter than the poll interval",
        );
    }
}

fn validate_ledger(ledger: Option<&LedgerConfig>, report: &mut ValidationReport) {
    match ledger {
        None => {
            report.add_default("ledger.kind", "jsonl");
            report.add_default("ledger.path", &default_ledger_path());
        }
        Some(ledger) => {
            if ledger.kind == LedgerKind::Jsonl && ledger.path.trim().is_empty() {
                report.add_error(ValidationError::MissingLedgerPath);
            }
            if ledger.kind == LedgerKind::Memory {
                report.add_warning("ledger.kind", "trade records will not survive a restart");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_is_valid() {
        let report = validate_config(&generate_default_config());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_duplicate_priorities_rejected() {
        let mut config = generate_default_config();
        let mut second = config.providers.sources[0].clone();
        second.name = "backup".to_string();
        config.providers.sources.push(second);

        let report = validate_config(&config);
        assert!(!report.is_valid());
        assert_matches!(
            report.errors[0],
            ValidationError::DuplicateProviderPriority { priority: 1, .. }
        );
    }

    #[test]
    fn test_module_log_level_checked() {
        let mut config = generate_default_config();
        config.logging.modules.insert("scalper".to_string(), "DEBUG".to_string());
        assert!(validate_config(&config).is_valid());

        config.logging.modules.insert("providers".to_string(), "loud".to_string());
        let report = validate_config(&config);
        assert_matches!(
            &report.errors[..],
            [ValidationError::InvalidLogLevel { target, .. }] if target == "providers"
        );
    }

    #[test]
    fn test_replay_requires_path() {
        let mut config = generate_default_config();
        config.providers.sources[0].kind = ProviderKind::Replay;
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidProvider { .. })));
    }

    #[test]
    fn test_inverted_rank_thresholds() {
        let mut config = generate_default_config();
        config.iv.low_rank = 80.0;
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvertedThresholds { .. })));
    }

    #[test]
    fn test_missing_sections_record_defaults() {
        let mut config = generate_default_config();
        config.alerts = None;
        config.ledger = None;
        let report = validate_config(&config);
        assert!(report.is_valid());
        assert!(report.defaults_applied.iter().any(|d| d.field == "ledger.path"));
        assert!(report
            .defaults_applied
            .iter()
            .any(|d| d.field == "alerts.default_cooldown_minutes"));
    }
}
