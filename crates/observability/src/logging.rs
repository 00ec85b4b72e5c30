//! tracing subscriber setup
//!
//! The filter is built from a base level plus per-crate overrides, so a
//! noisy scalper can be turned up without flooding the ingestion loops.
//! `RUST_LOG`, when set, replaces the whole directive string.

use std::collections::BTreeMap;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per event, span fields flattened
    Json,
    Compact,
}

impl LogFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown log format: {}", s))
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub format: LogFormat,
    pub level: String,
    pub modules: BTreeMap<String, String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: "info".to_string(),
            modules: BTreeMap::new(),
        }
    }
}

impl LogSettings {
    /// Unknown formats fall back to pretty
    pub fn new(format: &str, level: impl Into<String>, modules: BTreeMap<String, String>) -> Self {
        Self {
            format: LogFormat::parse(format).unwrap_or_default(),
            level: level.into(),
            modules,
        }
    }

    /// `EnvFilter` directive string, e.g. `info,scalper=debug`
    pub fn directives(&self) -> String {
        let mut out = self.level.clone();
        for (target, level) in &self.modules {
            out.push_str(&format!(",{}={}", target.replace('-', "_"), level));
        }
        out
    }
}

pub fn init_logging(service_name: &str, settings: &LogSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(settings.directives()))?;
    let registry = tracing_subscriber::registry().with(filter);

    match settings.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().flatten_event(true).with_current_span(true))
            .try_init()?,
        LogFormat::Compact => registry.with(fmt::layer().compact().with_target(false)).try_init()?,
    }

    tracing::info!(service = service_name, format = ?settings.format, filter = %settings.directives(), "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("compact"), Some(LogFormat::Compact));
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_directives_include_module_overrides() {
        let modules = BTreeMap::from([
            ("scalper".to_string(), "debug".to_string()),
            ("providers".to_string(), "warn".to_string()),
        ]);
        let settings = LogSettings::new("bogus", "info", modules);
        assert_eq!(settings.format, LogFormat::Pretty);
        assert_eq!(settings.directives(), "info,providers=warn,scalper=debug");
        assert_eq!(LogSettings::default().directives(), "info");
    }
}
