use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MasterConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());
    parse_config(&content)
}

/// Parse configuration text after environment variable substitution
pub fn parse_config(content: &str) -> Result<MasterConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: MasterConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(
        underlyings = config.underlyings.len(),
        providers = config.providers.sources.len(),
        "Configuration loaded successfully"
    );
    Ok(config)
}

#[instrument]
pub fn generate_default_config() -> MasterConfig {
    use defaults::*;

    MasterConfig {
        app: AppConfig {
            name: "confluence".to_string(),
            environment: default_environment(),
        },
        logging: LoggingConfig::default(),
        metrics: Some(MetricsConfig {
            enabled: false,
            port: default_metrics_port(),
        }),
        underlyings: vec![
            UnderlyingConfig {
                symbol: "NIFTY".to_string(),
                strike_step: 50.0,
                enabled: true,
                scalp: true,
                reference_price: Some(25000.0),
            },
            UnderlyingConfig {
                symbol: "BANKNIFTY".to_string(),
                strike_step: 100.0,
                enabled: true,
                scalp: false,
                reference_price: Some(52000.0),
            },
        ],
        greeks: GreeksConfig::default(),
        iv: IvConfig::default(),
        buildup: BuildupConfig::default(),
        levels: LevelsConfig::default(),
        scalper: ScalperConfig::default(),
        alerts: Some(AlertsConfig::default()),
        providers: ProvidersConfig {
            timeout_ms: default_provider_timeout_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            sources: vec![ProviderSourceConfig {
                name: "static".to_string(),
                kind: ProviderKind::Static,
                priority: 1,
                path: None,
                enabled: true,
            }],
        },
        ledger: Some(LedgerConfig::default()),
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &MasterConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_substitutes_env_vars() {
        std::env::set_var("CONFLUENCE_TEST_FIXTURE", "fixtures/banknifty.json");
        let yaml = r#"
app:
  name: confluence
underlyings:
  - symbol: BANKNIFTY
    strike_step: 100
providers:
  sources:
    - name: replay
      kind: replay
      priority: 1
      path: ${CONFLUENCE_TEST_FIXTURE}
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(
            config.providers.sources[0].path.as_deref(),
            Some("fixtures/banknifty.json")
        );
    }

    #[test]
    fn test_parse_rejects_malformed_yaml() {
        assert!(parse_config("app: [unterminated").is_err());
    }
}
