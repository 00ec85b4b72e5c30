//! Builds the provider registries from configuration

use crate::error::{ProviderError, ProviderResult};
use crate::registry::DataProviders;
use crate::replay::ReplayProvider;
use crate::static_source::StaticProvider;
use config::{ProviderKind, ProviderSourceConfig, ProvidersConfig, UnderlyingConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Reference spot used when an underlying has none configured, in strike steps
const FALLBACK_REFERENCE_STEPS: f64 = 200.0;

impl DataProviders {
    /// Register every enabled source under all three capabilities.
    ///
    /// A replay source whose fixture cannot be loaded is skipped with a
    /// warning; an empty registry after that is an error.
    pub fn from_config(config: &ProvidersConfig, underlyings: &[UnderlyingConfig]) -> ProviderResult<Self> {
        let providers = Self::new(Duration::from_millis(config.timeout_ms));

        for source in config.sources.iter().filter(|s| s.enabled) {
            match source.kind {
                ProviderKind::Static => {
                    let provider = Arc::new(static_provider(source, underlyings));
                    providers.options.register(&source.name, source.priority, provider.clone());
                    providers.historical.register(&source.name, source.priority, provider.clone());
                    providers.live.register(&source.name, source.priority, provider);
                }
                ProviderKind::Replay => {
                    let Some(path) = source.path.as_deref() else {
                        warn!(provider = %source.name, "Replay source has no fixture path; skipped");
                        continue;
                    };
                    match ReplayProvider::from_path(&source.name, path) {
                        Ok(provider) => {
                            let provider = Arc::new(provider);
                            providers.options.register(&source.name, source.priority, provider.clone());
                            providers.historical.register(&source.name, source.priority, provider.clone());
                            providers.live.register(&source.name, source.priority, provider);
                        }
                        Err(e) => warn!(provider = %source.name, path, error = %e, "Replay fixture unusable; skipped"),
                    }
                }
            }
        }

        if providers.options.is_empty() {
            return Err(ProviderError::NoProviders("options_data"));
        }
        info!(order = ?providers.options.names(), "Provider registries ready");
        Ok(providers)
    }
}

fn static_provider(source: &ProviderSourceConfig, underlyings: &[UnderlyingConfig]) -> StaticProvider {
    underlyings
        .iter()
        .filter(|u| u.enabled)
        .fold(StaticProvider::new(&source.name), |provider, u| {
            let reference = u
                .reference_price
                .unwrap_or(u.strike_step * FALLBACK_REFERENCE_STEPS);
            provider.with_underlying(&u.symbol, reference, u.strike_step)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_config_builds_static_source() {
        let config = config::generate_default_config();
        let providers = DataProviders::from_config(&config.providers, &config.underlyings).unwrap();
        assert_eq!(providers.options.names(), vec!["static"]);
        assert_eq!(providers.live.len(), 1);
        assert_eq!(providers.timeout(), Duration::from_millis(config.providers.timeout_ms));
    }

    #[tokio::test]
    async fn test_static_source_uses_reference_price() {
        let config = config::generate_default_config();
        let providers = DataProviders::from_config(&config.providers, &config.underlyings).unwrap();
        let chain = providers.option_chain("NIFTY").await.unwrap();
        assert!((chain.spot - 25000.0).abs() < 25000.0 * 0.01);
    }

    #[test]
    fn test_unusable_replay_only_is_error() {
        let mut config = config::generate_default_config();
        config.providers.sources = vec![ProviderSourceConfig {
            name: "replay".into(),
            kind: ProviderKind::Replay,
            priority: 1,
            path: Some("/nonexistent/fixture.json".into()),
            enabled: true,
        }];
        assert_matches!(
            DataProviders::from_config(&config.providers, &config.underlyings),
            Err(ProviderError::NoProviders("options_data"))
        );
    }
}
