//! Provider error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Provider '{provider}' failed: {message}")]
    Failed { provider: String, message: String },

    #[error("No data for {0}")]
    NoData(String),

    #[error("Stream not connected")]
    NotConnected,

    #[error("All {capability} providers failed ({attempts} tried)")]
    Exhausted {
        capability: &'static str,
        attempts: usize,
    },

    #[error("No {0} provider registered")]
    NoProviders(&'static str),

    #[error("Fixture error: {0}")]
    Fixture(#[from] common::Error),
}

impl ProviderError {
    pub fn failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
