//! Errors raised while parsing market identifiers and loading recorded data

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown option type: {0}")]
    UnknownOptionType(String),

    #[error("Unknown candle interval: {0}")]
    UnknownInterval(String),

    #[error("Cannot read fixture {path}: {source}")]
    FixtureIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed fixture {path}: {source}")]
    FixtureFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read and deserialize a JSON fixture, tagging failures with the path
pub fn load_json<T: serde::de::DeserializeOwned>(path: impl Into<PathBuf>) -> Result<T> {
    let path = path.into();
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(source) => return Err(Error::FixtureIo { path, source }),
    };
    serde_json::from_str(&content).map_err(|source| Error::FixtureFormat { path, source })
}
