//! Analytics error types

use chrono::{DateTime, Utc};
use common::OptionContract;
use thiserror::Error;

/// Errors raised while ingesting data into the analytics components.
///
/// Pricing never produces an error; degenerate pricing inputs yield `None`.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Snapshot for {contract} at {got} is older than the last one at {last}")]
    OutOfOrderSnapshot {
        contract: OptionContract,
        last: DateTime<Utc>,
        got: DateTime<Utc>,
    },

    #[error("Chain for {0} contains no snapshots")]
    EmptyChain(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
