//! Alert error types

use common::AlertId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    NotFound(AlertId),

    #[error("Alert limit reached ({0})")]
    LimitReached(usize),

    #[error("Invalid alert: {0}")]
    Invalid(String),

    #[error("Delivery via {notifier} failed: {reason}")]
    Delivery { notifier: String, reason: String },
}

pub type AlertResult<T> = Result<T, AlertError>;
