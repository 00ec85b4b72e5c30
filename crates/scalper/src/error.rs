//! Scalper error types

use common::TradeId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum ScalperError {
    #[error("Scalper already running for {0}")]
    AlreadyRunning(String),

    #[error("Scalper not running for {0}")]
    NotRunning(String),

    #[error("Cannot change legs while trade {0} is open")]
    LegsLocked(TradeId),

    #[error("Exit for trade {trade_id} not recorded: {source}")]
    Ledger {
        trade_id: TradeId,
        #[source]
        source: LedgerError,
    },

    #[error("Mailbox for {0} is full")]
    MailboxFull(String),

    #[error("Scalper for {0} is gone")]
    ActorGone(String),
}

pub type ScalperResult<T> = Result<T, ScalperError>;
