use crate::error::LedgerError;
use crate::types::TradeRecord;
use async_trait::async_trait;

/// Durable sink for closed trades.
///
/// A record is only considered written once `append` returns `Ok`; the
/// scalper keeps the trade open until then.
#[async_trait]
pub trait TradeLedger: Send + Sync {
    async fn append(&self, record: &TradeRecord) -> Result<(), LedgerError>;

    /// Every record for an underlying, oldest first
    async fn records(&self, underlying: &str) -> Result<Vec<TradeRecord>, LedgerError>;
}
