//! In-memory ledger for tests and paper runs

use crate::error::LedgerError;
use crate::ledger::traits::TradeLedger;
use crate::types::TradeRecord;
use async_trait::async_trait;
use parking_lot::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: RwLock<Vec<TradeRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn all(&self) -> Vec<TradeRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl TradeLedger for InMemoryLedger {
    async fn append(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn records(&self, underlying: &str) -> Result<Vec<TradeRecord>, LedgerError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.underlying == underlying)
            .cloned()
            .collect())
    }
}
