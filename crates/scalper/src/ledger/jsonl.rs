//! JSON-lines ledger file, one closed trade per line

use crate::error::LedgerError;
use crate::ledger::traits::TradeLedger;
use crate::types::TradeRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

pub struct JsonlLedger {
    path: PathBuf,
    // serialises appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TradeLedger for JsonlLedger {
    async fn append(&self, record: &TradeRecord) -> Result<(), LedgerError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        debug!(trade_id = %record.trade_id, path = %self.path.display(), "Trade recorded");
        Ok(())
    }

    async fn records(&self, underlying: &str) -> Result<Vec<TradeRecord>, LedgerError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: TradeRecord = serde_json::from_str(line)?;
            if record.underlying == underlying {
                out.push(record);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExitReason;
    use chrono::Utc;
    use common::{OptionType, Sentiment, TradeId};

    fn record(underlying: &str, reason: ExitReason) -> TradeRecord {
        TradeRecord {
            trade_id: TradeId::new(),
            underlying: underlying.into(),
            leg: format!("{}25000CE", underlying),
            option_type: OptionType::Call,
            direction: Sentiment::Bullish,
            level_price: 25000.0,
            entry_price: 100.0,
            entry_time: Utc::now(),
            exit_price: 84.9,
            exit_time: Utc::now(),
            quantity: 133,
            exit_reason: reason,
            realized_pnl: -2008.3,
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let path = std::env::temp_dir()
            .join(format!("ledger-{}", uuid::Uuid::new_v4()))
            .join("trades.jsonl");
        let ledger = JsonlLedger::new(&path);

        assert!(ledger.records("NIFTY").await.unwrap().is_empty());
        ledger.append(&record("NIFTY", ExitReason::StopLoss)).await.unwrap();
        ledger.append(&record("BANKNIFTY", ExitReason::TargetHit)).await.unwrap();
        ledger.append(&record("NIFTY", ExitReason::ManualStop)).await.unwrap();

        let nifty = ledger.records("NIFTY").await.unwrap();
        assert_eq!(nifty.len(), 2);
        assert_eq!(nifty[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(nifty[1].exit_reason, ExitReason::ManualStop);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
