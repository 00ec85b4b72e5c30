//! Append-only record of closed trades

pub mod jsonl;
pub mod memory;
pub mod traits;

pub use jsonl::JsonlLedger;
pub use memory::InMemoryLedger;
pub use traits::TradeLedger;

use config::{LedgerConfig, LedgerKind};
use std::sync::Arc;

pub fn from_config(config: &LedgerConfig) -> Arc<dyn TradeLedger> {
    match config.kind {
        LedgerKind::Memory => Arc::new(InMemoryLedger::new()),
        LedgerKind::Jsonl => Arc::new(JsonlLedger::new(&config.path)),
    }
}
