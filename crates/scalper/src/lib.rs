//! Confluence scalper
//!
//! A per-underlying state machine that arms when price touches a
//! support/resistance level with agreeing OI/PCR sentiment, enters on a
//! two-sided option breakout, and manages the trade from the live tick
//! stream until a stop, invalidation, target, theta or manual exit.
//!
//! # Modules
//!
//! - [`engine`] - The state machine
//! - [`legs`] - Option-leg breakout references and ATM leg selection
//! - [`ledger`] - Append-only trade ledger
//! - [`actor`] - Per-underlying task owning a scalper and its theta watchdog
//! - [`manager`] - Start/stop/status and input routing
//!
//! # Invariants
//!
//! - At most one open trade per underlying
//! - No entry unless the bought leg breaks up and the inverse leg breaks down
//! - A trade leaves ENTERED only after its exit record is written

pub mod actor;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod legs;
pub mod manager;
pub mod types;

pub use actor::ScalperHandle;
pub use engine::ConfluenceScalper;
pub use error::{LedgerError, ScalperError, ScalperResult};
pub use ledger::{InMemoryLedger, JsonlLedger, TradeLedger};
pub use manager::ScalperManager;
pub use types::{
    ConfluenceSignal, ExitReason, LegMap, MarketContext, ScalperEvent, ScalperSettings, ScalperState, ScalperStatus, ScalperTrade,
    TradeRecord,
};
