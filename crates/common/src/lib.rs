//! Common types and utilities for the confluence engine
//!
//! # Modules
//!
//! - [`error`] - Symbol, interval and fixture errors
//! - [`types`] - Option contracts, snapshots, chains, ticks and candles
//! - [`scheduler`] - Cancellable delayed tasks keyed by id
//! - [`shutdown`] - Graceful shutdown coordination

pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod types;

pub use error::{Error, Result};
pub use scheduler::TaskScheduler;
pub use shutdown::ShutdownController;
pub use types::*;
