//! Market data providers for the confluence engine
//!
//! Three capabilities are modelled as separate traits: live tick streams,
//! option chains and historical candles. Each capability has its own
//! [`ProviderRegistry`]; calls go to the lowest-priority-number provider
//! first and fail over on error or timeout.
//!
//! # Modules
//!
//! - [`traits`] - Capability traits
//! - [`registry`] - Priority registries with timed failover
//! - [`builder`] - Registry construction from configuration
//! - [`static_source`] - Synthetic market for paper runs
//! - [`replay`] - Fixture replay
//! - [`pipeline`] - Polling and tick-pump tasks feeding the analytics coordinator

pub mod builder;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod replay;
pub mod static_source;
pub mod stream;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
pub use pipeline::{ChainUpdate, Pipeline};
pub use registry::{DataProviders, ProviderRegistry};
pub use replay::{ReplayFixture, ReplayProvider};
pub use static_source::StaticProvider;
pub use traits::{HistoricalDataProvider, LiveStreamProvider, OptionsDataProvider};
