//! Options analytics for the confluence engine
//!
//! # Core Components
//!
//! - [`black_scholes`] - Black-Scholes pricing, Greeks and implied volatility
//! - [`surface`] - Per-expiry smiles, skew and term structure
//! - [`iv`] - IV history, rank, percentile and regime signals
//! - [`oi_buildup`] - Open-interest buildup classification and summaries
//! - [`levels`] - Support/resistance from OI, swings and volume nodes
//! - [`pcr`] - Put/call ratios and max pain
//! - [`strategy`] - Multi-leg strategies, expiry payoff and net Greeks
//! - [`tick_buffer`] - Bounded per-symbol tick history with VWAP
//! - [`candles`] - OHLCV bar aggregation
//! - [`coordinator`] - Shared entry point over all of the above
//!
//! # Key Invariants
//!
//! - Degenerate pricing inputs yield `None`, never a panic
//! - A failed IV solve falls back to the default vol and is marked low confidence
//! - Snapshot timestamps never go backwards for a contract
//! - IV history holds at most one point per day and never exceeds its window
//! - Every snapshot pair maps to exactly one buildup pattern

pub mod black_scholes;
pub mod candles;
pub mod coordinator;
pub mod error;
pub mod iv;
pub mod levels;
pub mod oi_buildup;
pub mod pcr;
pub mod strategy;
pub mod surface;
pub mod tick_buffer;
pub mod types;

pub use black_scholes::{GreeksEngine, GreeksEngineConfig};
pub use coordinator::{AnalyticsCoordinator, CycleReport, EnrichedChain};
pub use error::AnalyticsError;
pub use iv::{IvAnalysis, IvAnalyzer, IvHistoryPoint, VolSignal};
pub use levels::{LevelDetector, LevelKind, LevelSource, SupportResistanceLevel};
pub use oi_buildup::{BuildupPattern, BuildupStrength, BuildupSummary, OiBuildupClassifier, OiBuildupRecord};
pub use pcr::{PcrPoint, PcrTracker};
pub use strategy::{MarketView, Recommendation, Side, Strategy, StrategyAnalysis, StrategyBuilder, StrategyKind, StrategyLeg};
pub use tick_buffer::TickBuffer;
pub use types::{BsInputs, Greeks, GreeksResult, IvConfidence, Moneyness};

pub type Result<T> = std::result::Result<T, AnalyticsError>;
