//! Logging and Prometheus metrics for the confluence engine
//!
//! [`init_logging`] installs the tracing subscriber once per process and
//! [`init_metrics`] starts the exporter. The `*Metrics` structs hold
//! pre-registered handles labelled per underlying, so hot paths never
//! rebuild metric keys.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LogSettings};
pub use metrics::{init_metrics, AlertMetrics, CycleTimer, PipelineMetrics, ScalperMetrics};
