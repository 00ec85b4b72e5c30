//! Prometheus metrics infrastructure
//!
//! Metric handle sets for the ingestion pipeline, the scalper actors and
//! the alert engine. Handles are cheap to clone and record into whatever
//! recorder is installed; without `init_metrics` they are no-ops.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP listener exposing `/metrics` on the given port.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Per-underlying ingestion and analytics metrics
///
/// * `pipeline_cycles_total` - completed ingestion cycles
/// * `pipeline_snapshots_total` - option snapshots ingested
/// * `pipeline_skipped_cycles_total` - cycles skipped after all providers failed
/// * `pipeline_cycle_duration_seconds` - fetch plus analytics time
#[derive(Clone)]
pub struct PipelineMetrics {
    cycles: Counter,
    snapshots: Counter,
    skipped: Counter,
    cycle_duration: Histogram,
    underlying: String,
}

impl PipelineMetrics {
    pub fn new(underlying: &str) -> Self {
        let name = underlying.to_string();
        Self {
            cycles: counter!("pipeline_cycles_total", "underlying" => name.clone()),
            snapshots: counter!("pipeline_snapshots_total", "underlying" => name.clone()),
            skipped: counter!("pipeline_skipped_cycles_total", "underlying" => name.clone()),
            cycle_duration: histogram!("pipeline_cycle_duration_seconds", "underlying" => name.clone()),
            underlying: name,
        }
    }

    pub fn record_cycle(&self, duration: Duration, snapshots: usize) {
        self.cycles.increment(1);
        self.snapshots.increment(snapshots as u64);
        self.cycle_duration.record(duration.as_secs_f64());
    }

    pub fn record_skipped(&self) {
        self.skipped.increment(1);
    }

    pub fn underlying(&self) -> &str {
        &self.underlying
    }
}

/// Record a provider failover from `from` to the next candidate
pub fn record_failover(capability: &'static str, from: &str) {
    counter!(
        "provider_failovers_total",
        "capability" => capability,
        "provider" => from.to_string()
    )
    .increment(1);
}

/// Scalper state machine metrics for one underlying
#[derive(Clone)]
pub struct ScalperMetrics {
    entries: Counter,
    ledger_failures: Counter,
    open_trades: Gauge,
    underlying: String,
}

impl ScalperMetrics {
    pub fn new(underlying: &str) -> Self {
        let name = underlying.to_string();
        Self {
            entries: counter!("scalper_entries_total", "underlying" => name.clone()),
            ledger_failures: counter!("scalper_ledger_failures_total", "underlying" => name.clone()),
            open_trades: gauge!("scalper_open_trades", "underlying" => name.clone()),
            underlying: name,
        }
    }

    pub fn record_transition(&self, from: &'static str, to: &'static str) {
        counter!(
            "scalper_transitions_total",
            "underlying" => self.underlying.clone(),
            "from" => from,
            "to" => to
        )
        .increment(1);
    }

    pub fn record_entry(&self) {
        self.entries.increment(1);
        self.open_trades.set(1.0);
    }

    pub fn record_exit(&self, reason: &'static str, pnl: f64) {
        counter!(
            "scalper_exits_total",
            "underlying" => self.underlying.clone(),
            "reason" => reason
        )
        .increment(1);
        histogram!("scalper_trade_pnl", "underlying" => self.underlying.clone()).record(pnl);
        self.open_trades.set(0.0);
    }

    pub fn record_ledger_failure(&self) {
        self.ledger_failures.increment(1);
    }
}

/// Alert engine metrics
#[derive(Clone)]
pub struct AlertMetrics {
    evaluations: Counter,
    delivery_failures: Counter,
}

impl AlertMetrics {
    pub fn new() -> Self {
        Self {
            evaluations: counter!("alert_evaluations_total"),
            delivery_failures: counter!("alert_delivery_failures_total"),
        }
    }

    pub fn record_evaluation(&self) {
        self.evaluations.increment(1);
    }

    pub fn record_fired(&self, kind: &'static str) {
        counter!("alerts_fired_total", "kind" => kind).increment(1);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.increment(1);
    }
}

impl Default for AlertMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that records a pipeline cycle's duration on drop
///
/// # Example
///
/// ```ignore
/// let mut guard = CycleTimer::new(&metrics);
/// // ... analyse the fetched chain ...
/// guard.set_snapshots(chain.snapshots.len());
/// ```
pub struct CycleTimer<'a> {
    metrics: &'a PipelineMetrics,
    start: Instant,
    snapshots: usize,
}

impl<'a> CycleTimer<'a> {
    pub fn new(metrics: &'a PipelineMetrics) -> Self {
        Self {
            metrics,
            start: Instant::now(),
            snapshots: 0,
        }
    }

    pub fn set_snapshots(&mut self, count: usize) {
        self.snapshots = count;
    }
}

impl Drop for CycleTimer<'_> {
    fn drop(&mut self) {
        self.metrics.record_cycle(self.start.elapsed(), self.snapshots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_without_recorder() {
        let pipeline = PipelineMetrics::new("NIFTY");
        assert_eq!(pipeline.underlying(), "NIFTY");
        {
            let mut timer = CycleTimer::new(&pipeline);
            timer.set_snapshots(12);
        }
        pipeline.record_skipped();

        let scalper = ScalperMetrics::new("NIFTY");
        scalper.record_transition("idle", "armed");
        scalper.record_entry();
        scalper.record_exit("stop_loss", -300.0);
        record_failover("options_data", "primary");
        AlertMetrics::new().record_fired("pcr_above");
    }
}
