//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Net collateral held by all markets
    TotalDeposited,
    /// Markets still in the active set
    ActiveMarkets,
    /// Resolved markets awaiting expiry
    MaturedMarkets,
    /// Current vault round
    VaultRound,
    /// Committed events
    EventLogLength,
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::TotalDeposited => "optmarket_total_deposited",
            GaugeMetric::ActiveMarkets => "optmarket_active_markets",
            GaugeMetric::MaturedMarkets => "optmarket_matured_markets",
            GaugeMetric::VaultRound => "optmarket_vault_round",
            GaugeMetric::EventLogLength => "optmarket_events",
        }
    }
}

/// Result of an engine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed,
    Rejected,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Committed => "committed",
            Outcome::Rejected => "rejected",
        }
    }
}

/// Install the Prometheus exporter with an HTTP listener on `port`
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {}", e))?;
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Count an engine operation and record its latency
pub fn record_operation(op: &'static str, outcome: Outcome, latency: Duration) {
    metrics::counter!("optmarket_operations_total", "op" => op, "outcome" => outcome.as_str())
        .increment(1);
    metrics::histogram!("optmarket_operation_latency_us", "op" => op)
        .record(latency.as_micros() as f64);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}
