//! Prometheus metrics for connection counts, request outcomes, WAL flush
//! throughput, and replication pull activity, rendered with `TextEncoder`
//! for the `/metrics` endpoint.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

/// All counters and gauges this server exposes, plus the registry that owns
/// them for rendering at `/metrics`.
pub struct Metrics {
    registry: Registry,
    pub connections_active: IntGauge,
    pub connections_total: IntCounter,
    pub requests_total: IntCounterVec,
    pub parse_errors_total: IntCounter,
    pub admission_rejections_total: IntCounter,
    pub wal_flush_total: IntCounter,
    pub wal_flush_duration_seconds: Histogram,
    pub wal_flush_bytes_total: IntCounter,
    pub replication_pulls_total: IntCounter,
    pub replication_pull_errors_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let connections_active =
            IntGauge::new("ferrokv_connections_active", "Currently open client connections")?;
        let connections_total = IntCounter::new(
            "ferrokv_connections_total",
            "Total client connections accepted",
        )?;
        let requests_total = IntCounterVec::new(
            Opts::new("ferrokv_requests_total", "Requests handled, by command kind"),
            &["kind"],
        )?;
        let parse_errors_total =
            IntCounter::new("ferrokv_parse_errors_total", "Requests rejected by the parser")?;
        let admission_rejections_total = IntCounter::new(
            "ferrokv_admission_rejections_total",
            "Mutations rejected because this node is a read-only slave",
        )?;
        let wal_flush_total =
            IntCounter::new("ferrokv_wal_flush_total", "WAL segment flushes performed")?;
        let wal_flush_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "ferrokv_wal_flush_duration_seconds",
            "WAL flush latency",
        ))?;
        let wal_flush_bytes_total =
            IntCounter::new("ferrokv_wal_flush_bytes_total", "Bytes written to WAL segments")?;
        let replication_pulls_total = IntCounter::new(
            "ferrokv_replication_pulls_total",
            "Replication pull requests issued by this slave",
        )?;
        let replication_pull_errors_total = IntCounter::new(
            "ferrokv_replication_pull_errors_total",
            "Replication pull requests that failed",
        )?;

        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(parse_errors_total.clone()))?;
        registry.register(Box::new(admission_rejections_total.clone()))?;
        registry.register(Box::new(wal_flush_total.clone()))?;
        registry.register(Box::new(wal_flush_duration_seconds.clone()))?;
        registry.register(Box::new(wal_flush_bytes_total.clone()))?;
        registry.register(Box::new(replication_pulls_total.clone()))?;
        registry.register(Box::new(replication_pull_errors_total.clone()))?;

        Ok(Self {
            registry,
            connections_active,
            connections_total,
            requests_total,
            parse_errors_total,
            admission_rejections_total,
            wal_flush_total,
            wal_flush_duration_seconds,
            wal_flush_bytes_total,
            replication_pulls_total,
            replication_pull_errors_total,
        })
    }

    /// Render every registered metric in the Prometheus text exposition
    /// format, for the `/metrics` HTTP endpoint.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new().unwrap();
        metrics.connections_total.inc();
        metrics.requests_total.with_label_values(&["get"]).inc();
        let rendered = metrics.render();
        assert!(rendered.contains("ferrokv_connections_total"));
        assert!(rendered.contains("ferrokv_requests_total"));
    }
}
