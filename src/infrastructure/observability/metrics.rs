//! Prometheus metrics definitions for chartfeed
//!
//! All metrics use the `chartfeed_` prefix and are read-only.

use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus metrics for the market-data core
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Upstream REST calls by endpoint and status
    pub upstream_requests_total: CounterVec,
    /// Upstream REST latency in seconds
    pub upstream_latency_seconds: HistogramVec,
    /// Response cache lookups by result (hit/miss)
    pub response_cache_lookups_total: CounterVec,
    /// Historical queries by resolution path
    pub historical_queries_total: CounterVec,
    /// Gap-fill fetches by result
    pub gap_fills_total: CounterVec,
    /// Upstream stream connections currently held
    pub active_streams: Gauge,
    /// Reconnect attempts by stream kind
    pub stream_reconnects_total: CounterVec,
    /// Streams dropped after exhausting reconnects
    pub streams_exhausted_total: CounterVec,
    /// Events pushed to consumers by event kind
    pub broadcast_events_total: CounterVec,
    /// Events dropped for lagging consumers
    pub dropped_events_total: CounterVec,
    /// Connected downstream consumers
    pub connected_consumers: Gauge,
    /// Uptime in seconds
    pub uptime_seconds: Gauge,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let upstream_requests_total = CounterVec::new(
            Opts::new(
                "chartfeed_upstream_requests_total",
                "Upstream REST requests by endpoint and status",
            ),
            &["endpoint", "status"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "chartfeed_upstream_latency_seconds",
                "Upstream REST latency in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["endpoint"],
        )?;
        registry.register(Box::new(upstream_latency_seconds.clone()))?;

        let response_cache_lookups_total = CounterVec::new(
            Opts::new(
                "chartfeed_response_cache_lookups_total",
                "Response cache lookups by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(response_cache_lookups_total.clone()))?;

        let historical_queries_total = CounterVec::new(
            Opts::new(
                "chartfeed_historical_queries_total",
                "Historical queries by resolution path",
            ),
            &["path"],
        )?;
        registry.register(Box::new(historical_queries_total.clone()))?;

        let gap_fills_total = CounterVec::new(
            Opts::new("chartfeed_gap_fills_total", "Gap-fill fetches by result"),
            &["result"],
        )?;
        registry.register(Box::new(gap_fills_total.clone()))?;

        let active_streams = Gauge::with_opts(Opts::new(
            "chartfeed_active_streams",
            "Upstream stream connections currently held",
        ))?;
        registry.register(Box::new(active_streams.clone()))?;

        let stream_reconnects_total = CounterVec::new(
            Opts::new(
                "chartfeed_stream_reconnects_total",
                "Upstream stream reconnect attempts",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(stream_reconnects_total.clone()))?;

        let streams_exhausted_total = CounterVec::new(
            Opts::new(
                "chartfeed_streams_exhausted_total",
                "Streams dropped after exhausting reconnect attempts",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(streams_exhausted_total.clone()))?;

        let broadcast_events_total = CounterVec::new(
            Opts::new(
                "chartfeed_broadcast_events_total",
                "Events delivered to consumers by kind",
            ),
            &["event"],
        )?;
        registry.register(Box::new(broadcast_events_total.clone()))?;

        let dropped_events_total = CounterVec::new(
            Opts::new(
                "chartfeed_dropped_events_total",
                "Events dropped because a consumer queue was full",
            ),
            &["event"],
        )?;
        registry.register(Box::new(dropped_events_total.clone()))?;

        let connected_consumers = Gauge::with_opts(Opts::new(
            "chartfeed_connected_consumers",
            "Connected downstream consumers",
        ))?;
        registry.register(Box::new(connected_consumers.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "chartfeed_uptime_seconds",
            "Server uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            upstream_requests_total,
            upstream_latency_seconds,
            response_cache_lookups_total,
            historical_queries_total,
            gap_fills_total,
            active_streams,
            stream_reconnects_total,
            streams_exhausted_total,
            broadcast_events_total,
            dropped_events_total,
            connected_consumers,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn observe_upstream(&self, endpoint: &str, status: &str, latency: f64) {
        self.upstream_requests_total
            .with_label_values(&[endpoint, status])
            .inc();
        self.upstream_latency_seconds
            .with_label_values(&[endpoint])
            .observe(latency);
    }

    pub fn inc_cache_lookup(&self, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.response_cache_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn inc_historical_query(&self, path: &str) {
        self.historical_queries_total.with_label_values(&[path]).inc();
    }

    pub fn inc_gap_fill(&self, ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        self.gap_fills_total.with_label_values(&[result]).inc();
    }

    pub fn inc_reconnects(&self, kind: &str) {
        self.stream_reconnects_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_exhausted(&self, kind: &str) {
        self.streams_exhausted_total.with_label_values(&[kind]).inc();
    }

    pub fn inc_broadcast(&self, event: &str) {
        self.broadcast_events_total.with_label_values(&[event]).inc();
    }

    pub fn inc_dropped(&self, event: &str) {
        self.dropped_events_total.with_label_values(&[event]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        assert!(metrics.render().contains("chartfeed_"));
    }

    #[test]
    fn test_gauges_render() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.active_streams.set(3.0);
        let output = metrics.render();
        assert!(output.contains("chartfeed_active_streams 3"));
    }

    #[test]
    fn test_labelled_counters() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.inc_cache_lookup(true);
        metrics.inc_cache_lookup(false);
        metrics.inc_cache_lookup(false);
        metrics.observe_upstream("klines", "200", 0.12);

        let output = metrics.render();
        assert!(output.contains("result=\"miss\""));
        assert!(output.contains("chartfeed_upstream_requests_total"));
        assert_eq!(
            metrics
                .response_cache_lookups_total
                .with_label_values(&["miss"])
                .get(),
            2.0
        );
    }
}
