//! Push-based metrics reporter for chartfeed
//!
//! Periodically emits a JSON snapshot of the core counters through
//! `tracing` (target `chartfeed::metrics`) so log shippers can pick it up
//! without scraping `/metrics`.

use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const HISTORICAL_PATHS: [&str; 5] = [
    "upstream_only",
    "store_fallback",
    "store_hit",
    "gap_filled",
    "partial",
];
const STREAM_KINDS: [&str; 2] = ["kline", "trade"];
const BROADCAST_KINDS: [&str; 4] = ["candlestick", "trade", "historical_data", "recent_trades"];

/// Metrics snapshot for JSON output
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub historical: HistoricalSnapshot,
    pub streaming: StreamingSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HistoricalSnapshot {
    pub upstream_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub queries_by_path: Vec<(String, u64)>,
    pub gap_fills_ok: u64,
    pub gap_fills_failed: u64,
}

#[derive(Debug, Serialize)]
pub struct StreamingSnapshot {
    pub active_streams: u64,
    pub connected_consumers: u64,
    pub reconnects: u64,
    pub exhausted: u64,
    pub events_broadcast: u64,
    pub events_dropped: u64,
}

/// Push-based metrics reporter
///
/// Outputs metrics as structured JSON logs on a configurable interval.
pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run the reporter in a loop, outputting metrics periodically
    pub async fn run(self) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let snapshot = self.collect_snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    info!(target: "chartfeed::metrics", "METRICS_JSON:{}", json);
                    info!(
                        "Streams: {} | Consumers: {} | Upstream requests: {} | Uptime: {}s",
                        snapshot.streaming.active_streams,
                        snapshot.streaming.connected_consumers,
                        snapshot.historical.upstream_requests,
                        snapshot.uptime_seconds
                    );
                }
                Err(e) => warn!("Failed to serialize metrics: {}", e),
            }
        }
    }

    /// Collect current metrics snapshot
    pub fn collect_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        self.metrics.uptime_seconds.set(uptime as f64);

        let m = &self.metrics;
        let counter = |vec: &prometheus::CounterVec, label: &str| {
            vec.with_label_values(&[label]).get() as u64
        };
        let sum_over = |vec: &prometheus::CounterVec, labels: &[&str]| -> u64 {
            labels.iter().map(|l| counter(vec, *l)).sum()
        };

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            historical: HistoricalSnapshot {
                upstream_requests: m
                    .upstream_latency_seconds
                    .with_label_values(&["klines"])
                    .get_sample_count(),
                cache_hits: counter(&m.response_cache_lookups_total, "hit"),
                cache_misses: counter(&m.response_cache_lookups_total, "miss"),
                queries_by_path: HISTORICAL_PATHS
                    .iter()
                    .map(|p| (p.to_string(), counter(&m.historical_queries_total, *p)))
                    .collect(),
                gap_fills_ok: counter(&m.gap_fills_total, "ok"),
                gap_fills_failed: counter(&m.gap_fills_total, "failed"),
            },
            streaming: StreamingSnapshot {
                active_streams: m.active_streams.get().max(0.0) as u64,
                connected_consumers: m.connected_consumers.get().max(0.0) as u64,
                reconnects: sum_over(&m.stream_reconnects_total, &STREAM_KINDS),
                exhausted: sum_over(&m.streams_exhausted_total, &STREAM_KINDS),
                events_broadcast: sum_over(&m.broadcast_events_total, &BROADCAST_KINDS),
                events_dropped: sum_over(&m.dropped_events_total, &BROADCAST_KINDS),
            },
        }
    }
}
