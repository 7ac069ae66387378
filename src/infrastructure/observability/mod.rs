//! Observability for chartfeed
//!
//! Metrics live in a prometheus registry. They are exposed two ways:
//!
//! 1. `GET /metrics` renders the Prometheus text format for scraping
//! 2. [`MetricsReporter`] pushes a periodic JSON snapshot through `tracing`

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
