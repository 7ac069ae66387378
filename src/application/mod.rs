pub mod bootstrap;

// Historical queries: response cache, store read-through, gap filling
pub mod market_data;

// Live streams: shared upstream connections and consumer fan-out
pub mod streaming;

// System orchestrator
pub mod system;
