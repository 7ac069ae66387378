pub mod cached_source;
pub mod historical_service;
pub mod response_cache;

pub use cached_source::{CachedKlineSource, KlineCache, spawn_cache_sweeper};
pub use historical_service::HistoricalQueryService;
pub use response_cache::ResponseCache;
