use crate::application::market_data::response_cache::ResponseCache;
use crate::domain::errors::MarketDataError;
use crate::domain::market::candle::Candle;
use crate::domain::ports::{HistoricalKlineSource, KlineRequest};
use crate::infrastructure::observability::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub type KlineCache = ResponseCache<KlineRequest, Vec<Candle>>;

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Read-through decorator putting the response cache in front of an
/// upstream source. Errors are never cached.
pub struct CachedKlineSource {
    inner: Arc<dyn HistoricalKlineSource>,
    cache: Arc<KlineCache>,
    metrics: Metrics,
}

impl CachedKlineSource {
    pub fn new(
        inner: Arc<dyn HistoricalKlineSource>,
        cache: Arc<KlineCache>,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner,
            cache,
            metrics,
        }
    }

    pub fn cache(&self) -> Arc<KlineCache> {
        self.cache.clone()
    }
}

#[async_trait]
impl HistoricalKlineSource for CachedKlineSource {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, MarketDataError> {
        if let Some(hit) = self.cache.get(request) {
            self.metrics.inc_cache_lookup(true);
            debug!("CachedKlineSource: cache hit for {:?}", request);
            return Ok(hit);
        }
        self.metrics.inc_cache_lookup(false);

        let candles = self.inner.fetch_klines(request).await?;
        self.cache.put(request.clone(), candles.clone());
        Ok(candles)
    }
}

/// Spawns the periodic sweep that evicts stale cache entries, once per TTL
/// but never more than once a second.
pub fn spawn_cache_sweeper(cache: Arc<KlineCache>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cache.ttl().max(MIN_SWEEP_PERIOD));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.purge_expired();
            if removed > 0 {
                debug!("ResponseCache: swept {} stale entries", removed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::interval::KlineInterval;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl HistoricalKlineSource for CountingSource {
        async fn fetch_klines(&self, _request: &KlineRequest) -> Result<Vec<Candle>, MarketDataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MarketDataError::upstream(Some(503), "unavailable"))
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn source(fail: bool) -> Arc<CountingSource> {
        Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_requests_hit_upstream_once() {
        let inner = source(false);
        let cache = Arc::new(KlineCache::new(Duration::from_secs(60)));
        let cached = CachedKlineSource::new(inner.clone(), cache, Metrics::new().unwrap());
        let request = KlineRequest::latest("BTC/USDT", KlineInterval::OneMinute, 100);

        cached.fetch_klines(&request).await.unwrap();
        cached.fetch_klines(&request).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // a different limit is a different key
        let other = KlineRequest::latest("BTC/USDT", KlineInterval::OneMinute, 50);
        cached.fetch_klines(&other).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        cached.fetch_klines(&request).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let inner = source(true);
        let cache = Arc::new(KlineCache::new(Duration::from_secs(60)));
        let cached = CachedKlineSource::new(inner.clone(), cache.clone(), Metrics::new().unwrap());
        let request = KlineRequest::latest("BTC/USDT", KlineInterval::OneMinute, 100);

        assert!(cached.fetch_klines(&request).await.is_err());
        assert!(cached.fetch_klines(&request).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_bounds_memory() {
        let cache = Arc::new(KlineCache::new(Duration::from_secs(60)));
        cache.put(
            KlineRequest::latest("BTC/USDT", KlineInterval::OneMinute, 1),
            Vec::new(),
        );
        let sweeper = spawn_cache_sweeper(cache.clone());

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(cache.is_empty());
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_with_zero_ttl() {
        let cache = Arc::new(KlineCache::new(Duration::ZERO));
        cache.put(
            KlineRequest::latest("BTC/USDT", KlineInterval::OneMinute, 1),
            Vec::new(),
        );
        let sweeper = spawn_cache_sweeper(cache.clone());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!sweeper.is_finished());
        assert!(cache.is_empty());
        sweeper.abort();
    }
}
