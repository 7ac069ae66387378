//! Read-through, gap-filling historical query service.
//!
//! Range queries probe the candle store, fetch only the missing windows from
//! upstream, write them back and return the merged series. Latest-N queries
//! and store failures go straight to upstream through the response cache.

use crate::domain::errors::MarketDataError;
use crate::domain::market::candle::{Candle, KlineResponse};
use crate::domain::market::gap::{Gap, find_gaps};
use crate::domain::market::interval::KlineInterval;
use crate::domain::market::symbol::canonical_symbol;
use crate::domain::ports::{HistoricalKlineSource, KlineRequest};
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::observability::Metrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum rows the upstream returns per request
pub const UPSTREAM_PAGE_LIMIT: u32 = 1000;
/// Hard stop for one paginated window
pub const MAX_PAGES_PER_WINDOW: usize = 100;

pub struct HistoricalQueryService {
    source: Arc<dyn HistoricalKlineSource>,
    store: Option<Arc<dyn CandleRepository>>,
    metrics: Metrics,
}

impl HistoricalQueryService {
    pub fn new(
        source: Arc<dyn HistoricalKlineSource>,
        store: Option<Arc<dyn CandleRepository>>,
        metrics: Metrics,
    ) -> Self {
        Self {
            source,
            store,
            metrics,
        }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Most recent `limit` candles. Never consults the store.
    pub async fn get_latest(
        &self,
        symbol: &str,
        interval: KlineInterval,
        limit: u32,
    ) -> Result<KlineResponse, MarketDataError> {
        self.get_range(symbol, interval, None, None, Some(limit)).await
    }

    pub async fn get_range(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<u32>,
    ) -> Result<KlineResponse, MarketDataError> {
        let symbol = canonical_symbol(symbol)?;
        validate_window(start, end, limit)?;

        let (Some(store), Some(start), Some(end)) = (self.store.as_ref(), start, end) else {
            self.metrics.inc_historical_query("upstream_only");
            let data = self.fetch_direct(&symbol, interval, start, end, limit).await?;
            return Ok(KlineResponse::new(data, symbol, interval, start, end));
        };

        let stored = match store
            .query_range(&symbol, interval, Some(start), Some(end), None)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(
                    "HistoricalQueryService: store query failed for {} {}, falling back to upstream: {}",
                    symbol, interval, e
                );
                self.metrics.inc_historical_query("store_fallback");
                let data = self
                    .fetch_direct(&symbol, interval, Some(start), Some(end), limit)
                    .await?;
                return Ok(KlineResponse::new(data, symbol, interval, Some(start), Some(end)));
            }
        };

        let open_times: Vec<i64> = stored.iter().map(|c| c.open_time).collect();
        let gaps = find_gaps(&open_times, start, end, interval);

        if gaps.is_empty() {
            debug!(
                "HistoricalQueryService: store complete for {} {} [{}, {})",
                symbol, interval, start, end
            );
            self.metrics.inc_historical_query("store_hit");
            let data = merge_window(stored, Vec::new(), start, end, limit);
            return Ok(KlineResponse::new(data, symbol, interval, Some(start), Some(end)));
        }

        info!(
            "HistoricalQueryService: {} gap(s) for {} {} [{}, {}), {} stored candles",
            gaps.len(),
            symbol,
            interval,
            start,
            end,
            stored.len()
        );

        let (filled, failed) = self.fill_gaps(&symbol, interval, &gaps).await;
        self.persist(store.as_ref(), &filled).await;

        self.metrics
            .inc_historical_query(if failed == 0 { "gap_filled" } else { "partial" });
        let data = merge_window(stored, filled, start, end, limit);
        Ok(KlineResponse::new(data, symbol, interval, Some(start), Some(end)))
    }

    /// Gaps the store currently has for `[start, end)`.
    pub async fn find_gaps(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start: i64,
        end: i64,
    ) -> Result<Vec<Gap>, MarketDataError> {
        let symbol = canonical_symbol(symbol)?;
        validate_window(Some(start), Some(end), None)?;
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| MarketDataError::store("no candle store configured"))?;
        store.find_gaps(&symbol, interval, start, end).await
    }

    /// Fetches each gap independently; a failed gap is logged and skipped.
    async fn fill_gaps(
        &self,
        symbol: &str,
        interval: KlineInterval,
        gaps: &[Gap],
    ) -> (Vec<Candle>, usize) {
        let mut filled = Vec::new();
        let mut failed = 0;
        for gap in gaps {
            match fetch_window(self.source.as_ref(), symbol, interval, gap.start, gap.end, None)
                .await
            {
                Ok(candles) => {
                    self.metrics.inc_gap_fill(true);
                    debug!(
                        "HistoricalQueryService: gap [{}, {}) filled with {} candles",
                        gap.start,
                        gap.end,
                        candles.len()
                    );
                    filled.extend(candles);
                }
                Err(e) => {
                    self.metrics.inc_gap_fill(false);
                    failed += 1;
                    warn!(
                        "HistoricalQueryService: gap [{}, {}) for {} {} failed, returning partial data: {}",
                        gap.start, gap.end, symbol, interval, e
                    );
                }
            }
        }
        (filled, failed)
    }

    /// Writes closed candles back to the store. Failures never reach the caller.
    async fn persist(&self, store: &dyn CandleRepository, candles: &[Candle]) {
        let now = chrono::Utc::now().timestamp_millis();
        let closed: Vec<Candle> = candles
            .iter()
            .filter(|c| c.close_time < now)
            .cloned()
            .collect();
        if closed.is_empty() {
            return;
        }
        if let Err(e) = store.write_candles(&closed).await {
            warn!(
                "HistoricalQueryService: failed to persist {} gap-fill candles: {}",
                closed.len(),
                e
            );
        }
    }

    async fn fetch_direct(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        match (start, end) {
            (Some(start), Some(end)) => {
                let fetched =
                    fetch_window(self.source.as_ref(), symbol, interval, start, end, limit).await?;
                Ok(merge_window(Vec::new(), fetched, start, end, limit))
            }
            _ => {
                let request = KlineRequest {
                    symbol: symbol.to_string(),
                    interval,
                    start,
                    end: end.map(|e| e - 1),
                    limit,
                };
                let mut candles = self.source.fetch_klines(&request).await?;
                candles.sort_by_key(|c| c.open_time);
                candles.dedup_by_key(|c| c.open_time);
                Ok(candles)
            }
        }
    }
}

fn validate_window(
    start: Option<i64>,
    end: Option<i64>,
    limit: Option<u32>,
) -> Result<(), MarketDataError> {
    if limit == Some(0) {
        return Err(MarketDataError::invalid("limit must be positive"));
    }
    if let (Some(start), Some(end)) = (start, end)
        && start >= end
    {
        return Err(MarketDataError::invalid(format!(
            "start ({}) must be before end ({})",
            start, end
        )));
    }
    Ok(())
}

/// Fetches `[start, end)` page by page.
///
/// Stops at the window end, on a short or empty page, once `limit` candles
/// are collected, or after [`MAX_PAGES_PER_WINDOW`] pages.
pub async fn fetch_window(
    source: &dyn HistoricalKlineSource,
    symbol: &str,
    interval: KlineInterval,
    start: i64,
    end: i64,
    limit: Option<u32>,
) -> Result<Vec<Candle>, MarketDataError> {
    let wanted = limit.map(|l| l as usize).unwrap_or(usize::MAX);
    let mut cursor = start;
    let mut collected = Vec::new();

    for _ in 0..MAX_PAGES_PER_WINDOW {
        if cursor >= end || collected.len() >= wanted {
            break;
        }
        let request = KlineRequest::range(symbol, interval, cursor, end - 1, Some(UPSTREAM_PAGE_LIMIT));
        let page = source.fetch_klines(&request).await?;
        let page_len = page.len();
        let Some(last_open) = page.iter().map(|c| c.open_time).max() else {
            break;
        };

        collected.extend(
            page.into_iter()
                .filter(|c| c.open_time >= cursor && c.open_time < end),
        );

        let next = interval.next_open_time(last_open);
        if page_len < UPSTREAM_PAGE_LIMIT as usize || next <= cursor {
            break;
        }
        cursor = next;
    }

    Ok(collected)
}

/// Merges stored and fetched candles into one ascending series restricted
/// to `[start, end)`. Fetched candles replace stored ones on the same open
/// time.
pub fn merge_window(
    stored: Vec<Candle>,
    fetched: Vec<Candle>,
    start: i64,
    end: i64,
    limit: Option<u32>,
) -> Vec<Candle> {
    let mut merged: BTreeMap<i64, Candle> = BTreeMap::new();
    for candle in stored.into_iter().chain(fetched) {
        merged.insert(candle.open_time, candle);
    }

    let window = merged.range(start..end).map(|(_, c)| c.clone());
    match limit {
        Some(limit) => window.take(limit as usize).collect(),
        None => window.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    const MIN: i64 = 60_000;
    const T0: i64 = 1_700_000_040_000;

    fn candle(open_time: i64, close: rust_decimal::Decimal) -> Candle {
        Candle {
            symbol: "BTC/USDT".to_string(),
            interval: KlineInterval::OneMinute,
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            close_time: open_time + MIN - 1,
            quote_volume: close,
            trade_count: 1,
            taker_buy_base_volume: dec!(0.5),
            taker_buy_quote_volume: close / dec!(2),
        }
    }

    /// Serves a fixed minute series and records every request.
    struct SeriesSource {
        series: Vec<Candle>,
        requests: Mutex<Vec<KlineRequest>>,
    }

    impl SeriesSource {
        fn minutes(from: i64, count: i64) -> Self {
            Self {
                series: (0..count).map(|i| candle(from + i * MIN, dec!(100))).collect(),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HistoricalKlineSource for SeriesSource {
        async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, MarketDataError> {
            self.requests.lock().unwrap().push(request.clone());
            let start = request.start.unwrap_or(i64::MIN);
            let end = request.end.unwrap_or(i64::MAX);
            let limit = request.limit.unwrap_or(500) as usize;
            Ok(self
                .series
                .iter()
                .filter(|c| c.open_time >= start && c.open_time <= end)
                .take(limit)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn test_merge_prefers_fetched_and_clips_window() {
        let stored = vec![candle(T0, dec!(1)), candle(T0 + MIN, dec!(1))];
        let fetched = vec![
            candle(T0 - MIN, dec!(2)),
            candle(T0 + MIN, dec!(2)),
            candle(T0 + 2 * MIN, dec!(2)),
        ];

        let merged = merge_window(stored, fetched, T0, T0 + 3 * MIN, None);
        let closes: Vec<_> = merged.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![dec!(1), dec!(2), dec!(2)]);
        assert_eq!(merged[0].open_time, T0);

        let capped = merge_window(Vec::new(), merged, T0, T0 + 3 * MIN, Some(2));
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[1].open_time, T0 + MIN);
    }

    #[tokio::test]
    async fn test_fetch_window_paginates_until_end() {
        let source = SeriesSource::minutes(T0, 2500);
        let candles = fetch_window(&source, "BTC/USDT", KlineInterval::OneMinute, T0, T0 + 2500 * MIN, None)
            .await
            .unwrap();

        assert_eq!(candles.len(), 2500);
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].start, Some(T0 + 1000 * MIN));
        assert_eq!(requests[0].end, Some(T0 + 2500 * MIN - 1));
    }

    #[tokio::test]
    async fn test_fetch_window_stops_on_short_page() {
        // upstream only has 10 candles even though 2000 were asked for
        let source = SeriesSource::minutes(T0, 10);
        let candles = fetch_window(&source, "BTC/USDT", KlineInterval::OneMinute, T0, T0 + 2000 * MIN, None)
            .await
            .unwrap();

        assert_eq!(candles.len(), 10);
        assert_eq!(source.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_window_honors_limit_between_pages() {
        let source = SeriesSource::minutes(T0, 3000);
        let candles = fetch_window(&source, "BTC/USDT", KlineInterval::OneMinute, T0, T0 + 3000 * MIN, Some(1000))
            .await
            .unwrap();

        assert_eq!(candles.len(), 1000);
        assert_eq!(source.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_validation() {
        let service = HistoricalQueryService::new(
            Arc::new(SeriesSource::minutes(T0, 1)),
            None,
            Metrics::new().unwrap(),
        );

        let inverted = service
            .get_range("BTC/USDT", KlineInterval::OneMinute, Some(T0 + MIN), Some(T0), None)
            .await;
        assert!(matches!(inverted, Err(MarketDataError::InvalidRequest { .. })));

        let zero = service.get_latest("BTC/USDT", KlineInterval::OneMinute, 0).await;
        assert!(matches!(zero, Err(MarketDataError::InvalidRequest { .. })));

        let empty = service.get_latest("  ", KlineInterval::OneMinute, 10).await;
        assert!(matches!(empty, Err(MarketDataError::InvalidRequest { .. })));
    }

    #[tokio::test]
    async fn test_latest_without_store_goes_upstream() {
        let source = Arc::new(SeriesSource::minutes(T0, 5));
        let service = HistoricalQueryService::new(source.clone(), None, Metrics::new().unwrap());

        let response = service
            .get_latest("btcusdt", KlineInterval::OneMinute, 3)
            .await
            .unwrap();

        assert_eq!(response.symbol, "BTC/USDT");
        assert_eq!(response.count, 3);
        assert_eq!(response.start, None);
        let requests = source.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].limit, Some(3));
    }
}
