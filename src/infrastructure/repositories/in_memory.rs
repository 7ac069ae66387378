//! In-memory candle store.
//!
//! Same contract as the SQLite store, backed by one ordered map per
//! `(symbol, interval)` series. Used by tests and by store-less development
//! setups; data is lost on restart.
//!
//! [`InMemoryCandleRepository::set_available`] simulates a backend outage so
//! degradation paths can be exercised without a broken database.

use crate::domain::errors::MarketDataError;
use crate::domain::market::candle::Candle;
use crate::domain::market::interval::KlineInterval;
use crate::domain::repositories::CandleRepository;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

type SeriesKey = (String, KlineInterval);

pub struct InMemoryCandleRepository {
    series: Arc<RwLock<HashMap<SeriesKey, BTreeMap<i64, Candle>>>>,
    available: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self {
            series: Arc::new(RwLock::new(HashMap::new())),
            available: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful `write_candles` calls.
    pub fn write_calls(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Total candles held across all series.
    pub async fn len(&self) -> usize {
        self.series.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn ensure_available(&self) -> Result<(), MarketDataError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MarketDataError::store("in-memory store marked unavailable"))
        }
    }
}

impl Default for InMemoryCandleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn write_candles(&self, candles: &[Candle]) -> Result<(), MarketDataError> {
        self.ensure_available()?;

        let mut series = self.series.write().await;
        for candle in candles {
            series
                .entry((candle.symbol.clone(), candle.interval))
                .or_default()
                .insert(candle.open_time, candle.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query_range(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, MarketDataError> {
        self.ensure_available()?;

        let (mut lower, mut upper) = (start.unwrap_or(i64::MIN), end.unwrap_or(i64::MAX));
        if lower > upper {
            std::mem::swap(&mut lower, &mut upper);
        }
        let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);

        let series = self.series.read().await;
        let Some(points) = series.get(&(symbol.to_string(), interval)) else {
            return Ok(Vec::new());
        };

        Ok(points
            .range(lower..upper)
            .map(|(_, candle)| candle.clone())
            .take(limit)
            .collect())
    }
}
