//! Repository abstractions for candle persistence.
//!
//! The store is a read-through cache for the upstream exchange: it holds one
//! logical series per `(symbol, interval)` and never fabricates points.
//! Implementations surface every backend failure as
//! [`MarketDataError::StoreUnavailable`] so callers can degrade to
//! upstream-only mode.
//!
//! # Implementations
//!
//! - `SqliteCandleRepository`: sqlx-backed production store
//! - `InMemoryCandleRepository`: `RwLock<BTreeMap>` store for tests and
//!   store-less development

use crate::domain::errors::MarketDataError;
use crate::domain::market::candle::Candle;
use crate::domain::market::gap::{Gap, find_gaps};
use crate::domain::market::interval::KlineInterval;
use async_trait::async_trait;

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Idempotent batch upsert keyed by `(symbol, interval, open_time)`.
    async fn write_candles(&self, candles: &[Candle]) -> Result<(), MarketDataError>;

    /// Candles of one series within `[start, end)`, ascending by open time.
    ///
    /// Missing bounds are open-ended; `start > end` is treated as swapped.
    /// `limit` caps the ascending result.
    async fn query_range(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start: Option<i64>,
        end: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, MarketDataError>;

    /// Missing sub-ranges of `[start, end)` at the interval's cadence.
    async fn find_gaps(
        &self,
        symbol: &str,
        interval: KlineInterval,
        start: i64,
        end: i64,
    ) -> Result<Vec<Gap>, MarketDataError> {
        let present = self
            .query_range(symbol, interval, Some(start), Some(end), None)
            .await?;
        let open_times: Vec<i64> = present.iter().map(|c| c.open_time).collect();
        Ok(find_gaps(&open_times, start, end, interval))
    }
}
