use crate::domain::errors::MarketDataError;
use crate::domain::events::StreamEvent;
use crate::domain::market::candle::{Candle, StreamKey};
use crate::domain::market::interval::KlineInterval;
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Exact tuple a historical fetch is keyed by, both upstream and in the
/// response cache. `symbol` is in canonical `BASE/QUOTE` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KlineRequest {
    pub symbol: String,
    pub interval: KlineInterval,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub limit: Option<u32>,
}

impl KlineRequest {
    pub fn latest(symbol: impl Into<String>, interval: KlineInterval, limit: u32) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            start: None,
            end: None,
            limit: Some(limit),
        }
    }

    pub fn range(
        symbol: impl Into<String>,
        interval: KlineInterval,
        start: i64,
        end: i64,
        limit: Option<u32>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            start: Some(start),
            end: Some(end),
            limit,
        }
    }
}

/// Upstream REST source of historical candles.
///
/// `end` is inclusive on the wire. Fewer rows than requested near the data
/// horizon is not an error.
#[async_trait]
pub trait HistoricalKlineSource: Send + Sync {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, MarketDataError>;
}

/// Opens one upstream streaming connection.
///
/// The returned stream yields decoded events until the connection ends; it
/// terminates after a `ConnectionClosed` or when the socket drops. Dropping
/// the stream closes the connection.
#[async_trait]
pub trait MarketStreamConnector: Send + Sync {
    async fn connect(
        &self,
        key: &StreamKey,
    ) -> Result<BoxStream<'static, StreamEvent>, MarketDataError>;
}
