use crate::domain::market::interval::KlineInterval;
use crate::domain::market::symbol::stream_symbol;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One closed OHLCV bar. Identified by `(symbol, interval, open_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub symbol: String,
    pub interval: KlineInterval,
    /// Milliseconds since epoch
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
}

impl Candle {
    /// Identity within a single `(symbol, interval)` series.
    pub fn key(&self) -> (&str, KlineInterval, i64) {
        (&self.symbol, self.interval, self.open_time)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub symbol: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub time: i64,
    pub is_buyer_maker: bool,
}

/// Envelope returned by both downstream query operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineResponse {
    pub data: Vec<Candle>,
    pub count: usize,
    pub symbol: String,
    pub interval: KlineInterval,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl KlineResponse {
    pub fn new(
        data: Vec<Candle>,
        symbol: String,
        interval: KlineInterval,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Self {
        Self {
            count: data.len(),
            data,
            symbol,
            interval,
            start,
            end,
        }
    }
}

/// Identifies one shared upstream connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKey {
    Kline {
        symbol: String,
        interval: KlineInterval,
    },
    Trade {
        symbol: String,
    },
}

impl StreamKey {
    pub fn kline(symbol: impl Into<String>, interval: KlineInterval) -> Self {
        Self::Kline {
            symbol: symbol.into(),
            interval,
        }
    }

    pub fn trade(symbol: impl Into<String>) -> Self {
        Self::Trade {
            symbol: symbol.into(),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Kline { symbol, .. } | Self::Trade { symbol } => symbol,
        }
    }

    pub fn interval(&self) -> Option<KlineInterval> {
        match self {
            Self::Kline { interval, .. } => Some(*interval),
            Self::Trade { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kline { .. } => "kline",
            Self::Trade { .. } => "trade",
        }
    }
}

/// Upstream stream name, e.g. `btcusdt@kline_1m` or `btcusdt@trade`.
impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kline { symbol, interval } => {
                write!(f, "{}@kline_{}", stream_symbol(symbol), interval.to_wire_format())
            }
            Self::Trade { symbol } => write!(f, "{}@trade", stream_symbol(symbol)),
        }
    }
}
