use crate::domain::market::candle::{Candle, Trade};
use serde::{Deserialize, Serialize};

/// What one upstream connection reports to the subscription manager.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    KlineClosed(Candle),
    Trade(Trade),
    ConnectionOpened,
    ConnectionClosed { reason: String },
    Error(String),
}

impl StreamEvent {
    /// Closed bars and trades; everything else is connection bookkeeping.
    pub fn is_data(&self) -> bool {
        matches!(self, Self::KlineClosed(_) | Self::Trade(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// Server-to-consumer push messages, `{"event": .., "data": ..}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ConsumerEvent {
    Candlestick(Candle),
    Trade(Trade),
    HistoricalData(Vec<Candle>),
    RecentTrades(Vec<Trade>),
    Pong,
    Error(ErrorPayload),
}

impl ConsumerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Label used for the broadcast counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Candlestick(_) => "candlestick",
            Self::Trade(_) => "trade",
            Self::HistoricalData(_) => "historical_data",
            Self::RecentTrades(_) => "recent_trades",
            Self::Pong => "pong",
            Self::Error(_) => "error",
        }
    }
}
