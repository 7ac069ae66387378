use crate::domain::errors::MarketDataError;
use crate::domain::events::StreamEvent;
use crate::domain::market::candle::{Candle, StreamKey, Trade};
use crate::domain::ports::MarketStreamConnector;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Opens one raw Binance stream per key at `{ws_url}/ws/{stream}`.
///
/// Pings from the exchange are answered by tungstenite while the stream is
/// being polled, so the connection needs no separate writer task.
pub struct BinanceStreamConnector {
    ws_url: String,
}

impl BinanceStreamConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, key: &StreamKey) -> String {
        format!("{}/ws/{}", self.ws_url, key)
    }
}

#[async_trait]
impl MarketStreamConnector for BinanceStreamConnector {
    async fn connect(
        &self,
        key: &StreamKey,
    ) -> Result<BoxStream<'static, StreamEvent>, MarketDataError> {
        let url = self.stream_url(key);
        info!("Connecting to Binance WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| MarketDataError::upstream(None, format!("websocket connect failed: {}", e)))?;

        info!("Binance WebSocket connected: {}", key);

        let key = key.clone();
        let events = ws_stream.filter_map(move |msg| {
            let event = match msg {
                Ok(Message::Text(text)) => decode_frame(&text, &key),
                Ok(Message::Close(frame)) => {
                    let reason = match frame {
                        Some(cf) => format!("closed by server: {} {}", u16::from(cf.code), cf.reason),
                        None => "closed by server".to_string(),
                    };
                    info!("Binance WebSocket {}: {}", key, reason);
                    Some(StreamEvent::ConnectionClosed { reason })
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
                Ok(_) => None,
                Err(e) => {
                    warn!("Binance WebSocket {} read error: {}", key, e);
                    Some(StreamEvent::ConnectionClosed {
                        reason: e.to_string(),
                    })
                }
            };
            futures_util::future::ready(event)
        });

        Ok(events.boxed())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum BinanceFrame {
    #[serde(rename = "kline")]
    Kline {
        #[serde(rename = "k")]
        kline: KlinePayload,
    },
    #[serde(rename = "trade")]
    Trade(TradePayload),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "n")]
    trade_count: u64,
    #[serde(rename = "x")]
    is_closed: bool,
    #[serde(rename = "q")]
    quote_volume: Decimal,
    #[serde(rename = "V")]
    taker_buy_base_volume: Decimal,
    #[serde(rename = "Q")]
    taker_buy_quote_volume: Decimal,
}

#[derive(Debug, Deserialize)]
struct TradePayload {
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "T")]
    trade_time: i64,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

/// Decodes one text frame of the stream identified by `key`.
///
/// Only closed klines and trades produce events; in-progress kline updates,
/// subscription acknowledgements and unknown frames yield `None`. Symbol and
/// interval come from `key` so events carry the canonical forms.
pub fn decode_frame(text: &str, key: &StreamKey) -> Option<StreamEvent> {
    let frame: BinanceFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Ignoring undecodable frame on {}: {}", key, e);
            return None;
        }
    };

    match (frame, key) {
        (BinanceFrame::Kline { kline }, StreamKey::Kline { symbol, interval }) => {
            if !kline.is_closed {
                return None;
            }
            Some(StreamEvent::KlineClosed(Candle {
                symbol: symbol.clone(),
                interval: *interval,
                open_time: kline.open_time,
                open: kline.open,
                high: kline.high,
                low: kline.low,
                close: kline.close,
                volume: kline.volume,
                close_time: kline.close_time,
                quote_volume: kline.quote_volume,
                trade_count: kline.trade_count,
                taker_buy_base_volume: kline.taker_buy_base_volume,
                taker_buy_quote_volume: kline.taker_buy_quote_volume,
            }))
        }
        (BinanceFrame::Trade(trade), StreamKey::Trade { symbol }) => Some(StreamEvent::Trade(Trade {
            symbol: symbol.clone(),
            price: trade.price,
            amount: trade.quantity,
            time: trade.trade_time,
            is_buyer_maker: trade.is_buyer_maker,
        })),
        (BinanceFrame::Other, _) => None,
        (_, key) => {
            warn!("Frame kind does not match stream {}", key);
            None
        }
    }
}
