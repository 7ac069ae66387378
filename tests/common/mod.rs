#![allow(dead_code)]

use async_trait::async_trait;
use chartfeed::domain::errors::MarketDataError;
use chartfeed::domain::events::StreamEvent;
use chartfeed::domain::market::candle::{Candle, StreamKey};
use chartfeed::domain::market::interval::KlineInterval;
use chartfeed::domain::ports::{HistoricalKlineSource, KlineRequest, MarketStreamConnector};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};

pub const MIN: i64 = 60_000;
/// A minute boundary in November 2023, far enough in the past that every
/// generated candle is closed.
pub const T0: i64 = 1_700_000_040_000;

/// Deterministic candle for `open_time`; the close encodes the slot index.
pub fn synthetic_candle(symbol: &str, interval: KlineInterval, open_time: i64) -> Candle {
    let step = interval.duration_ms();
    let price = Decimal::from(100 + (open_time / step) % 1000);
    Candle {
        symbol: symbol.to_string(),
        interval,
        open_time,
        open: price,
        high: price + Decimal::ONE,
        low: price - Decimal::ONE,
        close: price,
        volume: Decimal::from(10),
        close_time: open_time + step - 1,
        quote_volume: price * Decimal::from(10),
        trade_count: 5,
        taker_buy_base_volume: Decimal::from(4),
        taker_buy_quote_volume: price * Decimal::from(4),
    }
}

/// Upstream double that serves a gap-free series up to `horizon` and
/// records every request it receives.
pub struct ScriptedKlineSource {
    horizon: i64,
    page_limit: u32,
    failing: AtomicBool,
    requests: Mutex<Vec<KlineRequest>>,
}

impl ScriptedKlineSource {
    pub fn new(horizon: i64) -> Self {
        Self {
            horizon,
            page_limit: 1000,
            failing: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<KlineRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HistoricalKlineSource for ScriptedKlineSource {
    async fn fetch_klines(&self, request: &KlineRequest) -> Result<Vec<Candle>, MarketDataError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(MarketDataError::upstream(Some(503), "scripted outage"));
        }

        let step = request.interval.duration_ms();
        let limit = request.limit.unwrap_or(500).min(self.page_limit) as i64;
        let last = request.end.unwrap_or(self.horizon).min(self.horizon);

        let open_times: Vec<i64> = match request.start {
            Some(start) => {
                let first = (start + step - 1).div_euclid(step) * step;
                (0..limit)
                    .map(|i| first + i * step)
                    .take_while(|t| *t <= last)
                    .collect()
            }
            None => {
                let newest = last.div_euclid(step) * step;
                let mut times: Vec<i64> = (0..limit).map(|i| newest - i * step).collect();
                times.reverse();
                times
            }
        };

        Ok(open_times
            .into_iter()
            .map(|t| synthetic_candle(&request.symbol, request.interval, t))
            .collect())
    }
}

/// Stream double: every `connect` hands out a channel-backed stream that the
/// test drives with [`ScriptedConnector::emit`] and [`ScriptedConnector::drop_connection`].
#[derive(Default)]
pub struct ScriptedConnector {
    refuse: AtomicBool,
    connections: Mutex<HashMap<StreamKey, Vec<UnboundedSender<StreamEvent>>>>,
    connect_calls: Mutex<HashMap<StreamKey, usize>>,
}

impl ScriptedConnector {
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn connect_calls(&self, key: &StreamKey) -> usize {
        self.connect_calls.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    /// Connections whose stream is still held by a connection task.
    pub fn live_connections(&self, key: &StreamKey) -> usize {
        self.connections
            .lock()
            .unwrap()
            .get(key)
            .map(|txs| txs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Pushes `event` into the newest live connection for `key`.
    pub fn emit(&self, key: &StreamKey, event: StreamEvent) -> bool {
        let connections = self.connections.lock().unwrap();
        connections
            .get(key)
            .and_then(|txs| txs.iter().rev().find(|tx| !tx.is_closed()))
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }

    /// Ends every open stream for `key`, as if the exchange hung up.
    pub fn drop_connection(&self, key: &StreamKey) {
        if let Some(txs) = self.connections.lock().unwrap().get_mut(key) {
            txs.clear();
        }
    }
}

#[async_trait]
impl MarketStreamConnector for ScriptedConnector {
    async fn connect(
        &self,
        key: &StreamKey,
    ) -> Result<BoxStream<'static, StreamEvent>, MarketDataError> {
        *self
            .connect_calls
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default() += 1;

        if self.refuse.load(Ordering::SeqCst) {
            return Err(MarketDataError::upstream(None, "connection refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.connections
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(tx);

        Ok(stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) }).boxed())
    }
}

/// Lets spawned tasks run until the runtime is idle.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}
