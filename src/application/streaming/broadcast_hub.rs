use crate::domain::events::{ConsumerEvent, StreamEvent};
use crate::domain::market::candle::{Candle, StreamKey, Trade};
use crate::infrastructure::observability::Metrics;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

struct Consumer {
    tx: Sender<ConsumerEvent>,
    /// Held subscriptions; repeated subscribes to one key stack up
    subscriptions: HashMap<StreamKey, usize>,
}

/// Result of one fan-out pass.
#[derive(Debug, Default)]
pub struct PublishOutcome {
    pub delivered: usize,
    /// Consumers found closed and deregistered, with the subscriptions they held
    pub disconnected: Vec<(Uuid, Vec<(StreamKey, usize)>)>,
}

/// Fan-out of decoded market events to registered consumers, plus a bounded
/// rolling history per stream for late joiners.
pub struct BroadcastHub {
    consumers: HashMap<Uuid, Consumer>,
    candles: HashMap<StreamKey, VecDeque<Candle>>,
    trades: HashMap<StreamKey, VecDeque<Trade>>,
    candle_capacity: usize,
    trade_capacity: usize,
    metrics: Metrics,
}

impl BroadcastHub {
    pub fn new(candle_capacity: usize, trade_capacity: usize, metrics: Metrics) -> Self {
        Self {
            consumers: HashMap::new(),
            candles: HashMap::new(),
            trades: HashMap::new(),
            candle_capacity,
            trade_capacity,
            metrics,
        }
    }

    /// Returns `false` when the id is already registered.
    pub fn register(&mut self, id: Uuid, tx: Sender<ConsumerEvent>) -> bool {
        if self.consumers.contains_key(&id) {
            return false;
        }
        self.consumers.insert(
            id,
            Consumer {
                tx,
                subscriptions: HashMap::new(),
            },
        );
        self.refresh_gauge();
        true
    }

    /// Removes the consumer and hands back every subscription it still held.
    /// Unknown ids yield nothing.
    pub fn deregister(&mut self, id: &Uuid) -> Vec<(StreamKey, usize)> {
        let held = self
            .consumers
            .remove(id)
            .map(|c| c.subscriptions.into_iter().collect())
            .unwrap_or_default();
        self.refresh_gauge();
        held
    }

    pub fn is_registered(&self, id: &Uuid) -> bool {
        self.consumers.contains_key(id)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn add_subscription(&mut self, id: &Uuid, key: StreamKey) -> bool {
        match self.consumers.get_mut(id) {
            Some(consumer) => {
                *consumer.subscriptions.entry(key).or_insert(0) += 1;
                true
            }
            None => false,
        }
    }

    /// Releases one held subscription. Returns `false` if the consumer did
    /// not hold `key`.
    pub fn remove_subscription(&mut self, id: &Uuid, key: &StreamKey) -> bool {
        let Some(consumer) = self.consumers.get_mut(id) else {
            return false;
        };
        match consumer.subscriptions.get(key).copied().unwrap_or(0) {
            0 => false,
            1 => {
                consumer.subscriptions.remove(key);
                true
            }
            n => {
                consumer.subscriptions.insert(key.clone(), n - 1);
                true
            }
        }
    }

    /// Drops history and every consumer's hold on `key`.
    pub fn forget_stream(&mut self, key: &StreamKey) {
        self.candles.remove(key);
        self.trades.remove(key);
        for consumer in self.consumers.values_mut() {
            consumer.subscriptions.remove(key);
        }
    }

    /// Drops only the rolling history of `key`.
    pub fn clear_history(&mut self, key: &StreamKey) {
        self.candles.remove(key);
        self.trades.remove(key);
    }

    /// Rolling history for a newly subscribed consumer.
    pub fn recent(&self, key: &StreamKey) -> ConsumerEvent {
        match key {
            StreamKey::Kline { .. } => ConsumerEvent::HistoricalData(
                self.candles
                    .get(key)
                    .map(|ring| ring.iter().cloned().collect())
                    .unwrap_or_default(),
            ),
            StreamKey::Trade { .. } => ConsumerEvent::RecentTrades(
                self.trades
                    .get(key)
                    .map(|ring| ring.iter().cloned().collect())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Delivers to a single consumer. Returns `false` if it is gone.
    pub fn send_to(&self, id: &Uuid, event: ConsumerEvent) -> bool {
        let Some(consumer) = self.consumers.get(id) else {
            return false;
        };
        match consumer.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("BroadcastHub: consumer {} lagging, dropped {}", id, event.kind());
                self.metrics.inc_dropped(event.kind());
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Records a market event in the stream history and pushes it to every
    /// consumer subscribed to `key`.
    pub fn publish(&mut self, key: &StreamKey, event: StreamEvent) -> PublishOutcome {
        let outbound = match event {
            StreamEvent::KlineClosed(candle) => {
                let ring = self.candles.entry(key.clone()).or_default();
                push_candle(ring, candle.clone(), self.candle_capacity);
                ConsumerEvent::Candlestick(candle)
            }
            StreamEvent::Trade(trade) => {
                let ring = self.trades.entry(key.clone()).or_default();
                ring.push_back(trade.clone());
                while ring.len() > self.trade_capacity {
                    ring.pop_front();
                }
                ConsumerEvent::Trade(trade)
            }
            _ => return PublishOutcome::default(),
        };

        let mut outcome = PublishOutcome::default();
        let mut closed = Vec::new();
        let kind = outbound.kind();

        for (id, consumer) in &self.consumers {
            if !consumer.subscriptions.contains_key(key) {
                continue;
            }
            match consumer.tx.try_send(outbound.clone()) {
                Ok(()) => {
                    outcome.delivered += 1;
                    self.metrics.inc_broadcast(kind);
                }
                Err(TrySendError::Full(_)) => {
                    warn!("BroadcastHub: consumer {} lagging, dropped {} for {}", id, kind, key);
                    self.metrics.inc_dropped(kind);
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            debug!("BroadcastHub: consumer {} went away, deregistering", id);
            let held = self.deregister(&id);
            outcome.disconnected.push((id, held));
        }
        outcome
    }

    fn refresh_gauge(&self) {
        self.metrics
            .connected_consumers
            .set(self.consumers.len() as f64);
    }
}

/// Appends a closed candle, replacing the tail when it shares its open time.
fn push_candle(ring: &mut VecDeque<Candle>, candle: Candle, capacity: usize) {
    match ring.back().map(|c| c.open_time) {
        Some(last) if last == candle.open_time => {
            if let Some(tail) = ring.back_mut() {
                *tail = candle;
            }
        }
        Some(last) if last > candle.open_time => {
            debug!(
                "BroadcastHub: out-of-order candle {} after {}, not buffered",
                candle.open_time, last
            );
        }
        _ => ring.push_back(candle),
    }
    while ring.len() > capacity {
        ring.pop_front();
    }
}
