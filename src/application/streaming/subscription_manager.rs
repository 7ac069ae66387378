//! Reference-counted pool of upstream stream connections.
//!
//! One connection per [`StreamKey`], opened on the first subscriber and
//! aborted when the last one leaves. Abnormal closes are retried with a
//! linear backoff (`base_delay * attempt`) up to a fixed attempt count, after
//! which the stream is dropped and marked exhausted.
//!
//! The manager is plain state: it is owned and driven by a single task (the
//! stream dispatcher), so no locking is involved. Connection tasks report
//! back through the envelope channel returned by [`SubscriptionManager::new`].

use crate::application::streaming::connection::{StreamEnvelope, spawn_connection};
use crate::domain::errors::MarketDataError;
use crate::domain::events::StreamEvent;
use crate::domain::market::candle::StreamKey;
use crate::domain::ports::MarketStreamConnector;
use crate::infrastructure::observability::Metrics;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ENVELOPE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_millis(3000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Connecting,
    Connected,
    Reconnecting,
}

/// Runtime state of one shared upstream stream.
#[derive(Debug)]
pub struct MarketStream {
    pub key: StreamKey,
    pub state: StreamState,
    pub subscribers: usize,
    pub reconnect_attempts: u32,
    generation: u64,
    connection: Option<JoinHandle<()>>,
}

/// What the dispatcher should do with a processed envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// A closed candle or trade to broadcast
    Data(StreamEvent),
    /// The stream gave up reconnecting and was removed
    Exhausted,
    /// Bookkeeping only, or a stale connection generation
    Ignored,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub stream: String,
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    pub state: StreamState,
    pub subscribers: usize,
    pub reconnect_attempts: u32,
}

pub struct SubscriptionManager {
    connector: Arc<dyn MarketStreamConnector>,
    config: SubscriptionConfig,
    streams: HashMap<StreamKey, MarketStream>,
    exhausted: HashSet<StreamKey>,
    next_generation: u64,
    events_tx: Sender<StreamEnvelope>,
    metrics: Metrics,
}

impl SubscriptionManager {
    pub fn new(
        connector: Arc<dyn MarketStreamConnector>,
        config: SubscriptionConfig,
        metrics: Metrics,
    ) -> (Self, Receiver<StreamEnvelope>) {
        let (events_tx, events_rx) = mpsc::channel(ENVELOPE_CHANNEL_CAPACITY);
        let manager = Self {
            connector,
            config,
            streams: HashMap::new(),
            exhausted: HashSet::new(),
            next_generation: 0,
            events_tx,
            metrics,
        };
        (manager, events_rx)
    }

    /// Attaches one subscriber and returns the new count.
    pub fn subscribe(&mut self, key: StreamKey) -> usize {
        if let Some(stream) = self.streams.get_mut(&key) {
            stream.subscribers += 1;
            debug!("SubscriptionManager: {} now has {} subscribers", key, stream.subscribers);
            return stream.subscribers;
        }

        self.exhausted.remove(&key);
        let generation = self.bump_generation();
        let connection = spawn_connection(
            self.connector.clone(),
            key.clone(),
            generation,
            Duration::ZERO,
            self.events_tx.clone(),
        );
        info!("SubscriptionManager: opening upstream stream {}", key);

        self.streams.insert(
            key.clone(),
            MarketStream {
                key,
                state: StreamState::Connecting,
                subscribers: 1,
                reconnect_attempts: 0,
                generation,
                connection: Some(connection),
            },
        );
        self.refresh_gauge();
        1
    }

    /// Detaches one subscriber and returns the remaining count. The upstream
    /// connection is aborted when the count reaches zero.
    pub fn unsubscribe(&mut self, key: &StreamKey) -> usize {
        let Some(stream) = self.streams.get_mut(key) else {
            return 0;
        };

        stream.subscribers = stream.subscribers.saturating_sub(1);
        if stream.subscribers > 0 {
            return stream.subscribers;
        }

        if let Some(stream) = self.streams.remove(key) {
            if let Some(connection) = stream.connection {
                connection.abort();
            }
            info!("SubscriptionManager: closed upstream stream {} (no subscribers)", key);
        }
        self.refresh_gauge();
        0
    }

    /// Applies one connection event to the state machine.
    pub fn handle_event(&mut self, envelope: StreamEnvelope) -> StreamOutcome {
        let StreamEnvelope {
            key,
            generation,
            event,
        } = envelope;

        let Some(stream) = self.streams.get_mut(&key) else {
            return StreamOutcome::Ignored;
        };
        if stream.generation != generation {
            debug!(
                "SubscriptionManager: dropping event from stale connection {}#{}",
                key, generation
            );
            return StreamOutcome::Ignored;
        }

        match event {
            StreamEvent::ConnectionOpened => {
                stream.state = StreamState::Connected;
                info!("SubscriptionManager: {} connected", key);
                StreamOutcome::Ignored
            }
            StreamEvent::KlineClosed(_) | StreamEvent::Trade(_) => {
                stream.state = StreamState::Connected;
                stream.reconnect_attempts = 0;
                StreamOutcome::Data(event)
            }
            StreamEvent::Error(message) => {
                warn!("SubscriptionManager: {} reported: {}", key, message);
                StreamOutcome::Ignored
            }
            StreamEvent::ConnectionClosed { reason } => {
                if let Some(connection) = stream.connection.take() {
                    connection.abort();
                }
                stream.reconnect_attempts += 1;
                let attempt = stream.reconnect_attempts;

                if attempt > self.config.max_reconnect_attempts {
                    let err = MarketDataError::StreamReconnectExhausted {
                        stream: key.to_string(),
                        attempts: self.config.max_reconnect_attempts,
                    };
                    error!("SubscriptionManager: {} (last close: {})", err, reason);
                    self.streams.remove(&key);
                    self.metrics.inc_exhausted(key.kind());
                    self.exhausted.insert(key);
                    self.refresh_gauge();
                    return StreamOutcome::Exhausted;
                }

                let delay = self.config.reconnect_base_delay * attempt;
                warn!(
                    "SubscriptionManager: {} closed ({}), reconnect {}/{} in {:?}",
                    key, reason, attempt, self.config.max_reconnect_attempts, delay
                );

                let generation = self.bump_generation();
                let connection = spawn_connection(
                    self.connector.clone(),
                    key.clone(),
                    generation,
                    delay,
                    self.events_tx.clone(),
                );
                if let Some(stream) = self.streams.get_mut(&key) {
                    stream.state = StreamState::Reconnecting;
                    stream.generation = generation;
                    stream.connection = Some(connection);
                }
                self.metrics.inc_reconnects(key.kind());
                StreamOutcome::Ignored
            }
        }
    }

    pub fn subscriber_count(&self, key: &StreamKey) -> usize {
        self.streams.get(key).map(|s| s.subscribers).unwrap_or(0)
    }

    pub fn state(&self, key: &StreamKey) -> Option<StreamState> {
        self.streams.get(key).map(|s| s.state)
    }

    pub fn is_exhausted(&self, key: &StreamKey) -> bool {
        self.exhausted.contains(key)
    }

    pub fn active_count(&self) -> usize {
        self.streams.len()
    }

    pub fn statuses(&self) -> Vec<StreamStatus> {
        let mut statuses: Vec<StreamStatus> = self
            .streams
            .values()
            .map(|s| StreamStatus {
                stream: s.key.to_string(),
                symbol: s.key.symbol().to_string(),
                interval: s.key.interval().map(|i| i.canonical_name().to_string()),
                state: s.state,
                subscribers: s.subscribers,
                reconnect_attempts: s.reconnect_attempts,
            })
            .collect();
        statuses.sort_by(|a, b| a.stream.cmp(&b.stream));
        statuses
    }

    pub fn exhausted_streams(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.exhausted.iter().map(|k| k.to_string()).collect();
        keys.sort();
        keys
    }

    /// Aborts every connection and forgets all streams.
    pub fn shutdown(&mut self) {
        for (key, stream) in self.streams.drain() {
            if let Some(connection) = stream.connection {
                connection.abort();
            }
            debug!("SubscriptionManager: aborted {}", key);
        }
        self.refresh_gauge();
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn refresh_gauge(&self) {
        self.metrics.active_streams.set(self.streams.len() as f64);
    }
}
