use crate::application::streaming::broadcast_hub::BroadcastHub;
use crate::application::streaming::connection::StreamEnvelope;
use crate::application::streaming::subscription_manager::{
    StreamOutcome, StreamStatus, SubscriptionConfig, SubscriptionManager,
};
use crate::domain::errors::MarketDataError;
use crate::domain::events::ConsumerEvent;
use crate::domain::market::candle::StreamKey;
use crate::domain::market::interval::KlineInterval;
use crate::domain::market::symbol::canonical_symbol;
use crate::domain::ports::MarketStreamConnector;
use crate::infrastructure::observability::Metrics;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMMAND_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub subscription: SubscriptionConfig,
    pub candle_history: usize,
    pub trade_history: usize,
    pub consumer_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            subscription: SubscriptionConfig::default(),
            candle_history: 100,
            trade_history: 30,
            consumer_buffer: 256,
        }
    }
}

#[derive(Debug)]
pub enum GatewayCommand {
    Register {
        consumer: Uuid,
        tx: Sender<ConsumerEvent>,
    },
    Subscribe {
        consumer: Uuid,
        key: StreamKey,
    },
    Unsubscribe {
        consumer: Uuid,
        key: StreamKey,
    },
    Deregister {
        consumer: Uuid,
    },
    Snapshot(oneshot::Sender<StreamsSnapshot>),
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamsSnapshot {
    pub streams: Vec<StreamStatus>,
    pub exhausted: Vec<String>,
    pub consumers: usize,
}

impl StreamsSnapshot {
    pub fn subscribers(&self, stream: &str) -> usize {
        self.streams
            .iter()
            .find(|s| s.stream == stream)
            .map(|s| s.subscribers)
            .unwrap_or(0)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Rejected(#[from] MarketDataError),

    #[error("stream dispatcher is not running")]
    Stopped,
}

/// Single task owning all subscription and fan-out state.
///
/// Gateway commands and upstream connection events are both serialized
/// through this task, so the stream map and refcounts are never touched
/// concurrently.
pub struct StreamDispatcher {
    manager: SubscriptionManager,
    hub: BroadcastHub,
    cmd_rx: Receiver<GatewayCommand>,
    events_rx: Receiver<StreamEnvelope>,
}

impl StreamDispatcher {
    pub fn new(
        connector: Arc<dyn MarketStreamConnector>,
        config: DispatcherConfig,
        metrics: Metrics,
    ) -> (Self, StreamHandle) {
        let (manager, events_rx) =
            SubscriptionManager::new(connector, config.subscription.clone(), metrics.clone());
        let hub = BroadcastHub::new(config.candle_history, config.trade_history, metrics);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let dispatcher = Self {
            manager,
            hub,
            cmd_rx,
            events_rx,
        };
        let handle = StreamHandle {
            cmd_tx,
            consumer_buffer: config.consumer_buffer.max(1),
        };
        (dispatcher, handle)
    }

    pub async fn run(mut self) {
        info!("StreamDispatcher: started");
        loop {
            tokio::select! {
                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(GatewayCommand::Shutdown) => {
                            info!("StreamDispatcher: received Shutdown command");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            info!("StreamDispatcher: all handles dropped");
                            break;
                        }
                    }
                }
                Some(envelope) = self.events_rx.recv() => {
                    self.handle_envelope(envelope);
                }
            }
        }
        self.manager.shutdown();
        info!("StreamDispatcher: stopped");
    }

    fn handle_command(&mut self, cmd: GatewayCommand) {
        match cmd {
            GatewayCommand::Register { consumer, tx } => {
                if self.hub.register(consumer, tx) {
                    debug!("StreamDispatcher: consumer {} registered", consumer);
                }
            }
            GatewayCommand::Subscribe { consumer, key } => {
                if !self.hub.add_subscription(&consumer, key.clone()) {
                    warn!("StreamDispatcher: subscribe from unknown consumer {}", consumer);
                    return;
                }
                let count = self.manager.subscribe(key.clone());
                debug!("StreamDispatcher: {} subscribed to {} ({} total)", consumer, key, count);

                let recent = self.hub.recent(&key);
                if !self.hub.send_to(&consumer, recent) {
                    self.release_consumer(&consumer);
                }
            }
            GatewayCommand::Unsubscribe { consumer, key } => {
                if self.hub.remove_subscription(&consumer, &key) {
                    self.release_key(&key);
                } else {
                    debug!("StreamDispatcher: {} does not hold {}, ignoring", consumer, key);
                }
            }
            GatewayCommand::Deregister { consumer } => {
                self.release_consumer(&consumer);
            }
            GatewayCommand::Snapshot(reply) => {
                let _ = reply.send(StreamsSnapshot {
                    streams: self.manager.statuses(),
                    exhausted: self.manager.exhausted_streams(),
                    consumers: self.hub.consumer_count(),
                });
            }
            GatewayCommand::Shutdown => {}
        }
    }

    fn handle_envelope(&mut self, envelope: StreamEnvelope) {
        let key = envelope.key.clone();
        match self.manager.handle_event(envelope) {
            StreamOutcome::Data(event) => {
                let outcome = self.hub.publish(&key, event);
                for (_, held) in outcome.disconnected {
                    self.release_holds(held);
                }
            }
            StreamOutcome::Exhausted => self.hub.forget_stream(&key),
            StreamOutcome::Ignored => {}
        }
    }

    fn release_consumer(&mut self, consumer: &Uuid) {
        let held = self.hub.deregister(consumer);
        debug!(
            "StreamDispatcher: consumer {} left holding {} subscription(s)",
            consumer,
            held.len()
        );
        self.release_holds(held);
    }

    fn release_holds(&mut self, held: Vec<(StreamKey, usize)>) {
        for (key, count) in held {
            for _ in 0..count {
                self.release_key(&key);
            }
        }
    }

    fn release_key(&mut self, key: &StreamKey) {
        if self.manager.unsubscribe(key) == 0 {
            self.hub.clear_history(key);
        }
    }
}

/// Cloneable entry point to the dispatcher for downstream sessions.
#[derive(Clone)]
pub struct StreamHandle {
    cmd_tx: Sender<GatewayCommand>,
    consumer_buffer: usize,
}

impl StreamHandle {
    /// Registers a new consumer and returns its id and event queue.
    pub async fn connect_consumer(
        &self,
    ) -> Result<(Uuid, Receiver<ConsumerEvent>), GatewayError> {
        let consumer = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.consumer_buffer);
        self.send(GatewayCommand::Register { consumer, tx }).await?;
        Ok((consumer, rx))
    }

    pub async fn subscribe_market(
        &self,
        consumer: Uuid,
        symbol: &str,
        interval: KlineInterval,
    ) -> Result<(), GatewayError> {
        let key = StreamKey::kline(canonical_symbol(symbol)?, interval);
        self.send(GatewayCommand::Subscribe { consumer, key }).await
    }

    pub async fn unsubscribe_market(
        &self,
        consumer: Uuid,
        symbol: &str,
        interval: KlineInterval,
    ) -> Result<(), GatewayError> {
        let key = StreamKey::kline(canonical_symbol(symbol)?, interval);
        self.send(GatewayCommand::Unsubscribe { consumer, key }).await
    }

    pub async fn subscribe_trades(&self, consumer: Uuid, symbol: &str) -> Result<(), GatewayError> {
        let key = StreamKey::trade(canonical_symbol(symbol)?);
        self.send(GatewayCommand::Subscribe { consumer, key }).await
    }

    pub async fn unsubscribe_trades(
        &self,
        consumer: Uuid,
        symbol: &str,
    ) -> Result<(), GatewayError> {
        let key = StreamKey::trade(canonical_symbol(symbol)?);
        self.send(GatewayCommand::Unsubscribe { consumer, key }).await
    }

    /// Releases everything the consumer still holds.
    pub async fn disconnect(&self, consumer: Uuid) {
        if self
            .send(GatewayCommand::Deregister { consumer })
            .await
            .is_err()
        {
            debug!("StreamHandle: dispatcher gone while disconnecting {}", consumer);
        }
    }

    pub async fn snapshot(&self) -> Result<StreamsSnapshot, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.send(GatewayCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| GatewayError::Stopped)
    }

    pub async fn shutdown(&self) {
        let _ = self.send(GatewayCommand::Shutdown).await;
    }

    async fn send(&self, cmd: GatewayCommand) -> Result<(), GatewayError> {
        self.cmd_tx.send(cmd).await.map_err(|_| GatewayError::Stopped)
    }
}
