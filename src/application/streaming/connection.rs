use crate::domain::events::StreamEvent;
use crate::domain::market::candle::StreamKey;
use crate::domain::ports::MarketStreamConnector;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A connection event tagged with the stream and connection generation it
/// came from.
#[derive(Debug, Clone)]
pub struct StreamEnvelope {
    pub key: StreamKey,
    pub generation: u64,
    pub event: StreamEvent,
}

/// Runs one upstream connection attempt to completion.
///
/// Waits `delay`, connects, reports `ConnectionOpened`, forwards every event
/// and always finishes with exactly one `ConnectionClosed`. Aborting the
/// task drops the upstream stream and closes the socket.
pub fn spawn_connection(
    connector: Arc<dyn MarketStreamConnector>,
    key: StreamKey,
    generation: u64,
    delay: Duration,
    events_tx: Sender<StreamEnvelope>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let envelope = |event| StreamEnvelope {
            key: key.clone(),
            generation,
            event,
        };

        let mut stream = match connector.connect(&key).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Connection {}#{}: connect failed: {}", key, generation, e);
                let _ = events_tx
                    .send(envelope(StreamEvent::ConnectionClosed {
                        reason: e.to_string(),
                    }))
                    .await;
                return;
            }
        };

        if events_tx
            .send(envelope(StreamEvent::ConnectionOpened))
            .await
            .is_err()
        {
            return;
        }

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::ConnectionOpened => continue,
                StreamEvent::ConnectionClosed { .. } => {
                    let _ = events_tx.send(envelope(event)).await;
                    return;
                }
                other => {
                    if events_tx.send(envelope(other)).await.is_err() {
                        debug!("Connection {}#{}: dispatcher gone, stopping", key, generation);
                        return;
                    }
                }
            }
        }

        let _ = events_tx
            .send(envelope(StreamEvent::ConnectionClosed {
                reason: "upstream stream ended".to_string(),
            }))
            .await;
    })
}
