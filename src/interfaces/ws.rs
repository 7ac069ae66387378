//! Downstream WebSocket sessions.
//!
//! Each socket is one consumer of the stream dispatcher. Client commands
//! arrive as `{"type": ..}` JSON; events leave as `{"event": .., "data": ..}`.
//! Closing the socket releases every subscription the consumer still holds.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::streaming::GatewayError;
use crate::domain::events::ConsumerEvent;
use crate::interfaces::http::{AppState, parse_interval};

/// Client-to-server commands.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    SubscribeMarket {
        symbol: String,
        interval: Option<String>,
    },
    UnsubscribeMarket {
        symbol: String,
        interval: Option<String>,
    },
    SubscribeTrades {
        symbol: String,
    },
    UnsubscribeTrades {
        symbol: String,
    },
    Ping,
}

pub fn parse_command(text: &str) -> Result<ClientCommand, String> {
    serde_json::from_str(text).map_err(|e| format!("Invalid command: {}", e))
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (consumer, mut events) = match state.streams.connect_consumer().await {
        Ok(registered) => registered,
        Err(e) => {
            warn!("WebSocket rejected: {}", e);
            return;
        }
    };
    info!("WebSocket consumer {} connected", consumer);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                let Some(event) = maybe_event else {
                    debug!("Consumer {} queue closed", consumer);
                    break;
                };
                if send_event(&mut sender, &event).await.is_err() {
                    debug!("WebSocket send failed for {}, disconnecting", consumer);
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match handle_command(&state, consumer, &text).await {
                            Ok(reply) => reply,
                            Err(GatewayError::Stopped) => {
                                info!("Stream dispatcher stopped, closing consumer {}", consumer);
                                break;
                            }
                            Err(GatewayError::Rejected(e)) => Some(ConsumerEvent::error(e.to_string())),
                        };
                        if let Some(reply) = reply
                            && send_event(&mut sender, &reply).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket close from {}", consumer);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error for {}: {}", consumer, e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.streams.disconnect(consumer).await;
    info!("WebSocket consumer {} disconnected", consumer);
}

/// Applies one client command. Returns the direct reply, if any.
async fn handle_command(
    state: &AppState,
    consumer: Uuid,
    text: &str,
) -> Result<Option<ConsumerEvent>, GatewayError> {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(message) => return Ok(Some(ConsumerEvent::error(message))),
    };
    debug!("Consumer {} command: {:?}", consumer, command);

    match command {
        ClientCommand::SubscribeMarket { symbol, interval } => {
            let interval = parse_interval(interval.as_deref())?;
            state.streams.subscribe_market(consumer, &symbol, interval).await?;
        }
        ClientCommand::UnsubscribeMarket { symbol, interval } => {
            let interval = parse_interval(interval.as_deref())?;
            state.streams.unsubscribe_market(consumer, &symbol, interval).await?;
        }
        ClientCommand::SubscribeTrades { symbol } => {
            state.streams.subscribe_trades(consumer, &symbol).await?;
        }
        ClientCommand::UnsubscribeTrades { symbol } => {
            state.streams.unsubscribe_trades(consumer, &symbol).await?;
        }
        ClientCommand::Ping => return Ok(Some(ConsumerEvent::Pong)),
    }
    Ok(None)
}

async fn send_event<S>(sender: &mut S, event: &ConsumerEvent) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!("Failed to serialize {} event: {}", event.kind(), e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command(r#"{"type":"subscribe_market","symbol":"BTC/USDT","interval":"1m"}"#),
            Ok(ClientCommand::SubscribeMarket {
                symbol: "BTC/USDT".to_string(),
                interval: Some("1m".to_string()),
            })
        );
        assert_eq!(
            parse_command(r#"{"type":"unsubscribe_trades","symbol":"ethusdt"}"#),
            Ok(ClientCommand::UnsubscribeTrades {
                symbol: "ethusdt".to_string(),
            })
        );
        assert_eq!(parse_command(r#"{"type":"ping"}"#), Ok(ClientCommand::Ping));
    }

    #[test]
    fn test_interval_is_optional() {
        assert_eq!(
            parse_command(r#"{"type":"subscribe_market","symbol":"BTCUSDT"}"#),
            Ok(ClientCommand::SubscribeMarket {
                symbol: "BTCUSDT".to_string(),
                interval: None,
            })
        );
    }

    #[test]
    fn test_malformed_commands_are_rejected() {
        assert!(parse_command("not json").is_err());
        assert!(parse_command(r#"{"type":"launch_rockets"}"#).is_err());
        assert!(parse_command(r#"{"type":"subscribe_trades"}"#).is_err());
    }
}
