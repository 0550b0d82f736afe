//! WebSocket handler for real-time event streaming
//!
//! Subscribers connect to `/ws` and receive every event on the topics they
//! follow. A client that never sends a subscription gets the `emotion`
//! channel, so a bare socket behaves like a plain broadcast listener.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::events::SystemEvent;
use crate::state::AppState;

/// Topic every new connection starts on
pub const DEFAULT_TOPIC: &str = "emotion";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Client-to-server message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum ClientMessage {
    /// Replace the topic list
    #[serde(rename = "subscribe")]
    Subscribe { topics: Vec<String> },

    #[serde(rename = "unsubscribe")]
    Unsubscribe { topics: Vec<String> },

    /// Keep-alive
    #[serde(rename = "ping")]
    Ping,
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut event_rx = state.events.subscribe();
    let mut shutdown_rx = state.shutdown_signal();
    let mut subscribed_topics: Vec<String> = vec![DEFAULT_TOPIC.to_string()];

    info!(
        subscribers = state.events.subscriber_count(),
        "WebSocket client connected"
    );

    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &mut subscribed_topics) {
                            warn!("Failed to handle client message: {}", e);
                        }
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // axum answers pings itself
                        debug!("Received ping from client");
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if should_send_event(&event, &subscribed_topics) {
                            if let Ok(json) = serialize_event(&event) {
                                if sender.send(Message::Text(json)).await.is_err() {
                                    warn!("Failed to send event to client, disconnecting");
                                    break;
                                }
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} events", n);
                        let error_event = SystemEvent::Error {
                            message: format!("Lagged by {} events", n),
                        };
                        if let Ok(json) = serialize_event(&error_event) {
                            let _ = sender.send(Message::Text(json)).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Event bus closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    warn!("Failed to send ping, disconnecting");
                    break;
                }
            }

            _ = shutdown_rx.recv() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    debug!("WebSocket handler exiting");
}

fn handle_client_message(text: &str, topics: &mut Vec<String>) -> serde_json::Result<()> {
    let msg: ClientMessage = serde_json::from_str(text)?;

    match msg {
        ClientMessage::Subscribe { topics: new_topics } => {
            info!("Client subscribed to topics: {:?}", new_topics);
            *topics = new_topics;
        }
        ClientMessage::Unsubscribe {
            topics: remove_topics,
        } => {
            topics.retain(|t| !remove_topics.contains(t));
            info!("Client unsubscribed from topics: {:?}", remove_topics);
        }
        ClientMessage::Ping => {
            debug!("Received ping from client");
        }
    }

    Ok(())
}

/// Check if an event should be sent based on subscribed topics
fn should_send_event(event: &SystemEvent, topics: &[String]) -> bool {
    // Lag notices go to everyone regardless of topics
    if matches!(event, SystemEvent::Error { .. }) {
        return true;
    }

    topics.iter().any(|topic| event.matches_topic(topic))
}

fn serialize_event(event: &SystemEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}
