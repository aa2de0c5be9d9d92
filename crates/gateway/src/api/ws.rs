//! WebSocket fan-out endpoint.
//!
//! Client → server: `subscribe`, `unsubscribe`, `ping`. Server → client:
//! hub events (`track.new`, `track.update`, `proposal.new`,
//! `decision.made`, `effect.executed`, `metrics.update`) and `pong`.
//! Delivery failures are silent drops; clients reconnect and re-subscribe.

use std::collections::HashSet;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::hub::Topic;
use crate::state::AppState;

/// Keepalive ping cadence; tuned under common layer-7 idle timeouts.
const KEEPALIVE: Duration = Duration::from_secs(25);

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    topics: Vec<String>,
}

/// `GET /ws` -- upgrade to the real-time fan-out channel.
pub async fn ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection(socket, state))
}

fn parse_topics(raw: &[String]) -> Vec<Topic> {
    raw.iter().filter_map(|t| Topic::parse(t)).collect()
}

async fn connection(socket: WebSocket, state: AppState) {
    let (mut sink, mut source) = socket.split();

    // No initial subscriptions means "all topics".
    let (client_id, mut events) = state.hub.register(HashSet::new()).await;
    debug!(client_id, "websocket connected");

    let mut keepalive = tokio::time::interval(KEEPALIVE);
    keepalive.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            // Hub → client. A closed hub channel ends the connection.
            event = events.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            // Client → server commands.
            incoming = source.next() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        let Ok(parsed) = serde_json::from_str::<ClientMessage>(text.as_str()) else {
                            continue;
                        };
                        match parsed.message_type.as_str() {
                            "subscribe" => {
                                state.hub.subscribe(client_id, parse_topics(&parsed.topics)).await;
                            }
                            "unsubscribe" => {
                                state.hub.unsubscribe(client_id, parse_topics(&parsed.topics)).await;
                            }
                            "ping" => {
                                let pong = serde_json::json!({"type": "pong"});
                                if sink.send(Message::Text(pong.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                            other => debug!(client_id, message_type = other, "unknown client message"),
                        }
                    }
                    Message::Close(_) => break,
                    // Binary frames and transport pongs are ignored.
                    _ => {}
                }
            }

            // Physical-layer keepalive.
            _ = keepalive.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unregister(client_id).await;
    debug!(client_id, "websocket disconnected");
}
