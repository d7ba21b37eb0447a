//! axum WebSocket adapter.
//!
//! Translates socket frames to gateway calls and pumps the connection's
//! outbound queue back into the socket.  All policy lives in the gateway;
//! this file only moves bytes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use huddle_shared::protocol::{ClientEvent, Handshake, ServerEvent};
use huddle_shared::types::ConnectionId;

use crate::api::AppState;
use crate::gateway::ChatGateway;

pub async fn socket_handler(
    State(state): State<AppState>,
    Query(handshake): Query<Handshake>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state.gateway.clone(), handshake, socket))
}

async fn handle_socket(gateway: Arc<ChatGateway>, handshake: Handshake, socket: WebSocket) {
    let connection_id = ConnectionId::new();

    let mut events = match gateway.handle_connect(connection_id, handshake).await {
        Ok(events) => events,
        Err(e) => {
            // Refused handshake: one scoped error frame, then close.
            let (mut sink, _) = socket.split();
            if let Ok(text) = serde_json::to_string(&ServerEvent::Error {
                message: e.to_string(),
            }) {
                let _ = sink.send(Message::Text(text)).await;
            }
            let _ = sink.close().await;
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    // Outbound pump: router events -> socket frames.
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound loop: socket frames -> gateway events.
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Err(e) = gateway.handle_event(connection_id, event).await {
                        gateway
                            .router()
                            .send_to_connection(
                                connection_id,
                                ServerEvent::Error {
                                    message: e.to_string(),
                                },
                            )
                            .await;
                    }
                }
                Err(e) => {
                    debug!(connection = %connection_id, error = %e, "unparseable client frame");
                    gateway
                        .router()
                        .send_to_connection(
                            connection_id,
                            ServerEvent::Error {
                                message: format!("malformed event: {e}"),
                            },
                        )
                        .await;
                }
            },
            Message::Close(_) => break,
            // Ping/pong are handled by the transport; binary frames are out
            // of scope for this protocol.
            _ => {}
        }
    }

    send_task.abort();
    gateway.handle_disconnect(connection_id).await;
}
