//! WebSocket Handler
//!
//! Upgrades HTTP connections and pumps frames between the socket and the
//! broker. One send task and one receive task per connection; whichever
//! exits first tears the other down and unregisters the connection.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::hub::{Broker, Frame};
use super::AppState;

/// WebSocket upgrade handler, the entry point for new connections.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let broker = Arc::clone(&state.broker);
    ws.on_upgrade(move |socket| handle_socket(socket, broker))
}

/// Drive an established WebSocket connection until either side closes it.
async fn handle_socket(socket: WebSocket, broker: Arc<Broker>) {
    let (mut sink, mut stream) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();

    let connection_id = match broker.register(tx).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "connection refused");
            let _ = sink.send(WsMessage::Close(None)).await;
            return;
        }
    };

    let conn_id_for_send = connection_id.clone();

    // Forward frames from the broker to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Frame::Text(text) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        tracing::debug!(
                            connection_id = %conn_id_for_send,
                            "socket send failed, closing connection"
                        );
                        break;
                    }
                }
                Frame::Close => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
    });

    let broker_for_recv = Arc::clone(&broker);
    let conn_id_for_recv = connection_id.clone();

    // Feed inbound frames to the broker
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    broker_for_recv
                        .handle_inbound(&conn_id_for_recv, &text)
                        .await;
                }
                Ok(WsMessage::Binary(_)) => {
                    tracing::debug!(
                        connection_id = %conn_id_for_recv,
                        "binary frame ignored, protocol is text-only"
                    );
                }
                // Axum answers pings itself
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => {}
                Ok(WsMessage::Close(_)) => {
                    tracing::debug!(connection_id = %conn_id_for_recv, "client requested close");
                    break;
                }
                Err(e) => {
                    tracing::debug!(
                        connection_id = %conn_id_for_recv,
                        error = %e,
                        "socket receive error"
                    );
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    broker.unregister(&connection_id).await;
}
