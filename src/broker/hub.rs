//! Broadcast Broker
//!
//! Owns the set of live connections and fans typed messages out to them.
//! All registry mutation happens here; the transport layer (handler) only
//! feeds frames in and out.

use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

use crate::protocol::{self, Message, MessageKind, Payload, ProtocolError, SystemNotification};

/// Unique identifier for a registered connection
pub type ConnectionId = String;

/// Lifecycle state of a connection.
///
/// Only `Open` connections live in the registry: `Connecting` covers the
/// upgrade before registration, `Closing` is set while `stop` drains the
/// registry, and `Closed` is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Frame pushed to a connection's forwarding task.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// UTF-8 JSON text of one wire message
    Text(String),
    /// Instruct the forwarding task to close the socket
    Close,
}

/// Handle for sending frames to a specific connection
pub struct ConnectionHandle {
    sender: mpsc::UnboundedSender<Frame>,
    state: ConnectionState,
}

/// Configuration for the broker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Text of the notification sent to every new connection
    pub greeting: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            greeting: "Connected to farm telemetry stream".to_string(),
        }
    }
}

/// Server-side broadcast hub.
///
/// Construct one per process and share it behind an `Arc`; producers call
/// [`Broker::broadcast`], the transport layer registers and unregisters
/// connections as sockets come and go.
pub struct Broker {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    config: BrokerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            connections: RwLock::new(HashMap::new()),
            config,
            shutdown_tx,
        }
    }

    /// Register a new connection and enqueue its greeting notification.
    ///
    /// The greeting is the first frame the connection will receive. Fails
    /// once [`Broker::stop`] has run or when the connection limit is hit.
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<Frame>,
    ) -> Result<ConnectionId, BrokerError> {
        if self.is_stopped() {
            return Err(BrokerError::ShuttingDown);
        }

        let mut connections = self.connections.write().await;
        if connections.len() >= self.config.max_connections {
            return Err(BrokerError::AtCapacity(self.config.max_connections));
        }

        let id = Uuid::new_v4().to_string();
        let greeting = Message::now(Payload::SystemNotification(SystemNotification {
            message: self.config.greeting.clone(),
        }));
        let _ = sender.send(Frame::Text(protocol::encode(&greeting)));

        connections.insert(
            id.clone(),
            ConnectionHandle {
                sender,
                state: ConnectionState::Open,
            },
        );

        tracing::info!(connection_id = %id, "client connected");
        Ok(id)
    }

    /// Remove a connection from the registry.
    ///
    /// Idempotent: unregistering an absent connection is a no-op.
    pub async fn unregister(&self, id: &str) {
        if self.connections.write().await.remove(id).is_some() {
            tracing::info!(connection_id = %id, "client disconnected");
        }
    }

    /// Send a message to every open connection.
    ///
    /// The message is serialized once and the identical bytes go to each
    /// connection. Iteration runs over a snapshot taken under the read
    /// lock; connections whose channel has gone away are removed after the
    /// iteration, so one dead socket never affects delivery to the rest.
    pub async fn broadcast(&self, message: &Message) {
        let text = protocol::encode(message);

        let targets: Vec<(ConnectionId, mpsc::UnboundedSender<Frame>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(_, handle)| handle.state == ConnectionState::Open)
                .map(|(id, handle)| (id.clone(), handle.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (id, sender) in &targets {
            if sender.send(Frame::Text(text.clone())).is_err() {
                tracing::debug!(connection_id = %id, "send channel closed, dropping connection");
                dead.push(id.clone());
            }
        }
        for id in dead {
            self.unregister(&id).await;
        }

        tracing::trace!(
            kind = %message.kind(),
            connections = targets.len(),
            "broadcast"
        );
    }

    /// Send a message to a single connection. No-op if the connection is
    /// absent or not open; delivery is best-effort and unreported.
    pub async fn send_to(&self, id: &str, message: &Message) {
        let connections = self.connections.read().await;
        if let Some(handle) = connections.get(id) {
            if handle.state == ConnectionState::Open {
                let _ = handle.sender.send(Frame::Text(protocol::encode(message)));
            }
        }
    }

    /// Route one inbound text frame from a connection.
    ///
    /// Crop alerts are re-broadcast to all connections with their
    /// producer-assigned timestamp preserved. Server-originated kinds
    /// arriving from a client, unknown tags, and malformed frames are
    /// logged and dropped; none of them affect the connection.
    pub async fn handle_inbound(&self, id: &str, text: &str) {
        match protocol::decode(text) {
            Ok(message) => match message.kind() {
                MessageKind::CropAlert => {
                    tracing::debug!(connection_id = %id, "re-broadcasting crop alert");
                    self.broadcast(&message).await;
                }
                MessageKind::Weather | MessageKind::SystemNotification => {
                    tracing::warn!(
                        connection_id = %id,
                        kind = %message.kind(),
                        "ignoring server-originated kind from client"
                    );
                }
            },
            Err(ProtocolError::UnknownType(tag)) => {
                tracing::warn!(connection_id = %id, tag = %tag, "unknown message type dropped");
            }
            Err(ProtocolError::Malformed(error)) => {
                tracing::debug!(connection_id = %id, error = %error, "malformed message dropped");
            }
        }
    }

    /// Close every connection and refuse further registrations.
    ///
    /// Each connection gets a close frame; the registry empties before the
    /// shutdown signal is published, so no send can race past a released
    /// listener. Idempotent.
    pub async fn stop(&self) {
        let drained: Vec<(ConnectionId, ConnectionHandle)> = {
            let mut connections = self.connections.write().await;
            if self.is_stopped() {
                return;
            }
            // Flag flips under the write lock so a concurrent register
            // either completes before the drain or observes ShuttingDown.
            self.shutdown_tx.send_replace(true);
            connections.drain().collect()
        };

        for (id, mut handle) in drained {
            handle.state = ConnectionState::Closing;
            let _ = handle.sender.send(Frame::Close);
            tracing::debug!(connection_id = %id, "closing connection");
        }

        tracing::info!("broker stopped");
    }

    /// True once [`Broker::stop`] has run.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Resolves when [`Broker::stop`] has run (immediately if it already has).
    pub async fn stopped(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Current number of registered connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

/// Errors that can occur when registering with the broker
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker is shutting down")]
    ShuttingDown,

    #[error("too many connections (limit: {0})")]
    AtCapacity(usize),
}
