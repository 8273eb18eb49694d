//! Reconnecting Client Multiplexer
//!
//! Maintains one logical connection to a broker, recovering from transport
//! loss under a bounded fixed-delay retry policy, and routes inbound
//! messages to subscribers registered by message kind.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as SocketMessage;

use crate::config::ClientConfig;
use crate::protocol::{self, Message, MessageKind, Payload, ProtocolError};

/// State of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Attempting to establish the transport
    Connecting,
    /// Transport established
    Open,
    /// Transport lost or deliberately shut down
    Closed,
    /// Reconnection attempts exhausted; only [`Multiplexer::restart`] leaves
    /// this state
    Failed,
}

type Callback = Arc<dyn Fn(&Payload) + Send + Sync>;

#[derive(Default)]
struct SubscriberTable {
    next_id: u64,
    by_kind: HashMap<MessageKind, Vec<(u64, Callback)>>,
}

/// Handle to one registered callback.
///
/// `unsubscribe` removes exactly that callback; calling it repeatedly is
/// safe. Dropping the handle does not unsubscribe.
pub struct Subscription {
    id: u64,
    kind: MessageKind,
    table: Weak<Mutex<SubscriberTable>>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(table) = self.table.upgrade() {
            let mut table = table.lock().expect("subscriber table lock poisoned");
            if let Some(callbacks) = table.by_kind.get_mut(&self.kind) {
                callbacks.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

struct MuxInner {
    config: ClientConfig,
    state_tx: watch::Sender<LinkState>,
    subscribers: Arc<Mutex<SubscriberTable>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    shutdown_tx: watch::Sender<bool>,
    attempts: AtomicU32,
}

impl MuxInner {
    fn new(config: ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(LinkState::Connecting);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            state_tx,
            subscribers: Arc::new(Mutex::new(SubscriberTable::default())),
            outbound: Mutex::new(None),
            shutdown_tx,
            attempts: AtomicU32::new(0),
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state_tx.send_replace(state);
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Parse one inbound frame and hand it to the subscribers for its kind.
    fn dispatch_text(&self, text: &str) {
        match protocol::decode(text) {
            Ok(message) => self.dispatch(&message),
            Err(ProtocolError::UnknownType(tag)) => {
                tracing::warn!(tag = %tag, "unknown message type dropped");
            }
            Err(ProtocolError::Malformed(error)) => {
                tracing::debug!(error = %error, "malformed message dropped");
            }
        }
    }

    /// Invoke every callback registered for the message's kind, in
    /// registration order. The callback list is snapshotted first so a
    /// callback may subscribe or unsubscribe reentrantly, and a panicking
    /// callback never prevents the remaining ones.
    fn dispatch(&self, message: &Message) {
        let callbacks: Vec<Callback> = {
            let table = self.subscribers.lock().expect("subscriber table lock poisoned");
            table
                .by_kind
                .get(&message.kind())
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };

        for callback in callbacks {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(&message.payload)));
            if result.is_err() {
                tracing::error!(kind = %message.kind(), "subscriber panicked during dispatch");
            }
        }
    }
}

/// Client-side connection multiplexer.
///
/// Construct with [`Multiplexer::connect`]; the connection task starts
/// immediately and keeps the link alive through
/// `max_reconnect_attempts` fixed-delay retries. Once retries are
/// exhausted the link is terminal [`LinkState::Failed`] until
/// [`Multiplexer::restart`].
pub struct Multiplexer {
    inner: Arc<MuxInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Multiplexer {
    /// Create a multiplexer and start connecting to the configured broker.
    pub fn connect(config: ClientConfig) -> Self {
        let inner = Arc::new(MuxInner::new(config));
        let task = tokio::spawn(run_loop(Arc::clone(&inner)));
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    /// Register `callback` for messages of `kind`.
    pub fn subscribe<F>(&self, kind: MessageKind, callback: F) -> Subscription
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        let mut table = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned");
        let id = table.next_id;
        table.next_id += 1;
        table
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            id,
            kind,
            table: Arc::downgrade(&self.inner.subscribers),
        }
    }

    /// Stamp `payload` with the current time and send it to the broker.
    pub fn publish(&self, payload: Payload) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let message = Message::now(payload);
        let outbound = self.inner.outbound.lock().expect("outbound lock poisoned");
        match outbound.as_ref() {
            Some(tx) => tx
                .send(protocol::encode(&message))
                .map_err(|_| ClientError::NotConnected),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        *self.inner.state_tx.borrow()
    }

    /// True iff the link is open
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Watch link state transitions.
    ///
    /// Reconnection exhaustion surfaces here as [`LinkState::Failed`];
    /// subscriber callbacks only ever see wire messages.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of reconnection attempts since the link was last open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Deliberate shutdown: close the transport, clear all subscriptions,
    /// and suppress further reconnection.
    pub fn disconnect(&self) {
        tracing::info!("disconnecting");
        self.inner.shutdown_tx.send_replace(true);
        self.inner
            .subscribers
            .lock()
            .expect("subscriber table lock poisoned")
            .by_kind
            .clear();
        self.inner.set_state(LinkState::Closed);
    }

    /// Restart the connection cycle after [`LinkState::Failed`] or a
    /// deliberate disconnect. No-op while a connection task is live.
    pub fn restart(&self) {
        let mut task = self.task.lock().expect("task lock poisoned");
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        self.inner.shutdown_tx.send_replace(false);
        self.inner.attempts.store(0, Ordering::Relaxed);
        self.inner.set_state(LinkState::Connecting);
        *task = Some(tokio::spawn(run_loop(Arc::clone(&self.inner))));
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

/// Connection loop: connect, pump until the transport drops, then retry
/// under the fixed-delay policy until exhausted or shut down.
async fn run_loop(inner: Arc<MuxInner>) {
    loop {
        inner.set_state(LinkState::Connecting);

        match connect_async(inner.config.url.as_str()).await {
            Ok((socket, _)) => {
                if inner.shutting_down() {
                    inner.set_state(LinkState::Closed);
                    return;
                }
                tracing::info!(url = %inner.config.url, "link established");
                inner.attempts.store(0, Ordering::Relaxed);

                let (out_tx, out_rx) = mpsc::unbounded_channel();
                *inner.outbound.lock().expect("outbound lock poisoned") = Some(out_tx);
                inner.set_state(LinkState::Open);

                pump(&inner, socket, out_rx).await;

                inner
                    .outbound
                    .lock()
                    .expect("outbound lock poisoned")
                    .take();
            }
            Err(e) => {
                tracing::warn!(url = %inner.config.url, error = %e, "connection attempt failed");
            }
        }

        inner.set_state(LinkState::Closed);
        if inner.shutting_down() {
            return;
        }

        let attempts = inner.attempts.load(Ordering::Relaxed);
        if attempts >= inner.config.max_reconnect_attempts {
            tracing::error!(attempts, "reconnect attempts exhausted, giving up");
            inner.set_state(LinkState::Failed);
            return;
        }
        inner.attempts.store(attempts + 1, Ordering::Relaxed);
        tracing::info!(
            attempt = attempts + 1,
            delay_ms = inner.config.reconnect_delay_ms,
            "scheduling reconnect"
        );

        let mut shutdown_rx = inner.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::time::sleep(inner.config.reconnect_delay()) => {}
            _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => {
                inner.set_state(LinkState::Closed);
                return;
            }
        }
    }
}

/// Pump one established socket: dispatch inbound frames, forward outbound
/// ones, answer pings, and exit on close, error, or shutdown.
async fn pump(
    inner: &Arc<MuxInner>,
    socket: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    let (mut sink, mut stream) = socket.split();
    let mut shutdown_rx = inner.shutdown_tx.subscribe();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(SocketMessage::Text(text))) => inner.dispatch_text(&text),
                Some(Ok(SocketMessage::Binary(_))) => {
                    tracing::debug!("binary frame ignored, protocol is text-only");
                }
                Some(Ok(SocketMessage::Ping(data))) => {
                    let _ = sink.send(SocketMessage::Pong(data)).await;
                }
                Some(Ok(SocketMessage::Pong(_))) | Some(Ok(SocketMessage::Frame(_))) => {}
                Some(Ok(SocketMessage::Close(_))) => {
                    tracing::debug!("link closed by broker");
                    return;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "link error");
                    return;
                }
                None => {
                    tracing::debug!("link stream ended");
                    return;
                }
            },
            outbound = out_rx.recv() => match outbound {
                Some(text) => {
                    if sink.send(SocketMessage::Text(text)).await.is_err() {
                        tracing::warn!("link send failed");
                        return;
                    }
                }
                None => return,
            },
            _ = async { let _ = shutdown_rx.wait_for(|stop| *stop).await; } => {
                let _ = sink.send(SocketMessage::Close(None)).await;
                return;
            }
        }
    }
}

/// Errors surfaced to callers of the multiplexer
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("link is not open")]
    NotConnected,
}
