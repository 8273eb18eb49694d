//! # Farmcast
//!
//! Real-time farm telemetry distribution: a server-side WebSocket broadcast
//! broker and a client-side reconnecting multiplexer.
//!
//! ## Features
//!
//! - **Typed wire protocol**: weather updates, crop alerts, and system
//!   notifications as a closed, statically-checked set
//! - **Broadcast broker**: fan-out to every live connection with isolated
//!   per-connection failures
//! - **Reconnecting client**: bounded fixed-delay retry with a terminal
//!   failed state observable through a watch channel
//! - **Best-effort delivery**: no persistence, no acknowledgments
//!
//! ## Modules
//!
//! - [`protocol`]: wire message types and encoding
//! - [`broker`]: server-side connection registry and fan-out
//! - [`client`]: client-side multiplexer and subscriptions
//! - [`producer`]: simulated weather producer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use farmcast::broker::{serve, AppState, Broker, BrokerConfig};
//! use farmcast::config::Config;
//! use farmcast::protocol::{Message, Payload, SystemNotification};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!     let broker = Arc::new(Broker::new(BrokerConfig {
//!         max_connections: config.server.max_connections,
//!         ..Default::default()
//!     }));
//!
//!     // Any producer can broadcast through its own handle
//!     broker
//!         .broadcast(&Message::now(Payload::SystemNotification(
//!             SystemNotification { message: "harvest window open".into() },
//!         )))
//!         .await;
//!
//!     serve(AppState::new(Arc::clone(&broker), config.server.clone()), &config.server).await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod producer;
pub mod protocol;

// Re-export top-level types for convenience
pub use protocol::{
    AlertSeverity, CropAlert, Message, MessageKind, Payload, ProtocolError, SystemNotification,
    WeatherUpdate,
};

pub use broker::{
    build_router, serve, AppState, Broker, BrokerConfig, BrokerError, ConnectionId,
    ConnectionState, ServeError,
};

pub use client::{ClientError, LinkState, Multiplexer, Subscription};

pub use config::{ClientConfig, Config, ConfigError, LoggingConfig, ServerConfig, WeatherConfig};

pub use producer::WeatherSimulator;
