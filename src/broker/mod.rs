//! Server-Side Broadcast Broker
//!
//! Tracks live WebSocket connections and fans typed messages out to them.
//!
//! ## Architecture
//!
//! - **Broker**: the connection registry plus broadcast/unicast delivery
//! - **Handler**: WebSocket upgrade and per-socket pump tasks
//! - **Router**: the axum application serving the upgrade path
//!
//! Clients connect to the configured path (default `/ws`) and immediately
//! receive one `system_notification`. Producers hold an `Arc<Broker>` and
//! call [`Broker::broadcast`]; there is no global instance.
//!
//! ## Example
//!
//! ```rust,no_run
//! use farmcast::broker::{serve, AppState, Broker, BrokerConfig};
//! use farmcast::config::ServerConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Arc::new(Broker::new(BrokerConfig::default()));
//!     let config = ServerConfig::default();
//!     serve(AppState::new(Arc::clone(&broker), config.clone()), &config).await?;
//!     Ok(())
//! }
//! ```

mod handler;
mod hub;

pub use handler::websocket_handler;
pub use hub::{Broker, BrokerConfig, BrokerError, ConnectionId, ConnectionState, Frame};

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::ServerConfig;

/// Shared state for the broker's HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The connection registry and fan-out engine
    pub broker: Arc<Broker>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(broker: Arc<Broker>, config: ServerConfig) -> Self {
        Self {
            broker,
            config: Arc::new(config),
        }
    }
}

/// Build the router: the WebSocket upgrade path plus a liveness probe.
pub fn build_router(state: AppState) -> Router {
    let ws_path = state.config.ws_path.clone();
    let shared_state = Arc::new(state);

    Router::new()
        .route(&ws_path, get(websocket_handler))
        .route("/health/live", get(liveness))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(shared_state)
}

/// Liveness probe with the current connection count
async fn liveness(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.broker.connection_count().await,
    }))
}

/// Run the broker server until a shutdown signal arrives or the broker is
/// stopped externally.
///
/// On SIGINT/SIGTERM the broker stops first, closing every connection, and
/// only then is the listening socket released.
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<(), ServeError> {
    let broker = Arc::clone(&state.broker);
    let router = build_router(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(addr = %addr, path = %config.ws_path, "farmcast broker listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => broker.stop().await,
                _ = broker.stopped() => {}
            }
        })
        .await?;

    tracing::info!("farmcast broker shut down");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

/// Errors from running the broker server
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn test_state() -> AppState {
        AppState::new(
            Arc::new(Broker::new(BrokerConfig::default())),
            ServerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_health_live() {
        let app = build_router(test_state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_path_rejects_plain_get() {
        let app = build_router(test_state());

        // Without an upgrade handshake the WebSocket route must not serve
        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_ne!(response.status(), StatusCode::OK);
    }
}
