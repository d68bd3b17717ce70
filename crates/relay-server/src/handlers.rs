//! Connection handlers for the Relay server.
//!
//! This module wires the HTTP surface: the WebSocket endpoint every chat
//! client connects to, and a `/health` probe. Each upgraded socket is handed
//! to a [`SessionHandler`] for its whole lifetime.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MetricsObserver};
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocket, ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tenvis_relay_core::{Broadcaster, ChannelRegistry, RelayObserver, SessionHandler};
use tenvis_relay_transport::{Connection, WebSocketConnection};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// The channel registry.
    pub registry: Arc<ChannelRegistry>,
    /// Runs one session per connection.
    pub sessions: SessionHandler,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ChannelRegistry::with_config(config.registry_config()));
        let observer: Arc<dyn RelayObserver> = Arc::new(MetricsObserver::new(registry.clone()));

        let broadcaster = Broadcaster::with_config(registry.clone(), config.broadcast_config())
            .with_observer(observer.clone());
        let sessions = SessionHandler::new(registry.clone(), broadcaster).with_observer(observer);

        Self {
            registry,
            sessions,
            config,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Relay server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, Arc::new(AppState::new(config))).await
}

/// Serve connections from an already bound listener.
///
/// # Errors
///
/// Returns an error if the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.registry.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": stats.channel_count,
        "invites": stats.invite_count,
        "members": stats.member_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, remote, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, remote: SocketAddr, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let conn: Arc<dyn Connection> = Arc::new(WebSocketConnection::new(socket, Some(remote)));
    debug!(connection = %conn.id(), remote = %remote, "WebSocket connected");

    let outcome = state.sessions.run(conn.clone()).await;

    debug!(connection = %conn.id(), outcome = ?outcome, "WebSocket disconnected");
}
