//! Server wiring for Parley.
//!
//! Builds the shared state and the HTTP router, and runs the listener.

use crate::api;
use crate::config::Config;
use crate::gateway;
use crate::metrics;
use crate::profile::HttpProfileSource;
use anyhow::{Context, Result};
use axum::{response::IntoResponse, routing::get, Router};
use parley_core::{
    spawn_hub, ChatDirectory, ChatStore, HubHandle, InMemoryStore, ProfileSource, RoomResolver,
    SessionContext,
};
use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

/// How often hub statistics are copied into metrics.
const HUB_SAMPLE_PERIOD: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The connection hub.
    pub hub: HubHandle,
    /// Everything a new session needs.
    pub session: SessionContext,
    /// Query surface for the HTTP API.
    pub directory: ChatDirectory,
    /// Open WebSocket connections, bounded by `limits.max_connections`.
    pub active_connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Create new app state over an in-memory store. Spawns the hub.
    #[must_use]
    pub fn new(config: Config, profiles: Arc<dyn ProfileSource>) -> Self {
        let store: Arc<dyn ChatStore> = Arc::new(InMemoryStore::new());
        let hub = spawn_hub(config.hub_config());
        let resolver = Arc::new(RoomResolver::new(store));

        let session = SessionContext {
            hub: hub.clone(),
            resolver: Arc::clone(&resolver),
            config: config.session_config(),
        };
        let directory = ChatDirectory::new(resolver, hub.clone(), profiles);

        Self {
            config,
            hub,
            session,
            directory,
            active_connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(gateway::ws_handler))
        .route("/getChatMessages", get(api::get_chat_messages))
        .route("/getChatRoomID", get(api::get_chat_room_id))
        .route("/getUserChats", get(api::get_user_chats))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let profiles = Arc::new(HttpProfileSource::new(&config.profile)?);
    let state = Arc::new(AppState::new(config.clone(), profiles));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
        metrics::spawn_hub_sampler(state.hub.clone(), HUB_SAMPLE_PERIOD);
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}?id=<user id>",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
