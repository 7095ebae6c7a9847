//! Connection gateway.
//!
//! Validates the connecting identity, upgrades the request and hands the
//! socket to a new session. Invalid requests are rejected before the
//! upgrade, so they never create a session or touch the hub.

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parley_core::session;
use parley_protocol::UserId;
use parley_transport::WebSocketConnection;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// The connecting user's id.
    id: Option<String>,
}

impl ConnectParams {
    /// The identity this connection claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is absent, blank or not a UUID.
    pub fn user_id(&self) -> Result<UserId, ConnectionError> {
        let raw = self
            .id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(ConnectionError::MissingId)?;

        raw.parse()
            .map_err(|_| ConnectionError::MalformedId(raw.to_string()))
    }
}

/// Reasons an upgrade is refused.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Missing user id")]
    MissingId,

    #[error("Malformed user id: {0}")]
    MalformedId(String),

    #[error("Connection limit reached")]
    AtCapacity,
}

impl ConnectionError {
    fn reason(&self) -> &'static str {
        match self {
            ConnectionError::MissingId => "missing_id",
            ConnectionError::MalformedId(_) => "malformed_id",
            ConnectionError::AtCapacity => "at_capacity",
        }
    }
}

impl IntoResponse for ConnectionError {
    fn into_response(self) -> Response {
        let status = match self {
            ConnectionError::MissingId | ConnectionError::MalformedId(_) => StatusCode::BAD_REQUEST,
            ConnectionError::AtCapacity => StatusCode::SERVICE_UNAVAILABLE,
        };

        let body = Json(serde_json::json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

/// A reserved connection slot, released on drop.
pub struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    /// Reserve a slot unless `limit` slots are taken.
    #[must_use]
    pub fn try_acquire(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .ok()
            .map(|_| Self {
                active: Arc::clone(active),
            })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let accepted = params.user_id().and_then(|user| {
        ConnectionSlot::try_acquire(&state.active_connections, state.config.limits.max_connections)
            .map(|slot| (user, slot))
            .ok_or(ConnectionError::AtCapacity)
    });

    let (user, slot) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(remote = %remote, error = %e, "Rejected connection");
            metrics::record_rejection(e.reason());
            return e.into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let _slot = slot;
        let _metrics_guard = ConnectionMetricsGuard::new();

        debug!(user = %user, remote = %remote, "WebSocket connected");

        let conn = WebSocketConnection::new(socket, Some(remote));
        match session::start(state.session.clone(), user, Box::new(conn)).await {
            Ok(session) => {
                if let Err(e) = session.await {
                    error!(user = %user, error = %e, "Session task failed");
                    metrics::record_error("session");
                }
            }
            Err(e) => {
                error!(user = %user, error = %e, "Failed to start session");
                metrics::record_error("hub");
            }
        }

        debug!(user = %user, remote = %remote, "WebSocket disconnected");
    })
}
