//! # Parley Server
//!
//! Realtime chat hub for the marketplace: WebSocket sessions plus the HTTP
//! query API.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! parley
//!
//! # Run with a custom config file
//! PARLEY_CONFIG=/path/to/parley.toml parley
//!
//! # Override single settings
//! PARLEY_PORT=8080 PARLEY_HOST=0.0.0.0 PARLEY_HEARTBEAT__TIMEOUT_MS=90000 parley
//! ```

mod api;
mod config;
mod gateway;
mod handlers;
mod metrics;
mod profile;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Parley server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
