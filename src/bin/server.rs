//! chartfeed server
//!
//! Serves historical klines over REST and fans live Binance streams out to
//! WebSocket consumers. Metrics are exposed on `/metrics` and pushed as
//! structured JSON logs.
//!
//! # Usage
//! ```sh
//! SERVER_PORT=3000 DATABASE_URL=sqlite://data/chartfeed.db cargo run --bin server
//! ```
//!
//! # Environment Variables
//! - `SERVER_BIND_ADDRESS` / `SERVER_PORT` - listen address (default: 0.0.0.0:3000)
//! - `STORE_ENABLED` / `DATABASE_URL` - candle store (default: sqlite://data/chartfeed.db)
//! - `OBSERVABILITY_ENABLED` - Enable metrics reporting (default: true)
//! - `OBSERVABILITY_INTERVAL` - Interval in seconds between metric outputs (default: 60)

use anyhow::{Context, Result};
use chartfeed::application::system::Application;
use chartfeed::config::Config;
use chartfeed::interfaces::{AppState, router};
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false).pretty();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("chartfeed server {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let address = config.server.socket_address();
    info!(
        "Configuration loaded: upstream={}, store={}, listen={}",
        config.binance.base_url,
        if config.store.enabled { config.store.database_url.as_str() } else { "disabled" },
        address
    );

    let app = Application::build(config).await?;
    let system = app.start();

    let state = Arc::new(AppState {
        historical: system.historical.clone(),
        streams: system.streams.clone(),
        metrics: system.metrics.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Listening on {}. Press Ctrl+C to shutdown.", address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    system.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received."),
        Err(e) => {
            error!("Unable to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
