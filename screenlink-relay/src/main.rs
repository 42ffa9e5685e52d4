//! `ScreenLink` signaling relay -- bootstraps browser-to-browser sessions.
//!
//! An axum WebSocket server that lets a sharer and its viewers find each
//! other by join code and exchange offers, answers and connectivity
//! candidates. Media never passes through the relay.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin screenlink-relay
//!
//! # Run on custom address
//! cargo run --bin screenlink-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! RELAY_ADDR=127.0.0.1:8080 cargo run --bin screenlink-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use screenlink_relay::config::{RelayCliArgs, RelayConfig};
use screenlink_relay::server;
use screenlink_relay::state::{RelayLimits, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        heartbeat_secs = config.heartbeat_interval.as_secs(),
        stale_after_secs = config.stale_after.as_secs(),
        "starting screenlink relay"
    );

    let state = Arc::new(RelayState::with_limits(RelayLimits::from(&config)));

    let shutdown_state = Arc::clone(&state);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        tracing::info!("shutting down, closing all connections");
        shutdown_state.close_all_connections();
    };

    match server::start_server_with_shutdown(&config.bind_addr, state, shutdown).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}
