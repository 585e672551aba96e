#![forbid(unsafe_code)]

use anyhow::Result;
use meetrelay::config::ServerConfig;
use meetrelay::metrics::ServerMetrics;
use meetrelay::room::RoomCoordinator;
use meetrelay::signaling::SignalingServer;
use meetrelay::turn::TurnConfig;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meetrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("meetrelay - Starting server");

    let config = ServerConfig::from_env();
    info!(
        "Departure grace {:?}, idle timeout {:?}, rate limit {}/s",
        config.departure_grace, config.idle_timeout, config.rate_limit_per_sec
    );

    let metrics = ServerMetrics::new();
    let coordinator = Arc::new(RoomCoordinator::new(config.departure_grace, metrics.clone()));

    // Load TURN config from environment (optional)
    let turn_config = TurnConfig::from_env();
    if let Some(ref tc) = turn_config {
        info!("TURN configured: {} URL(s), TTL {}s", tc.urls.len(), tc.ttl_secs);
    } else {
        info!("No TURN configured (set TURN_URLS and TURN_SECRET to enable)");
    }

    let signaling_server = SignalingServer::new(coordinator.clone(), turn_config, config, metrics);

    // Run server with graceful shutdown
    tokio::select! {
        result = signaling_server.serve() => {
            if let Err(e) = result {
                tracing::error!("Signaling server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            coordinator.shutdown().await;
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
