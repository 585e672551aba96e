#![forbid(unsafe_code)]

// Signaling module - WebSocket signaling server

pub mod connection;
pub mod protocol;

use crate::auth::jwt::resolve_identity;
use crate::config::ServerConfig;
use crate::metrics::ServerMetrics;
use crate::room::RoomCoordinator;
use crate::turn::TurnConfig;
use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Maximum inbound WebSocket frame
const MAX_MESSAGE_SIZE: usize = 65_536;

/// Signaling server state
#[derive(Clone)]
pub struct SignalingServer {
    coordinator: Arc<RoomCoordinator>,
    turn_config: Option<Arc<TurnConfig>>,
    config: Arc<ServerConfig>,
    metrics: ServerMetrics,
    connection_semaphore: Arc<Semaphore>,
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

impl SignalingServer {
    /// Creates a new signaling server
    pub fn new(
        coordinator: Arc<RoomCoordinator>,
        turn_config: Option<TurnConfig>,
        config: ServerConfig,
        metrics: ServerMetrics,
    ) -> Self {
        info!("Max connections: {}", config.max_connections);
        if config.jwt_secret.is_some() {
            info!("Identity tokens enabled");
        } else {
            info!("JWT_SECRET not set, all connections join as guests");
        }

        Self {
            coordinator,
            turn_config: turn_config.map(Arc::new),
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
            metrics,
        }
    }

    /// Creates the Axum router for the signaling server
    pub fn router(self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self)
            .layer(CorsLayer::permissive())
    }

    /// Starts the signaling server on the configured port
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the port
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        info!("Starting signaling server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        self.serve_on(listener).await
    }

    /// Serves on an already bound listener
    ///
    /// # Errors
    /// Returns an error if the accept loop fails
    pub async fn serve_on(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        let app = self.router();

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Health check handler
async fn health_handler(State(server): State<SignalingServer>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": server.coordinator.room_count(),
        "participants": server.coordinator.total_participant_count(),
    }))
}

/// Metrics handler: Prometheus text exposition format, behind an optional bearer token.
async fn metrics_handler(State(server): State<SignalingServer>, headers: HeaderMap) -> Response {
    if let Some(expected) = &server.config.metrics_token {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != format!("Bearer {expected}") {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let body = server.metrics.render_prometheus(
        server.coordinator.room_count(),
        server.coordinator.total_participant_count(),
    );
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(server): State<SignalingServer>,
) -> Response {
    let identity = match (params.token.as_deref(), server.config.jwt_secret.as_deref()) {
        (Some(token), Some(secret)) => match resolve_identity(token, secret) {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!("Rejecting WebSocket upgrade: {}", e);
                return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
            }
        },
        (Some(_), None) => {
            warn!("Identity token supplied but JWT_SECRET is not set, treating as guest");
            None
        }
        (None, _) => None,
    };

    // Acquire connection permit (non-blocking)
    let permit = match server.connection_semaphore.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            warn!("Connection limit reached, rejecting WebSocket upgrade");
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_failed_upgrade(|error| {
            warn!("WebSocket upgrade failed: {}", error);
        })
        .on_upgrade(move |socket| {
            connection::handle_connection(
                socket,
                server.coordinator,
                server.turn_config,
                server.config,
                identity,
                server.metrics,
                permit,
            )
        })
}
