//! REST API and WebSocket server for the monitoring core
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Storage backend** shared behind an `Arc` for all queries
//! - **WebSocket** endpoint feeding clients from the broadcast hub
//!
//! ## Endpoints
//!
//! - `GET /api/nodes/{node_id}/health-history` - Probe history
//! - `GET /api/nodes/{node_id}/metrics` - Counter rows per granularity
//! - `GET /api/settings` - List settings (admin)
//! - `GET /api/settings/version` - Global settings version (admin)
//! - `GET/PUT/DELETE /api/settings/{key}` - Single setting (admin)
//! - `POST /api/settings/batch` - Transactional multi-update (admin)
//! - `GET /api/monitor/ws` - WebSocket upgrade (session or share token)

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod websocket;

pub use auth::{Caller, SessionStore, ShareTokenStore, StaticSessionStore, StaticShareTokenStore};
pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Enable CORS for dashboards served from elsewhere
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".parse().expect("static addr parses"),
            enable_cors: true,
        }
    }
}

/// Build the router with all routes and shared state.
pub fn build_router(state: ApiState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route(
            "/api/nodes/:node_id/health-history",
            get(routes::health_history::get_health_history),
        )
        .route(
            "/api/nodes/:node_id/metrics",
            get(routes::metrics::get_node_metrics),
        )
        .route("/api/settings", get(routes::settings::list_settings))
        .route("/api/settings/version", get(routes::settings::get_version))
        .route("/api/settings/batch", post(routes::settings::batch_update))
        .route(
            "/api/settings/:key",
            get(routes::settings::get_setting)
                .put(routes::settings::put_setting)
                .delete(routes::settings::delete_setting),
        )
        .route("/api/monitor/ws", get(websocket::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    use tower_http::cors::{Any, CorsLayer};

    info!("starting API server on {}", config.bind_addr);

    let mut app = build_router(state);

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
