//! # Recon HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Graph and working-set counts
//! - `GET /selection` - Current working set
//! - `GET /transforms` - Registered transform metadata
//! - `POST /nodes` - Upsert node specs
//! - `POST /select` - Replace the working set by selectors
//! - `POST /traverse` - Replace the working set by traversal
//! - `POST /transform` - Run a transform (or `*`) over the working set
//! - `POST /group`, `/ungroup` - Reparent the working set
//! - `POST /measure`, `/unmeasure` - Set or reset node weights
//! - `POST /remove` - Remove the working set
//! - `POST /export` - Structural form of the graph
//!
//! ## Security
//!
//! - `[server] api_key` / `RECON_API_KEY`: Bearer token required when set
//! - `[server] cors_origins` / `RECON_CORS_ORIGINS`: allowed origins
//!   (default: localhost only, `*` for all)

mod auth;
mod handlers;
mod types;

pub use auth::keys_match;
pub use handlers::{ApiError, status_for};
pub use types::{
    AddNodesRequest, AddNodesResponse, ErrorResponse, ExpressionsRequest, HealthResponse,
    ScopedRequest, ScopedResponse, SelectionResponse, StatusResponse, TransformRequest,
    TransformResponse,
};

use crate::config::{Config, ServerConfig};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use recon_core::{Orchestrator, ReconError, Session};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Maximum accepted request body.
pub const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: one session, one orchestrator.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<RwLock<Session>>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
    /// Bearer token required on every endpoint but `/health`.
    pub api_key: Option<String>,
}

impl AppState {
    #[must_use]
    pub fn new(session: Session, orchestrator: Orchestrator, config: Config) -> Self {
        let api_key = config.server.api_key.clone().filter(|key| !key.is_empty());
        Self {
            session: Arc::new(RwLock::new(session)),
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
            api_key,
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

fn build_cors_layer(server: &ServerConfig) -> CorsLayer {
    if server.cors_origins.iter().any(|origin| origin == "*") {
        tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => {
                tracing::info!("CORS: Allowing origin: {}", origin);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    let origins = if allowed.is_empty() {
        tracing::info!("CORS: No origins configured, defaulting to localhost only");
        [
            "http://localhost:3000",
            "http://localhost:8080",
            "http://127.0.0.1:3000",
            "http://127.0.0.1:8080",
        ]
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
    } else {
        allowed
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner): tracing, CORS, body limit,
/// authentication.
pub fn create_router(state: AppState) -> Router {
    if state.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set RECON_API_KEY or [server] api_key to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/selection", get(handlers::selection_handler))
        .route("/transforms", get(handlers::transforms_handler))
        .route("/nodes", post(handlers::add_nodes_handler))
        .route("/select", post(handlers::select_handler))
        .route("/traverse", post(handlers::traverse_handler))
        .route("/transform", post(handlers::transform_handler))
        .route("/group", post(handlers::group_handler))
        .route("/ungroup", post(handlers::ungroup_handler))
        .route("/measure", post(handlers::measure_handler))
        .route("/unmeasure", post(handlers::unmeasure_handler))
        .route("/remove", post(handlers::remove_handler))
        .route("/export", post(handlers::export_handler));

    if state.api_key.is_some() {
        router = router.layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::api_key_auth_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(&state.config.server))
                .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_SIZE)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve `state` on `addr` until `shutdown` resolves.
pub async fn run_server(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ReconError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ReconError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Recon HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ReconError::IoError(format!("Server error: {}", e)))?;

    tracing::info!("Recon HTTP server stopped");
    Ok(())
}
