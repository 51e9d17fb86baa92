//! HTTP API for the reputation service
//!
//! Provides:
//! - Reputation endpoints (get/set/delete, violations, dump)
//! - Service endpoints (heartbeat, lbheartbeat, version)
//! - Security middleware (auth, size limits, headers, request logging)

pub mod middleware;
pub mod reputation;

use axum::{Router, extract::DefaultBodyLimit, middleware as axum_middleware};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::reputation::ReputationManager;

pub use middleware::{
    Access, SecurityMiddlewareConfig, SecurityState, auth_middleware, body_size_middleware,
    logging_middleware, security_headers_middleware,
};
pub use reputation::create_reputation_router;

/// Shared state for the reputation handlers
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ReputationManager>,
    /// File served at `/__version__`
    pub version_path: PathBuf,
}

impl AppState {
    pub fn new(manager: Arc<ReputationManager>, version_path: impl Into<PathBuf>) -> Self {
        Self {
            manager,
            version_path: version_path.into(),
        }
    }
}

/// Build the full application router with security middleware applied
pub fn create_router(state: AppState, security: SecurityState) -> Router {
    let max_request_size = security.config.max_request_size;
    create_reputation_router(state)
        // Bodies without Content-Length are cut off while buffering
        .layer(DefaultBodyLimit::max(max_request_size))
        // Apply security middleware layers (order matters: last added runs first)
        .layer(axum_middleware::from_fn_with_state(
            security.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            security.clone(),
            body_size_middleware,
        ))
        .layer(axum_middleware::from_fn(security_headers_middleware))
        .layer(axum_middleware::from_fn_with_state(
            security,
            logging_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}
