//! Pipeline Server - RPC front-end for long-lived analysis engines
//!
//! Accepts one call per document from any number of callers and forwards it
//! to the engine's supervisor. Calls against the same engine are serialised:
//! the worker behind it only ever handles one document at a time.
//!
//! Endpoints:
//! - POST /annotate - Annotate a document (JSON)
//! - POST /parse - Annotate a plain-text document on the default engine
//! - GET /health - Health check
//! - GET /ready - Readiness check (per-engine worker status)
//! - GET /metrics - Prometheus metrics

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use config::{ConfigError, ServerConfig};
pub use state::{AppState, EngineHandle, EngineStatus};

/// Build the front-end router over started engines.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/annotate", post(handlers::annotate_handler))
        .route("/parse", post(handlers::parse_handler))
        .route("/health", get(handlers::health_handler))
        .route("/ready", get(handlers::ready_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
