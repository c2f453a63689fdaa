//! API route definitions
//!
//! - /health - liveness and storage backend
//! - /api/v1/devices/:id/* - per-device status, window, ramp rates, saga log
//! - /api/v1/stats, /api/v1/metrics - pipeline counters
//! - /api/v1/commands/* - operator-initiated curtail / cancel

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};

/// Versioned API routes, nested under `/api/v1`.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        // Devices
        .route("/devices/:id/status", get(handlers::device_status))
        .route("/devices/:id/window", get(handlers::device_window))
        .route("/devices/:id/ramp-rates", get(handlers::device_ramp_rates))
        .route("/devices/:id/saga-log", get(handlers::device_saga_log))
        // Observability
        .route("/stats", get(handlers::stats))
        .route("/metrics", get(handlers::metrics))
        // Commands
        .route("/commands/curtail", post(handlers::curtail))
        .route("/commands/cancel", post(handlers::cancel))
        .with_state(state)
}

/// Unversioned health endpoint at /health
pub fn health_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .with_state(state)
}
