//! Per-device read endpoints

use axum::extract::{Path, Query, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::config::defaults::API_RESULT_LIMIT;
use crate::types::TelemetrySample;
use crate::window::{lock_device, WindowStore};

/// Upper bound on `?limit=`.
const MAX_LIMIT: usize = 1_000;

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Buffered samples and cached aggregation state for one device.
#[derive(Debug, Clone, Serialize)]
pub struct WindowView {
    pub device_id: String,
    pub sample_count: usize,
    pub last_window_avg_kw: Option<f64>,
    pub last_window_end: Option<DateTime<Utc>>,
    pub samples: Vec<TelemetrySample>,
}

fn window_view(store: &WindowStore, device_id: &str) -> Option<WindowView> {
    let handle = store.get(device_id)?;
    let state = lock_device(&handle);
    let samples: Vec<TelemetrySample> = state.samples().cloned().collect();
    Some(WindowView {
        device_id: state.device_id.clone(),
        sample_count: samples.len(),
        last_window_avg_kw: state.last_window_avg,
        last_window_end: state.last_window_end,
        samples,
    })
}

/// GET /api/v1/devices/:id/status
pub async fn device_status(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.statuses.get(&id) {
        Ok(Some(status)) => ApiResponse::ok(status),
        Ok(None) => ApiErrorResponse::not_found(format!("No status recorded for device {id}")),
        Err(e) => ApiErrorResponse::internal(format!("Storage error: {e}")),
    }
}

/// GET /api/v1/devices/:id/window
pub async fn device_window(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match window_view(&state.windows, &id) {
        Some(view) => ApiResponse::ok(view),
        None => ApiErrorResponse::not_found(format!("No telemetry buffered for device {id}")),
    }
}

/// GET /api/v1/devices/:id/ramp-rates?limit=50
pub async fn device_ramp_rates(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Response {
    let limit = q.limit.unwrap_or(API_RESULT_LIMIT).min(MAX_LIMIT);
    match state.results.results_for_device(&id, limit) {
        Ok(results) => ApiResponse::ok(results),
        Err(e) => ApiErrorResponse::internal(format!("Storage error: {e}")),
    }
}

/// GET /api/v1/devices/:id/saga-log
pub async fn device_saga_log(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.saga_log.entries_for_device(&id) {
        Ok(entries) => ApiResponse::ok(entries),
        Err(e) => ApiErrorResponse::internal(format!("Storage error: {e}")),
    }
}
