//! Operator command endpoints
//!
//! Commands are queued onto the same worker channels the dispatcher feeds, so
//! an HTTP curtailment runs exactly like one read off the curtailment topic.
//! The response is 202 once queued; the saga outcome shows up in the saga log.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::info;

use super::ApiState;
use crate::api::envelope::{ApiErrorResponse, ApiResponse};
use crate::types::{CancelCurtailmentRequest, CurtailmentRequest, SagaKind};

#[derive(Debug, Clone, Serialize)]
pub struct CommandAccepted {
    pub device_id: String,
    pub saga: SagaKind,
    pub queued: bool,
}

fn enqueue_error<T>(err: &TrySendError<T>) -> Response {
    match err {
        TrySendError::Full(_) => ApiErrorResponse::service_unavailable("Command queue is full, retry later"),
        TrySendError::Closed(_) => ApiErrorResponse::service_unavailable("Command worker is not running"),
    }
}

/// POST /api/v1/commands/curtail
pub async fn curtail(
    State(state): State<ApiState>,
    payload: Result<Json<CurtailmentRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return ApiErrorResponse::bad_request(e.body_text()),
    };
    if request.device_id.trim().is_empty() {
        return ApiErrorResponse::bad_request("device_id must not be empty");
    }
    let Some(commands) = &state.commands else {
        return ApiErrorResponse::service_unavailable("Command endpoints are disabled");
    };

    let device_id = request.device_id.clone();
    if let Err(e) = commands.curtailment.try_send(request) {
        return enqueue_error(&e);
    }
    info!(device_id = %device_id, "[API] Curtailment queued");
    ApiResponse::accepted(CommandAccepted {
        device_id,
        saga: SagaKind::Curtailment,
        queued: true,
    })
}

/// POST /api/v1/commands/cancel
pub async fn cancel(
    State(state): State<ApiState>,
    payload: Result<Json<CancelCurtailmentRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(e) => return ApiErrorResponse::bad_request(e.body_text()),
    };
    if request.device_id.trim().is_empty() {
        return ApiErrorResponse::bad_request("device_id must not be empty");
    }
    let Some(commands) = &state.commands else {
        return ApiErrorResponse::service_unavailable("Command endpoints are disabled");
    };

    let device_id = request.device_id.clone();
    if let Err(e) = commands.cancellation.try_send(request) {
        return enqueue_error(&e);
    }
    info!(device_id = %device_id, "[API] Cancellation queued");
    ApiResponse::accepted(CommandAccepted {
        device_id,
        saga: SagaKind::Compensation,
        queued: true,
    })
}
