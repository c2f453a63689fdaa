//! Observability: health, stats and Prometheus metrics

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt::Write as _;

use super::ApiState;
use crate::api::envelope::ApiResponse;
use crate::stats::StatsSnapshot;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub storage_backend: &'static str,
    pub devices_tracked: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    pub devices_tracked: usize,
    pub samples_buffered: usize,
    pub uptime_secs: i64,
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime_secs(),
        storage_backend: state.saga_log.backend_name(),
        devices_tracked: state.windows.device_count(),
    })
}

/// GET /api/v1/stats
pub async fn stats(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(StatsResponse {
        counters: state.stats.snapshot(),
        devices_tracked: state.windows.device_count(),
        samples_buffered: state.windows.sample_count(),
        uptime_secs: state.uptime_secs(),
    })
}

fn push_metric(body: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(body, "# HELP {name} {help}");
    let _ = writeln!(body, "# TYPE {name} {kind}");
    let _ = writeln!(body, "{name} {value}");
}

/// GET /api/v1/metrics
///
/// Counters in Prometheus text format (version 0.0.4), hand-formatted from
/// [`PipelineStats`](crate::stats::PipelineStats).
pub async fn metrics(State(state): State<ApiState>) -> Response {
    let s = state.stats.snapshot();
    let mut body = String::with_capacity(2048);

    let counters = [
        ("windops_records_received_total", "Inbound records read from the source", s.records_received),
        ("windops_telemetry_routed_total", "Telemetry samples routed to the window store", s.telemetry_routed),
        ("windops_curtailments_routed_total", "Curtailment requests routed", s.curtailments_routed),
        ("windops_cancellations_routed_total", "Cancellation requests routed", s.cancellations_routed),
        ("windops_malformed_records_total", "Records dropped as malformed or unroutable", s.malformed_records),
        ("windops_dropped_records_total", "Records dropped because a worker channel was closed", s.dropped_records),
        ("windops_ticks_total", "Aggregation ticks run", s.ticks),
        ("windops_windows_primed_total", "First windows that only cached an average", s.windows_primed),
        ("windops_windows_skipped_total", "Empty windows skipped", s.windows_skipped),
        ("windops_results_persisted_total", "Window results persisted", s.results_persisted),
        ("windops_persist_failures_total", "Window results that failed to persist", s.persist_failures),
        ("windops_samples_evicted_total", "Samples evicted past retention", s.samples_evicted),
        ("windops_sagas_completed_total", "Sagas that reached their final step", s.sagas_completed),
        ("windops_sagas_halted_total", "Sagas halted by a failed step", s.sagas_halted),
    ];
    for (name, help, value) in counters {
        push_metric(&mut body, name, "counter", help, value);
    }

    push_metric(&mut body, "windops_devices_tracked", "gauge", "Devices with buffered state", state.windows.device_count());
    push_metric(&mut body, "windops_samples_buffered", "gauge", "Samples held across all devices", state.windows.sample_count());
    push_metric(&mut body, "windops_uptime_seconds", "gauge", "Process uptime in seconds", state.uptime_secs());

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
