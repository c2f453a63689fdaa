//! API request handlers
//!
//! - `devices`: per-device reads
//! - `commands`: curtail / cancel submission
//! - `metrics`: health, stats and Prometheus text

mod commands;
mod devices;
mod metrics;

pub use commands::{cancel, curtail, CommandAccepted};
pub use devices::{device_ramp_rates, device_saga_log, device_status, device_window, LimitQuery, WindowView};
pub use metrics::{health, metrics, stats, HealthResponse, StatsResponse};

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::pipeline::WorkerSenders;
use crate::stats::PipelineStats;
use crate::storage::{DeviceStatusStore, SagaLog, WindowResultSink};
use crate::window::WindowStore;

/// Shared state for every handler.
#[derive(Clone)]
pub struct ApiState {
    pub windows: Arc<WindowStore>,
    pub statuses: Arc<dyn DeviceStatusStore>,
    pub saga_log: Arc<dyn SagaLog>,
    pub results: Arc<dyn WindowResultSink>,
    pub stats: Arc<PipelineStats>,
    /// Worker channels for operator commands. `None` disables the command endpoints.
    pub commands: Option<WorkerSenders>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
