//! Saga commands and audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Commands
// ============================================================================

/// Request to curtail a device's power output (forward saga).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurtailmentRequest {
    pub device_id: String,
    pub reason: String,
}

/// Request to restore a device (compensation saga).
///
/// Not tied to any particular curtailment saga; it may be issued at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCurtailmentRequest {
    pub device_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// Saga Log
// ============================================================================

/// Which state machine a saga runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaKind {
    Curtailment,
    Compensation,
}

impl std::fmt::Display for SagaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SagaKind::Curtailment => write!(f, "CURTAILMENT"),
            SagaKind::Compensation => write!(f, "COMPENSATION"),
        }
    }
}

/// Status recorded in a saga log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    Started,
    CurtailedStatusWritten,
    Completed,
    CompensationStarted,
    ActiveStatusWritten,
    CompensationCompleted,
}

impl SagaStatus {
    /// Wire / log representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            SagaStatus::Started => "STARTED",
            SagaStatus::CurtailedStatusWritten => "CURTAILED_STATUS_WRITTEN",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::CompensationStarted => "COMPENSATION_STARTED",
            SagaStatus::ActiveStatusWritten => "ACTIVE_STATUS_WRITTEN",
            SagaStatus::CompensationCompleted => "COMPENSATION_COMPLETED",
        }
    }

    /// Step name stored alongside the status.
    pub const fn step_name(self) -> &'static str {
        match self {
            SagaStatus::Started => "step_1",
            SagaStatus::CurtailedStatusWritten => "step_2",
            SagaStatus::Completed => "step_3",
            SagaStatus::CompensationStarted => "compensation_step_1",
            SagaStatus::ActiveStatusWritten => "compensation_step_2",
            SagaStatus::CompensationCompleted => "compensation_step_3",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One append-only saga log entry. Keyed by `(saga_id, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaStepRecord {
    pub saga_id: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub status: SagaStatus,
    pub step_name: String,
    pub details: String,
}
