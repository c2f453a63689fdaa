//! windops: Wind Turbine Telemetry Operations
//!
//! Streaming ramp-rate computation and curtailment orchestration for a fleet
//! of wind turbines.
//!
//! ## Architecture
//!
//! - **Pipeline**: topic demultiplexing onto one worker per inbound channel
//! - **Window Store**: sharded per-device sample buffers
//! - **Ramp-Rate Aggregator**: timer task closing hopping windows
//! - **Saga Orchestrator**: curtailment and compensation state machines
//! - **Storage**: saga log, device status and window results (sled or in-memory)
//! - **API**: read endpoints and operator commands over HTTP

pub mod api;
pub mod config;
pub mod pipeline;
pub mod saga;
pub mod stats;
pub mod storage;
pub mod types;
pub mod window;

// Re-export configuration
pub use config::{AppConfig, ConfigError};

// Re-export commonly used types
pub use types::{
    CancelCurtailmentRequest, CurtailmentRequest, DeviceState, DeviceStatus, SagaKind, SagaStatus,
    SagaStepRecord, TelemetryRecord, TelemetrySample, WindowResult,
};

// Re-export the processing components
pub use pipeline::{IngestError, IngestionDispatcher};
pub use saga::{SagaOrchestrator, SagaOutcome, SagaState};
pub use stats::{PipelineStats, StatsSnapshot};
pub use window::{RampRateAggregator, WindowSettings, WindowStore};

// Re-export storage
pub use storage::{DeviceStatusStore, InMemoryStore, SagaLog, SledStore, StorageError, WindowResultSink};
