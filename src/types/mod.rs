//! Shared data structures for turbine telemetry and curtailment orchestration
//!
//! This module defines the core types that flow through the pipeline:
//! - Telemetry: TelemetryRecord (wire) → TelemetrySample (window store)
//! - Aggregation: WindowResult (ramp-rate output)
//! - Sagas: CurtailmentRequest / CancelCurtailmentRequest → SagaStepRecord
//! - Device: DeviceStatus (current operating state per device)

mod device;
mod saga;
mod telemetry;

pub use device::*;
pub use saga::*;
pub use telemetry::*;
