//! Hopping-window aggregation
//!
//! - `store`: per-device sample buffers (sharded, per-key locking)
//! - `aggregator`: timer-driven window close, ramp-rate calculation, eviction

pub mod aggregator;
pub mod store;

pub use aggregator::{
    mean_power, ramp_rate_mw_per_min, DeviceOutcome, RampRateAggregator, TickSummary,
    WindowSettings,
};
pub use store::{lock_device, DeviceHandle, DeviceWindowState, WindowStore};
