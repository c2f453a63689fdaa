//! System-wide default constants.
//!
//! Reference values for the windowing and ingestion subsystems. Every one of
//! these can be overridden from `windops.toml` or the environment.

// ============================================================================
// Hopping Windows
// ============================================================================

/// Window size (seconds). 600 = 10 minutes.
pub const WINDOW_SIZE_SECS: u64 = 600;

/// Window step (seconds). 120 = 2 minutes.
///
/// Ramp rate is the change in window average per step, so this is also the
/// denominator of the ramp-rate calculation.
pub const WINDOW_STEP_SECS: u64 = 120;

/// Retention as a multiple of the window size.
///
/// 1.5 × 10 min = 15 min of samples kept after each aggregation pass.
pub const RETENTION_MULTIPLIER: f64 = 1.5;

/// Smallest retention multiplier that still covers the next window's lookback.
pub const MIN_RETENTION_MULTIPLIER: f64 = 1.5;

/// Aggregation tick period (seconds). Matches the window step.
pub const TICK_INTERVAL_SECS: u64 = 120;

/// Upper bound for window size, step and tick period (seconds). 7 days.
pub const MAX_WINDOW_SECS: u64 = 604_800;

/// Upper bound for retention, `size × multiplier` (seconds). 30 days.
pub const MAX_RETENTION_SECS: u64 = 2_592_000;

// ============================================================================
// Ingestion
// ============================================================================

/// Topic carrying turbine telemetry records.
pub const TELEMETRY_TOPIC: &str = "turbine_telemetry";

/// Topic carrying curtailment requests.
pub const CURTAILMENT_TOPIC: &str = "curtailment_requests";

/// Topic carrying curtailment cancellations.
pub const CANCELLATION_TOPIC: &str = "cancel_curtailment";

/// Bounded capacity of each worker channel.
pub const CHANNEL_CAPACITY: usize = 1_024;

// ============================================================================
// Storage / Server
// ============================================================================

/// Default Sled database directory.
pub const DATA_DIR: &str = "./data/windops.db";

/// Default HTTP bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Default number of window results returned by the API.
pub const API_RESULT_LIMIT: usize = 50;

// ============================================================================
// Unit Conversion
// ============================================================================

/// kW per MW.
pub const KW_PER_MW: f64 = 1_000.0;
