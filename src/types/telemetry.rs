//! Telemetry and window result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Wire Record
// ============================================================================

/// Turbine telemetry record as it arrives on the telemetry topic.
///
/// Only `device_id`, `power_output` and (optionally) `timestamp` feed the
/// window store. The remaining turbine channels are accepted so producers can
/// publish the full record, but the core does not use them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Device identifier (e.g. `WIND_ZP_001`)
    pub device_id: String,
    /// Producer timestamp, RFC 3339
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Active power output (kW)
    pub power_output: f64,
    /// Wind speed (m/s)
    #[serde(default)]
    pub wind_speed: Option<f64>,
    /// Wind direction (degrees)
    #[serde(default)]
    pub wind_direction: Option<f64>,
    /// Blade pitch angle (degrees)
    #[serde(default)]
    pub blade_pitch: Option<f64>,
    /// Nacelle vibration (mm/s)
    #[serde(default)]
    pub vibration: Option<f64>,
    /// Generator temperature (°C)
    #[serde(default)]
    pub temperature_generator: Option<f64>,
    /// Gearbox temperature (°C)
    #[serde(default)]
    pub temperature_gearbox: Option<f64>,
}

// ============================================================================
// Window Store Sample
// ============================================================================

/// A single power reading held in a device's window buffer.
///
/// Immutable once created; destroyed on eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub device_id: String,
    /// Power output (kW)
    pub power_output: f64,
    pub observed_at: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn new(device_id: impl Into<String>, power_output: f64, observed_at: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            power_output,
            observed_at,
        }
    }
}

// ============================================================================
// Aggregation Output
// ============================================================================

/// One closed hopping window for a device.
///
/// Only produced when the device already had a cached average from the
/// previous tick, so `ramp_rate_mw_per_min` is always defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub device_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Mean power over the window (kW)
    pub avg_power_kw: f64,
    /// Change in mean power since the previous step (MW/min)
    pub ramp_rate_mw_per_min: f64,
}
