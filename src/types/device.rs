//! Device operating status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating state of a turbine as far as curtailment is concerned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    #[default]
    Active,
    Curtailed,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Active => write!(f, "ACTIVE"),
            DeviceState::Curtailed => write!(f, "CURTAILED"),
        }
    }
}

/// Current status row for a device. One per device, last writer wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub status: DeviceState,
    pub last_updated: DateTime<Utc>,
}
