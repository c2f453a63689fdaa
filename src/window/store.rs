//! Per-device sample buffers
//!
//! A sharded concurrent map (`DashMap`) from device id to an independently
//! locked [`DeviceWindowState`]. Appends for one device never contend with
//! another device, and the aggregator locks one device at a time.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::TelemetrySample;

/// Buffered samples and cached aggregation state for one device.
#[derive(Debug, Clone)]
pub struct DeviceWindowState {
    pub device_id: String,
    /// Arrival order, not necessarily `observed_at` order.
    samples: VecDeque<TelemetrySample>,
    /// Average of the most recent non-empty window (kW)
    pub last_window_avg: Option<f64>,
    /// End of the most recent non-empty window
    pub last_window_end: Option<DateTime<Utc>>,
}

impl DeviceWindowState {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            samples: VecDeque::new(),
            last_window_avg: None,
            last_window_end: None,
        }
    }

    pub fn push(&mut self, sample: TelemetrySample) {
        self.samples.push_back(sample);
    }

    pub fn samples(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples with `start <= observed_at <= end`, both ends inclusive.
    pub fn select(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &TelemetrySample> {
        self.samples
            .iter()
            .filter(move |s| s.observed_at >= start && s.observed_at <= end)
    }

    /// Drop every sample with `observed_at < cutoff`. Returns how many went.
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.samples.len();
        self.samples.retain(|s| s.observed_at >= cutoff);
        before - self.samples.len()
    }
}

/// Owned handle to one device's state, valid for as long as it is held.
pub type DeviceHandle = Arc<Mutex<DeviceWindowState>>;

/// Lock a device handle, recovering from poisoning.
///
/// A panic while holding the lock cannot leave a sample half-written, so the
/// inner state is still usable.
pub fn lock_device(handle: &DeviceHandle) -> MutexGuard<'_, DeviceWindowState> {
    handle.lock().unwrap_or_else(|e| {
        tracing::warn!("Device window mutex poisoned, recovering");
        e.into_inner()
    })
}

/// Concurrent per-device window store. No I/O.
#[derive(Debug, Default)]
pub struct WindowStore {
    devices: DashMap<String, DeviceHandle>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create the state for `device_id`.
    pub fn handle(&self, device_id: &str) -> DeviceHandle {
        if let Some(existing) = self.devices.get(device_id) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceWindowState::new(device_id))));
        Arc::clone(entry.value())
    }

    /// Existing state for `device_id`, without creating one.
    pub fn get(&self, device_id: &str) -> Option<DeviceHandle> {
        self.devices.get(device_id).map(|e| Arc::clone(e.value()))
    }

    /// Append a sample in arrival order.
    pub fn append(&self, sample: TelemetrySample) {
        let handle = self.handle(&sample.device_id);
        lock_device(&handle).push(sample);
    }

    /// Copy of the device's samples at call time (empty for unknown devices).
    pub fn snapshot(&self, device_id: &str) -> Vec<TelemetrySample> {
        self.get(device_id)
            .map(|h| lock_device(&h).samples().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove samples with `observed_at < cutoff` for one device.
    pub fn evict_before(&self, device_id: &str, cutoff: DateTime<Utc>) -> usize {
        self.get(device_id)
            .map_or(0, |h| lock_device(&h).evict_before(cutoff))
    }

    /// Ids of every device seen so far.
    pub fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|e| e.key().clone()).collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Total buffered samples across all devices.
    pub fn sample_count(&self) -> usize {
        self.devices
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect::<Vec<_>>()
            .iter()
            .map(|h| lock_device(h).len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_append_preserves_arrival_order() {
        let store = WindowStore::new();
        // Out-of-order observation times stay in arrival order.
        store.append(TelemetrySample::new("D1", 1.0, t0() + Duration::seconds(10)));
        store.append(TelemetrySample::new("D1", 2.0, t0()));
        store.append(TelemetrySample::new("D1", 3.0, t0() + Duration::seconds(5)));

        let values: Vec<f64> = store.snapshot("D1").iter().map(|s| s.power_output).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_snapshot_unknown_device_is_empty() {
        let store = WindowStore::new();
        assert!(store.snapshot("nope").is_empty());
        assert_eq!(store.device_count(), 0);
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn test_evict_before_is_strict() {
        let store = WindowStore::new();
        store.append(TelemetrySample::new("D1", 1.0, t0()));
        store.append(TelemetrySample::new("D1", 2.0, t0() + Duration::minutes(1)));
        store.append(TelemetrySample::new("D1", 3.0, t0() + Duration::minutes(2)));

        let evicted = store.evict_before("D1", t0() + Duration::minutes(1));
        assert_eq!(evicted, 1);
        let remaining: Vec<f64> = store.snapshot("D1").iter().map(|s| s.power_output).collect();
        assert_eq!(remaining, vec![2.0, 3.0]);
        assert_eq!(store.evict_before("unknown", t0()), 0);
    }

    #[test]
    fn test_handle_is_shared() {
        let store = WindowStore::new();
        let a = store.handle("D1");
        let b = store.handle("D1");
        assert!(Arc::ptr_eq(&a, &b));
        lock_device(&a).last_window_avg = Some(42.0);
        assert_eq!(lock_device(&b).last_window_avg, Some(42.0));
    }

    #[test]
    fn test_select_inclusive_bounds() {
        let mut state = DeviceWindowState::new("D1");
        state.push(TelemetrySample::new("D1", 1.0, t0()));
        state.push(TelemetrySample::new("D1", 2.0, t0() + Duration::minutes(10)));
        state.push(TelemetrySample::new("D1", 3.0, t0() + Duration::minutes(11)));
        assert_eq!(state.select(t0(), t0() + Duration::minutes(10)).count(), 2);
    }

    #[test]
    fn test_concurrent_appends_across_devices() {
        let store = Arc::new(WindowStore::new());
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let device = format!("WIND_ZP_{i:03}");
                    for n in 0..250 {
                        store.append(TelemetrySample::new(&device, f64::from(n), t0()));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.device_count(), 8);
        assert_eq!(store.sample_count(), 2_000);
        let values: Vec<f64> = store.snapshot("WIND_ZP_003").iter().map(|s| s.power_output).collect();
        assert_eq!(values, (0..250).map(f64::from).collect::<Vec<_>>());
    }
}
