//! Ramp-Rate Aggregator
//!
//! Timer-driven job that closes one hopping window per device per tick:
//!
//! ```text
//! window_end   = now
//! window_start = now - window_size
//! avg          = mean(power_output where window_start <= observed_at <= window_end)
//! ramp_rate    = ((avg - prev_avg) / 1000) / step_minutes     (MW/min)
//! ```
//!
//! A device's first non-empty window only primes the cached average; a
//! `WindowResult` is emitted from the second consecutive non-empty window on.
//! An empty window is skipped outright and leaves the cached average alone.
//!
//! Persistence failures are isolated per device: one bad write never stops
//! the rest of the tick.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::store::{lock_device, DeviceHandle, WindowStore};
use crate::config::defaults::{KW_PER_MW, MAX_RETENTION_SECS, MAX_WINDOW_SECS};
use crate::config::WindowConfig;
use crate::stats::PipelineStats;
use crate::storage::WindowResultSink;
use crate::types::{TelemetrySample, WindowResult};

// ============================================================================
// Settings
// ============================================================================

/// Window geometry used by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    pub window_size: Duration,
    pub step: Duration,
    pub retention: Duration,
}

impl WindowSettings {
    /// Durations are clamped to the validated upper bounds so they always
    /// fit in a `TimeDelta`.
    pub fn from_config(config: &WindowConfig) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let retention_ms = (config.size_secs as f64 * config.retention_multiplier * 1_000.0)
            .clamp(0.0, MAX_RETENTION_SECS as f64 * 1_000.0)
            .round() as i64;

        Self {
            window_size: clamped_seconds(config.size_secs),
            step: clamped_seconds(config.step_secs),
            retention: Duration::try_milliseconds(retention_ms).unwrap_or_else(Duration::zero),
        }
    }

    /// Step length in minutes, the ramp-rate denominator.
    pub fn step_minutes(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let ms = self.step.num_milliseconds() as f64;
        ms / 60_000.0
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self::from_config(&WindowConfig::default())
    }
}

// ============================================================================
// Pure calculations
// ============================================================================

/// Mean power of `samples`, or `None` when there are none.
///
/// `None` is the empty-window condition; it is not the same as a zero mean.
pub fn mean_power<'a>(samples: impl IntoIterator<Item = &'a TelemetrySample>) -> Option<f64> {
    let (sum, count) = samples
        .into_iter()
        .fold((0.0_f64, 0_u32), |(sum, n), s| (sum + s.power_output, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / f64::from(count))
    }
}

/// Ramp rate in MW/min between two consecutive window averages in kW.
pub fn ramp_rate_mw_per_min(prev_avg_kw: f64, avg_kw: f64, step_minutes: f64) -> f64 {
    ((avg_kw - prev_avg_kw) / KW_PER_MW) / step_minutes
}

// ============================================================================
// Tick bookkeeping
// ============================================================================

/// What happened to one device during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOutcome {
    /// No samples inside the window
    EmptyWindow,
    /// First non-empty window; average cached, nothing emitted
    Primed,
    /// Result emitted and persisted
    Persisted,
    /// Result computed but the sink rejected it
    PersistFailed,
}

/// Summary of one aggregation tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickSummary {
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub devices: usize,
    pub empty_windows: usize,
    pub primed: usize,
    pub persisted: usize,
    pub persist_failures: usize,
    pub samples_evicted: usize,
    /// Every result computed this tick, including ones that failed to persist
    pub results: Vec<WindowResult>,
}

impl TickSummary {
    fn record(&mut self, outcome: DeviceOutcome) {
        match outcome {
            DeviceOutcome::EmptyWindow => self.empty_windows += 1,
            DeviceOutcome::Primed => self.primed += 1,
            DeviceOutcome::Persisted => self.persisted += 1,
            DeviceOutcome::PersistFailed => self.persist_failures += 1,
        }
    }
}

fn clamped_seconds(secs: u64) -> Duration {
    i64::try_from(secs.min(MAX_WINDOW_SECS))
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(Duration::zero)
}

// ============================================================================
// Aggregator
// ============================================================================

/// Closes hopping windows over a [`WindowStore`] and writes ramp rates to a sink.
pub struct RampRateAggregator {
    store: Arc<WindowStore>,
    sink: Arc<dyn WindowResultSink>,
    settings: WindowSettings,
    stats: Arc<PipelineStats>,
}

impl RampRateAggregator {
    pub fn new(
        store: Arc<WindowStore>,
        sink: Arc<dyn WindowResultSink>,
        settings: WindowSettings,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            store,
            sink,
            settings,
            stats,
        }
    }

    /// Run one aggregation pass with `now` as the window end.
    pub fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let window_end = now;
        let (Some(window_start), Some(cutoff)) = (
            now.checked_sub_signed(self.settings.window_size),
            now.checked_sub_signed(self.settings.retention),
        ) else {
            warn!(now = %now, "Window bounds out of range, skipping tick");
            return TickSummary::default();
        };

        let mut summary = TickSummary {
            window_start: Some(window_start),
            window_end: Some(window_end),
            ..TickSummary::default()
        };

        for device_id in self.store.device_ids() {
            let handle = self.store.handle(&device_id);
            summary.devices += 1;

            let (computed, evicted) = self.close_window(&handle, window_start, window_end, cutoff);
            summary.samples_evicted += evicted;

            let outcome = match computed {
                Closed::Empty => DeviceOutcome::EmptyWindow,
                Closed::Primed { avg } => {
                    debug!(device_id = %device_id, avg_power_kw = avg, "First window average cached");
                    DeviceOutcome::Primed
                }
                Closed::Ready(result) => {
                    let outcome = self.persist(&result);
                    summary.results.push(result);
                    outcome
                }
            };
            summary.record(outcome);
        }

        PipelineStats::incr(&self.stats.ticks);
        PipelineStats::add(&self.stats.windows_skipped, summary.empty_windows as u64);
        PipelineStats::add(&self.stats.windows_primed, summary.primed as u64);
        PipelineStats::add(&self.stats.results_persisted, summary.persisted as u64);
        PipelineStats::add(&self.stats.persist_failures, summary.persist_failures as u64);
        PipelineStats::add(&self.stats.samples_evicted, summary.samples_evicted as u64);

        summary
    }

    /// Compute the window for one device under its lock, update the cached
    /// average, and evict stale samples. Persistence happens after the lock
    /// is released.
    fn close_window(
        &self,
        handle: &DeviceHandle,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> (Closed, usize) {
        let mut state = lock_device(handle);

        let avg = mean_power(state.select(window_start, window_end));
        let closed = match avg {
            None => Closed::Empty,
            Some(avg) => {
                let previous = state.last_window_avg;
                state.last_window_avg = Some(avg);
                state.last_window_end = Some(window_end);

                match previous {
                    None => Closed::Primed { avg },
                    Some(prev_avg) => Closed::Ready(WindowResult {
                        device_id: state.device_id.clone(),
                        window_start,
                        window_end,
                        avg_power_kw: avg,
                        ramp_rate_mw_per_min: ramp_rate_mw_per_min(
                            prev_avg,
                            avg,
                            self.settings.step_minutes(),
                        ),
                    }),
                }
            }
        };

        // Eviction runs for every device, empty window or not, so a device
        // that stops reporting does not pin its samples forever.
        let evicted = state.evict_before(cutoff);
        (closed, evicted)
    }

    fn persist(&self, result: &WindowResult) -> DeviceOutcome {
        match self.sink.insert(result) {
            Ok(()) => {
                info!(
                    device_id = %result.device_id,
                    window_start = %result.window_start,
                    window_end = %result.window_end,
                    avg_power_kw = format!("{:.2}", result.avg_power_kw),
                    ramp_rate_mw_per_min = format!("{:.4}", result.ramp_rate_mw_per_min),
                    "Ramp rate persisted"
                );
                DeviceOutcome::Persisted
            }
            Err(e) => {
                warn!(
                    device_id = %result.device_id,
                    window_start = %result.window_start,
                    error = %e,
                    "Failed to persist ramp rate, continuing with next device"
                );
                DeviceOutcome::PersistFailed
            }
        }
    }

    /// Tick every `tick_interval` until cancelled.
    ///
    /// The first tick fires one full interval after start, not immediately.
    pub async fn run(self, tick_interval: std::time::Duration, cancel_token: CancellationToken) {
        info!(
            "[Aggregator] Task starting: window={}s step={}s retention={}s tick={:?}",
            self.settings.window_size.num_seconds(),
            self.settings.step.num_seconds(),
            self.settings.retention.num_seconds(),
            tick_interval
        );

        let start = tokio::time::Instant::now() + tick_interval;
        let mut interval = tokio::time::interval_at(start, tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticks_run = 0u64;

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("[Aggregator] Received shutdown signal after {} ticks", ticks_run);
                    return;
                }
                _ = interval.tick() => {
                    let summary = self.tick(Utc::now());
                    ticks_run += 1;
                    info!(
                        devices = summary.devices,
                        persisted = summary.persisted,
                        primed = summary.primed,
                        empty = summary.empty_windows,
                        failures = summary.persist_failures,
                        evicted = summary.samples_evicted,
                        "[Aggregator] Tick complete"
                    );
                }
            }
        }
    }
}

/// Result of closing one device's window, before persistence.
enum Closed {
    Empty,
    Primed { avg: f64 },
    Ready(WindowResult),
}
