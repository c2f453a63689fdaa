//! Runtime counters shared by the dispatcher, workers, aggregator and sagas
//!
//! Lock-free `AtomicU64`s so every task can bump them without coordination.
//! `snapshot()` produces a serializable copy for the API and shutdown summary.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    // Ingestion
    pub records_received: AtomicU64,
    pub telemetry_routed: AtomicU64,
    pub curtailments_routed: AtomicU64,
    pub cancellations_routed: AtomicU64,
    pub malformed_records: AtomicU64,
    pub dropped_records: AtomicU64,
    pub samples_appended: AtomicU64,

    // Aggregation
    pub ticks: AtomicU64,
    pub windows_primed: AtomicU64,
    pub windows_skipped: AtomicU64,
    pub results_persisted: AtomicU64,
    pub persist_failures: AtomicU64,
    pub samples_evicted: AtomicU64,

    // Sagas
    pub sagas_completed: AtomicU64,
    pub sagas_halted: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub records_received: u64,
    pub telemetry_routed: u64,
    pub curtailments_routed: u64,
    pub cancellations_routed: u64,
    pub malformed_records: u64,
    pub dropped_records: u64,
    pub samples_appended: u64,
    pub ticks: u64,
    pub windows_primed: u64,
    pub windows_skipped: u64,
    pub results_persisted: u64,
    pub persist_failures: u64,
    pub samples_evicted: u64,
    pub sagas_completed: u64,
    pub sagas_halted: u64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            records_received: load(&self.records_received),
            telemetry_routed: load(&self.telemetry_routed),
            curtailments_routed: load(&self.curtailments_routed),
            cancellations_routed: load(&self.cancellations_routed),
            malformed_records: load(&self.malformed_records),
            dropped_records: load(&self.dropped_records),
            samples_appended: load(&self.samples_appended),
            ticks: load(&self.ticks),
            windows_primed: load(&self.windows_primed),
            windows_skipped: load(&self.windows_skipped),
            results_persisted: load(&self.results_persisted),
            persist_failures: load(&self.persist_failures),
            samples_evicted: load(&self.samples_evicted),
            sagas_completed: load(&self.sagas_completed),
            sagas_halted: load(&self.sagas_halted),
        }
    }
}
