//! Durable sink backend on Sled DB
//!
//! One database with three named trees:
//! - `saga_log`: key = `saga_id \0 timestamp_nanos_be`, insert-only
//! - `device_status`: key = `device_id`, upsert
//! - `window_results`: key = `device_id \0 window_start_nanos_be`, insert-only
//!
//! Values are JSON. Big-endian nanosecond suffixes make prefix scans return
//! entries in chronological order.

use chrono::{DateTime, Utc};
use sled::Tree;
use std::path::Path;

use super::persistence::{DeviceStatusStore, SagaLog, StorageError, WindowResultSink};
use crate::types::{DeviceStatus, SagaStepRecord, WindowResult};

const SAGA_LOG_TREE: &str = "saga_log";
const DEVICE_STATUS_TREE: &str = "device_status";
const WINDOW_RESULTS_TREE: &str = "window_results";

/// Sled-backed implementation of all three sinks.
#[derive(Clone)]
pub struct SledStore {
    db: sled::Db,
    saga_log: Tree,
    statuses: Tree,
    results: Tree,
}

fn nanos_be(ts: DateTime<Utc>) -> [u8; 8] {
    // Pre-epoch timestamps are clamped to zero so keys stay unsigned.
    let nanos = ts
        .timestamp_nanos_opt()
        .unwrap_or_else(|| ts.timestamp().saturating_mul(1_000_000_000));
    u64::try_from(nanos).unwrap_or(0).to_be_bytes()
}

fn prefix(id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(id.len() + 9);
    key.extend_from_slice(id.as_bytes());
    key.push(0);
    key
}

fn composite_key(id: &str, ts: DateTime<Utc>) -> Vec<u8> {
    let mut key = prefix(id);
    key.extend_from_slice(&nanos_be(ts));
    key
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        let saga_log = db.open_tree(SAGA_LOG_TREE)?;
        let statuses = db.open_tree(DEVICE_STATUS_TREE)?;
        let results = db.open_tree(WINDOW_RESULTS_TREE)?;

        tracing::info!(
            path = %path_ref.display(),
            saga_entries = saga_log.len(),
            devices = statuses.len(),
            window_results = results.len(),
            "Sled store opened"
        );

        Ok(Self {
            db,
            saga_log,
            statuses,
            results,
        })
    }

    /// Flush pending writes to disk
    ///
    /// Writes are not flushed individually; sled flushes in the background
    /// and this is called on shutdown.
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Get database size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    fn decode_all<T: serde::de::DeserializeOwned>(
        iter: impl Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>,
    ) -> Result<Vec<T>, StorageError> {
        let mut out = Vec::new();
        for item in iter {
            let (_key, value) = item?;
            match serde_json::from_slice::<T>(&value) {
                Ok(decoded) => out.push(decoded),
                Err(e) => {
                    tracing::warn!("Skipping undecodable entry: {}", e);
                }
            }
        }
        Ok(out)
    }
}

impl SagaLog for SledStore {
    fn append(&self, record: &SagaStepRecord) -> Result<(), StorageError> {
        let key = composite_key(&record.saga_id, record.timestamp);
        let value = serde_json::to_vec(record)?;

        // Insert-only: refuse to overwrite an existing step.
        match self.saga_log.compare_and_swap(key, None as Option<&[u8]>, Some(value))? {
            Ok(()) => Ok(()),
            Err(_) => Err(StorageError::Duplicate(format!(
                "{}@{}",
                record.saga_id,
                record.timestamp.to_rfc3339()
            ))),
        }
    }

    fn entries_for_saga(&self, saga_id: &str) -> Result<Vec<SagaStepRecord>, StorageError> {
        Self::decode_all(self.saga_log.scan_prefix(prefix(saga_id)))
    }

    fn entries_for_device(&self, device_id: &str) -> Result<Vec<SagaStepRecord>, StorageError> {
        let mut entries: Vec<SagaStepRecord> = Self::decode_all(self.saga_log.iter())?
            .into_iter()
            .filter(|r: &SagaStepRecord| r.device_id == device_id)
            .collect();
        entries.sort_by_key(|r| r.timestamp);
        Ok(entries)
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}

impl DeviceStatusStore for SledStore {
    fn upsert(&self, status: &DeviceStatus) -> Result<(), StorageError> {
        let value = serde_json::to_vec(status)?;
        self.statuses.insert(status.device_id.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, device_id: &str) -> Result<Option<DeviceStatus>, StorageError> {
        match self.statuses.get(device_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl WindowResultSink for SledStore {
    fn insert(&self, result: &WindowResult) -> Result<(), StorageError> {
        let key = composite_key(&result.device_id, result.window_start);
        let value = serde_json::to_vec(result)?;
        self.results.insert(key, value)?;
        Ok(())
    }

    fn results_for_device(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<WindowResult>, StorageError> {
        Self::decode_all(
            self.results
                .scan_prefix(prefix(device_id))
                .rev()
                .take(limit),
        )
    }
}
