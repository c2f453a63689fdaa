//! Sink traits for pluggable storage backends
//!
//! Abstracts the three durable sinks so backends can be swapped without
//! touching the aggregator or saga code:
//! - `InMemoryStore`: in-memory backend for tests and `--memory` runs
//! - `SledStore`: durable backend (see `sled_store`)

use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::{DeviceStatus, SagaStepRecord, WindowResult};

/// Append-only saga audit log, keyed by `(saga_id, timestamp)`.
///
/// The orchestrator only appends. Reads exist for audit tooling and the API.
pub trait SagaLog: Send + Sync {
    /// Append one step record. Never overwrites.
    fn append(&self, record: &SagaStepRecord) -> Result<(), StorageError>;

    /// All entries for one saga, oldest first.
    fn entries_for_saga(&self, saga_id: &str) -> Result<Vec<SagaStepRecord>, StorageError>;

    /// All entries for one device across every saga, oldest first.
    fn entries_for_device(&self, device_id: &str) -> Result<Vec<SagaStepRecord>, StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Current status per device, upsert semantics.
pub trait DeviceStatusStore: Send + Sync {
    /// Insert or replace the status row for `status.device_id`.
    fn upsert(&self, status: &DeviceStatus) -> Result<(), StorageError>;

    /// Point read by device id.
    fn get(&self, device_id: &str) -> Result<Option<DeviceStatus>, StorageError>;
}

/// Window results table keyed by `(device_id, window_start)`.
pub trait WindowResultSink: Send + Sync {
    /// Insert one result.
    fn insert(&self, result: &WindowResult) -> Result<(), StorageError>;

    /// Most recent results for a device, newest first.
    fn results_for_device(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<WindowResult>, StorageError>;
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("duplicate key: {0}")]
    Duplicate(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// In-memory backend for testing and minimal deployments
///
/// Thread-safe via `RwLock`. Not durable; data is lost on restart.
pub struct InMemoryStore {
    saga_log: RwLock<Vec<SagaStepRecord>>,
    statuses: RwLock<HashMap<String, DeviceStatus>>,
    results: RwLock<Vec<WindowResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            saga_log: RwLock::new(Vec::new()),
            statuses: RwLock::new(HashMap::new()),
            results: RwLock::new(Vec::new()),
        }
    }

    /// Total saga log entries across all sagas.
    pub fn saga_log_len(&self) -> usize {
        self.saga_log.read().map(|log| log.len()).unwrap_or(0)
    }

    /// Total window results across all devices.
    pub fn result_count(&self) -> usize {
        self.results.read().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_by_time(mut records: Vec<SagaStepRecord>) -> Vec<SagaStepRecord> {
    records.sort_by_key(|r| r.timestamp);
    records
}

impl SagaLog for InMemoryStore {
    fn append(&self, record: &SagaStepRecord) -> Result<(), StorageError> {
        let mut log = self
            .saga_log
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;

        if log
            .iter()
            .any(|r| r.saga_id == record.saga_id && r.timestamp == record.timestamp)
        {
            return Err(StorageError::Duplicate(format!(
                "{}@{}",
                record.saga_id,
                record.timestamp.to_rfc3339()
            )));
        }

        log.push(record.clone());
        Ok(())
    }

    fn entries_for_saga(&self, saga_id: &str) -> Result<Vec<SagaStepRecord>, StorageError> {
        let log = self
            .saga_log
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;

        Ok(sorted_by_time(
            log.iter().filter(|r| r.saga_id == saga_id).cloned().collect(),
        ))
    }

    fn entries_for_device(&self, device_id: &str) -> Result<Vec<SagaStepRecord>, StorageError> {
        let log = self
            .saga_log
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;

        Ok(sorted_by_time(
            log.iter().filter(|r| r.device_id == device_id).cloned().collect(),
        ))
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

impl DeviceStatusStore for InMemoryStore {
    fn upsert(&self, status: &DeviceStatus) -> Result<(), StorageError> {
        let mut statuses = self
            .statuses
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;

        statuses.insert(status.device_id.clone(), status.clone());
        Ok(())
    }

    fn get(&self, device_id: &str) -> Result<Option<DeviceStatus>, StorageError> {
        let statuses = self
            .statuses
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;

        Ok(statuses.get(device_id).cloned())
    }
}

impl WindowResultSink for InMemoryStore {
    fn insert(&self, result: &WindowResult) -> Result<(), StorageError> {
        let mut results = self
            .results
            .write()
            .map_err(|e| StorageError::Storage(e.to_string()))?;

        results.push(result.clone());
        Ok(())
    }

    fn results_for_device(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<WindowResult>, StorageError> {
        let results = self
            .results
            .read()
            .map_err(|e| StorageError::Storage(e.to_string()))?;

        let mut matching: Vec<WindowResult> = results
            .iter()
            .filter(|r| r.device_id == device_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.window_start.cmp(&a.window_start));
        matching.truncate(limit);
        Ok(matching)
    }
}
