//! Saga Orchestrator
//!
//! Executes the effects produced by [`transition`] against the saga log and
//! the device status store. Every saga gets a fresh v4 UUID and writes its
//! log entries with strictly increasing timestamps, so `(saga_id, timestamp)`
//! stays unique even when two steps land in the same millisecond.
//!
//! A failed step halts the saga. Whatever was already written stays written;
//! no compensation is started automatically.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::machine::{transition, SagaEffect, SagaEvent, SagaState};
use crate::stats::PipelineStats;
use crate::storage::{DeviceStatusStore, SagaLog, StorageError};
use crate::types::{
    CancelCurtailmentRequest, CurtailmentRequest, DeviceState, DeviceStatus, SagaKind, SagaStatus,
    SagaStepRecord,
};

/// Final report for one saga run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaOutcome {
    pub saga_id: String,
    pub device_id: String,
    pub kind: SagaKind,
    pub state: SagaState,
    /// Log entries actually appended, in order
    pub steps: Vec<SagaStepRecord>,
    /// Error that halted the saga, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SagaOutcome {
    pub fn is_completed(&self) -> bool {
        self.state == SagaState::Completed
    }
}

/// One in-flight saga.
struct SagaInstance {
    saga_id: String,
    kind: SagaKind,
    device_id: String,
    reason: Option<String>,
    last_timestamp: Option<DateTime<Utc>>,
    steps: Vec<SagaStepRecord>,
}

impl SagaInstance {
    fn new(kind: SagaKind, device_id: &str, reason: Option<&str>) -> Self {
        Self {
            saga_id: Uuid::new_v4().to_string(),
            kind,
            device_id: device_id.to_string(),
            reason: reason.map(str::to_string),
            last_timestamp: None,
            steps: Vec::with_capacity(3),
        }
    }

    /// Wall clock, bumped by 1 ms when it has not advanced past the previous entry.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(prev) if now <= prev => prev + Duration::milliseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }

    fn details(&self, status: SagaStatus) -> String {
        let id = &self.device_id;
        match status {
            SagaStatus::Started => format!(
                "Saga started for device {id}, reason: {}",
                self.reason.as_deref().unwrap_or_default()
            ),
            SagaStatus::CompensationStarted => format!(
                "Compensation started for device {id}, reason: {}",
                self.reason.as_deref().unwrap_or("N/A")
            ),
            SagaStatus::CurtailedStatusWritten => format!("Device {id} status set to CURTAILED"),
            SagaStatus::ActiveStatusWritten => format!("Device {id} status set to ACTIVE"),
            SagaStatus::Completed => format!("Saga completed for device {id}"),
            SagaStatus::CompensationCompleted => format!("Compensation completed for device {id}"),
        }
    }

    fn into_outcome(self, state: SagaState, error: Option<String>) -> SagaOutcome {
        SagaOutcome {
            saga_id: self.saga_id,
            device_id: self.device_id,
            kind: self.kind,
            state,
            steps: self.steps,
            error,
        }
    }
}

/// Runs curtailment and compensation sagas.
///
/// Sagas for the same device are not serialized against each other; if a
/// curtail and a cancel race, the later status write wins.
pub struct SagaOrchestrator {
    log: Arc<dyn SagaLog>,
    statuses: Arc<dyn DeviceStatusStore>,
    stats: Arc<PipelineStats>,
}

impl SagaOrchestrator {
    pub fn new(
        log: Arc<dyn SagaLog>,
        statuses: Arc<dyn DeviceStatusStore>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self { log, statuses, stats }
    }

    /// Forward saga: mark the device CURTAILED.
    pub fn curtail(&self, request: &CurtailmentRequest) -> SagaOutcome {
        self.drive(SagaKind::Curtailment, &request.device_id, Some(&request.reason))
    }

    /// Compensation saga: mark the device ACTIVE. Valid whatever the current status.
    pub fn cancel(&self, request: &CancelCurtailmentRequest) -> SagaOutcome {
        self.drive(SagaKind::Compensation, &request.device_id, request.reason.as_deref())
    }

    fn drive(&self, kind: SagaKind, device_id: &str, reason: Option<&str>) -> SagaOutcome {
        let mut saga = SagaInstance::new(kind, device_id, reason);
        info!(
            saga_id = %saga.saga_id,
            device_id = %device_id,
            kind = %kind,
            "[Saga] Starting"
        );

        let (mut state, mut effect) = transition(kind, SagaState::initial(), SagaEvent::Begin);
        let mut error = None;

        loop {
            let result = match effect {
                SagaEffect::Record(status) => self.record(&mut saga, status),
                SagaEffect::WriteStatus(target) => self.write_status(&saga, target),
                SagaEffect::Finish | SagaEffect::Halt | SagaEffect::Ignore => break,
            };

            let event = match result {
                Ok(()) => SagaEvent::StepSucceeded,
                Err(e) => {
                    warn!(
                        saga_id = %saga.saga_id,
                        device_id = %device_id,
                        kind = %kind,
                        effect = ?effect,
                        error = %e,
                        "[Saga] Step failed, halting"
                    );
                    error = Some(e.to_string());
                    SagaEvent::StepFailed
                }
            };
            (state, effect) = transition(kind, state, event);
        }

        match state {
            SagaState::Completed => {
                PipelineStats::incr(&self.stats.sagas_completed);
                info!(
                    saga_id = %saga.saga_id,
                    device_id = %device_id,
                    kind = %kind,
                    "[Saga] Completed"
                );
            }
            _ => {
                PipelineStats::incr(&self.stats.sagas_halted);
                warn!(
                    saga_id = %saga.saga_id,
                    device_id = %device_id,
                    state = ?state,
                    "[Saga] Halted"
                );
            }
        }

        saga.into_outcome(state, error)
    }

    fn record(&self, saga: &mut SagaInstance, status: SagaStatus) -> Result<(), StorageError> {
        let entry = SagaStepRecord {
            saga_id: saga.saga_id.clone(),
            timestamp: saga.next_timestamp(),
            device_id: saga.device_id.clone(),
            status,
            step_name: status.step_name().to_string(),
            details: saga.details(status),
        };
        self.log.append(&entry)?;
        saga.steps.push(entry);
        Ok(())
    }

    fn write_status(&self, saga: &SagaInstance, target: DeviceState) -> Result<(), StorageError> {
        self.statuses.upsert(&DeviceStatus {
            device_id: saga.device_id.clone(),
            status: target,
            last_updated: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saga::SagaPhase;
    use crate::storage::InMemoryStore;

    fn orchestrator() -> (Arc<InMemoryStore>, SagaOrchestrator) {
        let store = Arc::new(InMemoryStore::new());
        let orch = SagaOrchestrator::new(store.clone(), store.clone(), Arc::new(PipelineStats::new()));
        (store, orch)
    }

    fn curtail_req(device: &str) -> CurtailmentRequest {
        CurtailmentRequest {
            device_id: device.to_string(),
            reason: "grid congestion".to_string(),
        }
    }

    /// Status store that always fails.
    struct BrokenStatusStore;

    impl DeviceStatusStore for BrokenStatusStore {
        fn upsert(&self, _status: &DeviceStatus) -> Result<(), StorageError> {
            Err(StorageError::Storage("disk full".to_string()))
        }

        fn get(&self, _device_id: &str) -> Result<Option<DeviceStatus>, StorageError> {
            Ok(None)
        }
    }

    /// Saga log that accepts `limit` appends, then fails.
    struct FlakyLog {
        inner: InMemoryStore,
        limit: usize,
    }

    impl SagaLog for FlakyLog {
        fn append(&self, record: &SagaStepRecord) -> Result<(), StorageError> {
            if self.inner.saga_log_len() >= self.limit {
                return Err(StorageError::Storage("log unavailable".to_string()));
            }
            self.inner.append(record)
        }

        fn entries_for_saga(&self, saga_id: &str) -> Result<Vec<SagaStepRecord>, StorageError> {
            self.inner.entries_for_saga(saga_id)
        }

        fn entries_for_device(&self, device_id: &str) -> Result<Vec<SagaStepRecord>, StorageError> {
            self.inner.entries_for_device(device_id)
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    #[test]
    fn test_curtailment_writes_three_ordered_entries() {
        let (store, orch) = orchestrator();
        let outcome = orch.curtail(&curtail_req("WIND_ZP_001"));

        assert!(outcome.is_completed());
        assert!(Uuid::parse_str(&outcome.saga_id).is_ok());

        let entries = store.entries_for_saga(&outcome.saga_id).unwrap();
        let statuses: Vec<SagaStatus> = entries.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![SagaStatus::Started, SagaStatus::CurtailedStatusWritten, SagaStatus::Completed]
        );
        assert!(entries.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(entries[0].step_name, "step_1");
        assert_eq!(
            entries[0].details,
            "Saga started for device WIND_ZP_001, reason: grid congestion"
        );
        assert_eq!(entries[1].details, "Device WIND_ZP_001 status set to CURTAILED");
        assert_eq!(entries[2].details, "Saga completed for device WIND_ZP_001");

        let status = store.get("WIND_ZP_001").unwrap().unwrap();
        assert_eq!(status.status, DeviceState::Curtailed);
    }

    #[test]
    fn test_cancel_without_reason_on_active_device() {
        let (store, orch) = orchestrator();
        let earlier = Utc::now() - Duration::hours(1);
        store
            .upsert(&DeviceStatus {
                device_id: "D9".to_string(),
                status: DeviceState::Active,
                last_updated: earlier,
            })
            .unwrap();

        let outcome = orch.cancel(&CancelCurtailmentRequest {
            device_id: "D9".to_string(),
            reason: None,
        });

        assert!(outcome.is_completed());
        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(outcome.steps[0].status, SagaStatus::CompensationStarted);
        assert_eq!(outcome.steps[0].step_name, "compensation_step_1");
        assert_eq!(outcome.steps[0].details, "Compensation started for device D9, reason: N/A");
        assert_eq!(outcome.steps[2].details, "Compensation completed for device D9");

        let logged: Vec<SagaStatus> = store
            .entries_for_device("D9")
            .unwrap()
            .iter()
            .map(|e| e.status)
            .collect();
        assert_eq!(
            logged,
            vec![
                SagaStatus::CompensationStarted,
                SagaStatus::ActiveStatusWritten,
                SagaStatus::CompensationCompleted,
            ]
        );
        let status = store.get("D9").unwrap().unwrap();
        assert_eq!(status.status, DeviceState::Active);
        assert!(status.last_updated > earlier);
    }

    #[test]
    fn test_cancel_on_unknown_device_creates_active_status() {
        let (store, orch) = orchestrator();
        let outcome = orch.cancel(&CancelCurtailmentRequest {
            device_id: "D10".to_string(),
            reason: Some("manual".to_string()),
        });
        assert!(outcome.is_completed());
        assert_eq!(store.get("D10").unwrap().unwrap().status, DeviceState::Active);
    }

    #[test]
    fn test_curtail_then_cancel() {
        let (store, orch) = orchestrator();
        let first = orch.curtail(&curtail_req("D1"));
        let second = orch.cancel(&CancelCurtailmentRequest {
            device_id: "D1".to_string(),
            reason: Some("congestion cleared".to_string()),
        });

        assert_ne!(first.saga_id, second.saga_id);
        assert_eq!(store.entries_for_device("D1").unwrap().len(), 6);
        assert_eq!(store.get("D1").unwrap().unwrap().status, DeviceState::Active);
    }

    #[test]
    fn test_status_failure_halts_after_start_record() {
        let log = Arc::new(InMemoryStore::new());
        let stats = Arc::new(PipelineStats::new());
        let orch = SagaOrchestrator::new(log.clone(), Arc::new(BrokenStatusStore), Arc::clone(&stats));

        let outcome = orch.curtail(&curtail_req("D1"));
        assert_eq!(outcome.state, SagaState::Halted(SagaPhase::Started));
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(log.saga_log_len(), 1);
        assert!(outcome.error.as_deref().unwrap_or_default().contains("disk full"));
        assert_eq!(stats.snapshot().sagas_halted, 1);
    }

    #[test]
    fn test_log_failure_leaves_status_written() {
        let statuses = Arc::new(InMemoryStore::new());
        let log = Arc::new(FlakyLog {
            inner: InMemoryStore::new(),
            limit: 1,
        });
        let orch = SagaOrchestrator::new(log.clone(), statuses.clone(), Arc::new(PipelineStats::new()));

        let outcome = orch.curtail(&curtail_req("D1"));
        assert_eq!(outcome.state, SagaState::Halted(SagaPhase::StatusApplied));
        assert_eq!(log.inner.saga_log_len(), 1);
        // The status write already happened and is not rolled back.
        assert_eq!(statuses.get("D1").unwrap().unwrap().status, DeviceState::Curtailed);
    }

    #[test]
    fn test_timestamps_bump_when_clock_stalls() {
        let mut saga = SagaInstance::new(SagaKind::Curtailment, "D1", None);
        let future = Utc::now() + Duration::hours(1);
        saga.last_timestamp = Some(future);
        assert_eq!(saga.next_timestamp(), future + Duration::milliseconds(1));
    }
}
