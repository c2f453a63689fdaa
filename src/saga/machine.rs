//! Saga state machine
//!
//! Both sagas share one linear shape; only the statuses and the target device
//! state differ:
//!
//! ```text
//! Curtailment:  STARTED ──► CURTAILED_STATUS_WRITTEN ──► COMPLETED
//! Compensation: COMPENSATION_STARTED ──► ACTIVE_STATUS_WRITTEN ──► COMPENSATION_COMPLETED
//! ```
//!
//! [`transition`] is pure: given the current state and the outcome of the last
//! effect, it returns the next state and the next effect to perform. The
//! orchestrator executes effects against real sinks; tests can drive the
//! machine without any I/O.

use serde::{Deserialize, Serialize};

use crate::types::{DeviceState, SagaKind, SagaStatus};

/// Progress through the linear step sequence. Each phase names the last
/// step that completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaPhase {
    /// Nothing written yet
    Pending,
    /// Start record logged
    Started,
    /// Device status upserted, not yet logged
    StatusApplied,
    /// Status write logged
    StatusRecorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "phase")]
pub enum SagaState {
    Running(SagaPhase),
    Completed,
    /// Stopped after a failed step; carries the last phase that completed.
    Halted(SagaPhase),
}

impl SagaState {
    pub const fn initial() -> Self {
        SagaState::Running(SagaPhase::Pending)
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, SagaState::Completed | SagaState::Halted(_))
    }
}

/// Input to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaEvent {
    /// Command received
    Begin,
    /// The last effect succeeded
    StepSucceeded,
    /// The last effect failed
    StepFailed,
}

/// Work the orchestrator must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaEffect {
    /// Append a saga log entry with this status
    Record(SagaStatus),
    /// Upsert the device status
    WriteStatus(DeviceState),
    /// Saga finished successfully
    Finish,
    /// Saga stopped at its last completed step
    Halt,
    /// Event not applicable in this state
    Ignore,
}

impl SagaKind {
    pub const fn started_status(self) -> SagaStatus {
        match self {
            SagaKind::Curtailment => SagaStatus::Started,
            SagaKind::Compensation => SagaStatus::CompensationStarted,
        }
    }

    pub const fn status_written_status(self) -> SagaStatus {
        match self {
            SagaKind::Curtailment => SagaStatus::CurtailedStatusWritten,
            SagaKind::Compensation => SagaStatus::ActiveStatusWritten,
        }
    }

    pub const fn completed_status(self) -> SagaStatus {
        match self {
            SagaKind::Curtailment => SagaStatus::Completed,
            SagaKind::Compensation => SagaStatus::CompensationCompleted,
        }
    }

    /// Device state this saga leaves behind.
    pub const fn target_state(self) -> DeviceState {
        match self {
            SagaKind::Curtailment => DeviceState::Curtailed,
            SagaKind::Compensation => DeviceState::Active,
        }
    }
}

/// Advance the machine.
///
/// There is no compensating branch here: a failure halts the saga where it
/// stands. Compensation is a separate saga started by its own command.
pub fn transition(kind: SagaKind, state: SagaState, event: SagaEvent) -> (SagaState, SagaEffect) {
    use SagaPhase::{Pending, StatusApplied, StatusRecorded, Started};

    let SagaState::Running(phase) = state else {
        return (state, SagaEffect::Ignore);
    };

    match (phase, event) {
        (Pending, SagaEvent::Begin) => (state, SagaEffect::Record(kind.started_status())),
        (_, SagaEvent::Begin) => (state, SagaEffect::Ignore),
        (_, SagaEvent::StepFailed) => (SagaState::Halted(phase), SagaEffect::Halt),
        (Pending, SagaEvent::StepSucceeded) => (
            SagaState::Running(Started),
            SagaEffect::WriteStatus(kind.target_state()),
        ),
        (Started, SagaEvent::StepSucceeded) => (
            SagaState::Running(StatusApplied),
            SagaEffect::Record(kind.status_written_status()),
        ),
        (StatusApplied, SagaEvent::StepSucceeded) => (
            SagaState::Running(StatusRecorded),
            SagaEffect::Record(kind.completed_status()),
        ),
        (StatusRecorded, SagaEvent::StepSucceeded) => (SagaState::Completed, SagaEffect::Finish),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the machine, failing the `fail_at`-th effect (0-based) if given.
    fn drive(kind: SagaKind, fail_at: Option<usize>) -> (SagaState, Vec<SagaEffect>) {
        let (mut state, mut effect) = transition(kind, SagaState::initial(), SagaEvent::Begin);
        let mut effects = Vec::new();
        while matches!(effect, SagaEffect::Record(_) | SagaEffect::WriteStatus(_)) {
            let event = if fail_at == Some(effects.len()) {
                SagaEvent::StepFailed
            } else {
                SagaEvent::StepSucceeded
            };
            effects.push(effect);
            (state, effect) = transition(kind, state, event);
        }
        (state, effects)
    }

    #[test]
    fn test_curtailment_happy_path() {
        let (state, effects) = drive(SagaKind::Curtailment, None);
        assert_eq!(state, SagaState::Completed);
        assert_eq!(
            effects,
            vec![
                SagaEffect::Record(SagaStatus::Started),
                SagaEffect::WriteStatus(DeviceState::Curtailed),
                SagaEffect::Record(SagaStatus::CurtailedStatusWritten),
                SagaEffect::Record(SagaStatus::Completed),
            ]
        );
    }

    #[test]
    fn test_compensation_happy_path() {
        let (state, effects) = drive(SagaKind::Compensation, None);
        assert_eq!(state, SagaState::Completed);
        assert_eq!(
            effects,
            vec![
                SagaEffect::Record(SagaStatus::CompensationStarted),
                SagaEffect::WriteStatus(DeviceState::Active),
                SagaEffect::Record(SagaStatus::ActiveStatusWritten),
                SagaEffect::Record(SagaStatus::CompensationCompleted),
            ]
        );
    }

    #[test]
    fn test_failure_halts_at_last_completed_phase() {
        let (state, effects) = drive(SagaKind::Curtailment, Some(0));
        assert_eq!(state, SagaState::Halted(SagaPhase::Pending));
        assert_eq!(effects.len(), 1);

        let (state, _) = drive(SagaKind::Curtailment, Some(1));
        assert_eq!(state, SagaState::Halted(SagaPhase::Started));

        let (state, _) = drive(SagaKind::Compensation, Some(3));
        assert_eq!(state, SagaState::Halted(SagaPhase::StatusRecorded));
    }

    #[test]
    fn test_terminal_states_ignore_events() {
        for state in [SagaState::Completed, SagaState::Halted(SagaPhase::Started)] {
            for event in [SagaEvent::Begin, SagaEvent::StepSucceeded, SagaEvent::StepFailed] {
                assert_eq!(
                    transition(SagaKind::Curtailment, state, event),
                    (state, SagaEffect::Ignore)
                );
            }
        }
    }

    #[test]
    fn test_begin_only_valid_once() {
        let running = SagaState::Running(SagaPhase::Started);
        assert_eq!(
            transition(SagaKind::Compensation, running, SagaEvent::Begin),
            (running, SagaEffect::Ignore)
        );
    }
}
