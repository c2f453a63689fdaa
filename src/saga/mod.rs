//! Curtailment sagas
//!
//! - `machine`: pure state machine shared by the forward and compensation sagas
//! - `orchestrator`: runs a saga against the saga log and device status store

pub mod machine;
pub mod orchestrator;

pub use machine::{transition, SagaEffect, SagaEvent, SagaPhase, SagaState};
pub use orchestrator::{SagaOrchestrator, SagaOutcome};
