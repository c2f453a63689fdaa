//! Durable sinks: saga log, device status, and window results
//!
//! The core only depends on the traits in `persistence`. Two backends ship:
//! Sled DB for deployments and an in-memory store for tests and `--memory` runs.

pub mod persistence;
pub mod sled_store;

pub use persistence::{DeviceStatusStore, InMemoryStore, SagaLog, StorageError, WindowResultSink};
pub use sled_store::SledStore;
