//! Ingestion Pipeline
//!
//! ```text
//! EventSource ──► IngestionDispatcher ──► telemetry / curtailment / cancellation channels
//!                                              │            │              │
//!                                        WindowStore   curtail saga   compensation saga
//! ```
//!
//! The ramp-rate aggregator runs beside this as its own timer task
//! (see [`crate::window::RampRateAggregator`]).

pub mod dispatcher;
pub mod source;
pub mod workers;

pub use dispatcher::{channels, IngestError, IngestionDispatcher, Routed, WorkerReceivers, WorkerSenders};
pub use source::{ChannelSource, EventSource, InboundMessage, JsonLinesSource, SourceEvent};
pub use workers::{cancellation_worker, curtailment_worker, telemetry_worker};
