//! Ingestion Dispatcher
//!
//! Demultiplexes the inbound stream by topic onto three bounded FIFO
//! channels, one per worker:
//!
//! ```text
//!                    ┌─► telemetry    ──► telemetry worker    ──► WindowStore
//! EventSource ─► decode ─► curtailment ──► curtailment worker  ──► SagaOrchestrator::curtail
//!                    └─► cancellation ──► cancellation worker ──► SagaOrchestrator::cancel
//! ```
//!
//! Per-device order is preserved because exactly one worker drains the
//! telemetry channel, in the order the dispatcher sent.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::source::{EventSource, InboundMessage, SourceEvent};
use crate::config::{IngestConfig, TimestampSource, TopicConfig};
use crate::stats::PipelineStats;
use crate::types::{CancelCurtailmentRequest, CurtailmentRequest, TelemetryRecord, TelemetrySample};

/// Reasons an inbound message does not reach a worker.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("malformed record on {topic}: {reason}")]
    Malformed { topic: String, reason: String },
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
}

/// A decoded message, tagged with its destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Telemetry(TelemetrySample),
    Curtailment(CurtailmentRequest),
    Cancellation(CancelCurtailmentRequest),
}

// ============================================================================
// Worker Channels
// ============================================================================

/// Sending halves of the worker channels. Cheap to clone; the HTTP command
/// endpoints hold a copy.
#[derive(Debug, Clone)]
pub struct WorkerSenders {
    pub telemetry: mpsc::Sender<TelemetrySample>,
    pub curtailment: mpsc::Sender<CurtailmentRequest>,
    pub cancellation: mpsc::Sender<CancelCurtailmentRequest>,
}

/// Receiving halves, one per worker.
#[derive(Debug)]
pub struct WorkerReceivers {
    pub telemetry: mpsc::Receiver<TelemetrySample>,
    pub curtailment: mpsc::Receiver<CurtailmentRequest>,
    pub cancellation: mpsc::Receiver<CancelCurtailmentRequest>,
}

/// Create the three bounded worker channels.
pub fn channels(capacity: usize) -> (WorkerSenders, WorkerReceivers) {
    let capacity = capacity.max(1);
    let (telemetry_tx, telemetry_rx) = mpsc::channel(capacity);
    let (curtail_tx, curtail_rx) = mpsc::channel(capacity);
    let (cancel_tx, cancel_rx) = mpsc::channel(capacity);
    (
        WorkerSenders {
            telemetry: telemetry_tx,
            curtailment: curtail_tx,
            cancellation: cancel_tx,
        },
        WorkerReceivers {
            telemetry: telemetry_rx,
            curtailment: curtail_rx,
            cancellation: cancel_rx,
        },
    )
}

// ============================================================================
// Dispatcher
// ============================================================================

pub struct IngestionDispatcher {
    topics: TopicConfig,
    timestamp_source: TimestampSource,
    senders: WorkerSenders,
    stats: Arc<PipelineStats>,
}

impl IngestionDispatcher {
    pub fn new(config: &IngestConfig, senders: WorkerSenders, stats: Arc<PipelineStats>) -> Self {
        Self {
            topics: config.topics.clone(),
            timestamp_source: config.timestamp_source,
            senders,
            stats,
        }
    }

    /// Decode a message into its routed form. `arrival` stamps telemetry when
    /// the timestamp source is [`TimestampSource::Arrival`].
    pub fn decode(
        &self,
        message: &InboundMessage,
        arrival: DateTime<Utc>,
    ) -> Result<Routed, IngestError> {
        let topic = message.topic.as_str();
        let malformed = |reason: String| IngestError::Malformed {
            topic: topic.to_string(),
            reason,
        };

        if topic == self.topics.telemetry {
            let record: TelemetryRecord = serde_json::from_value(message.value.clone())
                .map_err(|e| malformed(e.to_string()))?;
            self.telemetry_sample(record, arrival)
                .map(Routed::Telemetry)
                .map_err(malformed)
        } else if topic == self.topics.curtailment {
            let request: CurtailmentRequest = serde_json::from_value(message.value.clone())
                .map_err(|e| malformed(e.to_string()))?;
            require_device_id(&request.device_id).map_err(malformed)?;
            Ok(Routed::Curtailment(request))
        } else if topic == self.topics.cancellation {
            let request: CancelCurtailmentRequest = serde_json::from_value(message.value.clone())
                .map_err(|e| malformed(e.to_string()))?;
            require_device_id(&request.device_id).map_err(malformed)?;
            Ok(Routed::Cancellation(request))
        } else {
            Err(IngestError::UnknownTopic(topic.to_string()))
        }
    }

    fn telemetry_sample(
        &self,
        record: TelemetryRecord,
        arrival: DateTime<Utc>,
    ) -> Result<TelemetrySample, String> {
        require_device_id(&record.device_id)?;
        if !record.power_output.is_finite() {
            return Err(format!("power_output is not finite: {}", record.power_output));
        }

        let observed_at = match self.timestamp_source {
            TimestampSource::Arrival => arrival,
            TimestampSource::Event => {
                let raw = record
                    .timestamp
                    .as_deref()
                    .ok_or_else(|| "missing timestamp".to_string())?;
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))?
                    .with_timezone(&Utc)
            }
        };

        Ok(TelemetrySample::new(record.device_id, record.power_output, observed_at))
    }

    /// Hand a routed message to its worker, waiting for channel capacity.
    pub async fn dispatch(&self, routed: Routed) -> Result<(), IngestError> {
        match routed {
            Routed::Telemetry(sample) => {
                trace!(device_id = %sample.device_id, power_kw = sample.power_output, "Telemetry routed");
                self.senders
                    .telemetry
                    .send(sample)
                    .await
                    .map_err(|_| IngestError::ChannelClosed("telemetry"))?;
                PipelineStats::incr(&self.stats.telemetry_routed);
            }
            Routed::Curtailment(request) => {
                debug!(device_id = %request.device_id, "Curtailment request routed");
                self.senders
                    .curtailment
                    .send(request)
                    .await
                    .map_err(|_| IngestError::ChannelClosed("curtailment"))?;
                PipelineStats::incr(&self.stats.curtailments_routed);
            }
            Routed::Cancellation(request) => {
                debug!(device_id = %request.device_id, "Cancellation request routed");
                self.senders
                    .cancellation
                    .send(request)
                    .await
                    .map_err(|_| IngestError::ChannelClosed("cancellation"))?;
                PipelineStats::incr(&self.stats.cancellations_routed);
            }
        }
        Ok(())
    }

    /// Decode and dispatch one message, counting and logging any rejection.
    async fn handle(&self, message: InboundMessage) {
        PipelineStats::incr(&self.stats.records_received);
        let routed = match self.decode(&message, Utc::now()) {
            Ok(routed) => routed,
            Err(e) => {
                PipelineStats::incr(&self.stats.malformed_records);
                warn!("[Dispatcher] Dropping record: {}", e);
                return;
            }
        };
        if let Err(e) = self.dispatch(routed).await {
            PipelineStats::incr(&self.stats.dropped_records);
            warn!("[Dispatcher] Dropping record: {}", e);
        }
    }

    /// Pump `source` until EOF, a source error, or cancellation.
    ///
    /// Consumes the dispatcher; its senders drop on return, so workers drain
    /// what is queued and then stop once no other sender is alive.
    pub async fn run<S: EventSource>(self, source: &mut S, cancel_token: CancellationToken) {
        info!("[Dispatcher] Reading from {}", source.source_name());

        loop {
            let event = tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("[Dispatcher] Shutdown signal received");
                    break;
                }
                result = source.next_event() => {
                    match result {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("[Dispatcher] Source error: {:#}", e);
                            break;
                        }
                    }
                }
            };

            match event {
                SourceEvent::Message(message) => {
                    tokio::select! {
                        _ = cancel_token.cancelled() => {
                            info!("[Dispatcher] Shutdown signal received while dispatching");
                            break;
                        }
                        () = self.handle(message) => {}
                    }
                }
                SourceEvent::Malformed(reason) => {
                    PipelineStats::incr(&self.stats.records_received);
                    PipelineStats::incr(&self.stats.malformed_records);
                    warn!("[Dispatcher] Skipping malformed line from {}: {}", source.source_name(), reason);
                }
                SourceEvent::Eof => {
                    info!("[Dispatcher] {} reached end", source.source_name());
                    break;
                }
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.records_received,
            telemetry = snapshot.telemetry_routed,
            curtailments = snapshot.curtailments_routed,
            cancellations = snapshot.cancellations_routed,
            malformed = snapshot.malformed_records,
            dropped = snapshot.dropped_records,
            "[Dispatcher] Stopped"
        );
    }
}

fn require_device_id(device_id: &str) -> Result<(), String> {
    if device_id.trim().is_empty() {
        Err("device_id is empty".to_string())
    } else {
        Ok(())
    }
}
