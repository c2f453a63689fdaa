//! Channel workers
//!
//! One task per worker channel. Each drains its channel in FIFO order and
//! stops on cancellation or once every sender is gone. A failing unit of
//! work is logged by whatever it calls; the worker itself never stops on one.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use crate::saga::SagaOrchestrator;
use crate::stats::PipelineStats;
use crate::types::{CancelCurtailmentRequest, CurtailmentRequest, TelemetrySample};
use crate::window::WindowStore;

/// Receive until cancelled or closed, applying `handle` to each item.
/// Returns the number of items handled.
async fn drain<T, F>(
    name: &'static str,
    mut rx: mpsc::Receiver<T>,
    cancel_token: CancellationToken,
    mut handle: F,
) -> u64
where
    F: FnMut(T),
{
    info!("[{}] Worker starting", name);
    let mut handled = 0u64;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("[{}] Shutdown signal received after {} items", name, handled);
                break;
            }
            item = rx.recv() => {
                match item {
                    Some(item) => {
                        handle(item);
                        handled += 1;
                    }
                    None => {
                        info!("[{}] Channel closed after {} items", name, handled);
                        break;
                    }
                }
            }
        }
    }

    handled
}

/// Append telemetry samples to the window store in arrival order.
pub async fn telemetry_worker(
    rx: mpsc::Receiver<TelemetrySample>,
    store: Arc<WindowStore>,
    stats: Arc<PipelineStats>,
    cancel_token: CancellationToken,
) -> u64 {
    drain("TelemetryWorker", rx, cancel_token, |sample| {
        trace!(device_id = %sample.device_id, observed_at = %sample.observed_at, "Sample appended");
        store.append(sample);
        PipelineStats::incr(&stats.samples_appended);
    })
    .await
}

/// Run a curtailment saga per request.
pub async fn curtailment_worker(
    rx: mpsc::Receiver<CurtailmentRequest>,
    orchestrator: Arc<SagaOrchestrator>,
    cancel_token: CancellationToken,
) -> u64 {
    drain("CurtailmentWorker", rx, cancel_token, |request| {
        orchestrator.curtail(&request);
    })
    .await
}

/// Run a compensation saga per request.
pub async fn cancellation_worker(
    rx: mpsc::Receiver<CancelCurtailmentRequest>,
    orchestrator: Arc<SagaOrchestrator>,
    cancel_token: CancellationToken,
) -> u64 {
    drain("CancellationWorker", rx, cancel_token, |request| {
        orchestrator.cancel(&request);
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DeviceStatusStore, InMemoryStore};
    use crate::types::DeviceState;
    use chrono::Utc;

    #[tokio::test]
    async fn test_telemetry_worker_drains_then_stops_on_close() {
        let (tx, rx) = mpsc::channel(8);
        let store = Arc::new(WindowStore::new());
        let stats = Arc::new(PipelineStats::new());

        for kw in [5.0, 6.0] {
            tx.send(TelemetrySample::new("D1", kw, Utc::now())).await.unwrap();
        }
        drop(tx);

        let handled = telemetry_worker(rx, Arc::clone(&store), Arc::clone(&stats), CancellationToken::new()).await;
        assert_eq!(handled, 2);
        assert_eq!(store.snapshot("D1").len(), 2);
        assert_eq!(stats.snapshot().samples_appended, 2);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let (_tx, rx) = mpsc::channel::<TelemetrySample>(1);
        let token = CancellationToken::new();
        token.cancel();
        let handled = telemetry_worker(
            rx,
            Arc::new(WindowStore::new()),
            Arc::new(PipelineStats::new()),
            token,
        )
        .await;
        assert_eq!(handled, 0);
    }

    #[tokio::test]
    async fn test_command_workers_drive_sagas() {
        let db = Arc::new(InMemoryStore::new());
        let orchestrator = Arc::new(SagaOrchestrator::new(
            db.clone(),
            db.clone(),
            Arc::new(PipelineStats::new()),
        ));

        let (curtail_tx, curtail_rx) = mpsc::channel(4);
        curtail_tx
            .send(CurtailmentRequest {
                device_id: "D1".to_string(),
                reason: "grid overload".to_string(),
            })
            .await
            .unwrap();
        drop(curtail_tx);
        curtailment_worker(curtail_rx, Arc::clone(&orchestrator), CancellationToken::new()).await;
        assert_eq!(db.get("D1").unwrap().unwrap().status, DeviceState::Curtailed);

        let (cancel_tx, cancel_rx) = mpsc::channel(4);
        cancel_tx
            .send(CancelCurtailmentRequest {
                device_id: "D1".to_string(),
                reason: None,
            })
            .await
            .unwrap();
        drop(cancel_tx);
        cancellation_worker(cancel_rx, orchestrator, CancellationToken::new()).await;
        assert_eq!(db.get("D1").unwrap().unwrap().status, DeviceState::Active);
        assert_eq!(db.saga_log_len(), 6);
    }
}
