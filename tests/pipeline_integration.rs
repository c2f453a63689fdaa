//! End-to-end pipeline tests: JSON lines → dispatcher → workers → window
//! store / sagas → aggregator tick → sinks.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use windops::config::{IngestConfig, TimestampSource};
use windops::pipeline::{self, IngestionDispatcher, JsonLinesSource};
use windops::storage::{DeviceStatusStore, InMemoryStore, SagaLog, SledStore, WindowResultSink};
use windops::{DeviceState, PipelineStats, RampRateAggregator, SagaOrchestrator, SagaStatus, WindowSettings, WindowStore};

const EPS: f64 = 1e-9;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn telemetry(device: &str, kw: f64, at: DateTime<Utc>) -> String {
    serde_json::json!({
        "topic": "turbine_telemetry",
        "value": {
            "device_id": device,
            "power_output": kw,
            "timestamp": at.to_rfc3339(),
            "wind_speed": 12.4,
            "blade_pitch": 3.5
        }
    })
    .to_string()
}

struct Harness {
    windows: Arc<WindowStore>,
    orchestrator: Arc<SagaOrchestrator>,
    stats: Arc<PipelineStats>,
}

impl Harness {
    fn new(log: Arc<dyn SagaLog>, statuses: Arc<dyn DeviceStatusStore>) -> Self {
        let stats = Arc::new(PipelineStats::new());
        Self {
            windows: Arc::new(WindowStore::new()),
            orchestrator: Arc::new(SagaOrchestrator::new(log, statuses, Arc::clone(&stats))),
            stats,
        }
    }

    /// Push `lines` through a fresh dispatcher and wait for every worker to drain.
    async fn ingest(&self, lines: Vec<String>) {
        let config = IngestConfig {
            timestamp_source: TimestampSource::Event,
            ..IngestConfig::default()
        };
        let (senders, receivers) = pipeline::channels(config.channel_capacity);
        let token = CancellationToken::new();

        let telemetry = tokio::spawn(pipeline::telemetry_worker(
            receivers.telemetry,
            Arc::clone(&self.windows),
            Arc::clone(&self.stats),
            token.clone(),
        ));
        let curtail = tokio::spawn(pipeline::curtailment_worker(
            receivers.curtailment,
            Arc::clone(&self.orchestrator),
            token.clone(),
        ));
        let cancel = tokio::spawn(pipeline::cancellation_worker(
            receivers.cancellation,
            Arc::clone(&self.orchestrator),
            token.clone(),
        ));

        let text = lines.join("\n");
        let mut source = JsonLinesSource::new(BufReader::new(std::io::Cursor::new(text.into_bytes())), "test");
        IngestionDispatcher::new(&config, senders, Arc::clone(&self.stats))
            .run(&mut source, token)
            .await;

        telemetry.await.unwrap();
        curtail.await.unwrap();
        cancel.await.unwrap();
    }
}

#[tokio::test]
async fn test_reference_ramp_rate_scenario() {
    let sink = Arc::new(InMemoryStore::new());
    let harness = Harness::new(sink.clone(), sink.clone());
    let aggregator = RampRateAggregator::new(
        Arc::clone(&harness.windows),
        sink.clone(),
        WindowSettings::default(),
        Arc::clone(&harness.stats),
    );

    harness
        .ingest(vec![
            telemetry("D1", 100.0, t0()),
            telemetry("D1", 120.0, t0() + Duration::seconds(30)),
            telemetry("D1", 110.0, t0() + Duration::seconds(60)),
        ])
        .await;
    let first = aggregator.tick(t0() + Duration::minutes(10));
    assert_eq!(first.primed, 1);
    assert!(first.results.is_empty());

    harness
        .ingest(vec![
            telemetry("D1", 130.0, t0() + Duration::minutes(11)),
            telemetry("D1", 140.0, t0() + Duration::minutes(12)),
        ])
        .await;
    let second = aggregator.tick(t0() + Duration::minutes(12));
    assert_eq!(second.persisted, 1);

    let stored = sink.results_for_device("D1", 10).unwrap();
    assert_eq!(stored.len(), 1);
    assert!((stored[0].avg_power_kw - 135.0).abs() < EPS);
    assert!((stored[0].ramp_rate_mw_per_min - 0.0125).abs() < EPS);
    assert_eq!(stored[0].window_start, t0() + Duration::minutes(2));

    let snap = harness.stats.snapshot();
    assert_eq!(snap.samples_appended, 5);
    assert_eq!(snap.results_persisted, 1);
}

#[tokio::test]
async fn test_malformed_lines_do_not_stop_ingestion() {
    let sink = Arc::new(InMemoryStore::new());
    let harness = Harness::new(sink.clone(), sink.clone());

    harness
        .ingest(vec![
            "this is not json".to_string(),
            r#"{"topic":"turbine_telemetry","value":{"device_id":"D1"}}"#.to_string(),
            r#"{"topic":"turbine_telemetry","value":{"device_id":"D1","power_output":5.0}}"#.to_string(),
            r#"{"topic":"weather","value":{}}"#.to_string(),
            telemetry("D2", 42.0, t0()),
        ])
        .await;

    let snap = harness.stats.snapshot();
    assert_eq!(snap.records_received, 5);
    // Missing power, missing timestamp in event mode, unknown topic, bad JSON
    assert_eq!(snap.malformed_records, 4);
    assert_eq!(harness.windows.snapshot("D2").len(), 1);
    assert!(harness.windows.snapshot("D1").is_empty());
}

#[tokio::test]
async fn test_curtail_then_cancel_over_topics() {
    let sink = Arc::new(InMemoryStore::new());
    let harness = Harness::new(sink.clone(), sink.clone());

    harness
        .ingest(vec![
            r#"{"topic":"curtailment_requests","value":{"device_id":"D1","reason":"grid overload"}}"#.to_string(),
        ])
        .await;
    assert_eq!(sink.get("D1").unwrap().unwrap().status, DeviceState::Curtailed);

    harness
        .ingest(vec![r#"{"topic":"cancel_curtailment","value":{"device_id":"D1"}}"#.to_string()])
        .await;

    assert_eq!(sink.get("D1").unwrap().unwrap().status, DeviceState::Active);
    let entries = sink.entries_for_device("D1").unwrap();
    assert_eq!(entries.len(), 6);
    let statuses: Vec<SagaStatus> = entries.iter().map(|e| e.status).collect();
    assert_eq!(
        statuses,
        vec![
            SagaStatus::Started,
            SagaStatus::CurtailedStatusWritten,
            SagaStatus::Completed,
            SagaStatus::CompensationStarted,
            SagaStatus::ActiveStatusWritten,
            SagaStatus::CompensationCompleted,
        ]
    );
    assert_eq!(harness.stats.snapshot().sagas_completed, 2);
}

#[tokio::test]
async fn test_sled_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("windops.db");

    let saga_id = {
        let store = Arc::new(SledStore::open(&path).unwrap());
        let harness = Harness::new(store.clone(), store.clone());
        harness
            .ingest(vec![
                r#"{"topic":"curtailment_requests","value":{"device_id":"WIND_ZP_007","reason":"frequency event"}}"#
                    .to_string(),
            ])
            .await;
        store.flush().unwrap();
        store.entries_for_device("WIND_ZP_007").unwrap()[0].saga_id.clone()
    };

    let reopened = SledStore::open(&path).unwrap();
    assert_eq!(
        reopened.get("WIND_ZP_007").unwrap().unwrap().status,
        DeviceState::Curtailed
    );
    let entries = reopened.entries_for_saga(&saga_id).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}
