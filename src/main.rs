//! windops - Wind Turbine Telemetry Operations
//!
//! Computes per-turbine ramp rates over hopping windows and runs curtailment
//! sagas against a durable audit log.
//!
//! # Usage
//!
//! ```bash
//! # Pipe topic envelopes in, one JSON object per line
//! turbine_simulator | ./windops --stdin
//!
//! # Replay a recorded stream, 50 ms between records, without touching disk
//! ./windops --replay data/telemetry.jsonl --speed-ms 50 --memory
//!
//! # Inspect stored state
//! ./windops status WIND_ZP_001
//! ./windops saga-log WIND_ZP_001
//! ```
//!
//! # Environment Variables
//!
//! - `WINDOPS_CONFIG`: Path to a TOML config file (default: ./windops.toml)
//! - `WINDOPS_*`: Overrides for individual settings (see `config`)
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_DB`: Set to "true" to wipe the data directory on startup

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use windops::api::{create_app, ApiState};
use windops::config::AppConfig;
use windops::pipeline::{self, EventSource, IngestionDispatcher, JsonLinesSource, WorkerReceivers, WorkerSenders};
use windops::saga::SagaOrchestrator;
use windops::stats::PipelineStats;
use windops::storage::{DeviceStatusStore, InMemoryStore, SagaLog, SledStore, WindowResultSink};
use windops::window::{RampRateAggregator, WindowSettings, WindowStore};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "windops")]
#[command(about = "Wind turbine ramp-rate and curtailment orchestration")]
#[command(version)]
struct CliArgs {
    /// Read topic envelopes from stdin (JSON lines)
    #[arg(long, conflicts_with = "replay")]
    stdin: bool,

    /// Replay topic envelopes from a JSON lines file
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Delay between replayed records in milliseconds (0 = as fast as possible)
    #[arg(long, default_value = "0")]
    speed_ms: u64,

    /// Keep all sinks in memory instead of opening the sled database
    #[arg(long)]
    memory: bool,

    /// Override the server address (default: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Reset the data directory on startup.
    /// WARNING: This is destructive and cannot be undone!
    /// Can also be set via RESET_DB=true environment variable.
    #[arg(long)]
    reset_db: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Print the stored status of a device
    Status {
        /// Device identifier
        device: String,
    },

    /// Print the saga audit trail of a device
    SagaLog {
        /// Device identifier
        device: String,
    },
}

// ============================================================================
// Database Reset
// ============================================================================

/// Check if database reset is requested via CLI flag or environment variable.
fn should_reset_db(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    std::env::var("RESET_DB")
        .map(|val| matches!(val.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Remove the data directory and all its contents.
fn reset_data_directory(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        info!("Data directory does not exist, nothing to reset");
        return Ok(());
    }

    warn!("RESET_DB requested, removing {}", data_dir.display());
    std::fs::remove_dir_all(data_dir)
        .with_context(|| format!("Failed to remove data directory {}", data_dir.display()))?;
    warn!("Data directory removed; a fresh database will be created");
    Ok(())
}

// ============================================================================
// Storage
// ============================================================================

/// The three sinks, backed by one store.
struct Sinks {
    saga_log: Arc<dyn SagaLog>,
    statuses: Arc<dyn DeviceStatusStore>,
    results: Arc<dyn WindowResultSink>,
    /// Kept for flushing on shutdown; `None` for the in-memory backend.
    sled: Option<SledStore>,
}

fn open_sinks(memory: bool, data_dir: &str) -> Result<Sinks> {
    if memory {
        info!("Storage: in-memory (nothing persists past this run)");
        let store = Arc::new(InMemoryStore::new());
        return Ok(Sinks {
            saga_log: store.clone(),
            statuses: store.clone(),
            results: store,
            sled: None,
        });
    }

    let store = SledStore::open(data_dir)
        .with_context(|| format!("Failed to open sled store at {data_dir}"))?;
    let shared = Arc::new(store.clone());
    Ok(Sinks {
        saga_log: shared.clone(),
        statuses: shared.clone(),
        results: shared,
        sled: Some(store),
    })
}

// ============================================================================
// Subcommands
// ============================================================================

fn run_subcommand(command: &SubCommand, data_dir: &str) -> Result<()> {
    let store = SledStore::open(data_dir)
        .with_context(|| format!("Failed to open sled store at {data_dir}"))?;

    match command {
        SubCommand::Status { device } => match store.get(device)? {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("No status recorded for {device}"),
        },
        SubCommand::SagaLog { device } => {
            let entries = store.entries_for_device(device)?;
            if entries.is_empty() {
                println!("No saga entries for {device}");
            }
            for e in entries {
                println!(
                    "{}  {}  {:<24} {:<20} {}",
                    e.timestamp.to_rfc3339(),
                    e.saga_id,
                    e.status,
                    e.step_name,
                    e.details
                );
            }
        }
    }
    Ok(())
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Dispatcher,
    TelemetryWorker,
    CurtailmentWorker,
    CancellationWorker,
    Aggregator,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Dispatcher => write!(f, "Dispatcher"),
            TaskName::TelemetryWorker => write!(f, "TelemetryWorker"),
            TaskName::CurtailmentWorker => write!(f, "CurtailmentWorker"),
            TaskName::CancellationWorker => write!(f, "CancellationWorker"),
            TaskName::Aggregator => write!(f, "Aggregator"),
        }
    }
}

// ============================================================================
// Task Spawning
// ============================================================================

/// Spawn the HTTP server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn one worker per channel.
fn spawn_workers(
    task_set: &mut JoinSet<Result<TaskName>>,
    receivers: WorkerReceivers,
    windows: &Arc<WindowStore>,
    orchestrator: &Arc<SagaOrchestrator>,
    stats: &Arc<PipelineStats>,
    cancel_token: &CancellationToken,
) {
    let WorkerReceivers {
        telemetry,
        curtailment,
        cancellation,
    } = receivers;

    let (store, worker_stats, token) = (Arc::clone(windows), Arc::clone(stats), cancel_token.clone());
    task_set.spawn(async move {
        pipeline::telemetry_worker(telemetry, store, worker_stats, token).await;
        Ok(TaskName::TelemetryWorker)
    });

    let (orch, token) = (Arc::clone(orchestrator), cancel_token.clone());
    task_set.spawn(async move {
        pipeline::curtailment_worker(curtailment, orch, token).await;
        Ok(TaskName::CurtailmentWorker)
    });

    let (orch, token) = (Arc::clone(orchestrator), cancel_token.clone());
    task_set.spawn(async move {
        pipeline::cancellation_worker(cancellation, orch, token).await;
        Ok(TaskName::CancellationWorker)
    });
}

/// Spawn the dispatcher reading from `source`.
fn spawn_dispatcher<S: EventSource>(
    task_set: &mut JoinSet<Result<TaskName>>,
    mut source: S,
    dispatcher: IngestionDispatcher,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        dispatcher.run(&mut source, cancel_token).await;
        Ok(TaskName::Dispatcher)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

// ============================================================================
// Pipeline Runner
// ============================================================================

/// Which inbound source the dispatcher reads, if any.
enum InputMode {
    Stdin,
    Replay(PathBuf, u64),
    /// No stream input; commands arrive over HTTP only.
    CommandsOnly,
}

async fn run_pipeline(
    config: AppConfig,
    input: InputMode,
    sinks: &Sinks,
    cancel_token: CancellationToken,
) -> Result<()> {
    let stats = Arc::new(PipelineStats::new());
    let windows = Arc::new(WindowStore::new());
    let orchestrator = Arc::new(SagaOrchestrator::new(
        Arc::clone(&sinks.saga_log),
        Arc::clone(&sinks.statuses),
        Arc::clone(&stats),
    ));
    let (senders, receivers): (WorkerSenders, WorkerReceivers) =
        pipeline::channels(config.ingest.channel_capacity);

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Workers
    spawn_workers(&mut task_set, receivers, &windows, &orchestrator, &stats, &cancel_token);

    // Aggregator
    let settings = WindowSettings::from_config(&config.window);
    let aggregator = RampRateAggregator::new(
        Arc::clone(&windows),
        Arc::clone(&sinks.results),
        settings,
        Arc::clone(&stats),
    );
    let tick = std::time::Duration::from_secs(config.window.tick_interval_secs);
    let agg_token = cancel_token.clone();
    task_set.spawn(async move {
        aggregator.run(tick, agg_token).await;
        Ok(TaskName::Aggregator)
    });

    // HTTP server
    if config.server.enabled {
        let listener = tokio::net::TcpListener::bind(&config.server.addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.server.addr))?;
        info!("HTTP API listening on http://{}", config.server.addr);
        let app = create_app(ApiState {
            windows: Arc::clone(&windows),
            statuses: Arc::clone(&sinks.statuses),
            saga_log: Arc::clone(&sinks.saga_log),
            results: Arc::clone(&sinks.results),
            stats: Arc::clone(&stats),
            commands: Some(senders.clone()),
            started_at: Utc::now(),
        });
        spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    }

    // Dispatcher (takes the last sender so channels close at EOF when the
    // API is disabled)
    let dispatcher = IngestionDispatcher::new(&config.ingest, senders, Arc::clone(&stats));
    match input {
        InputMode::Stdin => {
            spawn_dispatcher(&mut task_set, JsonLinesSource::stdin(), dispatcher, cancel_token.clone());
        }
        InputMode::Replay(path, delay_ms) => {
            let source = JsonLinesSource::open(&path, delay_ms).await?;
            info!("Replaying {} ({} ms between records)", path.display(), delay_ms);
            spawn_dispatcher(&mut task_set, source, dispatcher, cancel_token.clone());
        }
        InputMode::CommandsOnly => {
            info!("No stream input selected; accepting commands over HTTP only");
            drop(dispatcher);
        }
    }

    let outcome = run_supervisor(&mut task_set, cancel_token.clone()).await;

    cancel_token.cancel();
    while let Some(joined) = task_set.join_next().await {
        match joined {
            Ok(Ok(name)) => info!("{} stopped", name),
            Ok(Err(e)) => warn!("Task ended with error during shutdown: {}", e),
            Err(e) => warn!("Task join error during shutdown: {}", e),
        }
    }

    let s = stats.snapshot();
    info!(
        received = s.records_received,
        malformed = s.malformed_records,
        samples = s.samples_appended,
        ticks = s.ticks,
        results = s.results_persisted,
        sagas_completed = s.sagas_completed,
        sagas_halted = s.sagas_halted,
        "Final statistics"
    );

    outcome
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let mut config = AppConfig::load().context("Invalid configuration")?;
    if let Some(addr) = args.addr.clone() {
        config.server.addr = addr;
    }

    // Subcommands read the sled store and exit
    if let Some(command) = &args.command {
        return run_subcommand(command, &config.storage.data_dir);
    }

    // Reset DB check, before any storage is opened
    if should_reset_db(args.reset_db) && !args.memory {
        reset_data_directory(Path::new(&config.storage.data_dir))?;
    }

    info!(
        window_secs = config.window.size_secs,
        step_secs = config.window.step_secs,
        retention_multiplier = config.window.retention_multiplier,
        tick_secs = config.window.tick_interval_secs,
        "windops starting"
    );

    let sinks = open_sinks(args.memory, &config.storage.data_dir)?;

    let input = if args.stdin {
        InputMode::Stdin
    } else if let Some(path) = args.replay {
        InputMode::Replay(path, args.speed_ms)
    } else {
        InputMode::CommandsOnly
    };

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let result = run_pipeline(config, input, &sinks, cancel_token).await;

    if let Some(store) = &sinks.sled {
        match store.flush() {
            Ok(()) => info!(size_bytes = store.size_bytes(), "Sled store flushed"),
            Err(e) => error!("Failed to flush sled store: {}", e),
        }
    }

    result
}
