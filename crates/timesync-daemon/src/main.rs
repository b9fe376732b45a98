use clap::{Parser, Subcommand};
use serde::Serialize;
use timesync_core::TimeSyncConfig;
use timesync_scheduler::{
    alarms::fire_time,
    db::{SchedulerStore, SqliteStore},
    host::SystemClock,
    jitter::JitterGenerator,
    seed::DeviceSeedManager,
    Collaborators, SyncEvent, SyncStateMachine,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

mod alarms;
mod identity;
mod listeners;
mod network;
mod power;
mod service;

use identity::HostIdentity;

#[derive(Debug, Parser)]
#[command(name = "timesyncd", version, about = "Jittered periodic sync scheduler")]
struct Cli {
    /// Path to timesync.toml (default: $TIMESYNC_CONFIG, then ~/.timesync/timesync.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (default).
    Run,
    /// Print this device's jitter seed, creating it if needed.
    Seed,
    /// Print each listener's next fire time without arming anything.
    Plan {
        /// Emit one JSON object per listener.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Serialize)]
struct PlannedFire {
    listener: String,
    schedule: String,
    exact: chrono::DateTime<chrono::Utc>,
    fire_at: chrono::DateTime<chrono::Utc>,
    offset_ms: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timesyncd=info,timesync_scheduler=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > TIMESYNC_CONFIG env > ~/.timesync/timesync.toml
    let config_path = cli.config.or_else(|| std::env::var("TIMESYNC_CONFIG").ok());
    let config = TimeSyncConfig::load(config_path.as_deref()).map_err(|e| {
        tracing::error!(code = e.code(), "{e}");
        e
    })?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Seed => {
            let mut store = open_store(&config)?;
            let seed = device_seed(&config, &mut store)?;
            println!("{seed}");
            Ok(())
        }
        Command::Plan { json } => plan(&config, json),
    }
}

fn open_store(config: &TimeSyncConfig) -> anyhow::Result<SqliteStore> {
    let db_path = &config.database.path;
    config.database.ensure_parent_dir().map_err(|e| {
        tracing::error!(code = e.code(), path = %db_path, "could not create database directory: {e}");
        e
    })?;
    info!(path = %db_path, "opening SQLite database");
    Ok(SqliteStore::open(db_path)?)
}

fn device_seed(config: &TimeSyncConfig, store: &mut SqliteStore) -> anyhow::Result<i64> {
    let identity = HostIdentity::new(config.device.install_id.clone());
    Ok(DeviceSeedManager::new(identity).get_or_create_seed(store)?)
}

async fn run(config: TimeSyncConfig) -> anyhow::Result<()> {
    // A misdeclared listener stops startup before anything is armed.
    let listeners = listeners::builtin_registry().load(&config.listeners)?;
    let store = open_store(&config)?;
    let power_known = store.power_connected()?;

    let runtime = tokio::runtime::Handle::current();
    let (events_tx, events_rx) = mpsc::channel::<SyncEvent>(service::EVENT_QUEUE_DEPTH);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let host = Collaborators {
        alarms: Box::new(alarms::TokioAlarmScheduler::new(
            runtime.clone(),
            events_tx.clone(),
            config.alarms.inexact_window_secs,
        )),
        network: Box::new(network::TcpProbeMonitor::new(
            runtime.clone(),
            events_tx.clone(),
            &config.network,
        )),
        power: Box::new(power::SysfsPowerMonitor::new(
            runtime,
            events_tx.clone(),
            &config.power,
            power_known,
        )),
        store: Box::new(store),
        clock: Box::new(SystemClock),
    };
    let identity = HostIdentity::new(config.device.install_id.clone());
    let machine = SyncStateMachine::bootstrap(listeners, identity, host)?;
    let worker = service::spawn_worker(machine, events_rx, shutdown_rx);

    events_tx.send(SyncEvent::Start).await?;
    info!("timesyncd running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown_tx.send(true)?;
    events_tx.send(SyncEvent::Stop).await?;

    let status = worker.await?;
    if !status.failures.is_empty() {
        warn!(failing = status.failures.len(), "listeners were failing at shutdown");
    }
    info!(state = %status.state, "timesyncd stopped");
    Ok(())
}

fn plan(config: &TimeSyncConfig, json: bool) -> anyhow::Result<()> {
    let listeners = listeners::builtin_registry().load(&config.listeners)?;
    let mut store = open_store(config)?;
    let jitter = JitterGenerator::new(device_seed(config, &mut store)?);
    let now = chrono::Utc::now();

    for (name, listener) in &listeners {
        let listener_config = listener.config();
        let (exact, fire_at) = fire_time(&jitter, name, &listener_config, now);
        let planned = PlannedFire {
            listener: name.clone(),
            schedule: listener_config.time_span.to_string(),
            exact,
            fire_at,
            offset_ms: (fire_at - exact).num_milliseconds(),
        };
        if json {
            println!("{}", serde_json::to_string(&planned)?);
        } else {
            println!(
                "{:<20} {:<28} {}  ({:+}s)",
                planned.listener,
                planned.schedule,
                planned.fire_at.to_rfc3339(),
                planned.offset_ms / 1000
            );
        }
    }
    Ok(())
}
