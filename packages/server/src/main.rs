//! Queue node: a coordinator with a local worker.
//!
//! Environment:
//! - `QUEUE_STORE`: `surreal` (default), `file` or `memory`
//! - `QUEUE_STATE_DIR`: directory for the `file` store
//! - `QUEUE_DEMO_JOBS`: number of demo jobs to submit at startup
//! - `QUEUE_DB_*`, `QUEUE_*`: see the `db`, `actors` and `client` configs

use std::error::Error;
use std::sync::Arc;

use actors::{
    CoordinatorConfig, CoordinatorHandle, FileStateStore, MemoryStateStore, StateStore,
    SurrealStateStore, WorkerArgs, WorkerConfig, start_coordinator, start_worker,
};
use client::{ClientConfig, QueueClient};
use db::DbConfig;
use tokio::sync::broadcast::error::RecvError;

mod demo;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let store = open_store().await?;
    let (coordinator, coordinator_task) = start_coordinator(CoordinatorConfig::from_env(), store).await?;
    spawn_event_log(&coordinator).await?;

    let args = WorkerArgs::new(WorkerConfig::from_env(), coordinator.clone(), demo::harness());
    let (worker, _) = start_worker(args).await?;

    let demo_jobs = std::env::var("QUEUE_DEMO_JOBS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if demo_jobs > 0 {
        let client = QueueClient::new(coordinator.clone(), ClientConfig::from_env());
        demo::seed(&client, demo_jobs).await?;
    }

    tracing::info!("Queue node running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    if let Err(e) = worker.shutdown().await {
        tracing::warn!("Worker shutdown failed: {}", e);
    }
    coordinator.shutdown();
    coordinator_task.await?;

    Ok(())
}

async fn open_store() -> Result<Arc<dyn StateStore>, Box<dyn Error>> {
    let kind = std::env::var("QUEUE_STORE").unwrap_or_else(|_| "surreal".to_string());
    let store: Arc<dyn StateStore> = match kind.as_str() {
        "surreal" => {
            db::init(DbConfig::from_env()).await?;
            Arc::new(SurrealStateStore)
        }
        "file" => {
            let store = match std::env::var("QUEUE_STATE_DIR") {
                Ok(dir) => FileStateStore::open(dir).await?,
                Err(_) => FileStateStore::default_dir().await?,
            };
            Arc::new(store)
        }
        "memory" => Arc::new(MemoryStateStore::new()),
        other => return Err(format!("Unknown QUEUE_STORE: {}", other).into()),
    };
    tracing::info!("Using {} state store", store.describe());
    Ok(store)
}

/// Log coordinator events until the coordinator stops.
async fn spawn_event_log(coordinator: &CoordinatorHandle) -> Result<(), Box<dyn Error>> {
    let mut events = coordinator.subscribe().await?;
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!("{}", event.description()),
                Err(RecvError::Lagged(missed)) => tracing::warn!("Event log skipped {} events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });
    Ok(())
}
