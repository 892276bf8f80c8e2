//! Actor system for the optimization job queue.
//!
//! This crate provides the Ractor-based coordinator that owns the queue state
//! and the worker that executes claimed jobs against a simulation harness.
//!
//! # Architecture
//!
//! - `CoordinatorActor` - Single writer of a queue's state, persisted through a `StateStore`
//! - `WorkerActor` - Polls the coordinator and runs jobs with bounded concurrency
//!
//! # Usage
//!
//! ```ignore
//! use actors::{CoordinatorConfig, MemoryStateStore, WorkerArgs, WorkerConfig, start_coordinator, start_worker};
//!
//! let (coordinator, _) = start_coordinator(CoordinatorConfig::default(), Arc::new(MemoryStateStore::new())).await?;
//! let (worker, _) = start_worker(WorkerArgs::new(WorkerConfig::default(), coordinator.clone(), harness)).await?;
//!
//! coordinator.enqueue(payload, Priority::default(), None).await?;
//! ```

mod config;
mod coordinator;
mod execution;
mod handle;
mod harness;
mod messages;
mod persistence;
mod worker;

pub use config::{
    CoordinatorConfig, DEFAULT_RETENTION, DEFAULT_STALE_TIMEOUT, MIN_INTERVAL, WorkerConfig, default_worker_id,
};
pub use coordinator::{CoordinatorActor, CoordinatorArgs, start_coordinator};
pub use handle::{CoordinatorHandle, DEFAULT_CALL_TIMEOUT};
pub use harness::{FnHarness, HarnessFuture, HarnessResult, HarnessRun, ProgressTracker, SimulationHandle, SimulationHarness};
pub use messages::{CoordinatorError, CoordinatorMessage, WorkerError, WorkerMessage};
pub use persistence::{FileStateStore, MemoryStateStore, PersistenceError, StateStore, StoreFuture, SurrealStateStore};
pub use worker::{CheckFuture, ReadinessCheck, WorkerActor, WorkerArgs, WorkerHandle, start_worker, wait_until_ready};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort};
