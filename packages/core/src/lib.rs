//! Core domain types for the optimization job queue.
//!
//! This crate contains shared types used across all packages:
//! - QueueItem and JobStatus for work items
//! - QueueState, the coordinator's state machine
//! - Events for lifecycle notifications
//! - Payload conversion between optimization jobs and queue payloads

mod events;
mod job;
pub mod payload;
mod queue;

pub use events::QueueEvent;
pub use job::{DEFAULT_MAX_RETRIES, JobId, JobStatus, Priority, Progress, QueueItem};
pub use payload::{OptimizationJob, PayloadShape, SimulationParams};
pub use queue::{CleanupReport, DEFAULT_LIST_LIMIT, QueueState, QueueStats};
