//! Message types for actor communication.

use std::time::Duration;

use queue_core::{JobId, JobStatus, Priority, Progress, QueueEvent, QueueItem, QueueStats};
use ractor::RpcReplyPort;
use tokio::sync::broadcast;

/// Reply port for coordinator operations that mutate state.
pub type Reply<T> = RpcReplyPort<Result<T, CoordinatorError>>;

/// Messages for the CoordinatorActor.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Add a new job to the queue.
    Enqueue {
        payload: String,
        priority: Priority,
        submitted_by: Option<String>,
        reply: Reply<QueueItem>,
    },

    /// Claim the next queued job for a worker.
    Dequeue {
        worker_id: String,
        max_concurrent: usize,
        reply: Reply<Option<QueueItem>>,
    },

    /// Overwrite the progress of a running job.
    UpdateProgress {
        job_id: JobId,
        progress: Progress,
        reply: Reply<bool>,
    },

    /// Mark a running job completed, optionally replacing its payload.
    Complete {
        job_id: JobId,
        result_location: Option<String>,
        payload: Option<String>,
        reply: Reply<bool>,
    },

    /// Report a failed attempt.
    Fail {
        job_id: JobId,
        error: String,
        reply: Reply<bool>,
    },

    /// Cancel a queued or running job.
    Cancel { job_id: JobId, reply: Reply<bool> },

    /// Liveness signal from the worker running a job.
    Heartbeat {
        job_id: JobId,
        worker_id: String,
        reply: Reply<bool>,
    },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<QueueItem>>,
    },

    /// List jobs, newest first.
    ListJobs {
        status_filter: Option<JobStatus>,
        limit: usize,
        reply: RpcReplyPort<Vec<QueueItem>>,
    },

    /// Get queue stats.
    GetStats { reply: RpcReplyPort<QueueStats> },

    /// Delete aged-out jobs and recover stale ones.
    Cleanup {
        retention: Duration,
        stale_timeout: Duration,
        reply: Reply<usize>,
    },

    /// Receive lifecycle events.
    Subscribe {
        reply: RpcReplyPort<broadcast::Receiver<QueueEvent>>,
    },

    /// Periodic tick for housekeeping.
    Tick,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to claim work from the coordinator.
    Poll,

    /// An execution unit exited. Units are numbered per launch, so a job
    /// claimed again after a retry gets a new id.
    JobFinished { unit_id: u64 },

    /// Jobs currently executing on this worker.
    RunningJobs { reply: RpcReplyPort<Vec<JobId>> },

    /// Stop claiming, cancel running jobs and drain them.
    Shutdown { reply: RpcReplyPort<()> },
}

/// Infrastructure failures talking to the coordinator.
///
/// State-machine no-ops are not errors; they surface as `false` or `None`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Coordinator unavailable: {0}")]
    Unavailable(String),

    #[error("Coordinator call timed out")]
    Timeout,

    #[error("Failed to persist queue state: {0}")]
    Persistence(String),
}

/// Worker lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Not ready after {attempts} attempts: {reason}")]
    CoordinatorNotReady { attempts: u32, reason: String },

    #[error("Failed to start worker: {0}")]
    Spawn(String),

    #[error("Worker unavailable: {0}")]
    Unavailable(String),
}
