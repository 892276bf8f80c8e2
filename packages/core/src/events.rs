//! Event types broadcast by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, Priority, Progress, QueueItem};

/// Lifecycle events emitted by the coordinator after each effective change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A new job was enqueued.
    JobEnqueued {
        job: QueueItem,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    JobStarted {
        job_id: JobId,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker reported progress.
    JobProgress {
        job_id: JobId,
        progress: Progress,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    JobCompleted {
        job_id: JobId,
        result_location: Option<String>,
        duration_ms: Option<i64>,
        timestamp: DateTime<Utc>,
    },
    /// A job attempt failed.
    JobFailed {
        job_id: JobId,
        error: String,
        retry_count: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A job was cancelled.
    JobCancelled {
        job_id: JobId,
        timestamp: DateTime<Utc>,
    },
    /// A stale running job was returned to the queue.
    JobRecovered {
        job_id: JobId,
        priority: Priority,
        timestamp: DateTime<Utc>,
    },
    /// A cleanup pass finished.
    CleanupFinished {
        removed: usize,
        recovered: usize,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::JobEnqueued { timestamp, .. } => *timestamp,
            QueueEvent::JobStarted { timestamp, .. } => *timestamp,
            QueueEvent::JobProgress { timestamp, .. } => *timestamp,
            QueueEvent::JobCompleted { timestamp, .. } => *timestamp,
            QueueEvent::JobFailed { timestamp, .. } => *timestamp,
            QueueEvent::JobCancelled { timestamp, .. } => *timestamp,
            QueueEvent::JobRecovered { timestamp, .. } => *timestamp,
            QueueEvent::CleanupFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            QueueEvent::JobEnqueued { job, .. } => Some(job.id),
            QueueEvent::JobStarted { job_id, .. } => Some(*job_id),
            QueueEvent::JobProgress { job_id, .. } => Some(*job_id),
            QueueEvent::JobCompleted { job_id, .. } => Some(*job_id),
            QueueEvent::JobFailed { job_id, .. } => Some(*job_id),
            QueueEvent::JobCancelled { job_id, .. } => Some(*job_id),
            QueueEvent::JobRecovered { job_id, .. } => Some(*job_id),
            QueueEvent::CleanupFinished { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            QueueEvent::JobEnqueued { job, .. } => {
                format!("Job {} enqueued at priority {}", job.id, job.priority)
            }
            QueueEvent::JobStarted {
                job_id, worker_id, ..
            } => format!("Job {} started by {}", job_id, worker_id),
            QueueEvent::JobProgress {
                job_id, progress, ..
            } => format!("Job {} at {:.1}%", job_id, progress.percent),
            QueueEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => match duration_ms {
                Some(ms) => format!("Job {} completed in {}ms", job_id, ms),
                None => format!("Job {} completed", job_id),
            },
            QueueEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            QueueEvent::JobCancelled { job_id, .. } => format!("Job {} cancelled", job_id),
            QueueEvent::JobRecovered {
                job_id, priority, ..
            } => format!("Job {} recovered from a silent worker, now priority {}", job_id, priority),
            QueueEvent::CleanupFinished {
                removed, recovered, ..
            } => format!("Cleanup removed {} and recovered {} jobs", removed, recovered),
        }
    }
}
