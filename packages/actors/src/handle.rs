//! Typed request/response access to a coordinator actor.

use std::time::Duration;

use queue_core::{DEFAULT_LIST_LIMIT, JobId, JobStatus, Priority, Progress, QueueEvent, QueueItem, QueueStats};
use ractor::rpc::CallResult;
use ractor::{ActorRef, RpcReplyPort};
use tokio::sync::broadcast;

use crate::config::{DEFAULT_RETENTION, DEFAULT_STALE_TIMEOUT};
use crate::messages::{CoordinatorError, CoordinatorMessage};

/// Default timeout for a single coordinator call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Cloneable client of a coordinator actor.
///
/// Every call is bounded by a timeout, so an unresponsive coordinator shows
/// up as [`CoordinatorError::Timeout`] instead of a hang.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    actor: ActorRef<CoordinatorMessage>,
    timeout: Duration,
}

impl CoordinatorHandle {
    pub fn new(actor: ActorRef<CoordinatorMessage>) -> Self {
        Self {
            actor,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The underlying actor.
    pub fn actor(&self) -> &ActorRef<CoordinatorMessage> {
        &self.actor
    }

    async fn call<T: Send + 'static>(
        &self,
        build: impl FnOnce(RpcReplyPort<T>) -> CoordinatorMessage,
    ) -> Result<T, CoordinatorError> {
        match ractor::rpc::call(&self.actor, build, Some(self.timeout)).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(CoordinatorError::Timeout),
            Ok(CallResult::SenderError) => {
                Err(CoordinatorError::Unavailable("coordinator dropped the request".into()))
            }
            Err(e) => Err(CoordinatorError::Unavailable(e.to_string())),
        }
    }

    /// Add a job to the queue.
    pub async fn enqueue(
        &self,
        payload: impl Into<String>,
        priority: Priority,
        submitted_by: Option<String>,
    ) -> Result<QueueItem, CoordinatorError> {
        let payload = payload.into();
        self.call(|reply| CoordinatorMessage::Enqueue {
            payload,
            priority,
            submitted_by,
            reply,
        })
        .await?
    }

    /// Claim the next queued job unless `worker_id` already runs `max_concurrent`.
    pub async fn dequeue(
        &self,
        worker_id: &str,
        max_concurrent: usize,
    ) -> Result<Option<QueueItem>, CoordinatorError> {
        let worker_id = worker_id.to_string();
        self.call(|reply| CoordinatorMessage::Dequeue {
            worker_id,
            max_concurrent,
            reply,
        })
        .await?
    }

    /// Claim the next queued job for a worker that runs one job at a time.
    pub async fn dequeue_one(&self, worker_id: &str) -> Result<Option<QueueItem>, CoordinatorError> {
        self.dequeue(worker_id, 1).await
    }

    pub async fn update_progress(&self, job_id: JobId, progress: Progress) -> Result<bool, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::UpdateProgress {
            job_id,
            progress,
            reply,
        })
        .await?
    }

    pub async fn complete(&self, job_id: JobId, result_location: Option<String>) -> Result<bool, CoordinatorError> {
        self.complete_with_payload(job_id, result_location, None).await
    }

    /// Complete a job and replace its payload with `payload` when given.
    pub async fn complete_with_payload(
        &self,
        job_id: JobId,
        result_location: Option<String>,
        payload: Option<String>,
    ) -> Result<bool, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::Complete {
            job_id,
            result_location,
            payload,
            reply,
        })
        .await?
    }

    pub async fn fail(&self, job_id: JobId, error: impl Into<String>) -> Result<bool, CoordinatorError> {
        let error = error.into();
        self.call(|reply| CoordinatorMessage::Fail { job_id, error, reply })
            .await?
    }

    pub async fn cancel(&self, job_id: JobId) -> Result<bool, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::Cancel { job_id, reply }).await?
    }

    pub async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> Result<bool, CoordinatorError> {
        let worker_id = worker_id.to_string();
        self.call(|reply| CoordinatorMessage::Heartbeat {
            job_id,
            worker_id,
            reply,
        })
        .await?
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Option<QueueItem>, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::GetJob { job_id, reply }).await
    }

    /// List jobs newest first, optionally filtered by status.
    pub async fn get_jobs(
        &self,
        status_filter: Option<JobStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<QueueItem>, CoordinatorError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        self.call(|reply| CoordinatorMessage::ListJobs {
            status_filter,
            limit,
            reply,
        })
        .await
    }

    pub async fn get_status(&self) -> Result<QueueStats, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::GetStats { reply }).await
    }

    /// Run a cleanup pass now. Returns removed plus recovered job counts.
    pub async fn cleanup(&self, retention: Duration, stale_timeout: Duration) -> Result<usize, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::Cleanup {
            retention,
            stale_timeout,
            reply,
        })
        .await?
    }

    /// Cleanup with the default 7 day retention and 30 minute stale timeout.
    pub async fn cleanup_with_defaults(&self) -> Result<usize, CoordinatorError> {
        self.cleanup(DEFAULT_RETENTION, DEFAULT_STALE_TIMEOUT).await
    }

    /// Receive lifecycle events from now on.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<QueueEvent>, CoordinatorError> {
        self.call(|reply| CoordinatorMessage::Subscribe { reply }).await
    }

    /// Stop the coordinator actor.
    pub fn shutdown(&self) {
        tracing::info!("Stopping coordinator");
        self.actor.stop(None);
    }
}
