//! Submitting optimization jobs and following them to a terminal state.

use actors::{CoordinatorError, CoordinatorHandle, MIN_INTERVAL};
use chrono::Utc;
use queue_core::payload::{self, PayloadShape};
use queue_core::{JobId, JobStatus, OptimizationJob, Progress, QueueItem};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to encode job: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("Polling task failed: {0}")]
    Polling(String),
}

/// A change observed while polling a submitted job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub job: OptimizationJob,
    pub progress: Option<Progress>,
    pub message: String,
}

/// Submits optimization jobs to a coordinator.
#[derive(Debug, Clone)]
pub struct QueueClient {
    coordinator: CoordinatorHandle,
    config: ClientConfig,
}

impl QueueClient {
    pub fn new(coordinator: CoordinatorHandle, config: ClientConfig) -> Self {
        Self { coordinator, config }
    }

    /// Enqueue `job` and follow it in the background.
    ///
    /// Returns as soon as the job is queued; `on_update` is called after every
    /// poll until the job is terminal or the submission is cancelled.
    pub async fn submit<F>(&self, job: OptimizationJob, on_update: F) -> Result<Submission, ClientError>
    where
        F: FnMut(JobUpdate) + Send + 'static,
    {
        let payload = payload::to_payload(&job)?;
        let priority = payload::priority_for_score(job.promise_score);
        let item = self
            .coordinator
            .enqueue(payload, priority, Some(self.config.submitter.clone()))
            .await?;
        tracing::info!("Submitted {} as queue job {} at priority {}", job.id, item.id, priority);

        let mut running = job;
        running.status = JobStatus::Running;
        running.started_at = Some(item.created_at);

        let cancel = CancellationToken::new();
        let poller = Poller {
            coordinator: self.coordinator.clone(),
            config: self.config.clone(),
            queue_id: item.id,
            job: running.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(poller.run(on_update));

        Ok(Submission {
            job: running,
            queue_id: item.id,
            cancel,
            task,
        })
    }
}

/// A submitted job being followed by a polling task.
#[derive(Debug)]
pub struct Submission {
    job: OptimizationJob,
    queue_id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<OptimizationJob>,
}

impl Submission {
    /// The job as it looked when submitted.
    pub fn job(&self) -> &OptimizationJob {
        &self.job
    }

    pub fn queue_id(&self) -> JobId {
        self.queue_id
    }

    /// Stop following the job and ask the coordinator to cancel it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the job's final state.
    pub async fn wait(self) -> Result<OptimizationJob, ClientError> {
        self.task.await.map_err(|e| ClientError::Polling(e.to_string()))
    }
}

struct Poller {
    coordinator: CoordinatorHandle,
    config: ClientConfig,
    queue_id: JobId,
    job: OptimizationJob,
    cancel: CancellationToken,
}

impl Poller {
    async fn run(self, mut on_update: impl FnMut(JobUpdate)) -> OptimizationJob {
        let mut ticker = tokio::time::interval(self.config.poll_interval.max(MIN_INTERVAL));

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.request_cancel().await;
                    let update = self.cancelled();
                    on_update(update.clone());
                    return update.job;
                }
                _ = ticker.tick() => {}
            }

            let item = match self.coordinator.get_job(self.queue_id).await {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!("Polling {} failed, retrying: {}", self.queue_id, e);
                    continue;
                }
            };

            let Some(item) = item else {
                tracing::warn!("Queue job {} disappeared", self.queue_id);
                let update = self.failed("Queue item disappeared".to_string());
                on_update(update.clone());
                return update.job;
            };

            let update = self.update_for(&item);
            on_update(update.clone());
            if item.status.is_terminal() {
                tracing::info!("Queue job {} finished as {}", self.queue_id, item.status);
                return update.job;
            }
        }
    }

    /// Best effort: the local job is cancelled whatever the coordinator says.
    async fn request_cancel(&self) {
        match self.coordinator.cancel(self.queue_id).await {
            Ok(true) => tracing::info!("Cancelled queue job {}", self.queue_id),
            Ok(false) => tracing::debug!("Queue job {} was already finished", self.queue_id),
            Err(e) => tracing::warn!("Failed to cancel {} on the coordinator: {}", self.queue_id, e),
        }
    }

    fn cancelled(&self) -> JobUpdate {
        let mut job = self.job.clone();
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        JobUpdate {
            job,
            progress: None,
            message: "Cancelled".to_string(),
        }
    }

    fn failed(&self, error: String) -> JobUpdate {
        let mut job = self.job.clone();
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.error = Some(error.clone());
        JobUpdate {
            job,
            progress: None,
            message: error,
        }
    }

    /// Map a queue item onto the domain job.
    fn update_for(&self, item: &QueueItem) -> JobUpdate {
        let mut job = self.job.clone();
        let message = match item.status {
            JobStatus::Queued => {
                job.status = JobStatus::Queued;
                if item.retry_count > 0 {
                    format!("Queued for retry {}", item.retry_count)
                } else {
                    "Queued".to_string()
                }
            }
            JobStatus::Running => {
                job.status = JobStatus::Running;
                job.started_at = item.started_at.or(job.started_at);
                match item.progress {
                    Some(progress) => format!("Running: {:.1}%", progress.percent),
                    None => "Running".to_string(),
                }
            }
            JobStatus::Completed => {
                job = completed_job(&self.job, item);
                "Completed".to_string()
            }
            JobStatus::Failed => {
                let error = item.error_message.clone().unwrap_or_else(|| "Job failed".to_string());
                job.status = JobStatus::Failed;
                job.completed_at = item.completed_at;
                job.error = Some(error.clone());
                error
            }
            JobStatus::Cancelled => {
                job.status = JobStatus::Cancelled;
                job.completed_at = item.completed_at;
                "Cancelled".to_string()
            }
        };

        JobUpdate {
            job,
            progress: item.progress,
            message,
        }
    }
}

/// The completed job a domain-aware worker wrote back, or one rebuilt from
/// the queue item.
fn completed_job(submitted: &OptimizationJob, item: &QueueItem) -> OptimizationJob {
    if let PayloadShape::Job(job) = payload::from_payload(&item.payload)
        && job.status == JobStatus::Completed
    {
        return *job;
    }

    submitted.clone().into_completed(
        item.started_at,
        item.completed_at.unwrap_or_else(Utc::now),
        item.result_location.clone(),
        None,
    )
}
