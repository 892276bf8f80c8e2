//! One claimed job running on a worker.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use queue_core::payload::{self, PayloadShape};
use queue_core::QueueItem;
use ractor::ActorRef;
use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::handle::CoordinatorHandle;
use crate::harness::{HarnessRun, SimulationHandle, SimulationHarness};
use crate::messages::WorkerMessage;

/// How a unit ended.
#[derive(Debug)]
enum Outcome {
    Succeeded {
        result_location: Option<String>,
        summary: Option<Value>,
    },
    Failed(String),
    /// Cancelled by this worker.
    Cancelled,
    /// The coordinator no longer assigns the job to this worker.
    Revoked,
}

/// Executes a single claimed job and reports its outcome.
pub(crate) struct ExecutionUnit {
    pub job: QueueItem,
    pub worker_id: String,
    pub coordinator: CoordinatorHandle,
    pub harness: Arc<dyn SimulationHarness>,
    pub report_interval: Duration,
    pub cancel: CancellationToken,
}

impl ExecutionUnit {
    pub async fn run(self) {
        tracing::info!("Worker {} executing job {}", self.worker_id, self.job.id);

        let outcome = match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Outcome::Failed(format!("Worker panicked: {}", panic_message(panic.as_ref()))),
        };

        self.report(outcome).await;
    }

    async fn execute(&self) -> Outcome {
        let shape = payload::from_payload(&self.job.payload);
        let Some(params) = shape.simulation_params().cloned() else {
            return Outcome::Failed("Unrecognized payload: expected an optimization job or simulation parameters".into());
        };

        let HarnessRun { handle, mut completion } = match self.harness.start(params) {
            Ok(run) => run,
            Err(e) => return Outcome::Failed(format!("Failed to start simulation: {}", e)),
        };

        let reporter = self.report_progress(handle.as_ref());
        tokio::pin!(reporter);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Outcome::Cancelled,
            result = &mut completion => match result {
                Ok(()) => Outcome::Succeeded {
                    result_location: handle.result_location(),
                    summary: handle.summary(),
                },
                Err(e) => Outcome::Failed(format!("Simulation failed: {}", e)),
            },
            () = &mut reporter => Outcome::Revoked,
        }
    }

    /// Push progress and heartbeats until the coordinator rejects a heartbeat.
    async fn report_progress(&self, handle: &dyn SimulationHandle) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.report_interval,
            self.report_interval,
        );
        loop {
            ticker.tick().await;
            if handle.is_finished() {
                continue;
            }

            let progress = handle.progress();
            if let Err(e) = self.coordinator.update_progress(self.job.id, progress).await {
                tracing::warn!("Failed to report progress for {}: {}", self.job.id, e);
            }

            match self.coordinator.heartbeat(self.job.id, &self.worker_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("Job {} is no longer assigned to {}", self.job.id, self.worker_id);
                    return;
                }
                Err(e) => tracing::warn!("Heartbeat for {} failed: {}", self.job.id, e),
            }
        }
    }

    async fn report(&self, outcome: Outcome) {
        let job_id = self.job.id;
        let reported = match outcome {
            Outcome::Succeeded {
                result_location,
                summary,
            } => {
                let payload = self.completed_payload(result_location.clone(), summary);
                self.coordinator
                    .complete_with_payload(job_id, result_location, payload)
                    .await
            }
            Outcome::Failed(message) => {
                tracing::warn!("Job {} failed on {}: {}", job_id, self.worker_id, message);
                self.coordinator.fail(job_id, message).await
            }
            Outcome::Cancelled => {
                tracing::info!("Job {} cancelled on {}", job_id, self.worker_id);
                self.coordinator.cancel(job_id).await
            }
            Outcome::Revoked => {
                tracing::info!("Dropped job {} without reporting", job_id);
                return;
            }
        };

        match reported {
            Ok(true) => tracing::debug!("Reported outcome of {}", job_id),
            Ok(false) => tracing::warn!("Coordinator ignored the outcome of {}", job_id),
            Err(e) => tracing::error!("Failed to report outcome of {}: {}", job_id, e),
        }
    }

    /// The completed domain job to write back, when the payload was one.
    fn completed_payload(&self, result_location: Option<String>, summary: Option<Value>) -> Option<String> {
        let PayloadShape::Job(job) = payload::from_payload(&self.job.payload) else {
            return None;
        };
        let completed = job.into_completed(self.job.started_at, Utc::now(), result_location, summary);
        match payload::to_payload(&completed) {
            Ok(payload) => Some(payload),
            Err(e) => {
                tracing::warn!("Failed to encode completed job {}: {}", self.job.id, e);
                None
            }
        }
    }
}

/// Notifies the worker when a unit exits, however it exits, and holds the
/// unit's concurrency permit until then.
pub(crate) struct UnitGuard {
    pub unit_id: u64,
    pub worker: ActorRef<WorkerMessage>,
    pub _permit: OwnedSemaphorePermit,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        let _ = self.worker.send_message(WorkerMessage::JobFinished { unit_id: self.unit_id });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
