//! Coordinator actor: the single writer of a queue's state.
//!
//! The mailbox serializes every operation. Each mutation is applied to the
//! in-memory [`QueueState`] and saved before the reply is sent; when the save
//! fails the previous state is restored and the caller gets an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{CleanupReport, JobStatus, QueueEvent, QueueItem, QueueState};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{CoordinatorConfig, MIN_INTERVAL};
use crate::handle::CoordinatorHandle;
use crate::messages::{CoordinatorError, CoordinatorMessage};
use crate::persistence::StateStore;

/// Coordinator actor arguments.
pub struct CoordinatorArgs {
    pub config: CoordinatorConfig,
    pub store: Arc<dyn StateStore>,
}

/// State for the coordinator actor.
pub struct CoordinatorState {
    config: CoordinatorConfig,
    queue: QueueState,
    store: Arc<dyn StateStore>,
    /// Event broadcaster.
    event_tx: broadcast::Sender<QueueEvent>,
}

impl CoordinatorState {
    /// Broadcast an event.
    fn broadcast(&self, event: QueueEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Apply `mutate` and persist the result when it reports a change.
    ///
    /// On a failed save the state is rolled back to what it was before.
    async fn commit<T>(
        &mut self,
        mutate: impl FnOnce(&mut QueueState) -> (T, bool),
    ) -> Result<T, CoordinatorError> {
        let before = self.queue.clone();
        let (value, changed) = mutate(&mut self.queue);
        if !changed {
            return Ok(value);
        }

        match self.store.save(&self.config.instance, &self.queue).await {
            Ok(version) => {
                tracing::debug!("Persisted {} at version {}", self.config.instance, version);
                Ok(value)
            }
            Err(e) => {
                tracing::error!("Failed to persist {}: {}", self.config.instance, e);
                self.queue = before;
                Err(CoordinatorError::Persistence(e.to_string()))
            }
        }
    }

    async fn cleanup(
        &mut self,
        retention: Duration,
        stale_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, CoordinatorError> {
        let retention = to_chrono(retention);
        let stale_timeout = to_chrono(stale_timeout);
        let report = self
            .commit(|queue| {
                let report = queue.cleanup(retention, stale_timeout, now);
                let changed = !report.is_empty();
                (report, changed)
            })
            .await?;

        for job_id in &report.recovered {
            if let Some(item) = self.queue.get(*job_id) {
                tracing::warn!("Recovered stale job {} at priority {}", job_id, item.priority);
                self.broadcast(QueueEvent::JobRecovered {
                    job_id: *job_id,
                    priority: item.priority,
                    timestamp: now,
                });
            }
        }

        tracing::info!(
            "Cleanup finished for {}: {} removed, {} recovered",
            self.config.instance,
            report.removed.len(),
            report.recovered.len()
        );
        self.broadcast(QueueEvent::CleanupFinished {
            removed: report.removed.len(),
            recovered: report.recovered.len(),
            timestamp: now,
        });

        Ok(report)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Coordinator actor that owns one queue.
pub struct CoordinatorActor;

impl Actor for CoordinatorActor {
    type Msg = CoordinatorMessage;
    type State = CoordinatorState;
    type Arguments = CoordinatorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let CoordinatorArgs { config, store } = args;
        tracing::info!("Starting coordinator {} on {}", config.instance, store.describe());

        let queue = store.load(&config.instance).await?.unwrap_or_default();
        tracing::info!("Loaded {} jobs for {}", queue.len(), config.instance);

        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let mut state = CoordinatorState {
            config,
            queue,
            store,
            event_tx,
        };

        let (retention, stale_timeout) = (state.config.retention, state.config.stale_timeout);
        state.cleanup(retention, stale_timeout, Utc::now()).await?;

        // Recurring cleanup
        let interval = state.config.cleanup_interval.max(MIN_INTERVAL);
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if myself_clone.send_message(CoordinatorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let now = Utc::now();

        match message {
            CoordinatorMessage::Enqueue {
                payload,
                priority,
                submitted_by,
                reply,
            } => {
                let item = QueueItem::new(payload, priority, now)
                    .with_submitter(submitted_by)
                    .with_max_retries(state.config.default_max_retries);
                let result = state.commit(|queue| (queue.enqueue(item), true)).await;

                if let Ok(item) = &result {
                    tracing::info!("Enqueued job {} at priority {}", item.id, item.priority);
                    state.broadcast(QueueEvent::JobEnqueued {
                        job: item.clone(),
                        timestamp: now,
                    });
                }
                let _ = reply.send(result);
            }

            CoordinatorMessage::Dequeue {
                worker_id,
                max_concurrent,
                reply,
            } => {
                let result = state
                    .commit(|queue| {
                        let claimed = queue.dequeue(&worker_id, max_concurrent, now);
                        let changed = claimed.is_some();
                        (claimed, changed)
                    })
                    .await;

                if let Ok(Some(item)) = &result {
                    tracing::info!("Job {} claimed by {}", item.id, worker_id);
                    state.broadcast(QueueEvent::JobStarted {
                        job_id: item.id,
                        worker_id,
                        timestamp: now,
                    });
                }
                let _ = reply.send(result);
            }

            CoordinatorMessage::UpdateProgress {
                job_id,
                progress,
                reply,
            } => {
                let result = state
                    .commit(|queue| {
                        let updated = queue.update_progress(job_id, progress, now);
                        (updated, updated)
                    })
                    .await;

                if let Ok(true) = result {
                    tracing::debug!("Job {} progress {:.1}%", job_id, progress.percent);
                    state.broadcast(QueueEvent::JobProgress {
                        job_id,
                        progress,
                        timestamp: now,
                    });
                }
                let _ = reply.send(result);
            }

            CoordinatorMessage::Complete {
                job_id,
                result_location,
                payload,
                reply,
            } => {
                let location = result_location.clone();
                let result = state
                    .commit(|queue| {
                        let completed = queue.complete(job_id, location, payload, now);
                        (completed, completed)
                    })
                    .await;

                if let Ok(true) = result {
                    let duration_ms = state.queue.get(job_id).and_then(QueueItem::duration_ms);
                    tracing::info!("Job {} completed", job_id);
                    state.broadcast(QueueEvent::JobCompleted {
                        job_id,
                        result_location,
                        duration_ms,
                        timestamp: now,
                    });
                }
                let _ = reply.send(result);
            }

            CoordinatorMessage::Fail {
                job_id,
                error,
                reply,
            } => {
                let message = error.clone();
                let result = state
                    .commit(|queue| {
                        let failed = queue.fail(job_id, message, now);
                        (failed, failed)
                    })
                    .await;

                if let Ok(true) = result
                    && let Some(item) = state.queue.get(job_id)
                {
                    let will_retry = item.status == JobStatus::Queued;
                    let retry_count = item.retry_count;
                    if will_retry {
                        tracing::warn!(
                            "Job {} failed (attempt {}), retrying at priority {}: {}",
                            job_id,
                            retry_count,
                            item.priority,
                            error
                        );
                    } else {
                        tracing::warn!("Job {} failed permanently: {}", job_id, error);
                    }
                    state.broadcast(QueueEvent::JobFailed {
                        job_id,
                        error,
                        retry_count,
                        will_retry,
                        timestamp: now,
                    });
                }
                let _ = reply.send(result);
            }

            CoordinatorMessage::Cancel { job_id, reply } => {
                let result = state
                    .commit(|queue| {
                        let cancelled = queue.cancel(job_id, now);
                        (cancelled, cancelled)
                    })
                    .await;

                if let Ok(true) = result {
                    tracing::info!("Job {} cancelled", job_id);
                    state.broadcast(QueueEvent::JobCancelled {
                        job_id,
                        timestamp: now,
                    });
                }
                let _ = reply.send(result);
            }

            CoordinatorMessage::Heartbeat {
                job_id,
                worker_id,
                reply,
            } => {
                let result = state
                    .commit(|queue| {
                        let alive = queue.heartbeat(job_id, &worker_id, now);
                        (alive, alive)
                    })
                    .await;

                if let Ok(false) = result {
                    tracing::debug!("Rejected heartbeat for {} from {}", job_id, worker_id);
                }
                let _ = reply.send(result);
            }

            CoordinatorMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.queue.get(job_id).cloned());
            }

            CoordinatorMessage::ListJobs {
                status_filter,
                limit,
                reply,
            } => {
                let _ = reply.send(state.queue.list(status_filter, limit));
            }

            CoordinatorMessage::GetStats { reply } => {
                let _ = reply.send(state.queue.stats(now));
            }

            CoordinatorMessage::Cleanup {
                retention,
                stale_timeout,
                reply,
            } => {
                let result = state.cleanup(retention, stale_timeout, now).await;
                let _ = reply.send(result.map(|report| report.total()));
            }

            CoordinatorMessage::Subscribe { reply } => {
                let _ = reply.send(state.event_tx.subscribe());
            }

            CoordinatorMessage::Tick => {
                let (retention, stale_timeout) = (state.config.retention, state.config.stale_timeout);
                if let Err(e) = state.cleanup(retention, stale_timeout, now).await {
                    tracing::warn!("Scheduled cleanup failed: {}", e);
                }
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            "Coordinator {} stopped with {} jobs",
            state.config.instance,
            state.queue.len()
        );
        Ok(())
    }
}

/// Start a coordinator and return a handle to it.
pub async fn start_coordinator(
    config: CoordinatorConfig,
    store: Arc<dyn StateStore>,
) -> Result<(CoordinatorHandle, JoinHandle<()>), ractor::SpawnErr> {
    let name = format!("coordinator-{}", config.instance);
    let (actor, handle) = Actor::spawn(Some(name), CoordinatorActor, CoordinatorArgs { config, store }).await?;
    Ok((CoordinatorHandle::new(actor), handle))
}
