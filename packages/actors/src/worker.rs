//! Worker actor: polls the coordinator and runs claimed jobs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use queue_core::{JobId, QueueItem};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::{MIN_INTERVAL, WorkerConfig};
use crate::execution::{ExecutionUnit, UnitGuard};
use crate::handle::CoordinatorHandle;
use crate::harness::SimulationHarness;
use crate::messages::{WorkerError, WorkerMessage};

/// Future returned by a [`ReadinessCheck`].
pub type CheckFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// A dependency that must be reachable before a worker starts polling.
///
/// The coordinator is always checked; register more for other services the
/// harness depends on.
pub trait ReadinessCheck: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn check(&self) -> CheckFuture;
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub config: WorkerConfig,
    pub coordinator: CoordinatorHandle,
    pub harness: Arc<dyn SimulationHarness>,
    pub readiness_checks: Vec<Arc<dyn ReadinessCheck>>,
}

impl WorkerArgs {
    pub fn new(config: WorkerConfig, coordinator: CoordinatorHandle, harness: Arc<dyn SimulationHarness>) -> Self {
        Self {
            config,
            coordinator,
            harness,
            readiness_checks: Vec::new(),
        }
    }

    pub fn with_readiness_check(mut self, check: Arc<dyn ReadinessCheck>) -> Self {
        self.readiness_checks.push(check);
        self
    }
}

/// State for the worker actor.
pub struct WorkerState {
    config: WorkerConfig,
    coordinator: CoordinatorHandle,
    harness: Arc<dyn SimulationHarness>,
    /// One permit per job that may run at once.
    slots: Arc<Semaphore>,
    /// Job and cancellation for each running unit, keyed by unit id.
    running: HashMap<u64, (JobId, CancellationToken)>,
    next_unit: u64,
    units: JoinSet<()>,
    accepting: bool,
}

impl WorkerState {
    fn launch(&mut self, myself: &ActorRef<WorkerMessage>, job: QueueItem, permit: OwnedSemaphorePermit) {
        let cancel = CancellationToken::new();
        let unit_id = self.next_unit;
        self.next_unit += 1;
        self.running.insert(unit_id, (job.id, cancel.clone()));

        let guard = UnitGuard {
            unit_id,
            worker: myself.clone(),
            _permit: permit,
        };
        let unit = ExecutionUnit {
            job,
            worker_id: self.config.worker_id.clone(),
            coordinator: self.coordinator.clone(),
            harness: self.harness.clone(),
            report_interval: self.config.report_interval.max(MIN_INTERVAL),
            cancel,
        };

        self.units.spawn(async move {
            let _guard = guard;
            unit.run().await;
        });
    }

    /// Collect exited units.
    fn reap(&mut self) {
        while let Some(result) = self.units.try_join_next() {
            if let Err(e) = result
                && e.is_panic()
            {
                tracing::error!("Execution unit on {} panicked: {}", self.config.worker_id, e);
            }
        }
    }
}

/// Worker actor that executes jobs claimed from the coordinator.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting worker {} with {} slots",
            args.config.worker_id,
            args.config.concurrency
        );

        // Start the poll loop
        let poll_interval = args.config.poll_interval.max(MIN_INTERVAL);
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if myself_clone.send_message(WorkerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerState {
            slots: Arc::new(Semaphore::new(args.config.concurrency)),
            config: args.config,
            coordinator: args.coordinator,
            harness: args.harness,
            running: HashMap::new(),
            next_unit: 0,
            units: JoinSet::new(),
            accepting: true,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                state.reap();

                // Claim until the queue is empty or every slot is busy
                while state.accepting {
                    let Ok(permit) = state.slots.clone().try_acquire_owned() else {
                        tracing::debug!("Worker {} is at capacity", state.config.worker_id);
                        break;
                    };

                    match state
                        .coordinator
                        .dequeue(&state.config.worker_id, state.config.concurrency)
                        .await
                    {
                        Ok(Some(job)) => state.launch(&myself, job, permit),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Poll from {} failed: {}", state.config.worker_id, e);
                            break;
                        }
                    }
                }
            }

            WorkerMessage::JobFinished { unit_id } => {
                if let Some((job_id, _)) = state.running.remove(&unit_id) {
                    tracing::debug!("Worker {} released job {}", state.config.worker_id, job_id);
                }
            }

            WorkerMessage::RunningJobs { reply } => {
                let _ = reply.send(state.running.values().map(|(job_id, _)| *job_id).collect());
            }

            WorkerMessage::Shutdown { reply } => {
                tracing::info!(
                    "Shutting down worker {} with {} running jobs",
                    state.config.worker_id,
                    state.running.len()
                );
                state.accepting = false;
                for (_, cancel) in state.running.values() {
                    cancel.cancel();
                }

                let grace = state.config.shutdown_grace;
                let units = &mut state.units;
                let drained = tokio::time::timeout(grace, async {
                    while units.join_next().await.is_some() {}
                })
                .await;
                if drained.is_err() {
                    tracing::warn!(
                        "Aborting {} jobs still running after {:?}",
                        state.units.len(),
                        grace
                    );
                    state.units.abort_all();
                }

                let _ = reply.send(());
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.units.abort_all();
        tracing::info!("Worker {} stopped", state.config.worker_id);
        Ok(())
    }
}

/// Handle to a running worker actor.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    actor: ActorRef<WorkerMessage>,
}

impl WorkerHandle {
    pub fn actor(&self) -> &ActorRef<WorkerMessage> {
        &self.actor
    }

    /// Jobs currently executing on this worker.
    pub async fn running_jobs(&self) -> Result<Vec<JobId>, WorkerError> {
        match ractor::rpc::call(&self.actor, |reply| WorkerMessage::RunningJobs { reply }, None).await {
            Ok(CallResult::Success(jobs)) => Ok(jobs),
            Ok(_) => Err(WorkerError::Unavailable("no reply".into())),
            Err(e) => Err(WorkerError::Unavailable(e.to_string())),
        }
    }

    /// Cancel running jobs, wait for them up to the grace period, and stop.
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        match ractor::rpc::call(&self.actor, |reply| WorkerMessage::Shutdown { reply }, None).await {
            Ok(CallResult::Success(())) => Ok(()),
            Ok(_) => Err(WorkerError::Unavailable("no reply".into())),
            Err(e) => Err(WorkerError::Unavailable(e.to_string())),
        }
    }
}

/// Wait until the coordinator and every readiness check respond.
///
/// Retries with a fixed backoff; running out of attempts is fatal.
pub async fn wait_until_ready(
    config: &WorkerConfig,
    coordinator: &CoordinatorHandle,
    checks: &[Arc<dyn ReadinessCheck>],
) -> Result<(), WorkerError> {
    let attempts = config.readiness_attempts.max(1);
    let mut reason = String::new();

    for attempt in 1..=attempts {
        match probe(coordinator, checks).await {
            Ok(()) => {
                tracing::info!("Worker {} ready after {} attempt(s)", config.worker_id, attempt);
                return Ok(());
            }
            Err(e) => {
                tracing::warn!("Readiness attempt {}/{} failed: {}", attempt, attempts, e);
                reason = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.readiness_backoff).await;
        }
    }

    Err(WorkerError::CoordinatorNotReady { attempts, reason })
}

async fn probe(coordinator: &CoordinatorHandle, checks: &[Arc<dyn ReadinessCheck>]) -> Result<(), String> {
    coordinator
        .get_status()
        .await
        .map_err(|e| format!("coordinator: {}", e))?;
    for check in checks {
        check.check().await.map_err(|e| format!("{}: {}", check.name(), e))?;
    }
    Ok(())
}

/// Check readiness, then start a worker.
pub async fn start_worker(args: WorkerArgs) -> Result<(WorkerHandle, JoinHandle<()>), WorkerError> {
    let coordinator = args.coordinator.clone().with_timeout(args.config.rpc_timeout);
    wait_until_ready(&args.config, &coordinator, &args.readiness_checks).await?;

    let name = format!("worker-{}", args.config.worker_id);
    let args = WorkerArgs { coordinator, ..args };
    let (actor, handle) = Actor::spawn(Some(name), WorkerActor, args)
        .await
        .map_err(|e| WorkerError::Spawn(e.to_string()))?;
    Ok((WorkerHandle { actor }, handle))
}
