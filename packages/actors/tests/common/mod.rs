#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actors::{
    CoordinatorConfig, CoordinatorHandle, HarnessRun, MemoryStateStore, ProgressTracker,
    SimulationHarness, WorkerArgs, WorkerConfig, WorkerHandle, start_coordinator, start_worker,
};
use queue_core::payload::{to_legacy_payload, to_payload};
use queue_core::{JobId, JobStatus, OptimizationJob, QueueItem, SimulationParams};
use serde_json::{Value, json};

pub const WAIT: Duration = Duration::from_secs(5);

/// A fresh coordinator instance name, so actor names never collide.
pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, JobId::new())
}

pub async fn memory_coordinator(
    config: CoordinatorConfig,
) -> (CoordinatorHandle, Arc<MemoryStateStore>) {
    let store = Arc::new(MemoryStateStore::new());
    let (coordinator, _) = start_coordinator(config, store.clone()).await.unwrap();
    (coordinator, store)
}

pub fn fast_worker_config(concurrency: usize) -> WorkerConfig {
    WorkerConfig::default()
        .with_worker_id(unique_name("worker"))
        .with_concurrency(concurrency)
        .with_poll_interval(Duration::from_millis(20))
        .with_report_interval(Duration::from_millis(50))
        .with_shutdown_grace(Duration::from_secs(1))
        .with_readiness(2, Duration::from_millis(10))
}

pub async fn spawn_worker(
    coordinator: &CoordinatorHandle,
    harness: Arc<FakeHarness>,
    concurrency: usize,
) -> WorkerHandle {
    let args = WorkerArgs::new(fast_worker_config(concurrency), coordinator.clone(), harness);
    let (worker, _) = start_worker(args).await.unwrap();
    worker
}

pub fn params(strategy: &str, millis: u64) -> SimulationParams {
    SimulationParams::new(strategy, "BTC-USD", "1h").with_parameter("millis", json!(millis))
}

/// A domain job payload for the fake harness.
pub fn job_payload(strategy: &str, millis: u64) -> String {
    let job = OptimizationJob::new(unique_name("opt"), "plan-1", params(strategy, millis));
    to_payload(&job).unwrap()
}

/// A legacy payload for the fake harness.
pub fn legacy_payload(strategy: &str, millis: u64) -> String {
    to_legacy_payload(&params(strategy, millis)).unwrap()
}

/// Poll until the job reaches `status`.
pub async fn wait_for_status(coordinator: &CoordinatorHandle, job_id: JobId, status: JobStatus) -> QueueItem {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let item = coordinator.get_job(job_id).await.unwrap();
        if let Some(item) = item.filter(|item| item.status == status) {
            return item;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} never reached {}",
            job_id,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `check` holds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Harness whose behaviour is picked by the strategy name:
/// `succeed`, `fail`, `panic`, `hang` and `refuse`. `flaky` fails its first
/// run and hangs on every later one.
#[derive(Default)]
pub struct FakeHarness {
    pub started: AtomicUsize,
    flaky_runs: AtomicUsize,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeHarness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Counts a simulation as active until dropped.
struct ActiveGauge {
    active: Arc<AtomicUsize>,
}

impl ActiveGauge {
    fn enter(active: Arc<AtomicUsize>, peak: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveGauge {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulationHarness for FakeHarness {
    fn start(&self, params: SimulationParams) -> Result<HarnessRun, String> {
        if params.strategy == "refuse" {
            return Err("engine offline".into());
        }
        self.started.fetch_add(1, Ordering::SeqCst);

        let millis = params.parameters.get("millis").and_then(Value::as_u64).unwrap_or(50);
        let step = Duration::from_millis(millis / 10);
        let gauge = ActiveGauge::enter(self.active.clone(), &self.peak);
        let tracker = ProgressTracker::new(10);
        let progress = tracker.clone();
        let strategy = match params.strategy.as_str() {
            "flaky" if self.flaky_runs.fetch_add(1, Ordering::SeqCst) == 0 => "fail",
            "flaky" => "hang",
            other => other,
        }
        .to_string();

        let completion = Box::pin(async move {
            let _gauge = gauge;
            match strategy.as_str() {
                "fail" => {
                    tokio::time::sleep(step).await;
                    Err("strategy diverged".to_string())
                }
                "panic" => {
                    tokio::time::sleep(step).await;
                    panic!("harness exploded");
                }
                "hang" => {
                    progress.advance();
                    std::future::pending::<()>().await;
                    Ok(())
                }
                _ => {
                    for _ in 0..10 {
                        tokio::time::sleep(step).await;
                        progress.advance();
                    }
                    progress.finish(
                        Some(format!("results/{}.json", params.symbol)),
                        Some(json!({"sharpe": 1.5})),
                    );
                    Ok(())
                }
            }
        });

        Ok(HarnessRun {
            handle: tracker,
            completion,
        })
    }
}
