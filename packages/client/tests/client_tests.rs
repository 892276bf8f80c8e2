#![allow(clippy::disallowed_methods)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{CoordinatorConfig, CoordinatorHandle, MemoryStateStore, start_coordinator};
use client::{ClientConfig, JobUpdate, QueueClient};
use queue_core::payload::to_payload;
use queue_core::{JobId, JobStatus, OptimizationJob, Priority, SimulationParams};
use serde_json::json;

const POLL: Duration = Duration::from_millis(50);

async fn coordinator(config: CoordinatorConfig) -> CoordinatorHandle {
    let store = Arc::new(MemoryStateStore::new());
    let (coordinator, _) = start_coordinator(config, store).await.unwrap();
    coordinator
}

fn instance(prefix: &str) -> CoordinatorConfig {
    CoordinatorConfig::new(format!("{}-{}", prefix, JobId::new()))
}

fn sample_job() -> OptimizationJob {
    let params = SimulationParams::new("momentum", "ETH-USD", "4h").with_parameter("window", json!([5, 10]));
    OptimizationJob::new("opt-42", "plan-7", params)
        .with_name("Momentum sweep")
        .with_promise_score(0.8)
}

/// Collects every update the client emits.
fn recorder() -> (Arc<Mutex<Vec<JobUpdate>>>, impl FnMut(JobUpdate) + Send + 'static) {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = updates.clone();
    (updates, move |update| sink.lock().unwrap().push(update))
}

fn client(coordinator: &CoordinatorHandle) -> QueueClient {
    QueueClient::new(
        coordinator.clone(),
        ClientConfig::default().with_poll_interval(POLL).with_submitter("test-client"),
    )
}

#[tokio::test]
async fn submit_follows_the_job_to_completion() {
    let coordinator = coordinator(instance("client-complete")).await;
    let (updates, on_update) = recorder();

    let submission = client(&coordinator).submit(sample_job(), on_update).await.unwrap();
    assert_eq!(submission.job().status, JobStatus::Running);

    let item = coordinator.get_job(submission.queue_id()).await.unwrap().unwrap();
    assert_eq!(item.priority, Priority::new(3));
    assert_eq!(item.submitted_by.as_deref(), Some("test-client"));

    // A worker that does not know the domain shape.
    let claimed = coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    assert_eq!(claimed.id, submission.queue_id());
    coordinator
        .complete(claimed.id, Some("results/opt-42.parquet".into()))
        .await
        .unwrap();

    let finished = tokio::time::timeout(POLL * 4, submission.wait()).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.id, "opt-42");
    assert_eq!(finished.result_path.as_deref(), Some("results/opt-42.parquet"));
    assert!(finished.metrics.is_none());

    // Polling stops once the job is terminal.
    let seen = updates.lock().unwrap().len();
    tokio::time::sleep(POLL * 3).await;
    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), seen);
    assert_eq!(updates.last().unwrap().message, "Completed");
}

#[tokio::test]
async fn completed_payload_written_by_the_worker_wins() {
    let coordinator = coordinator(instance("client-rich")).await;
    let (_updates, on_update) = recorder();

    let submission = client(&coordinator).submit(sample_job(), on_update).await.unwrap();
    let claimed = coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();

    let now = chrono::Utc::now();
    let written_back = sample_job().into_completed(
        claimed.started_at,
        now,
        Some("results/rich.parquet".into()),
        Some(json!({"sharpe": 2.1})),
    );
    coordinator
        .complete_with_payload(
            claimed.id,
            Some("results/rich.parquet".into()),
            Some(to_payload(&written_back).unwrap()),
        )
        .await
        .unwrap();

    let finished = submission.wait().await.unwrap();
    assert_eq!(finished, written_back);
}

#[tokio::test]
async fn failures_reach_the_caller() {
    let coordinator = coordinator(instance("client-fail").with_max_retries(1)).await;
    let (updates, on_update) = recorder();

    let submission = client(&coordinator).submit(sample_job(), on_update).await.unwrap();
    let claimed = coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    coordinator.fail(claimed.id, "harness crashed").await.unwrap();

    let finished = submission.wait().await.unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.error.as_deref(), Some("harness crashed"));
    assert_eq!(updates.lock().unwrap().last().unwrap().message, "harness crashed");
}

#[tokio::test]
async fn retried_jobs_are_reported_as_queued() {
    let coordinator = coordinator(instance("client-retry")).await;
    let (updates, on_update) = recorder();

    let submission = client(&coordinator).submit(sample_job(), on_update).await.unwrap();
    let claimed = coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    coordinator.fail(claimed.id, "worker lost").await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let retried = updates
            .lock()
            .unwrap()
            .iter()
            .find(|update| update.message == "Queued for retry 1")
            .cloned();
        if let Some(update) = retried {
            assert_eq!(update.job.status, JobStatus::Queued);
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "retry was never observed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    submission.cancel();
    assert_eq!(submission.wait().await.unwrap().status, JobStatus::Cancelled);
}

#[tokio::test]
async fn vanished_items_resolve_as_failed() {
    let coordinator = coordinator(instance("client-vanish")).await;
    let (updates, on_update) = recorder();

    let client = QueueClient::new(
        coordinator.clone(),
        ClientConfig::default().with_poll_interval(Duration::from_millis(300)),
    );
    let submission = client.submit(sample_job(), on_update).await.unwrap();
    while updates.lock().unwrap().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Finish and purge the item between two polls.
    let claimed = coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    coordinator.complete(claimed.id, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    coordinator
        .cleanup(Duration::ZERO, Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(coordinator.get_job(claimed.id).await.unwrap().is_none());

    let finished = submission.wait().await.unwrap();
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.error.as_deref(), Some("Queue item disappeared"));
}

#[tokio::test]
async fn zero_poll_interval_still_follows_the_job() {
    let coordinator = coordinator(instance("client-zero")).await;
    let (_updates, on_update) = recorder();

    let config = ClientConfig::default().with_poll_interval(Duration::ZERO);
    assert_eq!(config.poll_interval, actors::MIN_INTERVAL);
    let submission = QueueClient::new(coordinator.clone(), config)
        .submit(sample_job(), on_update)
        .await
        .unwrap();

    let claimed = coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    coordinator.complete(claimed.id, None).await.unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(5), submission.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
}

#[tokio::test]
async fn cancelling_a_submission_cancels_the_queue_item() {
    let coordinator = coordinator(instance("client-cancel")).await;
    let (updates, on_update) = recorder();

    let submission = client(&coordinator).submit(sample_job(), on_update).await.unwrap();
    let queue_id = submission.queue_id();

    submission.cancel();
    let finished = submission.wait().await.unwrap();
    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(updates.lock().unwrap().last().unwrap().message, "Cancelled");

    let item = coordinator.get_job(queue_id).await.unwrap().unwrap();
    assert_eq!(item.status, JobStatus::Cancelled);
}
