#![allow(clippy::disallowed_methods)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use actors::{
    CoordinatorConfig, CoordinatorError, FileStateStore, MemoryStateStore, StateStore,
    start_coordinator,
};
use chrono::Utc;
use common::{memory_coordinator, unique_name};
use queue_core::{JobStatus, Priority, Progress, QueueEvent, QueueItem, QueueState};

#[tokio::test]
async fn higher_priority_is_claimed_first() {
    let (coordinator, _store) = memory_coordinator(CoordinatorConfig::new(unique_name("prio"))).await;
    let mut events = coordinator.subscribe().await.unwrap();

    let p1 = coordinator.enqueue("p1", Priority::new(3), None).await.unwrap();
    let p2 = coordinator
        .enqueue("p2", Priority::new(1), Some("optimizer".into()))
        .await
        .unwrap();
    assert_eq!(p2.submitted_by.as_deref(), Some("optimizer"));

    let claimed = coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    assert_eq!(claimed.id, p2.id);
    assert_eq!(claimed.status, JobStatus::Running);

    // One job per worker at the default limit.
    assert!(coordinator.dequeue_one("worker-a").await.unwrap().is_none());
    let next = coordinator.dequeue("worker-b", 1).await.unwrap().unwrap();
    assert_eq!(next.id, p1.id);

    assert!(matches!(events.recv().await.unwrap(), QueueEvent::JobEnqueued { job, .. } if job.id == p1.id));
    assert!(matches!(events.recv().await.unwrap(), QueueEvent::JobEnqueued { job, .. } if job.id == p2.id));
    assert!(matches!(
        events.recv().await.unwrap(),
        QueueEvent::JobStarted { job_id, worker_id, .. } if job_id == p2.id && worker_id == "worker-a"
    ));

    coordinator.shutdown();
}

#[tokio::test]
async fn failures_retry_until_the_limit() {
    let config = CoordinatorConfig::new(unique_name("retry")).with_max_retries(2);
    let (coordinator, _store) = memory_coordinator(config).await;
    let mut events = coordinator.subscribe().await.unwrap();

    let job = coordinator.enqueue("sweep", Priority::new(4), None).await.unwrap();
    assert_eq!(job.max_retries, 2);

    coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    assert!(coordinator.fail(job.id, "diverged").await.unwrap());

    let retried = coordinator.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(retried.status, JobStatus::Queued);
    assert_eq!(retried.priority, Priority::new(5));
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.error_message.as_deref(), Some("diverged"));

    coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    assert!(coordinator.fail(job.id, "diverged again").await.unwrap());

    let failed = coordinator.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.completed_at.is_some());

    // Terminal: everything else is a no-op.
    assert!(!coordinator.fail(job.id, "again").await.unwrap());
    assert!(!coordinator.complete(job.id, None).await.unwrap());
    assert!(!coordinator.cancel(job.id).await.unwrap());

    let mut will_retry = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::JobFailed { will_retry: retry, .. } = event {
            will_retry.push(retry);
        }
    }
    assert_eq!(will_retry, vec![true, false]);

    coordinator.shutdown();
}

#[tokio::test]
async fn completion_can_replace_the_payload() {
    let (coordinator, _store) = memory_coordinator(CoordinatorConfig::new(unique_name("complete"))).await;

    let job = coordinator.enqueue("pending", Priority::default(), None).await.unwrap();
    coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();

    assert!(coordinator.update_progress(job.id, Progress::new(3, 1)).await.unwrap());
    let running = coordinator.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(running.progress.map(|p| p.percent), Some(75.0));

    assert!(
        coordinator
            .complete_with_payload(job.id, Some("results/a.json".into()), Some("done".into()))
            .await
            .unwrap()
    );

    let completed = coordinator.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.payload, "done");
    assert_eq!(completed.result_location.as_deref(), Some("results/a.json"));
    assert!(completed.assigned_worker.is_none());

    // Idempotent.
    assert!(!coordinator.complete(job.id, None).await.unwrap());
    assert!(!coordinator.update_progress(job.id, Progress::new(4, 0)).await.unwrap());

    let stats = coordinator.get_status().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.queued, 0);

    coordinator.shutdown();
}

#[tokio::test]
async fn cancelled_jobs_reject_heartbeats() {
    let (coordinator, _store) = memory_coordinator(CoordinatorConfig::new(unique_name("cancel"))).await;

    let queued = coordinator.enqueue("queued", Priority::new(9), None).await.unwrap();
    let running = coordinator.enqueue("running", Priority::new(1), None).await.unwrap();
    coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();

    assert!(coordinator.heartbeat(running.id, "worker-a").await.unwrap());
    assert!(!coordinator.heartbeat(running.id, "worker-b").await.unwrap());

    assert!(coordinator.cancel(running.id).await.unwrap());
    assert!(!coordinator.heartbeat(running.id, "worker-a").await.unwrap());

    assert!(coordinator.cancel(queued.id).await.unwrap());
    assert!(coordinator.dequeue("worker-a", 1).await.unwrap().is_none());

    let cancelled = coordinator
        .get_jobs(Some(JobStatus::Cancelled), None)
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 2);

    coordinator.shutdown();
}

#[tokio::test]
async fn failed_save_leaves_state_unchanged() {
    let (coordinator, store) = memory_coordinator(CoordinatorConfig::new(unique_name("rollback"))).await;

    let job = coordinator.enqueue("kept", Priority::default(), None).await.unwrap();
    let saves = store.save_count();

    store.set_fail_saves(true);
    let err = coordinator.enqueue("lost", Priority::default(), None).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Persistence(_)));
    assert!(coordinator.dequeue("worker-a", 1).await.is_err());

    let stats = coordinator.get_status().await.unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.running, 0);
    assert_eq!(coordinator.get_job(job.id).await.unwrap().unwrap().status, JobStatus::Queued);
    assert_eq!(store.save_count(), saves);

    // Reads never touch the store; writes resume once it recovers.
    store.set_fail_saves(false);
    let claimed = coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);

    coordinator.shutdown();
}

#[tokio::test]
async fn state_survives_a_restart() {
    let instance = unique_name("restart");
    let store = Arc::new(MemoryStateStore::new());

    let (coordinator, handle) = start_coordinator(CoordinatorConfig::new(&instance), store.clone())
        .await
        .unwrap();
    let first = coordinator.enqueue("first", Priority::new(2), None).await.unwrap();
    let second = coordinator.enqueue("second", Priority::new(6), None).await.unwrap();
    coordinator.dequeue("worker-a", 1).await.unwrap().unwrap();
    coordinator.shutdown();
    handle.await.unwrap();

    assert!(matches!(coordinator.get_status().await, Err(CoordinatorError::Unavailable(_))));

    let (restarted, _) = start_coordinator(CoordinatorConfig::new(&instance), store.clone())
        .await
        .unwrap();
    let running = restarted.get_job(first.id).await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.assigned_worker.as_deref(), Some("worker-a"));

    let next = restarted.dequeue("worker-b", 1).await.unwrap().unwrap();
    assert_eq!(next.id, second.id);

    restarted.shutdown();
}

#[tokio::test]
async fn startup_recovers_stale_jobs() {
    let instance = unique_name("stale");
    let store = Arc::new(MemoryStateStore::new());

    // A job claimed two hours ago by a worker that went silent.
    let long_ago = Utc::now() - chrono::Duration::hours(2);
    let mut state = QueueState::new();
    let stale = state.enqueue(QueueItem::new("stale", Priority::new(4), long_ago));
    state.dequeue("worker-gone", 1, long_ago).unwrap();
    store.save(&instance, &state).await.unwrap();

    let (coordinator, _) = start_coordinator(CoordinatorConfig::new(&instance), store.clone())
        .await
        .unwrap();

    let recovered = coordinator.get_job(stale.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Queued);
    assert_eq!(recovered.priority, Priority::new(6));
    assert!(recovered.assigned_worker.is_none());
    assert!(coordinator.get_status().await.unwrap().last_cleanup.is_some());

    coordinator.shutdown();
}

#[tokio::test]
async fn cleanup_counts_removed_and_recovered() {
    let (coordinator, _store) = memory_coordinator(CoordinatorConfig::new(unique_name("cleanup"))).await;

    let done = coordinator.enqueue("done", Priority::new(1), None).await.unwrap();
    let busy = coordinator.enqueue("busy", Priority::new(2), None).await.unwrap();
    coordinator.dequeue("worker-a", 2).await.unwrap().unwrap();
    coordinator.dequeue("worker-a", 2).await.unwrap().unwrap();
    coordinator.complete(done.id, None).await.unwrap();

    // Generous windows leave everything in place.
    let untouched = coordinator
        .cleanup(Duration::from_secs(3600), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(untouched, 0);
    assert_eq!(coordinator.cleanup_with_defaults().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let count = coordinator.cleanup(Duration::ZERO, Duration::ZERO).await.unwrap();
    assert_eq!(count, 2);

    assert!(coordinator.get_job(done.id).await.unwrap().is_none());
    let recovered = coordinator.get_job(busy.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Queued);
    assert_eq!(recovered.priority, Priority::new(4));

    coordinator.shutdown();
}

#[tokio::test]
async fn file_store_persists_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let instance = unique_name("file");

    let store = Arc::new(FileStateStore::open(dir.path()).await.unwrap());
    let (coordinator, handle) = start_coordinator(CoordinatorConfig::new(&instance), store)
        .await
        .unwrap();
    let job = coordinator.enqueue("durable", Priority::new(3), None).await.unwrap();
    coordinator.shutdown();
    handle.await.unwrap();

    let reopened = FileStateStore::open(dir.path()).await.unwrap();
    let state = reopened.load(&instance).await.unwrap().unwrap();
    assert_eq!(state.get(job.id).map(|item| item.status), Some(JobStatus::Queued));

    // Versions continue from what is on disk.
    let version = reopened.save(&instance, &state).await.unwrap();
    assert_eq!(version, 2);

    let (restarted, _) = start_coordinator(CoordinatorConfig::new(&instance), Arc::new(reopened))
        .await
        .unwrap();
    assert_eq!(restarted.get_job(job.id).await.unwrap().unwrap().payload, "durable");
    restarted.shutdown();
}

#[tokio::test]
async fn failed_file_save_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let instance = unique_name("file-fail");
    let store = FileStateStore::open(dir.path()).await.unwrap();

    let state = QueueState::new();
    assert_eq!(store.save(&instance, &state).await.unwrap(), 1);

    // A directory in place of the state file makes the rename fail.
    let path = dir.path().join(format!("{}.json", instance));
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();

    assert!(store.save(&instance, &state).await.is_err());
    assert!(!dir.path().join(format!("{}.json.tmp", instance)).exists());
}
