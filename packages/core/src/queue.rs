//! The coordinator's queue state and its transitions.
//!
//! Every transition is a plain method taking the current time explicitly, so
//! the single writer that owns a [`QueueState`] decides when "now" is and the
//! state machine stays deterministic under test.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobStatus, Progress, QueueItem};

/// Default number of items returned by [`QueueState::list`].
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Priority levels a job loses each time it fails and is retried.
const RETRY_DEMOTION: u8 = 1;

/// Priority levels a job loses when it is reclaimed from a silent worker.
const STALE_DEMOTION: u8 = 2;

/// Aggregate view of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Distinct workers with at least one running job.
    pub active_workers: u64,
    /// Mean run time of completed jobs with a known duration.
    pub avg_duration_ms: Option<f64>,
    /// Estimated delay until the next queued job can start.
    pub estimated_wait_ms: Option<u64>,
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl QueueStats {
    /// Total jobs currently tracked.
    pub fn total(&self) -> u64 {
        self.queued + self.running + self.completed + self.failed + self.cancelled
    }

    /// Jobs still waiting or executing.
    pub fn active(&self) -> u64 {
        self.queued + self.running
    }
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Terminal items deleted because they aged out of the retention window.
    pub removed: Vec<JobId>,
    /// Running items returned to the queue because their worker went silent.
    pub recovered: Vec<JobId>,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.removed.len() + self.recovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Queue state owned by a single coordinator.
///
/// `order` holds the ids of queued items only. Fresh items are inserted in
/// (priority, created_at) order; retried and recovered items are appended to
/// the back regardless of priority, so they yield to work already waiting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueState {
    jobs: BTreeMap<JobId, QueueItem>,
    order: Vec<JobId>,
    /// Jobs claimed per worker. Informational; concurrency is checked
    /// against `jobs`.
    worker_jobs: BTreeMap<String, BTreeSet<JobId>>,
    last_cleanup: Option<DateTime<Utc>>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of queued items in dispatch order.
    pub fn order(&self) -> &[JobId] {
        &self.order
    }

    /// Jobs currently claimed by `worker_id`, as recorded at claim time.
    pub fn worker_jobs(&self, worker_id: &str) -> Vec<JobId> {
        self.worker_jobs
            .get(worker_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn last_cleanup(&self) -> Option<DateTime<Utc>> {
        self.last_cleanup
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, id: JobId) -> Option<&QueueItem> {
        self.jobs.get(&id)
    }

    /// Add a new item, keeping fresh items in (priority, created_at) order.
    pub fn enqueue(&mut self, item: QueueItem) -> QueueItem {
        let position = self
            .order
            .iter()
            .position(|queued_id| {
                self.jobs.get(queued_id).is_some_and(|queued| {
                    queued.priority > item.priority
                        || (queued.priority == item.priority
                            && queued.created_at > item.created_at)
                })
            })
            .unwrap_or(self.order.len());

        self.order.insert(position, item.id);
        self.jobs.insert(item.id, item.clone());
        item
    }

    /// Number of running jobs assigned to `worker_id`.
    pub fn running_count(&self, worker_id: &str) -> usize {
        self.jobs
            .values()
            .filter(|item| item.is_running_on(worker_id))
            .count()
    }

    /// Claim the next queued item for `worker_id`, unless it is already
    /// running `max_concurrent` jobs.
    pub fn dequeue(
        &mut self,
        worker_id: &str,
        max_concurrent: usize,
        now: DateTime<Utc>,
    ) -> Option<QueueItem> {
        if self.running_count(worker_id) >= max_concurrent {
            return None;
        }

        let position = self.order.iter().position(|id| {
            self.jobs
                .get(id)
                .is_some_and(|item| item.status == JobStatus::Queued)
        })?;
        let id = self.order.remove(position);
        let item = self.jobs.get_mut(&id)?;

        item.status = JobStatus::Running;
        item.assigned_worker = Some(worker_id.to_string());
        item.started_at = Some(now);
        item.last_updated_at = now;

        self.worker_jobs
            .entry(worker_id.to_string())
            .or_default()
            .insert(id);

        Some(item.clone())
    }

    /// Record progress for a running item.
    pub fn update_progress(&mut self, id: JobId, progress: Progress, now: DateTime<Utc>) -> bool {
        match self.jobs.get_mut(&id) {
            Some(item) if item.status == JobStatus::Running => {
                item.progress = Some(progress);
                item.last_updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Mark a running item completed. A `payload` replaces the stored one.
    pub fn complete(
        &mut self,
        id: JobId,
        result_location: Option<String>,
        payload: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(item) = self.jobs.get_mut(&id) else {
            return false;
        };
        if item.status != JobStatus::Running {
            return false;
        }

        let worker = item.assigned_worker.take();
        item.result_location = result_location;
        if let Some(payload) = payload {
            item.payload = payload;
        }
        item.finish(JobStatus::Completed, now);

        self.release(worker.as_deref(), id);
        true
    }

    /// Record a failed attempt. The item is retried at a lower priority until
    /// it reaches `max_retries`, then fails terminally.
    pub fn fail(&mut self, id: JobId, error_message: impl Into<String>, now: DateTime<Utc>) -> bool {
        let Some(item) = self.jobs.get_mut(&id) else {
            return false;
        };
        if item.status.is_terminal() {
            return false;
        }

        let worker = item.assigned_worker.take();
        item.retry_count += 1;
        item.error_message = Some(error_message.into());

        if item.retry_count >= item.max_retries {
            item.finish(JobStatus::Failed, now);
            self.order.retain(|queued| *queued != id);
        } else {
            item.requeue(RETRY_DEMOTION, now);
            // Appended, not priority-sorted: a retry waits behind everything
            // already queued.
            self.order.retain(|queued| *queued != id);
            self.order.push(id);
        }

        self.release(worker.as_deref(), id);
        true
    }

    /// Cancel a queued or running item.
    pub fn cancel(&mut self, id: JobId, now: DateTime<Utc>) -> bool {
        let Some(item) = self.jobs.get_mut(&id) else {
            return false;
        };
        if item.status.is_terminal() {
            return false;
        }

        let worker = item.assigned_worker.take();
        item.finish(JobStatus::Cancelled, now);

        self.order.retain(|queued| *queued != id);
        self.release(worker.as_deref(), id);
        true
    }

    /// Refresh the liveness timestamp of an item running on `worker_id`.
    pub fn heartbeat(&mut self, id: JobId, worker_id: &str, now: DateTime<Utc>) -> bool {
        match self.jobs.get_mut(&id) {
            Some(item) if item.is_running_on(worker_id) => {
                item.last_updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Items matching `status`, newest first.
    pub fn list(&self, status: Option<JobStatus>, limit: usize) -> Vec<QueueItem> {
        let mut items: Vec<&QueueItem> = self
            .jobs
            .values()
            .filter(|item| status.is_none_or(|s| item.status == s))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.into_iter().take(limit).cloned().collect()
    }

    /// Compute aggregate statistics as of `now`.
    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let mut stats = QueueStats {
            last_cleanup: self.last_cleanup,
            ..QueueStats::default()
        };
        let mut workers = HashSet::new();
        let mut durations = Vec::new();
        let mut shortest_remaining: Option<i64> = None;

        for item in self.jobs.values() {
            match item.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => {
                    stats.running += 1;
                    if let Some(worker) = &item.assigned_worker {
                        workers.insert(worker.as_str());
                    }
                    if let Some(remaining) = remaining_ms(item, now) {
                        shortest_remaining =
                            Some(shortest_remaining.map_or(remaining, |r| r.min(remaining)));
                    }
                }
                JobStatus::Completed => {
                    stats.completed += 1;
                    if let Some(duration) = item.duration_ms() {
                        durations.push(duration as f64);
                    }
                }
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }

        stats.active_workers = workers.len() as u64;
        if !durations.is_empty() {
            stats.avg_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        if stats.queued > 0 {
            stats.estimated_wait_ms = shortest_remaining.map(|ms| ms.max(0) as u64);
        }

        stats
    }

    /// Delete aged-out terminal items and recover running items whose worker
    /// has not been heard from within `stale_timeout`.
    pub fn cleanup(
        &mut self,
        retention: Duration,
        stale_timeout: Duration,
        now: DateTime<Utc>,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();
        let retention_cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale_cutoff = now.checked_sub_signed(stale_timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);

        self.jobs.retain(|id, item| {
            let expired = item.status.is_terminal()
                && item.completed_at.is_some_and(|done| done < retention_cutoff);
            if expired {
                report.removed.push(*id);
            }
            !expired
        });

        let stale: Vec<(JobId, Option<String>)> = self
            .jobs
            .values()
            .filter(|item| item.status == JobStatus::Running && item.last_updated_at < stale_cutoff)
            .map(|item| (item.id, item.assigned_worker.clone()))
            .collect();

        for (id, worker) in stale {
            if let Some(item) = self.jobs.get_mut(&id) {
                item.requeue(STALE_DEMOTION, now);
            }
            self.order.push(id);
            self.release(worker.as_deref(), id);
            report.recovered.push(id);
        }

        self.last_cleanup = Some(now);
        report
    }

    /// Check the structural invariants between `jobs`, `order` and item fields.
    pub fn is_consistent(&self) -> bool {
        let mut seen = HashSet::new();
        let order_ok = self.order.iter().all(|id| {
            seen.insert(*id)
                && self
                    .jobs
                    .get(id)
                    .is_some_and(|item| item.status == JobStatus::Queued)
        });
        let queued_ok = self
            .jobs
            .values()
            .filter(|item| item.status == JobStatus::Queued)
            .all(|item| seen.contains(&item.id));
        let items_ok = self.jobs.values().all(|item| {
            (item.assigned_worker.is_some() == (item.status == JobStatus::Running))
                && (item.completed_at.is_some() == item.status.is_terminal())
        });

        order_ok && queued_ok && items_ok
    }

    fn release(&mut self, worker: Option<&str>, id: JobId) {
        let Some(worker) = worker else {
            return;
        };
        if let Some(ids) = self.worker_jobs.get_mut(worker) {
            ids.remove(&id);
            if ids.is_empty() {
                self.worker_jobs.remove(worker);
            }
        }
    }
}

/// Projected milliseconds left for a running item, from its progress so far.
fn remaining_ms(item: &QueueItem, now: DateTime<Utc>) -> Option<i64> {
    let progress = item.progress?;
    let started = item.started_at?;
    if progress.percent <= 0.0 {
        return None;
    }

    let elapsed = (now - started).num_milliseconds().max(0) as f64;
    let projected_total = elapsed * (100.0 / progress.percent.min(100.0));
    Some((projected_total - elapsed) as i64)
}
