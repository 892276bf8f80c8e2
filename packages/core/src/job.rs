//! Queue item types: the unit of work tracked by the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Default number of attempts before a failing job becomes terminally failed.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unique identifier for a queue item, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority: 1 is the most urgent, 10 the least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const LOWEST: Priority = Priority(10);

    /// Build a priority, clamping out-of-range values into `1..=10`.
    pub fn new(value: i64) -> Self {
        Self(value.clamp(Self::HIGHEST.0 as i64, Self::LOWEST.0 as i64) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Move this priority `steps` towards the back of the queue, capped at 10.
    pub fn demote(self, steps: u8) -> Self {
        Self(self.0.saturating_add(steps).min(Self::LOWEST.0))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(5)
    }
}

impl From<i64> for Priority {
    fn from(value: i64) -> Self {
        Priority::new(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue to be claimed.
    #[default]
    Queued,
    /// Claimed by a worker and executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Exhausted its retries.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress reported by a worker for a running simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Simulations finished so far.
    pub completed: u64,
    /// Simulations still waiting inside the harness.
    pub queued: u64,
    /// Completion percentage in `0.0..=100.0`.
    pub percent: f64,
}

impl Progress {
    pub fn new(completed: u64, queued: u64) -> Self {
        let total = completed + queued;
        let percent = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        Self {
            completed,
            queued,
            percent,
        }
    }
}

/// A unit of work in the coordinator's queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: JobId,
    pub priority: Priority,
    /// Opaque job parameters, carried end-to-end.
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Set exactly while the item is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set exactly while the item is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
}

impl QueueItem {
    /// Create a new queued item.
    pub fn new(payload: impl Into<String>, priority: Priority, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            priority,
            payload: payload.into(),
            submitted_by: None,
            created_at: now,
            last_updated_at: now,
            status: JobStatus::Queued,
            assigned_worker: None,
            started_at: None,
            completed_at: None,
            progress: None,
            result_location: None,
            error_message: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set who submitted this item.
    pub fn with_submitter(mut self, submitted_by: Option<String>) -> Self {
        self.submitted_by = submitted_by;
        self
    }

    /// Set the max retries for this item.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether the item is running on behalf of `worker_id`.
    pub fn is_running_on(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Running && self.assigned_worker.as_deref() == Some(worker_id)
    }

    /// Wall-clock duration between start and completion, if both are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
            _ => None,
        }
    }

    /// Put the item back in the waiting state, `steps` priority levels lower.
    pub(crate) fn requeue(&mut self, steps: u8, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.assigned_worker = None;
        self.started_at = None;
        self.completed_at = None;
        self.progress = None;
        self.priority = self.priority.demote(steps);
        self.last_updated_at = now;
    }

    /// Move the item into a terminal state.
    pub(crate) fn finish(&mut self, status: JobStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.assigned_worker = None;
        self.completed_at = Some(now);
        self.last_updated_at = now;
    }
}
