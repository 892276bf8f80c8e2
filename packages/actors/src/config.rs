//! Runtime configuration for the coordinator and worker actors.

use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;

use queue_core::DEFAULT_MAX_RETRIES;

/// Default age after which terminal jobs are deleted.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default silence after which a running job is considered abandoned.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Shortest period any ticker runs at; `tokio::time::interval` rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration for a coordinator instance.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name of the instance; keys the persisted state record.
    pub instance: String,
    /// Max retries given to newly enqueued jobs.
    pub default_max_retries: u32,
    /// How long terminal jobs are kept.
    pub retention: Duration,
    /// Heartbeat silence after which a running job is recovered.
    pub stale_timeout: Duration,
    /// How often cleanup runs after the startup pass.
    pub cleanup_interval: Duration,
    /// Buffer size of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instance: "default".to_string(),
            default_max_retries: DEFAULT_MAX_RETRIES,
            retention: DEFAULT_RETENTION,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            cleanup_interval: Duration::from_secs(24 * 60 * 60),
            event_capacity: 1024,
        }
    }
}

impl CoordinatorConfig {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            ..Default::default()
        }
    }

    /// Build a config from `QUEUE_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(instance) = std::env::var("QUEUE_INSTANCE") {
            config.instance = instance;
        }
        if let Some(retries) = env_parse("QUEUE_MAX_RETRIES") {
            config.default_max_retries = retries;
        }
        if let Some(days) = env_parse::<u64>("QUEUE_RETENTION_DAYS") {
            config.retention = scaled(days, DAY);
        }
        if let Some(minutes) = env_parse::<u64>("QUEUE_STALE_MINUTES") {
            config.stale_timeout = scaled(minutes, MINUTE);
        }
        if let Some(hours) = env_parse::<u64>("QUEUE_CLEANUP_INTERVAL_HOURS") {
            config.cleanup_interval = scaled(hours.max(1), HOUR);
        }
        config
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_stale_timeout(mut self, stale_timeout: Duration) -> Self {
        self.stale_timeout = stale_timeout;
        self
    }

    /// Set how often cleanup recurs, no shorter than [`MIN_INTERVAL`].
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval.max(MIN_INTERVAL);
        self
    }
}

/// Configuration for a worker process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stable identity reported to the coordinator.
    pub worker_id: String,
    /// Maximum number of jobs executed at once.
    pub concurrency: usize,
    /// How often the coordinator is polled for work.
    pub poll_interval: Duration,
    /// How often running jobs push progress and heartbeats.
    pub report_interval: Duration,
    /// How long shutdown waits for cancelled jobs to wind down.
    pub shutdown_grace: Duration,
    /// Readiness probe attempts before startup gives up.
    pub readiness_attempts: u32,
    /// Fixed delay between readiness attempts.
    pub readiness_backoff: Duration,
    /// Timeout applied to every coordinator call.
    pub rpc_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            concurrency: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            poll_interval: Duration::from_secs(5),
            report_interval: Duration::from_secs(120),
            shutdown_grace: Duration::from_secs(120),
            readiness_attempts: 5,
            readiness_backoff: Duration::from_secs(2),
            rpc_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Build a config from `QUEUE_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(worker_id) = std::env::var("QUEUE_WORKER_ID") {
            config.worker_id = worker_id;
        }
        if let Some(concurrency) = env_parse("QUEUE_WORKER_CONCURRENCY") {
            config = config.with_concurrency(concurrency);
        }
        if let Some(secs) = env_parse("QUEUE_POLL_INTERVAL_SECS") {
            config = config.with_poll_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse("QUEUE_REPORT_INTERVAL_SECS") {
            config = config.with_report_interval(Duration::from_secs(secs));
        }
        if let Some(secs) = env_parse("QUEUE_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("QUEUE_RPC_TIMEOUT_SECS") {
            config.rpc_timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// Set the concurrency budget; at least one job always runs.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Intervals are never shorter than [`MIN_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_readiness(mut self, attempts: u32, backoff: Duration) -> Self {
        self.readiness_attempts = attempts.max(1);
        self.readiness_backoff = backoff;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }
}

/// `"{host}-{pid}"`, stable for the life of the process.
pub fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", host, std::process::id())
}

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// `count` units of `unit_secs` seconds, saturating instead of overflowing.
fn scaled(count: u64, unit_secs: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(unit_secs))
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
