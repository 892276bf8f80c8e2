//! Submitting client configuration.

use std::time::Duration;

use actors::MIN_INTERVAL;

/// Configuration for a [`QueueClient`](crate::QueueClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How often a submitted job is polled.
    pub poll_interval: Duration,
    /// Recorded as the submitter of every job.
    pub submitter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            submitter: "optimizer".to_string(),
        }
    }
}

impl ClientConfig {
    /// Build a config from `QUEUE_CLIENT_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = std::env::var("QUEUE_CLIENT_POLL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config = config.with_poll_interval(Duration::from_secs(secs));
        }
        if let Ok(submitter) = std::env::var("QUEUE_CLIENT_NAME") {
            config.submitter = submitter;
        }
        config
    }

    /// Set the poll interval, no shorter than [`MIN_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.submitter = submitter.into();
        self
    }
}
