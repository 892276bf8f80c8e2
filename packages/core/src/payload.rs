//! Conversion between optimization jobs and queue payloads.
//!
//! A payload is an opaque string to the coordinator. Submitters put a full
//! [`OptimizationJob`] in it; older workers only understand a bare
//! [`SimulationParams`] object. Both shapes are JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobStatus, Priority};

/// Parameters the simulation harness needs to run one backtest sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub strategy: String,
    pub symbol: String,
    pub timeframe: String,
    /// Strategy parameters to sweep, by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl SimulationParams {
    pub fn new(
        strategy: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: impl Into<String>,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add a strategy parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }
}

/// An optimization job as the strategy platform sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: String,
    pub plan_id: String,
    #[serde(default)]
    pub name: String,
    pub params: SimulationParams,
    /// Caller's 0..1 estimate of how valuable this job is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promise_score: Option<f64>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    /// Result summary written back by workers that understand this shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

impl OptimizationJob {
    pub fn new(id: impl Into<String>, plan_id: impl Into<String>, params: SimulationParams) -> Self {
        Self {
            id: id.into(),
            plan_id: plan_id.into(),
            name: String::new(),
            params,
            promise_score: None,
            status: JobStatus::Queued,
            started_at: None,
            completed_at: None,
            error: None,
            result_path: None,
            metrics: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_promise_score(mut self, score: f64) -> Self {
        self.promise_score = Some(score);
        self
    }

    /// The completed form of this job, as a worker writes it back.
    pub fn into_completed(
        mut self,
        started_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
        result_path: Option<String>,
        metrics: Option<serde_json::Value>,
    ) -> Self {
        self.status = JobStatus::Completed;
        self.started_at = started_at.or(self.started_at);
        self.completed_at = Some(completed_at);
        self.error = None;
        self.result_path = result_path;
        self.metrics = metrics;
        self
    }
}

/// What a payload turned out to contain.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape {
    /// A full optimization job.
    Job(Box<OptimizationJob>),
    /// Bare simulation parameters, as produced for legacy workers.
    Legacy(SimulationParams),
    /// Anything else.
    Unrecognized,
}

impl PayloadShape {
    /// The simulation parameters carried by this payload, in either shape.
    pub fn simulation_params(&self) -> Option<&SimulationParams> {
        match self {
            PayloadShape::Job(job) => Some(&job.params),
            PayloadShape::Legacy(params) => Some(params),
            PayloadShape::Unrecognized => None,
        }
    }
}

/// Serialize a job into a payload.
pub fn to_payload(job: &OptimizationJob) -> Result<String, serde_json::Error> {
    serde_json::to_string(job)
}

/// Serialize bare simulation parameters into a legacy payload.
pub fn to_legacy_payload(params: &SimulationParams) -> Result<String, serde_json::Error> {
    serde_json::to_string(params)
}

/// Best-effort decoding of a payload.
pub fn from_payload(payload: &str) -> PayloadShape {
    if let Ok(job) = serde_json::from_str::<OptimizationJob>(payload) {
        return PayloadShape::Job(Box::new(job));
    }
    if let Ok(params) = serde_json::from_str::<SimulationParams>(payload) {
        return PayloadShape::Legacy(params);
    }
    PayloadShape::Unrecognized
}

/// Map a promise score onto a queue priority.
///
/// Scores in `0.0..=1.0` map linearly onto priorities 9..=1, so the most
/// promising work runs first. Missing or non-finite scores get the default.
pub fn priority_for_score(score: Option<f64>) -> Priority {
    match score {
        Some(score) if score.is_finite() => {
            let score = score.clamp(0.0, 1.0);
            Priority::new((9.0 - 8.0 * score).round() as i64)
        }
        _ => Priority::default(),
    }
}
