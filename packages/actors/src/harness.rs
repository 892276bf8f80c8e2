//! The simulation harness a worker drives for each claimed job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use queue_core::{Progress, SimulationParams};
use serde_json::Value;

/// Result of a finished simulation: `Err` carries a diagnostic message.
pub type HarnessResult = Result<(), String>;

/// Future resolving when a simulation finishes.
pub type HarnessFuture = Pin<Box<dyn Future<Output = HarnessResult> + Send>>;

/// Live view of a running simulation.
pub trait SimulationHandle: Send + Sync {
    fn is_finished(&self) -> bool;

    fn progress(&self) -> Progress;

    /// Where the results were written, once known.
    fn result_location(&self) -> Option<String>;

    /// Summary metrics, once known.
    fn summary(&self) -> Option<Value> {
        None
    }
}

/// A started simulation.
pub struct HarnessRun {
    pub handle: Arc<dyn SimulationHandle>,
    /// Dropping this future stops the simulation.
    pub completion: HarnessFuture,
}

/// Starts simulations.
///
/// Implement this trait to plug a simulation engine into a worker.
pub trait SimulationHarness: Send + Sync + 'static {
    /// Start a simulation, or explain why it could not start.
    fn start(&self, params: SimulationParams) -> Result<HarnessRun, String>;
}

/// A simple function-based harness.
pub struct FnHarness<F>
where
    F: Fn(SimulationParams) -> Result<HarnessRun, String> + Send + Sync + 'static,
{
    start: F,
}

impl<F> FnHarness<F>
where
    F: Fn(SimulationParams) -> Result<HarnessRun, String> + Send + Sync + 'static,
{
    pub fn new(start: F) -> Self {
        Self { start }
    }
}

impl<F> SimulationHarness for FnHarness<F>
where
    F: Fn(SimulationParams) -> Result<HarnessRun, String> + Send + Sync + 'static,
{
    fn start(&self, params: SimulationParams) -> Result<HarnessRun, String> {
        (self.start)(params)
    }
}

/// Thread-safe [`SimulationHandle`] that a simulation updates as it runs.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    completed: AtomicU64,
    total: AtomicU64,
    finished: AtomicBool,
    result_location: Mutex<Option<String>>,
    summary: Mutex<Option<Value>>,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Arc<Self> {
        let tracker = Self::default();
        tracker.total.store(total, Ordering::SeqCst);
        Arc::new(tracker)
    }

    /// Record that one more unit of work finished.
    pub fn advance(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark the simulation finished with its outputs.
    pub fn finish(&self, result_location: Option<String>, summary: Option<Value>) {
        *self.result_location.lock().unwrap_or_else(PoisonError::into_inner) = result_location;
        *self.summary.lock().unwrap_or_else(PoisonError::into_inner) = summary;
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl SimulationHandle for ProgressTracker {
    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn progress(&self) -> Progress {
        let total = self.total.load(Ordering::SeqCst);
        let completed = self.completed.load(Ordering::SeqCst).min(total);
        Progress::new(completed, total - completed)
    }

    fn result_location(&self) -> Option<String> {
        self.result_location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn summary(&self) -> Option<Value> {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}
