//! Demo simulation harness and seed jobs.

use std::sync::Arc;
use std::time::Duration;

use actors::{FnHarness, HarnessRun, ProgressTracker, SimulationHarness};
use client::QueueClient;
use queue_core::{OptimizationJob, SimulationParams};
use serde_json::{Value, json};

/// A timed simulation: `steps` steps of `step_millis` each.
///
/// The `fail` strategy fails halfway through.
pub fn harness() -> Arc<dyn SimulationHarness> {
    Arc::new(FnHarness::new(|params: SimulationParams| -> Result<HarnessRun, String> {
        let steps = params.parameters.get("steps").and_then(Value::as_u64).unwrap_or(20);
        let step = Duration::from_millis(
            params
                .parameters
                .get("step_millis")
                .and_then(Value::as_u64)
                .unwrap_or(500),
        );
        let tracker = ProgressTracker::new(steps);
        let progress = tracker.clone();

        let completion = Box::pin(async move {
            tracing::info!(
                "Simulating {} on {} {} for {} steps",
                params.strategy,
                params.symbol,
                params.timeframe,
                steps
            );
            for done in 1..=steps {
                tokio::time::sleep(step).await;
                progress.advance();
                if params.strategy == "fail" && done * 2 >= steps {
                    return Err(format!("Strategy {} diverged at step {}", params.strategy, done));
                }
            }
            progress.finish(
                Some(format!(
                    "results/{}-{}-{}.json",
                    params.strategy, params.symbol, params.timeframe
                )),
                Some(json!({ "steps": steps })),
            );
            Ok(())
        });

        Ok(HarnessRun {
            handle: tracker,
            completion,
        })
    }))
}

/// Submit `count` demo jobs and log their updates.
pub async fn seed(client: &QueueClient, count: usize) -> Result<(), client::ClientError> {
    let strategies = ["momentum", "mean-reversion", "breakout", "fail"];
    for n in 0..count {
        let strategy = strategies[n % strategies.len()];
        let params = SimulationParams::new(strategy, "BTC-USD", "1h")
            .with_parameter("steps", json!(10))
            .with_parameter("step_millis", json!(300));
        let job = OptimizationJob::new(format!("demo-{}", n), "demo-plan", params)
            .with_name(format!("Demo {} sweep", strategy))
            .with_promise_score(1.0 - n as f64 / count.max(1) as f64);

        let submission = client
            .submit(job, |update| {
                tracing::info!("[{}] {}", update.job.id, update.message);
            })
            .await?;
        tracing::info!("Seeded {} as {}", submission.job().id, submission.queue_id());
    }
    Ok(())
}
