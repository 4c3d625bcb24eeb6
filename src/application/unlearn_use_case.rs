// ============================================================
// Layer 2 — UnlearnUseCase
// ============================================================
// The `unlearn` operation:
//
//   Step 1: Reload the dataset recorded in the manifest
//   Step 2: Run the unlearning pass (validation, lock, state
//           machine, commit)                    (Layer 5 - ml)
//   Step 3: Append the per-epoch loss history   (Layer 6 - metrics)
//
// Asynchronous callers go through `submit`, which runs the same
// pass on the job runner and hands back a cancellable handle.
// Under the queue policy the shard ticket is taken before the job
// thread is spawned, so jobs on one shard commit in submission
// order.
//
// Once a pass has committed, its version is current; a failure to
// append metrics afterwards is only logged.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::application::context::EngineContext;
use crate::application::jobs::{JobHandle, JobRunner};
use crate::domain::request::{UnlearnOutcome, UnlearningRequest};
use crate::infra::concurrency::CancelToken;
use crate::infra::config::BusyPolicy;
use crate::infra::metrics::MetricsLogger;
use crate::ml::EngineModel;

fn log_outcome(metrics: &MetricsLogger, outcome: &UnlearnOutcome) {
    if let Err(e) = metrics.log_unlearning(outcome.shard_id, outcome.new_version, &outcome.history) {
        tracing::warn!(
            "Shard {} v{} committed but its metrics were not recorded: {}",
            outcome.shard_id, outcome.new_version, e
        );
    }
}

pub struct UnlearnUseCase<'a> {
    ctx: &'a EngineContext,
}

impl<'a> UnlearnUseCase<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Run one pass on the calling thread.
    pub fn execute(&self, request: &UnlearningRequest, cancel: &CancelToken) -> Result<UnlearnOutcome> {
        let dataset = self.ctx.load_dataset()?;
        let outcome = self
            .ctx
            .unlearner
            .unlearn::<EngineModel>(&dataset, request, cancel)
            .with_context(|| format!("unlearning on shard {} failed", request.shard_id))?;

        match self.ctx.metrics() {
            Ok(metrics) => log_outcome(&metrics, &outcome),
            Err(e) => tracing::warn!("Shard {} committed; metrics log unavailable: {:#}", outcome.shard_id, e),
        }
        Ok(outcome)
    }

    /// Run one pass in the background.
    pub fn submit(&self, runner: &JobRunner, request: UnlearningRequest) -> Result<JobHandle<UnlearnOutcome>> {
        let dataset  = self.ctx.load_dataset()?;
        let engine   = Arc::clone(&self.ctx.unlearner);
        let metrics  = self.ctx.metrics()?;
        let job_name = format!("unlearn-shard-{}", request.shard_id);
        let ticket   = match self.ctx.config.unlearning.busy_policy {
            BusyPolicy::Queue  => Some(self.ctx.locks.enqueue(request.shard_id)),
            BusyPolicy::Reject => None,
        };

        runner.submit(job_name, move |cancel| {
            let outcome = match ticket {
                Some(ticket) => engine.unlearn_queued::<EngineModel>(&dataset, &request, cancel, ticket),
                None         => engine.unlearn::<EngineModel>(&dataset, &request, cancel),
            }
            .with_context(|| format!("unlearning on shard {} failed", request.shard_id))?;
            log_outcome(&metrics, &outcome);
            Ok(outcome)
        })
    }
}
