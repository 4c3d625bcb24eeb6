// ============================================================
// Layer 2 — Background Jobs
// ============================================================
// Explicit task submission for training / unlearning /
// verification work:
//
//   runner.submit(name, |cancel| work(cancel))  →  JobHandle
//   handle.cancel()                             →  sets the token
//   handle.wait()                               →  the job's Result
//
// The cancel token is the only channel into a running job; the
// unlearning loop polls it between epochs. Ordering and mutual
// exclusion per shard are the engine's business (ShardLocks),
// not the runner's.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    thread,
};

use anyhow::{anyhow, Context, Result};

use crate::infra::concurrency::CancelToken;

/// Spawns each job on its own named thread.
#[derive(Default)]
pub struct JobRunner {
    next_id: AtomicU64,
}

/// Result handle of one submitted job.
pub struct JobHandle<T> {
    id:     u64,
    name:   String,
    cancel: CancelToken,
    handle: thread::JoinHandle<Result<T>>,
}

impl JobRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit<T, F>(&self, name: impl Into<String>, work: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        let id     = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name   = name.into();
        let cancel = CancelToken::new();

        let token  = cancel.clone();
        let label  = name.clone();
        let handle = thread::Builder::new()
            .name(format!("job-{id}-{name}"))
            .spawn(move || {
                tracing::info!("Job {} ({}) started", id, label);
                let result = work(&token);
                match &result {
                    Ok(_)  => tracing::info!("Job {} ({}) finished", id, label),
                    Err(e) => tracing::warn!("Job {} ({}) failed: {:#}", id, label, e),
                }
                result
            })
            .with_context(|| format!("failed to spawn job '{name}'"))?;

        Ok(JobHandle { id, name, cancel, handle })
    }
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the job to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the job ends and return its result.
    pub fn wait(self) -> Result<T> {
        self.handle
            .join()
            .map_err(|_| anyhow!("job {} ({}) panicked", self.id, self.name))?
    }
}
