//! The barrier that tells the job when every upload worker has finished.
use crate::Result;
use snafu::prelude::*;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, Instrument};

/// Tracks every running upload worker, so the job can wait until all of them have exited.
///
/// Registering a worker and spawning it happen in the same call, so the outstanding count always
/// covers a worker before it can run.  The count drops when the worker's future returns, or when
/// it panics.
pub(super) struct CompletionBarrier<T> {
    workers: JoinSet<T>,

    /// Maps each worker's tokio task ID back to its worker ID, so a panic can be attributed
    worker_ids: HashMap<Id, usize>,
}

impl<T: Send + 'static> CompletionBarrier<T> {
    pub(super) fn new() -> Self {
        Self {
            workers: JoinSet::new(),
            worker_ids: HashMap::new(),
        }
    }

    /// Register a worker and start it running on the tokio runtime.
    pub(super) fn spawn<F>(&mut self, worker_id: usize, worker: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let span = tracing::debug_span!("worker", worker_id);

        let handle = self.workers.spawn(worker.instrument(span));
        self.worker_ids.insert(handle.id(), worker_id);
    }

    /// The number of registered workers that have not yet been waited for.
    pub(super) fn outstanding(&self) -> usize {
        self.workers.len()
    }

    /// Block until every registered worker has exited, yielding what each of them returned.
    ///
    /// The order of the results is the order in which the workers finished.  If any worker
    /// panicked, the remaining workers are still waited for, then the first panic is reported.
    ///
    /// Cancel safe, in that dropping the returned future before it completes leaves the workers
    /// that haven't finished registered, and a later call waits for those.
    pub(super) async fn wait(&mut self) -> Result<Vec<T>> {
        let mut results = Vec::with_capacity(self.workers.len());
        let mut first_error = None;

        while let Some(result) = self.workers.join_next_with_id().await {
            match result {
                Ok((task_id, output)) => {
                    self.worker_ids.remove(&task_id);
                    results.push(output);
                }
                Err(e) => {
                    // Every spawned task is in the map, so the 0 fallback is never observed
                    let worker_id = self.worker_ids.remove(&e.id()).unwrap_or_default();

                    error!(worker_id, ?e, "Upload worker did not run to completion");
                    first_error.get_or_insert((worker_id, e));
                }
            }
        }

        debug!(finished = results.len(), "All upload workers have exited");

        match first_error {
            Some((worker_id, e)) => {
                Err(e).context(crate::error::WorkerPanickedSnafu { worker_id })
            }
            None => Ok(results),
        }
    }
}
