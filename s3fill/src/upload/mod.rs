//! Implementation of the upload job: generate synthetic text objects and upload them to object
//! storage with a pool of concurrent workers.
//!
//! The job spawns its workers first, then fills a job queue sized to hold every task, closes it,
//! and waits on a completion barrier until all workers have drained the queue and exited.
use crate::keys::{ClockKeyGenerator, KeyGenerator, ObjectKey};
use crate::objstore::{ObjectStorage, ObjectStorageFactory};
use crate::{Config, Result, S3FillError};
use barrier::CompletionBarrier;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use worker::{Worker, WorkerTally};

mod barrier;
mod queue;
mod worker;

/// One unit of work: upload one generated object.
///
/// Identified by its position in the batch, starting at 1.  The object's content is derived from
/// that position; its key is not.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Task {
    ordinal: usize,
}

impl Task {
    pub(crate) fn new(ordinal: usize) -> Self {
        Self { ordinal }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// The text written to the object for this task
    pub fn content(&self) -> String {
        format!("This is file {}", self.ordinal)
    }
}

/// What happened when an upload job ran to completion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// The number of objects the job was asked to upload
    pub requested: usize,

    /// The number of workers that were started
    pub workers: usize,

    /// The number of objects uploaded successfully
    pub succeeded: usize,

    /// The number of objects whose upload failed
    pub failed: usize,
}

/// A trait which callers can implement to be told what each upload worker is doing, as it
/// happens.
///
/// Every method is called from the worker's own async task, concurrently with calls from the other
/// workers, so implementations must be cheap and must not block.
#[allow(unused_variables)]
pub trait UploadProgressCallback: Sync + Send {
    /// A worker has started and is about to take tasks from the queue
    fn worker_started(&self, worker_id: usize) {}

    /// The object for task `ordinal` was uploaded successfully under `key`
    fn object_uploaded(&self, worker_id: usize, ordinal: usize, key: &ObjectKey, size: usize) {}

    /// The upload of the object for task `ordinal` failed.
    ///
    /// The worker will not retry; it moves on to the next task.
    fn object_upload_failed(
        &self,
        worker_id: usize,
        ordinal: usize,
        key: &ObjectKey,
        error: &S3FillError,
    ) {
    }

    /// A worker found the queue closed and empty (or the job was aborted) and has exited
    fn worker_finished(&self, worker_id: usize, succeeded: usize, failed: usize) {}
}

/// Builds an [`UploadJob`], validating the configuration and constructing the object storage
/// client.
pub struct UploadJobBuilder {
    config: Config,
    storage: Option<Box<dyn ObjectStorage>>,
    key_generator: Arc<dyn KeyGenerator>,
}

impl std::fmt::Debug for UploadJobBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadJobBuilder")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("key_generator", &self.key_generator)
            .finish()
    }
}

impl UploadJobBuilder {
    /// Initialize a new upload job builder, but don't yet start the job.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            storage: None,
            key_generator: Arc::new(ClockKeyGenerator),
        }
    }

    /// Upload to this object storage instead of the S3 client built from the config.
    pub fn storage(mut self, storage: Box<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use a different source of object keys than the default clock-based one.
    pub fn key_generator(mut self, key_generator: impl KeyGenerator) -> Self {
        self.key_generator = Arc::new(key_generator);
        self
    }

    /// Construct the upload job (but don't run it yet).
    ///
    /// Fails without contacting object storage if the config is unusable, ie if the bucket is
    /// missing or a custom endpoint was given without credentials.
    pub async fn build(self) -> Result<UploadJob> {
        self.config.validate()?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => ObjectStorageFactory::new(self.config.clone()).s3().await?,
        };

        debug!(?storage, bucket = %self.config.bucket, "Upload job is ready");

        Ok(UploadJob {
            config: self.config,
            storage,
            key_generator: self.key_generator,
        })
    }
}

/// A job which will generate and upload `count` objects to a bucket.
#[derive(Debug)]
pub struct UploadJob {
    config: Config,
    storage: Box<dyn ObjectStorage>,
    key_generator: Arc<dyn KeyGenerator>,
}

impl UploadJob {
    /// The number of objects this job will upload
    pub fn total_objects(&self) -> usize {
        self.config.count
    }

    /// The number of workers this job will start
    pub fn worker_count(&self) -> usize {
        self.config.effective_workers()
    }

    /// The bucket objects are uploaded to
    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    /// Alternative to [`Self::run`] which doesn't require a [`UploadProgressCallback`]
    /// implementation, for callers that do not care about progress information.
    pub async fn run_without_progress(
        self,
        abort: impl Future<Output = ()>,
    ) -> Result<UploadSummary> {
        // A dummy impl of UploadProgressCallback that doesn't do anything with any of the
        // progress updates
        struct NoProgress {}
        impl UploadProgressCallback for NoProgress {}

        self.run(abort, NoProgress {}).await
    }

    /// Run the job, returning only when every worker has exited.
    ///
    /// Individual upload failures don't fail the job; they are reported to `progress` and
    /// counted in the summary.
    ///
    /// If the `abort` future completes first, it's a signal that the job should be aborted.
    /// Workers stop taking tasks and abandon in-flight uploads, and once they have all exited this
    /// returns an abort error.
    #[instrument(skip_all, fields(bucket = %self.config.bucket, count = self.config.count))]
    pub async fn run<Abort, Progress>(
        self,
        abort: Abort,
        progress: Progress,
    ) -> Result<UploadSummary>
    where
        Abort: Future<Output = ()>,
        Progress: UploadProgressCallback + 'static,
    {
        let requested = self.config.count;
        let worker_count = self.worker_count();

        if requested == 0 {
            debug!("No objects requested; nothing to upload");

            return Ok(UploadSummary::default());
        }

        let progress = Arc::new(progress);
        let cancel = CancellationToken::new();
        let (job_queue, tasks) = queue::job_queue(requested);
        let mut barrier = CompletionBarrier::new();

        // All of the workers are started before the first task is queued
        debug!(worker_count, "Starting upload workers");
        for worker_id in 1..=worker_count {
            let worker = Worker {
                id: worker_id,
                tasks: tasks.clone(),
                storage: dyn_clone::clone_box(&*self.storage),
                key_generator: self.key_generator.clone(),
                bucket: self.config.bucket.clone(),
                upload_timeout: self.config.upload_timeout,
                cancel: cancel.clone(),
                progress: progress.clone(),
            };

            barrier.spawn(worker_id, worker.run());
        }

        // Only the workers hold the consumer side now.  If they all die the queue reports it
        // instead of filling up with tasks nobody will take
        drop(tasks);

        let queued = job_queue.fill(requested).await;
        debug!(
            queued,
            outstanding_workers = barrier.outstanding(),
            "Job queue filled and closed; waiting for workers"
        );

        let tallies = tokio::select! {
            result = barrier.wait() => Some(result),
            _ = abort => None,
        };

        let tallies: Vec<WorkerTally> = match tallies {
            Some(result) => result?,
            None => {
                warn!("Upload job aborted; cancelling workers");
                cancel.cancel();

                // The workers still get to exit cleanly before the abort is reported
                if let Err(e) = barrier.wait().await {
                    warn!(?e, "Upload worker failed while the job was being aborted");
                }

                return crate::error::AbortedSnafu.fail();
            }
        };

        for tally in &tallies {
            debug!(
                worker_id = tally.worker_id,
                succeeded = tally.succeeded,
                failed = tally.failed,
                "Worker tally"
            );
        }

        let summary = UploadSummary {
            requested,
            workers: tallies.len(),
            succeeded: tallies.iter().map(|tally| tally.succeeded).sum(),
            failed: tallies.iter().map(|tally| tally.failed).sum(),
        };

        debug!(?summary, "Upload job completed");

        Ok(summary)
    }
}
