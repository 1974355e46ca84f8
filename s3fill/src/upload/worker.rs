//! A single upload worker, which drains the job queue until it is exhausted.
use super::queue::TaskReceiver;
use super::UploadProgressCallback;
use crate::keys::{KeyGenerator, ObjectKey};
use crate::objstore::ObjectStorage;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Every generated object is plain text
pub(super) const CONTENT_TYPE: &str = "text/plain";

/// How many uploads one worker completed and how many failed.
///
/// Each worker keeps its own tally and hands it back when it exits, so no counters are shared
/// between workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(super) struct WorkerTally {
    pub worker_id: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub(super) struct Worker<P> {
    pub id: usize,
    pub tasks: TaskReceiver,
    pub storage: Box<dyn ObjectStorage>,
    pub key_generator: Arc<dyn KeyGenerator>,
    pub bucket: String,
    pub upload_timeout: Duration,
    pub cancel: CancellationToken,
    pub progress: Arc<P>,
}

impl<P: UploadProgressCallback + 'static> Worker<P> {
    /// Pull tasks and upload one object for each, until the queue is closed and empty or the job
    /// is cancelled.
    ///
    /// A failed upload is reported and then forgotten; the worker moves on to the next task.
    pub(super) async fn run(self) -> WorkerTally {
        let mut tally = WorkerTally {
            worker_id: self.id,
            ..Default::default()
        };

        debug!("Upload worker started");
        self.progress.worker_started(self.id);

        loop {
            let task = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Job cancelled; upload worker is not taking any more tasks");
                    break;
                }
                task = self.tasks.recv() => match task {
                    Some(task) => task,
                    None => {
                        debug!("Job queue is closed and empty");
                        break;
                    }
                },
            };

            let key = self.key_generator.generate();
            let content = bytes::Bytes::from(task.content());
            let size = content.len();

            match self.upload(&key, content).await {
                Ok(()) => {
                    debug!(ordinal = task.ordinal(), %key, size, "Uploaded object");
                    tally.succeeded += 1;
                    self.progress
                        .object_uploaded(self.id, task.ordinal(), &key, size);
                }
                Err(e) => {
                    debug!(ordinal = task.ordinal(), %key, ?e, "Object upload failed");
                    tally.failed += 1;
                    self.progress
                        .object_upload_failed(self.id, task.ordinal(), &key, &e);
                }
            }
        }

        debug!(
            succeeded = tally.succeeded,
            failed = tally.failed,
            "Upload worker finished"
        );
        self.progress
            .worker_finished(self.id, tally.succeeded, tally.failed);

        tally
    }

    /// Make one attempt to upload the object, giving up if it takes longer than the configured
    /// timeout or the job is cancelled.
    async fn upload(&self, key: &ObjectKey, content: bytes::Bytes) -> Result<()> {
        let put = self
            .storage
            .put_object(&self.bucket, key.as_str(), CONTENT_TYPE, content);

        tokio::select! {
            _ = self.cancel.cancelled() => crate::error::UploadCancelledSnafu {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            }
            .fail(),
            result = tokio::time::timeout(self.upload_timeout, put) => match result {
                Ok(result) => result,
                Err(_) => crate::error::UploadTimedOutSnafu {
                    bucket: self.bucket.clone(),
                    key: key.to_string(),
                    timeout: self.upload_timeout,
                }
                .fail(),
            },
        }
    }
}
