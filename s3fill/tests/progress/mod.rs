//! Test helper that implements [`s3fill::UploadProgressCallback`] which keeps a record of every
//! progress update so tests can assert on per-task outcomes without parsing log output.
use s3fill::{ObjectKey, S3FillError, UploadProgressCallback};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, strum::EnumDiscriminants)]
#[allow(dead_code)] // Not all of these are used in tests but we want to capture all fields for all events
pub(crate) enum UploadProgressEvent {
    WorkerStarted {
        worker_id: usize,
    },

    ObjectUploaded {
        worker_id: usize,
        ordinal: usize,
        key: String,
        size: usize,
    },

    ObjectUploadFailed {
        worker_id: usize,
        ordinal: usize,
        key: String,
        error: String,
    },

    WorkerFinished {
        worker_id: usize,
        succeeded: usize,
        failed: usize,
    },
}

#[derive(Clone)]
pub(crate) struct TestUploadProgressCallback {
    events: Arc<Mutex<Vec<UploadProgressEvent>>>,
}

impl TestUploadProgressCallback {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Review all updates after a job has run to completion, validating that they are consistent
    /// with one another.
    ///
    /// Every worker that started must have finished, and the tallies each worker reported when it
    /// finished must match the individual upload events attributed to it.
    pub fn sanity_check_updates(&self) {
        let started = self.workers_started();
        let finished = self.workers_finished();

        assert_eq!(
            started,
            finished.keys().copied().collect::<BTreeSet<_>>(),
            "Every worker that started must finish exactly once"
        );

        for (worker_id, (succeeded, failed)) in finished {
            let uploaded_by_worker = self
                .events()
                .into_iter()
                .filter(|event| {
                    matches!(event, UploadProgressEvent::ObjectUploaded { worker_id: id, .. } if *id == worker_id)
                })
                .count();
            let failed_by_worker = self
                .events()
                .into_iter()
                .filter(|event| {
                    matches!(event, UploadProgressEvent::ObjectUploadFailed { worker_id: id, .. } if *id == worker_id)
                })
                .count();

            assert_eq!(succeeded, uploaded_by_worker, "worker {worker_id}");
            assert_eq!(failed, failed_by_worker, "worker {worker_id}");
        }
    }

    /// IDs of every worker that reported starting
    pub fn workers_started(&self) -> BTreeSet<usize> {
        let events = self.filter_events(UploadProgressEventDiscriminants::WorkerStarted);
        let count = events.len();

        let ids = events
            .into_iter()
            .filter_map(|event| match event {
                UploadProgressEvent::WorkerStarted { worker_id } => Some(worker_id),
                _ => None,
            })
            .collect::<BTreeSet<_>>();

        assert_eq!(count, ids.len(), "A worker reported starting more than once");

        ids
    }

    /// The `(succeeded, failed)` tally each worker reported when it finished, keyed by worker ID
    pub fn workers_finished(&self) -> HashMap<usize, (usize, usize)> {
        self.filter_events(UploadProgressEventDiscriminants::WorkerFinished)
            .into_iter()
            .filter_map(|event| match event {
                UploadProgressEvent::WorkerFinished {
                    worker_id,
                    succeeded,
                    failed,
                } => Some((worker_id, (succeeded, failed))),
                _ => None,
            })
            .collect()
    }

    /// `(ordinal, key)` of every successful upload
    pub fn uploaded(&self) -> Vec<(usize, String)> {
        self.filter_events(UploadProgressEventDiscriminants::ObjectUploaded)
            .into_iter()
            .filter_map(|event| match event {
                UploadProgressEvent::ObjectUploaded { ordinal, key, .. } => Some((ordinal, key)),
                _ => None,
            })
            .collect()
    }

    /// `(ordinal, error message)` of every failed upload
    pub fn failed(&self) -> Vec<(usize, String)> {
        self.filter_events(UploadProgressEventDiscriminants::ObjectUploadFailed)
            .into_iter()
            .filter_map(|event| match event {
                UploadProgressEvent::ObjectUploadFailed { ordinal, error, .. } => {
                    Some((ordinal, error))
                }
                _ => None,
            })
            .collect()
    }

    fn events(&self) -> Vec<UploadProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    fn filter_events(
        &self,
        typ: UploadProgressEventDiscriminants,
    ) -> Vec<UploadProgressEvent> {
        self.events()
            .into_iter()
            .filter(|event| UploadProgressEventDiscriminants::from(event) == typ)
            .collect()
    }

    fn report(&self, event: UploadProgressEvent) {
        self.events.lock().unwrap().push(event)
    }
}

impl UploadProgressCallback for TestUploadProgressCallback {
    fn worker_started(&self, worker_id: usize) {
        self.report(UploadProgressEvent::WorkerStarted { worker_id })
    }

    fn object_uploaded(&self, worker_id: usize, ordinal: usize, key: &ObjectKey, size: usize) {
        self.report(UploadProgressEvent::ObjectUploaded {
            worker_id,
            ordinal,
            key: key.to_string(),
            size,
        })
    }

    fn object_upload_failed(
        &self,
        worker_id: usize,
        ordinal: usize,
        key: &ObjectKey,
        error: &S3FillError,
    ) {
        self.report(UploadProgressEvent::ObjectUploadFailed {
            worker_id,
            ordinal,
            key: key.to_string(),
            error: error.to_string(),
        })
    }

    fn worker_finished(&self, worker_id: usize, succeeded: usize, failed: usize) {
        self.report(UploadProgressEvent::WorkerFinished {
            worker_id,
            succeeded,
            failed,
        })
    }
}
