//! Tests of the upload job's worker pool, run against [`RecordingStorage`] so that every upload
//! the workers make can be inspected.
use crate::{progress::TestUploadProgressCallback, storage::RecordingStorage, Result};
use assert_matches::assert_matches;
use more_asserts::*;
use s3fill::{KeyGenerator, ObjectKey, S3FillError, UploadSummary, OBJECT_KEY_LEN};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const BUCKET: &str = "test-bucket";

fn config(count: usize, workers: usize) -> s3fill::Config {
    s3fill::Config {
        bucket: BUCKET.to_string(),
        count,
        workers,
        ..Default::default()
    }
}

fn expected_bodies(count: usize) -> BTreeSet<String> {
    (1..=count).map(|n| format!("This is file {n}")).collect()
}

async fn run_job(
    config: s3fill::Config,
    storage: &RecordingStorage,
) -> Result<(UploadSummary, TestUploadProgressCallback)> {
    let job = s3fill::UploadJobBuilder::new(config)
        .storage(storage.boxed())
        .build()
        .await?;

    let progress = TestUploadProgressCallback::new();
    let summary = job
        .run(futures::future::pending(), progress.clone())
        .await?;

    progress.sanity_check_updates();

    Ok((summary, progress))
}

/// Never more workers than objects
#[test]
fn worker_count_is_capped_by_object_count() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new();

        let (summary, progress) = run_job(config(5, 10), &storage).await?;

        assert_eq!(BTreeSet::from([1, 2, 3, 4, 5]), progress.workers_started());
        assert_eq!(5, summary.workers);
        assert_eq!(5, storage.call_count());

        Ok(())
    })
}

#[test]
fn uses_all_requested_workers() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        // Slow uploads so no one worker can drain the queue before the others get going
        let storage = RecordingStorage::new().latency(Duration::from_millis(20));

        let (summary, progress) = run_job(config(40, 4), &storage).await?;

        assert_eq!(BTreeSet::from([1, 2, 3, 4]), progress.workers_started());
        assert_eq!(4, summary.workers);

        // Each worker should have done at least some of the work
        for (worker_id, (succeeded, _)) in progress.workers_finished() {
            assert_gt!(succeeded, 0, "worker {worker_id} did nothing");
        }

        Ok(())
    })
}

#[test]
fn every_task_is_uploaded_exactly_once() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new();

        let (summary, progress) = run_job(config(250, 8), &storage).await?;

        assert_eq!(
            UploadSummary {
                requested: 250,
                workers: 8,
                succeeded: 250,
                failed: 0,
            },
            summary
        );

        // No task lost and none delivered twice
        assert_eq!((1..=250).collect::<Vec<_>>(), storage.ordinals());
        assert_eq!(expected_bodies(250), storage.bodies());

        // The progress events tell the same story as the storage
        let mut reported = progress
            .uploaded()
            .into_iter()
            .map(|(ordinal, _)| ordinal)
            .collect::<Vec<_>>();
        reported.sort_unstable();
        assert_eq!(storage.ordinals(), reported);

        Ok(())
    })
}

#[test]
fn uploads_are_text_with_unique_hash_keys() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new();

        run_job(config(50, 5), &storage).await?;

        let records = storage.records();
        assert_eq!(50, records.len());

        for record in &records {
            assert_eq!(BUCKET, record.bucket);
            assert_eq!("text/plain", record.content_type);
            assert_eq!(OBJECT_KEY_LEN, record.key.len());
        }

        let keys = records
            .iter()
            .map(|record| record.key.clone())
            .collect::<HashSet<_>>();
        assert_eq!(50, keys.len(), "Object keys must not repeat");

        Ok(())
    })
}

/// The reported keys are whatever the key generator produced, not something derived from the
/// task ordinal
#[test]
fn keys_come_from_the_key_generator() -> Result<()> {
    #[derive(Debug, Default)]
    struct SequentialKeys {
        next: AtomicUsize,
    }

    impl KeyGenerator for SequentialKeys {
        fn generate(&self) -> ObjectKey {
            ObjectKey::from(format!("key-{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }
    }

    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new();

        let job = s3fill::UploadJobBuilder::new(config(20, 3))
            .storage(storage.boxed())
            .key_generator(SequentialKeys::default())
            .build()
            .await?;
        let progress = TestUploadProgressCallback::new();
        job.run(futures::future::pending(), progress.clone())
            .await?;

        let expected_keys = (0..20).map(|n| format!("key-{n}")).collect::<BTreeSet<_>>();
        let stored_keys = storage
            .records()
            .into_iter()
            .map(|record| record.key)
            .collect::<BTreeSet<_>>();
        let reported_keys = progress
            .uploaded()
            .into_iter()
            .map(|(_, key)| key)
            .collect::<BTreeSet<_>>();

        assert_eq!(expected_keys, stored_keys);
        assert_eq!(expected_keys, reported_keys);

        Ok(())
    })
}

/// With nothing to upload the job returns straight away without starting any workers
#[test]
fn zero_count_is_a_no_op() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new();

        let (summary, progress) = tokio::time::timeout(
            Duration::from_secs(5),
            run_job(config(0, 10), &storage),
        )
        .await??;

        assert_eq!(UploadSummary::default(), summary);
        assert!(progress.workers_started().is_empty());
        assert_eq!(0, storage.call_count());

        Ok(())
    })
}

/// Failed uploads are reported and counted, but every other task still gets uploaded and the job
/// still completes with the full requested count
#[test]
fn failures_do_not_stop_other_uploads() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new().fail_when(|record| record.ordinal() % 3 == 0);

        let (summary, progress) = run_job(config(30, 4), &storage).await?;

        assert_eq!(
            UploadSummary {
                requested: 30,
                workers: 4,
                succeeded: 20,
                failed: 10,
            },
            summary
        );

        // Every task was attempted, failures included, and none was retried
        assert_eq!((1..=30).collect::<Vec<_>>(), storage.ordinals());

        let mut failed = progress
            .failed()
            .into_iter()
            .map(|(ordinal, _)| ordinal)
            .collect::<Vec<_>>();
        failed.sort_unstable();
        assert_eq!((1..=10).map(|n| n * 3).collect::<Vec<_>>(), failed);

        assert_eq!(20, progress.uploaded().len());

        Ok(())
    })
}

/// Even when every single upload fails the job itself succeeds
#[test]
fn job_succeeds_when_every_upload_fails() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new().fail_when(|_| true);

        let (summary, progress) = run_job(config(12, 3), &storage).await?;

        assert_eq!(12, summary.requested);
        assert_eq!(12, summary.failed);
        assert_eq!(0, summary.succeeded);
        assert_eq!(12, progress.failed().len());

        for (_, error) in progress.failed() {
            assert!(error.contains(BUCKET), "{error}");
        }

        Ok(())
    })
}

/// An upload that never completes is cut off by the upload timeout and reported as a failure,
/// instead of holding up the whole job forever
#[test]
fn stalled_upload_times_out() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new().stall_when(|record| record.ordinal() == 2);

        let mut config = config(10, 3);
        config.upload_timeout = Duration::from_millis(200);

        let (summary, progress) =
            tokio::time::timeout(Duration::from_secs(10), run_job(config, &storage)).await??;

        assert_eq!(9, summary.succeeded);
        assert_eq!(1, summary.failed);

        let failed = progress.failed();
        assert_eq!(1, failed.len());
        assert_eq!(2, failed[0].0);
        assert!(failed[0].1.contains("did not complete within"), "{}", failed[0].1);

        Ok(())
    })
}

/// Aborting the job abandons in-flight uploads, waits for the workers to exit, and reports the
/// abort
#[test]
fn abort_stops_the_job() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new().stall_when(|_| true);

        let job = s3fill::UploadJobBuilder::new(config(100, 4))
            .storage(storage.boxed())
            .build()
            .await?;
        let progress = TestUploadProgressCallback::new();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            job.run(
                tokio::time::sleep(Duration::from_millis(200)),
                progress.clone(),
            ),
        )
        .await?;

        assert_matches!(result, Err(S3FillError::Aborted));

        // Each worker got stuck on its first upload, which was then cancelled
        assert_eq!(4, storage.call_count());
        assert_eq!(4, progress.failed().len());
        assert_eq!(4, progress.workers_finished().len());
        progress.sanity_check_updates();

        Ok(())
    })
}

#[test]
fn missing_bucket_fails_before_any_upload() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new();

        let mut config = config(10, 2);
        config.bucket = String::new();

        let result = s3fill::UploadJobBuilder::new(config)
            .storage(storage.boxed())
            .build()
            .await;

        assert_matches!(result, Err(S3FillError::MissingBucket));
        assert_eq!(0, storage.call_count());

        Ok(())
    })
}

#[test]
fn custom_endpoint_without_credentials_fails_before_any_upload() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new();

        let mut config = config(10, 2);
        config.endpoint = Some("http://localhost:9000".parse()?);
        config.secret_key = Some("minioadmin".to_string());

        let result = s3fill::UploadJobBuilder::new(config)
            .storage(storage.boxed())
            .build()
            .await;

        assert_matches!(result, Err(S3FillError::MissingCredentials { .. }));
        assert_eq!(0, storage.call_count());

        Ok(())
    })
}

#[test]
fn zero_workers_is_rejected() -> Result<()> {
    s3fill_testing::logging::test_with_logging(async move {
        let storage = RecordingStorage::new();

        let result = s3fill::UploadJobBuilder::new(config(10, 0))
            .storage(storage.boxed())
            .build()
            .await;

        assert_matches!(result, Err(S3FillError::InvalidWorkerCount { count: 10 }));
        assert_eq!(0, storage.call_count());

        Ok(())
    })
}
