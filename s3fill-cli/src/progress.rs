//! Progress reporting for the upload job: a progress bar, plus a log line per object
use s3fill::{ObjectKey, Result, S3FillError, UploadSummary};
use std::{borrow::Cow, future::Future, time::Duration};
use tracing::{debug, error, info, warn};

/// Display a spinner while some long-running but unmeasurable task is running, then hide the
/// spinner when it finishes
pub(crate) async fn with_spinner<S, F, T>(globals: &super::Globals, message: S, task: F) -> T
where
    S: Into<Cow<'static, str>>,
    F: Future<Output = T>,
{
    let spinner = if !hide_progress(globals) {
        indicatif::ProgressBar::new_spinner()
    } else {
        indicatif::ProgressBar::hidden()
    };

    spinner.set_style(
        indicatif::ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );

    spinner.enable_steady_tick(Duration::from_millis(120));

    spinner.set_message(message);

    let result = task.await;

    spinner.finish_and_clear();

    result
}

/// Run the upload job with a progress bar, until it finishes or the user presses Ctrl-C
pub(crate) async fn run_upload_job(
    globals: &super::Globals,
    job: s3fill::UploadJob,
) -> Result<UploadSummary> {
    let progress = UploadProgressReport::new(hide_progress(globals), &job);
    let bar = progress.bar.clone();

    let result = job.run(ctrl_c(), progress).await;

    bar.finish_and_clear();

    result
}

/// Completes when the user presses Ctrl-C.
///
/// If the signal handler can't be installed this never completes, and the job can only end by
/// running to completion.
async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Interrupted; abandoning in-flight uploads");
        }
        Err(e) => {
            debug!(?e, "Unable to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

/// Progress should be hidden for either of verbose mode (because there will be a flurry of log
/// messages and the progress bar rendering will be all messed up), or quiet mode (because
/// progress bars are not quiet).
fn hide_progress(globals: &super::Globals) -> bool {
    globals.verbose || globals.quiet
}

/// Receives progress updates from the upload workers, advances the progress bar, and logs the
/// outcome of each upload
struct UploadProgressReport {
    bar: indicatif::ProgressBar,
}

impl UploadProgressReport {
    fn new(hide_progress: bool, job: &s3fill::UploadJob) -> Self {
        let bar = if !hide_progress {
            indicatif::ProgressBar::new(job.total_objects() as u64)
        } else {
            indicatif::ProgressBar::hidden()
        };

        bar.set_style(
            indicatif::ProgressStyle::with_template(
                "{spinner:.green} {prefix}: [{bar:40.cyan/blue}] {pos}/{len} objects ({per_sec}, ETA {eta})",
            )
            .unwrap()
            .progress_chars("#>-"),
        );
        bar.set_prefix(format!(
            "Uploading to {} with {} workers",
            job.bucket(),
            job.worker_count()
        ));

        Self { bar }
    }
}

impl s3fill::UploadProgressCallback for UploadProgressReport {
    fn worker_started(&self, worker_id: usize) {
        debug!(worker_id, "Worker started");
    }

    fn object_uploaded(&self, worker_id: usize, _ordinal: usize, key: &ObjectKey, _size: usize) {
        self.bar
            .suspend(|| info!(worker_id, %key, "Uploaded file"));
        self.bar.inc(1);
    }

    fn object_upload_failed(
        &self,
        worker_id: usize,
        _ordinal: usize,
        key: &ObjectKey,
        error: &S3FillError,
    ) {
        let error = error_chain(error);

        self.bar
            .suspend(|| error!(worker_id, %key, %error, "Failed to upload file"));
        self.bar.inc(1);
    }

    fn worker_finished(&self, worker_id: usize, succeeded: usize, failed: usize) {
        debug!(worker_id, succeeded, failed, "Worker finished");
    }
}

/// Render an error and all of its sources on one line.
///
/// AWS SDK errors put the useful part (the S3 error code and message) in the source, not in the
/// top-level message.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();

    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }

    rendered
}
