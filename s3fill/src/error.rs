use snafu::prelude::*;
use std::time::Duration;
use url::Url;

pub type Result<T, E = S3FillError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum S3FillError {
    #[snafu(display("The target bucket name is required"))]
    MissingBucket,

    #[snafu(display(
        "An access key and secret key are both required when using the custom S3 endpoint '{endpoint}'"
    ))]
    MissingCredentials { endpoint: Url },

    #[snafu(display(
        "The custom S3 endpoint '{endpoint}' is not supported.  Supported URL schemes are: http, https"
    ))]
    UnsupportedEndpointScheme { endpoint: Url },

    #[snafu(display(
        "At least one worker is required to upload {count} objects, but the worker count is 0"
    ))]
    InvalidWorkerCount { count: usize },

    #[snafu(display("Error uploading object '{key}' to S3 bucket '{bucket}'"))]
    PutObject {
        bucket: String,
        key: String,
        source: aws_sdk_s3::error::SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
    },

    #[snafu(display(
        "Upload of object '{key}' to S3 bucket '{bucket}' did not complete within {timeout:?}"
    ))]
    UploadTimedOut {
        bucket: String,
        key: String,
        timeout: Duration,
    },

    #[snafu(display(
        "Upload of object '{key}' to S3 bucket '{bucket}' was abandoned because the job was aborted"
    ))]
    UploadCancelled { bucket: String, key: String },

    #[snafu(display("The upload job was aborted"))]
    Aborted,

    #[snafu(display("Upload worker {worker_id} panicked or was cancelled"))]
    WorkerPanicked {
        worker_id: usize,
        source: tokio::task::JoinError,
    },
}
