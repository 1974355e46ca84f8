use crate::Result;
use snafu::prelude::*;
use std::time::Duration;
use url::Url;

/// The configuration settings that control what is uploaded, where, and with how much
/// concurrency.
///
/// Construct this once (either with [`Default`] and field assignment, or from the command line
/// when the `clap` feature is enabled) and hand it to [`crate::UploadJobBuilder`].
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
pub struct Config {
    /// Name of the bucket the generated objects are uploaded to.  Required.
    #[cfg_attr(
        feature = "clap",
        clap(long, default_value = "", hide_default_value = true)
    )]
    pub bucket: String,

    /// Number of objects to generate and upload.
    ///
    /// A count of 0 is accepted and uploads nothing.
    #[cfg_attr(feature = "clap", clap(long, default_value = "100"))]
    pub count: usize,

    /// Number of concurrent upload workers.
    ///
    /// Never more workers than objects are started, so with `--count 5 --workers 10` only five
    /// workers run.
    #[cfg_attr(feature = "clap", clap(long, default_value = "10"))]
    pub workers: usize,

    /// Use a custom S3-compatible endpoint instead of AWS, ie "http://localhost:9000" for minio.
    ///
    /// When this is set, path-style addressing is used and both `--access-key` and
    /// `--secret-key` must be provided.
    #[cfg_attr(feature = "clap", clap(long, value_name = "URL"))]
    pub endpoint: Option<Url>,

    /// Access key for S3 or the S3-compatible service.
    ///
    /// Only used when `--secret-key` is also provided; otherwise credentials come from the
    /// default AWS credential chain.
    #[cfg_attr(feature = "clap", clap(long))]
    pub access_key: Option<String>,

    /// Secret key for S3 or the S3-compatible service.
    #[cfg_attr(feature = "clap", clap(long))]
    pub secret_key: Option<String>,

    /// AWS region, or a dummy region for S3-compatible services.
    #[cfg_attr(feature = "clap", clap(long, default_value = "us-east-1"))]
    pub region: String,

    /// Maximum time in seconds a single object upload may take before it is reported as failed.
    #[cfg_attr(
        feature = "clap",
        clap(long, value_name = "SECONDS", default_value = "60", value_parser = parse_seconds)
    )]
    pub upload_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        // XXX: This duplicates the defaults in the `clap` attributes; the `defaults_match` test
        // catches drift between the two
        Self {
            bucket: String::new(),
            count: 100,
            workers: 10,
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: "us-east-1".to_string(),
            upload_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// The number of workers that will actually be started: never more than there are objects
    /// to upload.
    pub fn effective_workers(&self) -> usize {
        self.workers.min(self.count)
    }

    /// The static access key/secret key pair, if both halves were provided.
    ///
    /// An empty string counts as not provided.
    pub(crate) fn static_credentials(&self) -> Option<(&str, &str)> {
        match (self.access_key.as_deref(), self.secret_key.as_deref()) {
            (Some(access_key), Some(secret_key))
                if !access_key.is_empty() && !secret_key.is_empty() =>
            {
                Some((access_key, secret_key))
            }
            _ => None,
        }
    }

    /// Check the settings that make the job impossible to run.
    ///
    /// This must pass before any object storage client is constructed.
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(!self.bucket.is_empty(), crate::error::MissingBucketSnafu);

        if let Some(endpoint) = &self.endpoint {
            ensure!(
                matches!(endpoint.scheme(), "http" | "https"),
                crate::error::UnsupportedEndpointSchemeSnafu {
                    endpoint: endpoint.clone()
                }
            );
            ensure!(
                self.static_credentials().is_some(),
                crate::error::MissingCredentialsSnafu {
                    endpoint: endpoint.clone()
                }
            );
        }

        ensure!(
            self.count == 0 || self.workers > 0,
            crate::error::InvalidWorkerCountSnafu { count: self.count }
        );

        Ok(())
    }
}

#[cfg(feature = "clap")]
fn parse_seconds(value: &str) -> std::result::Result<Duration, std::num::ParseIntError> {
    value.parse().map(Duration::from_secs)
}
