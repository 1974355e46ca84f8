//! Wrapper around the `minio` server binary to run ephemeral instances of S3-compatible object
//! storage for testing
//!
//! Minio is the reason path-style addressing exists in s3fill at all, so tests that need a real
//! S3-compatible endpoint run against one of these.
use crate::Result;
use aws_sdk_s3::config::{Credentials, Region};
use color_eyre::eyre::eyre;
use duct::Handle;
use futures::{StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use rand::prelude::*;
use regex::Regex;
use std::{
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    sync::{Arc, Weak},
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::debug;
use which::which;

/// Minio's out-of-the-box root credentials
pub const ACCESS_KEY: &str = "minioadmin";
pub const SECRET_KEY: &str = "minioadmin";

/// Minio doesn't care about the region but the AWS SDK insists on one
pub const REGION: &str = "us-east-1";

/// Max concurrent S3 operations when reading back uploaded objects
const MAX_CONCURRENCY: usize = 10;

/// An object read back from a bucket on the minio server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

pub struct MinioServer {
    #[allow(dead_code)] // Only held so the data directory lives as long as the server
    data_dir: TempDir,
    handle: Handle,
    endpoint: SocketAddr,
}

impl MinioServer {
    /// Get a running server, sharing one with any other test that is using one right now.
    ///
    /// Tests hold an `Arc`; the process is killed when the last test holding it drops it, and the
    /// next call after that starts a new one.
    pub async fn get() -> Result<Arc<Self>> {
        // A tokio mutex, because the lock is held while the server starts up
        static SHARED: Lazy<Mutex<Weak<MinioServer>>> = Lazy::new(|| Mutex::new(Weak::new()));

        let mut shared = SHARED.lock().await;

        let server = match shared.upgrade() {
            Some(server) => server,
            None => {
                let server = Arc::new(Self::start().await?);
                *shared = Arc::downgrade(&server);

                server
            }
        };

        debug!(endpoint = %server.endpoint, "Using minio server");

        // Make sure a shared server is still answering
        server.wait_for_service_start().await?;

        Ok(server)
    }

    /// Start a new minio server on a random free port on localhost.
    ///
    /// The `minio` binary is found through the `MINIO_PATH` env var if set, otherwise on the
    /// `PATH`.  Fails if it's in neither place.
    pub async fn start() -> Result<Self> {
        let path = Self::find_minio()?;
        let endpoint = Self::random_endpoint()?;
        let data_dir = Self::temp_data_dir()?;

        let handle = duct::cmd!(
            path,
            "server",
            data_dir.path(),
            "--address",
            endpoint.to_string(),
            "--quiet"
        )
        .start()?;

        let server = Self {
            data_dir,
            handle,
            endpoint,
        };

        debug!(endpoint = %server.endpoint, "Waiting for minio to start");
        server.wait_for_service_start().await?;
        debug!(endpoint = %server.endpoint, "Minio started");

        Ok(server)
    }

    /// The S3 API endpoint URL where the server is listening
    pub fn endpoint_url(&self) -> url::Url {
        format!("http://{}/", self.endpoint).parse().unwrap()
    }

    /// Get an S3 [`aws_sdk_s3::Client`] which talks to this server with path-style addressing
    pub async fn aws_client(&self) -> Result<aws_sdk_s3::Client> {
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(REGION))
            .credentials_provider(Credentials::from_keys(ACCESS_KEY, SECRET_KEY, None))
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .endpoint_url(self.endpoint_url().to_string())
            .force_path_style(true)
            .build();

        Ok(aws_sdk_s3::Client::from_conf(s3_config))
    }

    /// Make a new, empty bucket for one test.
    ///
    /// Many tests share one server, so a random prefix is added to the name to keep them apart.
    /// The actual bucket name is returned.
    pub async fn create_bucket(&self, name: impl AsRef<str>) -> Result<String> {
        // Bucket names are at most 63 characters of letters, digits, `.` and `-`.  Test names
        // are Rust identifiers full of `_`, which S3 doesn't allow.
        static INVALID_CHARS: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"[^0-9a-zA-Z\.\-]+").unwrap());

        let name = INVALID_CHARS.replace_all(name.as_ref(), "-").to_lowercase();
        let name = &name[..name.len().min(63 - 9)];
        let bucket = format!("{:08x}-{name}", rand::thread_rng().next_u32());

        debug!(%bucket, "Creating bucket");

        let client = self.aws_client().await?;
        client.create_bucket().bucket(&bucket).send().await?;

        // Bucket creation can lag behind the CreateBucket response a little, so wait until the
        // bucket is visible before handing it to the test
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        if let Err(e) = policy
            .retry(|| client.head_bucket().bucket(&bucket).send())
            .await
        {
            return Err(eyre!(
                "The bucket {bucket} is not accessible even after it was explicitly created.  Last error was: \n{e}"
            ));
        }

        debug!(%bucket, "Bucket created");

        Ok(bucket)
    }

    /// Read back every object in a bucket, including its content type and body
    pub async fn list_objects(&self, bucket: &str) -> Result<Vec<StoredObject>> {
        let client = self.aws_client().await?;

        let mut keys = Vec::new();
        let mut pages = client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page?;

            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(|key| key.to_string()),
            );
        }

        debug!(bucket, objects = keys.len(), "Listed bucket; reading objects");

        let client = &client;
        futures::stream::iter(keys)
            .map(|key| async move {
                let response = client.get_object().bucket(bucket).key(&key).send().await?;
                let content_type = response.content_type().map(|value| value.to_string());
                let body = response.body.collect().await?.into_bytes().to_vec();

                Result::<_>::Ok(StoredObject {
                    key,
                    content_type,
                    body,
                })
            })
            .buffer_unordered(MAX_CONCURRENCY)
            .try_collect()
            .await
    }

    /// Block until the server answers a ListBuckets call, or give up after about ten seconds
    async fn wait_for_service_start(&self) -> Result<()> {
        let policy = again::RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_secs(1));

        let client = self.aws_client().await?;

        policy
            .retry(|| client.list_buckets().send())
            .await
            .map_err(|e| {
                eyre!(
                    "The minio server at {} didn't come online in the allowed time.  The last ListBuckets error was:\n{}",
                    self.endpoint,
                    e
                )
            })?;

        Ok(())
    }

    fn find_minio() -> Result<PathBuf> {
        std::env::var_os("MINIO_PATH")
            .map(PathBuf::from)
            .or_else(|| which("minio").ok())
            .ok_or_else(|| {
                eyre!("Unable to find `minio`; set the MINIO_PATH env var or put the minio executable on your PATH")
            })
    }

    /// Find a port on localhost that is free for minio to listen on
    fn random_endpoint() -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0")?;

        Ok(listener.local_addr()?)
    }

    /// Minio refuses to use a `tmpfs` data directory (no `O_DIRECT`), which rules out `/tmp` on
    /// most Linux distros, so the data directory goes under the home directory instead.
    fn temp_data_dir() -> Result<TempDir> {
        let home = dirs::home_dir().ok_or_else(|| eyre!("Unable to determine home directory"))?;

        Ok(tempfile::tempdir_in(home)?)
    }
}

impl Drop for MinioServer {
    fn drop(&mut self) {
        debug!(pids = ?self.handle.pids(), "Killing minio process(es)");

        if let Err(e) = self.handle.kill() {
            eprintln!("Error killing minio process: {}", e);
        }
    }
}
