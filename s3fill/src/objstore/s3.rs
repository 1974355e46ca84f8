use super::ObjectStorage;
use crate::{Config, Result};
use aws_config::retry::RetryConfig;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Implementation of [`ObjectStorage`] for S3 and S3-compatible APIs
#[derive(Clone)]
pub(super) struct S3 {
    inner: Arc<S3Inner>,
}
struct S3Inner {
    client: aws_sdk_s3::Client,
}

impl S3 {
    pub(super) async fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(S3Inner {
                client: make_s3_client(config).await,
            }),
        })
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3 {
    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: bytes::Bytes,
    ) -> Result<()> {
        debug!("Uploading object");

        self.inner
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(aws_sdk_s3::primitives::ByteStream::from(data))
            .send()
            .await
            .with_context(|_| crate::error::PutObjectSnafu {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        Ok(())
    }
}

impl std::fmt::Debug for S3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S3")
    }
}

/// Create a new AWS SDK S3 client from the config.
///
/// The region always comes from the config.  Static credentials are used if both keys were
/// provided, otherwise the SDK's default credentials chain applies.  A custom endpoint switches
/// the client to path-style addressing, which most S3-compatible services require.
///
/// The SDK's retries are disabled: each `put_object` call is exactly one request, so a failure is
/// reported as soon as it happens and the upload timeout bounds a single attempt.
async fn make_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .retry_config(RetryConfig::disabled());

    if let Some((access_key, secret_key)) = config.static_credentials() {
        debug!("Using static credentials from the config");

        loader = loader.credentials_provider(Credentials::from_keys(access_key, secret_key, None));
    }

    let aws_config = loader.load().await;

    let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
    if let Some(endpoint) = &config.endpoint {
        debug!(%endpoint, "Using custom S3 endpoint with path-style addressing");

        s3_config_builder = s3_config_builder
            .endpoint_url(endpoint.as_str())
            .force_path_style(true);
    }

    aws_sdk_s3::Client::from_conf(s3_config_builder.build())
}
