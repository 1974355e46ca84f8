use crate::{Config, Result};
use dyn_clone::DynClone;

mod s3;

/// An object storage system like S3.
///
/// The upload workers only ever need to write one small object at a time, so that is all this
/// trait exposes.  Keeping it behind a trait lets callers substitute their own implementation,
/// for example a recording double in tests.
///
/// Use [`ObjectStorageFactory`] to create the S3 implementation.
///
/// Note that all implementations should be trivially cloneable such that the cost of a clone is
/// the cost of increasing the ref count on an `Arc`, since every worker gets its own clone.
#[async_trait::async_trait]
pub trait ObjectStorage: DynClone + std::fmt::Debug + Sync + Send + 'static {
    /// Upload a small object in a single request, without any multi-part chunking.
    ///
    /// Makes exactly one attempt; retrying is up to the caller.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        data: bytes::Bytes,
    ) -> Result<()>;
}

dyn_clone::clone_trait_object!(ObjectStorage);

/// Constructs [`ObjectStorage`] implementations from a [`Config`].
#[derive(Debug)]
pub(crate) struct ObjectStorageFactory {
    config: Config,
}

impl ObjectStorageFactory {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Return a [`ObjectStorage`] implementation for S3 or an S3-compatible API
    pub async fn s3(&self) -> Result<Box<dyn ObjectStorage>> {
        // A new client is made on each call rather than caching one for the process.  Each AWS
        // SDK `Client` holds `hyper` resources tied to the tokio runtime it was created on, and
        // tests run many runtimes in one process.
        Ok(Box::new(s3::S3::new(&self.config).await?))
    }
}
