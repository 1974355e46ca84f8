//! Testing helpers for use writing unit and integration tests of the `s3fill` crate
//!
//! This is internal to `s3fill` and is not intended for use by any other crates.  Breaking changes
//! can be made at any time.
pub mod logging;
pub mod minio;

/// Test code that reports errors can just cheat and use `eyre`
pub type Result<T> = color_eyre::Result<T>;
