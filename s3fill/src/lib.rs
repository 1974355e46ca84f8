#![doc = include_str!("../README.md")]

mod config;
mod error;
mod keys;
mod objstore;
mod upload;

pub use config::Config;
pub use error::{Result, S3FillError};
pub use keys::{ClockKeyGenerator, KeyGenerator, ObjectKey, OBJECT_KEY_LEN};
pub use objstore::ObjectStorage;
pub use upload::*;
