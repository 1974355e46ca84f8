//! Generation of the object keys the synthetic objects are uploaded under.
use sha2::{Digest, Sha512};
use std::fmt;

/// The length in characters of every key produced by [`ObjectKey::from_nanos`]: a hex-encoded
/// SHA-512 digest.
pub const OBJECT_KEY_LEN: usize = 128;

/// The key under which one generated object is stored in the bucket.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Derive a key from a clock reading expressed as nanoseconds since the UNIX epoch.
    ///
    /// The key is the lower-case hex encoding of the SHA-512 digest of the decimal representation
    /// of `nanos`.  Distinct readings produce distinct keys.
    pub fn from_nanos(nanos: i128) -> Self {
        let digest = Sha512::digest(nanos.to_string().as_bytes());

        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for ObjectKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source of object keys.
///
/// Called once per uploaded object, concurrently from every upload worker.
pub trait KeyGenerator: fmt::Debug + Send + Sync + 'static {
    fn generate(&self) -> ObjectKey;
}

/// The default [`KeyGenerator`], which hashes the current wall clock time in nanoseconds.
///
/// Keys are unique in practice as long as no two workers read the clock in the same nanosecond.
/// That is not guaranteed, but with nanosecond resolution it's vanishingly unlikely.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClockKeyGenerator;

impl KeyGenerator for ClockKeyGenerator {
    fn generate(&self) -> ObjectKey {
        ObjectKey::from_nanos(nanos_since_epoch(chrono::Utc::now()))
    }
}

/// Nanoseconds since the UNIX epoch, exact for any time chrono can represent.
fn nanos_since_epoch(time: chrono::DateTime<chrono::Utc>) -> i128 {
    match time.timestamp_nanos_opt() {
        Some(nanos) => nanos.into(),
        // Outside the years 1677 to 2262 the count doesn't fit in an i64
        None => {
            i128::from(time.timestamp()) * 1_000_000_000
                + i128::from(time.timestamp_subsec_nanos())
        }
    }
}
