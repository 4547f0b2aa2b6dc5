//! Password -> bucket keying.
//!
//! A bucket id is a compact directory name derived from an upload password.
//! It is a keying function, not an authorization check: callers verify the
//! password against the allow-list before resolving it.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of hex characters in a bucket id (64 bits of digest).
pub const BUCKET_ID_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BucketId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid bucket id: {0:?}")]
pub struct InvalidBucketId(pub String);

impl BucketId {
    /// Parse an untrusted id, e.g. from a URL path segment.
    ///
    /// Only `BUCKET_ID_LEN` lowercase hex characters are accepted, which also
    /// guarantees the id is a single, inert path component.
    pub fn parse(s: &str) -> Result<Self, InvalidBucketId> {
        let valid = s.len() == BUCKET_ID_LEN
            && s.bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidBucketId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BucketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BucketId {
    type Error = InvalidBucketId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BucketId> for String {
    fn from(id: BucketId) -> Self {
        id.0
    }
}

/// Derives a bucket id from a password.
///
/// Implementations must be pure: the same password always yields the same id.
pub trait BucketResolver: Send + Sync + fmt::Debug + 'static {
    fn resolve(&self, password: &str) -> BucketId;
}

/// Default resolver: the first 8 bytes of SHA-256, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Resolver;

impl BucketResolver for Sha256Resolver {
    fn resolve(&self, password: &str) -> BucketId {
        let digest = Sha256::digest(password.as_bytes());
        BucketId(hex::encode(&digest[..BUCKET_ID_LEN / 2]))
    }
}
