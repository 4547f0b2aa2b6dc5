//! Error taxonomy shared by every share lifecycle operation.

/// Errors surfaced by the share service and its components.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    /// The presented password is missing or not on the allow-list
    #[error("unauthorized")]
    Unauthorized,

    /// The upload would push the bucket past its quota
    #[error("quota exceeded: {available} bytes available")]
    QuotaExceeded { available: u64 },

    /// Malformed upload (no files, unsafe filename, oversized file, ...)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Share or bucket absent (or already burned)
    #[error("share not found")]
    NotFound,

    /// The client exceeded its request window
    #[error("rate limited")]
    RateLimited,

    /// Unexpected filesystem failure
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ShareError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
}

/// Result type alias for share operations.
pub type Result<T> = std::result::Result<T, ShareError>;
