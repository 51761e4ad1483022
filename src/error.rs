//! Error types for the Ratewarden limiter.

use thiserror::Error;

use crate::store::{StoreError, StoreOp};

/// Main error type for Ratewarden operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The shared store could not be reached or did not answer in time.
    #[error("Store unavailable during {operation} on {key}: {source}")]
    StoreUnavailable {
        operation: StoreOp,
        key: String,
        #[source]
        source: StoreError,
    },

    /// Stored bucket values are missing, malformed, or inconsistent.
    #[error("Corrupted bucket at {key}: {reason}")]
    CorruptedBucket { key: String, reason: String },

    /// Operation attempted after `close()`.
    #[error("Rate limiter is closed")]
    LimiterClosed,

    /// The liveness probe failed while constructing the limiter.
    #[error("Rate limiter initialization failed: {source}")]
    InitializationFailed {
        #[source]
        source: StoreError,
    },

    /// The bucket kept changing underneath the caller.
    #[error("Bucket {key} changed concurrently {attempts} times in a row")]
    BucketContention { key: String, attempts: u32 },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    pub(crate) fn store(operation: StoreOp, key: impl Into<String>, source: StoreError) -> Self {
        LimiterError::StoreUnavailable {
            operation,
            key: key.into(),
            source,
        }
    }

    pub(crate) fn corrupted(key: impl Into<String>, reason: impl Into<String>) -> Self {
        LimiterError::CorruptedBucket {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later can succeed.
    ///
    /// Retries are a caller policy; the limiter itself never retries a failed
    /// store operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LimiterError::StoreUnavailable { .. } | LimiterError::BucketContention { .. }
        )
    }
}

/// Result type alias for Ratewarden operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
