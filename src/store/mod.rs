//! Shared key-value store used as the single source of truth for buckets.
//!
//! The limiter only talks to the store through [`BucketStore`], which exposes
//! the handful of primitives the fixed-window protocol needs. Every primitive
//! that mutates state must be atomic on the store side: the limiter holds no
//! local locks and relies entirely on the store to order concurrent callers.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod memory;
mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::RedisStore;

/// Errors reported by a store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("store is closed")]
    Closed,
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("time-to-live of {0:?} is out of range")]
    TtlOutOfRange(Duration),
}

/// Parse a stored value the way the store's own integer commands do.
///
/// Only the canonical decimal form is accepted: an optional `-`, no `+`, no
/// surrounding whitespace and no leading zeros. Anything else is a value
/// `DECR` would refuse, so it must not pass as an integer here either.
pub fn parse_integer(value: &str) -> Option<i64> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    let canonical = match digits.as_bytes() {
        [] => false,
        [b'0'] => !value.starts_with('-'),
        [first, rest @ ..] => first.is_ascii_digit() && *first != b'0' && rest.iter().all(u8::is_ascii_digit),
    };
    if !canonical {
        return None;
    }
    value.parse().ok()
}

/// The store primitive an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Ping,
    BulkRead,
    Create,
    Decrement,
    Close,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::Ping => "PING",
            StoreOp::BulkRead => "MGET",
            StoreOp::Create => "SET NX EX",
            StoreOp::Decrement => "DECR",
            StoreOp::Close => "CLOSE",
        };
        f.write_str(name)
    }
}

/// Primitives a bucket store must provide.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Read several keys in one round trip. Missing keys yield `None`, in order.
    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError>;

    /// Create every entry with the given time-to-live, only if none of the
    /// keys exist. All entries are written or none are.
    ///
    /// Returns `Ok(false)` when at least one key already existed.
    async fn create_bucket(&self, entries: &[(&str, i64)], ttl: Duration) -> Result<bool, StoreError>;

    /// Decrement `key` by one if its value is positive.
    ///
    /// Returns the value after the operation (unchanged when it was already
    /// zero or below), or `None` if the key does not exist.
    async fn decrement_if_positive(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Release pooled connections. Subsequent calls fail with [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: BucketStore + ?Sized> BucketStore for std::sync::Arc<T> {
    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        (**self).mget(keys).await
    }

    async fn create_bucket(&self, entries: &[(&str, i64)], ttl: Duration) -> Result<bool, StoreError> {
        (**self).create_bucket(entries, ttl).await
    }

    async fn decrement_if_positive(&self, key: &str) -> Result<Option<i64>, StoreError> {
        (**self).decrement_if_positive(key).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        (**self).close().await
    }
}
