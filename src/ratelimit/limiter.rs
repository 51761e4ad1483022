//! Core rate limiter implementation.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, trace, warn};

use super::bucket::{BucketState, LimitResult};
use super::keys::BucketKeys;
use crate::config::StoreConfig;
use crate::error::{LimiterError, Result};
use crate::store::{BucketStore, RedisStore, StoreError, StoreOp};

/// Default requests per window.
const DEFAULT_QUOTA: u64 = 5000;
/// Default window length.
const DEFAULT_WINDOW: Duration = Duration::from_secs(3600);
/// Default bound on a single store round trip.
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_millis(500);
/// Default root segment of bucket keys.
const DEFAULT_NAMESPACE: &str = "RateLimit";
/// Reads of a bucket that changed underneath us before giving up.
const MAX_ATTEMPTS: u32 = 3;

/// Longest accepted window: one leap year.
pub const MAX_WINDOW: Duration = Duration::from_secs(366 * 24 * 60 * 60);

/// Settings fixed for the lifetime of a limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitSettings {
    /// Requests allowed per window for each identifier
    pub quota: u64,
    /// Window length; a whole number of seconds
    pub window: Duration,
    /// Bound on every store round trip
    pub operation_timeout: Duration,
    /// Root segment of every bucket key
    pub namespace: String,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            quota: DEFAULT_QUOTA,
            window: DEFAULT_WINDOW,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl LimitSettings {
    /// Settings with the given quota and window, defaults elsewhere.
    pub fn new(quota: u64, window: Duration) -> Self {
        Self {
            quota,
            window,
            ..Self::default()
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.quota == 0 || self.quota > i64::MAX as u64 {
            return Err(LimiterError::Config(format!("quota {} out of range", self.quota)));
        }
        if self.window.as_secs() == 0 || self.window.subsec_nanos() != 0 {
            return Err(LimiterError::Config(format!(
                "window must be a positive whole number of seconds, got {:?}",
                self.window
            )));
        }
        if self.window > MAX_WINDOW {
            return Err(LimiterError::Config(format!(
                "window of {}s exceeds the maximum of {}s",
                self.window.as_secs(),
                MAX_WINDOW.as_secs()
            )));
        }
        if self.operation_timeout.is_zero() {
            return Err(LimiterError::Config("operation timeout must be positive".to_string()));
        }
        if self.namespace.is_empty() {
            return Err(LimiterError::Config("namespace must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Fixed-window rate limiter over a shared [`BucketStore`].
///
/// Holds no bucket state of its own; concurrent callers, in this process or
/// in other instances sharing the store, are ordered by the store's atomic
/// primitives. Share it across tasks behind an `Arc`.
pub struct RateLimiter<S: BucketStore> {
    store: S,
    settings: LimitSettings,
    closed: AtomicBool,
}

impl<S: BucketStore> std::fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("settings", &self.settings)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RateLimiter<RedisStore> {
    /// Connect to the Redis at `url` and probe it.
    pub async fn connect(url: &str, settings: LimitSettings) -> Result<Self> {
        let config = StoreConfig {
            url: url.to_string(),
            operation_timeout_ms: settings.operation_timeout.as_millis() as u64,
            ..StoreConfig::default()
        };
        Self::from_config(&config, settings).await
    }

    /// Build the Redis pool described by `config` and probe it.
    pub async fn from_config(config: &StoreConfig, settings: LimitSettings) -> Result<Self> {
        let store = RedisStore::connect(config)
            .map_err(|source| LimiterError::InitializationFailed { source })?;
        Self::init(store, settings).await
    }
}

impl<S: BucketStore> RateLimiter<S> {
    /// Validate settings and probe the store.
    ///
    /// Fails with [`LimiterError::InitializationFailed`] if the store does not
    /// answer; the caller decides whether to try again.
    pub async fn init(store: S, settings: LimitSettings) -> Result<Self> {
        settings.validate()?;

        let probe = tokio::time::timeout(settings.operation_timeout, store.ping()).await;
        let source = match probe {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(StoreError::Timeout(settings.operation_timeout)),
        };
        if let Some(source) = source {
            warn!(operation = %StoreOp::Ping, error = %source, "Store liveness probe failed");
            return Err(LimiterError::InitializationFailed { source });
        }

        info!(
            quota = settings.quota,
            window_secs = settings.window.as_secs(),
            namespace = %settings.namespace,
            "Rate limiter ready"
        );

        Ok(Self {
            store,
            settings,
            closed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &LimitSettings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Count one request for `identifier` and report what is left of its window.
    ///
    /// The first request of a window creates the bucket and is counted. Once
    /// the quota is spent, further calls return `remaining == 0` without
    /// writing anything until the bucket expires.
    #[instrument(skip(self), fields(namespace = %self.settings.namespace))]
    pub async fn check_and_consume(&self, identifier: &str) -> Result<LimitResult> {
        self.ensure_open()?;

        let keys = BucketKeys::new(&self.settings.namespace, identifier);
        let candidate_reset_at = self.candidate_reset_at()?;

        for attempt in 1..=MAX_ATTEMPTS {
            let Some(bucket) = self.read_bucket(&keys).await? else {
                let fresh = BucketState::fresh(self.settings.quota, candidate_reset_at);
                if self.create_bucket(&keys, &fresh).await? {
                    debug!(
                        key = %keys,
                        quota = fresh.quota,
                        reset_at = %fresh.reset_at,
                        "Created rate limit bucket"
                    );
                    return Ok(fresh.into());
                }
                debug!(key = %keys, attempt, "Bucket created concurrently, re-reading");
                continue;
            };

            if bucket.remaining == 0 {
                debug!(key = %keys, quota = bucket.quota, "Rate limit exhausted");
                return Ok(bucket.into());
            }

            match self.decrement(&keys).await? {
                Some(remaining) => {
                    let bucket = bucket.with_remaining(remaining, &keys)?;
                    trace!(key = %keys, remaining = bucket.remaining, "Consumed one request");
                    return Ok(bucket.into());
                }
                None => {
                    debug!(key = %keys, attempt, "Bucket expired before decrement, re-reading");
                }
            }
        }

        warn!(key = %keys, attempts = MAX_ATTEMPTS, "Giving up on contended bucket");
        Err(LimiterError::BucketContention {
            key: keys.remaining,
            attempts: MAX_ATTEMPTS,
        })
    }

    /// Report the current window for `identifier` without consuming.
    ///
    /// Returns `None` when no bucket is active.
    pub async fn peek(&self, identifier: &str) -> Result<Option<LimitResult>> {
        self.ensure_open()?;
        let keys = BucketKeys::new(&self.settings.namespace, identifier);
        Ok(self.read_bucket(&keys).await?.map(LimitResult::from))
    }

    /// Release the store's connections. Calling it again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Rate limiter already closed");
            return Ok(());
        }

        self.store
            .close()
            .await
            .map_err(|e| LimiterError::store(StoreOp::Close, self.settings.namespace.as_str(), e))?;
        info!(namespace = %self.settings.namespace, "Rate limiter closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LimiterError::LimiterClosed);
        }
        Ok(())
    }

    fn candidate_reset_at(&self) -> Result<DateTime<Utc>> {
        let overflow = || LimiterError::Config(format!("window of {:?} overflows the clock", self.settings.window));
        let window = i64::try_from(self.settings.window.as_secs()).map_err(|_| overflow())?;
        let secs = Utc::now().timestamp().checked_add(window).ok_or_else(overflow)?;
        DateTime::from_timestamp(secs, 0).ok_or_else(overflow)
    }

    async fn read_bucket(&self, keys: &BucketKeys) -> Result<Option<BucketState>> {
        let names = keys.as_array();
        let values = self
            .bounded(StoreOp::BulkRead, &keys.remaining, self.store.mget(&names))
            .await?;
        BucketState::from_values(keys, &values)
    }

    async fn create_bucket(&self, keys: &BucketKeys, bucket: &BucketState) -> Result<bool> {
        let entries = bucket.entries(keys);
        self.bounded(
            StoreOp::Create,
            &keys.remaining,
            self.store.create_bucket(&entries, self.settings.window),
        )
        .await
    }

    async fn decrement(&self, keys: &BucketKeys) -> Result<Option<i64>> {
        let key = keys.remaining.as_str();
        match self
            .bounded(StoreOp::Decrement, key, self.store.decrement_if_positive(key))
            .await
        {
            Err(LimiterError::StoreUnavailable {
                source: StoreError::UnexpectedReply(reason),
                ..
            }) => Err(LimiterError::corrupted(key, reason)),
            other => other,
        }
    }

    /// Run one store round trip under the operation timeout.
    async fn bounded<T, F>(&self, operation: StoreOp, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        let timeout = self.settings.operation_timeout;
        let source = match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => StoreError::Timeout(timeout),
        };
        warn!(operation = %operation, key = %key, error = %source, "Store operation failed");
        Err(LimiterError::store(operation, key, source))
    }
}
