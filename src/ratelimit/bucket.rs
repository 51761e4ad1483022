//! Bucket state as stored, and the limit result handed back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::keys::BucketKeys;
use crate::error::{LimiterError, Result};
use crate::store::parse_integer;

/// One identifier's window as read from (or written to) the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Ceiling for the window
    pub quota: u64,
    /// Requests left in the window
    pub remaining: u64,
    /// End of the window
    pub reset_at: DateTime<Utc>,
}

impl BucketState {
    /// A new bucket with the creating request already counted.
    pub fn fresh(quota: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            quota,
            remaining: quota.saturating_sub(1),
            reset_at,
        }
    }

    /// Parse the values of a bulk read ordered as [`BucketKeys::as_array`].
    ///
    /// Returns `Ok(None)` when no entry exists. Some-but-not-all entries, or
    /// values that are not integers in range, mean the bucket is corrupted.
    pub fn from_values(keys: &BucketKeys, values: &[Option<String>]) -> Result<Option<Self>> {
        let [quota_key, remaining_key, reset_key] = keys.as_array();
        let [quota, remaining, reset] = match values {
            [q, r, t] => [q, r, t],
            _ => {
                return Err(LimiterError::corrupted(
                    keys.remaining.as_str(),
                    format!("expected 3 values, read {}", values.len()),
                ))
            }
        };

        let (quota, remaining, reset) = match (quota, remaining, reset) {
            (None, None, None) => return Ok(None),
            (Some(q), Some(r), Some(t)) => (q, r, t),
            _ => {
                let missing = [(quota_key, quota), (remaining_key, remaining), (reset_key, reset)]
                    .into_iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(k, _)| k)
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(LimiterError::corrupted(
                    keys.remaining.as_str(),
                    format!("partial bucket, missing {}", missing),
                ));
            }
        };

        let quota = parse_count(quota_key, quota)?;
        if quota == 0 {
            return Err(LimiterError::corrupted(quota_key, "quota is zero"));
        }
        let remaining = parse_count(remaining_key, remaining)?;
        let reset_secs = parse_integer(reset)
            .ok_or_else(|| LimiterError::corrupted(reset_key, format!("{:?} is not a timestamp", reset)))?;
        let reset_at = DateTime::from_timestamp(reset_secs, 0).ok_or_else(|| {
            LimiterError::corrupted(reset_key, format!("{} is out of range", reset_secs))
        })?;

        Self {
            quota,
            remaining,
            reset_at,
        }
        .checked(keys)
        .map(Some)
    }

    /// The same bucket after the store reported a new remaining count.
    pub fn with_remaining(self, remaining: i64, keys: &BucketKeys) -> Result<Self> {
        let remaining = u64::try_from(remaining).map_err(|_| {
            LimiterError::corrupted(keys.remaining.as_str(), format!("remaining is negative ({})", remaining))
        })?;
        Self { remaining, ..self }.checked(keys)
    }

    /// Entries to write when creating this bucket, in key order.
    pub fn entries<'a>(&self, keys: &'a BucketKeys) -> [(&'a str, i64); 3] {
        [
            (keys.quota.as_str(), self.quota as i64),
            (keys.remaining.as_str(), self.remaining as i64),
            (keys.reset.as_str(), self.reset_at.timestamp()),
        ]
    }

    fn checked(self, keys: &BucketKeys) -> Result<Self> {
        if self.remaining > self.quota {
            return Err(LimiterError::corrupted(
                keys.remaining.as_str(),
                format!("remaining {} exceeds quota {}", self.remaining, self.quota),
            ));
        }
        Ok(self)
    }
}

fn parse_count(key: &str, value: &str) -> Result<u64> {
    parse_integer(value)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| LimiterError::corrupted(key, format!("{:?} is not a non-negative integer", value)))
}

/// The outcome of a check-and-consume call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitResult {
    /// Ceiling for the window
    pub quota: u64,
    /// Requests counted so far in the window
    pub used: u64,
    /// Requests left in the window
    pub remaining: u64,
    /// When the window ends and the quota resets
    pub retry_after: DateTime<Utc>,
}

impl LimitResult {
    /// Whether the window's quota is used up.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Whole seconds from `now` until the window resets, never negative.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        (self.retry_after - now).num_seconds().max(0) as u64
    }
}

impl From<BucketState> for LimitResult {
    fn from(bucket: BucketState) -> Self {
        Self {
            quota: bucket.quota,
            used: bucket.quota - bucket.remaining,
            remaining: bucket.remaining,
            retry_after: bucket.reset_at,
        }
    }
}
