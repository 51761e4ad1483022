//! Process-local bucket store.
//!
//! Mirrors the semantics of the Redis adapter (lazy expiry, create-only bucket
//! creation, clamped decrement) behind a single mutex. Clones share the same
//! data, so several limiters built on clones behave like several service
//! instances sharing one store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{parse_integer, BucketStore, StoreError};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    closed: bool,
    unreachable: bool,
}

impl Inner {
    fn check(&self) -> Result<(), StoreError> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        if self.unreachable {
            return Err(StoreError::Unreachable("in-memory store marked unreachable".to_string()));
        }
        Ok(())
    }

    /// Drop `key` if its time-to-live has elapsed, then report whether it is live.
    fn evict_expired(&mut self, key: &str, now: Instant) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.expires_at <= now => {
                self.entries.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }
}

/// In-memory [`BucketStore`] for tests and single-process use.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that fails every operation, as if the server were down.
    pub fn unreachable() -> Self {
        let store = Self::new();
        store.set_unreachable(true);
        store
    }

    /// Toggle the simulated outage.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.lock().unreachable = unreachable;
    }

    /// Write a raw value, overwriting whatever is there.
    pub fn insert(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.inner.lock().entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at,
            },
        );
    }

    /// Read a raw value, ignoring the outage and closed flags.
    pub fn raw_get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        if !inner.evict_expired(key, Instant::now()) {
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    /// Remaining time-to-live of a key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if !inner.evict_expired(key, now) {
            return None;
        }
        inner.entries.get(key).map(|e| e.expires_at - now)
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.entries.retain(|_, e| e.expires_at > now);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BucketStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.lock().check()
    }

    async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.check()?;

        let values = keys
            .iter()
            .map(|key| {
                if inner.evict_expired(key, now) {
                    inner.entries.get(*key).map(|e| e.value.clone())
                } else {
                    None
                }
            })
            .collect();
        Ok(values)
    }

    async fn create_bucket(&self, entries: &[(&str, i64)], ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.check()?;

        let mut exists = false;
        for (key, _) in entries {
            exists |= inner.evict_expired(key, now);
        }
        if exists {
            debug!(keys = entries.len(), "Create-only write refused, bucket exists");
            return Ok(false);
        }

        let expires_at = now.checked_add(ttl).ok_or(StoreError::TtlOutOfRange(ttl))?;
        for (key, value) in entries {
            inner.entries.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        }
        Ok(true)
    }

    async fn decrement_if_positive(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.check()?;

        if !inner.evict_expired(key, now) {
            return Ok(None);
        }
        let Some(entry) = inner.entries.get_mut(key) else {
            return Ok(None);
        };
        let current = parse_integer(&entry.value).ok_or_else(|| {
            StoreError::UnexpectedReply(format!("value at {} is not an integer", key))
        })?;
        if current <= 0 {
            return Ok(Some(current));
        }
        let next = current - 1;
        entry.value = next.to_string();
        Ok(Some(next))
    }

    async fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.closed = true;
            info!("In-memory store closed");
        }
        Ok(())
    }
}
