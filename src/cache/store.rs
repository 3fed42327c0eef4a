//! Render cache storage.
//!
//! Maps a route key to the last successfully rendered HTML and the Unix time
//! of that render. Entries never expire on their own: staleness is decided at
//! read time and stale entries stay servable until a refresh overwrites them.

use std::collections::HashMap;
use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use metrics::gauge;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;

use super::keys::CacheKey;

/// Current Unix time in whole seconds.
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Read-time classification of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

impl Freshness {
    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
        }
    }
}

/// A rendered page as returned by the store.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub html: Bytes,
    /// Unix seconds of the render that produced `html`.
    pub timestamp: i64,
}

impl CacheEntry {
    /// Seconds elapsed since the entry was rendered. Timestamps in the future count as zero.
    pub fn age_at(&self, now: i64) -> u64 {
        u64::try_from(now.saturating_sub(self.timestamp)).unwrap_or(0)
    }

    /// Stale once the age strictly exceeds the threshold.
    pub fn freshness(&self, now: i64, refresh_seconds: u64) -> Freshness {
        if self.age_at(now) > refresh_seconds {
            Freshness::Stale
        } else {
            Freshness::Fresh
        }
    }
}

/// Storage backend for rendered pages.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Overwrite the entry for `key`. The stored timestamp never moves backwards.
    fn set(&self, key: CacheKey, html: Bytes, timestamp: i64) -> Result<(), CacheError>;

    /// Remove every entry whose key starts with `prefix`; returns how many were removed.
    fn delete_by_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    /// Remove every entry; returns how many were removed.
    fn flush_all(&self) -> Result<usize, CacheError>;

    fn keys(&self) -> Result<Vec<String>, CacheError>;

    fn len(&self) -> Result<usize, CacheError>;

    fn is_empty(&self) -> Result<bool, CacheError> {
        self.len().map(|len| len == 0)
    }

    fn contains(&self, key: &CacheKey) -> Result<bool, CacheError> {
        self.get(key).map(|entry| entry.is_some())
    }
}

struct StoredPage {
    html: Bytes,
    timestamp: i64,
}

/// Process-local, unbounded in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    pages: RwLock<HashMap<CacheKey, StoredPage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, op: &'static str) -> RwLockReadGuard<'_, HashMap<CacheKey, StoredPage>> {
        recover(self.pages.read(), op)
    }

    fn write(&self, op: &'static str) -> RwLockWriteGuard<'_, HashMap<CacheKey, StoredPage>> {
        recover(self.pages.write(), op)
    }
}

/// A panic while holding the lock leaves whole entries behind, so keep serving them.
fn recover<G>(result: LockResult<G>, op: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            target = "coffee_ssr::cache",
            op,
            "render cache lock was poisoned, continuing with current entries"
        );
        poisoned.into_inner()
    })
}

fn record_entries(len: usize) {
    gauge!("coffee_ssr_cache_entries").set(len as f64);
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let pages = self.read("get");
        Ok(pages.get(key).map(|page| CacheEntry {
            key: key.clone(),
            html: page.html.clone(),
            timestamp: page.timestamp,
        }))
    }

    fn set(&self, key: CacheKey, html: Bytes, timestamp: i64) -> Result<(), CacheError> {
        let mut pages = self.write("set");
        let timestamp = pages
            .get(&key)
            .map_or(timestamp, |previous| previous.timestamp.max(timestamp));
        pages.insert(key, StoredPage { html, timestamp });
        record_entries(pages.len());
        Ok(())
    }

    fn delete_by_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut pages = self.write("delete_by_prefix");
        let before = pages.len();
        pages.retain(|key, _| !key.starts_with(prefix));
        record_entries(pages.len());
        Ok(before - pages.len())
    }

    fn flush_all(&self) -> Result<usize, CacheError> {
        let mut pages = self.write("flush_all");
        let removed = pages.len();
        pages.clear();
        record_entries(0);
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>, CacheError> {
        let pages = self.read("keys");
        let mut keys: Vec<String> = pages.keys().map(|key| key.as_str().to_string()).collect();
        keys.sort();
        Ok(keys)
    }

    fn len(&self) -> Result<usize, CacheError> {
        Ok(self.read("len").len())
    }
}
