//! Result cache keyed by (account, window)
//!
//! Entries live for a TTL (10 minutes by default) measured from when they
//! were stored. Expired entries are dropped lazily on lookup or by an
//! explicit sweep. The cache has a fixed entry capacity; a write that does
//! not fit triggers one sweep of expired entries and one retry, after which
//! it is dropped. Cache failures never reach the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::metrics;
use crate::{AggregatedResult, TimeWindow};

/// Default entry lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Default entry capacity
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Cache key: account plus window bounds at second granularity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Account identifier
    pub account_id: String,
    /// Window start (Unix seconds)
    pub start: i64,
    /// Window end (Unix seconds)
    pub end: i64,
}

impl CacheKey {
    /// Key for `account_id` over `window`
    pub fn new(account_id: &str, window: TimeWindow) -> Self {
        Self {
            account_id: account_id.to_string(),
            start: window.start,
            end: window.end,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Arc<AggregatedResult>,
    stored_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age(now) >= self.ttl
    }
}

/// Write failures, always handled inside the cache
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheWriteError {
    /// No room for another entry
    #[error("cache full: {entries}/{capacity} entries")]
    QuotaExceeded {
        /// Entries currently held
        entries: usize,
        /// Configured capacity
        capacity: usize,
    },
}

/// Entry counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    /// All entries held
    pub total: usize,
    /// Entries still within their TTL
    pub valid: usize,
    /// Entries past their TTL but not yet swept
    pub expired: usize,
}

/// In-process TTL cache of aggregated reports
#[derive(Debug)]
pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    max_entries: usize,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultCache {
    /// Empty cache with default TTL and capacity
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock: Arc::new(SystemClock),
            default_ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Use a specific clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// TTL applied by [`ResultCache::insert`]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Maximum number of entries
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// TTL applied by [`ResultCache::insert`]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Cached result for the key, if present and fresh
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, account_id: &str, window: TimeWindow) -> Option<Arc<AggregatedResult>> {
        let key = CacheKey::new(account_id, window);
        let now = self.clock.now();

        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(&key) {
                None => {
                    metrics::record_cache_lookup(false);
                    debug!(account_id = %account_id, window = %window, "Cache miss");
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    metrics::record_cache_lookup(true);
                    let remaining = entry.ttl.saturating_sub(entry.age(now));
                    debug!(
                        account_id = %account_id,
                        window = %window,
                        expires_in_secs = remaining.as_secs(),
                        "Cache hit"
                    );
                    return Some(Arc::clone(&entry.data));
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        // Another writer may have refreshed the entry since the read lock
        if let Some(entry) = entries.get(&key) {
            if !entry.is_expired(now) {
                metrics::record_cache_lookup(true);
                return Some(Arc::clone(&entry.data));
            }
            entries.remove(&key);
            debug!(account_id = %account_id, window = %window, "Cache entry expired, removed");
        }
        metrics::record_cache_lookup(false);
        None
    }

    /// Store with the default TTL
    pub fn insert(&self, account_id: &str, window: TimeWindow, data: Arc<AggregatedResult>) {
        self.put(account_id, window, data, self.default_ttl);
    }

    /// Store with an explicit TTL
    ///
    /// When the cache is full, expired entries are swept and the write is
    /// retried once; if it still does not fit it is dropped.
    pub fn put(&self, account_id: &str, window: TimeWindow, data: Arc<AggregatedResult>, ttl: Duration) {
        let key = CacheKey::new(account_id, window);
        let rows = data.len();
        let entry = CacheEntry {
            data,
            stored_at: self.clock.now(),
            ttl,
        };

        let result = match self.try_store(key.clone(), entry.clone()) {
            Err(CacheWriteError::QuotaExceeded { .. }) => {
                let swept = self.clear_expired();
                debug!(swept, "Cache full, swept expired entries before retrying write");
                self.try_store(key, entry)
            }
            ok => ok,
        };

        match result {
            Ok(()) => debug!(
                account_id = %account_id,
                window = %window,
                rows,
                ttl_secs = ttl.as_secs(),
                "Cache saved"
            ),
            Err(e) => warn!(
                account_id = %account_id,
                window = %window,
                error = %e,
                "Dropping cache write"
            ),
        }
    }

    fn try_store(&self, key: CacheKey, entry: CacheEntry) -> Result<(), CacheWriteError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            return Err(CacheWriteError::QuotaExceeded {
                entries: entries.len(),
                capacity: self.max_entries,
            });
        }
        entries.insert(key, entry);
        Ok(())
    }

    /// Drop entries for one account, or everything when `account_id` is None
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, account_id: Option<&str>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        match account_id {
            Some(account) => entries.retain(|key, _| key.account_id != account),
            None => entries.clear(),
        }
        let removed = before - entries.len();
        info!(account_id = ?account_id, removed, "Cache invalidated");
        removed
    }

    /// Drop a single (account, window) entry
    pub fn invalidate_window(&self, account_id: &str, window: TimeWindow) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&CacheKey::new(account_id, window)).is_some()
    }

    /// Remove every expired entry, returning how many were removed
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Entry counts
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let expired = entries.values().filter(|e| e.is_expired(now)).count();

        CacheStats {
            total: entries.len(),
            valid: entries.len() - expired,
            expired,
        }
    }
}
