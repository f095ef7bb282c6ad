//! Ledger storage port and the in-process implementation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Mutex;

/// Quota window for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Window start (Unix seconds)
    pub window_start: i64,
    /// Window length in seconds
    pub window_duration_secs: u64,
    /// Calls admitted in this window
    pub count: u64,
}

impl LedgerEntry {
    /// Fresh, empty window starting at `now`
    pub fn open(now: i64, window_duration_secs: u64) -> Self {
        Self {
            window_start: now,
            window_duration_secs,
            count: 0,
        }
    }

    /// Unix second at which the window ends
    pub fn resets_at(&self) -> i64 {
        self.window_start
            .saturating_add(self.window_duration_secs as i64)
    }

    /// Whether the window is over at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.resets_at()
    }
}

/// Result of an atomic reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Whether a call was admitted and counted
    pub allowed: bool,
    /// Entry after the reservation
    pub entry: LedgerEntry,
}

/// Reset-if-expired, then increment-if-below-quota, as one step
pub fn reserve_entry(
    current: Option<LedgerEntry>,
    now: i64,
    window_duration_secs: u64,
    quota: u64,
) -> Reservation {
    let mut entry = match current {
        Some(entry) if !entry.is_expired(now) => entry,
        _ => LedgerEntry::open(now, window_duration_secs),
    };

    let allowed = entry.count < quota;
    if allowed {
        entry.count += 1;
    }

    Reservation { allowed, entry }
}

/// Ledger storage failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerStoreError {
    /// The store could not be reached or timed out
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    /// The stored entry could not be decoded
    #[error("corrupt ledger entry: {0}")]
    Corrupt(String),
}

/// Storage backend for per-account quota windows
///
/// `reserve` must be atomic with respect to concurrent callers for the same
/// account.
#[async_trait]
pub trait LedgerStore: Send + Sync + Debug {
    /// Atomically reset an expired window, then count one call if the quota
    /// allows it
    async fn reserve(
        &self,
        account_id: &str,
        now: i64,
        window_duration_secs: u64,
        quota: u64,
    ) -> Result<Reservation, LedgerStoreError>;

    /// Current entry, expired or not
    async fn load(&self, account_id: &str) -> Result<Option<LedgerEntry>, LedgerStoreError>;

    /// Forget the account's window
    async fn clear(&self, account_id: &str) -> Result<(), LedgerStoreError>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Process-local ledger
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl InMemoryLedgerStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite an account's entry
    pub fn store(&self, account_id: &str, entry: LedgerEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(account_id.to_string(), entry);
    }

    /// Current entry without going through the async port
    pub fn snapshot(&self, account_id: &str) -> Option<LedgerEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(account_id).copied()
    }

    /// Reserve synchronously; the async port delegates here
    pub fn reserve_now(
        &self,
        account_id: &str,
        now: i64,
        window_duration_secs: u64,
        quota: u64,
    ) -> Reservation {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let reservation = reserve_entry(
            entries.get(account_id).copied(),
            now,
            window_duration_secs,
            quota,
        );
        entries.insert(account_id.to_string(), reservation.entry);
        reservation
    }

    fn remove(&self, account_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(account_id);
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn reserve(
        &self,
        account_id: &str,
        now: i64,
        window_duration_secs: u64,
        quota: u64,
    ) -> Result<Reservation, LedgerStoreError> {
        Ok(self.reserve_now(account_id, now, window_duration_secs, quota))
    }

    async fn load(&self, account_id: &str) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        Ok(self.snapshot(account_id))
    }

    async fn clear(&self, account_id: &str) -> Result<(), LedgerStoreError> {
        self.remove(account_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
