//! Per-account quota ledger
//!
//! The upstream allows 2000 calls per account per hour. [`RateLedger`]
//! counts every call that reaches the transport and refuses further calls
//! locally once the window is spent.
//!
//! A durable [`LedgerStore`] (Redis) is authoritative when configured. When
//! it fails or times out the ledger falls back to its in-process counter,
//! seeded with the last shared count it saw, and reports
//! [`LedgerMode::Degraded`]. Ledger operations never fail.
//!
//! Admitted calls are also kept in a bounded in-process [`RequestLog`] for
//! the request history views.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::fetcher::query::UNKNOWN_OPERATION;
use crate::fetcher::FetcherError;
use crate::metrics;

pub mod history;
pub mod redis_store;
pub mod store;

pub use history::{RequestLog, RequestRecord, RequestStats, REQUEST_LOG_CAPACITY};
pub use redis_store::RedisLedgerStore;
pub use store::{InMemoryLedgerStore, LedgerEntry, LedgerStore, LedgerStoreError, Reservation};

/// Calls allowed per account per window
pub const QUOTA_PER_WINDOW: u64 = 2000;

/// Quota window length (seconds)
pub const WINDOW_SECS: u64 = 3600;

/// Fraction of the quota at which usage is reported as approaching
pub const WARNING_RATIO: f64 = 0.8;

/// Upper bound on any durable store operation before falling back
pub const STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Ledger limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LedgerConfig {
    /// Calls allowed per window
    pub quota: u64,
    /// Window length (seconds)
    pub window_secs: u64,
    /// Advisory threshold as a fraction of `quota`
    pub warning_ratio: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            quota: QUOTA_PER_WINDOW,
            window_secs: WINDOW_SECS,
            warning_ratio: WARNING_RATIO,
        }
    }
}

impl LedgerConfig {
    /// Count at which usage becomes "approaching" (1600 by default)
    pub fn warning_threshold(&self) -> u64 {
        (self.quota as f64 * self.warning_ratio).round() as u64
    }
}

/// Where a status snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
    /// Durable shared store answered
    Shared,
    /// No shared store configured
    Local,
    /// Shared store configured but unreachable; local counter used
    Degraded,
}

/// Quota snapshot for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateStatus {
    /// Calls consumed in the active window
    pub used: u64,
    /// Calls left
    pub remaining: u64,
    /// Quota ceiling
    pub total: u64,
    /// `used / total` as a rounded percentage
    pub percentage: u32,
    /// End of the active window
    pub reset_time: DateTime<Utc>,
    /// Usage at or above the warning threshold
    pub approaching: bool,
    /// Quota spent
    pub exceeded: bool,
    /// Count at which `approaching` turns on
    pub warning_threshold: u64,
    /// Snapshot source
    pub mode: LedgerMode,
    /// Human-readable time until the window resets
    pub time_until_reset: String,
}

impl RateStatus {
    /// Build a snapshot; an expired or missing entry reads as an empty window
    /// starting at `now`
    pub fn from_entry(
        entry: Option<LedgerEntry>,
        now: i64,
        config: &LedgerConfig,
        mode: LedgerMode,
    ) -> Self {
        let entry = entry
            .filter(|e| !e.is_expired(now))
            .unwrap_or_else(|| LedgerEntry::open(now, config.window_secs));

        let used = entry.count;
        let total = config.quota;
        let percentage = if total == 0 {
            100
        } else {
            ((used as f64 / total as f64) * 100.0).round() as u32
        };
        let resets_at = entry.resets_at();

        Self {
            used,
            remaining: total.saturating_sub(used),
            total,
            percentage,
            reset_time: DateTime::<Utc>::from_timestamp(resets_at, 0).unwrap_or_default(),
            approaching: used >= config.warning_threshold(),
            exceeded: used >= total,
            warning_threshold: config.warning_threshold(),
            mode,
            time_until_reset: format_time_until_reset(resets_at - now),
        }
    }

    /// Whole minutes until the window resets, rounded up
    pub fn minutes_until_reset(&self, now: DateTime<Utc>) -> i64 {
        let secs = (self.reset_time - now).num_seconds().max(0);
        (secs + 59) / 60
    }
}

/// Outcome of [`RateLedger::check_and_reserve`]
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    /// Whether the call may proceed; it has already been counted
    pub allowed: bool,
    /// Snapshot after the reservation
    pub status: RateStatus,
}

impl Admission {
    /// Synthetic error for a refused admission
    pub fn refusal(&self) -> FetcherError {
        FetcherError::LocalQuotaExceeded {
            used: self.status.used,
            limit: self.status.total,
            reset_at: self.status.reset_time,
        }
    }
}

/// Render a countdown the way the rate indicator shows it
pub fn format_time_until_reset(seconds: i64) -> String {
    if seconds <= 0 {
        return "Resetting...".to_string();
    }
    if seconds < 60 {
        return "Less than a minute".to_string();
    }

    let minutes = (seconds + 59) / 60;
    match minutes {
        1 => "1 minute".to_string(),
        m if m < 60 => format!("{m} minutes"),
        m => {
            let hours = m / 60;
            let mins = m % 60;
            if mins == 0 {
                format!("{hours} hour{}", if hours > 1 { "s" } else { "" })
            } else {
                format!("{hours}h {mins}m")
            }
        }
    }
}

/// Quota ledger with optional shared store
#[derive(Debug)]
pub struct RateLedger {
    durable: Option<Arc<dyn LedgerStore>>,
    local: InMemoryLedgerStore,
    history: RequestLog,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
}

impl Default for RateLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLedger {
    /// Local-only ledger on the system clock
    pub fn new() -> Self {
        Self {
            durable: None,
            local: InMemoryLedgerStore::new(),
            history: RequestLog::new(),
            clock: Arc::new(SystemClock),
            config: LedgerConfig::default(),
        }
    }

    /// Use a shared durable store as the authority
    pub fn with_store(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Use a specific clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the limits
    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    /// Active limits
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Count one call for `account_id` if the window allows it
    ///
    /// Expired windows are reset before admission is evaluated. A refused
    /// call is not counted.
    pub async fn check_and_reserve(&self, account_id: &str) -> Admission {
        self.check_and_reserve_for(account_id, UNKNOWN_OPERATION).await
    }

    /// [`check_and_reserve`](Self::check_and_reserve), logging `operation`
    /// when the call is admitted
    pub async fn check_and_reserve_for(&self, account_id: &str, operation: &str) -> Admission {
        let now = self.clock.now();
        let (reservation, mode) = self.reserve(account_id, now.timestamp()).await;
        let status =
            RateStatus::from_entry(Some(reservation.entry), now.timestamp(), &self.config, mode);

        if reservation.allowed {
            self.history.record(
                account_id,
                RequestRecord {
                    timestamp: now,
                    operation: operation.to_string(),
                    count: status.used,
                },
            );
        }

        metrics::record_ledger_usage(status.used, status.total);

        if !reservation.allowed {
            metrics::record_ledger_refusal();
            warn!(
                account_id = %account_id,
                used = status.used,
                limit = status.total,
                reset_in = %status.time_until_reset,
                "Quota spent, refusing call locally"
            );
        } else if status.used == self.config.warning_threshold() {
            info!(
                account_id = %account_id,
                used = status.used,
                limit = status.total,
                "Quota usage reached warning threshold"
            );
        } else {
            debug!(account_id = %account_id, used = status.used, mode = ?mode, "Call admitted");
        }

        Admission {
            allowed: reservation.allowed,
            status,
        }
    }

    /// Snapshot without consuming quota
    pub async fn status(&self, account_id: &str) -> RateStatus {
        let now = self.clock.now_seconds();

        let (entry, mode) = match &self.durable {
            None => (self.local.snapshot(account_id), LedgerMode::Local),
            Some(store) => match with_timeout(store.load(account_id)).await {
                Ok(entry) => (entry, LedgerMode::Shared),
                Err(e) => {
                    self.degrade(store.name(), &e);
                    (self.local.snapshot(account_id), LedgerMode::Degraded)
                }
            },
        };

        RateStatus::from_entry(entry, now, &self.config, mode)
    }

    /// Admitted calls from the last window, newest first, at most `limit`
    pub fn recent_requests(&self, account_id: &str, limit: usize) -> Vec<RequestRecord> {
        let since = self.clock.now() - chrono::Duration::seconds(self.config.window_secs as i64);
        self.history.recent(account_id, since, limit)
    }

    /// Logged calls per operation over the last `hours`
    ///
    /// Only the newest [`REQUEST_LOG_CAPACITY`] calls are kept, so long
    /// lookbacks under heavy use undercount.
    pub fn request_stats(&self, account_id: &str, hours: u32) -> RequestStats {
        self.history.stats(account_id, self.clock.now(), hours)
    }

    /// Clear an account's window and request log
    pub async fn reset(&self, account_id: &str) {
        self.history.clear(account_id);
        self.local.store(
            account_id,
            LedgerEntry::open(self.clock.now_seconds(), self.config.window_secs),
        );

        if let Some(store) = &self.durable {
            if let Err(e) = with_timeout(store.clear(account_id)).await {
                self.degrade(store.name(), &e);
            }
        }

        info!(account_id = %account_id, "Quota window reset");
    }

    async fn reserve(&self, account_id: &str, now: i64) -> (Reservation, LedgerMode) {
        let LedgerConfig {
            quota, window_secs, ..
        } = self.config;

        if let Some(store) = &self.durable {
            match with_timeout(store.reserve(account_id, now, window_secs, quota)).await {
                Ok(reservation) => {
                    // Keep the fallback counter in step with the shared one
                    self.local.store(account_id, reservation.entry);
                    return (reservation, LedgerMode::Shared);
                }
                Err(e) => self.degrade(store.name(), &e),
            }
        }

        let reservation = self.local.reserve_now(account_id, now, window_secs, quota);
        let mode = if self.durable.is_some() {
            LedgerMode::Degraded
        } else {
            LedgerMode::Local
        };
        (reservation, mode)
    }

    fn degrade(&self, store: &'static str, err: &LedgerStoreError) {
        metrics::record_ledger_degraded();
        warn!(store, error = %err, "Shared ledger unavailable, using local counter");
    }
}

async fn with_timeout<T>(
    op: impl std::future::Future<Output = Result<T, LedgerStoreError>>,
) -> Result<T, LedgerStoreError> {
    match tokio::time::timeout(STORE_TIMEOUT, op).await {
        Ok(result) => result,
        Err(_) => Err(LedgerStoreError::Unavailable(format!(
            "no response within {}s",
            STORE_TIMEOUT.as_secs()
        ))),
    }
}
