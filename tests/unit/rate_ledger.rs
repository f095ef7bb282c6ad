//! Quota ledger: admission, window reset, shared and degraded modes

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use affiliate_reporting::clock::MockClock;
use affiliate_reporting::ledger::{
    InMemoryLedgerStore, LedgerConfig, LedgerEntry, LedgerMode, LedgerStore, LedgerStoreError,
    RateLedger, Reservation, REQUEST_LOG_CAPACITY,
};

use crate::support::{HangingStore, UnavailableStore};

const ACCOUNT: &str = "1234567890";
const T0: i64 = 1_704_067_200;

fn ledger_at(clock: &MockClock) -> RateLedger {
    RateLedger::new().with_clock(Arc::new(clock.clone()))
}

/// In-memory store that can be switched off
#[derive(Debug, Default)]
struct FlakyStore {
    inner: InMemoryLedgerStore,
    down: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), LedgerStoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(LedgerStoreError::Unavailable("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn reserve(
        &self,
        account_id: &str,
        now: i64,
        window_duration_secs: u64,
        quota: u64,
    ) -> Result<Reservation, LedgerStoreError> {
        self.check()?;
        self.inner
            .reserve(account_id, now, window_duration_secs, quota)
            .await
    }

    async fn load(&self, account_id: &str) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        self.check()?;
        self.inner.load(account_id).await
    }

    async fn clear(&self, account_id: &str) -> Result<(), LedgerStoreError> {
        self.check()?;
        self.inner.clear(account_id).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test]
async fn test_quota_refuses_the_2001st_call() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock);

    for _ in 0..2000 {
        assert!(ledger.check_and_reserve(ACCOUNT).await.allowed);
    }

    let refused = ledger.check_and_reserve(ACCOUNT).await;
    assert!(!refused.allowed);
    assert_eq!(refused.status.used, 2000);
    assert!(refused.status.exceeded);
    assert_eq!(refused.status.remaining, 0);

    // Refusals are not counted
    ledger.check_and_reserve(ACCOUNT).await;
    assert_eq!(ledger.status(ACCOUNT).await.used, 2000);
}

#[tokio::test]
async fn test_window_resets_after_an_hour() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock);

    for _ in 0..2000 {
        ledger.check_and_reserve(ACCOUNT).await;
    }
    assert!(!ledger.check_and_reserve(ACCOUNT).await.allowed);

    clock.advance(Duration::from_secs(3601));

    let admission = ledger.check_and_reserve(ACCOUNT).await;
    assert!(admission.allowed);
    assert_eq!(admission.status.used, 1);
    assert_eq!(admission.status.reset_time.timestamp(), T0 + 3601 + 3600);
}

#[tokio::test]
async fn test_window_boundary_is_exclusive() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock);
    ledger.check_and_reserve(ACCOUNT).await;

    clock.advance(Duration::from_secs(3599));
    assert_eq!(ledger.check_and_reserve(ACCOUNT).await.status.used, 2);

    clock.advance(Duration::from_secs(1));
    assert_eq!(ledger.check_and_reserve(ACCOUNT).await.status.used, 1);
}

#[tokio::test]
async fn test_accounts_are_independent() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock);

    ledger.check_and_reserve("a").await;
    ledger.check_and_reserve("a").await;
    ledger.check_and_reserve("b").await;

    assert_eq!(ledger.status("a").await.used, 2);
    assert_eq!(ledger.status("b").await.used, 1);
    assert_eq!(ledger.status("c").await.used, 0);
}

#[tokio::test]
async fn test_status_does_not_consume_quota() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock);

    for _ in 0..5 {
        ledger.status(ACCOUNT).await;
    }

    let status = ledger.status(ACCOUNT).await;
    assert_eq!(status.used, 0);
    assert_eq!(status.mode, LedgerMode::Local);
    assert_eq!(status.time_until_reset, "1 hour");
}

#[tokio::test]
async fn test_approaching_at_warning_threshold() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock);

    for _ in 0..1599 {
        ledger.check_and_reserve(ACCOUNT).await;
    }
    assert!(!ledger.status(ACCOUNT).await.approaching);

    let admission = ledger.check_and_reserve(ACCOUNT).await;
    assert!(admission.status.approaching);
    assert_eq!(admission.status.percentage, 80);
}

#[tokio::test]
async fn test_reset_clears_window() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock);

    for _ in 0..10 {
        ledger.check_and_reserve(ACCOUNT).await;
    }
    ledger.reset(ACCOUNT).await;

    assert_eq!(ledger.status(ACCOUNT).await.used, 0);
    assert_eq!(ledger.check_and_reserve(ACCOUNT).await.status.used, 1);
}

#[tokio::test]
async fn test_request_log_is_bounded_and_grouped_by_operation() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock);

    for _ in 0..REQUEST_LOG_CAPACITY {
        ledger.check_and_reserve_for(ACCOUNT, "conversionReport").await;
    }
    for _ in 0..5 {
        ledger.check_and_reserve_for(ACCOUNT, "clickReport").await;
    }
    ledger.check_and_reserve(ACCOUNT).await;

    let recent = ledger.recent_requests(ACCOUNT, usize::MAX);
    assert_eq!(recent.len(), REQUEST_LOG_CAPACITY);
    assert_eq!(recent[0].operation, "graphql");
    assert_eq!(recent[0].count, REQUEST_LOG_CAPACITY as u64 + 6);

    let stats = ledger.request_stats(ACCOUNT, 1);
    assert_eq!(stats.total, REQUEST_LOG_CAPACITY);
    assert_eq!(stats.by_operation["conversionReport"], REQUEST_LOG_CAPACITY - 6);
    assert_eq!(stats.by_operation["clickReport"], 5);
    assert_eq!(stats.by_operation["graphql"], 1);

    // Recent views cover one window; stats cover the requested hours
    clock.advance(Duration::from_secs(3601));
    assert!(ledger.recent_requests(ACCOUNT, 10).is_empty());
    assert_eq!(ledger.request_stats(ACCOUNT, 1).total, 0);
    assert_eq!(ledger.request_stats(ACCOUNT, 2).total, REQUEST_LOG_CAPACITY);

    ledger.reset(ACCOUNT).await;
    assert_eq!(ledger.request_stats(ACCOUNT, 24).total, 0);
}

#[tokio::test]
async fn test_refused_calls_are_not_logged() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock).with_config(LedgerConfig {
        quota: 2,
        ..LedgerConfig::default()
    });

    for _ in 0..4 {
        ledger.check_and_reserve_for(ACCOUNT, "conversionReport").await;
    }

    assert_eq!(ledger.recent_requests(ACCOUNT, 10).len(), 2);
    assert_eq!(ledger.request_stats("other", 1).total, 0);
}

#[tokio::test]
async fn test_concurrent_reservations_never_exceed_quota() {
    let ledger = Arc::new(RateLedger::new());

    let handles: Vec<_> = (0..2100)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.check_and_reserve(ACCOUNT).await.allowed })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }

    assert_eq!(admitted, 2000);
}

#[tokio::test]
async fn test_shared_store_is_seen_by_every_ledger() {
    let clock = MockClock::at_seconds(T0);
    let store: Arc<dyn LedgerStore> = Arc::new(InMemoryLedgerStore::new());
    let first = ledger_at(&clock).with_store(store.clone());
    let second = ledger_at(&clock).with_store(store);

    first.check_and_reserve(ACCOUNT).await;
    first.check_and_reserve(ACCOUNT).await;
    let admission = second.check_and_reserve(ACCOUNT).await;

    assert_eq!(admission.status.used, 3);
    assert_eq!(admission.status.mode, LedgerMode::Shared);
    assert_eq!(first.status(ACCOUNT).await.used, 3);
}

#[tokio::test]
async fn test_unavailable_store_degrades_to_local_counter() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock).with_store(Arc::new(UnavailableStore));

    let first = ledger.check_and_reserve(ACCOUNT).await;
    let second = ledger.check_and_reserve(ACCOUNT).await;

    assert!(first.allowed);
    assert_eq!(second.status.used, 2);
    assert_eq!(second.status.mode, LedgerMode::Degraded);

    let status = ledger.status(ACCOUNT).await;
    assert_eq!(status.used, 2);
    assert_eq!(status.mode, LedgerMode::Degraded);

    // Reset still clears the local side
    ledger.reset(ACCOUNT).await;
    assert_eq!(ledger.status(ACCOUNT).await.used, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_store_times_out() {
    let clock = MockClock::at_seconds(T0);
    let ledger = ledger_at(&clock).with_store(Arc::new(HangingStore));
    let started = tokio::time::Instant::now();

    let admission = ledger.check_and_reserve(ACCOUNT).await;

    assert!(admission.allowed);
    assert_eq!(admission.status.mode, LedgerMode::Degraded);
    assert!(started.elapsed() <= Duration::from_secs(3));
}

#[tokio::test]
async fn test_degraded_counter_continues_from_last_shared_count() {
    let clock = MockClock::at_seconds(T0);
    let store = Arc::new(FlakyStore::default());
    let ledger = ledger_at(&clock).with_store(store.clone());

    for _ in 0..5 {
        ledger.check_and_reserve(ACCOUNT).await;
    }

    store.down.store(true, Ordering::SeqCst);
    let degraded = ledger.check_and_reserve(ACCOUNT).await;
    assert_eq!(degraded.status.mode, LedgerMode::Degraded);
    assert_eq!(degraded.status.used, 6);

    store.down.store(false, Ordering::SeqCst);
    let recovered = ledger.check_and_reserve(ACCOUNT).await;
    assert_eq!(recovered.status.mode, LedgerMode::Shared);
    assert_eq!(recovered.status.used, 6);
}
