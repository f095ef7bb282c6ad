//! Redis-backed ledger; needs a live server
//!
//! Run with `REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored`.

use std::sync::Arc;

use affiliate_reporting::ledger::{LedgerMode, LedgerStore, RateLedger, RedisLedgerStore};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn store(prefix: &str) -> RedisLedgerStore {
    RedisLedgerStore::connect_with_prefix(&redis_url(), format!("affiliate-ledger-test:{prefix}:"))
        .await
        .expect("redis should be reachable")
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_reserve_counts_and_refuses_at_quota() {
    let store = store("quota").await;
    store.clear("acct").await.unwrap();

    for expected in 1..=3 {
        let r = store.reserve("acct", 1_000, 3600, 3).await.unwrap();
        assert!(r.allowed);
        assert_eq!(r.entry.count, expected);
    }

    let refused = store.reserve("acct", 1_001, 3600, 3).await.unwrap();
    assert!(!refused.allowed);
    assert_eq!(refused.entry.count, 3);
    assert_eq!(refused.entry.window_start, 1_000);

    store.clear("acct").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_expired_window_restarts() {
    let store = store("expiry").await;
    store.clear("acct").await.unwrap();

    store.reserve("acct", 1_000, 3600, 2000).await.unwrap();
    store.reserve("acct", 1_000, 3600, 2000).await.unwrap();
    let fresh = store.reserve("acct", 4_600, 3600, 2000).await.unwrap();

    assert_eq!(fresh.entry.count, 1);
    assert_eq!(fresh.entry.window_start, 4_600);

    let loaded = store.load("acct").await.unwrap().unwrap();
    assert_eq!(loaded, fresh.entry);

    store.clear("acct").await.unwrap();
    assert!(store.load("acct").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn test_two_ledgers_share_one_window() {
    let shared = Arc::new(store("shared").await);
    shared.clear("acct").await.unwrap();

    let first = RateLedger::new().with_store(shared.clone());
    let second = RateLedger::new().with_store(shared.clone());

    first.check_and_reserve("acct").await;
    let admission = second.check_and_reserve("acct").await;

    assert_eq!(admission.status.used, 2);
    assert_eq!(admission.status.mode, LedgerMode::Shared);

    shared.clear("acct").await.unwrap();
}
