//! Bounded per-account log of admitted calls

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

/// Records kept per account; older entries are dropped first
pub const REQUEST_LOG_CAPACITY: usize = 100;

/// One admitted call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    /// When the call was admitted
    pub timestamp: DateTime<Utc>,
    /// GraphQL root field, or `graphql` when unknown
    pub operation: String,
    /// Window count after this call was counted
    pub count: u64,
}

/// Call counts over a lookback period
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    /// Start of the lookback period
    pub since: DateTime<Utc>,
    /// Logged calls in the period
    pub total: usize,
    /// Logged calls per operation
    pub by_operation: BTreeMap<String, usize>,
}

/// In-process request log
#[derive(Debug, Default)]
pub struct RequestLog {
    records: Mutex<HashMap<String, VecDeque<RequestRecord>>>,
}

impl RequestLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record, evicting the oldest past [`REQUEST_LOG_CAPACITY`]
    pub fn record(&self, account_id: &str, record: RequestRecord) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let log = records.entry(account_id.to_string()).or_default();
        if log.len() == REQUEST_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(record);
    }

    /// Records at or after `since`, newest first, at most `limit`
    pub fn recent(&self, account_id: &str, since: DateTime<Utc>, limit: usize) -> Vec<RequestRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .get(account_id)
            .map(|log| {
                log.iter()
                    .rev()
                    .take_while(|r| r.timestamp >= since)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Counts per operation for records in the last `hours` before `now`
    pub fn stats(&self, account_id: &str, now: DateTime<Utc>, hours: u32) -> RequestStats {
        let since = now - Duration::hours(i64::from(hours));
        let mut by_operation: BTreeMap<String, usize> = BTreeMap::new();

        for record in self.recent(account_id, since, REQUEST_LOG_CAPACITY) {
            *by_operation.entry(record.operation).or_default() += 1;
        }

        RequestStats {
            since,
            total: by_operation.values().sum(),
            by_operation,
        }
    }

    /// Forget an account's records
    pub fn clear(&self, account_id: &str) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(account_id);
    }
}
