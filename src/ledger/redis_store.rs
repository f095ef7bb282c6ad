//! Redis-backed ledger shared between processes and devices
//!
//! Each account is a hash `{start, count, window}` under `<prefix><account>`. The
//! reset-and-increment step runs as one Lua script, so concurrent reservers
//! never both take the last slot. Keys expire when their window ends.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::fmt;

use crate::ledger::store::{LedgerEntry, LedgerStore, LedgerStoreError, Reservation};

const DEFAULT_KEY_PREFIX: &str = "affiliate-ledger:";

const RESERVE_SCRIPT: &str = r"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local quota = tonumber(ARGV[3])
local start = tonumber(redis.call('HGET', KEYS[1], 'start'))
local count = tonumber(redis.call('HGET', KEYS[1], 'count'))
if start == nil or count == nil or now >= start + window then
  start = now
  count = 0
end
local allowed = 0
if count < quota then
  count = count + 1
  allowed = 1
end
redis.call('HSET', KEYS[1], 'start', start, 'count', count, 'window', window)
redis.call('EXPIREAT', KEYS[1], start + window)
return {allowed, start, count}
";

impl From<RedisError> for LedgerStoreError {
    fn from(err: RedisError) -> Self {
        LedgerStoreError::Unavailable(err.to_string())
    }
}

/// [`LedgerStore`] on Redis
#[derive(Clone)]
pub struct RedisLedgerStore {
    connection: ConnectionManager,
    key_prefix: String,
    reserve_script: Script,
}

impl fmt::Debug for RedisLedgerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLedgerStore")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisLedgerStore {
    /// Connect with the default key prefix
    ///
    /// # Errors
    /// Fails if the URL is invalid or the first connection cannot be made
    pub async fn connect(url: &str) -> Result<Self, LedgerStoreError> {
        Self::connect_with_prefix(url, DEFAULT_KEY_PREFIX).await
    }

    /// Connect with a custom key prefix
    ///
    /// # Errors
    /// Fails if the URL is invalid or the first connection cannot be made
    pub async fn connect_with_prefix(
        url: &str,
        key_prefix: impl Into<String>,
    ) -> Result<Self, LedgerStoreError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
            reserve_script: Script::new(RESERVE_SCRIPT),
        })
    }

    fn key(&self, account_id: &str) -> String {
        format!("{}{}", self.key_prefix, account_id)
    }
}

#[async_trait]
impl LedgerStore for RedisLedgerStore {
    async fn reserve(
        &self,
        account_id: &str,
        now: i64,
        window_duration_secs: u64,
        quota: u64,
    ) -> Result<Reservation, LedgerStoreError> {
        let mut conn = self.connection.clone();
        let (allowed, start, count): (i64, i64, i64) = self
            .reserve_script
            .key(self.key(account_id))
            .arg(now)
            .arg(window_duration_secs)
            .arg(quota)
            .invoke_async(&mut conn)
            .await?;

        Ok(Reservation {
            allowed: allowed == 1,
            entry: LedgerEntry {
                window_start: start,
                window_duration_secs,
                count: u64::try_from(count)
                    .map_err(|_| LedgerStoreError::Corrupt(format!("negative count {count}")))?,
            },
        })
    }

    async fn load(&self, account_id: &str) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        let mut conn = self.connection.clone();
        let key = self.key(account_id);

        let (start, count, window): (Option<i64>, Option<u64>, Option<u64>) =
            redis::cmd("HMGET")
                .arg(&key)
                .arg("start")
                .arg("count")
                .arg("window")
                .query_async(&mut conn)
                .await?;

        match (start, count, window) {
            (Some(window_start), Some(count), Some(window_duration_secs)) => Ok(Some(LedgerEntry {
                window_start,
                window_duration_secs,
                count,
            })),
            (None, None, None) => Ok(None),
            _ => Err(LedgerStoreError::Corrupt(format!(
                "incomplete ledger hash at {key}"
            ))),
        }
    }

    async fn clear(&self, account_id: &str) -> Result<(), LedgerStoreError> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.key(account_id)).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
