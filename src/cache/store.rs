//! Key/value backends for the response cache.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::RemoteCacheConfig;

/// Keys fetched per `SCAN` round trip during pattern deletes.
const SCAN_BATCH: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid store address {0:?}, expected host:port")]
    InvalidAddress(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A byte-oriented key/value store with expiry and glob deletes.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes `value`; a zero `ttl` stores it without expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Deletes every key matching the glob `pattern`, returning the count.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Asks the store to persist its data without waiting for it.
    async fn flush_in_background(&self) -> Result<(), StoreError>;
}

/// Splits `host:port`. Bracketed IPv6 hosts are accepted.
pub(crate) fn split_host_port(address: &str) -> Option<(String, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    let port = port.parse().ok()?;
    Some((host.to_owned(), port))
}

/// [`RemoteStore`] over a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connects and verifies the server answers `PING`.
    pub async fn connect(config: &RemoteCacheConfig) -> Result<Self, StoreError> {
        let (host, port) = split_host_port(&config.address)
            .ok_or_else(|| StoreError::InvalidAddress(config.address.clone()))?;
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: config.db,
                username: config.username.clone(),
                password: config.password.clone(),
                ..Default::default()
            },
        };
        let client = redis::Client::open(info)?;
        let conn = ConnectionManager::new(client).await?;
        let store = Self { conn };
        store.ping().await?;
        info!(address = %config.address, db = config.db, "connected to redis");
        Ok(store)
    }
}

/// PSETEX argument for a non-zero TTL. Redis rejects 0, so sub-millisecond
/// TTLs round up.
fn expire_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            conn.set::<_, _, ()>(key, value).await?;
        } else {
            conn.pset_ex::<_, _, ()>(key, value, expire_millis(ttl)).await?;
        }
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                deleted += conn.del::<_, u64>(&keys).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(pattern, deleted, "deleted matching keys");
        Ok(deleted)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn flush_in_background(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: redis::Value = redis::cmd("BGSAVE").query_async(&mut conn).await?;
        Ok(())
    }
}

/// In-process [`RemoteStore`] for tests and single-instance runs.
///
/// Can be switched offline to exercise degraded paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, (Vec<u8>, Option<Instant>)>,
    offline: AtomicBool,
    flushes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every operation fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of background flushes requested so far.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        let now = Instant::now();
        let live = self.entries.get(key).map(|entry| {
            let (value, expires_at) = entry.value();
            expires_at.is_none_or(|at| now <= at).then(|| value.clone())
        });
        match live {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries
                    .remove_if(key, |_, (_, at)| at.is_some_and(|at| now > at));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let expires_at = (!ttl.is_zero())
            .then(|| Instant::now().checked_add(ttl))
            .flatten();
        self.entries.insert(key.to_owned(), (value, expires_at));
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        self.check()?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !glob_match(pattern, key));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn flush_in_background(&self) -> Result<(), StoreError> {
        self.check()?;
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Redis-style glob with `*`, `?` and `\` escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi, ti));
                pi += 1;
                continue;
            }
            Some('?') => {
                pi += 1;
                ti += 1;
                continue;
            }
            Some('\\') if p.get(pi + 1) == Some(&t[ti]) => {
                pi += 2;
                ti += 1;
                continue;
            }
            Some(c) if *c != '\\' && *c == t[ti] => {
                pi += 1;
                ti += 1;
                continue;
            }
            _ => {}
        }
        match backtrack {
            Some((star, matched)) => {
                pi = star + 1;
                ti = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            None => return false,
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_addresses() {
        assert_eq!(split_host_port("cache:6379"), Some(("cache".into(), 6379)));
        assert_eq!(split_host_port("[::1]:6380"), Some(("::1".into(), 6380)));
        assert_eq!(split_host_port("cache"), None);
        assert_eq!(split_host_port(":6379"), None);
        assert_eq!(split_host_port("cache:port"), None);
    }

    #[test]
    fn glob_patterns() {
        assert!(glob_match("42:*", "42:abc"));
        assert!(glob_match("42:*", "42:"));
        assert!(!glob_match("42:*", "420:abc"));
        assert!(glob_match("ns:42:*", "ns:42:x"));
        assert!(glob_match("a?c", "abc"));
        assert!(glob_match("*b*", "abc"));
        assert!(!glob_match("a\\*", "ab"));
        assert!(glob_match("a\\*", "a*"));
    }

    #[test]
    fn sub_millisecond_ttl_rounds_up() {
        assert_eq!(expire_millis(Duration::from_micros(10)), 1);
        assert_eq!(expire_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(expire_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn unrepresentable_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("1:a", b"x".to_vec(), Duration::MAX).await.unwrap();
        assert_eq!(store.get("1:a").await.unwrap(), Some(b"x".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn rewritten_key_survives_expiry_of_old_value() {
        let store = MemoryStore::new();
        store.set("1:a", b"old".to_vec(), Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        store.set("1:a", b"new".to_vec(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.get("1:a").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.keys(), ["1:a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_expires_and_deletes() {
        let store = MemoryStore::new();
        store.set("1:a", b"x".to_vec(), Duration::from_secs(1)).await.unwrap();
        store.set("1:b", b"y".to_vec(), Duration::ZERO).await.unwrap();
        store.set("2:a", b"z".to_vec(), Duration::ZERO).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("1:a").await.unwrap(), None);
        assert_eq!(store.get("1:b").await.unwrap(), Some(b"y".to_vec()));

        assert_eq!(store.delete_matching("1:*").await.unwrap(), 1);
        assert_eq!(store.keys(), vec!["2:a".to_owned()]);
    }

    #[tokio::test]
    async fn offline_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_offline(true);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.get("k").await.is_err());
        store.set_offline(false);
        store.ping().await.unwrap();
    }
}
