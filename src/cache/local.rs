//! In-process TTL cache with numbered tables.
//!
//! A [`LocalCache`] owns a set of tables, each a concurrent map. Tables are
//! declared up front or added later with [`LocalCache::add_table`]; touching a
//! table that was never declared is a programming error reported as
//! [`LocalCacheError::UnknownTable`]. Expired entries are dropped lazily on
//! read, or in bulk by [`LocalCache::purge_expired`].
//!
//! Caches are created through a [`CacheManager`], which keeps a handle to each
//! one for introspection and shutdown.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::LocalCacheConfig;

pub type TableId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocalCacheError {
    #[error("cache {cache:?} has no table {table}")]
    UnknownTable { cache: String, table: TableId },
}

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    // None never expires.
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

type Table<K, V> = Arc<DashMap<K, Entry<V>>>;

/// A named TTL cache. A TTL of zero means entries never expire.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trustgate::cache::local::CacheManager;
///
/// let manager = CacheManager::new();
/// let meters = manager.create_cache::<u64, String>("meters", Duration::from_secs(60), [1, 2]);
/// meters.put(1, 7, "kitchen".to_owned()).unwrap();
/// assert_eq!(meters.get(1, &7).unwrap().as_deref(), Some("kitchen"));
/// assert!(meters.get(3, &7).is_err());
/// ```
pub struct LocalCache<K, V> {
    name: String,
    ttl: Duration,
    tables: RwLock<HashMap<TableId, Table<K, V>>>,
}

impl<K, V> LocalCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(name: impl Into<String>, ttl: Duration, tables: impl IntoIterator<Item = TableId>) -> Self {
        let tables = tables
            .into_iter()
            .map(|id| (id, Arc::new(DashMap::new())))
            .collect();
        Self {
            name: name.into(),
            ttl,
            tables: RwLock::new(tables),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Declares a table. Declaring an existing table is a no-op.
    pub fn add_table(&self, id: TableId) {
        if self.tables.read().contains_key(&id) {
            return;
        }
        self.tables
            .write()
            .entry(id)
            .or_insert_with(|| Arc::new(DashMap::new()));
    }

    pub fn has_table(&self, id: TableId) -> bool {
        self.tables.read().contains_key(&id)
    }

    /// Stores `value`, replacing any previous value for `key`.
    pub fn put(&self, table: TableId, key: K, value: V) -> Result<(), LocalCacheError> {
        // A TTL too large to represent never expires.
        let expires_at = (!self.ttl.is_zero())
            .then(|| Instant::now().checked_add(self.ttl))
            .flatten();
        self.table(table)?.insert(key, Entry { value, expires_at });
        Ok(())
    }

    /// Returns the live value for `key`, or `None` if missing or expired.
    pub fn get<Q>(&self, table: TableId, key: &Q) -> Result<Option<V>, LocalCacheError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let table = self.table(table)?;
        let now = Instant::now();
        let lookup = table
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));
        match lookup {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                table.remove_if(key, |_, entry| entry.is_expired(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Removes `key`, returning its value if it was still live.
    pub fn remove<Q>(&self, table: TableId, key: &Q) -> Result<Option<V>, LocalCacheError>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = Instant::now();
        Ok(self
            .table(table)?
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value))
    }

    /// Drops every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.tables
            .read()
            .values()
            .map(|table| {
                let before = table.len();
                table.retain(|_, entry| !entry.is_expired(now));
                before.saturating_sub(table.len())
            })
            .sum()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.tables.read().values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Empties every table. Tables stay declared.
    pub fn clear(&self) {
        for table in self.tables.read().values() {
            table.clear();
        }
    }

    fn table(&self, id: TableId) -> Result<Table<K, V>, LocalCacheError> {
        self.tables
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| LocalCacheError::UnknownTable {
                cache: self.name.clone(),
                table: id,
            })
    }
}

/// Point-in-time size of one managed cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub name: String,
    pub tables: usize,
    pub entries: usize,
}

/// Type-erased view of a [`LocalCache`] held by the [`CacheManager`].
pub trait ManagedCache: Send + Sync {
    fn stats(&self) -> CacheStats;
    fn clear(&self);
    fn purge_expired(&self) -> usize;
}

impl<K, V> ManagedCache for LocalCache<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.clone(),
            tables: self.tables.read().len(),
            entries: self.len(),
        }
    }

    fn clear(&self) {
        LocalCache::clear(self);
    }

    fn purge_expired(&self) -> usize {
        LocalCache::purge_expired(self)
    }
}

/// Creates local caches and keeps track of them.
///
/// The registry only grows; dropping a cache handle elsewhere does not remove
/// it from the manager.
pub struct CacheManager {
    caches: Mutex<Vec<Arc<dyn ManagedCache>>>,
    default_ttl: Duration,
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::from_config(&LocalCacheConfig::default())
    }
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager whose [`create_default_cache`](Self::create_default_cache)
    /// uses the configured TTL.
    pub fn from_config(config: &LocalCacheConfig) -> Self {
        Self {
            caches: Mutex::new(Vec::new()),
            default_ttl: config.default_ttl(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Creates a cache with the manager's default TTL.
    pub fn create_default_cache<K, V>(
        &self,
        name: impl Into<String>,
        tables: impl IntoIterator<Item = TableId>,
    ) -> Arc<LocalCache<K, V>>
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.create_cache(name, self.default_ttl, tables)
    }

    /// Creates a cache with the given tables and registers it.
    pub fn create_cache<K, V>(
        &self,
        name: impl Into<String>,
        ttl: Duration,
        tables: impl IntoIterator<Item = TableId>,
    ) -> Arc<LocalCache<K, V>>
    where
        K: Eq + Hash + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let cache = Arc::new(LocalCache::new(name, ttl, tables));
        tracing::debug!(cache = cache.name(), ttl_ms = ttl.as_millis() as u64, "local cache created");
        self.caches.lock().push(cache.clone());
        cache
    }

    pub fn stats(&self) -> Vec<CacheStats> {
        self.caches.lock().iter().map(|c| c.stats()).collect()
    }

    pub fn purge_expired(&self) -> usize {
        self.caches.lock().iter().map(|c| c.purge_expired()).sum()
    }

    pub fn clear_all(&self) {
        for cache in self.caches.lock().iter() {
            cache.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.caches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.lock().is_empty()
    }
}
