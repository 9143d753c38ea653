//! Caching: an in-process TTL cache and a shared per-caller response cache.
//!
//! - [`local`]: numbered-table TTL cache and the [`CacheManager`] that owns them.
//! - [`store`]: the [`RemoteStore`] seam with Redis and in-memory backends.
//! - [`remote`]: [`ResponseCache`] and the [`Snapshot`] it stores.
//! - [`middleware`]: [`CacheMiddleware`], which serves and invalidates snapshots.

pub mod local;
pub mod middleware;
pub mod remote;
pub mod store;

pub use local::{CacheManager, LocalCache, LocalCacheError};
pub use middleware::{CACHE_HEADER, CacheMiddleware};
pub use remote::{CacheError, ResponseCache, Snapshot};
pub use store::{MemoryStore, RedisStore, RemoteStore, StoreError};
