//! Shared cache of rendered responses, keyed per caller.
//!
//! A [`Snapshot`] is stored as JSON under `<namespace><owner>:<hash>`, where
//! `hash` digests the request target. Everything an owner has cached can be
//! dropped at once with the `<namespace><owner>:*` pattern.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use super::store::{RedisStore, RemoteStore, StoreError};
use crate::config::RemoteCacheConfig;
use crate::http::{Response, StatusCode};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("response cache is disabled")]
    Disabled,

    #[error("no cached response")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot encode or decode snapshot: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A captured response: exact body bytes, status, and headers grouped by name
/// in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
    pub status: u16,
    #[serde(with = "header_groups")]
    pub headers: Vec<(String, Vec<String>)>,
}

impl Snapshot {
    pub fn from_response(response: &Response) -> Self {
        Self {
            body: response.body_slice().to_vec(),
            status: response.status().as_u16(),
            headers: response.headers().grouped(),
        }
    }

    /// Rebuilds the response. `None` if the stored status is not one this
    /// server can emit.
    pub fn to_response(&self) -> Option<Response> {
        let status = StatusCode::from_u16(self.status)?;
        let mut response = Response::new(status);
        for (name, values) in &self.headers {
            for value in values {
                response.add_header(name.as_str(), value.as_str());
            }
        }
        Some(response.body_bytes(self.body.clone()))
    }
}

/// Handle to the remote response cache.
///
/// A handle is either connected or disabled. On a disabled handle writes fail
/// with [`CacheError::Disabled`] and reads miss, so callers can keep one code
/// path and treat every error as "no cache".
pub struct ResponseCache {
    store: RwLock<Option<Arc<dyn RemoteStore>>>,
    ttl: Duration,
    namespace: String,
}

impl ResponseCache {
    /// Connects to the Redis server named in `config`.
    pub async fn connect(config: &RemoteCacheConfig) -> Result<Self, CacheError> {
        let store = RedisStore::connect(config).await?;
        Ok(Self::with_store(Arc::new(store), config.ttl(), config.namespace.clone()))
    }

    /// Like [`connect`](Self::connect), but logs a failure and returns a
    /// disabled handle instead. A config with `enabled = false` is not dialled.
    pub async fn connect_or_disabled(config: &RemoteCacheConfig) -> Self {
        if !config.enabled {
            info!("response cache disabled by configuration");
            return Self::disabled();
        }
        match Self::connect(config).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(address = %config.address, error = %e, "response cache unavailable, continuing without it");
                Self::disabled()
            }
        }
    }

    pub fn with_store(store: Arc<dyn RemoteStore>, ttl: Duration, namespace: impl Into<String>) -> Self {
        Self {
            store: RwLock::new(Some(store)),
            ttl,
            namespace: namespace.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: RwLock::new(None),
            ttl: Duration::ZERO,
            namespace: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.read().is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key for `owner`'s response to `target` (path plus query).
    pub fn key(&self, owner: u32, target: &str) -> String {
        let digest = Sha256::digest(target.as_bytes());
        format!("{}{owner}:{}", self.namespace, URL_SAFE_NO_PAD.encode(digest))
    }

    /// Pattern matching every key of `owner`.
    pub fn owner_pattern(&self, owner: u32) -> String {
        format!("{}{owner}:*", escape_glob(&self.namespace))
    }

    /// Stores `snapshot` under `key` with the configured TTL. Last write wins.
    pub async fn set(&self, key: &str, snapshot: &Snapshot) -> Result<(), CacheError> {
        let store = self.store()?;
        let data = serde_json::to_vec(snapshot)?;
        store.set(key, data, self.ttl).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Snapshot, CacheError> {
        let store = match self.store() {
            Ok(store) => store,
            Err(_) => return Err(CacheError::NotFound),
        };
        let data = store.get(key).await?.ok_or(CacheError::NotFound)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Deletes every key matching `pattern` and returns how many went.
    pub async fn delete(&self, pattern: &str) -> Result<u64, CacheError> {
        Ok(self.store()?.delete_matching(pattern).await?)
    }

    /// Requests a background persistence flush.
    pub async fn save(&self) -> Result<(), CacheError> {
        Ok(self.store()?.flush_in_background().await?)
    }

    /// Flushes in the background and disconnects. Later calls are no-ops and
    /// the handle behaves as disabled afterwards.
    pub async fn close(&self) -> Result<(), CacheError> {
        let taken = self.store.write().take();
        let Some(store) = taken else {
            return Ok(());
        };
        store.flush_in_background().await?;
        info!("response cache closed");
        Ok(())
    }

    fn store(&self) -> Result<Arc<dyn RemoteStore>, CacheError> {
        self.store.read().clone().ok_or(CacheError::Disabled)
    }
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

mod body_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Headers as a JSON object of name to values, keeping name order.
mod header_groups {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::{Deserializer, Serializer};

    type Groups = Vec<(String, Vec<String>)>;

    pub fn serialize<S: Serializer>(groups: &Groups, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(groups.iter().map(|(name, values)| (name, values)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Groups, D::Error> {
        struct GroupsVisitor;

        impl<'de> Visitor<'de> for GroupsVisitor {
            type Value = Groups;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to value lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Groups, A::Error> {
                let mut groups = Groups::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, values)) = map.next_entry::<String, Vec<String>>()? {
                    groups.push((name, values));
                }
                Ok(groups)
            }
        }

        deserializer.deserialize_map(GroupsVisitor)
    }
}
