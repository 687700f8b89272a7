//! Cache primitives — the three tiers and nothing more.
//!
//! - [`TtlCache`]: keyed map with per-entry expiry, for list-shaped lookups
//!   (stores by department, write-off accounts, measure units).
//! - [`IdSet`]: arc-swap snapshot of a chat-id set (admins, receivers) —
//!   lock-free reads, atomic refresh after each reload.
//! - [`SharedCache`]: string/JSON cache that lives in process memory by
//!   default and transparently moves to redis when a backend URL is
//!   configured, so horizontally scaled replicas see the same values. Redis
//!   failures degrade to a miss (reads) or a no-op (writes), never an error.
//!
//! Workflow-scoped state is *not* a cache tier; it lives in FSM storage.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// 10 minutes — list-shaped reference lookups.
pub const TTL_LISTS: Duration = Duration::from_secs(10 * 60);
/// 30 minutes — measure units, practically static.
pub const TTL_UNITS: Duration = Duration::from_secs(30 * 60);
/// 5 minutes — the permissions matrix.
pub const TTL_PERMISSIONS: Duration = Duration::from_secs(5 * 60);

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// In-process TTL cache. Values are cloned out.
pub struct TtlCache<K, V> {
    inner: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: std::hash::Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut map = self.inner.lock().expect("ttl cache poisoned");
        if let Some(entry) = map.get(key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        map.remove(key);
        None
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let mut map = self.inner.lock().expect("ttl cache poisoned");
        map.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.lock().expect("ttl cache poisoned").remove(key);
    }

    pub fn clear(&self) {
        self.inner.lock().expect("ttl cache poisoned").clear();
    }
}

/// Lock-free snapshot of a chat-id set. Readers pay one atomic load;
/// a reload swaps the whole set.
#[derive(Default)]
pub struct IdSet {
    inner: ArcSwap<HashSet<i64>>,
}

impl IdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.inner.load().contains(&id)
    }

    pub fn replace(&self, ids: impl IntoIterator<Item = i64>) {
        self.inner.store(Arc::new(ids.into_iter().collect()));
    }

    pub fn snapshot(&self) -> Vec<i64> {
        self.inner.load().iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }
}

enum Backend {
    Memory(TtlCache<String, String>),
    Redis { client: redis::Client, prefix: String },
}

/// Session-lifetime / TTL cache that follows the deployment: in-process by
/// default, redis-backed when configured. Keys, TTLs and invalidation rules
/// are identical either way.
pub struct SharedCache {
    backend: Backend,
}

impl SharedCache {
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(TtlCache::new()),
        }
    }

    pub fn redis(url: &str, prefix: &str) -> Result<Self, crate::error::MirrorError> {
        let client = redis::Client::open(url)
            .map_err(|e| crate::error::MirrorError::Config(format!("bad redis url: {e}")))?;
        Ok(Self {
            backend: Backend::Redis {
                client,
                prefix: prefix.to_string(),
            },
        })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match &self.backend {
            Backend::Memory(cache) => cache.get(&key.to_string()),
            Backend::Redis { client, prefix } => {
                let full = format!("{prefix}:{key}");
                match client.get_multiplexed_async_connection().await {
                    Ok(mut conn) => {
                        match redis::AsyncCommands::get::<_, Option<String>>(&mut conn, &full).await
                        {
                            Ok(v) => v,
                            Err(e) => {
                                warn!(key, "redis get failed, serving miss: {e}");
                                None
                            }
                        }
                    }
                    Err(e) => {
                        warn!(key, "redis connect failed, serving miss: {e}");
                        None
                    }
                }
            }
        };
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        match &self.backend {
            Backend::Memory(cache) => cache.insert(key.to_string(), raw, ttl),
            Backend::Redis { client, prefix } => {
                let full = format!("{prefix}:{key}");
                match client.get_multiplexed_async_connection().await {
                    Ok(mut conn) => {
                        if let Err(e) = redis::AsyncCommands::set_ex::<_, _, ()>(
                            &mut conn,
                            &full,
                            raw,
                            ttl.as_secs(),
                        )
                        .await
                        {
                            warn!(key, "redis set failed, value not shared: {e}");
                        }
                    }
                    Err(e) => warn!(key, "redis connect failed, value not shared: {e}"),
                }
            }
        }
    }

    pub async fn invalidate(&self, key: &str) {
        match &self.backend {
            Backend::Memory(cache) => cache.invalidate(&key.to_string()),
            Backend::Redis { client, prefix } => {
                let full = format!("{prefix}:{key}");
                match client.get_multiplexed_async_connection().await {
                    Ok(mut conn) => {
                        if let Err(e) =
                            redis::AsyncCommands::del::<_, ()>(&mut conn, &full).await
                        {
                            warn!(key, "redis del failed: {e}");
                        }
                    }
                    Err(e) => warn!(key, "redis connect failed on invalidate: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_cache_roundtrip_and_expiry() {
        let cache: TtlCache<String, i32> = TtlCache::new();
        cache.insert("a".into(), 1, Duration::from_secs(60));
        assert_eq!(cache.get(&"a".into()), Some(1));

        cache.insert("b".into(), 2, Duration::from_secs(0));
        assert_eq!(cache.get(&"b".into()), None, "zero-ttl entry must expire");

        cache.invalidate(&"a".into());
        assert_eq!(cache.get(&"a".into()), None);
    }

    #[test]
    fn id_set_swaps_atomically() {
        let set = IdSet::new();
        assert!(!set.contains(7));
        set.replace([7, 8]);
        assert!(set.contains(7));
        set.replace([9]);
        assert!(!set.contains(7));
        assert!(set.contains(9));
    }

    #[tokio::test]
    async fn shared_cache_memory_json_roundtrip() {
        let cache = SharedCache::in_memory();
        cache
            .set_json("k", &vec![1u8, 2, 3], Duration::from_secs(60))
            .await;
        let got: Option<Vec<u8>> = cache.get_json("k").await;
        assert_eq!(got, Some(vec![1, 2, 3]));

        cache.invalidate("k").await;
        let gone: Option<Vec<u8>> = cache.get_json("k").await;
        assert_eq!(gone, None);
    }
}
