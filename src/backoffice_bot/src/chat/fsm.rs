//! Durable FSM storage.
//!
//! A write-off can sit half-authored for minutes while the author walks to
//! the stockroom, and approval involves other people entirely — so session
//! state must survive restarts. With a shared cache backend configured the
//! state lives there (and scaled replicas see it); otherwise it stays in
//! process memory.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use mirror_sync::cache::SharedCache;

/// The single-window message record. Every FSM session tracks at most one
/// menu, one running header and one replaceable prompt; transitions mutate
/// these ids instead of posting new messages.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackedMessages {
    pub menu_msg_id: Option<i64>,
    pub header_msg_id: Option<i64>,
    pub prompt_msg_id: Option<i64>,
}

impl TrackedMessages {
    pub fn all(&self) -> impl Iterator<Item = i64> {
        [self.menu_msg_id, self.header_msg_id, self.prompt_msg_id]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Current FSM state name, `None` when idle.
    pub state: Option<String>,
    /// Workflow-scoped scratch data.
    pub data: serde_json::Map<String, Value>,
    pub tracked: TrackedMessages,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.to_string(), v);
        }
    }

    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[async_trait]
pub trait FsmStorage: Send + Sync {
    async fn load(&self, user_id: i64) -> SessionState;
    async fn save(&self, user_id: i64, state: &SessionState);
    async fn clear(&self, user_id: i64);
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<HashMap<i64, SessionState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FsmStorage for MemoryStorage {
    async fn load(&self, user_id: i64) -> SessionState {
        self.inner
            .lock()
            .expect("fsm storage poisoned")
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn save(&self, user_id: i64, state: &SessionState) {
        self.inner
            .lock()
            .expect("fsm storage poisoned")
            .insert(user_id, state.clone());
    }

    async fn clear(&self, user_id: i64) {
        self.inner
            .lock()
            .expect("fsm storage poisoned")
            .remove(&user_id);
    }
}

/// FSM state in the shared cache backend. Sessions older than two days are
/// abandoned anyway, so they expire rather than accumulate.
pub struct SharedStorage {
    cache: SharedCache,
}

const SESSION_TTL: Duration = Duration::from_secs(48 * 3600);

impl SharedStorage {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache }
    }

    fn key(user_id: i64) -> String {
        format!("fsm:{user_id}")
    }
}

#[async_trait]
impl FsmStorage for SharedStorage {
    async fn load(&self, user_id: i64) -> SessionState {
        self.cache
            .get_json(&Self::key(user_id))
            .await
            .unwrap_or_default()
    }

    async fn save(&self, user_id: i64, state: &SessionState) {
        self.cache
            .set_json(&Self::key(user_id), state, SESSION_TTL)
            .await;
    }

    async fn clear(&self, user_id: i64) {
        self.cache.invalidate(&Self::key(user_id)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(!storage.load(1).await.is_active());

        let mut state = SessionState::default();
        state.state = Some("writeoff:quantity".into());
        state.set("store_id", &"abc");
        state.tracked.prompt_msg_id = Some(42);
        storage.save(1, &state).await;

        let loaded = storage.load(1).await;
        assert_eq!(loaded.state.as_deref(), Some("writeoff:quantity"));
        assert_eq!(loaded.get::<String>("store_id").as_deref(), Some("abc"));
        assert_eq!(loaded.tracked.prompt_msg_id, Some(42));

        storage.clear(1).await;
        assert!(!storage.load(1).await.is_active());
    }
}
