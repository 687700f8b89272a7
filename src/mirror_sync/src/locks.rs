//! Per-entity sync locks.
//!
//! Non-blocking try-acquire: a second run of the same reconcile — whether from
//! the scheduler, a webhook or an operator button — observes `None` and
//! reports "already running" instead of queueing. The guard releases on drop,
//! including on panic and on the engine's error paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct SyncLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some(guard)` if this label was free, `None` if a run is in flight.
    pub fn try_acquire(&self, label: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self.inner.lock().expect("sync lock map poisoned");
            Arc::clone(
                map.entry(label.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_drop() {
        let locks = SyncLocks::new();
        let guard = locks.try_acquire("products").expect("first acquire");
        assert!(locks.try_acquire("products").is_none());
        // Another label is independent.
        assert!(locks.try_acquire("stores").is_some());
        drop(guard);
        assert!(locks.try_acquire("products").is_some());
    }
}
