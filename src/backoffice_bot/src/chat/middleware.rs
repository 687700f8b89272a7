//! Dispatch gates: permissions, navigation reset, cooldown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

/// Verdict of the permission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Short user-facing denial notice.
    Deny(String),
}

/// The permission gate is application policy (spreadsheet matrix, admin
/// bypass, receiver prefixes), so the router only sees this trait.
#[async_trait]
pub trait Gatekeeper: Send + Sync {
    async fn allow_text(&self, user_id: i64, text: &str) -> Decision;
    async fn allow_callback(&self, user_id: i64, data: &str) -> Decision;
}

/// Default cooldowns per action class.
pub fn default_cooldown(action: &str) -> Duration {
    match action {
        a if a.starts_with("sync") => Duration::from_secs(10),
        "writeoff_send" => Duration::from_secs(5),
        a if a.starts_with("search") => Duration::from_secs(1),
        a if a.starts_with("admin") => Duration::from_secs(3),
        _ => Duration::from_millis(300), // navigation
    }
}

const CLEANUP_EVERY: u32 = 100;
const MAX_COOLDOWN: Duration = Duration::from_secs(60);

/// `(user, action) → last-seen` ledger. Monotonic clock; stale entries are
/// swept every 100 checks.
#[derive(Default)]
pub struct CooldownLedger {
    inner: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    seen: HashMap<(i64, String), Instant>,
    calls: u32,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` — action allowed (and recorded); `false` — still cooling down.
    pub fn check(&self, user_id: i64, action: &str, period: Duration) -> bool {
        let mut state = self.inner.lock().expect("cooldown ledger poisoned");
        state.calls += 1;
        if state.calls >= CLEANUP_EVERY {
            let now = Instant::now();
            state.seen.retain(|_, last| now.duration_since(*last) <= MAX_COOLDOWN);
            state.calls = 0;
        }

        let key = (user_id, action.to_string());
        let now = Instant::now();
        if let Some(last) = state.seen.get(&key) {
            if now.duration_since(*last) < period {
                debug!(user_id, action, "cooldown blocked");
                return false;
            }
        }
        state.seen.insert(key, now);
        true
    }

    pub fn reset(&self, user_id: i64, action: &str) {
        self.inner
            .lock()
            .expect("cooldown ledger poisoned")
            .seen
            .remove(&(user_id, action.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_blocks_until_period_elapses() {
        let ledger = CooldownLedger::new();
        assert!(ledger.check(1, "sync", Duration::from_secs(10)));
        assert!(!ledger.check(1, "sync", Duration::from_secs(10)));
        // Different user and different action are independent.
        assert!(ledger.check(2, "sync", Duration::from_secs(10)));
        assert!(ledger.check(1, "search", Duration::from_secs(1)));
        // Reset clears the slot.
        ledger.reset(1, "sync");
        assert!(ledger.check(1, "sync", Duration::from_secs(10)));
    }

    #[test]
    fn zero_period_never_blocks() {
        let ledger = CooldownLedger::new();
        assert!(ledger.check(1, "x", Duration::ZERO));
        assert!(ledger.check(1, "x", Duration::ZERO));
    }

    #[test]
    fn default_cooldowns_by_class() {
        assert_eq!(default_cooldown("sync_products"), Duration::from_secs(10));
        assert_eq!(default_cooldown("writeoff_send"), Duration::from_secs(5));
        assert_eq!(default_cooldown("search_items"), Duration::from_secs(1));
        assert_eq!(default_cooldown("admin_approve"), Duration::from_secs(3));
        assert_eq!(default_cooldown("nav"), Duration::from_millis(300));
    }
}
