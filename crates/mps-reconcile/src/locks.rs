//! Per-entity async locks.
//!
//! Holders of the same key are serialized; different keys never contend.
//! Entries are dropped once no guard or waiter references them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = match self.locks.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
            return existing;
        }
        map.retain(|_, w| w.strong_count() > 0);
        let fresh = Arc::new(AsyncMutex::new(()));
        map.insert(key.to_string(), Arc::downgrade(&fresh));
        fresh
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }

    /// Keys with a live holder or waiter.
    pub fn active(&self) -> usize {
        let map = match self.locks.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.values().filter(|w| w.strong_count() > 0).count()
    }
}
