//! Per-session turn locks

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type SessionKey = (String, String);
type LockMap = HashMap<SessionKey, Arc<AsyncMutex<()>>>;

/// Async mutexes keyed by `(user_id, session_id)`
///
/// Entries are created on demand and dropped again once no turn holds or
/// waits for them.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<LockMap>>,
}

/// Held for the duration of one turn
pub struct SessionGuard {
    key: SessionKey,
    lock: Arc<AsyncMutex<()>>,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SessionLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other turn runs on the session, then claim it
    pub async fn acquire(&self, user_id: &str, session_id: &str) -> SessionGuard {
        let key = (user_id.to_string(), session_id.to_string());
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key.clone()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        SessionGuard {
            key,
            lock,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of sessions currently tracked
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}
