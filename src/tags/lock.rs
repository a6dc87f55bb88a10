//! Per-application serialization and cooperative cancellation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async mutex per application key.
///
/// Transitions on the same application run one at a time within this
/// process; different applications never contend. Serialization across
/// processes still needs an external mechanism such as a CI concurrency group.
/// An entry lives only while some task holds or waits for its lock.
#[derive(Debug, Default)]
pub struct AppLocks {
    locks: LockMap,
}

impl AppLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `application_key`.
    pub async fn acquire(&self, application_key: &str) -> AppLockGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(application_key.to_string())
                .or_default()
                .clone()
        };
        AppLockGuard {
            application_key: application_key.to_string(),
            locks: self.locks.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of applications with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one application; released on drop.
#[derive(Debug)]
pub struct AppLockGuard {
    application_key: String,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AppLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters clone the mutex under the map lock, so a count of one means
        // the map holds the only reference.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.application_key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.application_key);
        }
    }
}

/// Cancellation request checked only between top-level operations.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    requested: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
