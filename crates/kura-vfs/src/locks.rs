//! Named per-directory locks.
//!
//! Every sidecar read-modify-write for a directory runs under that
//! directory's lock. Locks are keyed by `"{namespace}:{dir}"` in one
//! process-wide table so independent [`Root`](crate::Root) instances sharing
//! a tree key also share locks.
//!
//! The lock is not reentrant: never acquire a second lock for the same key
//! while holding one.

use std::future::Future;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

static LOCKS: LazyLock<DashMap<String, Arc<Mutex<()>>>> = LazyLock::new(DashMap::new);

/// Lock table scoped to one tree key.
#[derive(Debug, Clone)]
pub struct DirLocks {
    namespace: String,
}

impl DirLocks {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, dir: &str) -> String {
        format!("{}:{}", self.namespace, dir)
    }

    /// Acquire the lock for `dir`, waiting for any current holder.
    pub async fn lock(&self, dir: &str) -> DirGuard {
        let key = self.key(dir);
        let mutex = LOCKS
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        DirGuard {
            key,
            guard: Some(guard),
        }
    }

    /// Run `f` while holding the lock for `dir`.
    ///
    /// The lock is released when `f` completes, whether it succeeded or not.
    pub async fn with_lock<F, Fut, T>(&self, dir: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.lock(dir).await;
        f().await
    }
}

/// Held directory lock. Releasing it prunes the table entry when unused.
pub struct DirGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for DirGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirGuard").field("key", &self.key).finish()
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table itself holds a reference once nobody waits on it.
        LOCKS.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
