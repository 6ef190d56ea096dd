//! Batch scope over a mount.
//!
//! A [`Batch`] derefs to its [`Mount`], so every operation behaves exactly as
//! it would outside the batch: it hits the backend, updates metadata and
//! notifies on its own. Nested batches flatten into the outer scope.

use std::future::Future;
use std::ops::Deref;

use crate::mount::Mount;

/// Multi-operation scope. Provides no atomicity.
#[derive(Debug, Clone)]
pub struct Batch {
    mount: Mount,
    depth: usize,
}

impl Batch {
    pub(crate) fn new(mount: Mount, depth: usize) -> Self {
        Self { mount, depth }
    }

    /// Nesting level; the outermost batch is 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn mount(&self) -> &Mount {
        &self.mount
    }

    pub(crate) async fn run<F, Fut, T>(self, f: F) -> T
    where
        F: FnOnce(Batch) -> Fut,
        Fut: Future<Output = T>,
    {
        let depth = self.depth;
        let base = self.mount.base().to_string();
        tracing::debug!(base = %base, depth, "batch start");
        let out = f(self).await;
        tracing::debug!(base = %base, depth, "batch end");
        out
    }

    /// Re-enter with the same mount.
    pub async fn batch<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Batch) -> Fut,
        Fut: Future<Output = T>,
    {
        Batch::new(self.mount.clone(), self.depth + 1).run(f).await
    }
}

impl Deref for Batch {
    type Target = Mount;

    fn deref(&self) -> &Mount {
        &self.mount
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::RootConfig;
    use crate::mount::{MkdirOptions, WriteOptions};
    use crate::root::Root;
    use crate::vfs::{MemoryBackend, VfsResult};

    #[tokio::test]
    async fn test_batch_delegates_and_nests() {
        let root = Root::open(Arc::new(MemoryBackend::new()), RootConfig::new("batch-nest"))
            .await
            .unwrap();
        let fs = root.mount("/");

        let depth = fs
            .batch(|b| async move {
                b.mkdir("/d", MkdirOptions::default()).await?;
                b.batch(|inner| async move {
                    inner
                        .write_file("/d/f", b"x", WriteOptions::default())
                        .await?;
                    VfsResult::Ok(inner.depth())
                })
                .await
            })
            .await
            .unwrap();

        assert_eq!(depth, 2);
        assert_eq!(fs.read_file("/d/f").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_batch_failure_keeps_prior_effects() {
        let root = Root::open(Arc::new(MemoryBackend::new()), RootConfig::new("batch-partial"))
            .await
            .unwrap();
        let fs = root.mount("/");
        let events = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&events);
        let _handle = fs.watch("/", move |batch| {
            counter.fetch_add(batch.len(), Ordering::SeqCst);
        });

        let result = fs
            .batch(|b| async move {
                b.write_file("/one", b"1", WriteOptions::default()).await?;
                b.write_file("/missing/two", b"2", WriteOptions::default())
                    .await
            })
            .await;

        assert!(result.is_err());
        assert!(fs.exists("/one").await);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }
}
