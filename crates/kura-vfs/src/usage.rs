//! Full usage recomputation.

use futures::future::{BoxFuture, FutureExt};

use kura_types::{EntryKind, SIDECAR_NAME, Usage, UsageDelta};

use crate::path;
use crate::vfs::{Backend, VfsResult};

/// Options for [`Root::usage`](crate::Root::usage).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageOptions {
    /// Ignore the cached counters and walk the whole tree.
    pub full: bool,
}

impl UsageOptions {
    /// Force a full walk.
    pub fn full() -> Self {
        Self { full: true }
    }
}

/// Walk the subtree below `dir`, counting real backend objects.
///
/// `dir` itself is not counted. Sidecars are skipped at every level and
/// file sizes come from the backend, not from metadata.
pub fn walk<'a>(backend: &'a dyn Backend, dir: &'a str) -> BoxFuture<'a, VfsResult<Usage>> {
    async move {
        let mut usage = Usage::default();
        for entry in backend.readdir(dir).await? {
            if entry.name == SIDECAR_NAME {
                continue;
            }
            let child = path::join(&[dir, &entry.name]);
            match entry.kind {
                EntryKind::File => {
                    let attr = backend.getattr(&child).await?;
                    usage.apply(UsageDelta::new_file(attr.size));
                }
                EntryKind::Directory => {
                    let below = walk(backend, &child).await?;
                    usage.apply(UsageDelta::new_directory() + UsageDelta::from(below));
                }
            }
        }
        Ok(usage)
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryBackend;

    #[tokio::test]
    async fn test_walk_counts_real_objects() {
        let backend = MemoryBackend::new();
        backend.write_all("a.txt", b"hello").await.unwrap();
        backend.mkdir("d").await.unwrap();
        backend.write_all("d/b.txt", b"world!").await.unwrap();
        backend.mkdir("d/e").await.unwrap();
        backend.write_all("d/.kura-meta.json", b"{}").await.unwrap();
        backend.write_all(".kura-meta.json", b"{}").await.unwrap();

        let usage = walk(&backend, "/").await.unwrap();
        assert_eq!(usage, Usage::new(11, 2, 2));

        let sub = walk(&backend, "/d").await.unwrap();
        assert_eq!(sub, Usage::new(6, 1, 1));
    }

    #[tokio::test]
    async fn test_walk_missing_dir() {
        let backend = MemoryBackend::new();
        assert!(walk(&backend, "/nope").await.unwrap_err().is_not_found());
    }
}
