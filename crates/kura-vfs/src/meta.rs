//! Sidecar metadata store.
//!
//! One [`DirRecord`] per directory, persisted as [`SIDECAR_NAME`] inside
//! that directory and always replaced wholesale. Every read-modify-write of
//! a record happens under the directory's [`DirLocks`] entry; see
//! [`MetaStore::update`].

use std::sync::Arc;

use kura_types::{DirRecord, SIDECAR_NAME, Usage, UsageDelta, UserMeta};

use crate::config::SidecarPolicy;
use crate::locks::{DirGuard, DirLocks};
use crate::path;
use crate::vfs::{Backend, VfsError, VfsResult};

/// Reads and writes sidecar records for one tree.
#[derive(Clone)]
pub struct MetaStore {
    backend: Arc<dyn Backend>,
    locks: DirLocks,
    policy: SidecarPolicy,
    max_meta_bytes: usize,
}

impl MetaStore {
    pub fn new(
        backend: Arc<dyn Backend>,
        locks: DirLocks,
        policy: SidecarPolicy,
        max_meta_bytes: usize,
    ) -> Self {
        Self {
            backend,
            locks,
            policy,
            max_meta_bytes,
        }
    }

    /// Path of the sidecar for `dir`.
    pub fn sidecar_path(dir: &str) -> String {
        path::join(&[dir, SIDECAR_NAME])
    }

    /// Record used for a directory without a (valid) sidecar.
    pub fn default_record() -> DirRecord {
        DirRecord::default()
    }

    pub fn policy(&self) -> SidecarPolicy {
        self.policy
    }

    pub fn max_meta_bytes(&self) -> usize {
        self.max_meta_bytes
    }

    /// Read the record for `dir` under the configured policy.
    ///
    /// A missing sidecar yields the default record.
    pub async fn read(&self, dir: &str) -> VfsResult<DirRecord> {
        self.read_with(dir, self.policy).await
    }

    /// Read the record for `dir`, treating corruption as absence.
    pub async fn read_lenient(&self, dir: &str) -> VfsResult<DirRecord> {
        self.read_with(dir, SidecarPolicy::Lenient).await
    }

    async fn read_with(&self, dir: &str, policy: SidecarPolicy) -> VfsResult<DirRecord> {
        let sidecar = Self::sidecar_path(dir);
        let bytes = match self.backend.read_all(&sidecar).await {
            Ok(bytes) => bytes,
            Err(VfsError::NotFound(_)) => return Ok(Self::default_record()),
            Err(e) => return Err(e),
        };

        match serde_json::from_slice::<DirRecord>(&bytes) {
            Ok(record) => Ok(record),
            Err(e) => match policy {
                SidecarPolicy::Lenient => {
                    tracing::warn!(dir = %dir, error = %e, "discarding corrupt sidecar record");
                    Ok(Self::default_record())
                }
                SidecarPolicy::Strict => Err(VfsError::CorruptMetadata {
                    path: sidecar,
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// Persist `record` as the sidecar of `dir`.
    pub async fn write(&self, dir: &str, record: &DirRecord) -> VfsResult<()> {
        let bytes = serde_json::to_vec(record)?;
        self.backend
            .write_all(&Self::sidecar_path(dir), &bytes)
            .await
    }

    /// Acquire the lock for `dir`.
    pub async fn lock(&self, dir: &str) -> DirGuard {
        self.locks.lock(dir).await
    }

    /// Read-modify-write the record of `dir` under its lock.
    ///
    /// If `f` fails nothing is written.
    pub async fn update<T, F>(&self, dir: &str, f: F) -> VfsResult<T>
    where
        F: FnOnce(&mut DirRecord) -> VfsResult<T> + Send,
        T: Send,
    {
        let _guard = self.lock(dir).await;
        let mut record = self.read(dir).await?;
        let out = f(&mut record)?;
        self.write(dir, &record).await?;
        Ok(out)
    }

    /// Write the default record for `dir` if it has none. Returns true if a
    /// record was created.
    pub async fn ensure(&self, dir: &str) -> VfsResult<bool> {
        let _guard = self.lock(dir).await;
        if self.backend.exists(&Self::sidecar_path(dir)).await {
            return Ok(false);
        }
        self.write(dir, &Self::default_record()).await?;
        Ok(true)
    }

    /// Fail if the serialized `meta` for `path` is over the size cap.
    pub fn validate_size(&self, path: &str, meta: &UserMeta) -> VfsResult<()> {
        let size = serde_json::to_vec(meta)?.len();
        if size > self.max_meta_bytes {
            return Err(VfsError::MetadataSizeExceeded {
                path: path.to_string(),
                size,
                limit: self.max_meta_bytes,
            });
        }
        Ok(())
    }

    /// Apply `delta` to the cached usage on the tree root's record.
    ///
    /// Takes the `/` lock; callers must not already hold it.
    pub async fn apply_usage_delta(&self, delta: UsageDelta) -> VfsResult<()> {
        if delta.is_zero() {
            return Ok(());
        }
        let usage = self
            .update("/", |record| {
                let mut usage = record.usage.unwrap_or_default();
                usage.apply(delta);
                record.usage = Some(usage);
                Ok(usage)
            })
            .await?;
        tracing::trace!(?delta, ?usage, "usage updated");
        Ok(())
    }

    /// Replace the cached usage on the tree root's record.
    pub async fn store_usage(&self, usage: Usage) -> VfsResult<()> {
        self.update("/", |record| {
            record.usage = Some(usage);
            Ok(())
        })
        .await
    }

    /// Cached usage, if the root record has any.
    pub async fn cached_usage(&self) -> VfsResult<Option<Usage>> {
        Ok(self.read("/").await?.usage)
    }
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore")
            .field("locks", &self.locks)
            .field("policy", &self.policy)
            .field("max_meta_bytes", &self.max_meta_bytes)
            .finish_non_exhaustive()
    }
}
