//! Backend operations trait.
//!
//! A backend is the raw hierarchical store kura is layered on. It knows
//! nothing about permissions, sidecar records, usage or notifications.
//! Paths are `/`-separated and relative to the backend's root; a leading
//! `/` is accepted and ignored.

use async_trait::async_trait;

use super::types::{BackendAttr, BackendEntry};
use super::VfsResult;

/// Core backend operations.
#[async_trait]
pub trait Backend: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get object attributes.
    async fn getattr(&self, path: &str) -> VfsResult<BackendAttr>;

    /// List direct children of a directory, sorted by name.
    async fn readdir(&self, path: &str) -> VfsResult<Vec<BackendEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &str, offset: u64, size: usize) -> VfsResult<Vec<u8>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create or replace a file with `data`. The parent must exist.
    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()>;

    /// Open a sequential write handle. The file is replaced on close.
    async fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteHandle>>;

    /// Create a single directory.
    ///
    /// Fails with AlreadyExists if anything is at `path`, NotFound if the
    /// parent is missing.
    async fn mkdir(&self, path: &str) -> VfsResult<()>;

    /// Remove a file or directory.
    ///
    /// A non-empty directory is only removed when `recursive` is set.
    async fn remove(&self, path: &str, recursive: bool) -> VfsResult<()>;

    /// Remove every child of the backend root, keeping the root itself.
    async fn clear(&self) -> VfsResult<()>;

    /// Remove the backend root.
    async fn destroy(&self) -> VfsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Check if a path is a regular file.
    async fn is_file(&self, path: &str) -> bool {
        matches!(self.getattr(path).await, Ok(attr) if attr.is_file())
    }

    /// Check if a path is a directory.
    async fn is_dir(&self, path: &str) -> bool {
        matches!(self.getattr(path).await, Ok(attr) if attr.is_dir())
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &str) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        if attr.is_dir() {
            return Err(super::VfsError::is_a_directory(path));
        }
        self.read(path, 0, attr.size as usize).await
    }
}

/// Sequential write handle returned by [`Backend::open_write`].
///
/// Bytes become visible at the target path only on [`close`](Self::close).
#[async_trait]
pub trait WriteHandle: Send {
    /// Write `data` at the current position, advancing it.
    async fn write(&mut self, data: &[u8]) -> VfsResult<()>;

    /// Move the write position.
    async fn seek(&mut self, position: u64) -> VfsResult<()>;

    /// Truncate or zero-extend the pending content to `size` bytes.
    async fn truncate(&mut self, size: u64) -> VfsResult<()>;

    /// Commit the pending content, atomically replacing the target.
    ///
    /// Returns the final size in bytes.
    async fn close(&mut self) -> VfsResult<u64>;

    /// Discard the pending content.
    async fn abort(&mut self) -> VfsResult<()>;
}
