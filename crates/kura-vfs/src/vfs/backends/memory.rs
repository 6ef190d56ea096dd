//! In-memory backend.
//!
//! Used for testing and ephemeral trees. All data is lost when dropped.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kura_types::now_millis;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Backend, WriteHandle};
use crate::vfs::types::{BackendAttr, BackendEntry, BackendKind};

/// Entry in the memory backend.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, mtime_ms: i64 },
    Directory { mtime_ms: i64 },
}

impl Entry {
    fn attr(&self) -> BackendAttr {
        match self {
            Entry::File { data, mtime_ms } => BackendAttr::file(data.len() as u64, *mtime_ms),
            Entry::Directory { mtime_ms } => BackendAttr::directory(*mtime_ms),
        }
    }

    fn kind(&self) -> BackendKind {
        self.attr().kind
    }
}

type Entries = Arc<RwLock<HashMap<String, Entry>>>;

/// In-memory backend.
///
/// Thread-safe via internal `RwLock`. Cloning the `Arc` around a
/// `MemoryBackend` shares the same tree, which is how tests simulate several
/// contexts looking at one store.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: Entries,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a new empty in-memory tree.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        // Root directory always exists until destroyed
        entries.insert(
            String::new(),
            Entry::Directory {
                mtime_ms: now_millis(),
            },
        );
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Normalize a path: strip slashes, drop `.` and resolve `..`.
    fn normalize(path: &str) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                s => parts.push(s),
            }
        }
        parts.join("/")
    }

    fn parent_of(key: &str) -> Option<&str> {
        if key.is_empty() {
            return None;
        }
        Some(key.rsplit_once('/').map(|(p, _)| p).unwrap_or(""))
    }

    fn display(key: &str) -> String {
        format!("/{key}")
    }

    /// Returns true if `key` lies strictly below `dir`.
    fn is_descendant(key: &str, dir: &str) -> bool {
        if dir.is_empty() {
            return !key.is_empty();
        }
        key.len() > dir.len() && key.starts_with(dir) && key.as_bytes()[dir.len()] == b'/'
    }

    fn check_parent_dir(entries: &HashMap<String, Entry>, key: &str) -> VfsResult<()> {
        let parent = Self::parent_of(key).ok_or_else(|| VfsError::invalid_path("/"))?;
        match entries.get(parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(VfsError::not_a_directory(Self::display(parent))),
            None => Err(VfsError::not_found(Self::display(parent))),
        }
    }

    fn commit(entries: &Entries, key: &str, data: Vec<u8>) -> VfsResult<()> {
        let mut entries = entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        Self::check_parent_dir(&entries, key)?;
        if let Some(Entry::Directory { .. }) = entries.get(key) {
            return Err(VfsError::is_a_directory(Self::display(key)));
        }
        entries.insert(
            key.to_string(),
            Entry::File {
                data,
                mtime_ms: now_millis(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn getattr(&self, path: &str) -> VfsResult<BackendAttr> {
        let key = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        entries
            .get(&key)
            .map(Entry::attr)
            .ok_or_else(|| VfsError::not_found(Self::display(&key)))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<BackendEntry>> {
        let key = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        match entries.get(&key) {
            Some(Entry::Directory { .. }) => {}
            Some(_) => return Err(VfsError::not_a_directory(Self::display(&key))),
            None => return Err(VfsError::not_found(Self::display(&key))),
        }

        let mut result: Vec<BackendEntry> = entries
            .iter()
            .filter(|(entry_key, _)| Self::parent_of(entry_key) == Some(key.as_str()))
            .map(|(entry_key, entry)| {
                let name = entry_key.rsplit('/').next().unwrap_or(entry_key.as_str());
                BackendEntry::new(name, entry.kind())
            })
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &str, offset: u64, size: usize) -> VfsResult<Vec<u8>> {
        let key = Self::normalize(path);
        let entries = self
            .entries
            .read()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        match entries.get(&key) {
            Some(Entry::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(size).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(Self::display(&key))),
            None => Err(VfsError::not_found(Self::display(&key))),
        }
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let key = Self::normalize(path);
        Self::commit(&self.entries, &key, data.to_vec())
    }

    async fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteHandle>> {
        let key = Self::normalize(path);
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| VfsError::other("lock poisoned"))?;
            Self::check_parent_dir(&entries, &key)?;
            if let Some(Entry::Directory { .. }) = entries.get(&key) {
                return Err(VfsError::is_a_directory(Self::display(&key)));
            }
        }
        Ok(Box::new(MemoryWriteHandle {
            entries: Arc::clone(&self.entries),
            key,
            buffer: Vec::new(),
            position: 0,
            done: false,
        }))
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        let key = Self::normalize(path);
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        if entries.contains_key(&key) {
            return Err(VfsError::already_exists(Self::display(&key)));
        }
        Self::check_parent_dir(&entries, &key)?;
        entries.insert(
            key,
            Entry::Directory {
                mtime_ms: now_millis(),
            },
        );
        Ok(())
    }

    async fn remove(&self, path: &str, recursive: bool) -> VfsResult<()> {
        let key = Self::normalize(path);
        if key.is_empty() {
            return Err(VfsError::invalid_path("cannot remove backend root"));
        }

        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;

        match entries.get(&key) {
            Some(Entry::File { .. }) => {
                entries.remove(&key);
                Ok(())
            }
            Some(Entry::Directory { .. }) => {
                let has_children = entries.keys().any(|k| Self::is_descendant(k, &key));
                if has_children && !recursive {
                    return Err(VfsError::other(format!(
                        "directory not empty: {}",
                        Self::display(&key)
                    )));
                }
                entries.retain(|k, _| k != &key && !Self::is_descendant(k, &key));
                Ok(())
            }
            None => Err(VfsError::not_found(Self::display(&key))),
        }
    }

    async fn clear(&self) -> VfsResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        entries.retain(|k, _| k.is_empty());
        Ok(())
    }

    async fn destroy(&self) -> VfsResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| VfsError::other("lock poisoned"))?;
        entries.clear();
        Ok(())
    }
}

/// Buffers writes and commits them into the shared map on close.
struct MemoryWriteHandle {
    entries: Entries,
    key: String,
    buffer: Vec<u8>,
    position: usize,
    done: bool,
}

impl MemoryWriteHandle {
    fn check_open(&self) -> VfsResult<()> {
        if self.done {
            Err(VfsError::other(format!(
                "write handle already closed: {}",
                MemoryBackend::display(&self.key)
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WriteHandle for MemoryWriteHandle {
    async fn write(&mut self, data: &[u8]) -> VfsResult<()> {
        self.check_open()?;
        let end = self.position + data.len();
        // Extend if necessary
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.position..end].copy_from_slice(data);
        self.position = end;
        Ok(())
    }

    async fn seek(&mut self, position: u64) -> VfsResult<()> {
        self.check_open()?;
        self.position = position as usize;
        Ok(())
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.check_open()?;
        self.buffer.resize(size as usize, 0);
        Ok(())
    }

    async fn close(&mut self) -> VfsResult<u64> {
        self.check_open()?;
        self.done = true;
        let data = std::mem::take(&mut self.buffer);
        let size = data.len() as u64;
        MemoryBackend::commit(&self.entries, &self.key, data)?;
        Ok(size)
    }

    async fn abort(&mut self) -> VfsResult<()> {
        self.done = true;
        self.buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let fs = MemoryBackend::new();
        fs.write_all("test.txt", b"hello world").await.unwrap();

        let data = fs.read("test.txt", 0, 100).await.unwrap();
        assert_eq!(data, b"hello world");

        let partial = fs.read("/test.txt", 6, 5).await.unwrap();
        assert_eq!(partial, b"world");

        assert_eq!(fs.getattr("test.txt").await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_write_needs_parent() {
        let fs = MemoryBackend::new();
        let err = fs.write_all("a/b.txt", b"x").await.unwrap_err();
        assert!(err.is_not_found());

        fs.mkdir("a").await.unwrap();
        fs.write_all("a/b.txt", b"x").await.unwrap();
        assert!(fs.is_file("a/b.txt").await);
    }

    #[tokio::test]
    async fn test_mkdir_conflicts() {
        let fs = MemoryBackend::new();
        fs.mkdir("dir").await.unwrap();
        assert!(matches!(
            fs.mkdir("dir").await,
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(fs.mkdir("missing/child").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_readdir_sorted_direct_children() {
        let fs = MemoryBackend::new();
        fs.mkdir("dir").await.unwrap();
        fs.write_all("dir/b.txt", b"").await.unwrap();
        fs.write_all("dir/a.txt", b"").await.unwrap();
        fs.mkdir("dir/sub").await.unwrap();
        fs.write_all("dir/sub/deep.txt", b"").await.unwrap();
        fs.write_all("dirx", b"").await.unwrap();

        let entries = fs.readdir("dir").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert!(entries[2].kind.is_dir());

        let root = fs.readdir("/").await.unwrap();
        assert_eq!(root.len(), 2);
    }

    #[tokio::test]
    async fn test_remove() {
        let fs = MemoryBackend::new();
        fs.mkdir("dir").await.unwrap();
        fs.write_all("dir/file.txt", b"x").await.unwrap();
        fs.write_all("dirx", b"y").await.unwrap();

        assert!(fs.remove("dir", false).await.is_err());
        fs.remove("dir", true).await.unwrap();
        assert!(!fs.exists("dir/file.txt").await);
        assert!(fs.exists("dirx").await);
        assert!(fs.remove("dir", true).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_write_handle_commits_on_close() {
        let fs = MemoryBackend::new();
        let mut handle = fs.open_write("stream.bin").await.unwrap();
        handle.write(b"hello").await.unwrap();
        assert!(!fs.exists("stream.bin").await);

        handle.seek(0).await.unwrap();
        handle.write(b"J").await.unwrap();
        handle.truncate(3).await.unwrap();
        assert_eq!(handle.close().await.unwrap(), 3);
        assert_eq!(fs.read_all("stream.bin").await.unwrap(), b"Jel");
    }

    #[tokio::test]
    async fn test_write_handle_abort() {
        let fs = MemoryBackend::new();
        fs.write_all("keep.txt", b"old").await.unwrap();
        let mut handle = fs.open_write("keep.txt").await.unwrap();
        handle.write(b"new content").await.unwrap();
        handle.abort().await.unwrap();
        assert_eq!(fs.read_all("keep.txt").await.unwrap(), b"old");
        assert!(handle.write(b"more").await.is_err());
    }

    #[tokio::test]
    async fn test_clear_and_destroy() {
        let fs = MemoryBackend::new();
        fs.mkdir("a").await.unwrap();
        fs.write_all("b", b"1").await.unwrap();

        fs.clear().await.unwrap();
        assert!(fs.readdir("").await.unwrap().is_empty());
        assert!(fs.is_dir("").await);

        fs.destroy().await.unwrap();
        assert!(!fs.exists("").await);
    }
}
