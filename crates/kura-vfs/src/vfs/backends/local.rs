//! Backend over a real directory on disk.
//!
//! Writes land in a hidden temp file next to the target and are renamed
//! over it on close, so readers never see a half-written file.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use kura_types::system_time_millis;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::{Backend, WriteHandle};
use crate::vfs::types::{BackendAttr, BackendEntry, BackendKind};

/// Marker embedded in in-flight write handle temp file names.
const TEMP_MARKER: &str = ".kura-tmp-";

/// A tree stored under `root`: backend path `docs/a.txt` is
/// `<root>/docs/a.txt`. Paths containing `..` are refused.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Canonicalizes `root` when it exists, so symlinked temp dirs resolve.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a backend path to an absolute path within the root.
    fn resolve(&self, path: &str) -> VfsResult<PathBuf> {
        let mut full = self.root.clone();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => return Err(VfsError::path_escapes_root(path)),
                s => full.push(s),
            }
        }
        Ok(full)
    }

    fn is_temp_name(name: &str) -> bool {
        name.starts_with('.') && name.contains(TEMP_MARKER)
    }

    fn metadata_to_attr(meta: &std::fs::Metadata) -> BackendAttr {
        let mtime_ms = meta.modified().map(system_time_millis).unwrap_or(0);
        if meta.is_dir() {
            BackendAttr::directory(mtime_ms)
        } else {
            BackendAttr::file(meta.len(), mtime_ms)
        }
    }

    async fn require_parent_dir(&self, full: &Path, path: &str) -> VfsResult<()> {
        let parent = full
            .parent()
            .ok_or_else(|| VfsError::invalid_path(path.to_string()))?;
        let meta = fs::metadata(parent)
            .await
            .map_err(|e| VfsError::from_io(e, parent_display(path)))?;
        if !meta.is_dir() {
            return Err(VfsError::not_a_directory(parent_display(path)));
        }
        Ok(())
    }
}

fn parent_display(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) => format!("/{parent}"),
        None => "/".to_string(),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn getattr(&self, path: &str) -> VfsResult<BackendAttr> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &str) -> VfsResult<Vec<BackendEntry>> {
        let full = self.resolve(path)?;
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;
        if !meta.is_dir() {
            return Err(VfsError::not_a_directory(path));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;

        while let Some(entry) = dir.next_entry().await.map_err(VfsError::from)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_temp_name(&name) {
                continue;
            }
            let file_type = entry.file_type().await.map_err(VfsError::from)?;
            let kind = if file_type.is_dir() {
                BackendKind::Directory
            } else {
                BackendKind::File
            };
            entries.push(BackendEntry::new(name, kind));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &str, offset: u64, size: usize) -> VfsResult<Vec<u8>> {
        let full = self.resolve(path)?;
        let mut file = fs::File::open(&full)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;
        if file.metadata().await.map_err(VfsError::from)?.is_dir() {
            return Err(VfsError::is_a_directory(path));
        }

        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(VfsError::from)?;

        let mut buffer = Vec::with_capacity(size.min(1 << 20));
        file.take(size as u64)
            .read_to_end(&mut buffer)
            .await
            .map_err(VfsError::from)?;

        Ok(buffer)
    }

    async fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let mut handle = self.open_write(path).await?;
        if let Err(e) = handle.write(data).await {
            let _ = handle.abort().await;
            return Err(e);
        }
        handle.close().await?;
        Ok(())
    }

    async fn open_write(&self, path: &str) -> VfsResult<Box<dyn WriteHandle>> {
        let target = self.resolve(path)?;
        if target == self.root {
            return Err(VfsError::is_a_directory("/"));
        }
        self.require_parent_dir(&target, path).await?;
        if let Ok(meta) = fs::metadata(&target).await
            && meta.is_dir()
        {
            return Err(VfsError::is_a_directory(path));
        }

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = target.with_file_name(format!(
            ".{name}{TEMP_MARKER}{}",
            uuid::Uuid::new_v4().simple()
        ));
        let file = fs::File::create(&temp).await.map_err(VfsError::from)?;

        Ok(Box::new(LocalWriteHandle {
            file: Some(file),
            temp,
            target,
        }))
    }

    async fn mkdir(&self, path: &str) -> VfsResult<()> {
        let full = self.resolve(path)?;
        if fs::metadata(&full).await.is_ok() {
            return Err(VfsError::already_exists(path));
        }
        fs::create_dir(&full)
            .await
            .map_err(|e| VfsError::from_io(e, path))
    }

    async fn remove(&self, path: &str, recursive: bool) -> VfsResult<()> {
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(VfsError::invalid_path("cannot remove backend root"));
        }
        let meta = fs::metadata(&full)
            .await
            .map_err(|e| VfsError::from_io(e, path))?;

        let result = if !meta.is_dir() {
            fs::remove_file(&full).await
        } else if recursive {
            fs::remove_dir_all(&full).await
        } else {
            fs::remove_dir(&full).await
        };
        result.map_err(|e| VfsError::from_io(e, path))
    }

    async fn clear(&self) -> VfsResult<()> {
        let mut dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| VfsError::from_io(e, "/"))?;
        while let Some(entry) = dir.next_entry().await.map_err(VfsError::from)? {
            let file_type = entry.file_type().await.map_err(VfsError::from)?;
            if file_type.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
            } else {
                fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn destroy(&self) -> VfsResult<()> {
        fs::remove_dir_all(&self.root)
            .await
            .map_err(|e| VfsError::from_io(e, "/"))
    }
}

/// Streams into a hidden temp file beside the target; renamed over it on close.
struct LocalWriteHandle {
    file: Option<fs::File>,
    temp: PathBuf,
    target: PathBuf,
}

impl LocalWriteHandle {
    fn file(&mut self) -> VfsResult<&mut fs::File> {
        self.file.as_mut().ok_or_else(|| {
            VfsError::other(format!(
                "write handle already closed: {}",
                self.target.display()
            ))
        })
    }
}

#[async_trait]
impl WriteHandle for LocalWriteHandle {
    async fn write(&mut self, data: &[u8]) -> VfsResult<()> {
        self.file()?.write_all(data).await.map_err(VfsError::from)
    }

    async fn seek(&mut self, position: u64) -> VfsResult<()> {
        self.file()?
            .seek(SeekFrom::Start(position))
            .await
            .map_err(VfsError::from)?;
        Ok(())
    }

    async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.file()?.set_len(size).await.map_err(VfsError::from)
    }

    async fn close(&mut self) -> VfsResult<u64> {
        let mut file = self.file.take().ok_or_else(|| {
            VfsError::other(format!(
                "write handle already closed: {}",
                self.target.display()
            ))
        })?;
        file.flush().await.map_err(VfsError::from)?;
        file.sync_all().await.map_err(VfsError::from)?;
        let size = file.metadata().await.map_err(VfsError::from)?.len();
        drop(file);

        fs::rename(&self.temp, &self.target)
            .await
            .map_err(VfsError::from)?;
        Ok(size)
    }

    async fn abort(&mut self) -> VfsResult<()> {
        if self.file.take().is_some() {
            match fs::remove_file(&self.temp).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
