//! Streaming reads and tracked writes.

use std::sync::Arc;

use kura_types::FileEntry;

use crate::root::Root;
use crate::vfs::{Backend, VfsError, VfsResult, WriteHandle};

/// Default chunk size for [`ReadStream`].
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Chunked reader over one backend file.
pub struct ReadStream {
    backend: Arc<dyn Backend>,
    path: String,
    offset: u64,
    chunk_size: usize,
    done: bool,
}

impl ReadStream {
    pub(crate) fn new(backend: Arc<dyn Backend>, path: String) -> Self {
        Self {
            backend,
            path,
            offset: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            done: false,
        }
    }

    /// Change the chunk size used by [`next_chunk`](Self::next_chunk).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Next chunk, or None at end of file.
    pub async fn next_chunk(&mut self) -> VfsResult<Option<Vec<u8>>> {
        if self.done {
            return Ok(None);
        }
        let chunk = self
            .backend
            .read(&self.path, self.offset, self.chunk_size)
            .await?;
        if chunk.is_empty() {
            self.done = true;
            return Ok(None);
        }
        self.offset += chunk.len() as u64;
        Ok(Some(chunk))
    }

    /// Drain the remaining bytes.
    pub async fn read_to_end(&mut self) -> VfsResult<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

/// Write handle that updates metadata, usage and subscribers on close.
///
/// Nothing is tracked until [`close`](Self::close). [`abort`](Self::abort)
/// leaves metadata and usage untouched. Dropping an open sink discards the
/// pending write the same way, without cleanup of backend temp state.
pub struct WriteSink {
    root: Root,
    path: String,
    handle: Option<Box<dyn WriteHandle>>,
    /// Size of the backend file this sink replaces, None if it is new.
    prior: Option<u64>,
    position: u64,
    len: u64,
}

impl WriteSink {
    pub(crate) fn new(
        root: Root,
        path: String,
        handle: Box<dyn WriteHandle>,
        prior: Option<u64>,
    ) -> Self {
        Self {
            root,
            path,
            handle: Some(handle),
            prior,
            position: 0,
            len: 0,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Logical length of the pending content.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn handle(&mut self) -> VfsResult<&mut Box<dyn WriteHandle>> {
        let path = &self.path;
        self.handle
            .as_mut()
            .ok_or_else(|| VfsError::other(format!("write sink already finished: {path}")))
    }

    /// Write `data` at the current position.
    pub async fn write(&mut self, data: &[u8]) -> VfsResult<()> {
        self.handle()?.write(data).await?;
        self.position += data.len() as u64;
        self.len = self.len.max(self.position);
        Ok(())
    }

    /// Move the write position.
    pub async fn seek(&mut self, position: u64) -> VfsResult<()> {
        self.handle()?.seek(position).await?;
        self.position = position;
        Ok(())
    }

    /// Cut or zero-extend the pending content to `size` bytes.
    pub async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.handle()?.truncate(size).await?;
        self.len = size;
        Ok(())
    }

    /// Commit the content and track it.
    pub async fn close(mut self) -> VfsResult<FileEntry> {
        let mut handle = self
            .handle
            .take()
            .ok_or_else(|| VfsError::other(format!("write sink already finished: {}", self.path)))?;
        let size = handle.close().await?;
        tracing::debug!(path = %self.path, size, "write stream closed");
        self.root
            .record_file(&self.path, size, self.prior, None)
            .await
    }

    /// Discard the pending content.
    pub async fn abort(mut self) -> VfsResult<()> {
        if let Some(mut handle) = self.handle.take() {
            handle.abort().await?;
            tracing::debug!(path = %self.path, "write stream aborted");
        }
        Ok(())
    }
}

impl std::fmt::Debug for WriteSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteSink")
            .field("path", &self.path)
            .field("position", &self.position)
            .field("len", &self.len)
            .field("prior", &self.prior)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootConfig;
    use crate::usage::UsageOptions;
    use crate::vfs::MemoryBackend;
    use kura_types::Usage;

    #[tokio::test]
    async fn test_read_stream_chunks() {
        let backend = Arc::new(MemoryBackend::new());
        backend.write_all("data.bin", &[7u8; 10]).await.unwrap();

        let mut stream = ReadStream::new(backend, "/data.bin".into()).with_chunk_size(4);
        assert_eq!(stream.next_chunk().await.unwrap().unwrap().len(), 4);
        assert_eq!(stream.read_to_end().await.unwrap().len(), 6);
        assert_eq!(stream.position(), 10);
        assert!(stream.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sink_tracks_high_water_mark() {
        let backend = Arc::new(MemoryBackend::new());
        let root = Root::open(backend.clone(), RootConfig::new("sink-hwm")).await.unwrap();
        let handle = backend.open_write("out.txt").await.unwrap();
        let mut sink = WriteSink::new(root.clone(), "/out.txt".into(), handle, None);

        sink.write(b"hello world").await.unwrap();
        sink.seek(0).await.unwrap();
        sink.write(b"J").await.unwrap();
        assert_eq!(sink.len(), 11);
        sink.truncate(5).await.unwrap();
        assert_eq!(sink.len(), 5);

        let entry = sink.close().await.unwrap();
        assert_eq!(entry.size, 5);
        assert_eq!(backend.read_all("out.txt").await.unwrap(), b"Jello");
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::new(5, 1, 0)
        );
    }

    #[tokio::test]
    async fn test_sink_abort_touches_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let root = Root::open(backend.clone(), RootConfig::new("sink-abort")).await.unwrap();
        let handle = backend.open_write("gone.txt").await.unwrap();
        let mut sink = WriteSink::new(root.clone(), "/gone.txt".into(), handle, None);

        sink.write(b"partial").await.unwrap();
        sink.abort().await.unwrap();

        assert!(!root.meta().read("/").await.unwrap().tracks("gone.txt"));
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::default()
        );
    }
}
