//! Mount: the public filesystem surface.
//!
//! A [`Mount`] is a view of a [`Root`] scoped to a base path. Every method
//! resolves its path argument against the base first, so `..` can never
//! reach above it.
//!
//! # Permissions
//!
//! Each directory's sidecar carries `read` and `write` flags. Reads check
//! the parent directory's read flag (a directory-targeted read such as `ls`
//! checks the directory's own flag). Writes and structural changes check
//! the parent directory's write flag. [`Mount::set_permissions`] and
//! [`Mount::get_permissions`] are administrative and skip checks.
//!
//! # Mutation protocol
//!
//! 1. resolve the path and check permissions
//! 2. mutate the backend
//! 3. update the parent record under its directory lock
//! 4. release, then apply the usage delta under the `/` lock
//! 5. notify subscribers
//!
//! Content and metadata are not updated atomically together: a crash
//! between 2 and 3 leaves drift that [`Root::fsck`] repairs.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use kura_types::{
    ChildMeta, EntryKind, FileEntry, Permissions, PermissionsPatch, SIDECAR_NAME, UsageDelta,
    UserMeta, WatchEvent, now_millis,
};

use crate::batch::Batch;
use crate::flows::WatchHandle;
use crate::path;
use crate::root::Root;
use crate::sink::{ReadStream, WriteSink};
use crate::usage;
use crate::vfs::{Backend, Permission, VfsError, VfsResult};

/// Options for [`Mount::write_file`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Replace the entry's user metadata.
    pub meta: Option<UserMeta>,
}

impl WriteOptions {
    pub fn with_meta(meta: UserMeta) -> Self {
        Self { meta: Some(meta) }
    }
}

/// Options for [`Mount::remove`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove directories together with their contents.
    pub recursive: bool,
    /// Succeed silently if the target is missing or the backend refuses.
    pub force: bool,
}

impl RemoveOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            force: false,
        }
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Options for [`Mount::mkdir`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MkdirOptions {
    /// Create missing ancestors and tolerate existing directories.
    pub recursive: bool,
    /// Flags applied to the final directory after creation.
    pub permissions: Option<PermissionsPatch>,
}

impl MkdirOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, patch: PermissionsPatch) -> Self {
        self.permissions = Some(patch);
        self
    }
}

/// Filesystem view scoped to a base path.
#[derive(Clone)]
pub struct Mount {
    root: Root,
    base: String,
}

impl Mount {
    pub(crate) fn new(root: Root, base: String) -> Self {
        Self { root, base }
    }

    /// Tree path this mount is rooted at.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn root(&self) -> &Root {
        &self.root
    }

    /// A nested mount; `subpath` is clamped below this mount's base.
    pub fn chroot(&self, subpath: &str) -> Mount {
        Mount::new(self.root.clone(), self.resolve(subpath))
    }

    /// Resolve a mount-relative path to a tree path.
    pub fn resolve(&self, user_path: &str) -> String {
        path::resolve(&self.base, user_path)
    }

    fn backend(&self) -> &Arc<dyn Backend> {
        self.root.backend()
    }

    fn is_base(&self, full: &str) -> bool {
        full == self.base
    }

    fn is_sidecar(full: &str) -> bool {
        path::basename(full) == SIDECAR_NAME
    }

    fn reject_sidecar(full: &str) -> VfsResult<()> {
        if Self::is_sidecar(full) {
            return Err(VfsError::invalid_path(format!("{full}: reserved name")));
        }
        Ok(())
    }

    async fn permissions_of(&self, dir: &str) -> VfsResult<Permissions> {
        Ok(self.root.meta().read(dir).await?.permissions)
    }

    async fn check_read(&self, dir: &str) -> VfsResult<()> {
        if !self.permissions_of(dir).await?.read {
            return Err(VfsError::permission_denied(dir, Permission::Read));
        }
        Ok(())
    }

    async fn check_write(&self, dir: &str) -> VfsResult<()> {
        if !self.permissions_of(dir).await?.write {
            return Err(VfsError::permission_denied(dir, Permission::Write));
        }
        Ok(())
    }

    /// Size of the file the backend holds at `full`, or None if nothing is
    /// there. A directory in the way is an error.
    async fn backend_file_size(&self, full: &str) -> VfsResult<Option<u64>> {
        match self.backend().getattr(full).await {
            Ok(attr) if attr.is_file() => Ok(Some(attr.size)),
            Ok(_) => Err(VfsError::is_a_directory(full)),
            Err(VfsError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Tracked metadata for `full`, if any.
    async fn tracked(&self, full: &str) -> VfsResult<Option<ChildMeta>> {
        let (dir, name) = path::split(full);
        Ok(self.root.meta().read(&dir).await?.children.remove(&name))
    }

    // ========================================================================
    // File content
    // ========================================================================

    /// Read a whole file.
    pub async fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let full = self.resolve(path);
        if Self::is_sidecar(&full) {
            return Err(VfsError::not_found(full));
        }
        if path::is_root(&full) {
            return Err(VfsError::is_a_directory(full));
        }
        self.check_read(&path::parent(&full)).await?;
        self.backend().read_all(&full).await
    }

    /// Read a whole file as text. Invalid UTF-8 is replaced.
    pub async fn read_text_file(&self, path: &str) -> VfsResult<String> {
        let bytes = self.read_file(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Create or replace a file.
    ///
    /// Overwriting keeps ctime, and keeps user meta unless `options.meta` is
    /// set. Emits `create` for a new name, `update` otherwise.
    pub async fn write_file(
        &self,
        path: &str,
        data: &[u8],
        options: WriteOptions,
    ) -> VfsResult<FileEntry> {
        let full = self.resolve(path);
        Self::reject_sidecar(&full)?;
        if path::is_root(&full) {
            return Err(VfsError::is_a_directory(full));
        }
        self.check_write(&path::parent(&full)).await?;
        if let Some(meta) = &options.meta {
            self.root.meta().validate_size(&full, meta)?;
        }

        let prior = self.backend_file_size(&full).await?;
        self.backend().write_all(&full, data).await?;
        tracing::debug!(path = %full, size = data.len(), "file written");
        self.root
            .record_file(&full, data.len() as u64, prior, options.meta)
            .await
    }

    /// Append to a file, creating it if missing.
    ///
    /// The backend has no append primitive, so the whole file is rewritten.
    pub async fn append_file(&self, path: &str, data: &[u8]) -> VfsResult<FileEntry> {
        let full = self.resolve(path);
        Self::reject_sidecar(&full)?;
        if path::is_root(&full) {
            return Err(VfsError::is_a_directory(full));
        }
        self.check_write(&path::parent(&full)).await?;

        let (mut content, prior) = match self.backend().read_all(&full).await {
            Ok(content) => {
                let prior = content.len() as u64;
                (content, Some(prior))
            }
            Err(VfsError::NotFound(_)) => (Vec::new(), None),
            Err(e) => return Err(e),
        };
        content.extend_from_slice(data);

        self.backend().write_all(&full, &content).await?;
        tracing::debug!(path = %full, appended = data.len(), size = content.len(), "file appended");
        self.root
            .record_file(&full, content.len() as u64, prior, None)
            .await
    }

    /// Copy content and user meta from `src` to `dest`.
    pub async fn copy_file(&self, src: &str, dest: &str) -> VfsResult<FileEntry> {
        let content = self.read_file(src).await?;
        let meta = self
            .tracked(&self.resolve(src))
            .await?
            .map(|child| child.meta);
        self.write_file(dest, &content, WriteOptions { meta }).await
    }

    /// Copy then remove. Not atomic: a failure between the two steps leaves
    /// both copies in place.
    ///
    /// Moving a file onto itself changes nothing and returns its entry.
    pub async fn move_file(&self, src: &str, dest: &str) -> VfsResult<FileEntry> {
        if self.resolve(src) == self.resolve(dest) {
            let entry = self.stat(src).await?;
            if entry.is_dir() {
                return Err(VfsError::is_a_directory(self.resolve(src)));
            }
            return Ok(entry);
        }
        let entry = self.copy_file(src, dest).await?;
        self.remove(src, RemoveOptions::default()).await?;
        Ok(entry)
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Remove a file or directory.
    ///
    /// Removing the mount base is a no-op. A directory with entries needs
    /// `recursive`.
    pub async fn remove(&self, path: &str, options: RemoveOptions) -> VfsResult<()> {
        let full = self.resolve(path);
        if self.is_base(&full) || path::is_root(&full) {
            return Ok(());
        }
        Self::reject_sidecar(&full)?;
        let (dir, name) = path::split(&full);
        self.check_write(&dir).await?;

        let attr = match self.backend().getattr(&full).await {
            Ok(attr) => attr,
            Err(_) if options.force => return Ok(()),
            Err(e) => return Err(e),
        };

        let removed = match attr.kind {
            EntryKind::File => UsageDelta::new_file(attr.size),
            EntryKind::Directory => {
                let below = usage::walk(self.backend().as_ref(), &full).await?;
                if !options.recursive && below != Default::default() {
                    if options.force {
                        return Ok(());
                    }
                    return Err(VfsError::other(format!("directory not empty: {full}")));
                }
                UsageDelta::new_directory() + UsageDelta::from(below)
            }
        };

        // Directories always go recursively: the sidecar lives inside.
        if let Err(e) = self.backend().remove(&full, attr.is_dir()).await {
            if options.force {
                return Ok(());
            }
            tracing::debug!(path = %full, error = %e, "backend remove failed");
            return Err(VfsError::not_found(full));
        }

        let prior = self
            .root
            .meta()
            .update(&dir, |record| Ok(record.children.remove(&name)))
            .await?;
        self.root.meta().apply_usage_delta(-removed).await?;

        let entry = match &prior {
            Some(child) => FileEntry::from_meta(name.clone(), child),
            None => FileEntry::zeroed(name.clone(), attr.kind),
        };
        tracing::debug!(path = %full, kind = %attr.kind, "removed");
        self.root
            .notify_subscribers(&dir, vec![WatchEvent::delete(full.clone(), entry)]);
        Ok(())
    }

    /// Probe for an object. Never fails.
    pub async fn exists(&self, path: &str) -> bool {
        let full = self.resolve(path);
        if Self::is_sidecar(&full) {
            return false;
        }
        self.backend().exists(&full).await
    }

    /// Create a directory.
    pub async fn mkdir(&self, path: &str, options: MkdirOptions) -> VfsResult<()> {
        let full = self.resolve(path);
        Self::reject_sidecar(&full)?;

        if options.recursive {
            let mut current = "/".to_string();
            for segment in path::segments(&full) {
                let next = path::join(&[current.as_str(), segment]);
                match self.backend().getattr(&next).await {
                    Ok(attr) if attr.is_dir() => {}
                    Ok(_) => return Err(VfsError::not_a_directory(next)),
                    Err(VfsError::NotFound(_)) => self.create_dir(&current, &next, true).await?,
                    Err(e) => return Err(e),
                }
                current = next;
            }
        } else {
            if path::is_root(&full) {
                return Err(VfsError::already_exists(full));
            }
            let dir = path::parent(&full);
            self.create_dir(&dir, &full, false).await?;
        }

        if let Some(patch) = options.permissions {
            self.apply_permissions(&full, patch).await?;
        }
        Ok(())
    }

    async fn create_dir(&self, parent: &str, full: &str, tolerate_existing: bool) -> VfsResult<()> {
        self.check_write(parent).await?;
        match self.backend().mkdir(full).await {
            Ok(()) => {}
            Err(VfsError::AlreadyExists(_)) if tolerate_existing => return Ok(()),
            Err(e) => return Err(e),
        }

        let name = path::basename(full);
        let child = ChildMeta::directory(now_millis());
        let entry = FileEntry::from_meta(name.clone(), &child);
        self.root
            .meta()
            .update(parent, |record| {
                record.children.insert(name, child);
                Ok(())
            })
            .await?;
        self.root
            .meta()
            .apply_usage_delta(UsageDelta::new_directory())
            .await?;

        tracing::debug!(path = %full, "directory created");
        self.root
            .notify_subscribers(parent, vec![WatchEvent::create(full, entry)]);
        Ok(())
    }

    // ========================================================================
    // Listing & stat
    // ========================================================================

    /// List a directory.
    ///
    /// Tracked entries plus any backend objects the record does not know
    /// about, the latter stamped with the current time.
    pub async fn ls(&self, path: &str) -> VfsResult<Vec<FileEntry>> {
        let full = self.resolve(path);
        self.check_read(&full).await?;
        let actual = self.backend().readdir(&full).await?;
        let record = self.root.meta().read(&full).await?;
        let now = now_millis();

        let mut entries: BTreeMap<String, FileEntry> = record
            .children
            .iter()
            .map(|(name, child)| (name.clone(), FileEntry::from_meta(name.clone(), child)))
            .collect();

        for entry in actual {
            if entry.name == SIDECAR_NAME || entries.contains_key(&entry.name) {
                continue;
            }
            let child_path = path::join(&[full.as_str(), entry.name.as_str()]);
            let synthesized = match self.backend().getattr(&child_path).await {
                Ok(attr) => attr.to_untracked_entry(entry.name.clone(), now),
                Err(_) => FileEntry::untracked(entry.name.clone(), entry.kind, 0, now),
            };
            entries.insert(entry.name, synthesized);
        }

        Ok(entries.into_values().collect())
    }

    /// Names in a directory, without the sidecar.
    pub async fn read_dir(&self, path: &str) -> VfsResult<Vec<String>> {
        let full = self.resolve(path);
        self.check_read(&full).await?;
        Ok(self
            .backend()
            .readdir(&full)
            .await?
            .into_iter()
            .filter(|entry| entry.name != SIDECAR_NAME)
            .map(|entry| entry.name)
            .collect())
    }

    /// Stat one entry. The mount base gets a synthetic directory entry.
    pub async fn stat(&self, path: &str) -> VfsResult<FileEntry> {
        let full = self.resolve(path);
        if self.is_base(&full) {
            return Ok(FileEntry::untracked(
                path::basename(&full),
                EntryKind::Directory,
                0,
                now_millis(),
            ));
        }
        if Self::is_sidecar(&full) {
            return Err(VfsError::not_found(full));
        }

        let (dir, name) = path::split(&full);
        self.check_read(&dir).await?;
        if let Some(child) = self.root.meta().read(&dir).await?.child(&name) {
            return Ok(FileEntry::from_meta(name, child));
        }

        match self.backend().getattr(&full).await {
            Ok(attr) => Ok(attr.to_untracked_entry(name, now_millis())),
            Err(_) => Err(VfsError::not_found(full)),
        }
    }

    /// Entries of a directory's record matching `predicate`.
    ///
    /// Unlike [`ls`](Self::ls), untracked backend objects are not included.
    pub async fn query<P>(&self, path: &str, predicate: P) -> VfsResult<Vec<FileEntry>>
    where
        P: Fn(&FileEntry) -> bool,
    {
        let full = self.resolve(path);
        self.check_read(&full).await?;
        let record = self.root.meta().read(&full).await?;
        Ok(record
            .children
            .iter()
            .map(|(name, child)| FileEntry::from_meta(name.clone(), child))
            .filter(|entry| predicate(entry))
            .collect())
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Merge `meta` into an entry's user metadata (shallow).
    ///
    /// An untracked object is bootstrapped from the backend first.
    pub async fn set_meta(&self, path: &str, meta: UserMeta) -> VfsResult<FileEntry> {
        let full = self.resolve(path);
        Self::reject_sidecar(&full)?;
        if path::is_root(&full) {
            return Err(VfsError::invalid_path(full));
        }
        let (dir, name) = path::split(&full);
        self.check_write(&dir).await?;
        let store = self.root.meta();
        store.validate_size(&full, &meta)?;

        let attr = match self.backend().getattr(&full).await {
            Ok(attr) => attr,
            Err(_) => return Err(VfsError::not_found(full)),
        };

        let now = now_millis();
        let entry = store
            .update(&dir, |record| {
                let mut child = match record.children.get(&name) {
                    Some(child) => child.clone(),
                    None if attr.is_file() => ChildMeta::file(attr.size, now),
                    None => ChildMeta::directory(now),
                };
                child.meta.extend(meta);
                store.validate_size(&full, &child.meta)?;
                child.mtime = now;
                let entry = FileEntry::from_meta(name.clone(), &child);
                record.children.insert(name.clone(), child);
                Ok(entry)
            })
            .await?;

        tracing::debug!(path = %full, "meta updated");
        self.root
            .notify_subscribers(&dir, vec![WatchEvent::update(full.clone(), entry.clone())]);
        Ok(entry)
    }

    /// User metadata of a tracked entry.
    pub async fn get_meta(&self, path: &str) -> VfsResult<UserMeta> {
        let full = self.resolve(path);
        let dir = path::parent(&full);
        self.check_read(&dir).await?;
        match self.tracked(&full).await? {
            Some(child) if !Self::is_sidecar(&full) => Ok(child.meta),
            _ => Err(VfsError::not_found(full)),
        }
    }

    /// Set a tracked entry's mtime.
    pub async fn utimes(&self, path: &str, mtime: i64) -> VfsResult<FileEntry> {
        let full = self.resolve(path);
        Self::reject_sidecar(&full)?;
        let (dir, name) = path::split(&full);
        self.check_write(&dir).await?;

        let entry = self
            .root
            .meta()
            .update(&dir, |record| match record.children.get_mut(&name) {
                Some(child) => {
                    child.mtime = mtime;
                    Ok(FileEntry::from_meta(name.clone(), child))
                }
                None => Err(VfsError::not_found(full.clone())),
            })
            .await?;

        tracing::debug!(path = %full, mtime, "times updated");
        self.root
            .notify_subscribers(&dir, vec![WatchEvent::update(full.clone(), entry.clone())]);
        Ok(entry)
    }

    /// Merge flags into a directory's record. Needs no permission itself.
    pub async fn set_permissions(&self, path: &str, patch: PermissionsPatch) -> VfsResult<Permissions> {
        let full = self.resolve(path);
        self.apply_permissions(&full, patch).await
    }

    async fn apply_permissions(&self, full: &str, patch: PermissionsPatch) -> VfsResult<Permissions> {
        let attr = self.backend().getattr(full).await?;
        if !attr.is_dir() {
            return Err(VfsError::not_a_directory(full));
        }
        let permissions = self
            .root
            .meta()
            .update(full, |record| {
                patch.apply(&mut record.permissions);
                Ok(record.permissions)
            })
            .await?;
        tracing::debug!(dir = %full, read = permissions.read, write = permissions.write, "permissions set");
        Ok(permissions)
    }

    /// A directory's permission flags.
    pub async fn get_permissions(&self, path: &str) -> VfsResult<Permissions> {
        let full = self.resolve(path);
        let attr = self.backend().getattr(&full).await?;
        if !attr.is_dir() {
            return Err(VfsError::not_a_directory(full));
        }
        self.permissions_of(&full).await
    }

    // ========================================================================
    // Streams
    // ========================================================================

    /// Chunked reader for a file.
    pub async fn create_read_stream(&self, path: &str) -> VfsResult<ReadStream> {
        let full = self.resolve(path);
        if Self::is_sidecar(&full) {
            return Err(VfsError::not_found(full));
        }
        self.check_read(&path::parent(&full)).await?;
        let attr = self.backend().getattr(&full).await?;
        if attr.is_dir() {
            return Err(VfsError::is_a_directory(full));
        }
        Ok(ReadStream::new(Arc::clone(self.backend()), full))
    }

    /// Tracked writer for a file. Metadata is updated on close.
    pub async fn create_write_stream(&self, path: &str) -> VfsResult<WriteSink> {
        let full = self.resolve(path);
        Self::reject_sidecar(&full)?;
        if path::is_root(&full) {
            return Err(VfsError::is_a_directory(full));
        }
        self.check_write(&path::parent(&full)).await?;
        let prior = self.backend_file_size(&full).await?;
        let handle = self.backend().open_write(&full).await?;
        Ok(WriteSink::new(self.root.clone(), full, handle, prior))
    }

    // ========================================================================
    // Watching
    // ========================================================================

    /// Watch a directory and everything below it.
    pub fn watch<F>(&self, path: &str, callback: F) -> WatchHandle
    where
        F: Fn(&[WatchEvent]) + Send + Sync + 'static,
    {
        let full = self.resolve(path);
        self.root.subscribe(&full, None, Arc::new(callback))
    }

    /// Watch a single file.
    pub fn watch_file<F>(&self, path: &str, callback: F) -> WatchHandle
    where
        F: Fn(&[WatchEvent]) + Send + Sync + 'static,
    {
        let full = self.resolve(path);
        let dir = path::parent(&full);
        self.root.subscribe(&dir, Some(full), Arc::new(callback))
    }

    // ========================================================================
    // Batching
    // ========================================================================

    /// Run `f` with a batch scope over this mount.
    ///
    /// Operations take effect and notify immediately; nothing is rolled back
    /// if `f` fails part way.
    pub async fn batch<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Batch) -> Fut,
        Fut: Future<Output = T>,
    {
        Batch::new(self.clone(), 1).run(f).await
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("base", &self.base)
            .field("root", &self.root.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootConfig;
    use crate::usage::UsageOptions;
    use crate::vfs::MemoryBackend;
    use kura_types::{Usage, WatchEventKind};
    use serde_json::json;
    use std::sync::Mutex;

    async fn setup(key: &str) -> (Root, Mount) {
        let backend = Arc::new(MemoryBackend::new());
        let root = Root::open(backend, RootConfig::new(key)).await.unwrap();
        let mount = root.mount("/");
        (root, mount)
    }

    fn meta(value: serde_json::Value) -> UserMeta {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_write_read_stat() {
        let (_root, fs) = setup("mount-write-read").await;
        fs.write_file("/a.txt", b"hello", WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(fs.read_file("a.txt").await.unwrap(), b"hello");
        assert_eq!(fs.read_text_file("/a.txt").await.unwrap(), "hello");
        let stat = fs.stat("/a.txt").await.unwrap();
        assert_eq!(stat.size, 5);
        assert!(stat.is_file());
    }

    #[tokio::test]
    async fn test_overwrite_keeps_ctime_and_meta() {
        let (_root, fs) = setup("mount-overwrite").await;
        let first = fs
            .write_file("/f", b"1", WriteOptions::with_meta(meta(json!({"tag": "x"}))))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = fs.write_file("/f", b"22", WriteOptions::default()).await.unwrap();

        assert_eq!(first.ctime, second.ctime);
        assert!(second.mtime >= first.mtime);
        assert_eq!(second.meta["tag"], "x");
        assert_eq!(second.size, 2);
    }

    #[tokio::test]
    async fn test_sidecar_is_hidden_and_reserved() {
        let (_root, fs) = setup("mount-sidecar").await;
        fs.write_file("/a", b"1", WriteOptions::default()).await.unwrap();

        assert_eq!(fs.read_dir("/").await.unwrap(), vec!["a".to_string()]);
        assert_eq!(fs.ls("/").await.unwrap().len(), 1);
        assert!(!fs.exists(SIDECAR_NAME).await);
        assert!(fs.read_file(SIDECAR_NAME).await.unwrap_err().is_not_found());
        assert!(matches!(
            fs.write_file(SIDECAR_NAME, b"{}", WriteOptions::default()).await,
            Err(VfsError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_append() {
        let (root, fs) = setup("mount-append").await;
        let created = fs.append_file("/log", b"ab").await.unwrap();
        let appended = fs.append_file("/log", b"cd").await.unwrap();

        assert_eq!(fs.read_file("/log").await.unwrap(), b"abcd");
        assert_eq!(appended.size, 4);
        assert_eq!(created.ctime, appended.ctime);
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::new(4, 1, 0)
        );
    }

    #[tokio::test]
    async fn test_copy_and_move() {
        let (root, fs) = setup("mount-copy-move").await;
        fs.write_file("/src", b"data", WriteOptions::with_meta(meta(json!({"k": 1}))))
            .await
            .unwrap();

        fs.copy_file("/src", "/copy").await.unwrap();
        assert_eq!(fs.read_file("/copy").await.unwrap(), b"data");
        assert_eq!(fs.get_meta("/copy").await.unwrap()["k"], 1);

        fs.move_file("/copy", "/moved").await.unwrap();
        assert!(!fs.exists("/copy").await);
        assert!(fs.exists("/moved").await);
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::new(8, 2, 0)
        );
    }

    #[tokio::test]
    async fn test_move_onto_itself_keeps_file() {
        let (root, fs) = setup("mount-move-self").await;
        fs.write_file("/a", b"data", WriteOptions::default()).await.unwrap();

        let entry = fs.move_file("/a", "/./a").await.unwrap();
        assert_eq!(entry.size, 4);
        assert_eq!(fs.read_file("/a").await.unwrap(), b"data");
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::new(4, 1, 0)
        );

        let home = fs.chroot("/");
        home.move_file("a", "../a").await.unwrap();
        assert!(fs.exists("/a").await);
    }

    #[tokio::test]
    async fn test_overwrite_untracked_file_counts_once() {
        let (root, fs) = setup("mount-overwrite-untracked").await;
        root.backend().write_all("/raw", b"12345").await.unwrap();
        fs.root().usage(UsageOptions::full()).await.unwrap();

        let entry = fs.write_file("/raw", b"ab", WriteOptions::default()).await.unwrap();
        assert_eq!(entry.size, 2);
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::new(2, 1, 0)
        );

        fs.append_file("/raw", b"c").await.unwrap();
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::new(3, 1, 0)
        );
    }

    #[tokio::test]
    async fn test_write_onto_directory_fails() {
        let (_root, fs) = setup("mount-write-dir").await;
        fs.mkdir("/d", MkdirOptions::default()).await.unwrap();
        assert!(matches!(
            fs.write_file("/d", b"x", WriteOptions::default()).await,
            Err(VfsError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_file_and_force() {
        let (_root, fs) = setup("mount-remove").await;
        fs.write_file("/x", b"1", WriteOptions::default()).await.unwrap();
        fs.remove("/x", RemoveOptions::default()).await.unwrap();
        assert!(!fs.exists("/x").await);

        let err = fs.remove("/x", RemoveOptions::default()).await.unwrap_err();
        assert!(err.is_not_found());
        fs.remove("/x", RemoveOptions::default().force()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_directory_needs_recursive() {
        let (root, fs) = setup("mount-remove-dir").await;
        fs.mkdir("/d/e", MkdirOptions::recursive()).await.unwrap();
        fs.write_file("/d/e/f", b"123", WriteOptions::default()).await.unwrap();

        assert!(fs.remove("/d", RemoveOptions::default()).await.is_err());
        fs.remove("/d", RemoveOptions::recursive()).await.unwrap();
        assert!(!fs.exists("/d").await);
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::default()
        );

        // Empty directories (holding only a sidecar) go without recursive.
        fs.mkdir("/empty", MkdirOptions::default()).await.unwrap();
        fs.set_permissions("/empty", PermissionsPatch::new().with_read(true))
            .await
            .unwrap();
        fs.remove("/empty", RemoveOptions::default()).await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_base_is_noop() {
        let (_root, fs) = setup("mount-remove-base").await;
        fs.mkdir("/home", MkdirOptions::default()).await.unwrap();
        let home = fs.chroot("/home");
        home.remove("/", RemoveOptions::recursive()).await.unwrap();
        home.remove("../..", RemoveOptions::recursive()).await.unwrap();
        assert!(fs.exists("/home").await);
    }

    #[tokio::test]
    async fn test_mkdir_non_recursive() {
        let (_root, fs) = setup("mount-mkdir").await;
        fs.mkdir("/a", MkdirOptions::default()).await.unwrap();
        assert!(matches!(
            fs.mkdir("/a", MkdirOptions::default()).await,
            Err(VfsError::AlreadyExists(_))
        ));
        assert!(
            fs.mkdir("/x/y", MkdirOptions::default())
                .await
                .unwrap_err()
                .is_not_found()
        );
        // Recursive tolerates what is already there.
        fs.mkdir("/a", MkdirOptions::recursive()).await.unwrap();
    }

    #[tokio::test]
    async fn test_mkdir_through_file_fails() {
        let (_root, fs) = setup("mount-mkdir-file").await;
        fs.write_file("/f", b"", WriteOptions::default()).await.unwrap();
        assert!(matches!(
            fs.mkdir("/f/sub", MkdirOptions::recursive()).await,
            Err(VfsError::NotADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_mkdir_with_permissions() {
        let (_root, fs) = setup("mount-mkdir-perms").await;
        let options = MkdirOptions::recursive().with_permissions(PermissionsPatch::new().with_write(false));
        fs.mkdir("/locked/inner", options).await.unwrap();

        assert_eq!(
            fs.get_permissions("/locked/inner").await.unwrap(),
            Permissions::read_only()
        );
        assert!(fs.get_permissions("/locked").await.unwrap().write);
    }

    #[tokio::test]
    async fn test_ls_includes_untracked() {
        let (root, fs) = setup("mount-ls-untracked").await;
        fs.write_file("/tracked", b"1", WriteOptions::default()).await.unwrap();
        root.backend().write_all("/sneaky", b"12345").await.unwrap();

        let entries = fs.ls("/").await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["sneaky", "tracked"]);
        assert_eq!(entries[0].size, 5);

        // query only sees tracked children
        let tracked = fs.query("/", |_| true).await.unwrap();
        assert_eq!(tracked.len(), 1);

        let stat = fs.stat("/sneaky").await.unwrap();
        assert_eq!(stat.size, 5);
        assert!(fs.get_meta("/sneaky").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_ls_missing_dir() {
        let (_root, fs) = setup("mount-ls-missing").await;
        assert!(fs.ls("/nope").await.unwrap_err().is_not_found());
        assert!(fs.stat("/nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stat_base_is_synthetic() {
        let (_root, fs) = setup("mount-stat-base").await;
        fs.mkdir("/home", MkdirOptions::default()).await.unwrap();
        let stat = fs.chroot("home").stat("/").await.unwrap();
        assert!(stat.is_dir());
        assert_eq!(stat.name, "home");
    }

    #[tokio::test]
    async fn test_set_meta_merges_and_bootstraps() {
        let (root, fs) = setup("mount-set-meta").await;
        root.backend().write_all("/raw", b"abc").await.unwrap();

        fs.set_meta("/raw", meta(json!({"a": 1}))).await.unwrap();
        let entry = fs.set_meta("/raw", meta(json!({"b": 2}))).await.unwrap();
        assert_eq!(entry.size, 3);
        assert_eq!(entry.meta["a"], 1);
        assert_eq!(entry.meta["b"], 2);

        assert!(fs.set_meta("/ghost", UserMeta::new()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_meta_size_limit() {
        let backend = Arc::new(MemoryBackend::new());
        let root = Root::open(backend, RootConfig::new("mount-meta-limit").max_meta_bytes(32))
            .await
            .unwrap();
        let fs = root.mount("/");
        let big = meta(json!({"blob": "x".repeat(64)}));

        let err = fs
            .write_file("/f", b"1", WriteOptions::with_meta(big.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::MetadataSizeExceeded { .. }));
        assert!(!fs.exists("/f").await);

        fs.write_file("/f", b"1", WriteOptions::default()).await.unwrap();
        fs.set_meta("/f", meta(json!({"a": "0123456789"}))).await.unwrap();
        // Each half fits; the merged map does not.
        let err = fs
            .set_meta("/f", meta(json!({"b": "0123456789"})))
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::MetadataSizeExceeded { .. }));
        assert!(fs.get_meta("/f").await.unwrap().get("b").is_none());
    }

    #[tokio::test]
    async fn test_utimes() {
        let (_root, fs) = setup("mount-utimes").await;
        fs.write_file("/f", b"1", WriteOptions::default()).await.unwrap();
        let entry = fs.utimes("/f", 42).await.unwrap();
        assert_eq!(entry.mtime, 42);
        assert_eq!(fs.stat("/f").await.unwrap().mtime, 42);
        assert!(fs.utimes("/missing", 1).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_permissions_enforced() {
        let (_root, fs) = setup("mount-perms").await;
        fs.mkdir("/d", MkdirOptions::default()).await.unwrap();
        fs.write_file("/d/f", b"1", WriteOptions::default()).await.unwrap();

        fs.set_permissions("/d", PermissionsPatch::new().with_write(false))
            .await
            .unwrap();
        let err = fs
            .write_file("/d/g", b"2", WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VfsError::PermissionDenied { permission: Permission::Write, .. }
        ));
        assert_eq!(fs.read_file("/d/f").await.unwrap(), b"1");

        fs.set_permissions("/d", PermissionsPatch::new().with_read(false))
            .await
            .unwrap();
        assert!(matches!(
            fs.read_file("/d/f").await,
            Err(VfsError::PermissionDenied { permission: Permission::Read, .. })
        ));
        assert!(matches!(
            fs.ls("/d").await,
            Err(VfsError::PermissionDenied { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_permissions_on_file_fails() {
        let (_root, fs) = setup("mount-perms-file").await;
        fs.write_file("/f", b"", WriteOptions::default()).await.unwrap();
        assert!(matches!(
            fs.set_permissions("/f", PermissionsPatch::new()).await,
            Err(VfsError::NotADirectory(_))
        ));
        assert!(
            fs.set_permissions("/none", PermissionsPatch::new())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_streams() {
        let (root, fs) = setup("mount-streams").await;
        let mut sink = fs.create_write_stream("/big").await.unwrap();
        sink.write(b"abc").await.unwrap();
        sink.write(b"def").await.unwrap();
        let entry = sink.close().await.unwrap();
        assert_eq!(entry.size, 6);

        let mut stream = fs.create_read_stream("/big").await.unwrap().with_chunk_size(4);
        assert_eq!(stream.read_to_end().await.unwrap(), b"abcdef");
        assert_eq!(
            root.usage(UsageOptions::default()).await.unwrap(),
            Usage::new(6, 1, 0)
        );
    }

    #[tokio::test]
    async fn test_watch_events() {
        let (_root, fs) = setup("mount-watch").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = fs.watch("/", move |events| {
            let mut sink = sink.lock().unwrap();
            sink.extend(events.iter().map(|e| (e.kind, e.path.clone())));
        });

        fs.write_file("/a", b"1", WriteOptions::default()).await.unwrap();
        fs.write_file("/a", b"2", WriteOptions::default()).await.unwrap();
        fs.remove("/a", RemoveOptions::default()).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (WatchEventKind::Create, "/a".to_string()),
                (WatchEventKind::Update, "/a".to_string()),
                (WatchEventKind::Delete, "/a".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_watch_file_filters_siblings() {
        let (_root, fs) = setup("mount-watch-file").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _handle = fs.watch_file("/target", move |events| {
            sink.lock().unwrap().extend(events.iter().map(|e| e.name.clone()));
        });

        fs.write_file("/other", b"1", WriteOptions::default()).await.unwrap();
        fs.write_file("/target", b"1", WriteOptions::default()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["target".to_string()]);
    }

    #[tokio::test]
    async fn test_chroot_scopes_paths() {
        let (_root, fs) = setup("mount-chroot").await;
        fs.mkdir("/home/user", MkdirOptions::recursive()).await.unwrap();
        let home = fs.chroot("/home/user");
        home.write_file("/../../../notes.txt", b"n", WriteOptions::default())
            .await
            .unwrap();

        assert_eq!(home.base(), "/home/user");
        assert!(fs.exists("/home/user/notes.txt").await);
        assert!(!fs.exists("/notes.txt").await);
    }
}
