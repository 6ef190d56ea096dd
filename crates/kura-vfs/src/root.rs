//! Tree root: lifecycle, usage accounting, repair and notification.
//!
//! A [`Root`] owns the backend handle for one tree. It is cheap to clone;
//! clones share the same subscriber registry and change bus listener.
//!
//! Two ways to get one:
//!
//! - [`Root::open`] builds an independent instance. Several may coexist,
//!   even for the same backend and key (they then share locks and see each
//!   other's changes over the bus).
//! - [`Root::create`] goes through the process-wide slot: the first caller
//!   wins and later calls get the active instance back, whatever key they
//!   asked for. [`Root::destroy`] empties the slot.

use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use kura_types::{
    ChildMeta, FileEntry, Usage, UsageDelta, UserMeta, WatchEvent, now_millis,
};

use crate::config::RootConfig;
use crate::flows::{ChangeBus, ChangeMessage, OpSource, WatchCallback, WatchHandle, WatchRegistry};
use crate::fsck::{self, FsckReport};
use crate::locks::DirLocks;
use crate::meta::MetaStore;
use crate::mount::Mount;
use crate::path;
use crate::usage::{self, UsageOptions};
use crate::vfs::{Backend, VfsError, VfsResult};

static ACTIVE: LazyLock<Mutex<Option<Root>>> = LazyLock::new(|| Mutex::new(None));

/// Handle to one tree.
#[derive(Clone)]
pub struct Root {
    inner: Arc<RootInner>,
}

struct RootInner {
    /// Identifies this context on the change bus.
    id: Uuid,
    config: RootConfig,
    backend: Arc<dyn Backend>,
    meta: MetaStore,
    watchers: Arc<WatchRegistry>,
    bus: ChangeBus,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RootInner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

impl Root {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open a tree on `backend`.
    ///
    /// Ensures the root sidecar exists. With `auto_repair` a full fsck runs;
    /// otherwise a tree without cached usage gets one full walk.
    pub async fn open(backend: Arc<dyn Backend>, config: RootConfig) -> VfsResult<Root> {
        config.validate()?;
        if !backend.is_dir("/").await {
            return Err(VfsError::not_found("/"));
        }

        let meta = MetaStore::new(
            Arc::clone(&backend),
            DirLocks::new(config.key.clone()),
            config.sidecar_policy,
            config.max_meta_bytes,
        );
        let initialized = meta.ensure("/").await?;

        let id = Uuid::new_v4();
        let watchers = Arc::new(WatchRegistry::new());
        let (bus, subscription) = ChangeBus::join(&config.key, config.broadcast_capacity);
        let listener = subscription.spawn_listener(id, Arc::downgrade(&watchers));

        let root = Root {
            inner: Arc::new(RootInner {
                id,
                config,
                backend,
                meta,
                watchers,
                bus,
                listener: Mutex::new(Some(listener)),
            }),
        };

        if root.inner.config.auto_repair {
            root.fsck().await?;
        } else if root.inner.meta.cached_usage().await?.is_none() {
            root.usage(UsageOptions::full()).await?;
        }

        tracing::info!(key = %root.key(), %id, initialized, "root opened");
        Ok(root)
    }

    /// Open through the process-wide slot. First caller wins.
    pub async fn create(backend: Arc<dyn Backend>, config: RootConfig) -> VfsResult<Root> {
        if let Some(active) = Self::active() {
            tracing::info!(key = %active.key(), requested = %config.key, "reusing active root");
            return Ok(active);
        }

        let root = Self::open(backend, config).await?;
        let mut slot = ACTIVE.lock();
        if let Some(existing) = slot.as_ref() {
            // Lost a race with another create; ours is dropped.
            return Ok(existing.clone());
        }
        *slot = Some(root.clone());
        Ok(root)
    }

    /// The instance currently held by the process-wide slot.
    pub fn active() -> Option<Root> {
        ACTIVE.lock().clone()
    }

    /// Returns true if this is the instance held by the process-wide slot.
    pub fn is_active(&self) -> bool {
        ACTIVE
            .lock()
            .as_ref()
            .is_some_and(|active| active.ptr_eq(self))
    }

    /// Tear the tree down.
    ///
    /// An owned backend is removed outright, otherwise only its contents are
    /// cleared. Subscribers are dropped and the bus listener stops.
    pub async fn destroy(&self) -> VfsResult<()> {
        let result = if self.inner.config.owns_backend {
            self.inner.backend.destroy().await
        } else {
            self.inner.backend.clear().await
        };

        self.inner.watchers.clear();
        let listener = self.inner.listener.lock().take();
        if let Some(listener) = listener {
            listener.abort();
            // Wait for the task to drop its receiver so the channel can go.
            let _ = listener.await;
        }
        self.inner.bus.close();

        {
            let mut slot = ACTIVE.lock();
            if slot.as_ref().is_some_and(|active| active.ptr_eq(self)) {
                *slot = None;
            }
        }

        tracing::info!(
            key = %self.key(),
            id = %self.inner.id,
            owned = self.inner.config.owns_backend,
            "root destroyed"
        );
        result
    }

    /// Returns true if both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Root) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn key(&self) -> &str {
        &self.inner.config.key
    }

    pub fn config(&self) -> &RootConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub(crate) fn meta(&self) -> &MetaStore {
        &self.inner.meta
    }

    /// A mount whose base is `subpath` (clamped below `/`).
    pub fn mount(&self, subpath: &str) -> Mount {
        Mount::new(self.clone(), path::resolve("/", subpath))
    }

    // ========================================================================
    // Usage & repair
    // ========================================================================

    /// Usage counters for the whole tree.
    ///
    /// Returns the cache unless `full` is set or no cache exists; a walk
    /// always refreshes the cache.
    pub async fn usage(&self, options: UsageOptions) -> VfsResult<Usage> {
        if !options.full
            && let Some(cached) = self.inner.meta.cached_usage().await?
        {
            return Ok(cached);
        }

        let usage = usage::walk(self.inner.backend.as_ref(), "/").await?;
        self.inner.meta.store_usage(usage).await?;
        tracing::info!(
            key = %self.key(),
            total_size = usage.total_size,
            files = usage.file_count,
            directories = usage.directory_count,
            "usage recomputed"
        );
        Ok(usage)
    }

    /// Rebuild every sidecar record from the backend, then recompute usage.
    pub async fn fsck(&self) -> VfsResult<FsckReport> {
        let mut report = FsckReport::default();
        fsck::repair(self.inner.backend.as_ref(), &self.inner.meta, "/", &mut report).await?;
        self.usage(UsageOptions::full()).await?;
        tracing::info!(
            key = %self.key(),
            repaired = report.repaired,
            entries = report.entries,
            "fsck complete"
        );
        Ok(report)
    }

    /// Track a file of `size` bytes at `path` in its parent's record.
    ///
    /// `prior` is the size of the file the backend held before the content
    /// write, or None if there was none. The usage delta comes from it, not
    /// from the record, because usage counts backend objects whether or not
    /// they are tracked.
    ///
    /// Keeps ctime on overwrite and replaces user meta only when `meta` is
    /// given. Applies the usage delta after releasing the directory lock,
    /// then notifies.
    pub(crate) async fn record_file(
        &self,
        path: &str,
        size: u64,
        prior: Option<u64>,
        meta: Option<UserMeta>,
    ) -> VfsResult<FileEntry> {
        let (dir, name) = path::split(path);
        let now = now_millis();
        let created = prior.is_none();
        let delta = match prior {
            Some(prior) => UsageDelta::size(size as i64 - prior as i64),
            None => UsageDelta::new_file(size),
        };

        let entry = self
            .inner
            .meta
            .update(&dir, |record| {
                let mut child = match record.children.remove(&name) {
                    Some(mut child) if child.kind.is_file() => {
                        child.size = Some(size);
                        child.mtime = now;
                        child
                    }
                    _ => ChildMeta::file(size, now),
                };
                if let Some(meta) = meta {
                    child.meta = meta;
                }
                let entry = FileEntry::from_meta(name.clone(), &child);
                record.children.insert(name.clone(), child);
                Ok(entry)
            })
            .await?;

        self.inner.meta.apply_usage_delta(delta).await?;

        let event = if created {
            WatchEvent::create(path, entry.clone())
        } else {
            WatchEvent::update(path, entry.clone())
        };
        self.notify_subscribers(&dir, vec![event]);
        Ok(entry)
    }

    // ========================================================================
    // Notification
    // ========================================================================

    /// Deliver `events` for directory `dir` to local subscribers, then
    /// publish them to other contexts.
    pub fn notify_subscribers(&self, dir: &str, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }
        self.inner.watchers.dispatch(dir, &events, OpSource::Local);
        self.inner.bus.publish(ChangeMessage {
            origin: self.inner.id,
            dir: dir.to_string(),
            events,
        });
    }

    /// Subscribe to events at or below `dir` (a tree path, not mount-relative).
    pub fn watch<F>(&self, dir: &str, callback: F) -> WatchHandle
    where
        F: Fn(&[WatchEvent]) + Send + Sync + 'static,
    {
        self.subscribe(dir, None, Arc::new(callback))
    }

    pub(crate) fn subscribe(
        &self,
        dir: &str,
        file: Option<String>,
        callback: WatchCallback,
    ) -> WatchHandle {
        self.inner.watchers.subscribe(dir, file, callback)
    }

    /// Number of live local subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.watchers.len()
    }
}

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("watchers", &self.inner.watchers)
            .field("bus", &self.inner.bus)
            .finish_non_exhaustive()
    }
}
