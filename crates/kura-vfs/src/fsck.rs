//! Metadata repair.
//!
//! Reconciles every sidecar record with what the backend actually holds:
//! untracked objects get a fresh [`ChildMeta`] (ctime and user meta cannot
//! be recovered), wrong sizes and kinds are corrected, stale entries are
//! dropped. A record is written only when something changed.

use std::collections::BTreeMap;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;

use kura_types::{ChildMeta, EntryKind, SIDECAR_NAME, now_millis};

use crate::meta::MetaStore;
use crate::path;
use crate::vfs::{Backend, BackendAttr, VfsResult};

/// Outcome of a repair pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FsckReport {
    /// Directories whose record had to be rewritten.
    pub repaired: usize,
    /// Real entries seen across all directories.
    pub entries: usize,
}

/// Repair `dir` and everything below it.
pub fn repair<'a>(
    backend: &'a dyn Backend,
    meta: &'a MetaStore,
    dir: &'a str,
    report: &'a mut FsckReport,
) -> BoxFuture<'a, VfsResult<()>> {
    async move {
        let mut actual: BTreeMap<String, BackendAttr> = BTreeMap::new();
        for entry in backend.readdir(dir).await? {
            if entry.name == SIDECAR_NAME {
                continue;
            }
            let attr = backend.getattr(&path::join(&[dir, &entry.name])).await?;
            actual.insert(entry.name, attr);
        }
        report.entries += actual.len();

        let changed = {
            let _guard = meta.lock(dir).await;
            let mut record = meta.read_lenient(dir).await?;
            let changed = reconcile(&mut record.children, &actual, now_millis());
            if changed {
                meta.write(dir, &record).await?;
            }
            changed
        };
        if changed {
            report.repaired += 1;
            tracing::debug!(dir = %dir, "repaired sidecar record");
        }

        for (name, attr) in &actual {
            if attr.is_dir() {
                let child = path::join(&[dir, name]);
                repair(backend, meta, &child, report).await?;
            }
        }
        Ok(())
    }
    .boxed()
}

/// Bring `children` in line with `actual`. Returns true if anything changed.
fn reconcile(
    children: &mut BTreeMap<String, ChildMeta>,
    actual: &BTreeMap<String, BackendAttr>,
    now: i64,
) -> bool {
    let before = children.len();
    children.retain(|name, _| actual.contains_key(name));
    let mut changed = children.len() != before;

    for (name, attr) in actual {
        match children.get_mut(name) {
            Some(child) if child.kind != attr.kind => {
                *child = fresh_child(attr, now);
                changed = true;
            }
            Some(child) => {
                if attr.is_file() && child.size != Some(attr.size) {
                    child.size = Some(attr.size);
                    changed = true;
                }
            }
            None => {
                children.insert(name.clone(), fresh_child(attr, now));
                changed = true;
            }
        }
    }
    changed
}

fn fresh_child(attr: &BackendAttr, now: i64) -> ChildMeta {
    match attr.kind {
        EntryKind::File => ChildMeta::file(attr.size, now),
        EntryKind::Directory => ChildMeta::directory(now),
    }
}
