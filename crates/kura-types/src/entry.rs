//! Caller-facing projections: stat entries and watch events.

use serde::{Deserialize, Serialize};

use crate::record::{ChildMeta, EntryKind, UserMeta};

/// Externally visible view of one entry (a [`ChildMeta`] plus its name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub ctime: i64,
    pub mtime: i64,
    #[serde(default)]
    pub meta: UserMeta,
}

impl FileEntry {
    /// Project a tracked child.
    pub fn from_meta(name: impl Into<String>, meta: &ChildMeta) -> Self {
        Self {
            name: name.into(),
            kind: meta.kind,
            size: meta.byte_size(),
            ctime: meta.ctime,
            mtime: meta.mtime,
            meta: meta.meta.clone(),
        }
    }

    /// Entry for an object the backend has but metadata does not.
    pub fn untracked(name: impl Into<String>, kind: EntryKind, size: u64, now: i64) -> Self {
        Self {
            name: name.into(),
            kind,
            size: if kind.is_file() { size } else { 0 },
            ctime: now,
            mtime: now,
            meta: UserMeta::new(),
        }
    }

    /// Zero-valued placeholder used when notifying about an untracked object.
    pub fn zeroed(name: impl Into<String>, kind: EntryKind) -> Self {
        Self::untracked(name, kind, 0, 0)
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// What happened to an entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum WatchEventKind {
    Create,
    Update,
    Delete,
}

/// A change notification for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: WatchEventKind,
    /// Entry name within its directory.
    pub name: String,
    /// Full path of the affected entry.
    pub path: String,
    pub entry: FileEntry,
}

impl WatchEvent {
    /// Build an event; `name` is taken from `entry`.
    pub fn new(kind: WatchEventKind, path: impl Into<String>, entry: FileEntry) -> Self {
        Self {
            kind,
            name: entry.name.clone(),
            path: path.into(),
            entry,
        }
    }

    pub fn create(path: impl Into<String>, entry: FileEntry) -> Self {
        Self::new(WatchEventKind::Create, path, entry)
    }

    pub fn update(path: impl Into<String>, entry: FileEntry) -> Self {
        Self::new(WatchEventKind::Update, path, entry)
    }

    pub fn delete(path: impl Into<String>, entry: FileEntry) -> Self {
        Self::new(WatchEventKind::Delete, path, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_meta() {
        let mut meta = ChildMeta::file(42, 7);
        meta.meta.insert("tag".into(), serde_json::json!("x"));
        let entry = FileEntry::from_meta("a.bin", &meta);
        assert_eq!(entry.size, 42);
        assert_eq!(entry.ctime, 7);
        assert_eq!(entry.meta["tag"], "x");
        assert!(entry.is_file());
    }

    #[test]
    fn test_untracked_directory_has_no_size() {
        let entry = FileEntry::untracked("d", EntryKind::Directory, 4096, 1);
        assert_eq!(entry.size, 0);
        assert!(entry.is_dir());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = WatchEvent::delete("/a/b.txt", FileEntry::zeroed("b.txt", EntryKind::File));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "delete");
        assert_eq!(value["name"], "b.txt");
        assert_eq!(value["path"], "/a/b.txt");
        assert_eq!(value["entry"]["mtime"], 0);
    }
}
