//! Backend-facing types.
//!
//! These describe what a raw backend knows about its objects: a kind, a byte
//! size and a modification time. Everything else (ctime, user meta,
//! permissions) lives in the sidecar record layered on top.

use kura_types::{EntryKind, FileEntry};

/// Object kind as reported by a backend.
pub type BackendKind = EntryKind;

/// Attributes of one backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendAttr {
    pub kind: BackendKind,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Last modification time, ms since epoch.
    pub mtime_ms: i64,
}

impl BackendAttr {
    /// Attributes for a file.
    pub fn file(size: u64, mtime_ms: i64) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            mtime_ms,
        }
    }

    /// Attributes for a directory.
    pub fn directory(mtime_ms: i64) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            mtime_ms,
        }
    }

    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Entry for an object with no sidecar metadata, stamped with `now`.
    pub fn to_untracked_entry(&self, name: impl Into<String>, now: i64) -> FileEntry {
        FileEntry::untracked(name, self.kind, self.size, now)
    }
}

/// Directory entry as listed by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEntry {
    /// Entry name (not full path).
    pub name: String,
    pub kind: BackendKind,
}

impl BackendEntry {
    /// Create a new directory entry.
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Create a file entry.
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, EntryKind::File)
    }

    /// Create a directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, EntryKind::Directory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_constructors() {
        let file = BackendAttr::file(1024, 5);
        assert!(file.is_file());
        assert_eq!(file.size, 1024);

        let dir = BackendAttr::directory(5);
        assert!(dir.is_dir());
        assert_eq!(dir.size, 0);
    }

    #[test]
    fn test_untracked_entry_uses_now() {
        let entry = BackendAttr::file(9, 1).to_untracked_entry("x", 77);
        assert_eq!(entry.size, 9);
        assert_eq!(entry.ctime, 77);
        assert_eq!(entry.mtime, 77);
        assert!(entry.meta.is_empty());
    }

    #[test]
    fn test_dir_entry() {
        let file = BackendEntry::file("test.txt");
        assert_eq!(file.name, "test.txt");
        assert!(file.kind.is_file());
        assert!(BackendEntry::directory("sub").kind.is_dir());
    }
}
