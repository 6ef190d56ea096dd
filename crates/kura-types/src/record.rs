//! Sidecar record types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::usage::Usage;

/// User-attached metadata for one entry.
pub type UserMeta = serde_json::Map<String, serde_json::Value>;

/// Kind of a tracked entry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl EntryKind {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Directory-level access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Reads (file contents, listings, stat, meta) are allowed.
    pub read: bool,
    /// Writes and structural changes are allowed.
    pub write: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            read: true,
            write: true,
        }
    }
}

impl Permissions {
    /// Read-only flags.
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }
}

/// Partial permission update; `None` leaves a flag untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<bool>,
}

impl PermissionsPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the read flag.
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self
    }

    /// Set the write flag.
    pub fn with_write(mut self, write: bool) -> Self {
        self.write = Some(write);
        self
    }

    /// Merge this patch into `perms`.
    pub fn apply(&self, perms: &mut Permissions) {
        if let Some(read) = self.read {
            perms.read = read;
        }
        if let Some(write) = self.write {
            perms.write = write;
        }
    }
}

/// Metadata for one tracked child of a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildMeta {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Byte size; files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Creation time (ms since epoch).
    pub ctime: i64,
    /// Last modification time (ms since epoch).
    pub mtime: i64,
    #[serde(default)]
    pub meta: UserMeta,
}

impl ChildMeta {
    /// Metadata for a freshly created file.
    pub fn file(size: u64, now: i64) -> Self {
        Self {
            kind: EntryKind::File,
            size: Some(size),
            ctime: now,
            mtime: now,
            meta: UserMeta::new(),
        }
    }

    /// Metadata for a freshly created directory.
    pub fn directory(now: i64) -> Self {
        Self {
            kind: EntryKind::Directory,
            size: None,
            ctime: now,
            mtime: now,
            meta: UserMeta::new(),
        }
    }

    /// Effective byte size (always zero for directories).
    pub fn byte_size(&self) -> u64 {
        match self.kind {
            EntryKind::File => self.size.unwrap_or(0),
            EntryKind::Directory => 0,
        }
    }
}

/// The sidecar record persisted inside every directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirRecord {
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default)]
    pub children: BTreeMap<String, ChildMeta>,
    /// Cached counters; present only on the tree root's record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl DirRecord {
    /// Look up a tracked child.
    pub fn child(&self, name: &str) -> Option<&ChildMeta> {
        self.children.get(name)
    }

    /// Returns true if `name` has a metadata entry.
    pub fn tracks(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }
}
