//! Shared metadata types for kura.
//!
//! Everything in this crate is plain data: the per-directory sidecar record
//! that kura persists next to real backend entries, the usage counters kept
//! on the tree root, and the projections handed to callers (stat entries and
//! watch events). There is **no I/O here**; `kura-vfs` owns the backend.
//!
//! # Persisted layout
//!
//! ```text
//! <dir>/.kura-meta.json
//! {
//!   "permissions": { "read": true, "write": true },
//!   "children": {
//!     "notes.txt": { "type": "file", "size": 5, "ctime": 1700000000000,
//!                    "mtime": 1700000000000, "meta": {} },
//!     "photos":    { "type": "directory", "ctime": ..., "mtime": ..., "meta": {} }
//!   },
//!   "usage": { "totalSize": 5, "fileCount": 1, "directoryCount": 1 }   // tree root only
//! }
//! ```
//!
//! # Key Types
//!
//! |------------------|------------------------------------------------|
//! | Type             | Purpose                                        |
//! |------------------|------------------------------------------------|
//! | [`DirRecord`]    | One sidecar record per directory               |
//! | [`ChildMeta`]    | Tracked metadata for one named child           |
//! | [`Usage`]        | Cached byte/file/directory counters            |
//! | [`UsageDelta`]   | Signed adjustment applied to [`Usage`]         |
//! | [`FileEntry`]    | Externally visible projection of a child       |
//! | [`WatchEvent`]   | Change notification for one entry              |
//! |------------------|------------------------------------------------|

pub mod entry;
pub mod record;
pub mod usage;

pub use entry::{FileEntry, WatchEvent, WatchEventKind};
pub use record::{ChildMeta, DirRecord, EntryKind, Permissions, PermissionsPatch, UserMeta};
pub use usage::{Usage, UsageDelta};

use std::time::{SystemTime, UNIX_EPOCH};

/// Reserved per-directory sidecar name. Never listed as a user entry.
pub const SIDECAR_NAME: &str = ".kura-meta.json";

/// Default cap on the serialized user metadata of a single entry (64 KiB).
pub const DEFAULT_MAX_META_BYTES: usize = 64 * 1024;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Convert a `SystemTime` into milliseconds since the Unix epoch.
///
/// Times before the epoch clamp to zero.
pub fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
