//! # kura-vfs
//!
//! Metadata-tracking virtual filesystem over an opaque backend.
//!
//! The backend only knows directories and files. kura keeps everything else
//! (timestamps, sizes, user metadata, permission flags) in a sidecar record
//! inside each directory, keeps usage counters on the tree root, and tells
//! subscribers about every change, in this process and in other contexts
//! sharing the same tree key.
//!
//! ```text
//! Root ──┬── MetaStore ── DirLocks
//!        ├── WatchRegistry ◄── ChangeBus (other contexts)
//!        └── Arc<dyn Backend>
//!   │
//!   └── Mount (base path) ── Batch, WriteSink, ReadStream
//! ```
//!
//! # Key Types
//!
//! |------------------|------------------------------------------------|
//! | Type             | Purpose                                        |
//! |------------------|------------------------------------------------|
//! | [`Root`]         | Tree lifecycle, usage, fsck, notification      |
//! | [`Mount`]        | Filesystem operations scoped to a base path    |
//! | [`Batch`]        | Multi-operation scope over a mount             |
//! | [`WriteSink`]    | Streaming write tracked on close               |
//! | [`Backend`]      | Storage collaborator (memory, local disk)      |
//! | [`RootConfig`]   | Tree key, repair and sidecar policy            |
//! |------------------|------------------------------------------------|

pub mod batch;
pub mod config;
pub mod flows;
pub mod fsck;
pub mod locks;
pub mod meta;
pub mod mount;
pub mod path;
pub mod root;
pub mod sink;
pub mod usage;
pub mod vfs;

pub use batch::Batch;
pub use config::{RootConfig, SidecarPolicy};
pub use flows::{ChangeBus, ChangeMessage, OpSource, WatchHandle, WatchRegistry};
pub use fsck::FsckReport;
pub use locks::{DirGuard, DirLocks};
pub use meta::MetaStore;
pub use mount::{MkdirOptions, Mount, RemoveOptions, WriteOptions};
pub use root::Root;
pub use sink::{ReadStream, WriteSink};
pub use usage::UsageOptions;
pub use vfs::{
    Backend, BackendAttr, BackendEntry, BackendKind, LocalBackend, MemoryBackend, Permission,
    VfsError, VfsErrorKind, VfsResult, WriteHandle,
};

pub use kura_types;
pub use kura_types::{
    ChildMeta, DirRecord, EntryKind, FileEntry, Permissions, PermissionsPatch, SIDECAR_NAME, Usage,
    UsageDelta, UserMeta, WatchEvent, WatchEventKind,
};
