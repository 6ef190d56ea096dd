//! Raw storage abstraction.
//!
//! Key components:
//!
//! - [`Backend`] - Core trait for the hierarchical object store
//! - [`WriteHandle`] - Sequential writer with replace-on-close semantics
//! - [`MemoryBackend`] - In-memory tree (tests, scratch trees)
//! - [`LocalBackend`] - A real directory on disk (with path security)
//!
//! ## Design Decisions
//!
//! - **Path-based**: operations take `/`-separated paths relative to the
//!   backend root. No handles survive between calls except write handles.
//! - **Dumb storage**: backends know files and directories only. Permissions,
//!   timestamps beyond mtime, usage and notifications are layered on top.

pub mod backends;
mod error;
mod ops;
mod types;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{Permission, VfsError, VfsErrorKind, VfsResult};
pub use ops::{Backend, WriteHandle};
pub use types::{BackendAttr, BackendEntry, BackendKind};
