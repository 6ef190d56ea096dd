//! Errors shared by backends and the tree layer.

use std::fmt;
use std::io;
use thiserror::Error;

/// Which directory flag blocked an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => f.write_str("read"),
            Permission::Write => f.write_str("write"),
        }
    }
}

/// Every failure a kura operation can report. Path-carrying variants hold
/// the tree path (or backend path for backend-level failures).
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("entry exists: {0}")]
    AlreadyExists(String),

    /// A directory's flag blocked the operation.
    #[error("{permission} permission denied on {path}")]
    PermissionDenied { path: String, permission: Permission },

    #[error("metadata for {path} is {size} bytes, limit is {limit}")]
    MetadataSizeExceeded {
        path: String,
        size: usize,
        limit: usize,
    },

    #[error("expected a directory: {0}")]
    NotADirectory(String),

    /// Needed a file but found a directory.
    #[error("expected a file: {0}")]
    IsADirectory(String),

    /// Only produced under [`SidecarPolicy::Strict`](crate::SidecarPolicy).
    #[error("corrupt sidecar in {path}: {reason}")]
    CorruptMetadata { path: String, reason: String },

    /// A backend path tried to leave the backend root via `..`.
    #[error("outside backend root: {0}")]
    PathEscapesRoot(String),

    #[error("bad path: {0}")]
    InvalidPath(String),

    #[error("config: {0}")]
    Config(String),

    #[error("sidecar encoding: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification of [`VfsError`] for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsErrorKind {
    NotFound,
    Exists,
    PermissionDenied,
    MetadataSizeExceeded,
    NotDirectory,
    NotFile,
    CorruptMetadata,
    InvalidPath,
    Config,
    Io,
    Other,
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    pub fn permission_denied(path: impl Into<String>, permission: Permission) -> Self {
        Self::PermissionDenied {
            path: path.into(),
            permission,
        }
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Map an I/O error on `path`, keeping the kinds callers match on.
    pub fn from_io(err: io::Error, path: impl Into<String>) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.into()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(path.into()),
            io::ErrorKind::NotADirectory => Self::NotADirectory(path.into()),
            io::ErrorKind::IsADirectory => Self::IsADirectory(path.into()),
            _ => Self::Io(err),
        }
    }

    pub fn kind(&self) -> VfsErrorKind {
        match self {
            Self::NotFound(_) => VfsErrorKind::NotFound,
            Self::AlreadyExists(_) => VfsErrorKind::Exists,
            Self::PermissionDenied { .. } => VfsErrorKind::PermissionDenied,
            Self::MetadataSizeExceeded { .. } => VfsErrorKind::MetadataSizeExceeded,
            Self::NotADirectory(_) => VfsErrorKind::NotDirectory,
            Self::IsADirectory(_) => VfsErrorKind::NotFile,
            Self::CorruptMetadata { .. } => VfsErrorKind::CorruptMetadata,
            Self::PathEscapesRoot(_) | Self::InvalidPath(_) => VfsErrorKind::InvalidPath,
            Self::Config(_) => VfsErrorKind::Config,
            Self::Serialization(_) | Self::Io(_) => VfsErrorKind::Io,
            Self::Other(_) => VfsErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<VfsError> for io::Error {
    fn from(err: VfsError) -> Self {
        let kind = match err.kind() {
            VfsErrorKind::NotFound => io::ErrorKind::NotFound,
            VfsErrorKind::Exists => io::ErrorKind::AlreadyExists,
            VfsErrorKind::PermissionDenied => io::ErrorKind::PermissionDenied,
            VfsErrorKind::NotDirectory => io::ErrorKind::NotADirectory,
            VfsErrorKind::NotFile => io::ErrorKind::IsADirectory,
            VfsErrorKind::CorruptMetadata => io::ErrorKind::InvalidData,
            VfsErrorKind::MetadataSizeExceeded
            | VfsErrorKind::InvalidPath
            | VfsErrorKind::Config => io::ErrorKind::InvalidInput,
            VfsErrorKind::Io => match err {
                VfsError::Io(inner) => return inner,
                _ => io::ErrorKind::InvalidData,
            },
            VfsErrorKind::Other => io::ErrorKind::Other,
        };
        io::Error::new(kind, err.to_string())
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_keeps_kinds() {
        let err = VfsError::from_io(io::Error::from(io::ErrorKind::NotFound), "/a");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no such entry: /a");

        let err = VfsError::from_io(io::Error::from(io::ErrorKind::AlreadyExists), "/b");
        assert_eq!(err.kind(), VfsErrorKind::Exists);

        let err = VfsError::from_io(io::Error::other("disk on fire"), "/c");
        assert_eq!(err.kind(), VfsErrorKind::Io);
    }

    #[test]
    fn test_permission_denied_names_flag() {
        let err = VfsError::permission_denied("/locked/x", Permission::Write);
        assert_eq!(err.kind(), VfsErrorKind::PermissionDenied);
        assert!(err.to_string().contains("write"));

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::PermissionDenied);
    }
}
