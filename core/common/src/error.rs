//! Common error types for gitmount.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for gitmount operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A revision expression did not resolve.
    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    /// A treeish resolved to an object that is neither a commit nor a tree.
    #[error("unsupported object type: {0}")]
    UnsupportedObjectType(String),

    /// A tree entry mode outside the directory/symlink/regular classes.
    #[error("unsupported tree entry mode {0:o}")]
    UnsupportedEntryMode(u32),

    /// A git repository could not be opened.
    #[error("failed to open repository {path}: {reason}")]
    RepositoryOpen { path: PathBuf, reason: String },

    /// Any other git object-store failure.
    #[error("git error: {0}")]
    Git(String),

    /// Manifest XML could not be decoded.
    #[error("manifest parse error: {0}")]
    Manifest(String),

    /// Invalid input provided, typically at the config/ interface.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path component that must be a directory is not one.
    #[error("not a directory: {0}")]
    NotDirectory(String),

    /// Operation refused on read-only content.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Operation the node does not implement.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// POSIX errno for the FUSE reply path.
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) | Error::Manifest(_) => libc::EINVAL,
            Error::NotFound(_) | Error::RevisionNotFound(_) => libc::ENOENT,
            Error::NotDirectory(_) => libc::ENOTDIR,
            Error::PermissionDenied(_) => libc::EPERM,
            Error::NotSupported(_) => libc::ENOSYS,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            _ => libc::EIO,
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
