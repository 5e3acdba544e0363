//! The node abstraction the connector dispatches onto.
//!
//! A node answers attributes and content; the connector owns the inode
//! graph the nodes are installed into. Nodes are immutable once built,
//! except for the narrow writable surface (`mkdir`/`symlink`/`unlink`)
//! that individual node types opt into.

use std::any::Any;
use std::sync::Arc;

use gitmount_common::{Error, Result};
use gitmount_store::mode::{S_IFDIR, S_IFLNK, S_IFMT};

use crate::connector::{Connector, Inode};

/// Attributes a node reports to the kernel.
///
/// `mode` carries the full POSIX mode including the file-type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub mode: u32,
    pub size: u64,
}

impl NodeAttr {
    /// Directory with default read/execute permissions.
    pub fn dir() -> Self {
        Self {
            mode: S_IFDIR | 0o755,
            size: 0,
        }
    }

    /// Symlink attributes; target length is not reported.
    pub fn symlink() -> Self {
        Self {
            mode: S_IFLNK | 0o777,
            size: 0,
        }
    }

    /// Regular file with the given mode and size.
    pub fn regular(mode: u32, size: u64) -> Self {
        Self { mode, size }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }
}

/// An open file handle serving `read(2)`.
pub trait FileHandle: Send + Sync {
    /// Read up to `size` bytes at `offset`. Short reads at end of file
    /// return the remaining bytes; reads past the end return empty.
    fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>>;
}

/// A filesystem node: one git object, config entry, or host path.
///
/// Static nodes (the git-backed ones) materialize their children into
/// the inode graph at mount time and rely on the defaults for `lookup`
/// and `entries`; dynamic providers (loopback) override both.
pub trait Node: Send + Sync + 'static {
    /// Current attributes.
    fn attr(&self) -> Result<NodeAttr>;

    /// Downcast support for node-type checks at the writable surface.
    fn as_any(&self) -> &dyn Any;

    /// Symlink target bytes.
    fn readlink(&self) -> Result<Vec<u8>> {
        Err(Error::InvalidArgument("not a symlink".to_string()))
    }

    /// Open the node for reading. Any write flag is refused by the
    /// implementations; directories never reach this.
    fn open(&self, _flags: i32) -> Result<Arc<dyn FileHandle>> {
        Err(Error::NotSupported("open".to_string()))
    }

    /// Dynamic child lookup. `Ok(None)` means the inode children are
    /// authoritative.
    fn lookup(&self, _name: &str) -> Result<Option<Arc<dyn Node>>> {
        Ok(None)
    }

    /// Dynamic directory listing. `Ok(None)` means the inode children
    /// are authoritative.
    fn entries(&self) -> Result<Option<Vec<(String, NodeAttr)>>> {
        Ok(None)
    }

    /// Create a directory child.
    fn mkdir(
        &self,
        _conn: &Arc<Connector>,
        _self_inode: &Arc<Inode>,
        _name: &str,
    ) -> Result<Arc<Inode>> {
        Err(Error::PermissionDenied("read-only directory".to_string()))
    }

    /// Create a symlink child.
    fn symlink(
        &self,
        _conn: &Arc<Connector>,
        _self_inode: &Arc<Inode>,
        _name: &str,
        _target: &str,
    ) -> Result<Arc<Inode>> {
        Err(Error::PermissionDenied("read-only directory".to_string()))
    }

    /// Remove a child.
    fn unlink(&self, _conn: &Arc<Connector>, _self_inode: &Arc<Inode>, _name: &str) -> Result<()> {
        Err(Error::PermissionDenied("read-only directory".to_string()))
    }

    /// Invoked by the connector once the node is installed as a mount
    /// root; descendants are materialized here.
    fn on_mount(&self, _conn: &Arc<Connector>, _self_inode: &Arc<Inode>) -> Result<()> {
        Ok(())
    }
}

/// A plain empty directory: the real-side directories of the config
/// tree and the intermediate path components of a manifest workspace.
pub struct DirNode;

impl Node for DirNode {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::dir())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
