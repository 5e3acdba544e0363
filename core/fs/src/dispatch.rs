//! FUSE dispatch onto the connector's node tree.
//!
//! Implements the `fuser::Filesystem` trait, translating kernel
//! requests into node operations: lookups and listings walk the inode
//! graph, reads go through the open-handle table, and the writable
//! surface (mkdir/symlink/unlink) is forwarded to the owning node.
//! Everything else falls through to the fuser defaults, which keeps
//! the mount read-only.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use tracing::debug;

use gitmount_common::{Error, Result};
use gitmount_store::mode::{S_IFDIR, S_IFLNK, S_IFMT};

use crate::connector::{Connector, Inode};
use crate::node::{FileHandle, NodeAttr};

/// Inode number reported for directory entries that have no inode of
/// their own (dynamic listings, `.` and `..` placeholders).
const UNKNOWN_INO: u64 = u64::MAX;

/// The FUSE request dispatcher.
pub struct Dispatcher {
    conn: Arc<Connector>,
    handles: Mutex<HashMap<u64, Arc<dyn FileHandle>>>,
    next_fh: AtomicU64,
    uid: u32,
    gid: u32,
    epoch: SystemTime,
}

impl Dispatcher {
    pub fn new(conn: Arc<Connector>) -> Self {
        Self {
            conn,
            handles: Mutex::new(HashMap::new()),
            next_fh: AtomicU64::new(1),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            epoch: SystemTime::now(),
        }
    }

    fn kind_of(mode: u32) -> FileType {
        match mode & S_IFMT {
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            _ => FileType::RegularFile,
        }
    }

    /// Kernel attributes for a node. Git content has no meaningful
    /// timestamps; the mount epoch stands in for all of them.
    fn make_attr(&self, ino: u64, attr: &NodeAttr) -> FileAttr {
        FileAttr {
            ino,
            size: attr.size,
            blocks: (attr.size + 511) / 512,
            atime: self.epoch,
            mtime: self.epoch,
            ctime: self.epoch,
            crtime: self.epoch,
            kind: Self::kind_of(attr.mode),
            perm: (attr.mode & 0o7777) as u16,
            nlink: if attr.is_dir() { 2 } else { 1 },
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    /// Find the named child, consulting the node's dynamic lookup and
    /// caching the result in the inode graph.
    fn child(&self, parent: &Arc<Inode>, name: &str) -> Result<Option<Arc<Inode>>> {
        if let Some(child) = parent.child(name) {
            return Ok(Some(child));
        }
        match parent.node().lookup(name)? {
            Some(node) => Ok(Some(self.conn.add_child(parent, name, node))),
            None => Ok(None),
        }
    }
}

impl Filesystem for Dispatcher {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = match name.to_str() {
            Some(name) => name,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        debug!(parent, name, "lookup");

        let parent = match self.conn.get(parent) {
            Some(inode) => inode,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let child = match self.child(&parent, name) {
            Ok(Some(child)) => child,
            Ok(None) => {
                reply.error(libc::ENOENT);
                return;
            }
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        match child.node().attr() {
            Ok(attr) => {
                let fuse_attr = self.make_attr(child.ino(), &attr);
                reply.entry(&child.options().entry_timeout, &fuse_attr, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!(ino, "getattr");
        let inode = match self.conn.get(ino) {
            Some(inode) => inode,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match inode.node().attr() {
            Ok(attr) => {
                let fuse_attr = self.make_attr(ino, &attr);
                reply.attr(&inode.options().attr_timeout, &fuse_attr);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        debug!(ino, "readlink");
        let inode = match self.conn.get(ino) {
            Some(inode) => inode,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match inode.node().readlink() {
            Ok(target) => reply.data(&target),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!(ino, flags, "open");
        let inode = match self.conn.get(ino) {
            Some(inode) => inode,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match inode.node().open(flags) {
            Ok(handle) => {
                let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
                self.handles.lock().unwrap().insert(fh, handle);
                reply.opened(fh, 0);
            }
            Err(e) => reply.error(e.errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(fh, offset, size, "read");
        let handle = match self.handles.lock().unwrap().get(&fh) {
            Some(handle) => handle.clone(),
            None => {
                reply.error(libc::EBADF);
                return;
            }
        };
        match handle.read(offset.max(0) as u64, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!(fh, "release");
        self.handles.lock().unwrap().remove(&fh);
        reply.ok();
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!(ino, offset, "readdir");
        let inode = match self.conn.get(ino) {
            Some(inode) => inode,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let parent_ino = inode.parent().map(|p| p.ino()).unwrap_or(ino);
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];

        match inode.node().entries() {
            Ok(Some(dynamic)) => {
                for (name, attr) in dynamic {
                    let child_ino = inode
                        .child(&name)
                        .map(|child| child.ino())
                        .unwrap_or(UNKNOWN_INO);
                    entries.push((child_ino, Self::kind_of(attr.mode), name));
                }
            }
            Ok(None) => {
                // Static nodes: the inode children, in attach order,
                // which for git trees equals on-disk tree order.
                for (name, child) in inode.children() {
                    let kind = child
                        .node()
                        .attr()
                        .map(|attr| Self::kind_of(attr.mode))
                        .unwrap_or(FileType::RegularFile);
                    entries.push((child.ino(), kind, name));
                }
            }
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        }

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset.max(0) as usize)
        {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match name.to_str() {
            Some(name) => name,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        debug!(parent, name, "mkdir");

        let parent = match self.conn.get(parent) {
            Some(inode) => inode,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match parent.node().mkdir(&self.conn, &parent, name) {
            Ok(child) => match child.node().attr() {
                Ok(attr) => {
                    let fuse_attr = self.make_attr(child.ino(), &attr);
                    reply.entry(&child.options().entry_timeout, &fuse_attr, 0);
                }
                Err(e) => reply.error(e.errno()),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: ReplyEntry,
    ) {
        let (name, target) = match (name.to_str(), link.to_str()) {
            (Some(name), Some(target)) => (name, target),
            _ => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        debug!(parent, name, target, "symlink");

        let parent = match self.conn.get(parent) {
            Some(inode) => inode,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match parent.node().symlink(&self.conn, &parent, name, target) {
            Ok(child) => match child.node().attr() {
                Ok(attr) => {
                    let fuse_attr = self.make_attr(child.ino(), &attr);
                    reply.entry(&child.options().entry_timeout, &fuse_attr, 0);
                }
                Err(e) => reply.error(e.errno()),
            },
            Err(e) => reply.error(e.errno()),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = match name.to_str() {
            Some(name) => name,
            None => {
                reply.error(libc::EINVAL);
                return;
            }
        };
        debug!(parent, name, "unlink");

        let parent = match self.conn.get(parent) {
            Some(inode) => inode,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };
        match parent.node().unlink(&self.conn, &parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.errno()),
        }
    }
}

/// Whether the host can serve FUSE mounts at all.
pub fn is_fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }

    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists()
            || Path::new("/Library/Filesystems/osxfuse.fs").exists()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Bind the connector at `mountpoint` and serve until unmounted.
pub fn serve(conn: Arc<Connector>, mountpoint: &Path) -> Result<()> {
    if conn.root().is_none() {
        return Err(Error::InvalidArgument(
            "connector has no mounted root".to_string(),
        ));
    }
    let options = [
        MountOption::FSName("gitmount".to_string()),
        MountOption::Subtype("gitmount".to_string()),
        MountOption::DefaultPermissions,
    ];
    fuser::mount2(Dispatcher::new(conn), mountpoint, &options)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MountOptions;
    use crate::node::DirNode;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Dispatcher::kind_of(0o040755), FileType::Directory);
        assert_eq!(Dispatcher::kind_of(0o120777), FileType::Symlink);
        assert_eq!(Dispatcher::kind_of(0o100644), FileType::RegularFile);
    }

    #[test]
    fn test_make_attr_preserves_mode_and_size() {
        let conn = Connector::new(MountOptions::default());
        conn.mount_root(Arc::new(DirNode)).unwrap();
        let dispatcher = Dispatcher::new(conn);

        let attr = dispatcher.make_attr(7, &NodeAttr::regular(0o100755, 1234));
        assert_eq!(attr.ino, 7);
        assert_eq!(attr.size, 1234);
        assert_eq!(attr.blocks, 3);
        assert_eq!(attr.perm, 0o755);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.nlink, 1);

        let dir = dispatcher.make_attr(1, &NodeAttr::dir());
        assert_eq!(dir.kind, FileType::Directory);
        assert_eq!(dir.nlink, 2);
    }
}
