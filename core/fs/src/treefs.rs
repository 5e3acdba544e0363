//! Materialization of a git tree as a filesystem subtree.
//!
//! A `TreeFs` pins one repository handle, the blob-access options, and
//! the per-mount staging directory; every node of the subtree shares it
//! through an `Arc`, so the repository stays open for as long as any
//! node may still be read. Children are materialized eagerly in the
//! connector's on-mount callback and never change afterwards, except
//! for ephemeral user-created symlinks.

use std::any::Any;
use std::sync::Arc;

use git2::Oid;
use tempfile::TempDir;

use gitmount_common::{Error, Result};
use gitmount_store::{classify, EntryClass, GitStore, ObjectKind};

use crate::blob::{stage_blob, BlobOptions, HandleCtor, LazyFile, LoopbackFile, MemoryFile};
use crate::connector::{Connector, Inode};
use crate::node::{FileHandle, Node, NodeAttr};

/// Shared state of one mounted tree.
pub struct TreeFs {
    store: Arc<GitStore>,
    options: BlobOptions,
    staging: TempDir,
}

impl TreeFs {
    /// Build the root node for `treeish` in `store`.
    ///
    /// A commit dereferences to its tree; a tree is used directly. The
    /// subtree below the root is materialized once the root is mounted.
    ///
    /// # Errors
    /// - `RevisionNotFound` if the treeish does not resolve.
    /// - `UnsupportedObjectType` for blobs and anything else.
    pub fn new_root(
        store: Arc<GitStore>,
        treeish: &str,
        options: BlobOptions,
    ) -> Result<Arc<TreeNode>> {
        let resolved = store.resolve(treeish)?;
        let tree_oid = match resolved.kind {
            ObjectKind::Commit => store.commit_tree_oid(resolved.oid)?,
            ObjectKind::Tree => resolved.oid,
            ObjectKind::Blob => {
                return Err(Error::UnsupportedObjectType(format!(
                    "{}: blob",
                    treeish
                )))
            }
        };

        let staging = tempfile::Builder::new().prefix("gitmount").tempdir()?;
        let fs = Arc::new(TreeFs {
            store,
            options,
            staging,
        });
        Ok(Arc::new(TreeNode { fs, oid: tree_oid }))
    }

    /// The staging directory for on-disk blob copies.
    pub fn staging_path(&self) -> &std::path::Path {
        self.staging.path()
    }

    fn materialize(
        self: &Arc<Self>,
        conn: &Arc<Connector>,
        inode: &Arc<Inode>,
        oid: Oid,
    ) -> Result<()> {
        for entry in self.store.tree_entries(oid)? {
            match classify(entry.mode)? {
                EntryClass::Directory => {
                    let child = conn.add_child(
                        inode,
                        &entry.name,
                        Arc::new(TreeNode {
                            fs: self.clone(),
                            oid: entry.oid,
                        }),
                    );
                    self.materialize(conn, &child, entry.oid)?;
                }
                EntryClass::Symlink => {
                    let target = self.store.blob_bytes(entry.oid)?;
                    conn.add_child(
                        inode,
                        &entry.name,
                        Arc::new(LinkNode {
                            oid: entry.oid,
                            target,
                        }),
                    );
                }
                EntryClass::Regular => {
                    let size = self.store.blob_size(entry.oid)?;
                    conn.add_child(
                        inode,
                        &entry.name,
                        Arc::new(BlobNode {
                            fs: self.clone(),
                            oid: entry.oid,
                            mode: entry.mode,
                            size,
                        }),
                    );
                }
            }
        }
        Ok(())
    }
}

/// A git tree object as a directory.
pub struct TreeNode {
    fs: Arc<TreeFs>,
    oid: Oid,
}

impl TreeNode {
    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn fs(&self) -> &Arc<TreeFs> {
        &self.fs
    }
}

impl Node for TreeNode {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::dir())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn on_mount(&self, conn: &Arc<Connector>, self_inode: &Arc<Inode>) -> Result<()> {
        self.fs.materialize(conn, self_inode, self.oid)
    }

    fn symlink(
        &self,
        conn: &Arc<Connector>,
        self_inode: &Arc<Inode>,
        name: &str,
        target: &str,
    ) -> Result<Arc<Inode>> {
        Ok(conn.add_child(
            self_inode,
            name,
            Arc::new(MutableLink {
                target: target.as_bytes().to_vec(),
            }),
        ))
    }

    fn unlink(&self, conn: &Arc<Connector>, self_inode: &Arc<Inode>, name: &str) -> Result<()> {
        let child = self_inode
            .child(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if child.node().as_any().downcast_ref::<MutableLink>().is_none() {
            return Err(Error::PermissionDenied(format!(
                "{} is git-backed",
                name
            )));
        }
        conn.remove_child(self_inode, name);
        Ok(())
    }
}

/// A git blob as a regular file. Content is fetched on demand through
/// the configured access strategy; only the size is known up front.
pub struct BlobNode {
    fs: Arc<TreeFs>,
    oid: Oid,
    mode: u32,
    size: u64,
}

impl BlobNode {
    pub fn oid(&self) -> Oid {
        self.oid
    }
}

impl Node for BlobNode {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::regular(self.mode, self.size))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn open(&self, flags: i32) -> Result<Arc<dyn FileHandle>> {
        if flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            return Err(Error::PermissionDenied("git blobs are read-only".to_string()));
        }

        let fs = self.fs.clone();
        let oid = self.oid;
        let ctor: HandleCtor = if fs.options.disk {
            Box::new(move || {
                let path = stage_blob(fs.staging.path(), &fs.store, oid)?;
                Ok(Arc::new(LoopbackFile::open(&path)?) as Arc<dyn FileHandle>)
            })
        } else {
            Box::new(move || {
                Ok(Arc::new(MemoryFile::new(fs.store.blob_bytes(oid)?)) as Arc<dyn FileHandle>)
            })
        };

        if self.fs.options.lazy {
            Ok(Arc::new(LazyFile::new(ctor)))
        } else {
            ctor()
        }
    }
}

/// A git blob used as a symlink; the target is small and read often,
/// so it is loaded eagerly and cached.
pub struct LinkNode {
    oid: Oid,
    target: Vec<u8>,
}

impl LinkNode {
    pub fn oid(&self) -> Oid {
        self.oid
    }
}

impl Node for LinkNode {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::symlink())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn readlink(&self) -> Result<Vec<u8>> {
        Ok(self.target.clone())
    }
}

/// An ephemeral symlink created by `symlink(2)`. Never persisted back
/// to git; removable by `unlink(2)`.
pub struct MutableLink {
    target: Vec<u8>,
}

impl Node for MutableLink {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::symlink())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn readlink(&self) -> Result<Vec<u8>> {
        Ok(self.target.clone())
    }
}
