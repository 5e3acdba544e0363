//! Mount composition driven by a writable `config/` subtree.
//!
//! The multi root exposes one child, `config/`. Directories created
//! there are mirrored into a parallel real subtree under the root, and
//! symlinks written there splice-mount filesystems under the mirrored
//! directory: `PATH` mounts a host directory via loopback, and
//! `PATH:TREEISH` mounts a git tree. Removing the symlink unmounts.
//!
//! Each config node holds a non-owning back-reference to the real node
//! it shadows; the real side never points back.

use std::any::Any;
use std::fs;
use std::sync::{Arc, Weak};

use tracing::{info, warn};

use gitmount_common::{Error, MountUri, Result};
use gitmount_store::GitStore;

use crate::blob::BlobOptions;
use crate::connector::{Connector, Inode, MountOptions};
use crate::loopback::LoopbackNode;
use crate::node::{DirNode, Node, NodeAttr};
use crate::treefs::TreeFs;

struct MultiFs {
    options: BlobOptions,
}

/// Root node of the composable multi-repository filesystem.
pub struct MultiRoot {
    fs: Arc<MultiFs>,
}

impl MultiRoot {
    pub fn new(options: BlobOptions) -> Arc<Self> {
        Arc::new(Self {
            fs: Arc::new(MultiFs { options }),
        })
    }
}

impl Node for MultiRoot {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::dir())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn on_mount(&self, conn: &Arc<Connector>, self_inode: &Arc<Inode>) -> Result<()> {
        conn.add_child(
            self_inode,
            "config",
            Arc::new(ConfigNode {
                fs: self.fs.clone(),
                corresponding: Arc::downgrade(self_inode),
            }),
        );
        Ok(())
    }
}

/// A directory in the `config/` subtree, shadowing a real directory.
pub struct ConfigNode {
    fs: Arc<MultiFs>,
    // Real node this config node drives; non-owning.
    corresponding: Weak<Inode>,
}

impl ConfigNode {
    fn corresponding(&self) -> Result<Arc<Inode>> {
        self.corresponding
            .upgrade()
            .ok_or_else(|| Error::NotFound("corresponding directory is gone".to_string()))
    }
}

impl Node for ConfigNode {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::dir())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mkdir(
        &self,
        conn: &Arc<Connector>,
        self_inode: &Arc<Inode>,
        name: &str,
    ) -> Result<Arc<Inode>> {
        let corresponding = self.corresponding()?;
        let real = conn.add_child(&corresponding, name, Arc::new(DirNode));
        Ok(conn.add_child(
            self_inode,
            name,
            Arc::new(ConfigNode {
                fs: self.fs.clone(),
                corresponding: Arc::downgrade(&real),
            }),
        ))
    }

    fn symlink(
        &self,
        conn: &Arc<Connector>,
        self_inode: &Arc<Inode>,
        name: &str,
        target: &str,
    ) -> Result<Arc<Inode>> {
        let uri = MountUri::parse(target)?;

        let meta = fs::symlink_metadata(uri.dir())?;
        if !meta.is_dir() {
            return Err(Error::NotDirectory(uri.dir().display().to_string()));
        }

        let (root, options): (Arc<dyn Node>, Option<MountOptions>) = match &uri {
            // Host directories are live; keep the kernel caches short.
            MountUri::Loopback(dir) => (
                Arc::new(LoopbackNode::new(dir)),
                Some(MountOptions::default()),
            ),
            MountUri::Git { repo, treeish } => {
                let store = Arc::new(GitStore::open(repo.clone())?);
                let root = TreeFs::new_root(store, treeish, self.fs.options)?;
                // Tree content is immutable for the mount's lifetime.
                (root, Some(MountOptions::hour()))
            }
        };

        let corresponding = self.corresponding()?;
        conn.mount(&corresponding, name, root, options)?;
        info!(name, source = %uri, "mounted");

        Ok(conn.add_child(
            self_inode,
            name,
            Arc::new(MountLink {
                content: target.to_string(),
            }),
        ))
    }

    fn unlink(&self, conn: &Arc<Connector>, self_inode: &Arc<Inode>, name: &str) -> Result<()> {
        let link = self_inode
            .child(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        if link.node().as_any().downcast_ref::<MountLink>().is_none() {
            warn!(name, "removing a config entry that is not a mount link");
            return Err(Error::InvalidArgument(format!(
                "{} is not a mount link",
                name
            )));
        }

        let corresponding = self.corresponding()?;
        let real = corresponding.child(name).ok_or_else(|| {
            Error::InvalidArgument(format!("no mounted filesystem under {}", name))
        })?;

        // Config link removal happens only after a successful unmount,
        // so the user can retry on failure.
        conn.unmount(&real)?;
        conn.remove_child(self_inode, name);
        info!(name, "unmounted");
        Ok(())
    }
}

/// Config-side record of a mount: a read-only symlink whose target is
/// the URI that was mounted.
pub struct MountLink {
    content: String,
}

impl Node for MountLink {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::symlink())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn readlink(&self) -> Result<Vec<u8>> {
        Ok(self.content.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multi_setup() -> (Arc<Connector>, Arc<Inode>, Arc<Inode>) {
        let conn = Connector::new(MountOptions::hour());
        let root = conn
            .mount_root(MultiRoot::new(BlobOptions::default()))
            .unwrap();
        let config = root.child("config").unwrap();
        (conn, root, config)
    }

    fn config_mkdir(
        conn: &Arc<Connector>,
        dir: &Arc<Inode>,
        name: &str,
    ) -> Arc<Inode> {
        dir.node().clone().mkdir(conn, dir, name).unwrap()
    }

    #[test]
    fn test_root_exposes_config() {
        let (_conn, root, config) = multi_setup();
        assert_eq!(root.children().len(), 1);
        assert!(config.node().attr().unwrap().is_dir());
    }

    #[test]
    fn test_mkdir_creates_paired_directories() {
        let (conn, root, config) = multi_setup();
        config_mkdir(&conn, &config, "sub");

        let real = root.child("sub").unwrap();
        assert!(real.node().attr().unwrap().is_dir());
        let config_sub = config.child("sub").unwrap();
        assert!(config_sub
            .node()
            .as_any()
            .downcast_ref::<ConfigNode>()
            .is_some());

        // Nested mkdir pairs up as well.
        config_mkdir(&conn, &config_sub, "nested");
        assert!(real.child("nested").is_some());
    }

    #[test]
    fn test_symlink_mounts_loopback_dir() {
        let (conn, root, config) = multi_setup();
        let host = tempfile::tempdir().unwrap();
        std::fs::write(host.path().join("data"), b"xyz").unwrap();

        let content = host.path().display().to_string();
        let config_sub = config_mkdir(&conn, &config, "sub");
        config_sub
            .node()
            .clone()
            .symlink(&conn, &config_sub, "m", &content)
            .unwrap();

        let real = root.child("sub").unwrap().child("m").unwrap();
        assert!(real.is_mount_root());
        assert_eq!(
            config_sub.child("m").unwrap().node().readlink().unwrap(),
            content.as_bytes()
        );
    }

    #[test]
    fn test_symlink_rejects_bad_sources() {
        let (conn, _root, config) = multi_setup();
        let node = config.node().clone();

        match node.symlink(&conn, &config, "m", "a:b:c").err() {
            Some(Error::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        match node.symlink(&conn, &config, "m", "/no/such/dir").err() {
            Some(Error::Io(_)) => {}
            other => panic!("expected Io, got {:?}", other),
        }

        let host = tempfile::tempdir().unwrap();
        let file = host.path().join("plain");
        std::fs::write(&file, b"").unwrap();
        match node
            .symlink(&conn, &config, "m", &file.display().to_string())
            .err()
        {
            Some(Error::NotDirectory(_)) => {}
            other => panic!("expected NotDirectory, got {:?}", other),
        }
    }

    #[test]
    fn test_unlink_unmounts_and_removes_link() {
        let (conn, root, config) = multi_setup();
        let host = tempfile::tempdir().unwrap();
        let content = host.path().display().to_string();

        let node = config.node().clone();
        node.symlink(&conn, &config, "m", &content).unwrap();
        assert!(root.child("m").is_some());

        node.unlink(&conn, &config, "m").unwrap();
        assert!(root.child("m").is_none());
        assert!(config.child("m").is_none());

        // Mount idempotence: the same name mounts again.
        node.symlink(&conn, &config, "m", &content).unwrap();
        assert!(root.child("m").is_some());
    }

    #[test]
    fn test_unlink_refuses_non_links() {
        let (conn, root, config) = multi_setup();
        let node = config.node().clone();

        match node.unlink(&conn, &config, "missing") {
            Err(Error::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other),
        }

        config_mkdir(&conn, &config, "sub");
        match node.unlink(&conn, &config, "sub") {
            Err(Error::InvalidArgument(_)) => {}
            other => panic!("expected InvalidArgument, got {:?}", other),
        }
        // The real subtree is untouched.
        assert!(root.child("sub").is_some());
    }
}
