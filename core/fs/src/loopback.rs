//! Loopback node provider.
//!
//! Forwards all operations to a directory on the host filesystem. Used
//! for one-component mount sources in the config tree. The host tree
//! is live, so children are resolved dynamically instead of being
//! materialized into the inode graph up front.

use std::any::Any;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::sync::Arc;

use gitmount_common::{Error, Result};

use crate::blob::LoopbackFile;
use crate::node::{FileHandle, Node, NodeAttr};

/// A host path exposed read-only.
pub struct LoopbackNode {
    path: PathBuf,
}

impl LoopbackNode {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn attr_of(meta: &fs::Metadata) -> NodeAttr {
        NodeAttr {
            mode: meta.mode(),
            size: meta.len(),
        }
    }
}

impl Node for LoopbackNode {
    fn attr(&self) -> Result<NodeAttr> {
        let meta = fs::symlink_metadata(&self.path)?;
        Ok(Self::attr_of(&meta))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn readlink(&self) -> Result<Vec<u8>> {
        let target = fs::read_link(&self.path)?;
        Ok(target.into_os_string().into_vec())
    }

    fn open(&self, flags: i32) -> Result<Arc<dyn FileHandle>> {
        if flags & (libc::O_WRONLY | libc::O_RDWR) != 0 {
            return Err(Error::PermissionDenied(
                "loopback mounts are read-only".to_string(),
            ));
        }
        Ok(Arc::new(LoopbackFile::open(&self.path)?))
    }

    fn lookup(&self, name: &str) -> Result<Option<Arc<dyn Node>>> {
        let child = self.path.join(name);
        match fs::symlink_metadata(&child) {
            Ok(_) => Ok(Some(Arc::new(LoopbackNode::new(child)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn entries(&self) -> Result<Option<Vec<(String, NodeAttr)>>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let meta = entry.metadata()?;
            entries.push((name, Self::attr_of(&meta)));
        }
        Ok(Some(entries))
    }
}
