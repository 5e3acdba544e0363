//! The in-process filesystem connector.
//!
//! The connector owns the inode graph: it hands out inode numbers,
//! splice-mounts filesystem roots under directories of other
//! filesystems, and resolves paths for the manifest layout. The FUSE
//! dispatcher translates kernel requests onto it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};
use std::time::Duration;

use tracing::debug;

use gitmount_common::{Error, Result};

use crate::node::Node;

/// Inode number of the filesystem root, fixed by the FUSE protocol.
pub const ROOT_INO: u64 = 1;

/// Per-mount cache behavior.
///
/// Git-content-addressed subtrees are immutable for the life of the
/// mount, so their mounts use one-hour timeouts.
#[derive(Debug, Clone)]
pub struct MountOptions {
    pub entry_timeout: Duration,
    pub attr_timeout: Duration,
    pub negative_timeout: Duration,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            entry_timeout: Duration::from_secs(1),
            attr_timeout: Duration::from_secs(1),
            negative_timeout: Duration::from_secs(1),
        }
    }
}

impl MountOptions {
    /// One-hour timeouts for immutable git-backed content.
    pub fn hour() -> Self {
        Self {
            entry_timeout: Duration::from_secs(3600),
            attr_timeout: Duration::from_secs(3600),
            negative_timeout: Duration::from_secs(3600),
        }
    }
}

/// One entry of the inode graph.
///
/// Children are kept in attach order; directory listings reproduce it.
pub struct Inode {
    ino: u64,
    node: Arc<dyn Node>,
    children: RwLock<Vec<(String, Arc<Inode>)>>,
    parent: RwLock<Weak<Inode>>,
    options: Arc<MountOptions>,
    mount_root: AtomicBool,
}

impl Inode {
    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn node(&self) -> &Arc<dyn Node> {
        &self.node
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Whether this inode is the root of a spliced mount.
    pub fn is_mount_root(&self) -> bool {
        self.mount_root.load(Ordering::Acquire)
    }

    /// Look up a child by name.
    pub fn child(&self, name: &str) -> Option<Arc<Inode>> {
        let children = self.children.read().unwrap();
        children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, inode)| inode.clone())
    }

    /// Snapshot of the children in attach order.
    pub fn children(&self) -> Vec<(String, Arc<Inode>)> {
        self.children.read().unwrap().clone()
    }

    /// The parent inode, if still attached.
    pub fn parent(&self) -> Option<Arc<Inode>> {
        self.parent.read().unwrap().upgrade()
    }
}

/// The connector: inode table plus mount plumbing.
pub struct Connector {
    inodes: RwLock<HashMap<u64, Arc<Inode>>>,
    next_ino: AtomicU64,
    default_options: Arc<MountOptions>,
    root: OnceLock<Arc<Inode>>,
}

impl Connector {
    pub fn new(default_options: MountOptions) -> Arc<Self> {
        Arc::new(Self {
            inodes: RwLock::new(HashMap::new()),
            next_ino: AtomicU64::new(ROOT_INO + 1),
            default_options: Arc::new(default_options),
            root: OnceLock::new(),
        })
    }

    /// The root inode, once a root has been mounted.
    pub fn root(&self) -> Option<Arc<Inode>> {
        self.root.get().cloned()
    }

    /// Look up an inode by number.
    pub fn get(&self, ino: u64) -> Option<Arc<Inode>> {
        self.inodes.read().unwrap().get(&ino).cloned()
    }

    /// Install the filesystem root and run its on-mount callback.
    ///
    /// The callback runs after the root inode is registered, so the
    /// node can attach descendants.
    pub fn mount_root(self: &Arc<Self>, node: Arc<dyn Node>) -> Result<Arc<Inode>> {
        let inode = Arc::new(Inode {
            ino: ROOT_INO,
            node: node.clone(),
            children: RwLock::new(Vec::new()),
            parent: RwLock::new(Weak::new()),
            options: self.default_options.clone(),
            mount_root: AtomicBool::new(true),
        });
        if self.root.set(inode.clone()).is_err() {
            return Err(Error::InvalidArgument(
                "connector already has a root".to_string(),
            ));
        }
        self.inodes.write().unwrap().insert(ROOT_INO, inode.clone());
        node.on_mount(self, &inode)?;
        Ok(inode)
    }

    /// Attach a node as a named child of `parent`, inheriting the
    /// parent's mount options. An existing child of the same name is
    /// replaced in place.
    pub fn add_child(
        self: &Arc<Self>,
        parent: &Arc<Inode>,
        name: &str,
        node: Arc<dyn Node>,
    ) -> Arc<Inode> {
        self.attach(parent, name, node, parent.options.clone(), false)
    }

    /// Splice-mount `root` as the child `name` of `parent` and run its
    /// on-mount callback. On callback failure the subtree is detached
    /// again and the error propagates.
    pub fn mount(
        self: &Arc<Self>,
        parent: &Arc<Inode>,
        name: &str,
        root: Arc<dyn Node>,
        options: Option<MountOptions>,
    ) -> Result<Arc<Inode>> {
        let options = options
            .map(Arc::new)
            .unwrap_or_else(|| self.default_options.clone());
        let inode = self.attach(parent, name, root.clone(), options, true);
        debug!(ino = inode.ino, name, "mounted");
        if let Err(e) = root.on_mount(self, &inode) {
            self.remove_child(parent, name);
            return Err(e);
        }
        Ok(inode)
    }

    /// Detach a spliced mount and drop its subtree.
    ///
    /// # Errors
    /// - `InvalidArgument` if the inode is not a mount root.
    pub fn unmount(&self, inode: &Arc<Inode>) -> Result<()> {
        if !inode.is_mount_root() {
            return Err(Error::InvalidArgument("not a mount point".to_string()));
        }
        let parent = inode
            .parent()
            .ok_or_else(|| Error::InvalidArgument("mount root has no parent".to_string()))?;

        let mut children = parent.children.write().unwrap();
        let index = children
            .iter()
            .position(|(_, child)| child.ino == inode.ino)
            .ok_or_else(|| Error::NotFound("mount point already detached".to_string()))?;
        children.remove(index);
        drop(children);

        self.remove_subtree(inode);
        debug!(ino = inode.ino, "unmounted");
        Ok(())
    }

    /// Detach a named child (of any kind) and drop its subtree.
    pub fn remove_child(&self, parent: &Arc<Inode>, name: &str) -> Option<Arc<Inode>> {
        let mut children = parent.children.write().unwrap();
        let index = children.iter().position(|(n, _)| n == name)?;
        let (_, inode) = children.remove(index);
        drop(children);
        self.remove_subtree(&inode);
        Some(inode)
    }

    /// Resolve a `/`-separated path relative to `base`.
    ///
    /// Returns the deepest existing inode and the path components that
    /// remain below it.
    pub fn resolve(&self, base: &Arc<Inode>, path: &str) -> (Arc<Inode>, Vec<String>) {
        let mut current = base.clone();
        let mut components: Vec<String> = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        while let Some(first) = components.first() {
            match current.child(first) {
                Some(child) => {
                    current = child;
                    components.remove(0);
                }
                None => break,
            }
        }
        (current, components)
    }

    fn attach(
        self: &Arc<Self>,
        parent: &Arc<Inode>,
        name: &str,
        node: Arc<dyn Node>,
        options: Arc<MountOptions>,
        mount_root: bool,
    ) -> Arc<Inode> {
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        let inode = Arc::new(Inode {
            ino,
            node,
            children: RwLock::new(Vec::new()),
            parent: RwLock::new(Arc::downgrade(parent)),
            options,
            mount_root: AtomicBool::new(mount_root),
        });
        self.inodes.write().unwrap().insert(ino, inode.clone());

        let mut children = parent.children.write().unwrap();
        match children.iter().position(|(n, _)| n == name) {
            Some(index) => {
                let (_, old) = std::mem::replace(
                    &mut children[index],
                    (name.to_string(), inode.clone()),
                );
                drop(children);
                self.remove_subtree(&old);
            }
            None => children.push((name.to_string(), inode.clone())),
        }
        inode
    }

    fn remove_subtree(&self, inode: &Arc<Inode>) {
        let mut stack = vec![inode.clone()];
        let mut inos = Vec::new();
        while let Some(current) = stack.pop() {
            inos.push(current.ino);
            for (_, child) in current.children.read().unwrap().iter() {
                stack.push(child.clone());
            }
        }
        let mut table = self.inodes.write().unwrap();
        for ino in inos {
            table.remove(&ino);
        }
    }
}
