//! Filesystem core for gitmount.
//!
//! Maps immutable git object graphs onto a FUSE-visible node tree and
//! splice-mounts them under a dynamic configuration tree.
//!
//! # Architecture
//! The [`connector`] owns the inode graph; [`node::Node`]
//! implementations answer attributes and content. Three root flavors
//! exist: a single repository tree ([`treefs`]), the composable multi
//! root with its writable `config/` subtree ([`multifs`]), and the
//! manifest workspace ([`manifestfs`]). The [`dispatch`] module binds
//! the connector to the kernel through `fuser`.

pub mod blob;
pub mod connector;
pub mod dispatch;
pub mod loopback;
pub mod manifestfs;
pub mod multifs;
pub mod node;
pub mod treefs;

pub use blob::BlobOptions;
pub use connector::{Connector, Inode, MountOptions};
pub use dispatch::{is_fuse_available, serve, Dispatcher};
pub use loopback::LoopbackNode;
pub use manifestfs::ManifestRoot;
pub use multifs::MultiRoot;
pub use node::{FileHandle, Node, NodeAttr};
pub use treefs::TreeFs;
