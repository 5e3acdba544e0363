//! Object-store adapter for gitmount.
//!
//! A thin semantic layer over `git2`: revision resolution, tree walking,
//! and blob access, shaped for the node materialization in `gitmount-fs`.
//! Nothing here touches FUSE.

pub mod mode;
pub mod repo;

pub use mode::{classify, EntryClass};
pub use repo::{GitStore, ObjectKind, Resolved, TreeEntry};
