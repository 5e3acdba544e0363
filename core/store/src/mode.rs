//! Tree entry mode classification.

use gitmount_common::{Error, Result};

/// File-type mask and type bits, as git stores them in tree entries.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;

/// The three entry classes the filesystem can materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    Directory,
    Symlink,
    Regular,
}

/// Classify a tree entry mode by its file-type bits.
///
/// Gitlinks (submodules) and any other mode are a hard error; the
/// filesystem has no representation for them.
pub fn classify(mode: u32) -> Result<EntryClass> {
    match mode & S_IFMT {
        S_IFDIR => Ok(EntryClass::Directory),
        S_IFLNK => Ok(EntryClass::Symlink),
        S_IFREG => Ok(EntryClass::Regular),
        _ => Err(Error::UnsupportedEntryMode(mode)),
    }
}
