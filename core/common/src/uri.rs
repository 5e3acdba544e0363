//! Mount URI grammar shared by the CLI and the config tree.

use std::fmt;
use std::path::PathBuf;

use crate::{Error, Result};

/// A parsed mount source: `PATH` for a loopback directory, or
/// `PATH:TREEISH` for a git repository at a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountUri {
    /// Forward a host directory as-is.
    Loopback(PathBuf),
    /// Expose the tree of `treeish` from the repository at `repo`.
    Git { repo: PathBuf, treeish: String },
}

impl MountUri {
    /// Parse mount URI content.
    ///
    /// # Errors
    /// - More than two `:`-separated components, or an empty component.
    pub fn parse(content: &str) -> Result<Self> {
        let components: Vec<&str> = content.split(':').collect();
        match components.as_slice() {
            [dir] if !dir.is_empty() => Ok(MountUri::Loopback(PathBuf::from(dir))),
            [repo, treeish] if !repo.is_empty() && !treeish.is_empty() => Ok(MountUri::Git {
                repo: PathBuf::from(repo),
                treeish: (*treeish).to_string(),
            }),
            _ => Err(Error::InvalidArgument(format!(
                "mount source must be PATH or PATH:TREEISH: {:?}",
                content
            ))),
        }
    }

    /// The directory component that must exist on the host.
    pub fn dir(&self) -> &PathBuf {
        match self {
            MountUri::Loopback(dir) => dir,
            MountUri::Git { repo, .. } => repo,
        }
    }
}

impl fmt::Display for MountUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MountUri::Loopback(dir) => write!(f, "{}", dir.display()),
            MountUri::Git { repo, treeish } => {
                write!(f, "{}:{}", repo.display(), treeish)
            }
        }
    }
}
