//! Thin semantic wrapper around a git2 `Repository`.
//!
//! All node types of a mounted subtree share one `GitStore` behind an
//! `Arc`; the handle must outlive every node built from it.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use git2::{ObjectType, Oid, Repository};
use tracing::debug;

use gitmount_common::{Error, Result};

/// Object kinds a revision expression may resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
}

/// Result of resolving a treeish.
#[derive(Debug, Clone, Copy)]
pub struct Resolved {
    pub kind: ObjectKind,
    pub oid: Oid,
}

/// One entry of a tree object, in on-disk order.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub name: String,
    pub mode: u32,
    pub oid: Oid,
}

/// A live handle to a git repository.
///
/// `git2::Repository` is `Send` but not `Sync`, so the handle serializes
/// object-database access behind a mutex. Callers hold the lock only for
/// the duration of a single lookup.
pub struct GitStore {
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl GitStore {
    /// Open an existing git repository (bare or with a worktree).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path: PathBuf = path.into();
        let repo = Repository::open(&path).map_err(|e| Error::RepositoryOpen {
            path: path.clone(),
            reason: e.message().to_string(),
        })?;
        debug!(path = %path.display(), "opened repository");
        Ok(Self {
            repo: Mutex::new(repo),
            path,
        })
    }

    /// The path the repository was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|_| Error::Git("repository lock poisoned".to_string()))
    }

    /// Resolve a revision expression to an object kind and oid.
    ///
    /// # Errors
    /// - `RevisionNotFound` if the expression does not resolve.
    /// - `UnsupportedObjectType` for tags or unknown object kinds.
    pub fn resolve(&self, treeish: &str) -> Result<Resolved> {
        let repo = self.lock()?;
        let obj = repo
            .revparse_single(treeish)
            .map_err(|_| Error::RevisionNotFound(treeish.to_string()))?;

        let kind = match obj.kind() {
            Some(ObjectType::Commit) => ObjectKind::Commit,
            Some(ObjectType::Tree) => ObjectKind::Tree,
            Some(ObjectType::Blob) => ObjectKind::Blob,
            other => {
                return Err(Error::UnsupportedObjectType(format!(
                    "{}: {:?}",
                    treeish, other
                )))
            }
        };

        Ok(Resolved {
            kind,
            oid: obj.id(),
        })
    }

    /// The tree oid a commit points at.
    pub fn commit_tree_oid(&self, oid: Oid) -> Result<Oid> {
        let repo = self.lock()?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| Error::Git(e.message().to_string()))?;
        Ok(commit.tree_id())
    }

    /// The entries of a tree object, preserving on-disk order.
    ///
    /// Directory listings to the kernel reproduce this order; callers must
    /// not re-sort.
    pub fn tree_entries(&self, oid: Oid) -> Result<Vec<TreeEntry>> {
        let repo = self.lock()?;
        let tree = repo
            .find_tree(oid)
            .map_err(|e| Error::Git(e.message().to_string()))?;

        let mut entries = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let name = entry
                .name()
                .ok_or_else(|| {
                    Error::InvalidArgument(format!(
                        "non-UTF-8 entry name in tree {}",
                        oid
                    ))
                })?
                .to_string();
            entries.push(TreeEntry {
                name,
                mode: entry.filemode() as u32,
                oid: entry.id(),
            });
        }
        Ok(entries)
    }

    /// Full content of a blob. Used for symlink targets and eager loads.
    pub fn blob_bytes(&self, oid: Oid) -> Result<Vec<u8>> {
        let repo = self.lock()?;
        let blob = repo
            .find_blob(oid)
            .map_err(|e| Error::Git(e.message().to_string()))?;
        Ok(blob.content().to_vec())
    }

    /// Size of a blob from the object-database header, without loading
    /// its content.
    pub fn blob_size(&self, oid: Oid) -> Result<u64> {
        let repo = self.lock()?;
        let odb = repo.odb().map_err(|e| Error::Git(e.message().to_string()))?;
        let (size, _kind) = odb
            .read_header(oid)
            .map_err(|e| Error::Git(e.message().to_string()))?;
        Ok(size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, GitStore, Oid) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let blob_id = repo.blob(b"hello").unwrap();

        let mut builder = repo.treebuilder(None).unwrap();
        builder.insert("b-file", blob_id, 0o100644).unwrap();
        builder.insert("a-link", blob_id, 0o120000).unwrap();
        let tree_id = builder.write().unwrap();

        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("user", "user@invalid").unwrap();
        repo.commit(Some("refs/heads/master"), &sig, &sig, "message", &tree, &[])
            .unwrap();
        drop(tree);
        drop(builder);
        drop(repo);

        let store = GitStore::open(dir.path()).unwrap();
        (dir, store, tree_id)
    }

    #[test]
    fn test_resolve_ref_to_commit() {
        let (_dir, store, tree_id) = fixture();
        let resolved = store.resolve("refs/heads/master").unwrap();
        assert_eq!(resolved.kind, ObjectKind::Commit);
        assert_eq!(store.commit_tree_oid(resolved.oid).unwrap(), tree_id);
    }

    #[test]
    fn test_resolve_missing_revision() {
        let (_dir, store, _) = fixture();
        match store.resolve("refs/heads/nonexistent") {
            Err(Error::RevisionNotFound(rev)) => {
                assert_eq!(rev, "refs/heads/nonexistent")
            }
            other => panic!("expected RevisionNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_tree_entries_order_and_modes() {
        let (_dir, store, tree_id) = fixture();
        let entries = store.tree_entries(tree_id).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a-link", "b-file"]);
        assert_eq!(entries[0].mode, 0o120000);
        assert_eq!(entries[1].mode, 0o100644);
    }

    #[test]
    fn test_blob_size_matches_bytes() {
        let (_dir, store, tree_id) = fixture();
        let entries = store.tree_entries(tree_id).unwrap();
        let blob = entries.iter().find(|e| e.name == "b-file").unwrap();
        assert_eq!(store.blob_size(blob.oid).unwrap(), 5);
        assert_eq!(store.blob_bytes(blob.oid).unwrap(), b"hello");
    }

    #[test]
    fn test_open_missing_repository() {
        match GitStore::open("/no/such/repository").err() {
            Some(Error::RepositoryOpen { .. }) => {}
            other => panic!("expected RepositoryOpen, got {:?}", other),
        }
    }
}
