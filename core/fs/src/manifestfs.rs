//! A manifest workspace as a single filesystem.
//!
//! Every active project of the manifest is built into its own tree
//! filesystem, then spliced into place under its configured path.
//! Builds run concurrently on a bounded pool; mounting is ordered so a
//! parent project is always mounted before projects nested inside it,
//! otherwise the parent's tree would hide the nested mount point.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use gitmount_common::{Error, Result};
use gitmount_manifest::Manifest;
use gitmount_store::GitStore;

use crate::blob::BlobOptions;
use crate::connector::{Connector, Inode};
use crate::node::{DirNode, Node, NodeAttr};
use crate::treefs::TreeFs;

/// Concurrent repository opens and tree walks during the build phase.
const MAX_PARALLEL_BUILDS: usize = 8;

/// Root node of a manifest workspace.
pub struct ManifestRoot {
    /// Project roots awaiting the mount phase, keyed by path.
    pending: Mutex<Vec<(String, Arc<dyn Node>)>>,
    paths: Vec<String>,
}

impl ManifestRoot {
    /// Build the tree filesystems for all active projects.
    ///
    /// Repositories live at `<repo_root>/<project.path>.git`; the
    /// treeish is the effective `remote/revision` of each project. The
    /// first build error aborts the workspace, but only after every
    /// outstanding builder has been drained.
    pub async fn build(
        manifest: &Manifest,
        repo_root: &Path,
        options: BlobOptions,
    ) -> Result<Arc<Self>> {
        let semaphore = Arc::new(Semaphore::new(MAX_PARALLEL_BUILDS));
        let mut builders: JoinSet<Result<(String, Arc<dyn Node>)>> = JoinSet::new();

        for project in manifest.active_projects() {
            let path = project.path().to_string();
            let repo_path: PathBuf = repo_root.join(format!("{}.git", path));
            let revision = manifest
                .effective_revision(project)
                .unwrap_or_default()
                .to_string();
            let treeish = match manifest.effective_remote(project) {
                Some(remote) => format!("{}/{}", remote, revision),
                None => revision,
            };
            let semaphore = semaphore.clone();

            builders.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Git("build pool closed".to_string()))?;
                tokio::task::spawn_blocking(move || {
                    debug!(path, treeish, "building project tree");
                    let store = Arc::new(GitStore::open(repo_path)?);
                    let root: Arc<dyn Node> = TreeFs::new_root(store, &treeish, options)?;
                    Ok((path, root))
                })
                .await
                .map_err(|e| Error::Git(format!("project builder panicked: {}", e)))?
            });
        }

        let mut built = Vec::new();
        let mut first_err = None;
        while let Some(joined) = builders.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(Error::Git(format!("project builder panicked: {}", e))));
            match result {
                Ok(pair) => built.push(pair),
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(_) => {}
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let paths = built.iter().map(|(path, _)| path.clone()).collect();
        Ok(Arc::new(Self {
            pending: Mutex::new(built),
            paths,
        }))
    }

    /// Paths of the projects that were built, in completion order.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    fn mount_project(
        &self,
        conn: &Arc<Connector>,
        self_inode: &Arc<Inode>,
        path: &str,
        root: Arc<dyn Node>,
    ) {
        let (base, components) = conn.resolve(self_inode, path);
        let Some((last, intermediate)) = components.split_last() else {
            warn!(path, "project path already fully occupied, skipping");
            return;
        };

        let mut current = base;
        for component in intermediate {
            current = conn.add_child(&current, component, Arc::new(DirNode));
        }

        // A malformed manifest can make this fail; the rest of the
        // workspace still mounts.
        if let Err(e) = conn.mount(&current, last, root, None) {
            warn!(path, error = %e, "mounting project failed, skipping");
        }
    }
}

impl Node for ManifestRoot {
    fn attr(&self) -> Result<NodeAttr> {
        Ok(NodeAttr::dir())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn on_mount(&self, conn: &Arc<Connector>, self_inode: &Arc<Inode>) -> Result<()> {
        let mut remaining: Vec<(String, Arc<dyn Node>)> =
            std::mem::take(&mut *self.pending.lock().unwrap());

        // Parent-first waves: a project is ready once no other
        // remaining project path is a proper ancestor of it.
        while !remaining.is_empty() {
            let paths: Vec<String> = remaining.iter().map(|(path, _)| path.clone()).collect();
            let (ready, rest): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|(path, _)| {
                !paths
                    .iter()
                    .any(|other| other != path && path.starts_with(&format!("{}/", other)))
            });
            if ready.is_empty() {
                break;
            }
            for (path, root) in ready {
                self.mount_project(conn, self_inode, &path, root);
            }
            remaining = rest;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::MountOptions;
    use git2::Repository;

    /// Lay out a bare repository at `<root>/<path>.git` with one file
    /// named after the project, reachable as `aosp/master`.
    fn init_project(root: &Path, path: &str) {
        let repo_path = root.join(format!("{}.git", path));
        if let Some(parent) = repo_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let repo = Repository::init_bare(repo_path).unwrap();
        let blob_id = repo.blob(format!("content of {}", path).as_bytes()).unwrap();
        let mut builder = repo.treebuilder(None).unwrap();
        builder
            .insert(format!("{}-file", path.replace('/', "-")), blob_id, 0o100644)
            .unwrap();
        let tree_id = builder.write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("user", "user@invalid").unwrap();
        let commit_id = repo
            .commit(None, &sig, &sig, "message", &tree, &[])
            .unwrap();
        repo.reference("refs/remotes/aosp/master", commit_id, true, "test")
            .unwrap();
    }

    fn manifest(projects: &str) -> Manifest {
        let xml = format!(
            r#"<manifest>
  <remote name="aosp" fetch=".." />
  <default revision="master" remote="aosp" />
  {}
</manifest>"#,
            projects
        );
        Manifest::parse(&xml).unwrap()
    }

    #[tokio::test]
    async fn test_notdefault_projects_are_not_built() {
        let root = tempfile::tempdir().unwrap();
        init_project(root.path(), "a");
        init_project(root.path(), "b");

        let m = manifest(
            r#"<project path="a" name="a" />
  <project path="b" name="b" />
  <project path="c" name="c" groups="notdefault" />"#,
        );
        let fs = ManifestRoot::build(&m, root.path(), BlobOptions::default())
            .await
            .unwrap();
        let mut paths = fs.paths().to_vec();
        paths.sort();
        assert_eq!(paths, ["a", "b"]);
    }

    #[tokio::test]
    async fn test_build_error_aborts_workspace() {
        let root = tempfile::tempdir().unwrap();
        init_project(root.path(), "a");

        let m = manifest(
            r#"<project path="a" name="a" />
  <project path="missing" name="missing" />"#,
        );
        match ManifestRoot::build(&m, root.path(), BlobOptions::default())
            .await
            .err()
        {
            Some(Error::RepositoryOpen { .. }) => {}
            other => panic!("expected RepositoryOpen, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_nested_project_mounts_after_parent() {
        let root = tempfile::tempdir().unwrap();
        init_project(root.path(), "a");
        init_project(root.path(), "a/b");

        let m = manifest(
            r#"<project path="a/b" name="a/b" />
  <project path="a" name="a" />"#,
        );
        let fs = ManifestRoot::build(&m, root.path(), BlobOptions::default())
            .await
            .unwrap();

        let conn = Connector::new(MountOptions::hour());
        let root_inode = conn.mount_root(fs).unwrap();

        let a = root_inode.child("a").unwrap();
        assert!(a.is_mount_root());
        assert!(a.child("a-file").is_some());

        // a/b is layered inside the already-mounted a.
        let b = a.child("b").unwrap();
        assert!(b.is_mount_root());
        assert!(b.child("a-b-file").is_some());
    }

    #[tokio::test]
    async fn test_intermediate_components_become_plain_dirs() {
        let root = tempfile::tempdir().unwrap();
        init_project(root.path(), "x/y/z");

        let m = manifest(r#"<project path="x/y/z" name="x/y/z" />"#);
        let fs = ManifestRoot::build(&m, root.path(), BlobOptions::default())
            .await
            .unwrap();

        let conn = Connector::new(MountOptions::hour());
        let root_inode = conn.mount_root(fs).unwrap();

        let x = root_inode.child("x").unwrap();
        assert!(!x.is_mount_root());
        let z = x.child("y").unwrap().child("z").unwrap();
        assert!(z.is_mount_root());
        assert!(z.child("x-y-z-file").is_some());
    }
}
