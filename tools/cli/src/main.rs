//! gitmount CLI - mount git repositories as a read-only filesystem.
//!
//! Three root flavors, selected by flags: a manifest workspace
//! (`--repo`), a single repository tree (`--git_repo`), or the
//! composable multi root whose `config/` subtree drives further mounts
//! (the default).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gitmount_common::MountUri;
use gitmount_fs::{
    serve, BlobOptions, Connector, ManifestRoot, MountOptions, MultiRoot, Node, TreeFs,
};
use gitmount_manifest::Manifest;
use gitmount_store::GitStore;

#[derive(Parser)]
#[command(name = "gitmount")]
#[command(about = "Mount git repositories as a read-only filesystem")]
#[command(version)]
struct Cli {
    /// Directory to mount on.
    mountpoint: PathBuf,

    /// Print FUSE debug data.
    #[arg(long)]
    debug: bool,

    /// Only read blob contents when a file is read.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    lazy: bool,

    /// Stage blob contents to intermediate files on disk.
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    disk: bool,

    /// Mount a single repository, given as REPO:TREEISH.
    #[arg(long = "git_repo", value_name = "REPO:TREEISH", conflicts_with = "repo")]
    git_repo: Option<String>,

    /// Mount a manifest workspace from this root directory.
    #[arg(long, value_name = "MANIFEST_ROOT")]
    repo: Option<PathBuf>,
}

fn build_root(cli: &Cli, options: BlobOptions) -> Result<Arc<dyn Node>> {
    if let Some(repo) = &cli.repo {
        let manifest = Manifest::parse_file(repo.join("manifest.xml"))
            .with_context(|| format!("reading {}/manifest.xml", repo.display()))?;
        let runtime = tokio::runtime::Runtime::new().context("creating runtime")?;
        let root = runtime
            .block_on(ManifestRoot::build(
                &manifest,
                &repo.join("projects"),
                options,
            ))
            .context("building manifest workspace")?;
        info!(projects = root.paths().len(), "manifest workspace built");
        return Ok(root);
    }

    if let Some(git_repo) = &cli.git_repo {
        return match MountUri::parse(git_repo)? {
            MountUri::Git { repo, treeish } => {
                let store = Arc::new(GitStore::open(repo)?);
                Ok(TreeFs::new_root(store, &treeish, options)?)
            }
            MountUri::Loopback(_) => {
                anyhow::bail!("--git_repo must have the form REPO:TREEISH")
            }
        };
    }

    Ok(MultiRoot::new(options))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !gitmount_fs::is_fuse_available() {
        anyhow::bail!("FUSE is not available on this system");
    }

    let options = BlobOptions {
        lazy: cli.lazy,
        disk: cli.disk,
    };

    let root = build_root(&cli, options)?;
    let conn = Connector::new(MountOptions::hour());
    conn.mount_root(root).context("constructing filesystem root")?;

    info!(mountpoint = %cli.mountpoint.display(), "serving gitmount FUSE");
    serve(conn, &cli.mountpoint).context("serving filesystem")?;
    Ok(())
}
