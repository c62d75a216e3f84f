//! Snapshot command implementation

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use grove::resolver::{ResolveOptions, Resolver};
use grove::scm::GitScm;
use grove::snapshot::create_snapshot;

/// Arguments for the snapshot command
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Where to write the snapshot
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Read imported manifests from local checkouts without fetching
    #[arg(long)]
    pub local_manifest: bool,
}

/// Execute the snapshot command
pub fn execute(args: SnapshotArgs, root: Option<&Path>) -> Result<()> {
    let workspace = super::open_workspace(root)?;
    let scm = GitScm;
    let config = workspace.config()?;

    let opts = ResolveOptions {
        local_manifest: args.local_manifest,
        allow: config.fetch_optional,
    };
    let resolved = Resolver::new(&workspace, &scm, opts).resolve_root()?;
    create_snapshot(&workspace, &scm, &resolved, &args.file)?;

    println!(
        "Wrote snapshot of {} projects to {}",
        resolved.projects.len(),
        args.file.display()
    );
    Ok(())
}
