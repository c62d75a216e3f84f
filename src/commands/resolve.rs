//! Resolve command implementation
//!
//! Resolves one or more manifests into a pinned lockfile.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use grove::resolver::ResolveOptions;
use grove::scm::GitScm;
use grove::snapshot::{generate_lockfile, LOCKFILE};

/// Arguments for the resolve command
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Manifests to resolve (defaults to the workspace root manifest)
    #[arg(value_name = "MANIFEST")]
    pub manifests: Vec<PathBuf>,

    /// Lockfile to write
    #[arg(short, long, value_name = "PATH", default_value = LOCKFILE)]
    pub output: PathBuf,

    /// On conflicting pins, let the last manifest win instead of failing
    #[arg(long)]
    pub allow_conflicts: bool,

    /// Read imported manifests from local checkouts without fetching
    #[arg(long)]
    pub local_manifest: bool,
}

/// Execute the resolve command
pub fn execute(args: ResolveArgs, root: Option<&Path>) -> Result<()> {
    let workspace = super::open_workspace(root)?;
    let scm = GitScm;
    let config = workspace.config()?;

    let manifests = if args.manifests.is_empty() {
        vec![workspace.root_manifest_path()]
    } else {
        args.manifests.clone()
    };

    let opts = ResolveOptions {
        local_manifest: args.local_manifest,
        allow: config.fetch_optional,
    };
    let lockfile = generate_lockfile(&workspace, &scm, &manifests, &opts, args.allow_conflicts)?;
    lockfile.write_to(&args.output)?;

    println!(
        "Locked {} projects and {} packages to {}",
        lockfile.projects.len(),
        lockfile.packages.len(),
        args.output.display()
    );
    Ok(())
}
