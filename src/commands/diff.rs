//! Diff command implementation
//!
//! Compares two snapshot files and prints a machine-readable JSON diff,
//! annotating each updated project with the changes landed between its two
//! pins.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;

use grove::scm::GitScm;
use grove::snapshot::{snapshot_diff, GitChangeLog};

/// Arguments for the diff command
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// The older snapshot
    #[arg(value_name = "SNAPSHOT_OLD")]
    pub old: PathBuf,

    /// The newer snapshot
    #[arg(value_name = "SNAPSHOT_NEW")]
    pub new: PathBuf,

    /// Maximum changes listed per updated project
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub max_cls: usize,
}

/// Execute the diff command
pub fn execute(args: DiffArgs, root: Option<&Path>) -> Result<()> {
    let workspace = super::open_workspace(root)?;
    let scm = GitScm;
    let changelog = GitChangeLog::new(&workspace, &scm);

    let diff = snapshot_diff(&args.old, &args.new, &changelog, args.max_cls)?;
    println!("{}", serde_json::to_string_pretty(&diff)?);
    Ok(())
}
