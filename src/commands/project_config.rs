//! Project-config command implementation
//!
//! Reads or changes the per-project update policy of the project containing
//! the current directory. The policy lives inside the checkout's git
//! metadata directory, so it survives moves and never dirties the work
//! tree.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;

use grove::config::LocalConfig;

/// Arguments for the project-config command
#[derive(Args, Debug)]
pub struct ProjectConfigArgs {
    /// Skip this project entirely during updates
    #[arg(long, value_name = "BOOL")]
    pub ignore: Option<bool>,

    /// Never fetch or advance this project, but still report it
    #[arg(long, value_name = "BOOL")]
    pub no_update: Option<bool>,

    /// Never rebase local branches in this project
    #[arg(long, value_name = "BOOL")]
    pub no_rebase: Option<bool>,
}

/// Execute the project-config command
pub fn execute(args: ProjectConfigArgs, root: Option<&Path>) -> Result<()> {
    let workspace = super::open_workspace(root)?;
    let cwd = std::env::current_dir()?;
    let project_dir = enclosing_project(&cwd, workspace.root())?;

    let mut config = LocalConfig::load(&project_dir)?;

    if args.ignore.is_none() && args.no_update.is_none() && args.no_rebase.is_none() {
        println!("ignore: {}", config.ignore);
        println!("no-update: {}", config.no_update);
        println!("no-rebase: {}", config.no_rebase);
        return Ok(());
    }

    if let Some(ignore) = args.ignore {
        config.ignore = ignore;
    }
    if let Some(no_update) = args.no_update {
        config.no_update = no_update;
    }
    if let Some(no_rebase) = args.no_rebase {
        config.no_rebase = no_rebase;
    }
    config.store(&project_dir)?;
    Ok(())
}

/// Walk up from `start` to the nearest directory holding a `.git`, staying
/// inside the workspace.
fn enclosing_project(start: &Path, workspace_root: &Path) -> Result<PathBuf> {
    let mut dir = start;
    loop {
        if dir.join(".git").exists() && dir != workspace_root {
            return Ok(dir.to_path_buf());
        }
        if dir == workspace_root {
            break;
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => break,
        }
    }
    bail!("current directory is not inside a project checkout");
}
