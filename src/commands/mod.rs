//! # CLI Command Implementations
//!
//! One module per subcommand of the `grove` tool. Each module contains an
//! `Args` struct deriving its command-specific flags with `clap` and an
//! `execute` function that orchestrates the library calls.

use std::path::Path;

use anyhow::{Context, Result};

use grove::config::Workspace;

pub mod diff;
pub mod init;
pub mod manifest;
pub mod project_config;
pub mod resolve;
pub mod snapshot;
pub mod status;
pub mod update;

/// Open the workspace named by `--root`, or search upward from the current
/// directory.
pub(crate) fn open_workspace(root: Option<&Path>) -> Result<Workspace> {
    match root {
        Some(dir) => Workspace::at(dir).context("not a grove workspace"),
        None => {
            let cwd = std::env::current_dir()?;
            Workspace::find(&cwd)
                .context("no grove workspace found here or in any parent directory")
        }
    }
}
