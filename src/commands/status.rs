//! Status command implementation

use std::path::Path;

use anyhow::Result;
use clap::Args;
use console::style;

use grove::output::{marker, OutputConfig};
use grove::report::{self, StatusFilter};
use grove::scanner::{self, ScanMode};
use grove::scm::GitScm;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only projects with uncommitted or untracked changes
    #[arg(long)]
    pub changes: bool,

    /// Show the commits made since the last update
    #[arg(long)]
    pub commits: bool,

    /// Only projects whose head moved off the last update
    #[arg(long)]
    pub not_head: bool,

    /// Only projects currently on this branch
    #[arg(long, value_name = "NAME")]
    pub branch: Option<String>,
}

/// Execute the status command
pub fn execute(args: StatusArgs, root: Option<&Path>, output: &OutputConfig) -> Result<()> {
    let workspace = super::open_workspace(root)?;
    let scm = GitScm;
    let config = workspace.config()?;

    let scanned = scanner::scan(&workspace, &scm, ScanMode::Full, &config)?;
    let states = scanner::project_states(&workspace, &scm, &scanned.projects, true)?;

    let filter = StatusFilter {
        changes: args.changes,
        commits: args.commits,
        not_head: args.not_head,
        branch: args.branch,
    };
    let listed = report::status(&workspace, &scm, &states, &filter)?;

    for entry in &listed {
        let branch = entry
            .current_branch
            .clone()
            .unwrap_or_else(|| "DETACHED".to_string());
        let mut markers = String::new();
        if entry.has_uncommitted {
            markers.push('*');
        }
        if entry.has_untracked {
            markers.push('%');
        }
        let drift = if entry.is_drifted() {
            marker(output, " ↯", " (moved)")
        } else {
            ""
        };

        println!(
            "{} {} {}{}{}",
            style(&entry.path).bold(),
            style(&branch).cyan(),
            short(&entry.head_revision),
            markers,
            drift
        );
        for commit in &entry.commits {
            println!("    {} {}", short(&commit.commit), commit.subject);
        }
    }
    Ok(())
}

fn short(revision: &str) -> &str {
    &revision[..revision.len().min(10)]
}
