//! Update command implementation
//!
//! Runs the full reconciliation pipeline: resolve the manifest (or parse a
//! snapshot file), scan the workspace, plan the diff, then execute it phase
//! by phase. With a snapshot file argument the executor runs in snapshot
//! mode and pins exact revisions instead of rebasing.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::{ArgAction, Args};
use console::style;

use grove::output::{marker, OutputConfig};
use grove::packages::CipdResolver;
use grove::planner::Plan;
use grove::resolver::{ResolveOptions, Resolver};
use grove::scanner::{self, ScanMode};
use grove::scm::GitScm;
use grove::snapshot;
use grove::update::{Action, RunOutcome, UpdateExecutor, UpdateOptions, UpdateSummary};

/// Arguments for the update command
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Snapshot file to restore instead of resolving the manifest
    #[arg(value_name = "SNAPSHOT_FILE")]
    pub snapshot_file: Option<PathBuf>,

    /// Remove projects no longer in the manifest
    #[arg(long)]
    pub gc: bool,

    /// Rebase every tracked local branch, not just the current one
    #[arg(long)]
    pub rebase_all: bool,

    /// Also rebase branches with no tracking branch
    #[arg(long)]
    pub rebase_untracked: bool,

    /// Read imported manifests from local checkouts without fetching
    #[arg(long)]
    pub local_manifest: bool,

    /// Run manifest hooks after updating
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub run_hooks: bool,

    /// Fetch prebuilt packages after updating
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    pub fetch_packages: bool,

    /// Per-hook timeout in minutes
    #[arg(long, value_name = "MIN", default_value_t = 5)]
    pub hook_timeout: u64,

    /// Per-package-set timeout in minutes
    #[arg(long, value_name = "MIN", default_value_t = 30)]
    pub package_timeout: u64,

    /// Number of parallel workers (0 = number of cores)
    #[arg(short, long, default_value_t = 0)]
    pub jobs: usize,
}

/// Execute the update command
pub fn execute(args: UpdateArgs, root: Option<&Path>, output: &OutputConfig) -> Result<()> {
    let workspace = super::open_workspace(root)?;
    let scm = GitScm;
    let packages = CipdResolver::new(&workspace);

    let opts = UpdateOptions {
        gc: args.gc,
        rebase_all: args.rebase_all,
        rebase_untracked: args.rebase_untracked,
        run_hooks: args.run_hooks,
        fetch_packages: args.fetch_packages,
        hook_timeout: args.hook_timeout,
        package_timeout: args.package_timeout,
        jobs: args.jobs,
        ..Default::default()
    };

    let summary = if let Some(snapshot_file) = &args.snapshot_file {
        println!(
            "{} Restoring snapshot {}",
            marker(output, "⏪", "[restore]"),
            snapshot_file.display()
        );
        snapshot::checkout_snapshot(&workspace, &scm, &packages, snapshot_file, opts)?
    } else {
        let config = workspace.config()?;
        let resolve_opts = ResolveOptions {
            local_manifest: args.local_manifest,
            allow: config.fetch_optional.clone(),
        };
        let resolved = Resolver::new(&workspace, &scm, resolve_opts).resolve_root()?;
        println!(
            "{} Manifest resolved: {} projects",
            marker(output, "📦", "[resolve]"),
            resolved.projects.len()
        );

        let existing = scanner::scan(&workspace, &scm, ScanMode::Fast, &config)?;
        let plan = Plan::diff(&resolved.projects, &existing.projects);
        let states = scanner::project_states(&workspace, &scm, &existing.projects, true)?;

        UpdateExecutor::new(&workspace, &scm, &packages, opts).execute(&plan, &states, &resolved)?
    };

    print_summary(&summary, output);

    match summary.classify_run() {
        RunOutcome::Clean => Ok(()),
        RunOutcome::RebaseConflictsOnly => {
            println!(
                "{} {} branch(es) need manual rebase, see above",
                marker(output, "⚠️", "[warn]"),
                summary.rebase_failures
            );
            Ok(())
        }
        RunOutcome::Failed => {
            for outcome in summary.outcomes.iter().filter(|o| o.error.is_some()) {
                eprintln!(
                    "  {} {}: {}",
                    style("failed").red(),
                    outcome.key,
                    outcome.error.as_deref().unwrap_or("")
                );
            }
            bail!(
                "update failed: {} project(s), {} hook(s), {} package set(s)",
                summary.failures,
                summary.hook_failures,
                summary.package_failures
            );
        }
    }
}

fn print_summary(summary: &UpdateSummary, output: &OutputConfig) {
    let line = [
        (Action::Cloned, "cloned"),
        (Action::Updated, "updated"),
        (Action::Rebased, "rebased"),
        (Action::UpToDate, "up to date"),
        (Action::SkippedDirty, "dirty"),
        (Action::Removed, "removed"),
        (Action::Reported, "obsolete"),
    ]
    .iter()
    .map(|(action, label)| format!("{} {}", summary.count(*action), label))
    .collect::<Vec<_>>()
    .join(", ");
    println!("{} {}", marker(output, "✅", "[done]"), line);
}
