//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;
use grove::output::OutputConfig;

/// Grove - multi-repository workspace orchestrator
#[derive(Parser, Debug)]
#[command(name = "grove")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Workspace root (defaults to searching upward from the current
    /// directory)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty workspace
    Init(commands::init::InitArgs),
    /// Update all projects to what the manifest describes
    Update(commands::update::UpdateArgs),
    /// Show per-project state relative to the last update
    Status(commands::status::StatusArgs),
    /// Write a pinned snapshot of the current workspace
    Snapshot(commands::snapshot::SnapshotArgs),
    /// Resolve manifests into a lockfile
    Resolve(commands::resolve::ResolveArgs),
    /// Compare two snapshots
    Diff(commands::diff::DiffArgs),
    /// Read or change per-project update policy
    ProjectConfig(commands::project_config::ProjectConfigArgs),
    /// Print the resolved manifest
    Manifest(commands::manifest::ManifestArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        env_logger::Builder::new()
            .parse_filters(&self.log_level)
            .format_timestamp(None)
            .init();
        let output = OutputConfig::from_env_and_flag(&self.color);
        let root = self.root.as_deref();

        match self.command {
            Commands::Init(args) => commands::init::execute(args),
            Commands::Update(args) => commands::update::execute(args, root, &output),
            Commands::Status(args) => commands::status::execute(args, root, &output),
            Commands::Snapshot(args) => commands::snapshot::execute(args, root),
            Commands::Resolve(args) => commands::resolve::execute(args, root),
            Commands::Diff(args) => commands::diff::execute(args, root),
            Commands::ProjectConfig(args) => commands::project_config::execute(args, root),
            Commands::Manifest(args) => commands::manifest::execute(args, root),
        }
    }
}
