//! Init command implementation
//!
//! Creates the `.grove` metadata directory and optionally seeds the root
//! manifest with an import of a remote manifest repository.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use grove::config::Workspace;
use grove::manifest::{Import, Manifest, ROOT_MANIFEST};

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (defaults to the current directory)
    #[arg(value_name = "DIR", default_value = ".")]
    pub dir: PathBuf,

    /// Remote manifest repository to import
    #[arg(long, value_name = "URL", requires = "manifest")]
    pub remote: Option<String>,

    /// Manifest file within the remote repository
    #[arg(long, value_name = "FILE", requires = "remote")]
    pub manifest: Option<String>,
}

/// Execute the init command
pub fn execute(args: InitArgs) -> Result<()> {
    let workspace = Workspace::init(&args.dir)?;

    let manifest_path = workspace.root_manifest_path();
    if !manifest_path.exists() {
        let mut manifest = Manifest::default();
        if let (Some(remote), Some(file)) = (&args.remote, &args.manifest) {
            manifest.imports.imports.push(Import {
                name: import_name(remote),
                remote: remote.clone(),
                manifest: file.clone(),
                ..Default::default()
            });
        }
        manifest.write_to(&manifest_path)?;
    }

    println!(
        "Initialized grove workspace in {} ({})",
        args.dir.display(),
        ROOT_MANIFEST
    );
    Ok(())
}

fn import_name(remote: &str) -> String {
    remote
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or("manifest")
        .trim_end_matches(".git")
        .to_string()
}
