//! Manifest command implementation
//!
//! Prints the fully resolved manifest, with imports flattened away, as XML.

use std::path::Path;

use anyhow::Result;
use clap::Args;

use grove::resolver::{ResolveOptions, Resolver};
use grove::scm::GitScm;

/// Arguments for the manifest command
#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Read imported manifests from local checkouts without fetching
    #[arg(long)]
    pub local_manifest: bool,
}

/// Execute the manifest command
pub fn execute(args: ManifestArgs, root: Option<&Path>) -> Result<()> {
    let workspace = super::open_workspace(root)?;
    let scm = GitScm;
    let config = workspace.config()?;

    let opts = ResolveOptions {
        local_manifest: args.local_manifest,
        allow: config.fetch_optional,
    };
    let resolved = Resolver::new(&workspace, &scm, opts).resolve_root()?;
    print!("{}", resolved.to_manifest().to_xml_string()?);
    Ok(())
}
