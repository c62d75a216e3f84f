//! # Package Driver
//!
//! Fetches prebuilt packages declared by manifest `<package>` entries
//! through an external CIPD-compatible client. The manifest entries are
//! rendered into ensure files (public and internal split into separate
//! documents) and handed to the client, which materializes the packages
//! under the workspace root.
//!
//! Package name templates may reference `${platform}`, `${os}`, and
//! `${arch}`, substituted from the host triple before any client call.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::Workspace;
use crate::error::{Error, Result};
use crate::hooks::run_with_timeout;
use crate::manifest::Package;

/// Client version pinned into emitted `.version` files.
pub const CLIENT_VERSION: &str = "latest";

/// Fetches package sets described by ensure files.
pub trait PackageResolver: Send + Sync {
    /// Materialize every package in `ensure_file` under the workspace root.
    fn ensure(&self, ensure_file: &Path, version_file: &Path, timeout_minutes: u64) -> Result<()>;

    /// Check remote readability of package name prefixes.
    fn check_access(&self, prefixes: &[String]) -> Result<BTreeMap<String, bool>>;
}

/// Resolver shelling out to the `cipd` binary.
pub struct CipdResolver {
    binary: PathBuf,
    root: PathBuf,
}

impl CipdResolver {
    pub fn new(workspace: &Workspace) -> Self {
        Self {
            binary: PathBuf::from("cipd"),
            root: workspace.root().to_path_buf(),
        }
    }

    fn run_ensure(
        &self,
        ensure_file: &Path,
        timeout: Duration,
    ) -> Result<crate::hooks::CommandOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("ensure")
            .arg("-ensure-file")
            .arg(ensure_file)
            .arg("-root")
            .arg(&self.root);
        run_with_timeout(&mut cmd, timeout)
    }

    /// Refresh the client itself. Used as a one-shot recovery between
    /// ensure attempts, since a stale client is the common cause of
    /// otherwise valid ensure files failing.
    fn bootstrap(&self, version_file: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("selfupdate").arg("-version-file").arg(version_file);
        let output = run_with_timeout(&mut cmd, Duration::from_secs(120))?;
        if !output.success {
            warn!("client bootstrap failed: {}", output.stderr.trim());
        }
        Ok(())
    }
}

impl PackageResolver for CipdResolver {
    fn ensure(&self, ensure_file: &Path, version_file: &Path, timeout_minutes: u64) -> Result<()> {
        let timeout = Duration::from_secs(timeout_minutes * 60);
        let first = self.run_ensure(ensure_file, timeout)?;
        if first.success {
            return Ok(());
        }
        if first.timed_out {
            return Err(Error::PackageFetch {
                ensure_file: ensure_file.display().to_string(),
                message: format!("timed out after {} minutes", timeout_minutes),
            });
        }

        debug!("ensure failed, retrying once after client bootstrap");
        self.bootstrap(version_file)?;
        let second = self.run_ensure(ensure_file, timeout)?;
        if second.success {
            return Ok(());
        }
        Err(Error::PackageFetch {
            ensure_file: ensure_file.display().to_string(),
            message: second.stderr.trim().to_string(),
        })
    }

    fn check_access(&self, prefixes: &[String]) -> Result<BTreeMap<String, bool>> {
        let mut results = BTreeMap::new();
        for group in prefix_groups(prefixes) {
            let mut cmd = Command::new(&self.binary);
            cmd.arg("ls").arg("-r").arg(&group);
            let output = run_with_timeout(&mut cmd, Duration::from_secs(60))?;
            let readable = output.success;
            // Match on segment boundary, "infra" must not claim "infrastructure/x"
            let group_dir = format!("{}/", group);
            for prefix in prefixes {
                if *prefix == group || prefix.starts_with(&group_dir) {
                    results.insert(prefix.clone(), readable);
                }
            }
        }
        Ok(results)
    }
}

/// Collapse prefixes into query roots: prefixes sharing a first path segment
/// form one group, answered by the longest common path prefix of its
/// members.
pub fn prefix_groups(prefixes: &[String]) -> Vec<String> {
    let mut by_root: BTreeMap<String, Vec<Vec<String>>> = BTreeMap::new();
    for prefix in prefixes {
        let segs = segments(prefix);
        let root = match segs.first() {
            Some(root) => root.clone(),
            None => continue,
        };
        by_root.entry(root).or_default().push(segs);
    }
    by_root
        .into_values()
        .map(|group| {
            let mut members = group.into_iter();
            let first = members.next().unwrap_or_default();
            members
                .fold(first, |acc, other| {
                    acc.into_iter()
                        .zip(other)
                        .take_while(|(a, b)| a == b)
                        .map(|(a, _)| a)
                        .collect()
                })
                .join("/")
        })
        .collect()
}

fn segments(prefix: &str) -> Vec<String> {
    prefix
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Substitute `${platform}`, `${os}`, `${arch}` from the host triple.
pub fn expand_template(template: &str) -> String {
    template
        .replace("${platform}", &format!("{}-{}", host_os(), host_arch()))
        .replace("${os}", host_os())
        .replace("${arch}", host_arch())
}

fn host_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "mac",
        other => other,
    }
}

fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Render packages into the ensure-file syntax the client expects. Entries
/// are sorted by expanded name so the document is byte-stable.
pub fn render_ensure_file(packages: &[&Package]) -> String {
    let mut lines = vec!["$ParanoidMode CheckPresence".to_string()];
    let mut entries: Vec<(String, &Package)> = packages
        .iter()
        .map(|p| (expand_template(&p.name), *p))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, package) in entries {
        lines.push(String::new());
        if !package.path.is_empty() {
            lines.push(format!("@Subdir {}", package.path));
        }
        lines.push(format!("{} {}", name, package.version));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Write the public/internal ensure and version documents for a package set.
/// Returns the (ensure, version) path pairs that were written.
pub fn write_ensure_files(
    dir: &Path,
    stem: &str,
    packages: &BTreeMap<String, Package>,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let (public, internal): (Vec<&Package>, Vec<&Package>) =
        packages.values().partition(|p| !p.internal);

    let mut written = Vec::new();
    for (suffix, set) in [("", public), ("_internal", internal)] {
        if set.is_empty() {
            continue;
        }
        let ensure_path = dir.join(format!("{}{}.ensure", stem, suffix));
        let version_path = dir.join(format!("{}{}.version", stem, suffix));
        std::fs::write(&ensure_path, render_ensure_file(&set))?;
        std::fs::write(&version_path, format!("{}\n", CLIENT_VERSION))?;
        written.push((ensure_path, version_path));
    }
    Ok(written)
}

/// Fetch every package in the set. Per-document failures are collected so
/// one bad set does not block the others.
pub fn fetch_packages(
    workspace: &Workspace,
    resolver: &dyn PackageResolver,
    packages: &BTreeMap<String, Package>,
    timeout_minutes: u64,
) -> Vec<Error> {
    if packages.is_empty() {
        return Vec::new();
    }
    let files = match write_ensure_files(&workspace.metadata_dir(), "packages", packages) {
        Ok(files) => files,
        Err(e) => return vec![e],
    };

    let mut errors = Vec::new();
    for (ensure_file, version_file) in files {
        info!("fetching packages from {}", ensure_file.display());
        if let Err(e) = resolver.ensure(&ensure_file, &version_file, timeout_minutes) {
            warn!("package fetch failed: {}", e);
            errors.push(e);
        }
    }
    errors
}
