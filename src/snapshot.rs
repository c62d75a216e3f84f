//! # Snapshots and Lockfiles
//!
//! A snapshot is a manifest-shaped XML document with every import resolved
//! away and every project pinned to the exact commit its local checkout sat
//! at when the snapshot was taken. Restoring one runs the update executor in
//! snapshot mode, which checks out pinned revisions and never rebases.
//!
//! A lockfile is the JSON analogue for reproducible resolution: each input
//! manifest is resolved independently and the results merged, with conflicts
//! between manifests either fatal or, under suppression, resolved
//! deterministically in favor of the last manifest given. Output is sorted
//! by key so unchanged input yields byte-identical output.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::Workspace;
use crate::error::{Error, Result};
use crate::manifest::{Manifest, Project};
use crate::packages::{self, PackageResolver};
use crate::planner::Plan;
use crate::resolver::{ResolveOptions, ResolvedManifest, Resolver};
use crate::scanner::{self, ScanMode};
use crate::scm::Scm;
use crate::update::{UpdateExecutor, UpdateOptions, UpdateSummary};

/// Default lockfile name at the workspace root.
pub const LOCKFILE: &str = "grove.lock";

/// Write a snapshot of the resolved manifest with every project pinned to
/// its current local head. Package pins are written as sibling ensure and
/// version documents named after the snapshot file.
pub fn create_snapshot(
    workspace: &Workspace,
    scm: &dyn Scm,
    resolved: &ResolvedManifest,
    path: &Path,
) -> Result<()> {
    let mut manifest = resolved.to_manifest();
    for project in &mut manifest.projects.projects {
        let dir = workspace.project_dir(&project.path);
        match scm.head_revision(&dir) {
            Ok(revision) => project.revision = revision,
            Err(e) => {
                // Not yet checked out; the manifest pin is the best answer.
                debug!("no local head for '{}': {}", project.name, e);
            }
        }
    }
    manifest.write_to(path)?;

    if !resolved.packages.is_empty() {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "snapshot".to_string());
        packages::write_ensure_files(dir, &stem, &resolved.packages)?;
    }
    Ok(())
}

/// Restore a workspace to the state a snapshot file describes.
pub fn checkout_snapshot(
    workspace: &Workspace,
    scm: &dyn Scm,
    package_resolver: &dyn PackageResolver,
    path: &Path,
    opts: UpdateOptions,
) -> Result<UpdateSummary> {
    let manifest = Manifest::from_file(path)?;
    let mut resolved = ResolvedManifest {
        projects: manifest.project_map(),
        ..Default::default()
    };
    for package in &manifest.packages.packages {
        resolved.packages.insert(package.name.clone(), package.clone());
    }
    resolved.hooks = manifest.hooks.hooks.clone();

    let config = workspace.config()?;
    let existing = scanner::scan(workspace, scm, ScanMode::Fast, &config)?;
    let plan = Plan::diff(&resolved.projects, &existing.projects);
    let states = scanner::project_states(workspace, scm, &existing.projects, true)?;

    let opts = UpdateOptions {
        snapshot_mode: true,
        rebase_tracked: false,
        rebase_all: false,
        rebase_untracked: false,
        ..opts
    };
    UpdateExecutor::new(workspace, scm, package_resolver, opts).execute(&plan, &states, &resolved)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedProject {
    pub name: String,
    pub remote: String,
    pub path: String,
    pub revision: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
}

/// Pinned resolution of one or more manifests, sorted by key.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LockFile {
    pub projects: Vec<LockedProject>,
    pub packages: Vec<LockedPackage>,
}

impl LockFile {
    pub fn to_json_string(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}

/// Resolve each manifest independently and merge the pins.
///
/// A key resolving to different revisions (or a package to different
/// versions) across manifests is a conflict: fatal by default, last given
/// manifest wins under `suppress_conflicts`.
pub fn generate_lockfile(
    workspace: &Workspace,
    scm: &dyn Scm,
    manifest_paths: &[PathBuf],
    resolve_opts: &ResolveOptions,
    suppress_conflicts: bool,
) -> Result<LockFile> {
    let mut projects: std::collections::BTreeMap<String, Project> = Default::default();
    let mut packages: std::collections::BTreeMap<String, String> = Default::default();

    for path in manifest_paths {
        let resolver = Resolver::new(workspace, scm, resolve_opts.clone());
        let resolved = resolver.resolve(path)?;

        for (key, project) in resolved.projects {
            if let Some(existing) = projects.get(&key) {
                if existing.revision != project.revision {
                    if !suppress_conflicts {
                        return Err(Error::LockConflict {
                            key,
                            existing: existing.revision.clone(),
                            incoming: project.revision.clone(),
                        });
                    }
                    warn!(
                        "lock conflict on '{}': {} overrides {}",
                        key, project.revision, existing.revision
                    );
                }
            }
            projects.insert(key, project);
        }

        for (name, package) in resolved.packages {
            if let Some(existing) = packages.get(&name) {
                if *existing != package.version {
                    if !suppress_conflicts {
                        return Err(Error::LockConflict {
                            key: name,
                            existing: existing.clone(),
                            incoming: package.version.clone(),
                        });
                    }
                    warn!(
                        "lock conflict on package '{}': {} overrides {}",
                        name, package.version, existing
                    );
                }
            }
            packages.insert(name, package.version);
        }
    }

    Ok(LockFile {
        projects: projects
            .into_values()
            .map(|p| LockedProject {
                name: p.name,
                remote: p.remote,
                path: p.path,
                revision: p.revision,
            })
            .collect(),
        packages: packages
            .into_iter()
            .map(|(name, version)| LockedPackage { name, version })
            .collect(),
    })
}

/// One upstream change carried by a project update, extracted from its
/// commit range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub commit: String,
    pub subject: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub change_id: String,
}

/// Extracts the changes landed between two revisions of a project.
pub trait ChangeLog: Send + Sync {
    fn changes(
        &self,
        project: &Project,
        old_revision: &str,
        new_revision: &str,
        limit: usize,
    ) -> Result<Vec<Change>>;
}

/// Changelog backed by the local object store. Review links are derived
/// from `Change-Id` trailers when the project declares a review host.
pub struct GitChangeLog<'a> {
    workspace: &'a Workspace,
    scm: &'a dyn Scm,
}

impl<'a> GitChangeLog<'a> {
    pub fn new(workspace: &'a Workspace, scm: &'a dyn Scm) -> Self {
        Self { workspace, scm }
    }
}

impl ChangeLog for GitChangeLog<'_> {
    fn changes(
        &self,
        project: &Project,
        old_revision: &str,
        new_revision: &str,
        limit: usize,
    ) -> Result<Vec<Change>> {
        let dir = self.workspace.project_dir(&project.path);
        let entries = self
            .scm
            .log_range(&dir, old_revision, new_revision, limit)
            .map_err(|e| Error::ChangeLog {
                project: project.name.clone(),
                message: e.to_string(),
            })?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let change_id = extract_change_id(&entry.body);
                let url = if change_id.is_empty() || project.gerrit_host.is_empty() {
                    None
                } else {
                    Some(format!(
                        "{}/q/{}",
                        project.gerrit_host.trim_end_matches('/'),
                        change_id
                    ))
                };
                Change {
                    number: None,
                    url,
                    commit: entry.commit,
                    subject: entry.subject,
                    change_id,
                }
            })
            .collect())
    }
}

fn extract_change_id(body: &str) -> String {
    body.lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("Change-Id:"))
        .map(|id| id.trim().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffProject {
    pub name: String,
    pub remote: String,
    pub path: String,
    pub revision: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatedProject {
    pub name: String,
    pub remote: String,
    pub path: String,
    pub revision: String,
    pub old_revision: String,
    pub old_path: String,
    pub cls: Vec<Change>,
    pub has_more_cls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Machine-readable difference between two snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub new_projects: Vec<DiffProject>,
    pub deleted_projects: Vec<DiffProject>,
    pub updated_projects: Vec<UpdatedProject>,
}

/// Diff two snapshot files, annotating each updated project with the
/// changes landed between its two pins (at most `max_cls` per project; a
/// changelog failure is recorded per project, never fatal).
pub fn snapshot_diff(
    old_path: &Path,
    new_path: &Path,
    changelog: &dyn ChangeLog,
    max_cls: usize,
) -> Result<SnapshotDiff> {
    let old = Manifest::from_file(old_path)?.project_map();
    let new = Manifest::from_file(new_path)?.project_map();
    let plan = Plan::diff_exact(&new, &old);

    let diff_project = |p: &Project| DiffProject {
        name: p.name.clone(),
        remote: p.remote.clone(),
        path: p.path.clone(),
        revision: p.revision.clone(),
    };

    let updated_projects = plan
        .updated
        .values()
        .map(|update| {
            let (cls, has_more, error) = match changelog.changes(
                &update.new,
                &update.old.revision,
                &update.new.revision,
                max_cls + 1,
            ) {
                Ok(mut cls) => {
                    let has_more = cls.len() > max_cls;
                    cls.truncate(max_cls);
                    (cls, has_more, None)
                }
                Err(e) => (Vec::new(), false, Some(e.to_string())),
            };
            UpdatedProject {
                name: update.new.name.clone(),
                remote: update.new.remote.clone(),
                path: update.new.path.clone(),
                revision: update.new.revision.clone(),
                old_revision: update.old.revision.clone(),
                old_path: update.old.path.clone(),
                cls,
                has_more_cls: has_more,
                error,
            }
        })
        .collect();

    Ok(SnapshotDiff {
        new_projects: plan.new.values().map(diff_project).collect(),
        deleted_projects: plan.deleted.values().map(diff_project).collect(),
        updated_projects,
    })
}
