//! # Manifest Resolver
//!
//! Recursively loads a root manifest and its transitive imports into one
//! merged project/package/hook set.
//!
//! ## Process
//!
//! 1. Parse the root manifest (normally `.grove_manifest` at the workspace
//!    root).
//! 2. For each `<import>`, determine its backing project - the repository
//!    checkout holding the imported manifest, created on first reference at
//!    the import's name under the workspace root - read the named manifest
//!    file from it, and recurse. In normal mode the backing checkout is
//!    fetched and the manifest is read at the import's target revision; in
//!    local-manifest mode the file is read from the checkout as it sits on
//!    disk, with no fetch.
//! 3. `<localimport>` reads a manifest file next to the importing one, from
//!    the same checkout.
//! 4. Merge the resolved projects, packages, and hooks into the accumulating
//!    result, applying the import's `root` path prefix to every nested
//!    project/package path. The same key arriving twice with differing
//!    content is a fatal merge conflict; an identical duplicate is
//!    idempotent.
//! 5. Apply the root manifest's overrides last; they unconditionally replace
//!    resolved entries with the same key.
//!
//! Attribute filtering runs during the merge: an entry whose attribute set is
//! not admitted by the configured allow-set is dropped.
//!
//! ## Cycle detection
//!
//! A visited set of `(remote, manifest-file)` is maintained along the current
//! resolution path only, with backtracking - the same import reached through
//! two different non-cyclic paths is legal, and only a genuine cycle back to
//! an ancestor is an error. The error names the full cycle chain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;

use crate::config::Workspace;
use crate::error::{Error, Result};
use crate::manifest::{
    AttributeSet, Hook, Import, Manifest, Package, Project, ProjectKey,
};
use crate::scm::Scm;

/// Options controlling a resolution run.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Read imported manifests from the local checkouts as-is, without
    /// fetching. Used when testing local manifest edits before they land.
    pub local_manifest: bool,
    /// Attribute tags admitted in addition to untagged entries.
    pub allow: AttributeSet,
}

/// The merged result of a resolution run.
#[derive(Debug, Default)]
pub struct ResolvedManifest {
    pub projects: BTreeMap<ProjectKey, Project>,
    /// Packages keyed by name.
    pub packages: BTreeMap<String, Package>,
    /// Hooks in encounter order.
    pub hooks: Vec<Hook>,
}

impl ResolvedManifest {
    /// Flatten back into a manifest document (imports resolved away), for
    /// printing and snapshotting.
    pub fn to_manifest(&self) -> Manifest {
        let mut manifest = Manifest::default();
        manifest.projects.projects = self.projects.values().cloned().collect();
        manifest.packages.packages = self.packages.values().cloned().collect();
        manifest.hooks.hooks = self.hooks.clone();
        manifest
    }
}

/// Resolves manifests against a workspace through a source-control driver.
pub struct Resolver<'a> {
    workspace: &'a Workspace,
    scm: &'a dyn Scm,
    opts: ResolveOptions,
}

impl<'a> Resolver<'a> {
    pub fn new(workspace: &'a Workspace, scm: &'a dyn Scm, opts: ResolveOptions) -> Self {
        Self {
            workspace,
            scm,
            opts,
        }
    }

    /// Resolve the workspace's root manifest.
    pub fn resolve_root(&self) -> Result<ResolvedManifest> {
        self.resolve(&self.workspace.root_manifest_path())
    }

    /// Resolve a manifest file on disk, following its imports.
    pub fn resolve(&self, root_path: &Path) -> Result<ResolvedManifest> {
        let content = std::fs::read_to_string(root_path).map_err(|e| Error::ManifestParse {
            message: format!("cannot read root manifest: {}", e),
            path: Some(root_path.display().to_string()),
        })?;
        let root = parse_named(&content, root_path)?;

        let mut result = ResolvedManifest::default();
        let mut path_stack: Vec<(String, String)> = Vec::new();

        let root_dir = root_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.merge_manifest(&root, &root, "", &root_dir, None, &mut path_stack, &mut result)?;

        self.apply_overrides(&root, &mut result)?;
        Ok(result)
    }

    /// Merge one parsed manifest into the result, recursing into its
    /// imports. `prefix` is the accumulated root-path prefix; `source_dir`
    /// is the directory the manifest was read from (for local imports);
    /// `source_rev` is the revision local imports must be read at, `None`
    /// meaning the plain file on disk.
    #[allow(clippy::too_many_arguments)]
    fn merge_manifest(
        &self,
        root: &Manifest,
        manifest: &Manifest,
        prefix: &str,
        source_dir: &Path,
        source_rev: Option<&str>,
        path_stack: &mut Vec<(String, String)>,
        result: &mut ResolvedManifest,
    ) -> Result<()> {
        for import in &manifest.imports.imports {
            let import = self.effective_import(root, import);
            self.resolve_import(root, &import, prefix, path_stack, result)?;
        }

        for local in &manifest.imports.local_imports {
            let key = (source_dir.display().to_string(), local.file.clone());
            check_cycle(path_stack, &key)?;
            path_stack.push(key);
            let content = match source_rev {
                Some(rev) => self.scm.file_at(source_dir, rev, &local.file)?,
                None => std::fs::read_to_string(source_dir.join(&local.file)).map_err(|e| {
                    Error::ManifestParse {
                        message: format!("cannot read local import: {}", e),
                        path: Some(source_dir.join(&local.file).display().to_string()),
                    }
                })?,
            };
            let imported = parse_named(&content, &source_dir.join(&local.file))?;
            self.merge_manifest(
                root,
                &imported,
                prefix,
                source_dir,
                source_rev,
                path_stack,
                result,
            )?;
            path_stack.pop();
        }

        for project in &manifest.projects.projects {
            if !project.attributes.admitted_by(&self.opts.allow) {
                debug!("dropping project '{}' (attributes {})", project.name, project.attributes);
                continue;
            }
            let mut project = project.clone();
            project.path = join_prefix(prefix, &project.path);
            merge_project(result, project)?;
        }

        for package in &manifest.packages.packages {
            if !package.attributes.admitted_by(&self.opts.allow) {
                debug!("dropping package '{}' (attributes {})", package.name, package.attributes);
                continue;
            }
            let mut package = package.clone();
            if !package.path.is_empty() {
                package.path = join_prefix(prefix, &package.path);
            }
            merge_package(result, package)?;
        }

        result.hooks.extend(manifest.hooks.hooks.iter().cloned());
        Ok(())
    }

    /// Fetch (unless in local-manifest mode) and recurse into one remote
    /// import.
    fn resolve_import(
        &self,
        root: &Manifest,
        import: &Import,
        prefix: &str,
        path_stack: &mut Vec<(String, String)>,
        result: &mut ResolvedManifest,
    ) -> Result<()> {
        let key = import.key();
        check_cycle(path_stack, &key)?;
        path_stack.push(key);

        let backing = backing_project(import);
        let dir = self.workspace.project_dir(&backing.path);
        if !dir.exists() {
            debug!("cloning manifest repository {} to {}", import.remote, dir.display());
            self.scm.clone_repo(&import.remote, &dir, 0)?;
        } else if !self.opts.local_manifest {
            self.scm.fetch(&dir)?;
        }

        let (content, read_rev) = if self.opts.local_manifest {
            let file = dir.join(&import.manifest);
            let content = std::fs::read_to_string(&file).map_err(|e| Error::ManifestParse {
                message: format!("cannot read imported manifest: {}", e),
                path: Some(file.display().to_string()),
            })?;
            (content, None)
        } else {
            let rev = if import.revision.is_empty() {
                format!("origin/{}", import.remote_branch())
            } else {
                import.revision.clone()
            };
            let content = self.scm.file_at(&dir, &rev, &import.manifest)?;
            (content, Some(rev))
        };

        let imported = parse_named(&content, &dir.join(&import.manifest))?;
        let nested_prefix = join_root(prefix, &import.root);

        // The backing project is merged on first reference so that the
        // update phase manages the manifest repository like any other.
        if !result.projects.contains_key(&backing.key()) {
            merge_project(result, backing)?;
        }

        self.merge_manifest(
            root,
            &imported,
            &nested_prefix,
            &dir,
            read_rev.as_deref(),
            path_stack,
            result,
        )?;
        path_stack.pop();
        Ok(())
    }

    /// Apply a root-manifest import override, if one names this import.
    fn effective_import(&self, root: &Manifest, import: &Import) -> Import {
        for over in &root.overrides.imports {
            if over.name == import.name && over.remote == import.remote {
                let mut merged = import.clone();
                if !over.revision.is_empty() {
                    merged.revision = over.revision.clone();
                }
                if !over.remote_branch.is_empty() {
                    merged.remote_branch = over.remote_branch.clone();
                }
                return merged;
            }
        }
        import.clone()
    }

    /// Root-manifest project overrides replace resolved entries last and
    /// unconditionally.
    fn apply_overrides(&self, root: &Manifest, result: &mut ResolvedManifest) -> Result<()> {
        for over in &root.overrides.projects {
            let key = over.key();
            match result.projects.get_mut(&key) {
                Some(existing) => {
                    *existing = over.clone();
                }
                None => {
                    return Err(Error::ManifestParse {
                        message: format!("override names unknown project '{}'", key),
                        path: None,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Synthetic project backing an import, checked out at the import's name.
fn backing_project(import: &Import) -> Project {
    Project {
        name: import.name.clone(),
        path: import.name.clone(),
        remote: import.remote.clone(),
        remote_branch: import.remote_branch.clone(),
        revision: import.revision.clone(),
        ..Default::default()
    }
}

fn parse_named(content: &str, path: &Path) -> Result<Manifest> {
    Manifest::parse(content).map_err(|e| match e {
        Error::ManifestParse { message, path: None } => Error::ManifestParse {
            message,
            path: Some(path.display().to_string()),
        },
        other => other,
    })
}

fn check_cycle(path_stack: &[(String, String)], key: &(String, String)) -> Result<()> {
    if path_stack.contains(key) {
        let mut chain: Vec<String> = path_stack
            .iter()
            .map(|(remote, file)| format!("{}?{}", remote, file))
            .collect();
        chain.push(format!("{}?{}", key.0, key.1));
        return Err(Error::ImportCycle {
            cycle: chain.join(" -> "),
        });
    }
    Ok(())
}

fn join_prefix(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        path.to_string()
    } else if path.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), path)
    }
}

fn join_root(outer: &str, inner: &str) -> String {
    join_prefix(outer, inner)
}

fn merge_project(result: &mut ResolvedManifest, project: Project) -> Result<()> {
    let key = project.key();
    if let Some(existing) = result.projects.get(&key) {
        if existing.path != project.path
            || existing.remote != project.remote
            || existing.revision != project.revision
        {
            return Err(Error::MergeConflict {
                key,
                existing: format!(
                    "path={} revision={}",
                    existing.path,
                    if existing.revision.is_empty() { "<branch head>" } else { &existing.revision }
                ),
                incoming: format!(
                    "path={} revision={}",
                    project.path,
                    if project.revision.is_empty() { "<branch head>" } else { &project.revision }
                ),
            });
        }
        return Ok(());
    }
    result.projects.insert(key, project);
    Ok(())
}

fn merge_package(result: &mut ResolvedManifest, package: Package) -> Result<()> {
    if let Some(existing) = result.packages.get(&package.name) {
        if existing.version != package.version || existing.path != package.path {
            return Err(Error::MergeConflict {
                key: package.name.clone(),
                existing: format!("version={}", existing.version),
                incoming: format!("version={}", package.version),
            });
        }
        return Ok(());
    }
    result.packages.insert(package.name.clone(), package);
    Ok(())
}
