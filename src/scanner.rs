//! # Local Project Scanner
//!
//! Discovers the repositories currently checked out in a workspace and, on
//! request, their git-level state.
//!
//! ## Scan modes
//!
//! - **Fast** trusts the index written at `.grove/projects.json` after the
//!   last successful update. Entries whose checkout vanished are dropped; a
//!   missing or unreadable index silently falls back to a full scan.
//! - **Full** walks the directory tree from the workspace root, skipping
//!   excluded directory names, identifying checkout roots by the presence of
//!   a `.git` entry, and reconstructing a `Project` record from the
//!   checkout's recorded remote URL.
//!
//! Both modes feed the [`PathTree`] deduplication step: a checkout nested
//! inside another grove-managed checkout is dropped from the result (and
//! reported), because nested checkouts corrupt scanning and submodule
//! structure export.
//!
//! ## Project state
//!
//! [`project_states`] computes the transient per-checkout [`ProjectState`]
//! (current branch, all branches with tracking info, dirty/untracked flags)
//! with one worker per project. Dirty checks are the most expensive part and
//! only run when asked for.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::config::{GlobalConfig, Workspace, METADATA_DIR};
use crate::error::{Error, Result};
use crate::manifest::{Project, ProjectKey};
use crate::pathtree::{Insert, PathTree};
use crate::scm::{BranchInfo, Scm};

/// How to discover local projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Trust the recorded index when present.
    Fast,
    /// Walk the directory tree.
    Full,
}

/// Outcome of a scan: surviving projects keyed by identity, plus the
/// projects dropped by the nesting check.
#[derive(Debug, Default)]
pub struct ScanResult {
    pub projects: BTreeMap<ProjectKey, Project>,
    pub dropped: Vec<Project>,
}

/// Transient git-level state of one checkout, computed fresh per run and
/// never persisted.
#[derive(Debug, Clone)]
pub struct ProjectState {
    pub project: Project,
    /// `None` when the checkout is detached.
    pub current_branch: Option<BranchInfo>,
    pub branches: Vec<BranchInfo>,
    pub head_revision: String,
    pub has_uncommitted: bool,
    pub has_untracked: bool,
}

impl ProjectState {
    /// Dirty means staged/unstaged changes or untracked files; the update
    /// executor never touches a dirty checkout.
    pub fn is_dirty(&self) -> bool {
        self.has_uncommitted || self.has_untracked
    }
}

/// One line of the persisted scan index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    path: String,
    remote: String,
    revision: String,
}

/// Discover local projects in the requested mode.
pub fn scan(
    workspace: &Workspace,
    scm: &dyn Scm,
    mode: ScanMode,
    config: &GlobalConfig,
) -> Result<ScanResult> {
    let projects = match mode {
        ScanMode::Fast => match read_index(workspace) {
            Some(projects) => projects,
            None => {
                debug!("scan index unusable, falling back to full scan");
                walk_tree(workspace, scm, config)?
            }
        },
        ScanMode::Full => walk_tree(workspace, scm, config)?,
    };
    Ok(dedup_nested(projects))
}

/// Rewrite the scan index from the given project set. Called after every
/// successful update.
pub fn write_index(workspace: &Workspace, projects: &BTreeMap<ProjectKey, Project>) -> Result<()> {
    let entries: Vec<IndexEntry> = projects
        .values()
        .map(|p| IndexEntry {
            name: p.name.clone(),
            path: p.path.clone(),
            remote: p.remote.clone(),
            revision: p.revision.clone(),
        })
        .collect();
    let path = workspace.scan_index_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&entries)?)?;
    Ok(())
}

/// Render the workspace layout as a `.gitmodules`-style document at
/// `.grove/gitmodules`, one section per project. Written after updates when
/// `enablesubmodules` is set, for consumers embedding the workspace as a
/// superproject.
pub fn write_gitmodules(
    workspace: &Workspace,
    projects: &BTreeMap<ProjectKey, Project>,
) -> Result<()> {
    let mut tree = PathTree::new();
    let mut urls = BTreeMap::new();
    for (key, project) in projects {
        // The set already passed nesting dedup, inserts cannot collide
        let _ = tree.insert(&project.path, key);
        urls.insert(key.clone(), project.remote.clone());
    }
    let path = workspace.gitmodules_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, tree.to_gitmodules(&urls))?;
    Ok(())
}

/// Read the fast-scan index, dropping entries whose checkout is gone.
/// Returns `None` when the index is missing or unreadable.
fn read_index(workspace: &Workspace) -> Option<Vec<Project>> {
    let content = std::fs::read_to_string(workspace.scan_index_path()).ok()?;
    let entries: Vec<IndexEntry> = serde_json::from_str(&content).ok()?;
    let mut projects = Vec::new();
    for entry in entries {
        let dir = workspace.project_dir(&entry.path);
        if !dir.join(".git").exists() {
            debug!("index entry '{}' has no checkout at {}, dropping", entry.name, entry.path);
            continue;
        }
        projects.push(Project {
            name: entry.name,
            path: entry.path,
            remote: entry.remote,
            revision: entry.revision,
            ..Default::default()
        });
    }
    Some(projects)
}

/// Directory names the walker never descends into, in addition to the
/// configured excludes.
const BUILTIN_EXCLUDES: &[&str] = &[METADATA_DIR, "out"];

fn walk_tree(
    workspace: &Workspace,
    scm: &dyn Scm,
    config: &GlobalConfig,
) -> Result<Vec<Project>> {
    let root = workspace.root();
    let mut projects = Vec::new();
    let mut it = WalkDir::new(root).into_iter();

    while let Some(entry) = it.next() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if entry.path() != root {
            if name == ".git" {
                it.skip_current_dir();
                continue;
            }
            if BUILTIN_EXCLUDES.contains(&name.as_ref())
                || config.exclude_dirs.iter().any(|d| d == name.as_ref())
            {
                it.skip_current_dir();
                continue;
            }
        }
        if entry.path() != root && entry.path().join(".git").exists() {
            match read_checkout(workspace, scm, entry.path()) {
                Ok(project) => projects.push(project),
                Err(e) => warn!(
                    "skipping unreadable checkout at {}: {}",
                    entry.path().display(),
                    e
                ),
            }
            // Never descend into a checkout; nested checkouts are handled
            // by the path tree from what the index/walk already produced.
            it.skip_current_dir();
        }
    }
    Ok(projects)
}

/// Reconstruct a project record from an on-disk checkout.
fn read_checkout(workspace: &Workspace, scm: &dyn Scm, dir: &Path) -> Result<Project> {
    let remote = scm.remote_url(dir)?;
    let revision = scm.head_revision(dir)?;
    let relative = dir
        .strip_prefix(workspace.root())
        .map_err(|_| Error::Config {
            message: format!("checkout {} is outside the workspace", dir.display()),
        })?;
    let path = relative.to_string_lossy().replace('\\', "/");
    Ok(Project {
        name: project_name_from_remote(&remote),
        path,
        remote,
        revision,
        ..Default::default()
    })
}

/// Derive a project name from its remote URL: the last path segment, minus
/// any `.git` suffix.
pub fn project_name_from_remote(remote: &str) -> String {
    let trimmed = remote.trim_end_matches('/');
    let last = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(trimmed);
    last.trim_end_matches(".git").to_string()
}

/// Run the nesting check over a raw project list.
pub fn dedup_nested(projects: Vec<Project>) -> ScanResult {
    let mut tree = PathTree::new();
    let mut by_key: BTreeMap<ProjectKey, Project> = BTreeMap::new();
    let mut dropped = Vec::new();

    for project in projects {
        let key = project.key();
        match tree.insert(&project.path, &key) {
            Insert::Ok { evicted } => {
                for (path, evicted_key) in evicted {
                    if let Some(deeper) = by_key.remove(&evicted_key) {
                        warn!(
                            "project '{}' at {} is nested under '{}', dropping",
                            evicted_key, path, key
                        );
                        dropped.push(deeper);
                    }
                }
                by_key.insert(key, project);
            }
            Insert::Dropped { owner_path, owner } => {
                warn!(
                    "project '{}' at {} is nested under '{}' at {}, dropping",
                    key, project.path, owner, owner_path
                );
                dropped.push(project);
            }
        }
    }

    ScanResult {
        projects: by_key,
        dropped,
    }
}

/// Compute the git-level state for each project, one worker per project.
///
/// `check_dirty` gates the uncommitted/untracked checks, which dominate the
/// cost of a state scan.
pub fn project_states(
    workspace: &Workspace,
    scm: &dyn Scm,
    projects: &BTreeMap<ProjectKey, Project>,
    check_dirty: bool,
) -> Result<BTreeMap<ProjectKey, ProjectState>> {
    let states: Mutex<BTreeMap<ProjectKey, ProjectState>> = Mutex::new(BTreeMap::new());
    let errors: Mutex<Vec<Error>> = Mutex::new(Vec::new());

    projects.par_iter().for_each(|(key, project)| {
        match project_state(workspace, scm, project, check_dirty) {
            Ok(state) => {
                states.lock().unwrap().insert(key.clone(), state);
            }
            Err(e) => errors.lock().unwrap().push(e),
        }
    });

    let errors = errors.into_inner().map_err(|_| Error::LockPoisoned {
        context: "state scan".to_string(),
    })?;
    if let Some(first) = errors.into_iter().next() {
        return Err(first);
    }
    states.into_inner().map_err(|_| Error::LockPoisoned {
        context: "state scan".to_string(),
    })
}

fn project_state(
    workspace: &Workspace,
    scm: &dyn Scm,
    project: &Project,
    check_dirty: bool,
) -> Result<ProjectState> {
    let dir = workspace.project_dir(&project.path);
    let branches = scm.branches(&dir)?;
    let current_name = scm.current_branch(&dir)?;
    let current_branch =
        current_name.and_then(|name| branches.iter().find(|b| b.name == name).cloned());
    let head_revision = scm.head_revision(&dir)?;
    let (has_uncommitted, has_untracked) = if check_dirty {
        (scm.has_uncommitted(&dir)?, scm.has_untracked(&dir)?)
    } else {
        (false, false)
    };
    Ok(ProjectState {
        project: project.clone(),
        current_branch,
        branches,
        head_revision,
        has_uncommitted,
        has_untracked,
    })
}
