//! # Status Reporting
//!
//! Read-only views over scanned project state. Nothing in this module
//! mutates a checkout; the views compare each project's head against its
//! recorded `GROVE_HEAD` to show drift from the last update without
//! re-resolving the manifest.

use std::collections::BTreeMap;

use crate::config::Workspace;
use crate::error::Result;
use crate::scanner::ProjectState;
use crate::scm::{LogEntry, Scm, HEAD_REF};
use crate::manifest::ProjectKey;

/// Narrowing filters for the status view. Every enabled filter must hold
/// for a project to be listed.
#[derive(Debug, Clone, Default)]
pub struct StatusFilter {
    /// Only projects with uncommitted or untracked changes.
    pub changes: bool,
    /// Only projects whose head has moved off `GROVE_HEAD`.
    pub not_head: bool,
    /// Include the commits between `GROVE_HEAD` and the current head.
    pub commits: bool,
    /// Only projects currently on this branch.
    pub branch: Option<String>,
}

/// Status of one project relative to its last update.
#[derive(Debug, Clone)]
pub struct ProjectStatus {
    pub name: String,
    pub path: String,
    /// `None` when detached.
    pub current_branch: Option<String>,
    pub head_revision: String,
    /// The manifest-designated revision recorded at the last update, if
    /// this project has been through one.
    pub grove_head: Option<String>,
    pub has_uncommitted: bool,
    pub has_untracked: bool,
    /// Commits ahead of `GROVE_HEAD`, newest first. Populated only when
    /// the filter asks for commits.
    pub commits: Vec<LogEntry>,
}

impl ProjectStatus {
    /// The checkout has moved off the revision the last update put it at.
    pub fn is_drifted(&self) -> bool {
        match &self.grove_head {
            Some(head) => *head != self.head_revision,
            None => false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.has_uncommitted || self.has_untracked
    }
}

/// Build the status view, filtered and sorted by project path.
pub fn status(
    workspace: &Workspace,
    scm: &dyn Scm,
    states: &BTreeMap<ProjectKey, ProjectState>,
    filter: &StatusFilter,
) -> Result<Vec<ProjectStatus>> {
    let mut listed = Vec::new();

    for state in states.values() {
        let dir = workspace.project_dir(&state.project.path);
        let grove_head = scm.read_ref(&dir, HEAD_REF)?;

        let mut entry = ProjectStatus {
            name: state.project.name.clone(),
            path: state.project.path.clone(),
            current_branch: state.current_branch.as_ref().map(|b| b.name.clone()),
            head_revision: state.head_revision.clone(),
            grove_head,
            has_uncommitted: state.has_uncommitted,
            has_untracked: state.has_untracked,
            commits: Vec::new(),
        };

        if filter.changes && !entry.is_dirty() {
            continue;
        }
        if filter.not_head && !entry.is_drifted() {
            continue;
        }
        if let Some(branch) = &filter.branch {
            if entry.current_branch.as_deref() != Some(branch.as_str()) {
                continue;
            }
        }

        if filter.commits && entry.is_drifted() {
            if let Some(base) = &entry.grove_head {
                entry.commits = scm.log_range(&dir, base, &entry.head_revision, 100)?;
            }
        }
        listed.push(entry);
    }

    listed.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(listed)
}

/// One project carrying a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchOccurrence {
    pub project: String,
    /// This project is currently on the branch.
    pub current: bool,
    /// The branch has a configured upstream in this project.
    pub tracked: bool,
}

/// All projects carrying one local branch name.
#[derive(Debug, Clone)]
pub struct BranchView {
    pub name: String,
    pub occurrences: Vec<BranchOccurrence>,
}

/// Group local branches across the workspace, sorted by branch name.
pub fn branch_views(states: &BTreeMap<ProjectKey, ProjectState>) -> Vec<BranchView> {
    let mut grouped: BTreeMap<String, Vec<BranchOccurrence>> = BTreeMap::new();

    for state in states.values() {
        let current = state.current_branch.as_ref().map(|b| b.name.clone());
        for branch in &state.branches {
            grouped
                .entry(branch.name.clone())
                .or_default()
                .push(BranchOccurrence {
                    project: state.project.name.clone(),
                    current: current.as_deref() == Some(branch.name.as_str()),
                    tracked: branch.tracking.is_some(),
                });
        }
    }

    grouped
        .into_iter()
        .map(|(name, mut occurrences)| {
            occurrences.sort_by(|a, b| a.project.cmp(&b.project));
            BranchView { name, occurrences }
        })
        .collect()
}
