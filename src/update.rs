//! # Update Executor
//!
//! Drives a workspace from its scanned state to the state a resolved
//! manifest describes. Work proceeds in four strictly ordered phases, each
//! fanned out over a bounded worker pool and fully finished before the next
//! begins:
//!
//! 1. **fetch-all** - refresh remote refs for every kept project.
//! 2. **act-all** - clone, checkout, rebase, move, or remove per project.
//! 3. **hooks-all** - run manifest hooks sequentially.
//! 4. **packages-all** - materialize prebuilt packages.
//!
//! One project's source-control failure never halts the run; outcomes are
//! aggregated and the summary distinguishes rebase conflicts, which the user
//! can resolve in the affected checkout, from any other failure.
//!
//! Every successfully positioned project gets its `GROVE_HEAD` ref advanced
//! to the manifest-designated revision, so later status reports can show
//! drift without re-resolving the manifest.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::{LocalConfig, Workspace};
use crate::error::{Error, Result};
use crate::manifest::{Project, ProjectKey};
use crate::packages::{self, PackageResolver};
use crate::planner::Plan;
use crate::resolver::ResolvedManifest;
use crate::scanner::{self, ProjectState};
use crate::scm::{RebaseOutcome, Scm, HEAD_REF};
use crate::{hooks, planner};

/// Classification of one existing checkout against its target revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkTreeState {
    Absent,
    DetachedAtTarget,
    DetachedElsewhere,
    OnTrackedBranch,
    OnUntrackedBranch,
    Dirty,
}

/// Classify a scanned checkout. Dirtiness wins over everything else; a
/// checkout with local modifications is never touched regardless of where
/// its head sits.
pub fn classify(state: &ProjectState, target_revision: &str) -> WorkTreeState {
    if state.is_dirty() {
        return WorkTreeState::Dirty;
    }
    match &state.current_branch {
        Some(branch) if branch.tracking.is_some() => WorkTreeState::OnTrackedBranch,
        Some(_) => WorkTreeState::OnUntrackedBranch,
        None if state.head_revision == target_revision => WorkTreeState::DetachedAtTarget,
        None => WorkTreeState::DetachedElsewhere,
    }
}

/// What the executor did to one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Cloned,
    Updated,
    UpToDate,
    Rebased,
    RebaseFailed,
    /// Skipped by policy (`ignore`, `no-update`, or `no-rebase`).
    Skipped,
    /// Untouched because the checkout has local modifications.
    SkippedDirty,
    /// Left on an untracked branch.
    OnUntrackedBranch,
    Removed,
    /// No longer in the manifest but left on disk.
    Reported,
}

#[derive(Debug, Clone)]
pub struct ProjectOutcome {
    pub key: ProjectKey,
    pub action: Action,
    pub error: Option<String>,
}

/// How a finished run should be judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Clean,
    /// Every failure was a rebase conflict the user can resolve locally.
    RebaseConflictsOnly,
    Failed,
}

#[derive(Debug, Default)]
pub struct UpdateSummary {
    pub outcomes: Vec<ProjectOutcome>,
    pub rebase_failures: usize,
    pub failures: usize,
    pub hook_failures: usize,
    pub package_failures: usize,
}

impl UpdateSummary {
    pub fn classify_run(&self) -> RunOutcome {
        if self.failures > 0 || self.hook_failures > 0 || self.package_failures > 0 {
            RunOutcome::Failed
        } else if self.rebase_failures > 0 {
            RunOutcome::RebaseConflictsOnly
        } else {
            RunOutcome::Clean
        }
    }

    pub fn count(&self, action: Action) -> usize {
        self.outcomes.iter().filter(|o| o.action == action).count()
    }
}

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Remove checkouts no longer in the manifest.
    pub gc: bool,
    /// Rebase every tracked local branch, not just the current one.
    pub rebase_all: bool,
    /// Also rebase branches with no tracking branch, onto the manifest
    /// revision.
    pub rebase_untracked: bool,
    /// Rebase the current tracked branch. On by default.
    pub rebase_tracked: bool,
    pub run_hooks: bool,
    pub fetch_packages: bool,
    /// Minutes per hook.
    pub hook_timeout: u64,
    /// Minutes per package set.
    pub package_timeout: u64,
    /// Worker pool size; `0` means the rayon default.
    pub jobs: usize,
    /// Pin checkouts to exact revisions and never rebase. Used when
    /// restoring a snapshot.
    pub snapshot_mode: bool,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            gc: false,
            rebase_all: false,
            rebase_untracked: false,
            rebase_tracked: true,
            run_hooks: true,
            fetch_packages: true,
            hook_timeout: 5,
            package_timeout: 30,
            jobs: 0,
            snapshot_mode: false,
        }
    }
}

pub struct UpdateExecutor<'a> {
    workspace: &'a Workspace,
    scm: &'a dyn Scm,
    packages: &'a dyn PackageResolver,
    opts: UpdateOptions,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(
        workspace: &'a Workspace,
        scm: &'a dyn Scm,
        packages: &'a dyn PackageResolver,
        opts: UpdateOptions,
    ) -> Self {
        Self {
            workspace,
            scm,
            packages,
            opts,
        }
    }

    /// Run the full update: fetch, act, hooks, packages.
    pub fn execute(
        &self,
        plan: &Plan,
        states: &BTreeMap<ProjectKey, ProjectState>,
        resolved: &ResolvedManifest,
    ) -> Result<UpdateSummary> {
        if self.opts.jobs > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.opts.jobs)
                .build()
                .map_err(|e| Error::Config {
                    message: format!("cannot build worker pool: {}", e),
                })?;
            pool.install(|| self.run_phases(plan, states, resolved))
        } else {
            self.run_phases(plan, states, resolved)
        }
    }

    fn run_phases(
        &self,
        plan: &Plan,
        states: &BTreeMap<ProjectKey, ProjectState>,
        resolved: &ResolvedManifest,
    ) -> Result<UpdateSummary> {
        let rebase_failures = AtomicUsize::new(0);
        let failures = AtomicUsize::new(0);
        let outcomes: Mutex<Vec<ProjectOutcome>> = Mutex::new(Vec::new());
        let fetch_failed: Mutex<BTreeSet<ProjectKey>> = Mutex::new(BTreeSet::new());

        // Phase 1: fetch-all. Policy-skipped projects are not fetched.
        let kept: Vec<(&ProjectKey, &Project)> = plan
            .updated
            .iter()
            .map(|(k, u)| (k, &u.old))
            .chain(plan.unchanged.iter().map(|(k, p)| {
                let old = states.get(k).map(|s| &s.project).unwrap_or(p);
                (k, old)
            }))
            .collect();
        kept.par_iter().for_each(|&(key, project)| {
            let dir = self.workspace.project_dir(&project.path);
            let policy = LocalConfig::load(&dir).unwrap_or_default();
            if policy.ignore || policy.no_update {
                return;
            }
            if let Err(e) = self.scm.fetch(&dir) {
                warn!("fetch failed for '{}': {}", project.name, e);
                failures.fetch_add(1, Ordering::SeqCst);
                fetch_failed.lock().unwrap().insert(key.clone());
                outcomes.lock().unwrap().push(ProjectOutcome {
                    key: key.clone(),
                    action: Action::Skipped,
                    error: Some(e.to_string()),
                });
            }
        });
        let fetch_failed = fetch_failed.into_inner().map_err(|_| Error::LockPoisoned {
            context: "fetch phase".to_string(),
        })?;

        // Phase 2: act-all.
        let removed: Mutex<BTreeSet<ProjectKey>> = Mutex::new(BTreeSet::new());

        plan.new.par_iter().for_each(|(key, project)| {
            let result = self.clone_project(project);
            record(&outcomes, &failures, &rebase_failures, key, result);
        });

        plan.updated
            .par_iter()
            .map(|(key, update)| (key, update.clone()))
            .chain(plan.unchanged.par_iter().map(|(key, project)| {
                let old = states
                    .get(key)
                    .map(|s| s.project.clone())
                    .unwrap_or_else(|| project.clone());
                (
                    key,
                    planner::ProjectUpdate {
                        old,
                        new: project.clone(),
                    },
                )
            }))
            .for_each(|(key, update)| {
                if fetch_failed.contains(key) {
                    return;
                }
                let result = match states.get(key) {
                    Some(state) => self.update_project(&update, state),
                    None => self.clone_project(&update.new),
                };
                record(&outcomes, &failures, &rebase_failures, key, result);
            });

        plan.deleted.par_iter().for_each(|(key, project)| {
            let result = self.handle_deleted(project, states.get(key));
            if let Ok(Action::Removed) = result {
                removed.lock().unwrap().insert(key.clone());
            }
            record(&outcomes, &failures, &rebase_failures, key, result);
        });

        let removed = removed.into_inner().map_err(|_| Error::LockPoisoned {
            context: "act phase".to_string(),
        })?;

        let mut summary = UpdateSummary {
            outcomes: outcomes.into_inner().map_err(|_| Error::LockPoisoned {
                context: "act phase".to_string(),
            })?,
            rebase_failures: rebase_failures.load(Ordering::SeqCst),
            failures: failures.load(Ordering::SeqCst),
            hook_failures: 0,
            package_failures: 0,
        };
        summary.outcomes.sort_by(|a, b| a.key.cmp(&b.key));

        // Phase 3: hooks-all.
        let surviving: BTreeMap<ProjectKey, Project> = plan
            .surviving()
            .map(|p| (p.key(), p.clone()))
            .collect();
        if self.opts.run_hooks && !resolved.hooks.is_empty() {
            let errors = hooks::run_hooks(
                self.workspace,
                &resolved.hooks,
                &surviving,
                self.opts.hook_timeout,
            );
            summary.hook_failures = errors.len();
        }

        // Phase 4: packages-all.
        if self.opts.fetch_packages && !resolved.packages.is_empty() {
            let errors = packages::fetch_packages(
                self.workspace,
                self.packages,
                &resolved.packages,
                self.opts.package_timeout,
            );
            summary.package_failures = errors.len();
        }

        // The index must reflect what is on disk afterwards: the manifest
        // set plus anything reported but not removed.
        let mut on_disk = surviving;
        for (key, project) in &plan.deleted {
            if !removed.contains(key) {
                on_disk.insert(key.clone(), project.clone());
            }
        }
        scanner::write_index(self.workspace, &on_disk)?;
        if self.workspace.config()?.enable_submodules {
            scanner::write_gitmodules(self.workspace, &on_disk)?;
        }

        Ok(summary)
    }

    /// Manifest-designated revision for a project. Pinned revisions win;
    /// otherwise the fetched remote branch head.
    fn target_revision(&self, project: &Project, dir: &PathBuf) -> Result<String> {
        if project.is_pinned() {
            Ok(project.revision.clone())
        } else {
            self.scm
                .remote_branch_revision(dir, project.remote_branch())
        }
    }

    fn clone_project(&self, project: &Project) -> Result<Action> {
        let dir = self.workspace.project_dir(&project.path);
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("cloning '{}' into {}", project.name, project.path);
        self.scm
            .clone_repo(&project.remote, &dir, project.history_depth)?;
        let target = self.target_revision(project, &dir)?;
        self.scm.checkout_detached(&dir, &target)?;
        self.scm.write_ref(&dir, HEAD_REF, &target)?;
        Ok(Action::Cloned)
    }

    fn update_project(
        &self,
        update: &planner::ProjectUpdate,
        state: &ProjectState,
    ) -> Result<Action> {
        let old_dir = self.workspace.project_dir(&update.old.path);
        let policy = LocalConfig::load(&old_dir)?;
        if policy.ignore {
            debug!("'{}' ignored by local config", update.new.name);
            return Ok(Action::Skipped);
        }
        if policy.no_update {
            debug!("'{}' held back by local config", update.new.name);
            return Ok(Action::Skipped);
        }

        if update.is_move() {
            if state.is_dirty() {
                warn!(
                    "not moving '{}' from {} to {}: uncommitted changes",
                    update.new.name, update.old.path, update.new.path
                );
                return Ok(Action::SkippedDirty);
            }
            let new_dir = self.workspace.project_dir(&update.new.path);
            if let Some(parent) = new_dir.parent() {
                std::fs::create_dir_all(parent)?;
            }
            info!(
                "moving '{}' from {} to {}",
                update.new.name, update.old.path, update.new.path
            );
            self.scm.move_checkout(&old_dir, &new_dir)?;
        }

        let dir = self.workspace.project_dir(&update.new.path);
        let target = self.target_revision(&update.new, &dir)?;

        match classify(state, &target) {
            WorkTreeState::Absent => unreachable!("existing project classified absent"),
            WorkTreeState::Dirty => {
                warn!("'{}' has local changes, not updating", update.new.name);
                Ok(Action::SkippedDirty)
            }
            _ if self.opts.snapshot_mode => {
                self.scm.write_ref(&dir, HEAD_REF, &target)?;
                if state.head_revision == target {
                    Ok(Action::UpToDate)
                } else {
                    self.scm.checkout_detached(&dir, &target)?;
                    Ok(Action::Updated)
                }
            }
            WorkTreeState::DetachedAtTarget => {
                self.scm.write_ref(&dir, HEAD_REF, &target)?;
                Ok(Action::UpToDate)
            }
            WorkTreeState::DetachedElsewhere => {
                // Local commits on a detached head would become unreachable
                if !self.scm.is_ancestor(&dir, &state.head_revision, &target)? {
                    warn!(
                        "project '{}': detached head {} is not contained in {}, \
                         local commits stay reachable only through the reflog",
                        update.new.name, state.head_revision, target
                    );
                }
                self.scm.checkout_detached(&dir, &target)?;
                self.scm.write_ref(&dir, HEAD_REF, &target)?;
                Ok(Action::Updated)
            }
            WorkTreeState::OnTrackedBranch => {
                self.scm.write_ref(&dir, HEAD_REF, &target)?;
                self.rebase_branches(&update.new, state, &dir, &target, &policy)
            }
            WorkTreeState::OnUntrackedBranch => {
                self.scm.write_ref(&dir, HEAD_REF, &target)?;
                let branch = state
                    .current_branch
                    .as_ref()
                    .map(|b| b.name.clone())
                    .unwrap_or_default();
                if self.opts.rebase_untracked && !policy.no_rebase {
                    match self.scm.rebase(&dir, &branch, &target)? {
                        RebaseOutcome::Clean => Ok(Action::Rebased),
                        RebaseOutcome::Conflict => Err(Error::Rebase {
                            path: update.new.path.clone(),
                            branch,
                        }),
                    }
                } else {
                    warn!(
                        "'{}' is on untracked branch '{}', leaving it alone",
                        update.new.name, branch
                    );
                    Ok(Action::OnUntrackedBranch)
                }
            }
        }
    }

    /// Rebase the current tracked branch, then under `rebase_all` every
    /// other local branch. The first conflict aborts remaining rebases for
    /// this project.
    fn rebase_branches(
        &self,
        project: &Project,
        state: &ProjectState,
        dir: &PathBuf,
        target: &str,
        policy: &LocalConfig,
    ) -> Result<Action> {
        if policy.no_rebase || !self.opts.rebase_tracked {
            debug!("'{}' not rebased by policy", project.name);
            return Ok(Action::Skipped);
        }

        let current = state
            .current_branch
            .as_ref()
            .ok_or_else(|| Error::GitCommand {
                command: "rebase".to_string(),
                path: project.path.clone(),
                stderr: "no current branch".to_string(),
            })?;
        let tracking = current.tracking.as_ref().map(|t| t.name.clone()).unwrap_or_default();
        if let RebaseOutcome::Conflict = self.scm.rebase(dir, &current.name, &tracking)? {
            return Err(Error::Rebase {
                path: project.path.clone(),
                branch: current.name.clone(),
            });
        }

        if self.opts.rebase_all {
            for branch in &state.branches {
                if branch.name == current.name {
                    continue;
                }
                let onto = match &branch.tracking {
                    Some(t) => t.name.clone(),
                    None if self.opts.rebase_untracked => target.to_string(),
                    None => continue,
                };
                if let RebaseOutcome::Conflict = self.scm.rebase(dir, &branch.name, &onto)? {
                    return Err(Error::Rebase {
                        path: project.path.clone(),
                        branch: branch.name.clone(),
                    });
                }
            }
        }
        Ok(Action::Rebased)
    }

    fn handle_deleted(
        &self,
        project: &Project,
        state: Option<&ProjectState>,
    ) -> Result<Action> {
        let dir = self.workspace.project_dir(&project.path);
        let policy = LocalConfig::load(&dir)?;
        if policy.ignore {
            return Ok(Action::Skipped);
        }

        warn!(
            "project '{}' at {} is no longer in the manifest",
            project.name, project.path
        );
        if !self.opts.gc {
            return Ok(Action::Reported);
        }
        if state.map(|s| s.is_dirty()).unwrap_or(false) {
            warn!(
                "not removing '{}': uncommitted changes, clean it up or re-add it",
                project.name
            );
            return Ok(Action::Reported);
        }
        info!("removing '{}'", project.name);
        self.scm.remove_checkout(&dir)?;
        Ok(Action::Removed)
    }
}

fn record(
    outcomes: &Mutex<Vec<ProjectOutcome>>,
    failures: &AtomicUsize,
    rebase_failures: &AtomicUsize,
    key: &ProjectKey,
    result: Result<Action>,
) {
    let outcome = match result {
        Ok(action) => ProjectOutcome {
            key: key.clone(),
            action,
            error: None,
        },
        Err(e @ Error::Rebase { .. }) => {
            rebase_failures.fetch_add(1, Ordering::SeqCst);
            ProjectOutcome {
                key: key.clone(),
                action: Action::RebaseFailed,
                error: Some(e.to_string()),
            }
        }
        Err(e) => {
            failures.fetch_add(1, Ordering::SeqCst);
            warn!("update failed for '{}': {}", key, e);
            ProjectOutcome {
                key: key.clone(),
                action: Action::Skipped,
                error: Some(e.to_string()),
            }
        }
    };
    if let Ok(mut guard) = outcomes.lock() {
        guard.push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::{BranchInfo, Tracking};
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    /// Scripted driver keyed by checkout path relative to the workspace
    /// root. Records every mutating call for assertions.
    struct MockScm {
        root: PathBuf,
        revisions: Mutex<HashMap<String, String>>,
        remote_revisions: HashMap<String, String>,
        rebase_conflicts: Vec<String>,
        ops: Mutex<Vec<String>>,
    }

    impl MockScm {
        fn new(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                revisions: Mutex::new(HashMap::new()),
                remote_revisions: HashMap::new(),
                rebase_conflicts: Vec::new(),
                ops: Mutex::new(Vec::new()),
            }
        }

        fn key(&self, path: &Path) -> String {
            path.strip_prefix(&self.root)
                .unwrap_or(path)
                .to_string_lossy()
                .to_string()
        }

        fn log(&self, op: String) {
            self.ops.lock().unwrap().push(op);
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().unwrap().clone()
        }
    }

    impl Scm for MockScm {
        fn clone_repo(&self, remote: &str, path: &Path, _depth: u32) -> Result<()> {
            self.log(format!("clone {} {}", remote, self.key(path)));
            std::fs::create_dir_all(path.join(".git"))?;
            Ok(())
        }
        fn fetch(&self, path: &Path) -> Result<()> {
            self.log(format!("fetch {}", self.key(path)));
            Ok(())
        }
        fn checkout_detached(&self, path: &Path, revision: &str) -> Result<()> {
            self.log(format!("checkout {} {}", self.key(path), revision));
            self.revisions
                .lock()
                .unwrap()
                .insert(self.key(path), revision.to_string());
            Ok(())
        }
        fn rebase(&self, path: &Path, branch: &str, onto: &str) -> Result<RebaseOutcome> {
            self.log(format!("rebase {} {} onto {}", self.key(path), branch, onto));
            if self.rebase_conflicts.contains(&branch.to_string()) {
                Ok(RebaseOutcome::Conflict)
            } else {
                Ok(RebaseOutcome::Clean)
            }
        }
        fn current_branch(&self, _path: &Path) -> Result<Option<String>> {
            Ok(None)
        }
        fn branches(&self, _path: &Path) -> Result<Vec<BranchInfo>> {
            Ok(vec![])
        }
        fn head_revision(&self, path: &Path) -> Result<String> {
            Ok(self
                .revisions
                .lock()
                .unwrap()
                .get(&self.key(path))
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()))
        }
        fn remote_branch_revision(&self, path: &Path, branch: &str) -> Result<String> {
            // Callers hand over the bare branch name; the driver qualifies it
            assert!(
                !branch.starts_with("origin/"),
                "remote_branch_revision got a qualified ref: {}",
                branch
            );
            self.remote_revisions
                .get(&format!("{}@{}", self.key(path), branch))
                .cloned()
                .ok_or_else(|| Error::GitCommand {
                    command: format!("rev-parse origin/{}", branch),
                    path: path.display().to_string(),
                    stderr: "unknown remote branch".to_string(),
                })
        }
        fn has_uncommitted(&self, _path: &Path) -> Result<bool> {
            Ok(false)
        }
        fn has_untracked(&self, _path: &Path) -> Result<bool> {
            Ok(false)
        }
        fn remote_url(&self, _path: &Path) -> Result<String> {
            Ok("unused".to_string())
        }
        fn read_ref(&self, _path: &Path, _name: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn write_ref(&self, path: &Path, name: &str, revision: &str) -> Result<()> {
            self.log(format!("write-ref {} {} {}", self.key(path), name, revision));
            Ok(())
        }
        fn is_ancestor(&self, _path: &Path, _a: &str, _d: &str) -> Result<bool> {
            Ok(true)
        }
        fn file_at(&self, path: &Path, _revision: &str, file: &str) -> Result<String> {
            Err(Error::GitCommand {
                command: format!("show :{}", file),
                path: path.display().to_string(),
                stderr: "not scripted".to_string(),
            })
        }
        fn log_range(
            &self,
            _path: &Path,
            _old: &str,
            _new: &str,
            _limit: usize,
        ) -> Result<Vec<crate::scm::LogEntry>> {
            Ok(vec![])
        }
        fn remove_checkout(&self, path: &Path) -> Result<()> {
            self.log(format!("remove {}", self.key(path)));
            std::fs::remove_dir_all(path)?;
            Ok(())
        }
        fn move_checkout(&self, from: &Path, to: &Path) -> Result<()> {
            self.log(format!("move {} {}", self.key(from), self.key(to)));
            std::fs::rename(from, to)?;
            Ok(())
        }
    }

    struct NoopPackages;
    impl PackageResolver for NoopPackages {
        fn ensure(&self, _e: &Path, _v: &Path, _t: u64) -> Result<()> {
            Ok(())
        }
        fn check_access(&self, _p: &[String]) -> Result<BTreeMap<String, bool>> {
            Ok(BTreeMap::new())
        }
    }

    fn project(name: &str, path: &str, revision: &str) -> Project {
        Project {
            name: name.to_string(),
            path: path.to_string(),
            remote: format!("https://host/{}", name),
            revision: revision.to_string(),
            ..Default::default()
        }
    }

    fn detached_state(project: &Project, head: &str) -> ProjectState {
        ProjectState {
            project: project.clone(),
            current_branch: None,
            branches: vec![],
            head_revision: head.to_string(),
            has_uncommitted: false,
            has_untracked: false,
        }
    }

    fn tracked_state(project: &Project, head: &str, branch: &str) -> ProjectState {
        let info = BranchInfo {
            name: branch.to_string(),
            revision: head.to_string(),
            tracking: Some(Tracking {
                name: format!("origin/{}", branch),
                revision: "upstream".to_string(),
            }),
        };
        ProjectState {
            project: project.clone(),
            current_branch: Some(info.clone()),
            branches: vec![info],
            head_revision: head.to_string(),
            has_uncommitted: false,
            has_untracked: false,
        }
    }

    fn setup() -> (TempDir, Workspace) {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::init(temp.path()).unwrap();
        (temp, ws)
    }

    fn resolved_with(projects: &[Project]) -> ResolvedManifest {
        let mut resolved = ResolvedManifest::default();
        for p in projects {
            resolved.projects.insert(p.key(), p.clone());
        }
        resolved
    }

    fn run(
        ws: &Workspace,
        scm: &MockScm,
        plan: &Plan,
        states: &BTreeMap<ProjectKey, ProjectState>,
        resolved: &ResolvedManifest,
        opts: UpdateOptions,
    ) -> UpdateSummary {
        let pkgs = NoopPackages;
        UpdateExecutor::new(ws, scm, &pkgs, opts)
            .execute(plan, states, resolved)
            .unwrap()
    }

    #[test]
    fn test_classify() {
        let p = project("a", "src/a", "target");
        assert_eq!(
            classify(&detached_state(&p, "target"), "target"),
            WorkTreeState::DetachedAtTarget
        );
        assert_eq!(
            classify(&detached_state(&p, "elsewhere"), "target"),
            WorkTreeState::DetachedElsewhere
        );
        assert_eq!(
            classify(&tracked_state(&p, "x", "work"), "target"),
            WorkTreeState::OnTrackedBranch
        );

        let mut untracked = tracked_state(&p, "x", "work");
        untracked.current_branch.as_mut().unwrap().tracking = None;
        assert_eq!(classify(&untracked, "target"), WorkTreeState::OnUntrackedBranch);

        let mut dirty = tracked_state(&p, "x", "work");
        dirty.has_uncommitted = true;
        assert_eq!(classify(&dirty, "target"), WorkTreeState::Dirty);
    }

    #[test]
    fn test_new_project_is_cloned_and_pinned() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-a");

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &BTreeMap::new());
        let summary = run(
            &ws,
            &scm,
            &plan,
            &BTreeMap::new(),
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::Cloned), 1);
        assert_eq!(summary.classify_run(), RunOutcome::Clean);
        let ops = scm.ops();
        assert!(ops.contains(&"clone https://host/a src/a".to_string()));
        assert!(ops.contains(&"checkout src/a rev-a".to_string()));
        assert!(ops.contains(&format!("write-ref src/a {} rev-a", HEAD_REF)));
    }

    #[test]
    fn test_unpinned_project_follows_branch_head() {
        let (_temp, ws) = setup();
        let mut scm = MockScm::new(ws.root());
        scm.remote_revisions
            .insert("src/a@main".to_string(), "branch-head".to_string());
        let p = project("a", "src/a", "");

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &BTreeMap::new());
        let summary = run(
            &ws,
            &scm,
            &plan,
            &BTreeMap::new(),
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::Cloned), 1);
        assert_eq!(summary.classify_run(), RunOutcome::Clean);
        assert!(scm.ops().contains(&"checkout src/a branch-head".to_string()));
    }

    #[test]
    fn test_detached_at_target_is_up_to_date() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-a");
        std::fs::create_dir_all(ws.project_dir("src/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let existing = desired.clone();
        let plan = Plan::diff(&desired, &existing);
        let states = BTreeMap::from([(p.key(), detached_state(&p, "rev-a"))]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::UpToDate), 1);
        // Fetched, head ref advanced, but no checkout
        let ops = scm.ops();
        assert!(ops.contains(&"fetch src/a".to_string()));
        assert!(!ops.iter().any(|op| op.starts_with("checkout")));
    }

    #[test]
    fn test_detached_elsewhere_is_checked_out() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-new");
        std::fs::create_dir_all(ws.project_dir("src/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &desired);
        let states = BTreeMap::from([(p.key(), detached_state(&p, "rev-old"))]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::Updated), 1);
        assert!(scm.ops().contains(&"checkout src/a rev-new".to_string()));
    }

    #[test]
    fn test_dirty_project_is_untouched() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-new");
        std::fs::create_dir_all(ws.project_dir("src/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &desired);
        let mut state = detached_state(&p, "rev-old");
        state.has_untracked = true;
        let states = BTreeMap::from([(p.key(), state)]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::SkippedDirty), 1);
        let ops = scm.ops();
        assert!(!ops.iter().any(|op| op.starts_with("checkout")));
        assert!(!ops.iter().any(|op| op.starts_with("write-ref")));
    }

    #[test]
    fn test_tracked_branch_is_rebased() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-new");
        std::fs::create_dir_all(ws.project_dir("src/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &desired);
        let states = BTreeMap::from([(p.key(), tracked_state(&p, "rev-old", "work"))]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::Rebased), 1);
        assert!(scm
            .ops()
            .contains(&"rebase src/a work onto origin/work".to_string()));
    }

    #[test]
    fn test_rebase_conflict_counts_separately() {
        let (_temp, ws) = setup();
        let mut scm = MockScm::new(ws.root());
        scm.rebase_conflicts.push("work".to_string());
        let p = project("a", "src/a", "rev-new");
        std::fs::create_dir_all(ws.project_dir("src/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &desired);
        let states = BTreeMap::from([(p.key(), tracked_state(&p, "rev-old", "work"))]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::RebaseFailed), 1);
        assert_eq!(summary.rebase_failures, 1);
        assert_eq!(summary.failures, 0);
        assert_eq!(summary.classify_run(), RunOutcome::RebaseConflictsOnly);
    }

    #[test]
    fn test_untracked_branch_left_alone() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-new");
        std::fs::create_dir_all(ws.project_dir("src/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &desired);
        let mut state = tracked_state(&p, "rev-old", "work");
        state.current_branch.as_mut().unwrap().tracking = None;
        state.branches[0].tracking = None;
        let states = BTreeMap::from([(p.key(), state)]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::OnUntrackedBranch), 1);
        assert!(!scm.ops().iter().any(|op| op.starts_with("rebase")));
    }

    #[test]
    fn test_untracked_branch_rebased_on_request() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-new");
        std::fs::create_dir_all(ws.project_dir("src/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &desired);
        let mut state = tracked_state(&p, "rev-old", "work");
        state.current_branch.as_mut().unwrap().tracking = None;
        state.branches[0].tracking = None;
        let states = BTreeMap::from([(p.key(), state)]);
        let opts = UpdateOptions {
            rebase_untracked: true,
            ..Default::default()
        };
        let summary = run(&ws, &scm, &plan, &states, &resolved_with(&[p]), opts);

        assert_eq!(summary.count(Action::Rebased), 1);
        assert!(scm
            .ops()
            .contains(&"rebase src/a work onto rev-new".to_string()));
    }

    #[test]
    fn test_deleted_project_reported_without_gc() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("gone", "src/gone", "rev");
        std::fs::create_dir_all(ws.project_dir("src/gone").join(".git")).unwrap();

        let existing = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&BTreeMap::new(), &existing);
        let states = BTreeMap::from([(p.key(), detached_state(&p, "rev"))]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &ResolvedManifest::default(),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::Reported), 1);
        assert!(ws.project_dir("src/gone").exists());
    }

    #[test]
    fn test_deleted_project_removed_under_gc() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("gone", "src/gone", "rev");
        std::fs::create_dir_all(ws.project_dir("src/gone").join(".git")).unwrap();

        let existing = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&BTreeMap::new(), &existing);
        let states = BTreeMap::from([(p.key(), detached_state(&p, "rev"))]);
        let opts = UpdateOptions {
            gc: true,
            ..Default::default()
        };
        let summary = run(&ws, &scm, &plan, &states, &ResolvedManifest::default(), opts);

        assert_eq!(summary.count(Action::Removed), 1);
        assert!(!ws.project_dir("src/gone").exists());
    }

    #[test]
    fn test_dirty_deleted_project_survives_gc() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("gone", "src/gone", "rev");
        std::fs::create_dir_all(ws.project_dir("src/gone").join(".git")).unwrap();

        let existing = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&BTreeMap::new(), &existing);
        let mut state = detached_state(&p, "rev");
        state.has_uncommitted = true;
        let states = BTreeMap::from([(p.key(), state)]);
        let opts = UpdateOptions {
            gc: true,
            ..Default::default()
        };
        let summary = run(&ws, &scm, &plan, &states, &ResolvedManifest::default(), opts);

        assert_eq!(summary.count(Action::Reported), 1);
        assert_eq!(summary.classify_run(), RunOutcome::Clean);
        assert!(ws.project_dir("src/gone").exists());
    }

    #[test]
    fn test_moved_project_relocates_before_checkout() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let old = project("a", "old/a", "rev");
        let new = project("a", "new/a", "rev-new");
        std::fs::create_dir_all(ws.project_dir("old/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(new.key(), new.clone())]);
        let existing = BTreeMap::from([(old.key(), old.clone())]);
        let plan = Plan::diff(&desired, &existing);
        let states = BTreeMap::from([(old.key(), detached_state(&old, "rev"))]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &resolved_with(&[new]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::Updated), 1);
        let ops = scm.ops();
        let move_pos = ops.iter().position(|op| op == "move old/a new/a").unwrap();
        let checkout_pos = ops
            .iter()
            .position(|op| op == "checkout new/a rev-new")
            .unwrap();
        assert!(move_pos < checkout_pos);
    }

    #[test]
    fn test_ignore_policy_skips_everything() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-new");
        let dir = ws.project_dir("src/a");
        std::fs::create_dir_all(dir.join(".git")).unwrap();
        LocalConfig {
            ignore: true,
            ..Default::default()
        }
        .store(&dir)
        .unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &desired);
        let states = BTreeMap::from([(p.key(), detached_state(&p, "rev-old"))]);
        let summary = run(
            &ws,
            &scm,
            &plan,
            &states,
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        assert_eq!(summary.count(Action::Skipped), 1);
        // Not even fetched
        assert!(scm.ops().is_empty());
    }

    #[test]
    fn test_snapshot_mode_never_rebases() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "pinned");
        std::fs::create_dir_all(ws.project_dir("src/a").join(".git")).unwrap();

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &desired);
        let states = BTreeMap::from([(p.key(), tracked_state(&p, "rev-old", "work"))]);
        let opts = UpdateOptions {
            snapshot_mode: true,
            ..Default::default()
        };
        let summary = run(&ws, &scm, &plan, &states, &resolved_with(&[p]), opts);

        assert_eq!(summary.count(Action::Updated), 1);
        let ops = scm.ops();
        assert!(!ops.iter().any(|op| op.starts_with("rebase")));
        assert!(ops.contains(&"checkout src/a pinned".to_string()));
    }

    #[test]
    fn test_index_rewritten_after_run() {
        let (_temp, ws) = setup();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-a");

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &BTreeMap::new());
        run(
            &ws,
            &scm,
            &plan,
            &BTreeMap::new(),
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        let index = std::fs::read_to_string(ws.scan_index_path()).unwrap();
        assert!(index.contains("src/a"));
        // Off by default
        assert!(!ws.gitmodules_path().exists());
    }

    #[test]
    fn test_submodule_layout_written_when_enabled() {
        let (_temp, ws) = setup();
        crate::config::GlobalConfig {
            enable_submodules: true,
            ..Default::default()
        }
        .write_to(&ws.config_path())
        .unwrap();
        let scm = MockScm::new(ws.root());
        let p = project("a", "src/a", "rev-a");

        let desired = BTreeMap::from([(p.key(), p.clone())]);
        let plan = Plan::diff(&desired, &BTreeMap::new());
        run(
            &ws,
            &scm,
            &plan,
            &BTreeMap::new(),
            &resolved_with(&[p]),
            UpdateOptions::default(),
        );

        let layout = std::fs::read_to_string(ws.gitmodules_path()).unwrap();
        assert!(layout.contains("[submodule \"a\"]"));
        assert!(layout.contains("\tpath = src/a"));
    }
}
