//! # Update Planner
//!
//! Diffs the desired project set (a resolved manifest) against the existing
//! set (a workspace scan) into four buckets keyed by project key:
//!
//! * **new** - in the manifest, not on disk; to be cloned.
//! * **deleted** - on disk, not in the manifest; to be removed or reported
//!   depending on garbage-collection mode.
//! * **updated** - present on both sides with differing content; carries
//!   both versions so the executor can detect moves and revision changes.
//! * **unchanged** - present on both sides and identical.
//!
//! The planner is pure; it never touches the filesystem or the network.

use std::collections::BTreeMap;

use crate::manifest::{Project, ProjectKey};

/// An update of one project from its on-disk shape to its manifest shape.
#[derive(Debug, Clone)]
pub struct ProjectUpdate {
    pub old: Project,
    pub new: Project,
}

impl ProjectUpdate {
    /// The checkout must relocate on disk.
    pub fn is_move(&self) -> bool {
        self.old.path != self.new.path
    }
}

/// The diff between desired and existing project sets.
#[derive(Debug, Default)]
pub struct Plan {
    pub new: BTreeMap<ProjectKey, Project>,
    pub deleted: BTreeMap<ProjectKey, Project>,
    pub updated: BTreeMap<ProjectKey, ProjectUpdate>,
    pub unchanged: BTreeMap<ProjectKey, Project>,
}

impl Plan {
    /// Diff `desired` (from the manifest) against `existing` (from a scan).
    pub fn diff(
        desired: &BTreeMap<ProjectKey, Project>,
        existing: &BTreeMap<ProjectKey, Project>,
    ) -> Plan {
        Self::diff_with(desired, existing, projects_equal)
    }

    /// Diff two fully pinned project sets, such as snapshots, where a
    /// revision change alone makes a project updated.
    pub fn diff_exact(
        desired: &BTreeMap<ProjectKey, Project>,
        existing: &BTreeMap<ProjectKey, Project>,
    ) -> Plan {
        Self::diff_with(desired, existing, |have, want| {
            projects_equal(have, want) && have.revision == want.revision
        })
    }

    fn diff_with(
        desired: &BTreeMap<ProjectKey, Project>,
        existing: &BTreeMap<ProjectKey, Project>,
        equal: impl Fn(&Project, &Project) -> bool,
    ) -> Plan {
        let mut plan = Plan::default();

        for (key, want) in desired {
            match existing.get(key) {
                None => {
                    plan.new.insert(key.clone(), want.clone());
                }
                Some(have) => {
                    if equal(have, want) {
                        plan.unchanged.insert(key.clone(), want.clone());
                    } else {
                        plan.updated.insert(
                            key.clone(),
                            ProjectUpdate {
                                old: have.clone(),
                                new: want.clone(),
                            },
                        );
                    }
                }
            }
        }

        for (key, have) in existing {
            if !desired.contains_key(key) {
                plan.deleted.insert(key.clone(), have.clone());
            }
        }

        plan
    }

    pub fn is_noop(&self) -> bool {
        self.new.is_empty() && self.deleted.is_empty() && self.updated.is_empty()
    }

    /// Projects that will exist after the update, in manifest shape.
    pub fn surviving(&self) -> impl Iterator<Item = &Project> {
        self.new
            .values()
            .chain(self.updated.values().map(|u| &u.new))
            .chain(self.unchanged.values())
    }
}

/// Fields that matter for update planning. A scan only recovers name, path,
/// remote, and revision, so only those participate; manifest-only fields
/// like attributes never force a spurious update.
fn projects_equal(have: &Project, want: &Project) -> bool {
    have.path == want.path && have.remote == want.remote
}
