//! # Source-Control Driver
//!
//! All git-level work goes through the [`Scm`] trait: cloning, fetching,
//! detached checkouts, rebases, branch listing, dirty checks, and the
//! per-checkout `GROVE_HEAD` reference recording the manifest-resolved target
//! revision. The reconciliation engine never shells out to git directly.
//!
//! This seam exists for the same reason as the rest of the crate's driver
//! traits: the real implementation ([`GitScm`]) wraps the system `git`
//! command, which automatically handles SSH keys, credential helpers, and
//! anything else configured in `~/.gitconfig`; tests swap in a scripted mock
//! and never touch a real repository or the network.

use std::fs;
use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

/// Name of the per-checkout reference that records the manifest-resolved
/// target revision. Status and diff tooling compares HEAD against it to
/// detect drift.
pub const HEAD_REF: &str = "GROVE_HEAD";

/// The upstream a local branch tracks, with the upstream's current revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracking {
    pub name: String,
    pub revision: String,
}

/// One local branch of a checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub revision: String,
    /// `None` for branches with no configured upstream.
    pub tracking: Option<Tracking>,
}

/// Result of a rebase attempt. `Conflict` means the driver already ran the
/// abort path and the branch is back at its pre-rebase revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    Clean,
    Conflict,
}

/// One commit from a revision-range log, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub commit: String,
    pub subject: String,
    pub body: String,
}

/// Trait for source-control operations - allows mocking in tests
pub trait Scm: Send + Sync {
    /// Clone `remote` into `path`. `depth` of 0 means full history.
    fn clone_repo(&self, remote: &str, path: &Path, depth: u32) -> Result<()>;

    /// Fetch the default remote of an existing checkout.
    fn fetch(&self, path: &Path) -> Result<()>;

    /// Check out `revision` detached.
    fn checkout_detached(&self, path: &Path, revision: &str) -> Result<()>;

    /// Rebase `branch` onto `onto`. On conflict the implementation must
    /// abort the rebase and restore the pre-rebase state before returning
    /// [`RebaseOutcome::Conflict`].
    fn rebase(&self, path: &Path, branch: &str, onto: &str) -> Result<RebaseOutcome>;

    /// Name of the checked-out branch, or `None` when detached.
    fn current_branch(&self, path: &Path) -> Result<Option<String>>;

    /// All local branches with their revisions and tracking info.
    fn branches(&self, path: &Path) -> Result<Vec<BranchInfo>>;

    /// Revision HEAD currently points at.
    fn head_revision(&self, path: &Path) -> Result<String>;

    /// Revision of the remote-tracking ref for `branch` (after a fetch).
    ///
    /// `branch` is the bare branch name, `main` not `origin/main`; the
    /// driver qualifies it against the `origin` remote itself.
    fn remote_branch_revision(&self, path: &Path, branch: &str) -> Result<String>;

    /// Whether the index or working tree carries staged/unstaged changes.
    fn has_uncommitted(&self, path: &Path) -> Result<bool>;

    /// Whether the working tree carries untracked files.
    fn has_untracked(&self, path: &Path) -> Result<bool>;

    /// URL of the default remote.
    fn remote_url(&self, path: &Path) -> Result<String>;

    /// Read a custom ref such as [`HEAD_REF`]; `None` when it does not exist.
    fn read_ref(&self, path: &Path, name: &str) -> Result<Option<String>>;

    /// Create or advance a custom ref.
    fn write_ref(&self, path: &Path, name: &str, revision: &str) -> Result<()>;

    /// True when `ancestor` is reachable from `descendant`.
    fn is_ancestor(&self, path: &Path, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Contents of `file` as of `revision`, read from the object store
    /// without touching the working tree.
    fn file_at(&self, path: &Path, revision: &str, file: &str) -> Result<String>;

    /// Commits reachable from `new` but not from `old`, newest first,
    /// capped at `limit`.
    fn log_range(&self, path: &Path, old: &str, new: &str, limit: usize)
        -> Result<Vec<LogEntry>>;

    /// Delete a checkout from disk.
    fn remove_checkout(&self, path: &Path) -> Result<()>;

    /// Move a checkout to a new path, creating parent directories.
    fn move_checkout(&self, from: &Path, to: &Path) -> Result<()>;
}

/// The default [`Scm`] implementation, wrapping the system `git` command.
pub struct GitScm;

impl GitScm {
    fn run(&self, path: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(args)
            .output()
            .map_err(|e| Error::GitCommand {
                command: args.join(" "),
                path: path.display().to_string(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::GitCommand {
                command: args.join(" "),
                path: path.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Scm for GitScm {
    fn clone_repo(&self, remote: &str, path: &Path, depth: u32) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut cmd = Command::new("git");
        cmd.arg("clone");
        let depth_arg;
        if depth > 0 {
            depth_arg = format!("--depth={}", depth);
            cmd.arg(&depth_arg);
        }
        cmd.arg(remote).arg(path);
        let output = cmd.output().map_err(|e| Error::GitClone {
            remote: remote.to_string(),
            message: e.to_string(),
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.contains("Authentication failed")
                || stderr.contains("Permission denied")
                || stderr.contains("Could not read from remote repository")
            {
                format!(
                    "Authentication failed. Make sure you have access to the repository \
                     (SSH key in ssh-agent, credential helper, or access token). Error: {}",
                    stderr.trim()
                )
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::GitClone {
                remote: remote.to_string(),
                message,
            });
        }
        Ok(())
    }

    fn fetch(&self, path: &Path) -> Result<()> {
        self.run(path, &["fetch", "origin", "--prune"])?;
        Ok(())
    }

    fn checkout_detached(&self, path: &Path, revision: &str) -> Result<()> {
        self.run(path, &["checkout", "--detach", revision])?;
        Ok(())
    }

    fn rebase(&self, path: &Path, branch: &str, onto: &str) -> Result<RebaseOutcome> {
        match self.run(path, &["rebase", onto, branch]) {
            Ok(_) => Ok(RebaseOutcome::Clean),
            Err(_) => {
                // Restore the pre-rebase state; an abort failure here means
                // the checkout was not mid-rebase, which is already the
                // restored state.
                let _ = self.run(path, &["rebase", "--abort"]);
                Ok(RebaseOutcome::Conflict)
            }
        }
    }

    fn current_branch(&self, path: &Path) -> Result<Option<String>> {
        let name = self.run(path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        if name == "HEAD" {
            Ok(None)
        } else {
            Ok(Some(name))
        }
    }

    fn branches(&self, path: &Path) -> Result<Vec<BranchInfo>> {
        let listing = self.run(
            path,
            &[
                "for-each-ref",
                "refs/heads",
                "--format",
                "%(refname:short)\t%(objectname)\t%(upstream:short)\t%(upstream:track,nobracket)",
            ],
        )?;
        let mut branches = parse_branch_listing(&listing);
        for branch in &mut branches {
            if let Some(tracking) = &mut branch.tracking {
                // The upstream ref may be gone (pruned remote branch).
                match self.run(path, &["rev-parse", &tracking.name]) {
                    Ok(rev) => tracking.revision = rev,
                    Err(_) => branch.tracking = None,
                }
            }
        }
        Ok(branches)
    }

    fn head_revision(&self, path: &Path) -> Result<String> {
        self.run(path, &["rev-parse", "HEAD"])
    }

    fn remote_branch_revision(&self, path: &Path, branch: &str) -> Result<String> {
        self.run(path, &["rev-parse", &format!("origin/{}", branch)])
    }

    fn has_uncommitted(&self, path: &Path) -> Result<bool> {
        // Staged changes
        let staged = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["diff-index", "--quiet", "--cached", "HEAD"])
            .status()
            .map_err(Error::Io)?;
        if !staged.success() {
            return Ok(true);
        }
        // Unstaged changes
        let unstaged = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["diff-files", "--quiet"])
            .status()
            .map_err(Error::Io)?;
        Ok(!unstaged.success())
    }

    fn has_untracked(&self, path: &Path) -> Result<bool> {
        let out = self.run(path, &["ls-files", "--others", "--exclude-standard"])?;
        Ok(!out.is_empty())
    }

    fn remote_url(&self, path: &Path) -> Result<String> {
        self.run(path, &["config", "--get", "remote.origin.url"])
    }

    fn read_ref(&self, path: &Path, name: &str) -> Result<Option<String>> {
        match self.run(path, &["rev-parse", "--verify", "--quiet", name]) {
            Ok(rev) if !rev.is_empty() => Ok(Some(rev)),
            _ => Ok(None),
        }
    }

    fn write_ref(&self, path: &Path, name: &str, revision: &str) -> Result<()> {
        self.run(path, &["update-ref", name, revision])?;
        Ok(())
    }

    fn is_ancestor(&self, path: &Path, ancestor: &str, descendant: &str) -> Result<bool> {
        let status = Command::new("git")
            .arg("-C")
            .arg(path)
            .args(["merge-base", "--is-ancestor", ancestor, descendant])
            .status()
            .map_err(Error::Io)?;
        Ok(status.success())
    }

    fn file_at(&self, path: &Path, revision: &str, file: &str) -> Result<String> {
        self.run(path, &["show", &format!("{}:{}", revision, file)])
    }

    fn log_range(
        &self,
        path: &Path,
        old: &str,
        new: &str,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        // Unit separators inside a record, record separator between commits.
        let output = self.run(
            path,
            &[
                "log",
                "--pretty=format:%H%x1f%s%x1f%b%x1e",
                &format!("-n{}", limit),
                &format!("{}..{}", old, new),
            ],
        )?;
        Ok(parse_log_records(&output))
    }

    fn remove_checkout(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)?;
        Ok(())
    }

    fn move_checkout(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(from, to)?;
        Ok(())
    }
}

/// Parse `for-each-ref` output into branch records. The upstream revision is
/// filled in by the caller; a fourth field of `gone` marks a stale upstream.
fn parse_branch_listing(listing: &str) -> Vec<BranchInfo> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.to_string();
            let revision = fields.next()?.to_string();
            if name.is_empty() || revision.is_empty() {
                return None;
            }
            let upstream = fields.next().unwrap_or("");
            let track = fields.next().unwrap_or("");
            let tracking = if upstream.is_empty() || track == "gone" {
                None
            } else {
                Some(Tracking {
                    name: upstream.to_string(),
                    revision: String::new(),
                })
            };
            Some(BranchInfo {
                name,
                revision,
                tracking,
            })
        })
        .collect()
}

/// Parse `log --pretty` records delimited by 0x1e, fields by 0x1f.
fn parse_log_records(output: &str) -> Vec<LogEntry> {
    output
        .split('\x1e')
        .filter_map(|record| {
            let mut fields = record.trim_matches(['\n', ' ']).split('\x1f');
            let commit = fields.next()?.trim().to_string();
            if commit.is_empty() {
                return None;
            }
            Some(LogEntry {
                commit,
                subject: fields.next().unwrap_or("").to_string(),
                body: fields.next().unwrap_or("").trim().to_string(),
            })
        })
        .collect()
}
