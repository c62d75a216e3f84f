//! # Error Handling
//!
//! Centralized error type for the `grove` library. The `Error` enum covers
//! every anticipated failure mode, grouped by the taxonomy the rest of the
//! crate relies on:
//!
//! - **Fatal resolution errors** (`ManifestParse`, `ImportCycle`,
//!   `MergeConflict`): raised before any working tree is touched; they abort
//!   the whole run.
//! - **Lockfile conflicts** (`LockConflict`): fatal unless suppression was
//!   requested by the caller.
//! - **Per-project source-control errors** (`GitClone`, `GitCommand`,
//!   `Rebase`): recorded against one project and never halt the run; the
//!   update executor aggregates them. `Rebase` is its own variant so callers
//!   can classify a run whose only failures were rebase conflicts as
//!   user-fixable.
//! - **Collaborator errors** (`PackageFetch`, `Hook`, `ChangeLog`): failures
//!   of external drivers, fatal for the affected package set / hook only.
//! - **Wrapped library errors** (`Io`, `Xml`, `Json`).

use thiserror::Error;

/// Main error type for grove operations
#[derive(Error, Debug)]
pub enum Error {
    /// A manifest document could not be parsed, or violated a model
    /// invariant (duplicate project key, override of an unknown key, ...).
    #[error("Manifest parse error{}: {message}", path.as_ref().map(|p| format!(" in {}", p)).unwrap_or_default())]
    ManifestParse {
        message: String,
        /// The manifest file being parsed, when known.
        path: Option<String>,
    },

    /// A circular chain of manifest imports was detected.
    ///
    /// The `cycle` field names the full chain back to the repeated ancestor.
    #[error("Import cycle detected: {cycle}")]
    ImportCycle { cycle: String },

    /// Two import branches resolved the same project or package key to
    /// different values.
    #[error("Manifest merge conflict for {key}: {existing} vs {incoming}")]
    MergeConflict {
        key: String,
        existing: String,
        incoming: String,
    },

    /// Two input manifests pin the same key to different revisions or
    /// versions during lockfile generation.
    #[error("Lockfile conflict for {key}: {existing} vs {incoming}")]
    LockConflict {
        key: String,
        existing: String,
        incoming: String,
    },

    /// A git clone failed for one project.
    #[error("Git clone error for {remote}: {message}")]
    GitClone { remote: String, message: String },

    /// A git command failed inside one checkout.
    #[error("Git command failed in {path}: {command} - {stderr}")]
    GitCommand {
        command: String,
        path: String,
        stderr: String,
    },

    /// A rebase hit conflicts. The driver has already aborted the rebase and
    /// restored the pre-rebase state; this records the fact for the summary.
    #[error("Rebase of {branch} in {path} hit conflicts and was aborted")]
    Rebase { path: String, branch: String },

    /// The package driver failed to ensure a package set, after its one
    /// bootstrap retry.
    #[error("Package fetch error for {ensure_file}: {message}")]
    PackageFetch {
        ensure_file: String,
        message: String,
    },

    /// A post-update hook failed or timed out.
    #[error("Hook '{name}' failed: {message}")]
    Hook { name: String, message: String },

    /// The change-log collaborator could not answer a query for one project.
    #[error("Change log query failed for {project}: {message}")]
    ChangeLog { project: String, message: String },

    /// Workspace metadata or configuration is missing or malformed.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An XML (de)serialization error from the manifest codec.
    #[error("XML error: {0}")]
    Xml(String),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

// quick-xml uses DeError for both directions of serde processing.
impl From<quick_xml::DeError> for Error {
    fn from(e: quick_xml::DeError) -> Self {
        Error::Xml(e.to_string())
    }
}

impl Error {
    /// True for the error kinds recorded per project during an update run
    /// rather than aborting it.
    pub fn is_per_project(&self) -> bool {
        matches!(
            self,
            Error::GitClone { .. }
                | Error::GitCommand { .. }
                | Error::Rebase { .. }
                | Error::ChangeLog { .. }
        )
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
