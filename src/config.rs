//! # Workspace Metadata and Configuration
//!
//! A grove workspace is marked by a `.grove` metadata directory at its root,
//! next to the `.grove_manifest` root manifest. This module handles:
//!
//! - locating the workspace root from any directory inside it,
//! - the global workspace configuration stored at `.grove/config.xml`
//!   (cache path, lockfile/submodule enablement, analytics opt-in,
//!   partial-clone settings, scanner excludes, optional attribute tags),
//! - the per-project [`LocalConfig`] policy file recording the
//!   `ignore` / `no_update` / `no_rebase` booleans. The reconciliation engine
//!   reads local configs before computing any action and never writes them;
//!   only `grove project-config` mutates them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::AttributeSet;

/// Name of the workspace metadata directory.
pub const METADATA_DIR: &str = ".grove";

/// Scanner index written after every successful update, relative to the
/// metadata directory.
pub const SCAN_INDEX_FILE: &str = "projects.json";

/// Global configuration file, relative to the metadata directory.
pub const CONFIG_FILE: &str = "config.xml";

/// Submodule layout export, relative to the metadata directory.
pub const GITMODULES_FILE: &str = "gitmodules";

/// A located workspace root with access to its metadata paths.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Use `root` as the workspace root, verifying its metadata directory
    /// exists.
    pub fn at(root: &Path) -> Result<Workspace> {
        if !root.join(METADATA_DIR).is_dir() {
            return Err(Error::Config {
                message: format!(
                    "{} is not a grove workspace (no {} directory)",
                    root.display(),
                    METADATA_DIR
                ),
            });
        }
        Ok(Workspace {
            root: root.to_path_buf(),
        })
    }

    /// Walk up from `start` to the nearest directory containing `.grove`.
    pub fn find(start: &Path) -> Result<Workspace> {
        let mut dir = Some(start);
        while let Some(d) = dir {
            if d.join(METADATA_DIR).is_dir() {
                return Ok(Workspace {
                    root: d.to_path_buf(),
                });
            }
            dir = d.parent();
        }
        Err(Error::Config {
            message: format!(
                "no grove workspace found above {} (missing {} directory)",
                start.display(),
                METADATA_DIR
            ),
        })
    }

    /// Create the metadata directory under `root`, making it a workspace.
    pub fn init(root: &Path) -> Result<Workspace> {
        std::fs::create_dir_all(root.join(METADATA_DIR))?;
        Ok(Workspace {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    /// Path of the root manifest (`.grove_manifest`).
    pub fn root_manifest_path(&self) -> PathBuf {
        self.root.join(crate::manifest::ROOT_MANIFEST)
    }

    pub fn scan_index_path(&self) -> PathBuf {
        self.metadata_dir().join(SCAN_INDEX_FILE)
    }

    pub fn gitmodules_path(&self) -> PathBuf {
        self.metadata_dir().join(GITMODULES_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.metadata_dir().join(CONFIG_FILE)
    }

    /// Absolute checkout path for a manifest-relative project path.
    pub fn project_dir(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Load the global config, falling back to defaults when the file does
    /// not exist yet.
    pub fn config(&self) -> Result<GlobalConfig> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }
        GlobalConfig::from_file(&path)
    }
}

/// Workspace-wide settings persisted at `.grove/config.xml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "config", default)]
pub struct GlobalConfig {
    /// Shared git object cache; empty means the platform cache directory.
    #[serde(rename = "cachedir", skip_serializing_if = "String::is_empty")]
    pub cache_dir: String,
    #[serde(rename = "enablelockfile")]
    pub enable_lockfile: bool,
    #[serde(rename = "enablesubmodules")]
    pub enable_submodules: bool,
    #[serde(rename = "analyticsoptin")]
    pub analytics_opt_in: bool,
    /// Comma-separated blob filters excluded from partial clones.
    #[serde(rename = "partialcloneexclude", skip_serializing_if = "String::is_empty")]
    pub partial_clone_exclude: String,
    /// Directory names the full scan never descends into, beyond the
    /// built-in set.
    #[serde(rename = "excludedirs", skip_serializing_if = "Vec::is_empty")]
    pub exclude_dirs: Vec<String>,
    /// Attribute tags added to the resolver's allow-set.
    #[serde(rename = "fetchoptional", skip_serializing_if = "AttributeSet::is_empty")]
    pub fetch_optional: AttributeSet,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            cache_dir: String::new(),
            enable_lockfile: false,
            enable_submodules: false,
            analytics_opt_in: false,
            partial_clone_exclude: String::new(),
            exclude_dirs: Vec::new(),
            fetch_optional: AttributeSet::new(),
        }
    }
}

impl GlobalConfig {
    pub fn from_file(path: &Path) -> Result<GlobalConfig> {
        let content = std::fs::read_to_string(path)?;
        let config: GlobalConfig =
            quick_xml::de::from_str(&content).map_err(|e| Error::Config {
                message: format!("malformed {}: {}", path.display(), e),
            })?;
        Ok(config)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        let ser = quick_xml::se::Serializer::new(&mut out);
        self.serialize(ser)?;
        out.push('\n');
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Effective cache directory, defaulting to the platform cache dir.
    pub fn effective_cache_dir(&self) -> PathBuf {
        if self.cache_dir.is_empty() {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".grove-cache"))
                .join("grove")
        } else {
            PathBuf::from(&self.cache_dir)
        }
    }
}

/// Per-project persisted policy, stored inside the checkout's git metadata
/// directory so it survives project moves and never dirties the work tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "localconfig", default)]
pub struct LocalConfig {
    /// Skip the project entirely: no fetch, no checkout, no move, no delete.
    #[serde(rename = "@ignore")]
    pub ignore: bool,
    /// Never fetch or advance the checkout, but still report it.
    #[serde(rename = "@noupdate")]
    pub no_update: bool,
    /// Never rebase local branches in this project.
    #[serde(rename = "@norebase")]
    pub no_rebase: bool,
}

impl LocalConfig {
    /// Location of the local-config file for a checkout.
    pub fn path_for(project_dir: &Path) -> PathBuf {
        project_dir.join(".git").join("grove").join("config.xml")
    }

    /// Read the policy for a checkout; a missing file means all defaults.
    pub fn load(project_dir: &Path) -> Result<LocalConfig> {
        let path = Self::path_for(project_dir);
        if !path.exists() {
            return Ok(LocalConfig::default());
        }
        let content = std::fs::read_to_string(&path)?;
        let config: LocalConfig =
            quick_xml::de::from_str(&content).map_err(|e| Error::Config {
                message: format!("malformed {}: {}", path.display(), e),
            })?;
        Ok(config)
    }

    /// Persist the policy for a checkout.
    pub fn store(&self, project_dir: &Path) -> Result<()> {
        let path = Self::path_for(project_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = String::new();
        let ser = quick_xml::se::Serializer::new(&mut out);
        self.serialize(ser)?;
        out.push('\n');
        std::fs::write(path, out)?;
        Ok(())
    }

    pub fn is_default(&self) -> bool {
        !self.ignore && !self.no_update && !self.no_rebase
    }
}
