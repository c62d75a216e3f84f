//! # Manifest Schema and Parsing
//!
//! This module defines the data structures that represent a grove manifest
//! document, as well as the logic for parsing and serializing it. A manifest
//! declares the desired state of a workspace: the projects to check out, the
//! prebuilt packages to fetch, the hooks to run after an update, and imports
//! of further manifests hosted in other repositories.
//!
//! ## Document shape
//!
//! ```xml
//! <manifest>
//!   <imports>
//!     <import name="integration" remote="https://host/integration"
//!             manifest="stem.xml" remotebranch="main" root="prefix"/>
//!     <localimport file="more.xml"/>
//!   </imports>
//!   <projects>
//!     <project name="widget" path="src/widget" remote="https://host/widget"
//!              revision="abc123" attributes="optional"/>
//!   </projects>
//!   <packages>
//!     <package name="tools/${platform}/clang" version="git_revision:def"/>
//!   </packages>
//!   <hooks>
//!     <hook name="gen" action="scripts/gen.sh" project="widget"/>
//!   </hooks>
//!   <overrides>
//!     <project name="widget" remote="https://host/widget" revision="fff"/>
//!   </overrides>
//! </manifest>
//! ```
//!
//! The root manifest of a workspace is the file `.grove_manifest` at the
//! workspace root; it usually contains nothing but imports naming the
//! repositories that hold the real manifests.
//!
//! Parsing validates model invariants (no duplicate project keys, no duplicate
//! package names). Serialization sorts projects and packages by key so that
//! emitting an unchanged manifest is byte-stable.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// File name of the root manifest at the workspace root.
pub const ROOT_MANIFEST: &str = ".grove_manifest";

/// Branch tracked when a project does not name one.
pub const DEFAULT_REMOTE_BRANCH: &str = "main";

/// Stable identity of a project: `name=remote`.
///
/// Two projects with the same name but different remotes are distinct; a
/// resolved manifest never contains two entries with the same key.
pub type ProjectKey = String;

/// A set of comma-separated attribute tags, used for optional-fetch filtering.
///
/// Stored sorted so that `to_string` is deterministic regardless of the order
/// tags appeared in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeSet(BTreeSet<String>);

impl AttributeSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parse a comma-separated tag list. Whitespace around tags is trimmed,
    /// empty segments are dropped.
    pub fn parse(s: &str) -> Self {
        Self(
            s.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn insert(&mut self, tag: &str) {
        self.0.insert(tag.to_string());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// The filtering predicate used during resolution: an entry is admitted
    /// when it carries no tags, or when every tag it carries is present in
    /// the allow-set.
    pub fn admitted_by(&self, allow: &AttributeSet) -> bool {
        self.0.iter().all(|t| allow.contains(t))
    }

    pub fn union(&self, other: &AttributeSet) -> AttributeSet {
        Self(self.0.union(&other.0).cloned().collect())
    }
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for tag in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(tag)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for AttributeSet {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for AttributeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AttributeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

/// One source repository declared by the manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(rename = "@name")]
    pub name: String,
    /// Checkout path relative to the workspace root.
    #[serde(rename = "@path")]
    pub path: String,
    /// Remote URL.
    #[serde(rename = "@remote")]
    pub remote: String,
    #[serde(rename = "@remotebranch", default, skip_serializing_if = "String::is_empty")]
    pub remote_branch: String,
    /// Optional pin; empty means track the remote branch head.
    #[serde(rename = "@revision", default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(rename = "@gerrithost", default, skip_serializing_if = "String::is_empty")]
    pub gerrit_host: String,
    /// Shallow-clone depth; 0 means full history.
    #[serde(rename = "@historydepth", default, skip_serializing_if = "is_zero")]
    pub history_depth: u32,
    #[serde(rename = "@attributes", default, skip_serializing_if = "AttributeSet::is_empty")]
    pub attributes: AttributeSet,
    /// Whether submodules of this project are managed as grove projects.
    #[serde(rename = "@gitsubmodules", default, skip_serializing_if = "is_false")]
    pub git_submodules: bool,
    /// Name of the parent project when this project *is* a submodule.
    #[serde(rename = "@gitsubmoduleof", default, skip_serializing_if = "String::is_empty")]
    pub git_submodule_of: String,
}

impl Project {
    /// Stable identity used for all keyed maps.
    pub fn key(&self) -> ProjectKey {
        format!("{}={}", self.name, self.remote)
    }

    /// The remote branch this project tracks, defaulting to
    /// [`DEFAULT_REMOTE_BRANCH`] when the manifest names none.
    pub fn remote_branch(&self) -> &str {
        if self.remote_branch.is_empty() {
            DEFAULT_REMOTE_BRANCH
        } else {
            &self.remote_branch
        }
    }

    /// True when the manifest pins an exact revision rather than a branch.
    pub fn is_pinned(&self) -> bool {
        !self.revision.is_empty()
    }
}

/// A reference to a manifest hosted in another repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Import {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@remote")]
    pub remote: String,
    /// File name of the manifest inside the imported repository.
    #[serde(rename = "@manifest")]
    pub manifest: String,
    #[serde(rename = "@revision", default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(rename = "@remotebranch", default, skip_serializing_if = "String::is_empty")]
    pub remote_branch: String,
    /// Path prefix joined onto every project path in the imported subtree.
    #[serde(rename = "@root", default, skip_serializing_if = "String::is_empty")]
    pub root: String,
}

impl Import {
    /// Identity of the manifest file this import names, used for cycle
    /// detection along a resolution path.
    pub fn key(&self) -> (String, String) {
        (self.remote.clone(), self.manifest.clone())
    }

    pub fn remote_branch(&self) -> &str {
        if self.remote_branch.is_empty() {
            DEFAULT_REMOTE_BRANCH
        } else {
            &self.remote_branch
        }
    }
}

/// An import of a manifest file next to the importing one, read from the same
/// checkout without any fetch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalImport {
    #[serde(rename = "@file")]
    pub file: String,
}

/// A prebuilt binary package fetched by the external package driver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Package path template; may contain `${platform}`, `${os}`, `${arch}`.
    #[serde(rename = "@name")]
    pub name: String,
    /// Version pin, e.g. a content tag or `git_revision:<hash>`.
    #[serde(rename = "@version")]
    pub version: String,
    /// Install path relative to the workspace root.
    #[serde(rename = "@path", default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Internal packages go into the separate `_internal` ensure documents.
    #[serde(rename = "@internal", default, skip_serializing_if = "is_false")]
    pub internal: bool,
    #[serde(rename = "@attributes", default, skip_serializing_if = "AttributeSet::is_empty")]
    pub attributes: AttributeSet,
}

/// A post-update hook, run from inside its project's checkout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    #[serde(rename = "@name")]
    pub name: String,
    /// Script path relative to the project checkout.
    #[serde(rename = "@action")]
    pub action: String,
    /// Name of the project whose checkout the hook runs in.
    #[serde(rename = "@project")]
    pub project: String,
}

/// Container for the `<imports>` element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Imports {
    #[serde(rename = "import", default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<Import>,
    #[serde(rename = "localimport", default, skip_serializing_if = "Vec::is_empty")]
    pub local_imports: Vec<LocalImport>,
}

impl Imports {
    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.local_imports.is_empty()
    }
}

/// Container for the `<projects>` element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projects {
    #[serde(rename = "project", default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<Project>,
}

impl Projects {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}

/// Container for the `<packages>` element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Packages {
    #[serde(rename = "package", default, skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<Package>,
}

impl Packages {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Container for the `<hooks>` element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hooks {
    #[serde(rename = "hook", default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<Hook>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

/// Container for the `<overrides>` element. Entries here are applied by the
/// resolver after all imports are merged, unconditionally replacing resolved
/// entries with the same key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    #[serde(rename = "project", default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<Project>,
    #[serde(rename = "import", default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<Import>,
}

impl Overrides {
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.imports.is_empty()
    }
}

/// A single manifest document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "manifest")]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Imports::is_empty")]
    pub imports: Imports,
    #[serde(default, skip_serializing_if = "Projects::is_empty")]
    pub projects: Projects,
    #[serde(default, skip_serializing_if = "Packages::is_empty")]
    pub packages: Packages,
    #[serde(default, skip_serializing_if = "Hooks::is_empty")]
    pub hooks: Hooks,
    #[serde(default, skip_serializing_if = "Overrides::is_empty")]
    pub overrides: Overrides,
}

impl Manifest {
    /// Parse a manifest document and validate its model invariants.
    pub fn parse(xml: &str) -> Result<Manifest> {
        let manifest: Manifest = quick_xml::de::from_str(xml)?;
        manifest.validate(None)?;
        Ok(manifest)
    }

    /// Read and parse a manifest file.
    pub fn from_file(path: &Path) -> Result<Manifest> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = quick_xml::de::from_str(&content).map_err(|e| {
            Error::ManifestParse {
                message: e.to_string(),
                path: Some(path.display().to_string()),
            }
        })?;
        manifest.validate(Some(path))?;
        Ok(manifest)
    }

    fn validate(&self, path: Option<&Path>) -> Result<()> {
        let source = path.map(|p| p.display().to_string());
        let mut keys = BTreeSet::new();
        for project in &self.projects.projects {
            if project.name.is_empty() || project.remote.is_empty() {
                return Err(Error::ManifestParse {
                    message: format!(
                        "project '{}' must carry both a name and a remote",
                        project.name
                    ),
                    path: source.clone(),
                });
            }
            if !keys.insert(project.key()) {
                return Err(Error::ManifestParse {
                    message: format!("duplicate project key '{}'", project.key()),
                    path: source.clone(),
                });
            }
        }
        let mut package_names = BTreeSet::new();
        for package in &self.packages.packages {
            if !package_names.insert(package.name.clone()) {
                return Err(Error::ManifestParse {
                    message: format!("duplicate package '{}'", package.name),
                    path: source.clone(),
                });
            }
        }
        Ok(())
    }

    /// Serialize to an XML document.
    ///
    /// Projects and packages are emitted sorted by key so that serializing an
    /// unchanged manifest is byte-stable.
    pub fn to_xml_string(&self) -> Result<String> {
        let mut sorted = self.clone();
        sorted
            .projects
            .projects
            .sort_by(|a, b| a.key().cmp(&b.key()));
        sorted
            .packages
            .packages
            .sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let mut ser = quick_xml::se::Serializer::new(&mut out);
        ser.indent(' ', 2);
        sorted.serialize(ser)?;
        out.push('\n');
        Ok(out)
    }

    /// Write the serialized manifest to a file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_xml_string()?)?;
        Ok(())
    }

    /// Projects keyed by [`ProjectKey`].
    pub fn project_map(&self) -> BTreeMap<ProjectKey, Project> {
        self.projects
            .projects
            .iter()
            .map(|p| (p.key(), p.clone()))
            .collect()
    }
}
