//! # Grove Library
//!
//! Core functionality for the `grove` multi-repository workspace tool. A
//! grove workspace is a directory tree holding many git checkouts whose
//! layout and revisions are declared by an XML manifest; the library
//! resolves that manifest (following imports across repositories), compares
//! it against what is on disk, and reconciles the difference.
//!
//! ## Core Concepts
//!
//! - **Manifest (`manifest`)**: the XML data model - projects, imports,
//!   packages, hooks, and overrides.
//! - **Resolver (`resolver`)**: recursively loads a root manifest and its
//!   transitive imports into one merged project set, detecting cycles and
//!   merge conflicts.
//! - **Scanner (`scanner`, `pathtree`)**: discovers the checkouts actually
//!   on disk, either from a persisted index or by walking the tree, and
//!   drops projects nested under other projects' paths.
//! - **Planner (`planner`)**: a pure diff of desired against existing,
//!   bucketed into new, deleted, updated, and unchanged.
//! - **Update executor (`update`)**: drives checkouts to their targets in
//!   bounded parallel phases, honoring per-project policy and never
//!   touching dirty work trees.
//! - **Snapshots (`snapshot`)**: pinned manifest captures, lockfiles, and
//!   snapshot diffs with changelogs.
//! - **Drivers (`scm`, `packages`, `hooks`)**: trait seams over git, the
//!   package client, and hook subprocesses; tests script them.
//!
//! ## Execution Flow
//!
//! A typical update runs: resolve the manifest, scan the workspace, plan
//! the diff, then execute it phase by phase (fetch-all, act-all, hooks-all,
//! packages-all). Status and diff commands reuse the same building blocks
//! read-only.

pub mod config;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod output;
pub mod packages;
pub mod pathtree;
pub mod planner;
pub mod report;
pub mod resolver;
pub mod scanner;
pub mod scm;
pub mod snapshot;
pub mod update;

#[cfg(test)]
mod pathtree_proptest;
