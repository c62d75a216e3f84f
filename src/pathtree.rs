//! # Path-Prefix Trie
//!
//! Projects are keyed on disk by their checkout path, and a checkout must not
//! be physically nested inside another grove-managed checkout: nesting
//! corrupts scanning (the walker would attribute files to the wrong project)
//! and git-submodule structure export. The scanner therefore runs every
//! discovered or resolved project through a [`PathTree`], which keeps at most
//! one occupant per path prefix and reports everything it had to drop.
//!
//! The same tree is reused to render the nested layout description consumed
//! by submodule-structure export.

use std::collections::BTreeMap;

use crate::manifest::ProjectKey;

/// Result of inserting one project path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insert {
    /// The path was free; `evicted` lists any deeper, previously inserted
    /// occupants removed in its favor (the shallower project wins ownership,
    /// and the deeper ones become dropped).
    Ok { evicted: Vec<(String, ProjectKey)> },
    /// The path sits at or below a node already owned by another project;
    /// the incoming project is dropped.
    Dropped { owner_path: String, owner: ProjectKey },
}

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<String, Node>,
    occupant: Option<ProjectKey>,
}

impl Node {
    fn drain_occupants(&mut self, prefix: &str, out: &mut Vec<(String, ProjectKey)>) {
        if let Some(key) = self.occupant.take() {
            out.push((prefix.to_string(), key));
        }
        for (segment, child) in &mut self.children {
            let child_prefix = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{}/{}", prefix, segment)
            };
            child.drain_occupants(&child_prefix, out);
        }
        self.children.clear();
    }
}

/// A trie over normalized path segments with at most one project per prefix.
#[derive(Debug, Default)]
pub struct PathTree {
    root: Node,
}

/// Split a path into its meaningful segments. Empty segments and `.` are
/// dropped; separators are normalized to `/`.
pub fn segments(path: &str) -> Vec<String> {
    path.replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect()
}

impl PathTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a project at `path`, enforcing the no-nesting invariant.
    pub fn insert(&mut self, path: &str, key: &ProjectKey) -> Insert {
        let segs = segments(path);
        let mut node = &mut self.root;
        let mut walked: Vec<&str> = Vec::new();

        for seg in &segs {
            if let Some(owner) = &node.occupant {
                return Insert::Dropped {
                    owner_path: walked.join("/"),
                    owner: owner.clone(),
                };
            }
            walked.push(seg);
            node = node.children.entry(seg.clone()).or_default();
        }

        if let Some(owner) = &node.occupant {
            // Exact-path collision; the earlier occupant keeps the node.
            return Insert::Dropped {
                owner_path: segs.join("/"),
                owner: owner.clone(),
            };
        }

        // Anything below this node is deeper than the incoming project.
        let mut evicted = Vec::new();
        let prefix = segs.join("/");
        for (segment, child) in &mut node.children {
            let child_prefix = if prefix.is_empty() {
                segment.clone()
            } else {
                format!("{}/{}", prefix, segment)
            };
            child.drain_occupants(&child_prefix, &mut evicted);
        }
        node.children.clear();
        node.occupant = Some(key.clone());
        Insert::Ok { evicted }
    }

    /// All `(path, key)` entries in depth-first sorted order.
    pub fn entries(&self) -> Vec<(String, ProjectKey)> {
        let mut out = Vec::new();
        collect(&self.root, String::new(), &mut out);
        out
    }

    /// Render the nested layout in `.gitmodules` form, one section per
    /// surviving project, using `urls` to resolve each key's remote.
    pub fn to_gitmodules(&self, urls: &BTreeMap<ProjectKey, String>) -> String {
        let mut out = String::new();
        for (path, key) in self.entries() {
            let name = key.split('=').next().unwrap_or(&key);
            out.push_str(&format!("[submodule \"{}\"]\n", name));
            out.push_str(&format!("\tpath = {}\n", path));
            if let Some(url) = urls.get(&key) {
                out.push_str(&format!("\turl = {}\n", url));
            }
        }
        out
    }
}

fn collect(node: &Node, prefix: String, out: &mut Vec<(String, ProjectKey)>) {
    if let Some(key) = &node.occupant {
        out.push((prefix.clone(), key.clone()));
    }
    for (segment, child) in &node.children {
        let child_prefix = if prefix.is_empty() {
            segment.clone()
        } else {
            format!("{}/{}", prefix, segment)
        };
        collect(child, child_prefix, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ProjectKey {
        format!("{}=https://host/{}", name, name)
    }

    #[test]
    fn test_insert_disjoint_paths() {
        let mut tree = PathTree::new();
        assert_eq!(
            tree.insert("src/widget", &key("widget")),
            Insert::Ok { evicted: vec![] }
        );
        assert_eq!(
            tree.insert("src/gadget", &key("gadget")),
            Insert::Ok { evicted: vec![] }
        );
        assert_eq!(tree.entries().len(), 2);
    }

    #[test]
    fn test_deeper_project_is_dropped() {
        let mut tree = PathTree::new();
        tree.insert("src/widget", &key("widget"));
        let result = tree.insert("src/widget/vendor", &key("vendor"));
        assert_eq!(
            result,
            Insert::Dropped {
                owner_path: "src/widget".to_string(),
                owner: key("widget"),
            }
        );
        assert_eq!(tree.entries().len(), 1);
    }

    #[test]
    fn test_shallower_project_evicts_deeper() {
        let mut tree = PathTree::new();
        tree.insert("src/widget/vendor", &key("vendor"));
        let result = tree.insert("src/widget", &key("widget"));
        match result {
            Insert::Ok { evicted } => {
                assert_eq!(evicted, vec![("src/widget/vendor".to_string(), key("vendor"))]);
            }
            other => panic!("expected eviction, got {:?}", other),
        }
        assert_eq!(tree.entries(), vec![("src/widget".to_string(), key("widget"))]);
    }

    #[test]
    fn test_exact_path_collision_keeps_first() {
        let mut tree = PathTree::new();
        tree.insert("src/widget", &key("widget"));
        let result = tree.insert("src/widget", &key("impostor"));
        assert_eq!(
            result,
            Insert::Dropped {
                owner_path: "src/widget".to_string(),
                owner: key("widget"),
            }
        );
    }

    #[test]
    fn test_segments_normalization() {
        assert_eq!(segments("a//b/./c/"), vec!["a", "b", "c"]);
        assert_eq!(segments("a\\b"), vec!["a", "b"]);
        assert!(segments("").is_empty());
        assert!(segments("./.").is_empty());
    }

    #[test]
    fn test_sibling_prefix_names_do_not_conflict() {
        // "src/wid" is not a path prefix of "src/widget"
        let mut tree = PathTree::new();
        tree.insert("src/wid", &key("wid"));
        assert_eq!(
            tree.insert("src/widget", &key("widget")),
            Insert::Ok { evicted: vec![] }
        );
    }

    #[test]
    fn test_entries_sorted_depth_first() {
        let mut tree = PathTree::new();
        tree.insert("zz", &key("zz"));
        tree.insert("aa/bb", &key("bb"));
        tree.insert("aa/cc", &key("cc"));
        let paths: Vec<String> = tree.entries().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["aa/bb", "aa/cc", "zz"]);
    }

    #[test]
    fn test_gitmodules_rendering() {
        let mut tree = PathTree::new();
        tree.insert("src/widget", &key("widget"));
        let mut urls = BTreeMap::new();
        urls.insert(key("widget"), "https://host/widget".to_string());
        let out = tree.to_gitmodules(&urls);
        assert!(out.contains("[submodule \"widget\"]"));
        assert!(out.contains("\tpath = src/widget"));
        assert!(out.contains("\turl = https://host/widget"));
    }
}
