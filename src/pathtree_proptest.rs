//! Property-based tests for the path-prefix trie.
//!
//! These tests use proptest to generate random insertion sequences and verify
//! that the no-nesting invariant holds for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use crate::pathtree::{segments, Insert, PathTree};
    use proptest::prelude::*;

    /// Strategy for a normalized-ish project path of 1-4 segments drawn from
    /// a small alphabet, so that collisions and nestings actually happen.
    fn path_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(vec!["a", "b", "c", "d"]), 1..5)
            .prop_map(|segs| segs.join("/"))
    }

    proptest! {
        /// Property: after any insertion sequence, no surviving entry's path
        /// is a strict prefix of another surviving entry's path.
        #[test]
        fn no_entry_nests_under_another(paths in prop::collection::vec(path_strategy(), 1..20)) {
            let mut tree = PathTree::new();
            for (i, path) in paths.iter().enumerate() {
                tree.insert(path, &format!("p{}", i));
            }
            let entries = tree.entries();
            for (i, (a, _)) in entries.iter().enumerate() {
                for (j, (b, _)) in entries.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    let a_segs = segments(a);
                    let b_segs = segments(b);
                    let is_prefix = a_segs.len() < b_segs.len()
                        && b_segs[..a_segs.len()] == a_segs[..];
                    prop_assert!(
                        !is_prefix,
                        "'{}' is a path prefix of '{}' after inserts {:?}",
                        a, b, paths
                    );
                }
            }
        }

        /// Property: every insert is accounted for - it either survives in
        /// the tree, was reported dropped, or was later evicted.
        #[test]
        fn inserts_are_conserved(paths in prop::collection::vec(path_strategy(), 1..20)) {
            let mut tree = PathTree::new();
            let mut dropped = 0usize;
            let mut evicted = 0usize;
            for (i, path) in paths.iter().enumerate() {
                match tree.insert(path, &format!("p{}", i)) {
                    Insert::Ok { evicted: e } => evicted += e.len(),
                    Insert::Dropped { .. } => dropped += 1,
                }
            }
            prop_assert_eq!(tree.entries().len() + dropped + evicted, paths.len());
        }

        /// Property: inserting the same path twice keeps the first occupant.
        #[test]
        fn first_occupant_wins(path in path_strategy()) {
            let mut tree = PathTree::new();
            tree.insert(&path, &"first".to_string());
            let second = tree.insert(&path, &"second".to_string());
            prop_assert!(
                matches!(second, Insert::Dropped { ref owner, .. } if owner == "first"),
                "expected Insert::Dropped with owner \"first\", got {:?}",
                second
            );
            let entries = tree.entries();
            prop_assert_eq!(entries.len(), 1);
            prop_assert_eq!(entries[0].1.as_str(), "first");
        }

        /// Property: entries() output is deterministic and sorted.
        #[test]
        fn entries_are_sorted(paths in prop::collection::vec(path_strategy(), 1..20)) {
            let mut tree = PathTree::new();
            for (i, path) in paths.iter().enumerate() {
                tree.insert(path, &format!("p{}", i));
            }
            let entries = tree.entries();
            let mut sorted = entries.clone();
            sorted.sort();
            prop_assert_eq!(entries, sorted);
        }
    }
}
