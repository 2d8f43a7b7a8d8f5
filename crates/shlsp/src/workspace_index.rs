//
// workspace_index.rs
//
// Workspace-wide index of analyzed files: per-file declarations and source
// edges, exact/fuzzy name lookup, and transitive reachability in both
// directions. An explicitly owned instance - no module-level mutable state -
// so independent analyzers can coexist in tests.
//

// Allow dead code for index surface that tests exercise directly
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};

use dashmap::DashMap;
use indexmap::IndexMap;
use tower_lsp::lsp_types::{Diagnostic, Url};
use tree_sitter::Tree;

use crate::declarations::Declaration;

/// Everything the index holds for one analyzed file. Replaced wholesale on
/// every re-analysis; no incremental diffing.
#[derive(Clone)]
pub struct FileIndex {
    pub uri: Url,
    /// Every declaration in the file, grouped by name in source order
    pub declarations: IndexMap<String, Vec<Declaration>>,
    /// File-scope declarations, last per name: what sourcing this file exposes
    pub global_declarations: IndexMap<String, Declaration>,
    /// Parse problems surfaced as diagnostics
    pub problems: Vec<Diagnostic>,
    pub tree: Tree,
    pub text: String,
    /// Outgoing inclusion edges; targets may not exist or be unindexed
    pub sourced_uris: HashSet<Url>,
}

pub struct WorkspaceIndex {
    files: DashMap<Url, FileIndex>,
}

impl Default for WorkspaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkspaceIndex {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
        }
    }

    /// Insert or replace a file's entry. Last write wins per URI.
    pub fn upsert(&self, entry: FileIndex) {
        self.files.insert(entry.uri.clone(), entry);
    }

    pub fn remove(&self, uri: &Url) {
        self.files.remove(uri);
    }

    pub fn get(&self, uri: &Url) -> Option<FileIndex> {
        self.files.get(uri).map(|entry| entry.clone())
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.files.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn uris(&self) -> Vec<Url> {
        self.files.iter().map(|entry| entry.key().clone()).collect()
    }

    /// File-scope declarations matching `name` across the whole workspace.
    /// Exact mode requires equality; fuzzy mode uses ordered-subsequence
    /// matching.
    pub fn all_declarations_named(&self, name: &str, fuzzy: bool) -> Vec<Declaration> {
        if fuzzy {
            self.global_declarations_where(|declared| fuzzy_matches(name, declared))
        } else {
            self.global_declarations_where(|declared| declared == name)
        }
    }

    /// File-scope declarations across the whole workspace whose name
    /// satisfies the predicate.
    pub fn global_declarations_where<F>(&self, matches: F) -> Vec<Declaration>
    where
        F: Fn(&str) -> bool,
    {
        let mut results = Vec::new();
        for entry in self.files.iter() {
            for (declared, declaration) in &entry.global_declarations {
                if matches(declared) {
                    results.push(declaration.clone());
                }
            }
        }
        results
    }

    /// Files transitively reachable from `uri` over forward source edges.
    /// Excludes `uri` itself; may contain files that are not indexed.
    pub fn reachable_from(&self, uri: &Url) -> HashSet<Url> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([uri.clone()]);
        while let Some(current) = queue.pop_front() {
            let Some(entry) = self.files.get(&current) else {
                continue;
            };
            for target in &entry.sourced_uris {
                if target != uri && visited.insert(target.clone()) {
                    queue.push_back(target.clone());
                }
            }
        }
        visited
    }

    /// Files that transitively reach `uri` over source edges (the backward
    /// closure). Excludes `uri` itself.
    pub fn reaching_to(&self, uri: &Url) -> HashSet<Url> {
        let mut reverse: HashMap<Url, Vec<Url>> = HashMap::new();
        for entry in self.files.iter() {
            for target in &entry.sourced_uris {
                reverse
                    .entry(target.clone())
                    .or_default()
                    .push(entry.key().clone());
            }
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([uri.clone()]);
        while let Some(current) = queue.pop_front() {
            let Some(parents) = reverse.get(&current) else {
                continue;
            };
            for parent in parents {
                if parent != uri && visited.insert(parent.clone()) {
                    queue.push_back(parent.clone());
                }
            }
        }
        visited
    }
}

/// Ordered, case-insensitive subsequence match: every character of `query`
/// occurs in `name` in the same relative order.
pub fn fuzzy_matches(query: &str, name: &str) -> bool {
    let name: Vec<char> = name.chars().flat_map(char::to_lowercase).collect();
    let mut position = 0;
    for query_char in query.chars().flat_map(char::to_lowercase) {
        match name[position..].iter().position(|&c| c == query_char) {
            Some(offset) => position += offset + 1,
            None => return false,
        }
    }
    true
}


#[cfg(test)]
mod property_tests {
    use super::fuzzy_matches;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Every name is an ordered subsequence of itself.
        #[test]
        fn prop_name_matches_itself(name in "[A-Za-z_][A-Za-z0-9_]{0,12}") {
            prop_assert!(fuzzy_matches(&name, &name));
        }

        /// Deleting characters from a name yields a matching query.
        #[test]
        fn prop_subsequence_always_matches(
            name in "[A-Za-z_][A-Za-z0-9_]{0,12}",
            mask in prop::collection::vec(any::<bool>(), 13),
        ) {
            let query: String = name
                .chars()
                .zip(mask.iter().cycle())
                .filter_map(|(c, keep)| keep.then_some(c))
                .collect();
            prop_assert!(fuzzy_matches(&query, &name));
        }

        /// Matching is insensitive to the query's case.
        #[test]
        fn prop_case_insensitive(
            query in "[A-Za-z]{0,6}",
            name in "[A-Za-z_]{0,12}",
        ) {
            prop_assert_eq!(
                fuzzy_matches(&query, &name),
                fuzzy_matches(&query.to_uppercase(), &name)
            );
        }

        /// A query longer than the name can never match: each query
        /// character consumes a distinct name character.
        #[test]
        fn prop_longer_query_never_matches(name in "[A-Za-z]{1,8}") {
            let query = format!("{name}x");
            prop_assert!(!fuzzy_matches(&query, &name));
        }
    }
}
