//
// analyzer.rs
//
// The analysis façade consumed by the protocol layer: per-file analysis
// feeding the workspace index, position-based queries combining intra-file
// scope with cross-file reachability, and the two-phase rename.
//

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::bail;
use indexmap::IndexMap;
use tower_lsp::lsp_types::{
    Diagnostic, Location, Position, Range, SymbolInformation, TextEdit, Url,
};

use crate::declarations::{
    collect_parse_problems, extract_all_declarations, extract_global_declarations, Declaration,
    DeclarationKind,
};
use crate::parser_pool;
use crate::rename::{
    find_occurrences_within, find_original_declaration, rename_target, validate_new_name,
    OccurrenceQuery, RenameScope,
};
use crate::scope::local_declarations;
use crate::sourcing::{SourceResolver, TextSourceResolver};
use crate::syntax;
use crate::workspace_index::{FileIndex, WorkspaceIndex};

/// Owns the workspace index and the source-graph resolver. All interior
/// mutability lives here, so independent instances can run side by side.
pub struct Analyzer {
    index: WorkspaceIndex,
    resolver: Box<dyn SourceResolver>,
    workspace_root: RwLock<Option<Url>>,
    include_all_workspace_symbols: AtomicBool,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl Analyzer {
    pub fn new() -> Self {
        Self::with_resolver(Box::<TextSourceResolver>::default())
    }

    /// Build an analyzer around a different source-graph resolver.
    pub fn with_resolver(resolver: Box<dyn SourceResolver>) -> Self {
        Self {
            index: WorkspaceIndex::new(),
            resolver,
            workspace_root: RwLock::new(None),
            include_all_workspace_symbols: AtomicBool::new(false),
        }
    }

    pub fn set_workspace_root(&self, root: Option<Url>) {
        if let Ok(mut guard) = self.workspace_root.write() {
            *guard = root;
        }
    }

    pub fn workspace_root(&self) -> Option<Url> {
        self.workspace_root.read().ok().and_then(|g| g.clone())
    }

    pub fn set_include_all_workspace_symbols(&self, enabled: bool) {
        self.include_all_workspace_symbols
            .store(enabled, Ordering::SeqCst);
    }

    pub fn include_all_workspace_symbols(&self) -> bool {
        self.include_all_workspace_symbols.load(Ordering::SeqCst)
    }

    pub fn indexed_file_count(&self) -> usize {
        self.index.len()
    }

    /// Parse and (re)index a file, returning its parse problems. One logical
    /// turn per URI: parse, extract, upsert; no partial state is observable.
    pub fn analyze_file(&self, uri: &Url, text: &str) -> Vec<Diagnostic> {
        let Some(tree) = parser_pool::parse(text) else {
            // The parser itself gave up; drop any stale entry rather than
            // serve outdated declarations
            log::warn!("Parser produced no tree for {uri}");
            self.index.remove(uri);
            return Vec::new();
        };

        let problems = collect_parse_problems(&tree);

        let mut declarations: IndexMap<String, Vec<Declaration>> = IndexMap::new();
        for declaration in extract_all_declarations(&tree, text, uri) {
            declarations
                .entry(declaration.name.clone())
                .or_default()
                .push(declaration);
        }
        let global_declarations = extract_global_declarations(&tree, text, uri);

        let root = self.workspace_root();
        let sourced_uris = self.resolver.sourced_uris(text, uri, root.as_ref());

        log::trace!(
            "Analyzed {}: {} names, {} globals, {} sourced files, {} problems",
            uri,
            declarations.len(),
            global_declarations.len(),
            sourced_uris.len(),
            problems.len()
        );

        self.index.upsert(FileIndex {
            uri: uri.clone(),
            declarations,
            global_declarations,
            problems: problems.clone(),
            tree,
            text: text.to_string(),
            sourced_uris,
        });

        problems
    }

    pub fn remove_file(&self, uri: &Url) {
        self.index.remove(uri);
    }

    /// The identifier-like word at a position in an analyzed file.
    pub fn word_at(&self, uri: &Url, position: Position) -> Option<String> {
        let entry = self.index.get(uri)?;
        syntax::word_at(&entry.tree, &entry.text, position)
    }

    /// The name of the command spanning a position in an analyzed file.
    pub fn command_at(&self, uri: &Url, position: Position) -> Option<String> {
        let entry = self.index.get(uri)?;
        syntax::command_at(&entry.tree, &entry.text, position)
    }

    /// The comment block directly above `line`, markers stripped.
    pub fn comments_above(&self, uri: &Url, line: u32) -> Option<String> {
        let entry = self.index.get(uri)?;
        syntax::comments_above(&entry.text, line)
    }

    /// Every declaration in a file, for outline/document-symbol use.
    pub fn declarations_for_file(&self, uri: &Url) -> Vec<SymbolInformation> {
        let Some(entry) = self.index.get(uri) else {
            return Vec::new();
        };
        entry
            .declarations
            .values()
            .flatten()
            .map(Declaration::to_symbol_information)
            .collect()
    }

    /// Workspace-wide symbol search with ordered-subsequence matching.
    pub fn fuzzy_find_declarations(&self, query: &str) -> Vec<SymbolInformation> {
        self.index
            .all_declarations_named(query, true)
            .iter()
            .map(Declaration::to_symbol_information)
            .collect()
    }

    /// Declarations of `word` visible from `position` in `uri`: the local
    /// scope first, then either every workspace declaration (when
    /// workspace-wide symbols are enabled) or only declarations in files
    /// connected to this one through source edges. Deduplicated by
    /// (name, kind) with current-file entries winning ties.
    pub fn find_declarations(
        &self,
        uri: &Url,
        word: &str,
        position: Position,
        exact_match: bool,
    ) -> Vec<SymbolInformation> {
        let matches = |name: &str| {
            if exact_match {
                name == word
            } else {
                name.starts_with(word)
            }
        };

        let mut candidates: Vec<Declaration> = Vec::new();

        if let Some(entry) = self.index.get(uri) {
            let visible = local_declarations(Some(&entry.tree), &entry.text, uri, position);
            for (name, declarations) in visible {
                if matches(&name) {
                    if let Some(declaration) = select_visible(&declarations, position) {
                        candidates.push(declaration.clone());
                    }
                }
            }
        }

        if self.include_all_workspace_symbols() {
            candidates.extend(self.index.global_declarations_where(&matches));
        } else {
            let mut connected = self.index.reachable_from(uri);
            connected.extend(self.index.reaching_to(uri));
            for file_uri in connected {
                if file_uri == *uri {
                    continue;
                }
                let Some(entry) = self.index.get(&file_uri) else {
                    continue;
                };
                for (name, declaration) in &entry.global_declarations {
                    if matches(name) {
                        candidates.push(declaration.clone());
                    }
                }
            }
        }

        let mut seen: HashSet<(String, DeclarationKind)> = HashSet::new();
        candidates
            .into_iter()
            .filter(|declaration| seen.insert((declaration.name.clone(), declaration.kind)))
            .map(|declaration| declaration.to_symbol_information())
            .collect()
    }

    /// Every occurrence of `word` across the workspace at a reference or
    /// declaration-site node, unfiltered by scope. A deliberate
    /// over-approximation for cross-file usage search.
    pub fn find_references(&self, word: &str) -> Vec<Location> {
        let mut locations = Vec::new();
        for uri in self.index.uris() {
            let Some(entry) = self.index.get(&uri) else {
                continue;
            };
            for kind in [DeclarationKind::Variable, DeclarationKind::Function] {
                let occurrences = find_occurrences_within(
                    &entry.tree,
                    &entry.text,
                    word,
                    kind,
                    &OccurrenceQuery::default(),
                );
                locations.extend(occurrences.into_iter().map(|range| Location {
                    uri: uri.clone(),
                    range,
                }));
            }
        }
        locations
    }

    /// The renameable symbol at a position: the span of its name token and
    /// its current text.
    pub fn prepare_rename(&self, uri: &Url, position: Position) -> Option<(Range, String)> {
        let entry = self.index.get(uri)?;
        let (word, _, range) = rename_target(&entry.tree, &entry.text, position)?;
        Some((range, word))
    }

    /// Compute rename edits, two phases: classify the original declaration,
    /// then collect occurrences inside the resulting boundary. Validation is
    /// atomic; an invalid name returns an error with no edits computed.
    pub fn rename(
        &self,
        uri: &Url,
        position: Position,
        new_name: &str,
    ) -> anyhow::Result<HashMap<Url, Vec<TextEdit>>> {
        let Some(entry) = self.index.get(uri) else {
            bail!("File has not been analyzed: {uri}");
        };
        let Some((word, kind, _)) = rename_target(&entry.tree, &entry.text, position) else {
            bail!("No renameable symbol at the requested position");
        };

        validate_new_name(new_name, kind)?;

        let scope = find_original_declaration(&entry.tree, &entry.text, position, &word, kind);
        log::trace!("Renaming {word} ({kind:?}) in {uri}: {scope:?}");

        let mut changes: HashMap<Url, Vec<TextEdit>> = HashMap::new();
        let mut add_edits = |target: &Url, ranges: Vec<Range>| {
            if ranges.is_empty() {
                return;
            }
            let edits = changes.entry(target.clone()).or_default();
            edits.extend(ranges.into_iter().map(|range| TextEdit {
                range,
                new_text: new_name.to_string(),
            }));
        };

        match scope {
            RenameScope::FileLocal => {
                let ranges = find_occurrences_within(
                    &entry.tree,
                    &entry.text,
                    &word,
                    kind,
                    &OccurrenceQuery::default(),
                );
                add_edits(uri, ranges);
            }
            RenameScope::FunctionScoped { scope } | RenameScope::SubshellScoped { scope } => {
                let ranges = find_occurrences_within(
                    &entry.tree,
                    &entry.text,
                    &word,
                    kind,
                    &OccurrenceQuery {
                        start: None,
                        scope: Some(scope),
                    },
                );
                add_edits(uri, ranges);
            }
            RenameScope::GlobalScoped { declared_at } => {
                // In the declaring file only occurrences from the declaration
                // onward belong to this lineage; earlier ones bind to a prior
                // same-named declaration
                let ranges = find_occurrences_within(
                    &entry.tree,
                    &entry.text,
                    &word,
                    kind,
                    &OccurrenceQuery {
                        start: Some(declared_at),
                        scope: None,
                    },
                );
                add_edits(uri, ranges);

                let mut connected = self.index.reachable_from(uri);
                connected.extend(self.index.reaching_to(uri));
                for file_uri in connected {
                    if file_uri == *uri {
                        continue;
                    }
                    let Some(other) = self.index.get(&file_uri) else {
                        continue;
                    };
                    let ranges = find_occurrences_within(
                        &other.tree,
                        &other.text,
                        &word,
                        kind,
                        &OccurrenceQuery::default(),
                    );
                    add_edits(&file_uri, ranges);
                }
            }
        }

        Ok(changes)
    }
}

/// The declaration actually visible at `position` among same-named ones:
/// the nearest one at or before the position, falling back to the innermost.
fn select_visible(declarations: &[Declaration], position: Position) -> Option<&Declaration> {
    declarations
        .iter()
        .filter(|d| {
            (d.range.start.line, d.range.start.character) <= (position.line, position.character)
        })
        .max_by_key(|d| (d.range.start.line, d.range.start.character))
        .or_else(|| declarations.first())
}
