//
// rename.rs
//
// Scope-correct rename support: classify the target's original declaration
// by walking outward from the cursor, then collect only the occurrences
// bound to that declaration lineage. Validation happens before any edit is
// computed; a rejected name never produces partial edits.
//

use std::sync::OnceLock;

use anyhow::bail;
use regex::Regex;
use tower_lsp::lsp_types::{Position, Range};
use tree_sitter::{Node, Tree};

use crate::declarations::{classify, for_loop_variable, DeclarationKind, DeclarationSite};
use crate::syntax::{find_parent, node_at_position, node_range, node_text};

/// Terminal classification of a rename target. The outward walk selects
/// exactly one of these before any edit is built.
#[derive(Debug, Clone, PartialEq)]
pub enum RenameScope {
    /// No matching declaration precedes the cursor in this file: the rename
    /// stays confined to the current file.
    FileLocal,
    /// Declared inside an enclosing function: confined to its range.
    FunctionScoped { scope: Range },
    /// Declared inside an enclosing subshell: confined to its range.
    SubshellScoped { scope: Range },
    /// Declared at file scope: renamed from the declaration onward in the
    /// declaring file and propagated through the source graph.
    GlobalScoped { declared_at: Position },
}

/// The word under the cursor as a rename target: its text, whether it is a
/// variable or a function name, and the span of the name token.
pub fn rename_target(
    tree: &Tree,
    text: &str,
    position: Position,
) -> Option<(String, DeclarationKind, Range)> {
    let node = node_at_position(tree, position)?;
    match node.kind() {
        "variable_name" => Some((
            node_text(node, text).to_string(),
            DeclarationKind::Variable,
            node_range(node),
        )),
        "word" => {
            let parent = node.parent()?;
            if parent.kind() == "command_name" || parent.kind() == "function_definition" {
                Some((
                    node_text(node, text).to_string(),
                    DeclarationKind::Function,
                    node_range(node),
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"))
}

/// Validate a proposed name up front. Any violation rejects the whole
/// operation; callers must not have computed edits yet.
pub fn validate_new_name(new_name: &str, kind: DeclarationKind) -> anyhow::Result<()> {
    match kind {
        DeclarationKind::Variable => {
            if !identifier_regex().is_match(new_name) {
                bail!("\"{new_name}\" is not a valid variable name");
            }
            if new_name == "_" {
                bail!("\"_\" is a special variable and cannot be used as a new name");
            }
        }
        DeclarationKind::Function => {
            if new_name.contains('$') {
                bail!("\"{new_name}\" is not a valid function name");
            }
        }
    }
    Ok(())
}

/// Classify where the declaration the cursor is bound to lives. Walks
/// outward through enclosing functions and subshells, then falls back to the
/// last file-scope declaration at or before the cursor.
pub fn find_original_declaration(
    tree: &Tree,
    text: &str,
    position: Position,
    word: &str,
    kind: DeclarationKind,
) -> RenameScope {
    let root = tree.root_node();
    let start = node_at_position(tree, position).unwrap_or(root);

    let mut current = Some(start);
    while let Some(node) = current {
        match node.kind() {
            "function_definition" => {
                if declares_within(node, text, word, kind, true) {
                    return RenameScope::FunctionScoped {
                        scope: node_range(node),
                    };
                }
            }
            "subshell" => {
                if declares_within(node, text, word, kind, false) {
                    return RenameScope::SubshellScoped {
                        scope: node_range(node),
                    };
                }
            }
            _ => {}
        }
        current = node.parent();
    }

    if let Some(declared_at) = last_global_declaration_before(root, text, word, kind, position) {
        return RenameScope::GlobalScoped { declared_at };
    }

    RenameScope::FileLocal
}

/// Does `construct` contain a declaration binding (word, kind) to the
/// construct itself? With `local_only`, variable declarations count only in
/// their `local`/`declare` form (plain assignments inside functions are
/// global in bash); inside a subshell every declaration is confined.
fn declares_within(
    construct: Node,
    text: &str,
    word: &str,
    kind: DeclarationKind,
    local_only: bool,
) -> bool {
    let mut stack = vec![construct];
    while let Some(node) = stack.pop() {
        match kind {
            DeclarationKind::Variable => {
                if let Some(variable) = for_loop_variable(node) {
                    if node_text(variable, text) == word {
                        return true;
                    }
                }
                if node.kind() == "variable_assignment" {
                    if let Some(name) = node.child_by_field_name("name") {
                        if node_text(name, text) == word {
                            let is_local_form = node.parent().map(|p| p.kind())
                                == Some("declaration_command");
                            if !local_only || is_local_form {
                                return true;
                            }
                        }
                    }
                }
                // `local x` without an initializer
                if node.kind() == "variable_name"
                    && node.parent().map(|p| p.kind()) == Some("declaration_command")
                    && node_text(node, text) == word
                {
                    return true;
                }
            }
            DeclarationKind::Function => {
                if node.kind() == "function_definition" && node.id() != construct.id() {
                    if let Some(name) = node.child_by_field_name("name") {
                        if node_text(name, text) == word {
                            return true;
                        }
                    }
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    false
}

/// Start position of the last file/global-scope declaration of (word, kind)
/// at or before `position`. Occurrences before that boundary belong to a
/// prior same-named declaration and must not be touched.
fn last_global_declaration_before(
    root: Node,
    text: &str,
    word: &str,
    kind: DeclarationKind,
    position: Position,
) -> Option<Position> {
    let mut best: Option<Position> = None;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Some(site) = classify(node, text) {
            if site.kind() == kind
                && node_text(site.name_node(), text) == word
                && is_global_candidate(&site)
            {
                let start = node_range(site.node()).start;
                if at_or_before(start, position)
                    && best.map_or(true, |current| at_or_before(current, start))
                {
                    best = Some(start);
                }
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            stack.push(child);
        }
    }
    best
}

/// A declaration qualifies as file/global-scoped unless it is a
/// `local`-style declaration inside a function or lives inside a subshell.
fn is_global_candidate(site: &DeclarationSite) -> bool {
    let node = site.node();
    if find_parent(node, |n| n.kind() == "subshell").is_some() {
        return false;
    }
    if let DeclarationSite::Assignment { node, .. } = site {
        let local_form = node.parent().map(|p| p.kind()) == Some("declaration_command");
        if local_form && find_parent(*node, |n| n.kind() == "function_definition").is_some() {
            return false;
        }
    }
    true
}

/// Constraints on occurrence collection within one file.
#[derive(Debug, Clone, Default)]
pub struct OccurrenceQuery {
    /// Only occurrences starting at or after this position
    pub start: Option<Position>,
    /// Only occurrences contained in this range
    pub scope: Option<Range>,
}

/// Collect the spans of every occurrence of `word` with the matching node
/// kind (variable reference vs. function-name reference), subject to the
/// query's position and range constraints.
pub fn find_occurrences_within(
    tree: &Tree,
    text: &str,
    word: &str,
    kind: DeclarationKind,
    query: &OccurrenceQuery,
) -> Vec<Range> {
    let mut occurrences = Vec::new();
    collect_occurrences(tree.root_node(), text, word, kind, query, &mut occurrences);
    occurrences
}

fn collect_occurrences(
    node: Node,
    text: &str,
    word: &str,
    kind: DeclarationKind,
    query: &OccurrenceQuery,
    out: &mut Vec<Range>,
) {
    if is_occurrence(node, text, word, kind) {
        let range = node_range(node);
        let after_start = query
            .start
            .map_or(true, |start| at_or_before(start, range.start));
        let in_scope = query.scope.map_or(true, |scope| {
            at_or_before(scope.start, range.start) && at_or_before(range.end, scope.end)
        });
        if after_start && in_scope {
            out.push(range);
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_occurrences(child, text, word, kind, query, out);
    }
}

/// Is this node a reference to or declaration of `word` with the right kind?
pub fn is_occurrence(node: Node, text: &str, word: &str, kind: DeclarationKind) -> bool {
    match kind {
        DeclarationKind::Variable => {
            node.kind() == "variable_name" && node_text(node, text) == word
        }
        DeclarationKind::Function => {
            node.kind() == "word"
                && node_text(node, text) == word
                && matches!(
                    node.parent().map(|p| p.kind()),
                    Some("command_name") | Some("function_definition")
                )
        }
    }
}

fn at_or_before(a: Position, b: Position) -> bool {
    (a.line, a.character) <= (b.line, b.character)
}
