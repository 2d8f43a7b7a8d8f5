//
// declarations.rs
//
// Declaration extraction: the closed set of syntax shapes that bind a name,
// plus the two traversal modes (file-global vs. all-including-local) and
// parse-problem collection.
//

use indexmap::IndexMap;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, Location, Range, SymbolInformation, SymbolKind, Url,
};
use tree_sitter::{Node, Tree};

use crate::syntax::{enclosing_function_name, node_range, node_text};

/// What kind of name a declaration binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Variable,
    Function,
}

impl DeclarationKind {
    pub fn to_symbol_kind(self) -> SymbolKind {
        match self {
            DeclarationKind::Variable => SymbolKind::VARIABLE,
            DeclarationKind::Function => SymbolKind::FUNCTION,
        }
    }
}

/// A name bound somewhere in a file. Multiple declarations may share a name;
/// extraction preserves source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    pub uri: Url,
    /// Span of the whole declaration construct
    pub range: Range,
    /// Name of the enclosing function, when declared inside one
    pub container: Option<String>,
}

impl Declaration {
    #[allow(deprecated)]
    pub fn to_symbol_information(&self) -> SymbolInformation {
        SymbolInformation {
            name: self.name.clone(),
            kind: self.kind.to_symbol_kind(),
            tags: None,
            deprecated: None,
            location: Location {
                uri: self.uri.clone(),
                range: self.range,
            },
            container_name: self.container.clone(),
        }
    }
}

/// The closed set of declaration-shaped constructs. Recognition happens in
/// exactly one place (`classify`); extend by adding a variant, not by
/// scattering node-kind comparisons.
#[derive(Debug, Clone, Copy)]
pub enum DeclarationSite<'tree> {
    /// `NAME=value`, standalone or under declare/local/export/readonly
    Assignment {
        name: Node<'tree>,
        node: Node<'tree>,
    },
    /// `foo() { ... }` or `function foo { ... }`
    FunctionDefinition {
        name: Node<'tree>,
        node: Node<'tree>,
    },
    /// `: "${NAME:=default}"`, matched structurally
    ColonDefault {
        name: Node<'tree>,
        node: Node<'tree>,
    },
}

impl<'tree> DeclarationSite<'tree> {
    pub fn kind(&self) -> DeclarationKind {
        match self {
            DeclarationSite::Assignment { .. } | DeclarationSite::ColonDefault { .. } => {
                DeclarationKind::Variable
            }
            DeclarationSite::FunctionDefinition { .. } => DeclarationKind::Function,
        }
    }

    pub fn name_node(&self) -> Node<'tree> {
        match self {
            DeclarationSite::Assignment { name, .. }
            | DeclarationSite::FunctionDefinition { name, .. }
            | DeclarationSite::ColonDefault { name, .. } => *name,
        }
    }

    pub fn node(&self) -> Node<'tree> {
        match self {
            DeclarationSite::Assignment { node, .. }
            | DeclarationSite::FunctionDefinition { node, .. }
            | DeclarationSite::ColonDefault { node, .. } => *node,
        }
    }

    pub fn to_declaration(&self, text: &str, uri: &Url, container: Option<String>) -> Declaration {
        Declaration {
            name: node_text(self.name_node(), text).to_string(),
            kind: self.kind(),
            uri: uri.clone(),
            range: node_range(self.node()),
            container,
        }
    }
}

/// Decide whether a node binds a name. A declaration-shaped node without an
/// identifiable name child is not a declaration (silently skipped).
pub fn classify<'tree>(node: Node<'tree>, text: &str) -> Option<DeclarationSite<'tree>> {
    match node.kind() {
        "variable_assignment" => {
            let name = node.child_by_field_name("name")?;
            Some(DeclarationSite::Assignment { name, node })
        }
        "function_definition" => {
            let name = node.child_by_field_name("name")?;
            Some(DeclarationSite::FunctionDefinition { name, node })
        }
        "command" => colon_default_site(node, text),
        _ => None,
    }
}

/// Recognize `: "${NAME:=default}"`: a colon command whose single argument is
/// a quoted string wrapping an expansion with the `:=` operator.
fn colon_default_site<'tree>(command: Node<'tree>, text: &str) -> Option<DeclarationSite<'tree>> {
    let name_node = command.child_by_field_name("name")?;
    if node_text(name_node, text) != ":" {
        return None;
    }

    let mut cursor = command.walk();
    let arguments: Vec<Node> = command
        .named_children(&mut cursor)
        .filter(|child| child.id() != name_node.id())
        .collect();
    if arguments.len() != 1 || arguments[0].kind() != "string" {
        return None;
    }

    let string_node = arguments[0];
    let mut cursor = string_node.walk();
    let expansion = string_node
        .named_children(&mut cursor)
        .find(|child| child.kind() == "expansion")?;

    let mut cursor = expansion.walk();
    let variable = expansion
        .named_children(&mut cursor)
        .find(|child| child.kind() == "variable_name")?;

    let mut cursor = expansion.walk();
    let has_assign_default = expansion.children(&mut cursor).any(|child| child.kind() == ":=");
    if !has_assign_default {
        return None;
    }

    Some(DeclarationSite::ColonDefault {
        name: variable,
        node: command,
    })
}

/// A for-loop binds its iteration variable for the whole loop. The bound
/// name is the loop's second child when the grammar produced a name node.
pub fn for_loop_variable(node: Node) -> Option<Node> {
    if node.kind() != "for_statement" {
        return None;
    }
    let candidate = node.child(1)?;
    (candidate.kind() == "variable_name").then_some(candidate)
}

// Subtrees not descended into when collecting global declarations: a name
// bound under one of these is not reliably visible at file scope.
const GLOBAL_SCOPE_BARRIERS: &[&str] = &["function_definition", "if_statement"];

/// Collect the declarations visible at file scope, keeping only the
/// last-seen declaration per name. Function bodies and conditional bodies
/// are not descended into.
pub fn extract_global_declarations(
    tree: &Tree,
    text: &str,
    uri: &Url,
) -> IndexMap<String, Declaration> {
    let mut declarations = IndexMap::new();
    visit_global(tree.root_node(), text, uri, &mut declarations);
    declarations
}

fn visit_global(node: Node, text: &str, uri: &Url, out: &mut IndexMap<String, Declaration>) {
    if let Some(site) = classify(node, text) {
        let declaration = site.to_declaration(text, uri, None);
        out.insert(declaration.name.clone(), declaration);
    }

    if GLOBAL_SCOPE_BARRIERS.contains(&node.kind()) {
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit_global(child, text, uri, out);
    }
}

/// Collect every declaration in the file regardless of nesting, in source
/// order, each tagged with its nearest enclosing function name.
pub fn extract_all_declarations(tree: &Tree, text: &str, uri: &Url) -> Vec<Declaration> {
    let mut declarations = Vec::new();
    visit_all(tree.root_node(), text, uri, &mut declarations);
    declarations
}

fn visit_all(node: Node, text: &str, uri: &Url, out: &mut Vec<Declaration>) {
    if let Some(site) = classify(node, text) {
        let container = enclosing_function_name(site.node(), text);
        out.push(site.to_declaration(text, uri, container));
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit_all(child, text, uri, out);
    }
}

/// Convert structurally invalid nodes into diagnostics: a missing token is a
/// warning, a general parse failure is an error. Extraction elsewhere keeps
/// going over the rest of the tree.
pub fn collect_parse_problems(tree: &Tree) -> Vec<Diagnostic> {
    let mut problems = Vec::new();
    visit_problems(tree.root_node(), &mut problems);
    problems
}

fn visit_problems(node: Node, out: &mut Vec<Diagnostic>) {
    if node.is_missing() {
        out.push(Diagnostic {
            range: node_range(node),
            severity: Some(DiagnosticSeverity::WARNING),
            message: format!("Syntax error: expected \"{}\"", node.kind()),
            ..Default::default()
        });
    } else if node.is_error() {
        out.push(Diagnostic {
            range: node_range(node),
            severity: Some(DiagnosticSeverity::ERROR),
            message: "Failed to parse expression".to_string(),
            ..Default::default()
        });
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit_problems(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool;

    fn test_uri() -> Url {
        Url::parse("file:///test.sh").unwrap()
    }

    fn globals(code: &str) -> IndexMap<String, Declaration> {
        let tree = parser_pool::parse(code).unwrap();
        extract_global_declarations(&tree, code, &test_uri())
    }

    fn all(code: &str) -> Vec<Declaration> {
        let tree = parser_pool::parse(code).unwrap();
        extract_all_declarations(&tree, code, &test_uri())
    }

    #[test]
    fn test_global_simple_assignment() {
        let decls = globals("GREETING=hello");
        assert_eq!(decls.len(), 1);
        assert_eq!(decls["GREETING"].kind, DeclarationKind::Variable);
    }

    #[test]
    fn test_global_function_definition() {
        let decls = globals("greet() {\n  echo hi\n}");
        assert_eq!(decls.len(), 1);
        assert_eq!(decls["greet"].kind, DeclarationKind::Function);
    }

    #[test]
    fn test_global_function_keyword_form() {
        let decls = globals("function greet {\n  echo hi\n}");
        assert_eq!(decls["greet"].kind, DeclarationKind::Function);
    }

    #[test]
    fn test_global_last_declaration_wins() {
        let code = "X=1\nX=2";
        let decls = globals(code);
        assert_eq!(decls.len(), 1);
        // The surviving declaration is the second one
        assert_eq!(decls["X"].range.start.line, 1);
    }

    #[test]
    fn test_global_skips_function_body() {
        let code = "f() {\n  INNER=1\n}";
        let decls = globals(code);
        assert!(decls.contains_key("f"));
        assert!(!decls.contains_key("INNER"));
    }

    #[test]
    fn test_global_skips_conditional_body() {
        let code = "if [ -n \"$1\" ]; then\n  GUARDED=1\nfi";
        let decls = globals(code);
        assert!(!decls.contains_key("GUARDED"));
    }

    #[test]
    fn test_global_colon_default_idiom() {
        let decls = globals(": \"${VERBOSE:=0}\"");
        assert_eq!(decls.len(), 1);
        assert_eq!(decls["VERBOSE"].kind, DeclarationKind::Variable);
    }

    #[test]
    fn test_colon_default_requires_assign_operator() {
        // ${X:-default} reads a default without binding X
        let decls = globals(": \"${VERBOSE:-0}\"");
        assert!(decls.is_empty());
    }

    #[test]
    fn test_colon_default_requires_colon_command() {
        let decls = globals("true \"${VERBOSE:=0}\"");
        assert!(decls.is_empty());
    }

    #[test]
    fn test_global_export_assignment() {
        let decls = globals("export PATH_EXTRA=/opt/bin");
        assert_eq!(decls["PATH_EXTRA"].kind, DeclarationKind::Variable);
    }

    #[test]
    fn test_all_declarations_include_nested() {
        let code = "OUTER=1\nf() {\n  local inner=2\n}";
        let decls = all(code);
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"OUTER"));
        assert!(names.contains(&"f"));
        assert!(names.contains(&"inner"));
    }

    #[test]
    fn test_all_declarations_tag_enclosing_function() {
        let code = "f() {\n  local inner=2\n}";
        let decls = all(code);
        let inner = decls.iter().find(|d| d.name == "inner").unwrap();
        assert_eq!(inner.container.as_deref(), Some("f"));
        let f = decls.iter().find(|d| d.name == "f").unwrap();
        assert_eq!(f.container, None);
    }

    #[test]
    fn test_all_declarations_source_order() {
        let code = "A=1\nB=2\nA=3";
        let decls = all(code);
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "A"]);
    }

    #[test]
    fn test_parse_problems_empty_for_valid_file() {
        let tree = parser_pool::parse("x=1\necho \"$x\"").unwrap();
        assert!(collect_parse_problems(&tree).is_empty());
    }

    #[test]
    fn test_parse_problems_reported_for_broken_file() {
        let tree = parser_pool::parse("if [ -z \"$x\" ; then").unwrap();
        let problems = collect_parse_problems(&tree);
        assert!(!problems.is_empty());
    }

    #[test]
    fn test_for_loop_variable() {
        let code = "for item in a b c; do\n  echo \"$item\"\ndone";
        let tree = parser_pool::parse(code).unwrap();
        let for_node = tree.root_node().child(0).unwrap();
        assert_eq!(for_node.kind(), "for_statement");
        let var = for_loop_variable(for_node).unwrap();
        assert_eq!(&code[var.byte_range()], "item");
    }

    #[test]
    fn test_for_loop_variable_rejects_other_nodes() {
        let code = "x=1";
        let tree = parser_pool::parse(code).unwrap();
        assert!(for_loop_variable(tree.root_node().child(0).unwrap()).is_none());
    }
}
