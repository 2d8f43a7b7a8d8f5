//
// scope.rs
//
// Scope resolution: which declarations are visible at a position. The
// grammar only partially encodes scoping, so this reconstructs it by walking
// outward through enclosing constructs and then applying the global leak
// rule for variables assigned inside functions without `local`.
//

use indexmap::IndexMap;
use tower_lsp::lsp_types::{Position, Url};
use tree_sitter::{Node, Tree};

use crate::declarations::{classify, for_loop_variable, Declaration, DeclarationKind};
use crate::syntax::{enclosing_function_name, node_at_position, node_range, node_text};

/// Declarations visible at a position, keyed by name, innermost-first.
///
/// Ascends from the node at `position`, collecting declaration-shaped direct
/// children at each level plus for-loop bound variables, then merges in
/// file-wide global variable assignments for names not already present.
/// Functions never get the leak treatment: one declared only inside another
/// function's body is invisible elsewhere.
pub fn local_declarations(
    tree: Option<&Tree>,
    text: &str,
    uri: &Url,
    position: Position,
) -> IndexMap<String, Vec<Declaration>> {
    let mut declarations: IndexMap<String, Vec<Declaration>> = IndexMap::new();

    let Some(tree) = tree else {
        return declarations;
    };

    let root = tree.root_node();
    let start = node_at_position(tree, position).unwrap_or(root);

    let mut level = Some(start);
    while let Some(node) = level {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let declaration = declaration_from_child(child, text, uri);
            if let Some(declaration) = declaration {
                declarations
                    .entry(declaration.name.clone())
                    .or_default()
                    .push(declaration);
            }
        }
        level = node.parent();
    }

    for (name, leaked) in global_variable_declarations(root, text, uri) {
        declarations.entry(name).or_insert(leaked);
    }

    declarations
}

fn declaration_from_child(child: Node, text: &str, uri: &Url) -> Option<Declaration> {
    if let Some(variable) = for_loop_variable(child) {
        return Some(Declaration {
            name: node_text(variable, text).to_string(),
            kind: DeclarationKind::Variable,
            uri: uri.clone(),
            range: node_range(child),
            container: enclosing_function_name(child, text),
        });
    }

    // local/declare/export wrap the assignment one level down
    if child.kind() == "declaration_command" {
        let mut cursor = child.walk();
        if let Some(assignment) = child
            .named_children(&mut cursor)
            .find(|c| c.kind() == "variable_assignment")
        {
            let site = classify(assignment, text)?;
            let container = enclosing_function_name(site.node(), text);
            return Some(site.to_declaration(text, uri, container));
        }
        // `local x` without an initializer
        let mut cursor = child.walk();
        let name = child
            .named_children(&mut cursor)
            .find(|c| c.kind() == "variable_name")?;
        return Some(Declaration {
            name: node_text(name, text).to_string(),
            kind: DeclarationKind::Variable,
            uri: uri.clone(),
            range: node_range(child),
            container: enclosing_function_name(child, text),
        });
    }

    let site = classify(child, text)?;
    let container = enclosing_function_name(site.node(), text);
    Some(site.to_declaration(text, uri, container))
}

/// Every variable assignment in the file whose parent is not a
/// local-declaration construct, grouped by name in source order. Bash-style
/// globals leak out of the function they are textually written in.
fn global_variable_declarations(
    root: Node,
    text: &str,
    uri: &Url,
) -> IndexMap<String, Vec<Declaration>> {
    let mut declarations: IndexMap<String, Vec<Declaration>> = IndexMap::new();
    visit_global_variables(root, text, uri, &mut declarations);
    declarations
}

fn visit_global_variables(
    node: Node,
    text: &str,
    uri: &Url,
    out: &mut IndexMap<String, Vec<Declaration>>,
) {
    if node.kind() == "variable_assignment"
        && node.parent().map(|p| p.kind()) != Some("declaration_command")
    {
        if let Some(site) = classify(node, text) {
            let container = enclosing_function_name(node, text);
            let declaration = site.to_declaration(text, uri, container);
            out.entry(declaration.name.clone())
                .or_default()
                .push(declaration);
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit_global_variables(child, text, uri, out);
    }
}
