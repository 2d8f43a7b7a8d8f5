//
// syntax.rs
//
// Thin query surface over an externally produced parse tree: node at a
// position, node text, range conversion, parent walks, word/command lookup
// and comment blocks. Everything here is read-only over (tree, text).
//

use tower_lsp::lsp_types::{Position, Range};
use tree_sitter::{Node, Point, Tree};

/// Slice the source text covered by a node.
pub fn node_text<'a>(node: Node<'a>, text: &'a str) -> &'a str {
    &text[node.byte_range()]
}

/// Smallest node spanning the given position, if any.
pub fn node_at_position(tree: &Tree, position: Position) -> Option<Node<'_>> {
    let point = Point::new(position.line as usize, position.character as usize);
    tree.root_node().descendant_for_point_range(point, point)
}

/// Convert a node's span to an LSP range.
pub fn node_range(node: Node) -> Range {
    Range {
        start: Position::new(
            node.start_position().row as u32,
            node.start_position().column as u32,
        ),
        end: Position::new(
            node.end_position().row as u32,
            node.end_position().column as u32,
        ),
    }
}

/// Walk up the parent chain until the predicate matches.
pub fn find_parent<'a, F>(node: Node<'a>, predicate: F) -> Option<Node<'a>>
where
    F: Fn(&Node<'a>) -> bool,
{
    let mut current = node.parent();
    while let Some(n) = current {
        if predicate(&n) {
            return Some(n);
        }
        current = n.parent();
    }
    None
}

/// Name of the function definition enclosing a node, if any.
pub fn enclosing_function_name(node: Node, text: &str) -> Option<String> {
    let func = find_parent(node, |n| n.kind() == "function_definition")?;
    let name = func.child_by_field_name("name")?;
    Some(node_text(name, text).to_string())
}

/// The identifier-like word at a position: a command/function word or a
/// variable name. Punctuation, operators and string content yield None.
pub fn word_at(tree: &Tree, text: &str, position: Position) -> Option<String> {
    let node = node_at_position(tree, position)?;
    match node.kind() {
        "word" | "variable_name" => Some(node_text(node, text).to_string()),
        _ => None,
    }
}

/// Name of the command whose invocation spans the position, if any.
pub fn command_at(tree: &Tree, text: &str, position: Position) -> Option<String> {
    let node = node_at_position(tree, position)?;
    let command = if node.kind() == "command" {
        node
    } else {
        find_parent(node, |n| n.kind() == "command")?
    };
    let name = command.child_by_field_name("name")?;
    Some(node_text(name, text).to_string())
}

/// Contiguous block of `#` comment lines directly above `line`, with the
/// comment markers stripped. None when the preceding line is not a comment.
pub fn comments_above(text: &str, line: u32) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut block: Vec<String> = Vec::new();

    let mut index = line as usize;
    while index > 0 {
        index -= 1;
        let candidate = lines.get(index)?.trim_start();
        if let Some(rest) = candidate.strip_prefix('#') {
            block.push(rest.strip_prefix(' ').unwrap_or(rest).trim_end().to_string());
        } else {
            break;
        }
    }

    if block.is_empty() {
        return None;
    }
    block.reverse();
    Some(block.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool;

    fn parse(code: &str) -> Tree {
        parser_pool::parse(code).unwrap()
    }

    #[test]
    fn test_word_at_command_name() {
        let code = "echo hello";
        let tree = parse(code);
        assert_eq!(
            word_at(&tree, code, Position::new(0, 1)),
            Some("echo".to_string())
        );
    }

    #[test]
    fn test_word_at_variable_reference() {
        let code = "echo \"$GREETING\"";
        let tree = parse(code);
        assert_eq!(
            word_at(&tree, code, Position::new(0, 8)),
            Some("GREETING".to_string())
        );
    }

    #[test]
    fn test_word_at_operator_is_none() {
        let code = "x=1";
        let tree = parse(code);
        assert_eq!(word_at(&tree, code, Position::new(0, 1)), None);
    }

    #[test]
    fn test_command_at_from_argument() {
        let code = "grep -r pattern .";
        let tree = parse(code);
        assert_eq!(
            command_at(&tree, code, Position::new(0, 6)),
            Some("grep".to_string())
        );
    }

    #[test]
    fn test_enclosing_function_name() {
        let code = "outer() {\n  x=1\n}";
        let tree = parse(code);
        let node = node_at_position(&tree, Position::new(1, 2)).unwrap();
        assert_eq!(
            enclosing_function_name(node, code),
            Some("outer".to_string())
        );
    }

    #[test]
    fn test_enclosing_function_name_at_top_level() {
        let code = "x=1";
        let tree = parse(code);
        let node = node_at_position(&tree, Position::new(0, 0)).unwrap();
        assert_eq!(enclosing_function_name(node, code), None);
    }

    #[test]
    fn test_comments_above_single_line() {
        let text = "# prints a greeting\ngreet() {\n  echo hi\n}";
        assert_eq!(comments_above(text, 1), Some("prints a greeting".to_string()));
    }

    #[test]
    fn test_comments_above_block_preserves_order() {
        let text = "# first\n# second\nx=1";
        assert_eq!(comments_above(text, 2), Some("first\nsecond".to_string()));
    }

    #[test]
    fn test_comments_above_none_when_missing() {
        let text = "x=1\ny=2";
        assert_eq!(comments_above(text, 1), None);
    }

    #[test]
    fn test_comments_above_stops_at_blank_line() {
        let text = "# unrelated\n\n# relevant\nx=1";
        assert_eq!(comments_above(text, 3), Some("relevant".to_string()));
    }
}
