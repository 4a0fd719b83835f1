//! Finds the chain of nodes under the cursor inside an attribute value.
//!
//! Children are checked in source order and the first one containing the
//! cursor is taken. Since containment is inclusive at both ends, a cursor
//! between two adjacent nodes lands in the earlier one.

use bake_parser::hcl::{Expression, FunctionCall, ObjectItem, ScopeTraversal};
use tower_lsp::lsp_types::{Position, Range};

use crate::convert::{inside_location, to_lsp_u32};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node<'a> {
    Expression(&'a Expression),
    /// The cursor is on the key of an object item.
    ObjectKey(&'a ObjectItem),
    FunctionName(&'a FunctionCall),
    /// The cursor is on one segment of `target.<name>.<attribute>`.
    TargetReference(TargetPart<'a>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPart<'a> {
    /// The leading `target` keyword or the dot after it.
    Keyword,
    Name {
        name: &'a str,
        range: Range,
    },
    Attribute {
        target: &'a str,
        name: &'a str,
        range: Range,
    },
}

/// The nodes from `expression` down to the innermost one containing
/// `position`. The first node is always `expression` itself.
#[must_use]
pub fn walk(expression: &Expression, position: Position) -> Vec<Node<'_>> {
    let mut path = Vec::new();
    descend(expression, position, &mut path);
    path
}

/// The innermost node of a walk.
#[must_use]
pub fn innermost<'a>(path: &[Node<'a>]) -> Option<Node<'a>> {
    path.last().copied()
}

fn descend<'a>(expression: &'a Expression, position: Position, path: &mut Vec<Node<'a>>) {
    path.push(Node::Expression(expression));
    let inside = |e: &Expression| inside_location(e.location(), position);
    let next = match expression {
        Expression::Template(template) => template.parts.iter().find(|p| inside(p)),
        Expression::Tuple(tuple) => tuple.elements.iter().find(|e| inside(e)),
        Expression::Object(object) => {
            for item in &object.items {
                if inside(&item.key) {
                    path.push(Node::ObjectKey(item));
                    return;
                }
                if inside(&item.value) {
                    descend(&item.value, position, path);
                    return;
                }
            }
            None
        }
        Expression::BinaryOp(op) => [&*op.lhs, &*op.rhs].into_iter().find(|e| inside(e)),
        Expression::Conditional(conditional) => [
            &*conditional.condition,
            &*conditional.true_result,
            &*conditional.false_result,
        ]
        .into_iter()
        .find(|e| inside(e)),
        Expression::ScopeTraversal(traversal) => {
            if let Some(part) = target_part(traversal, position) {
                path.push(Node::TargetReference(part));
            }
            None
        }
        Expression::FunctionCall(call) => {
            if inside_location(&call.name_location, position) {
                path.push(Node::FunctionName(call));
                return;
            }
            call.arguments.iter().find(|a| inside(a))
        }
        Expression::For(for_expr) => std::iter::once(&*for_expr.collection)
            .chain(for_expr.condition.as_deref())
            .find(|e| inside(e)),
        Expression::TemplateWrap(wrap) => Some(&*wrap.wrapped),
        Expression::Parenthesized(parenthesized) => Some(&*parenthesized.inner).filter(|e| inside(e)),
        Expression::UnaryOp(op) => Some(&*op.operand).filter(|e| inside(e)),
        Expression::RelativeTraversal(traversal) => Some(&*traversal.source).filter(|e| inside(e)),
        Expression::Literal(_) | Expression::Invalid(_) => None,
    };
    if let Some(next) = next {
        descend(next, position, path);
    }
}

/// Classify the cursor within `target.<name>.<attribute>` by character
/// offsets from the start of the traversal.
fn target_part(traversal: &ScopeTraversal, position: Position) -> Option<TargetPart<'_>> {
    let segments = traversal.segments();
    let &[root, name, attribute] = segments.as_slice() else {
        return None;
    };
    if root != "target"
        || traversal.traversal.len() != 2
        || traversal.location.start.line != traversal.location.end.line
    {
        return None;
    }
    let line = to_lsp_u32(traversal.location.start.line.saturating_sub(1));
    if position.line != line {
        return None;
    }
    let offset = to_lsp_u32(traversal.location.start.column.saturating_sub(1));
    let name_start = offset + to_lsp_u32(root.chars().count()) + 1;
    let name_end = name_start + to_lsp_u32(name.chars().count());
    let attribute_start = name_end + 1;
    let attribute_end = attribute_start + to_lsp_u32(attribute.chars().count());
    let span = |start, end| Range::new(Position::new(line, start), Position::new(line, end));

    if position.character < name_start {
        Some(TargetPart::Keyword)
    } else if position.character <= name_end {
        Some(TargetPart::Name {
            name,
            range: span(name_start, name_end),
        })
    } else if position.character >= attribute_start && position.character <= attribute_end {
        Some(TargetPart::Attribute {
            target: name,
            name: attribute,
            range: span(attribute_start, attribute_end),
        })
    } else {
        None
    }
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use bake_parser::hcl::{self, Value};

    use super::*;
    use pretty_assertions::assert_eq;

    fn value_walk(source: &str, line: u32, character: u32) -> (hcl::File, Position) {
        (hcl::parse(source), Position::new(line, character))
    }

    fn kinds(path: &[Node<'_>]) -> Vec<&'static str> {
        path.iter()
            .map(|node| match node {
                Node::Expression(Expression::Template(_)) => "template",
                Node::Expression(Expression::Literal(_)) => "literal",
                Node::Expression(Expression::Tuple(_)) => "tuple",
                Node::Expression(Expression::Object(_)) => "object",
                Node::Expression(Expression::ScopeTraversal(_)) => "traversal",
                Node::Expression(Expression::FunctionCall(_)) => "call",
                Node::Expression(Expression::BinaryOp(_)) => "binary",
                Node::Expression(Expression::Conditional(_)) => "conditional",
                Node::Expression(Expression::TemplateWrap(_)) => "wrap",
                Node::Expression(Expression::For(_)) => "for",
                Node::Expression(_) => "other",
                Node::ObjectKey(_) => "key",
                Node::FunctionName(_) => "function-name",
                Node::TargetReference(_) => "target-reference",
            })
            .collect()
    }

    #[test]
    fn descends_into_tuple_string_literal() {
        let (file, position) = value_walk("a = [\"x\", \"yz\"]\n", 0, 12);
        let path = walk(&file.body.attributes[0].expression, position);
        assert_eq!(kinds(&path), vec!["tuple", "template", "literal"]);
        let Some(Node::Expression(Expression::Literal(literal))) = innermost(&path) else {
            return;
        };
        assert_eq!(literal.value, Value::String("yz".to_string()));
    }

    #[test]
    fn object_keys_stop_the_walk() {
        let (file, position) = value_walk("args = {\n  \"blah\" = \"\"\n  other = x\n}\n", 2, 4);
        let path = walk(&file.body.attributes[0].expression, position);
        assert_eq!(kinds(&path), vec!["object", "key"]);
        let path = walk(&file.body.attributes[0].expression, Position::new(2, 11));
        assert_eq!(kinds(&path), vec!["object", "traversal"]);
    }

    #[test]
    fn operator_space_resolves_nothing() {
        let (file, position) = value_walk("a = x  ==  y\n", 0, 7);
        let path = walk(&file.body.attributes[0].expression, position);
        assert_eq!(kinds(&path), vec!["binary"]);
    }

    #[test]
    fn cursor_at_end_boundary_is_inside() {
        let (file, position) = value_walk("a = f(x,y)\n", 0, 7);
        let path = walk(&file.body.attributes[0].expression, position);
        assert_eq!(kinds(&path), vec!["call", "traversal"]);
    }

    #[test]
    fn function_name_is_its_own_node() {
        let (file, position) = value_walk("a = upper(\"x\")\n", 0, 5);
        let path = walk(&file.body.attributes[0].expression, position);
        assert_eq!(kinds(&path), vec!["call", "function-name"]);
    }

    #[test]
    fn interpolation_descends_through_the_wrap() {
        let (file, position) = value_walk("a = \"${x}\"\n", 0, 7);
        let path = walk(&file.body.attributes[0].expression, position);
        assert_eq!(kinds(&path), vec!["wrap", "traversal"]);
    }

    #[test]
    fn for_expression_checks_collection_and_condition() {
        let (file, position) = value_walk("a = [for v in xs : v if ok]\n", 0, 15);
        let path = walk(&file.body.attributes[0].expression, position);
        assert_eq!(kinds(&path), vec!["for", "traversal"]);
    }

    #[test]
    fn target_reference_segments() {
        let source = "a = target.api.tags\n";
        let file = hcl::parse(source);
        let expression = &file.body.attributes[0].expression;
        let part = |character| {
            if let Some(Node::TargetReference(part)) =
                innermost(&walk(expression, Position::new(0, character)))
            {
                Some(part)
            } else {
                None
            }
        };
        assert_eq!(part(6), Some(TargetPart::Keyword));
        assert_eq!(part(10), Some(TargetPart::Keyword));
        let name_range = Range::new(Position::new(0, 11), Position::new(0, 14));
        assert_eq!(
            part(11),
            Some(TargetPart::Name {
                name: "api",
                range: name_range
            })
        );
        assert_eq!(
            part(14),
            Some(TargetPart::Name {
                name: "api",
                range: name_range
            })
        );
        assert_eq!(
            part(19),
            Some(TargetPart::Attribute {
                target: "api",
                name: "tags",
                range: Range::new(Position::new(0, 15), Position::new(0, 19)),
            })
        );
    }

    #[rstest::rstest]
    #[case::indexed("a = target.api.tags[0]\n")]
    #[case::too_deep("a = target.api.tags.more\n")]
    #[case::other_root("a = group.api.tags\n")]
    fn only_two_attribute_target_references(#[case] source: &str) {
        let file = hcl::parse(source);
        let path = walk(&file.body.attributes[0].expression, Position::new(0, 12));
        assert!(!kinds(&path).contains(&"target-reference"));
    }
}
