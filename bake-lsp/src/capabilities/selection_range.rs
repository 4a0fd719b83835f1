//! Expand-selection ranges for bake documents.

use bake_parser::Location;
use bake_parser::hcl::{Attribute, Block, Expression};
use tower_lsp::lsp_types::{Position, Range, SelectionRange};

use crate::convert::{inside_location, location_to_range, whole_document_range};
use crate::error::Result;
use crate::state::Document;

/// One chain per position, innermost range first. Every chain ends with
/// the whole document.
///
/// # Errors
///
/// `UnexpectedDocument` if `document` is not a bake file.
pub fn selection_ranges(document: &Document, positions: &[Position]) -> Result<Vec<SelectionRange>> {
    let file = document.bake()?;
    let whole = whole_document_range(&document.text);
    Ok(positions
        .iter()
        .map(|&position| {
            let mut ranges = Vec::new();
            for block in &file.body.blocks {
                if inside_location(&block.location, position) {
                    block_ranges(block, position, &mut ranges);
                }
            }
            for attribute in &file.body.attributes {
                if inside_location(&attribute.location, position) {
                    attribute_ranges(attribute, position, &mut ranges);
                }
            }
            chain(ranges, whole)
        })
        .collect())
}

/// Sort smallest first, drop repeats and link each range to the next.
fn chain(mut ranges: Vec<Range>, whole: Range) -> SelectionRange {
    ranges.sort_by_key(size);
    ranges.push(whole);
    ranges.dedup();

    let mut parent = None;
    for range in ranges.into_iter().rev() {
        parent = Some(Box::new(SelectionRange { range, parent }));
    }
    parent.map_or(
        SelectionRange {
            range: whole,
            parent: None,
        },
        |innermost| *innermost,
    )
}

/// Lines spanned, then characters. A multi-line range sorts after every
/// single-line range, however wide.
fn size(range: &Range) -> (i64, i64) {
    let lines = i64::from(range.end.line) - i64::from(range.start.line);
    let characters = i64::from(range.end.character) - i64::from(range.start.character);
    (lines, characters)
}

fn push(ranges: &mut Vec<Range>, location: &Location) {
    ranges.push(location_to_range(location));
}

fn block_ranges(block: &Block, position: Position, ranges: &mut Vec<Range>) {
    if let Some(label) = block
        .labels
        .iter()
        .find(|l| inside_location(&l.location, position))
    {
        if label.quoted && inside_location(&label.value_location(), position) {
            push(ranges, &label.value_location());
        }
        push(ranges, &label.location);
    }
    if inside_location(&block.kind_location, position) {
        push(ranges, &block.kind_location);
    }
    for attribute in &block.body.attributes {
        if inside_location(&attribute.location, position) {
            attribute_ranges(attribute, position, ranges);
        }
    }
    for nested in &block.body.blocks {
        if inside_location(&nested.location, position) {
            block_ranges(nested, position, ranges);
        }
    }
    push(ranges, &block.body.location);
    push(ranges, &block.location);
}

fn attribute_ranges(attribute: &Attribute, position: Position, ranges: &mut Vec<Range>) {
    if inside_location(&attribute.name_location, position) {
        push(ranges, &attribute.name_location);
    }
    if inside_location(attribute.expression.location(), position) {
        expression_ranges(&attribute.expression, position, ranges);
    }
    push(ranges, &attribute.location);
}

fn expression_ranges(expression: &Expression, position: Position, ranges: &mut Vec<Range>) {
    let descend = |inner: &Expression, ranges: &mut Vec<Range>| {
        if inside_location(inner.location(), position) {
            expression_ranges(inner, position, ranges);
        }
    };
    match expression {
        Expression::Template(template) => {
            for part in &template.parts {
                descend(part, ranges);
            }
        }
        Expression::Tuple(tuple) => {
            for element in &tuple.elements {
                descend(element, ranges);
            }
        }
        Expression::Object(object) => {
            for item in &object.items {
                descend(&item.key, ranges);
                descend(&item.value, ranges);
            }
        }
        Expression::FunctionCall(call) => {
            if inside_location(&call.name_location, position) {
                push(ranges, &call.name_location);
            }
            for argument in &call.arguments {
                descend(argument, ranges);
            }
        }
        Expression::Conditional(conditional) => {
            descend(&conditional.condition, ranges);
            descend(&conditional.true_result, ranges);
            descend(&conditional.false_result, ranges);
        }
        Expression::BinaryOp(op) => {
            descend(&op.lhs, ranges);
            descend(&op.rhs, ranges);
        }
        Expression::TemplateWrap(wrap) => descend(&wrap.wrapped, ranges),
        Expression::Parenthesized(inner) => descend(&inner.inner, ranges),
        Expression::UnaryOp(op) => descend(&op.operand, ranges),
        Expression::For(for_expr) => {
            descend(&for_expr.collection, ranges);
            if let Some(key) = &for_expr.key {
                descend(key, ranges);
            }
            descend(&for_expr.value, ranges);
            if let Some(condition) = &for_expr.condition {
                descend(condition, ranges);
            }
        }
        Expression::Literal(_)
        | Expression::ScopeTraversal(_)
        | Expression::RelativeTraversal(_)
        | Expression::Invalid(_) => {}
    }
    push(ranges, expression.location());
}
