//! Syntax tree of a build-definition file.
//!
//! Every node carries the `Location` it was parsed from. The tree only holds
//! structure: nothing here evaluates an expression.

use crate::{Location, ParseError};

use super::lexer::Comment;

/// A parsed file. Parsing never fails; problems are collected in `errors`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub body: Body,
    pub comments: Vec<Comment>,
    pub errors: Vec<ParseError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
    /// For a block body this spans the braces; for the root, the whole file.
    pub location: Location,
}

impl Body {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Blocks of the given type, in source order.
    pub fn blocks_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |b| b.kind == kind)
    }

    /// The first block of type `kind` whose first label is `name`.
    #[must_use]
    pub fn find_block<'a>(&'a self, kind: &str, name: &str) -> Option<&'a Block> {
        self.blocks
            .iter()
            .find(|b| b.kind == kind && b.name() == Some(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub name_location: Location,
    pub expression: Expression,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: String,
    pub kind_location: Location,
    pub labels: Vec<Label>,
    pub body: Body,
    pub location: Location,
}

impl Block {
    /// The first label, which names targets, groups, variables and functions.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.labels.first().map(|l| l.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub value: String,
    /// Includes the quotes when `quoted` is set.
    pub location: Location,
    pub quoted: bool,
}

impl Label {
    /// The span of the label text without quotes.
    #[must_use]
    pub fn value_location(&self) -> Location {
        if self.quoted {
            self.location.shrink()
        } else {
            self.location.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(String),
    Number(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Not,
    Negate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Traverser {
    Attr { name: String, location: Location },
    Index { key: Box<Expression>, location: Location },
    Splat { location: Location },
}

impl Traverser {
    #[must_use]
    pub fn location(&self) -> &Location {
        match self {
            Self::Attr { location, .. } | Self::Index { location, .. } | Self::Splat { location } => {
                location
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectItem {
    pub key: Expression,
    pub value: Expression,
}

impl ObjectItem {
    /// The key as written, without quotes, when it is a bare word or a
    /// literal string.
    #[must_use]
    pub fn key_name(&self) -> Option<&str> {
        match &self.key {
            Expression::ScopeTraversal(t) if t.traversal.is_empty() => Some(&t.root),
            other => other.string_literal(),
        }
    }

    #[must_use]
    pub fn key_quoted(&self) -> bool {
        matches!(self.key, Expression::Template(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Literal {
    pub value: Value,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub parts: Vec<Expression>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateWrap {
    pub wrapped: Box<Expression>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub elements: Vec<Expression>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub items: Vec<ObjectItem>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeTraversal {
    pub root: String,
    pub root_location: Location,
    pub traversal: Vec<Traverser>,
    pub location: Location,
}

impl ScopeTraversal {
    /// The dotted name segments (`target.api.tags` gives three), stopping at
    /// the first index or splat.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        let mut segments = vec![self.root.as_str()];
        for traverser in &self.traversal {
            match traverser {
                Traverser::Attr { name, .. } => segments.push(name),
                Traverser::Index { .. } | Traverser::Splat { .. } => break,
            }
        }
        segments
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeTraversal {
    pub source: Box<Expression>,
    pub traversal: Vec<Traverser>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    pub name_location: Location,
    pub arguments: Vec<Expression>,
    pub expand_final: bool,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryOp {
    pub lhs: Box<Expression>,
    pub operator: Operator,
    pub rhs: Box<Expression>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryOp {
    pub operator: Operator,
    pub operand: Box<Expression>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditional {
    pub condition: Box<Expression>,
    pub true_result: Box<Expression>,
    pub false_result: Box<Expression>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForExpr {
    pub key_var: Option<String>,
    pub value_var: String,
    pub collection: Box<Expression>,
    /// Present for object-producing `{ for ... : k => v }` expressions.
    pub key: Option<Box<Expression>>,
    pub value: Box<Expression>,
    pub condition: Option<Box<Expression>>,
    pub grouped: bool,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parenthesized {
    pub inner: Box<Expression>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Literal(Literal),
    Template(Template),
    TemplateWrap(TemplateWrap),
    Tuple(Tuple),
    Object(Object),
    ScopeTraversal(ScopeTraversal),
    RelativeTraversal(RelativeTraversal),
    FunctionCall(FunctionCall),
    BinaryOp(BinaryOp),
    UnaryOp(UnaryOp),
    Conditional(Conditional),
    For(ForExpr),
    Parenthesized(Parenthesized),
    /// Placeholder left where an expression was expected but could not be parsed.
    Invalid(Location),
}

impl Expression {
    #[must_use]
    pub fn location(&self) -> &Location {
        match self {
            Self::Literal(e) => &e.location,
            Self::Template(e) => &e.location,
            Self::TemplateWrap(e) => &e.location,
            Self::Tuple(e) => &e.location,
            Self::Object(e) => &e.location,
            Self::ScopeTraversal(e) => &e.location,
            Self::RelativeTraversal(e) => &e.location,
            Self::FunctionCall(e) => &e.location,
            Self::BinaryOp(e) => &e.location,
            Self::UnaryOp(e) => &e.location,
            Self::Conditional(e) => &e.location,
            Self::For(e) => &e.location,
            Self::Parenthesized(e) => &e.location,
            Self::Invalid(location) => location,
        }
    }

    /// The string value of a quoted string without interpolation, or of a
    /// string literal part.
    #[must_use]
    pub fn string_literal(&self) -> Option<&str> {
        match self {
            Self::Literal(Literal {
                value: Value::String(s),
                ..
            }) => Some(s),
            Self::Template(t) => match t.parts.as_slice() {
                [part] => part.string_literal(),
                _ => None,
            },
            Self::Literal(_)
            | Self::TemplateWrap(_)
            | Self::Tuple(_)
            | Self::Object(_)
            | Self::ScopeTraversal(_)
            | Self::RelativeTraversal(_)
            | Self::FunctionCall(_)
            | Self::BinaryOp(_)
            | Self::UnaryOp(_)
            | Self::Conditional(_)
            | Self::For(_)
            | Self::Parenthesized(_)
            | Self::Invalid(_) => None,
        }
    }

    #[must_use]
    pub fn is_string_literal(&self) -> bool {
        matches!(self, Self::Template(_)) && self.string_literal().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hcl::parse;

    #[test]
    fn label_value_location_excludes_quotes() {
        let file = parse("target \"api\" {}\ngroup default {}\n");
        let labels: Vec<_> = file
            .body
            .blocks
            .iter()
            .filter_map(|b| b.labels.first())
            .map(|l| (l.value_location().start.column, l.value_location().end.column))
            .collect();
        assert_eq!(labels, vec![(9, 12), (7, 14)]);
    }

    #[test]
    fn string_literal_of_template() {
        let file = parse("a = \"x\"\nb = \"${x}\"\nc = \"x${y}\"\n");
        let literal: Vec<_> = file
            .body
            .attributes
            .iter()
            .map(|a| a.expression.is_string_literal())
            .collect();
        assert_eq!(literal, vec![true, false, false]);
    }

    #[test]
    fn find_block_by_label() {
        let file = parse("target \"a\" {}\ntarget \"b\" {}\n");
        let found = file.body.find_block("target", "b").map(|b| b.location.start.line);
        assert_eq!(found, Some(2));
        assert!(file.body.find_block("group", "b").is_none());
    }

    #[test]
    fn found_block_outlives_the_lookup_keys() {
        let file = parse("group \"all\" {}\n");
        let found = {
            let kind = String::from("group");
            let name = String::from("all");
            file.body.find_block(&kind, &name)
        };
        assert_eq!(found.and_then(Block::name), Some("all"));
    }
}
