//! The build-definition (HCL) syntax layer.

mod ast;
mod lexer;
mod parser;

pub use ast::{
    Attribute, BinaryOp, Block, Body, Conditional, Expression, File, ForExpr, FunctionCall, Label,
    Literal, Object, ObjectItem, Operator, Parenthesized, RelativeTraversal, ScopeTraversal,
    Template, TemplateWrap, Traverser, Tuple, UnaryOp, Value,
};
pub use lexer::Comment;
pub use parser::parse;
