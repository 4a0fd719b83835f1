//! Recursive-descent parser with error recovery.
//!
//! Parsing never fails outright: every problem is recorded as a
//! `ParseError` and the parser carries on from a synchronization point, so
//! the resulting tree keeps as much of the file as possible. This matters
//! for editing, where the file is almost always incomplete.

use crate::{Location, ParseError};

use super::ast::{
    Attribute, BinaryOp, Block, Body, Conditional, Expression, File, ForExpr, FunctionCall, Label,
    Literal, Object, ObjectItem, Operator, Parenthesized, RelativeTraversal, ScopeTraversal,
    Template, TemplateWrap, Traverser, Tuple, UnaryOp, Value,
};
use super::lexer::{Lexer, Token, TokenKind};

/// Parse a build-definition file.
#[must_use]
#[tracing::instrument(level = "trace", skip(input))]
pub fn parse(input: &str) -> File {
    let (tokens, comments) = Lexer::new(input).tokenize();
    let mut parser = Parser::new(tokens);
    let body = parser.root_body(input);
    tracing::trace!(errors = parser.errors.len(), "parsed build definition");
    File {
        body,
        comments,
        errors: parser.errors,
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    eof: Token,
    errors: Vec<ParseError>,
    /// One entry per open bracket: `true` when newlines are insignificant.
    newlines_ignored: Vec<bool>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        let eof = tokens.last().cloned().unwrap_or(Token {
            kind: TokenKind::Eof,
            location: Location::default(),
        });
        Self {
            tokens,
            pos: 0,
            eof,
            errors: Vec::new(),
            newlines_ignored: vec![false],
        }
    }

    fn ignoring_newlines(&self) -> bool {
        self.newlines_ignored.last().copied().unwrap_or(false)
    }

    fn peek_index(&self) -> usize {
        let mut index = self.pos;
        if self.ignoring_newlines() {
            while self
                .tokens
                .get(index)
                .is_some_and(|t| t.kind == TokenKind::Newline)
            {
                index += 1;
            }
        }
        index
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.peek_index()).unwrap_or(&self.eof)
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    /// The token after the next one, honoring the newline mode.
    fn peek_second_kind(&self) -> &TokenKind {
        let mut index = self.peek_index() + 1;
        if self.ignoring_newlines() {
            while self
                .tokens
                .get(index)
                .is_some_and(|t| t.kind == TokenKind::Newline)
            {
                index += 1;
            }
        }
        self.tokens.get(index).map_or(&self.eof.kind, |t| &t.kind)
    }

    fn next(&mut self) -> Token {
        let index = self.peek_index();
        let token = self.tokens.get(index).cloned().unwrap_or_else(|| self.eof.clone());
        if index < self.tokens.len() {
            self.pos = index + 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> Option<Token> {
        if self.peek_kind() == kind {
            Some(self.next())
        } else {
            None
        }
    }

    fn skip_newlines(&mut self) {
        while self.tokens.get(self.pos).is_some_and(|t| t.kind == TokenKind::Newline) {
            self.pos += 1;
        }
    }

    fn error(&mut self, summary: &str, detail: &str, subject: &Location) {
        self.errors.push(ParseError::at(summary, detail, subject));
    }

    fn with_newlines<T>(&mut self, ignored: bool, f: impl FnOnce(&mut Self) -> T) -> T {
        self.newlines_ignored.push(ignored);
        let result = f(self);
        self.newlines_ignored.pop();
        result
    }

    fn root_body(&mut self, input: &str) -> Body {
        let mut body = Body {
            location: whole_input(input),
            ..Body::default()
        };
        self.body_items(&mut body, None);
        body
    }

    /// Parse attributes and blocks until the closing brace of the block
    /// opened at `open`, or the end of input for the root body. Returns the
    /// closing brace.
    fn body_items(&mut self, body: &mut Body, open: Option<&Location>) -> Option<Token> {
        loop {
            self.skip_newlines();
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Eof => {
                    if let Some(open) = open {
                        self.error(
                            "Unclosed configuration block",
                            "There is no closing brace for this block before the end of the file. This may be caused by incorrect brace nesting elsewhere in this file.",
                            open,
                        );
                    }
                    return None;
                }
                TokenKind::CBrace => {
                    self.next();
                    if open.is_some() {
                        return Some(token);
                    }
                    self.error(
                        "Argument or block definition required",
                        "An argument or block definition is required here.",
                        &token.location,
                    );
                }
                TokenKind::Ident(name) => {
                    self.next();
                    self.body_item(body, name, &token.location);
                }
                TokenKind::Number(_)
                | TokenKind::TemplateLiteral(_)
                | TokenKind::TemplateInterp
                | TokenKind::TemplateControl
                | TokenKind::TemplateSeqEnd
                | TokenKind::OQuote
                | TokenKind::CQuote
                | TokenKind::OHeredoc { .. }
                | TokenKind::CHeredoc
                | TokenKind::OBrace
                | TokenKind::OBrack
                | TokenKind::CBrack
                | TokenKind::OParen
                | TokenKind::CParen
                | TokenKind::Comma
                | TokenKind::Dot
                | TokenKind::Ellipsis
                | TokenKind::Colon
                | TokenKind::Question
                | TokenKind::Equal
                | TokenKind::FatArrow
                | TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::Bang
                | TokenKind::EqualEqual
                | TokenKind::NotEqual
                | TokenKind::Less
                | TokenKind::LessEqual
                | TokenKind::Greater
                | TokenKind::GreaterEqual
                | TokenKind::And
                | TokenKind::Or
                | TokenKind::Newline
                | TokenKind::Invalid(_) => {
                    self.next();
                    self.error(
                        "Argument or block definition required",
                        "An argument or block definition is required here.",
                        &token.location,
                    );
                    self.recover_to_newline();
                }
            }
        }
    }

    fn body_item(&mut self, body: &mut Body, name: &str, name_location: &Location) {
        match self.peek_kind() {
            TokenKind::Equal => {
                self.next();
                let expression = self.expression();
                let location = name_location.to(expression.location());
                body.attributes.push(Attribute {
                    name: name.to_string(),
                    name_location: name_location.clone(),
                    expression,
                    location,
                });
                self.end_of_item(
                    "Missing newline after argument",
                    "An argument definition must end with a newline.",
                );
            }
            TokenKind::Ident(_) | TokenKind::OQuote | TokenKind::OBrace => {
                if let Some(block) = self.block(name, name_location) {
                    body.blocks.push(block);
                    self.end_of_item(
                        "Missing newline after block definition",
                        "A block definition must end with a newline.",
                    );
                }
            }
            TokenKind::Number(_)
            | TokenKind::TemplateLiteral(_)
            | TokenKind::TemplateInterp
            | TokenKind::TemplateControl
            | TokenKind::TemplateSeqEnd
            | TokenKind::CQuote
            | TokenKind::OHeredoc { .. }
            | TokenKind::CHeredoc
            | TokenKind::CBrace
            | TokenKind::OBrack
            | TokenKind::CBrack
            | TokenKind::OParen
            | TokenKind::CParen
            | TokenKind::Comma
            | TokenKind::Dot
            | TokenKind::Ellipsis
            | TokenKind::Colon
            | TokenKind::Question
            | TokenKind::FatArrow
            | TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::Bang
            | TokenKind::EqualEqual
            | TokenKind::NotEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Newline
            | TokenKind::Invalid(_)
            | TokenKind::Eof => {
                self.error(
                    "Argument or block definition required",
                    &format!(
                        "An argument or block definition is required here. To set an argument, use the equals sign \"=\" to introduce the argument value after \"{name}\"."
                    ),
                    name_location,
                );
                self.recover_to_newline();
            }
        }
    }

    /// After an attribute or block the line must end, or the enclosing block
    /// must close on the same line.
    fn end_of_item(&mut self, summary: &str, detail: &str) {
        match self.peek_kind() {
            TokenKind::Newline | TokenKind::Eof | TokenKind::CBrace => {}
            _ => {
                let location = self.peek().location.clone();
                self.error(summary, detail, &location);
                self.recover_to_newline();
            }
        }
    }

    fn block(&mut self, kind: &str, kind_location: &Location) -> Option<Block> {
        let mut labels = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::Ident(value) => {
                    let token = self.next();
                    labels.push(Label {
                        value,
                        location: token.location,
                        quoted: false,
                    });
                }
                TokenKind::OQuote => labels.push(self.quoted_label()),
                TokenKind::OBrace => break,
                _ => {
                    let location = self.peek().location.clone();
                    self.error(
                        "Invalid block definition",
                        "Either a quoted string block label or an opening brace (\"{\") is expected here.",
                        &location,
                    );
                    self.recover_to_newline();
                    return None;
                }
            }
        }

        let open = self.next();
        let mut body = Body::default();
        let close = self.with_newlines(false, |p| p.body_items(&mut body, Some(&open.location)));
        let end = close.map_or_else(|| self.peek().location.clone(), |t| t.location);
        body.location = open.location.to(&end);
        Some(Block {
            kind: kind.to_string(),
            kind_location: kind_location.clone(),
            labels,
            location: kind_location.to(&end),
            body,
        })
    }

    fn quoted_label(&mut self) -> Label {
        let open = self.next();
        let mut value = String::new();
        let mut end = open.location.clone();
        loop {
            match self.peek_kind().clone() {
                TokenKind::TemplateLiteral(raw) => {
                    value.push_str(&unescape(&raw));
                    end = self.next().location;
                }
                TokenKind::CQuote => {
                    end = self.next().location;
                    break;
                }
                TokenKind::TemplateInterp | TokenKind::TemplateControl => {
                    let location = self.peek().location.clone();
                    self.error(
                        "Invalid block label",
                        "Block labels cannot contain template sequences.",
                        &location,
                    );
                    self.recover_to_close(&TokenKind::CQuote);
                    if let Some(close) = self.eat(&TokenKind::CQuote) {
                        end = close.location;
                    }
                    break;
                }
                _ => {
                    self.error(
                        "Unterminated template string",
                        "No closing marker was found for the string.",
                        &open.location.to(&end),
                    );
                    break;
                }
            }
        }
        Label {
            value,
            location: open.location.to(&end),
            quoted: true,
        }
    }

    /// Skip to the end of the line, stepping over balanced brackets. Stops
    /// before a closing brace of the enclosing block.
    fn recover_to_newline(&mut self) {
        let mut depth = 0usize;
        loop {
            let Some(token) = self.tokens.get(self.pos) else {
                return;
            };
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::Newline if depth == 0 => return,
                TokenKind::CBrace | TokenKind::CBrack | TokenKind::CParen | TokenKind::TemplateSeqEnd
                    if depth == 0 =>
                {
                    return;
                }
                TokenKind::OBrace
                | TokenKind::OBrack
                | TokenKind::OParen
                | TokenKind::TemplateInterp
                | TokenKind::TemplateControl => depth += 1,
                TokenKind::CBrace | TokenKind::CBrack | TokenKind::CParen | TokenKind::TemplateSeqEnd => {
                    depth -= 1;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    /// Skip to `close` at the current depth without consuming it. Gives up at
    /// an unbalanced closer of another kind or at the end of input.
    fn recover_to_close(&mut self, close: &TokenKind) {
        let mut depth = 0usize;
        loop {
            let Some(token) = self.tokens.get(self.pos) else {
                return;
            };
            if depth == 0 && &token.kind == close {
                return;
            }
            match token.kind {
                TokenKind::Eof => return,
                TokenKind::OBrace
                | TokenKind::OBrack
                | TokenKind::OParen
                | TokenKind::TemplateInterp
                | TokenKind::TemplateControl => depth += 1,
                TokenKind::CBrace | TokenKind::CBrack | TokenKind::CParen | TokenKind::TemplateSeqEnd => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn expression(&mut self) -> Expression {
        let condition = self.binary(0);
        if self.peek_kind() != &TokenKind::Question {
            return condition;
        }
        self.next();
        let true_result = self.expression();
        if self.eat(&TokenKind::Colon).is_none() {
            let location = self.peek().location.clone();
            self.error(
                "Missing false expression in conditional",
                "The conditional operator (...?...:...) requires a false expression, delimited by a colon.",
                &location,
            );
            let false_result = Expression::Invalid(Location::empty_at(
                location.start.clone(),
                location.absolute_start,
            ));
            return conditional(condition, true_result, false_result);
        }
        let false_result = self.expression();
        conditional(condition, true_result, false_result)
    }

    fn binary(&mut self, level: usize) -> Expression {
        if level >= BINARY_LEVELS {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1);
        while let Some(operator) = binary_operator(level, self.peek_kind()) {
            self.next();
            let rhs = self.binary(level + 1);
            let location = lhs.location().to(rhs.location());
            lhs = Expression::BinaryOp(BinaryOp {
                lhs: Box::new(lhs),
                operator,
                rhs: Box::new(rhs),
                location,
            });
        }
        lhs
    }

    fn unary(&mut self) -> Expression {
        let operator = match self.peek_kind() {
            TokenKind::Bang => Operator::Not,
            TokenKind::Minus => Operator::Negate,
            _ => {
                let primary = self.primary();
                return self.postfix(primary);
            }
        };
        let token = self.next();
        let operand = self.unary();
        let location = token.location.to(operand.location());
        Expression::UnaryOp(UnaryOp {
            operator,
            operand: Box::new(operand),
            location,
        })
    }

    fn primary(&mut self) -> Expression {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Number(n) => {
                self.next();
                Expression::Literal(Literal {
                    value: Value::Number(n.clone()),
                    location: token.location,
                })
            }
            TokenKind::Ident(name) => {
                self.next();
                match name.as_str() {
                    "true" | "false" => Expression::Literal(Literal {
                        value: Value::Bool(name == "true"),
                        location: token.location,
                    }),
                    "null" => Expression::Literal(Literal {
                        value: Value::Null,
                        location: token.location,
                    }),
                    _ if self.peek_kind() == &TokenKind::OParen => {
                        self.function_call(name, token.location)
                    }
                    _ => Expression::ScopeTraversal(ScopeTraversal {
                        root: name.clone(),
                        root_location: token.location.clone(),
                        traversal: Vec::new(),
                        location: token.location,
                    }),
                }
            }
            TokenKind::OQuote => self.quoted_template(),
            TokenKind::OHeredoc { .. } => self.heredoc_template(),
            TokenKind::OBrack => self.tuple(),
            TokenKind::OBrace => self.object(),
            TokenKind::OParen => {
                let open = self.next();
                let inner = self.with_newlines(true, |p| {
                    let inner = p.expression();
                    (inner, p.expect_close(&TokenKind::CParen, "Unbalanced parentheses", "Expected a closing parenthesis to terminate the expression."))
                });
                let (inner, close) = inner;
                let end = close.unwrap_or_else(|| inner.location().clone());
                Expression::Parenthesized(Parenthesized {
                    location: open.location.to(&end),
                    inner: Box::new(inner),
                })
            }
            TokenKind::CBrace
            | TokenKind::CBrack
            | TokenKind::CParen
            | TokenKind::Comma
            | TokenKind::CQuote
            | TokenKind::TemplateSeqEnd
            | TokenKind::CHeredoc
            | TokenKind::Newline
            | TokenKind::Eof => {
                self.error(
                    "Invalid expression",
                    "Expected the start of an expression, but found an invalid expression token.",
                    &token.location,
                );
                Expression::Invalid(Location::empty_at(
                    token.location.start.clone(),
                    token.location.absolute_start,
                ))
            }
            TokenKind::TemplateLiteral(_)
            | TokenKind::TemplateInterp
            | TokenKind::TemplateControl
            | TokenKind::Dot
            | TokenKind::Ellipsis
            | TokenKind::Colon
            | TokenKind::Question
            | TokenKind::Equal
            | TokenKind::FatArrow
            | TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::Bang
            | TokenKind::EqualEqual
            | TokenKind::NotEqual
            | TokenKind::Less
            | TokenKind::LessEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::And
            | TokenKind::Or
            | TokenKind::Invalid(_) => {
                self.next();
                self.error(
                    "Invalid expression",
                    "Expected the start of an expression, but found an invalid expression token.",
                    &token.location,
                );
                Expression::Invalid(token.location)
            }
        }
    }

    /// Consume `close`, or record an error and return `None`.
    fn expect_close(&mut self, close: &TokenKind, summary: &str, detail: &str) -> Option<Location> {
        if let Some(token) = self.eat(close) {
            return Some(token.location);
        }
        let location = self.peek().location.clone();
        self.error(summary, detail, &location);
        self.recover_to_close(close);
        self.eat(close).map(|t| t.location)
    }

    fn postfix(&mut self, mut expression: Expression) -> Expression {
        loop {
            let traverser = match self.peek_kind() {
                TokenKind::Dot => {
                    let dot = self.next();
                    let token = self.peek().clone();
                    match token.kind {
                        TokenKind::Ident(name) => {
                            self.next();
                            Traverser::Attr {
                                name,
                                location: dot.location.to(&token.location),
                            }
                        }
                        TokenKind::Number(n) => {
                            self.next();
                            Traverser::Index {
                                key: Box::new(Expression::Literal(Literal {
                                    value: Value::Number(n),
                                    location: token.location.clone(),
                                })),
                                location: dot.location.to(&token.location),
                            }
                        }
                        TokenKind::Star => {
                            self.next();
                            Traverser::Splat {
                                location: dot.location.to(&token.location),
                            }
                        }
                        _ => {
                            self.error(
                                "Invalid attribute name",
                                "An attribute name is required after a dot.",
                                &token.location,
                            );
                            return expression;
                        }
                    }
                }
                TokenKind::OBrack => {
                    let open = self.next();
                    if self.peek_kind() == &TokenKind::Star && self.peek_second_kind() == &TokenKind::CBrack {
                        self.next();
                        let close = self.next();
                        Traverser::Splat {
                            location: open.location.to(&close.location),
                        }
                    } else {
                        let (key, close) = self.with_newlines(true, |p| {
                            let key = p.expression();
                            (key, p.expect_close(&TokenKind::CBrack, "Missing close bracket on index", "The index operator must end with a closing bracket (\"]\")."))
                        });
                        let end = close.unwrap_or_else(|| key.location().clone());
                        Traverser::Index {
                            key: Box::new(key),
                            location: open.location.to(&end),
                        }
                    }
                }
                _ => return expression,
            };
            expression = extend_traversal(expression, traverser);
        }
    }

    fn function_call(&mut self, name: &str, name_location: Location) -> Expression {
        self.next();
        let mut arguments = Vec::new();
        let mut expand_final = false;
        let close = self.with_newlines(true, |p| loop {
            if let Some(close) = p.eat(&TokenKind::CParen) {
                return Some(close.location);
            }
            arguments.push(p.expression());
            if p.eat(&TokenKind::Ellipsis).is_some() {
                expand_final = true;
            }
            match p.peek_kind() {
                TokenKind::Comma => {
                    p.next();
                }
                TokenKind::CParen => {}
                _ => {
                    return p.expect_close(
                        &TokenKind::CParen,
                        "Missing argument separator",
                        "A comma is required to separate each function argument from the next.",
                    );
                }
            }
        });
        let end = close.unwrap_or_else(|| {
            arguments
                .last()
                .map_or_else(|| name_location.clone(), |a| a.location().clone())
        });
        Expression::FunctionCall(FunctionCall {
            name: name.to_string(),
            location: name_location.to(&end),
            name_location,
            arguments,
            expand_final,
        })
    }

    fn tuple(&mut self) -> Expression {
        let open = self.next();
        self.with_newlines(true, |p| {
            if matches!(p.peek_kind(), TokenKind::Ident(word) if word == "for") {
                return p.for_expression(&open.location, &TokenKind::CBrack);
            }
            let mut elements = Vec::new();
            let close = loop {
                if let Some(close) = p.eat(&TokenKind::CBrack) {
                    break Some(close.location);
                }
                elements.push(p.expression());
                match p.peek_kind() {
                    TokenKind::Comma => {
                        p.next();
                    }
                    TokenKind::CBrack => {}
                    _ => {
                        break p.expect_close(
                            &TokenKind::CBrack,
                            "Missing item separator",
                            "Expected a comma to mark the beginning of the next item.",
                        );
                    }
                }
            };
            let end = close.unwrap_or_else(|| {
                elements
                    .last()
                    .map_or_else(|| open.location.clone(), |e| e.location().clone())
            });
            Expression::Tuple(Tuple {
                elements,
                location: open.location.to(&end),
            })
        })
    }

    fn object(&mut self) -> Expression {
        let open = self.next();
        let is_for = self.with_newlines(true, |p| {
            matches!(p.peek_kind(), TokenKind::Ident(word) if word == "for")
        });
        if is_for {
            return self.with_newlines(true, |p| p.for_expression(&open.location, &TokenKind::CBrace));
        }

        self.with_newlines(false, |p| {
            let mut items = Vec::new();
            let close = loop {
                p.skip_newlines();
                if let Some(close) = p.eat(&TokenKind::CBrace) {
                    break Some(close.location);
                }
                if matches!(
                    p.peek_kind(),
                    TokenKind::Eof | TokenKind::CBrack | TokenKind::CParen | TokenKind::TemplateSeqEnd
                ) {
                    let location = p.peek().location.clone();
                    p.error(
                        "Missing closing brace",
                        "An object constructor must end with a closing brace (\"}\").",
                        &location,
                    );
                    break None;
                }
                let key = p.with_newlines(true, Self::binary_key);
                let separator = match p.peek_kind() {
                    TokenKind::Equal | TokenKind::Colon => {
                        p.next();
                        true
                    }
                    _ => false,
                };
                if !separator {
                    let location = p.peek().location.clone();
                    p.error(
                        "Missing key/value separator",
                        "Expected an equals sign (\"=\") to mark the beginning of the attribute value.",
                        &location,
                    );
                    let value = Expression::Invalid(Location::empty_at(
                        location.start.clone(),
                        location.absolute_start,
                    ));
                    items.push(ObjectItem { key, value });
                    p.recover_to_newline();
                    continue;
                }
                let value = p.expression();
                items.push(ObjectItem { key, value });
                match p.peek_kind() {
                    TokenKind::Comma | TokenKind::Newline => {
                        p.next();
                    }
                    TokenKind::CBrace => {}
                    _ => {
                        let location = p.peek().location.clone();
                        p.error(
                            "Missing attribute separator",
                            "Expected a newline or comma to mark the beginning of the next attribute.",
                            &location,
                        );
                        p.recover_to_newline();
                    }
                }
            };
            let end = close.unwrap_or_else(|| {
                items
                    .last()
                    .map_or_else(|| open.location.clone(), |i| i.value.location().clone())
            });
            Expression::Object(Object {
                items,
                location: open.location.to(&end),
            })
        })
    }

    /// Object keys are parsed one precedence level below the conditional so
    /// that `a = b` does not swallow the separator.
    fn binary_key(&mut self) -> Expression {
        self.binary(0)
    }

    fn for_expression(&mut self, open: &Location, close: &TokenKind) -> Expression {
        self.next();
        let mut names = Vec::new();
        while let TokenKind::Ident(name) = self.peek_kind().clone() {
            if name == "in" {
                break;
            }
            self.next();
            names.push(name);
            if self.eat(&TokenKind::Comma).is_none() {
                break;
            }
        }
        let in_keyword = matches!(self.peek_kind(), TokenKind::Ident(word) if word == "in");
        if names.is_empty() || !in_keyword {
            let location = self.peek().location.clone();
            self.error(
                "Invalid 'for' expression",
                "For expression requires a variable name and the 'in' keyword.",
                &location,
            );
            self.recover_to_close(close);
            let end = self.eat(close).map_or(location, |t| t.location);
            return Expression::Invalid(open.to(&end));
        }
        self.next();
        let collection = self.expression();
        if self.eat(&TokenKind::Colon).is_none() {
            let location = self.peek().location.clone();
            self.error(
                "Invalid 'for' expression",
                "A colon is required after the collection expression.",
                &location,
            );
        }
        let mut key = None;
        let mut value = self.expression();
        let mut grouped = false;
        if close == &TokenKind::CBrace {
            if self.eat(&TokenKind::FatArrow).is_some() {
                key = Some(Box::new(value));
                value = self.expression();
                grouped = self.eat(&TokenKind::Ellipsis).is_some();
            } else {
                let location = self.peek().location.clone();
                self.error(
                    "Invalid 'for' expression",
                    "An object-producing for expression requires a key expression followed by \"=>\".",
                    &location,
                );
            }
        }
        let condition = if matches!(self.peek_kind(), TokenKind::Ident(word) if word == "if") {
            self.next();
            Some(Box::new(self.expression()))
        } else {
            None
        };
        let end = self
            .expect_close(close, "Invalid 'for' expression", "Expected the end of the for expression.")
            .unwrap_or_else(|| value.location().clone());
        let mut names = names.into_iter();
        let (key_var, value_var) = match (names.next(), names.next()) {
            (Some(k), Some(v)) => (Some(k), v),
            (Some(v), None) => (None, v),
            (None, _) => (None, String::new()),
        };
        Expression::For(ForExpr {
            key_var,
            value_var,
            collection: Box::new(collection),
            key,
            value: Box::new(value),
            condition,
            grouped,
            location: open.to(&end),
        })
    }

    fn quoted_template(&mut self) -> Expression {
        let open = self.next();
        let (parts, single_interpolation, end) = self.template_parts(&open.location, &TokenKind::CQuote);
        template(open.location.to(&end), parts, single_interpolation, &open.location)
    }

    fn heredoc_template(&mut self) -> Expression {
        let open = self.next();
        let (parts, _, end) = self.template_parts(&open.location, &TokenKind::CHeredoc);
        template(open.location.to(&end), parts, false, &open.location)
    }

    /// Collect literal text and interpolated expressions up to `close`.
    /// Returns the parts, whether the only part is an interpolation, and the
    /// closing location.
    fn template_parts(&mut self, open: &Location, close: &TokenKind) -> (Vec<Expression>, bool, Location) {
        let mut parts = Vec::new();
        let mut interpolations = 0usize;
        let mut end = open.clone();
        self.with_newlines(false, |p| loop {
            let token = p.tokens.get(p.pos).cloned().unwrap_or_else(|| p.eof.clone());
            match &token.kind {
                kind if kind == close => {
                    p.pos += 1;
                    end = token.location;
                    break;
                }
                TokenKind::TemplateLiteral(raw) => {
                    p.pos += 1;
                    let value = if close == &TokenKind::CQuote {
                        unescape(raw)
                    } else {
                        raw.replace("$${", "${").replace("%%{", "%{")
                    };
                    parts.push(Expression::Literal(Literal {
                        value: Value::String(value),
                        location: token.location.clone(),
                    }));
                    end = token.location;
                }
                TokenKind::TemplateInterp => {
                    p.pos += 1;
                    let expression = p.with_newlines(true, Self::expression);
                    end = p.template_sequence_end(&token.location);
                    parts.push(expression);
                    interpolations += 1;
                }
                TokenKind::TemplateControl => {
                    p.pos += 1;
                    p.with_newlines(true, |p| p.template_directive(&mut parts));
                    end = p.template_sequence_end(&token.location);
                }
                _ => {
                    let (summary, detail) = if close == &TokenKind::CQuote {
                        ("Unterminated template string", "No closing marker was found for the string.")
                    } else {
                        ("Unclosed heredoc", "There is no closing marker for this heredoc before the end of the file.")
                    };
                    p.error(summary, detail, &open.to(&end));
                    break;
                }
            }
        });
        let single_interpolation = interpolations == 1 && parts.len() == 1;
        (parts, single_interpolation, end)
    }

    fn template_sequence_end(&mut self, open: &Location) -> Location {
        if let Some(token) = self.with_newlines(true, |p| p.eat(&TokenKind::TemplateSeqEnd)) {
            return token.location;
        }
        let location = self.peek().location.clone();
        self.error(
            "Extra characters after interpolation expression",
            "Expected a closing brace to end the interpolation expression.",
            &open.to(&location),
        );
        self.recover_to_close(&TokenKind::TemplateSeqEnd);
        self.eat(&TokenKind::TemplateSeqEnd).map_or(location, |t| t.location)
    }

    /// `%{ if cond }`, `%{ for x in coll }`, `%{ else }`, `%{ endif }`,
    /// `%{ endfor }`. The expressions are kept as template parts so that
    /// position queries can reach them.
    fn template_directive(&mut self, parts: &mut Vec<Expression>) {
        let token = self.peek().clone();
        let TokenKind::Ident(keyword) = &token.kind else {
            self.error(
                "Invalid template control keyword",
                "A template control keyword (\"if\", \"for\", etc) is expected here.",
                &token.location,
            );
            return;
        };
        self.next();
        match keyword.as_str() {
            "if" => parts.push(self.expression()),
            "for" => {
                while let TokenKind::Ident(name) = self.peek_kind() {
                    if name == "in" {
                        break;
                    }
                    self.next();
                    if self.eat(&TokenKind::Comma).is_none() {
                        break;
                    }
                }
                if matches!(self.peek_kind(), TokenKind::Ident(word) if word == "in") {
                    self.next();
                    parts.push(self.expression());
                } else {
                    let location = self.peek().location.clone();
                    self.error(
                        "Invalid template directive",
                        "A \"for\" directive requires the \"in\" keyword.",
                        &location,
                    );
                }
            }
            "else" | "endif" | "endfor" => {}
            _ => self.error(
                "Invalid template control keyword",
                &format!("\"{keyword}\" is not a valid template control keyword."),
                &token.location,
            ),
        }
    }
}

/// Number of binary precedence levels, loosest first.
const BINARY_LEVELS: usize = 6;

fn binary_operator(level: usize, kind: &TokenKind) -> Option<Operator> {
    let operator = match (level, kind) {
        (0, TokenKind::Or) => Operator::Or,
        (1, TokenKind::And) => Operator::And,
        (2, TokenKind::EqualEqual) => Operator::Equal,
        (2, TokenKind::NotEqual) => Operator::NotEqual,
        (3, TokenKind::Less) => Operator::Less,
        (3, TokenKind::LessEqual) => Operator::LessOrEqual,
        (3, TokenKind::Greater) => Operator::Greater,
        (3, TokenKind::GreaterEqual) => Operator::GreaterOrEqual,
        (4, TokenKind::Plus) => Operator::Add,
        (4, TokenKind::Minus) => Operator::Subtract,
        (5, TokenKind::Star) => Operator::Multiply,
        (5, TokenKind::Slash) => Operator::Divide,
        (5, TokenKind::Percent) => Operator::Modulo,
        _ => return None,
    };
    Some(operator)
}

fn conditional(condition: Expression, true_result: Expression, false_result: Expression) -> Expression {
    let location = condition.location().to(false_result.location());
    Expression::Conditional(Conditional {
        condition: Box::new(condition),
        true_result: Box::new(true_result),
        false_result: Box::new(false_result),
        location,
    })
}

fn template(location: Location, mut parts: Vec<Expression>, single_interpolation: bool, open: &Location) -> Expression {
    if single_interpolation {
        if let Some(wrapped) = parts.pop() {
            return Expression::TemplateWrap(TemplateWrap {
                wrapped: Box::new(wrapped),
                location,
            });
        }
    }
    if parts.is_empty() {
        // `""` still has one (empty) literal part, placed between the quotes.
        parts.push(Expression::Literal(Literal {
            value: Value::String(String::new()),
            location: Location::empty_at(open.end.clone(), open.absolute_end),
        }));
    }
    Expression::Template(Template { parts, location })
}

fn extend_traversal(expression: Expression, traverser: Traverser) -> Expression {
    match expression {
        Expression::ScopeTraversal(mut t) => {
            t.location = t.location.to(traverser.location());
            t.traversal.push(traverser);
            Expression::ScopeTraversal(t)
        }
        Expression::RelativeTraversal(mut t) => {
            t.location = t.location.to(traverser.location());
            t.traversal.push(traverser);
            Expression::RelativeTraversal(t)
        }
        other => {
            let location = other.location().to(traverser.location());
            Expression::RelativeTraversal(RelativeTraversal {
                source: Box::new(other),
                traversal: vec![traverser],
                location,
            })
        }
    }
}

fn whole_input(input: &str) -> Location {
    let mut end = crate::Position::new(1, 1);
    for c in input.chars() {
        if c == '\n' {
            end.line += 1;
            end.column = 1;
        } else {
            end.column += 1;
        }
    }
    Location::new(crate::Position::new(1, 1), end, 0, input.len())
}

/// Decode the escape sequences of a quoted string.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some('u' | 'U') => {
                    let hex: String = std::iter::from_fn(|| chars.next_if(char::is_ascii_hexdigit))
                        .take(8)
                        .collect();
                    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                        Some(decoded) => out.push(decoded),
                        None => {
                            out.push('\\');
                            out.push_str(&hex);
                        }
                    }
                }
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '$' if raw_starts(&mut chars, "${") => {
                out.push_str("${");
            }
            '%' if raw_starts(&mut chars, "%{") => {
                out.push_str("%{");
            }
            c => out.push(c),
        }
    }
    out
}

/// Consume `$${`/`%%{` escapes: `pattern` is what follows the first
/// character.
fn raw_starts(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, pattern: &str) -> bool {
    let mut lookahead = chars.clone();
    if pattern.chars().all(|p| lookahead.next() == Some(p)) {
        for _ in pattern.chars() {
            chars.next();
        }
        true
    } else {
        false
    }
}
