//! Tokenizer for the build-definition syntax.
//!
//! The lexer is modal: quoted strings and heredocs are scanned as template
//! text, and `${`/`%{` sequences switch back to expression scanning until the
//! matching `}`.

use crate::{Location, Position};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Ident(String),
    Number(String),
    /// Raw template text, escapes not yet decoded.
    TemplateLiteral(String),
    TemplateInterp,
    TemplateControl,
    TemplateSeqEnd,
    OQuote,
    CQuote,
    OHeredoc { marker: String },
    CHeredoc,
    OBrace,
    CBrace,
    OBrack,
    CBrack,
    OParen,
    CParen,
    Comma,
    Dot,
    Ellipsis,
    Colon,
    Question,
    Equal,
    FatArrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqualEqual,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Newline,
    Invalid(char),
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) location: Location,
}

/// A comment found in the source, including its delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub text: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    /// Inside an object constructor or block body.
    Brace,
    Quoted,
    Heredoc { marker: String, line_start: bool },
    /// Inside `${ ... }` or `%{ ... }`.
    Interp,
}

pub(crate) struct Lexer<'a> {
    input: &'a str,
    offset: usize,
    line: usize,
    column: usize,
    modes: Vec<Mode>,
    tokens: Vec<Token>,
    comments: Vec<Comment>,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self {
            input,
            offset: 0,
            line: 1,
            column: 1,
            modes: Vec::new(),
            tokens: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Consume the whole input. The token list always ends with `Eof`.
    pub(crate) fn tokenize(mut self) -> (Vec<Token>, Vec<Comment>) {
        while !self.rest().is_empty() {
            match self.modes.last().cloned() {
                Some(Mode::Quoted) => self.lex_quoted(),
                Some(Mode::Heredoc { marker, line_start }) => self.lex_heredoc(&marker, line_start),
                Some(Mode::Brace | Mode::Interp) | None => self.lex_expression(),
            }
        }
        let position = self.position();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            location: Location::empty_at(position, self.offset),
        });
        (self.tokens, self.comments)
    }

    fn rest(&self) -> &'a str {
        self.input.get(self.offset..).unwrap_or_default()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }

    fn location_from(&self, start: &Position, start_offset: usize) -> Location {
        Location::new(start.clone(), self.position(), start_offset, self.offset)
    }

    fn push(&mut self, kind: TokenKind, start: &Position, start_offset: usize) {
        let location = self.location_from(start, start_offset);
        self.tokens.push(Token { kind, location });
    }

    /// Emit a token for the next `len` characters.
    fn single(&mut self, kind: TokenKind, len: usize) {
        let start = self.position();
        let start_offset = self.offset;
        self.bump_n(len);
        self.push(kind, &start, start_offset);
    }

    fn lex_expression(&mut self) {
        let Some(c) = self.peek() else {
            return;
        };
        let next = self.peek_second();
        match c {
            ' ' | '\t' | '\r' => {
                self.bump();
            }
            '\n' => self.single(TokenKind::Newline, 1),
            '#' => self.line_comment(),
            '/' if next == Some('/') => self.line_comment(),
            '/' if next == Some('*') => self.block_comment(),
            '"' => {
                self.single(TokenKind::OQuote, 1);
                self.modes.push(Mode::Quoted);
            }
            '{' => {
                self.single(TokenKind::OBrace, 1);
                self.modes.push(Mode::Brace);
            }
            '}' => match self.modes.last() {
                Some(Mode::Interp) => {
                    self.single(TokenKind::TemplateSeqEnd, 1);
                    self.modes.pop();
                    if let Some(Mode::Heredoc { line_start, .. }) = self.modes.last_mut() {
                        *line_start = false;
                    }
                }
                Some(Mode::Brace) => {
                    self.single(TokenKind::CBrace, 1);
                    self.modes.pop();
                }
                Some(Mode::Quoted | Mode::Heredoc { .. }) | None => {
                    self.single(TokenKind::CBrace, 1);
                }
            },
            '~' if next == Some('}') && self.modes.last() == Some(&Mode::Interp) => {
                self.bump();
            }
            '[' => self.single(TokenKind::OBrack, 1),
            ']' => self.single(TokenKind::CBrack, 1),
            '(' => self.single(TokenKind::OParen, 1),
            ')' => self.single(TokenKind::CParen, 1),
            ',' => self.single(TokenKind::Comma, 1),
            ':' => self.single(TokenKind::Colon, 1),
            '?' => self.single(TokenKind::Question, 1),
            '+' => self.single(TokenKind::Plus, 1),
            '-' => self.single(TokenKind::Minus, 1),
            '*' => self.single(TokenKind::Star, 1),
            '/' => self.single(TokenKind::Slash, 1),
            '%' => self.single(TokenKind::Percent, 1),
            '.' if self.rest().starts_with("...") => self.single(TokenKind::Ellipsis, 3),
            '.' => self.single(TokenKind::Dot, 1),
            '=' if next == Some('=') => self.single(TokenKind::EqualEqual, 2),
            '=' if next == Some('>') => self.single(TokenKind::FatArrow, 2),
            '=' => self.single(TokenKind::Equal, 1),
            '!' if next == Some('=') => self.single(TokenKind::NotEqual, 2),
            '!' => self.single(TokenKind::Bang, 1),
            '<' if next == Some('<') && self.heredoc_start() => {}
            '<' if next == Some('=') => self.single(TokenKind::LessEqual, 2),
            '<' => self.single(TokenKind::Less, 1),
            '>' if next == Some('=') => self.single(TokenKind::GreaterEqual, 2),
            '>' => self.single(TokenKind::Greater, 1),
            '&' if next == Some('&') => self.single(TokenKind::And, 2),
            '|' if next == Some('|') => self.single(TokenKind::Or, 2),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' => self.identifier(),
            c => self.single(TokenKind::Invalid(c), 1),
        }
    }

    fn identifier(&mut self) {
        let start = self.position();
        let start_offset = self.offset;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                self.bump();
            } else {
                break;
            }
        }
        let name = self
            .input
            .get(start_offset..self.offset)
            .unwrap_or_default()
            .to_string();
        self.push(TokenKind::Ident(name), &start, start_offset);
    }

    fn number(&mut self) {
        let start = self.position();
        let start_offset = self.offset;
        self.eat_digits();
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.eat_digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let after = self.peek_second();
            let signed = matches!(after, Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.rest().chars().nth(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.bump_n(digit_at);
                self.eat_digits();
            }
        }
        let text = self
            .input
            .get(start_offset..self.offset)
            .unwrap_or_default()
            .to_string();
        self.push(TokenKind::Number(text), &start, start_offset);
    }

    fn eat_digits(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
    }

    fn line_comment(&mut self) {
        let start = self.position();
        let start_offset = self.offset;
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        self.record_comment(&start, start_offset);
    }

    fn block_comment(&mut self) {
        let start = self.position();
        let start_offset = self.offset;
        self.bump_n(2);
        while !self.rest().is_empty() && !self.rest().starts_with("*/") {
            self.bump();
        }
        self.bump_n(2);
        self.record_comment(&start, start_offset);
    }

    fn record_comment(&mut self, start: &Position, start_offset: usize) {
        let location = self.location_from(start, start_offset);
        let text = location.text(self.input).unwrap_or_default().to_string();
        self.comments.push(Comment { text, location });
    }

    /// Try to lex `<<EOF` or `<<-EOF` followed by a newline. Returns false,
    /// consuming nothing, when the text is not a heredoc introducer.
    fn heredoc_start(&mut self) -> bool {
        let rest = self.rest();
        let Some(after) = rest.get(2..) else {
            return false;
        };
        let after = after.strip_prefix('-').unwrap_or(after);
        let marker: String = after
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if marker.is_empty() {
            return false;
        }
        let Some(tail) = after.get(marker.len()..) else {
            return false;
        };
        let tail = tail.strip_prefix('\r').unwrap_or(tail);
        if !(tail.starts_with('\n') || tail.is_empty()) {
            return false;
        }

        let start = self.position();
        let start_offset = self.offset;
        let introducer = rest.len() - tail.len();
        let chars = rest.get(..introducer).map_or(0, |s| s.chars().count());
        self.bump_n(chars);
        self.push(
            TokenKind::OHeredoc {
                marker: marker.clone(),
            },
            &start,
            start_offset,
        );
        self.bump_n(usize::from(self.peek() == Some('\n')));
        self.modes.push(Mode::Heredoc {
            marker,
            line_start: true,
        });
        true
    }

    fn lex_quoted(&mut self) {
        let start = self.position();
        let start_offset = self.offset;
        loop {
            let rest = self.rest();
            match self.peek() {
                None | Some('\n') => {
                    // Unterminated string: return to expression mode so the
                    // parser sees the newline.
                    self.flush_literal(&start, start_offset);
                    self.modes.pop();
                    return;
                }
                Some('"') => {
                    self.flush_literal(&start, start_offset);
                    self.single(TokenKind::CQuote, 1);
                    self.modes.pop();
                    return;
                }
                Some('\\') => {
                    self.bump();
                    if self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                Some(_) if rest.starts_with("$${") || rest.starts_with("%%{") => self.bump_n(3),
                Some(_) if rest.starts_with("${") || rest.starts_with("%{") => {
                    self.flush_literal(&start, start_offset);
                    self.open_template_sequence();
                    return;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn lex_heredoc(&mut self, marker: &str, line_start: bool) {
        if line_start && self.heredoc_end(marker) {
            return;
        }
        let start = self.position();
        let start_offset = self.offset;
        loop {
            let rest = self.rest();
            match self.peek() {
                None => {
                    self.flush_literal(&start, start_offset);
                    return;
                }
                Some('\n') => {
                    self.bump();
                    self.flush_literal(&start, start_offset);
                    self.set_heredoc_line_start(true);
                    return;
                }
                Some(_) if rest.starts_with("$${") || rest.starts_with("%%{") => self.bump_n(3),
                Some(_) if rest.starts_with("${") || rest.starts_with("%{") => {
                    self.flush_literal(&start, start_offset);
                    self.set_heredoc_line_start(false);
                    self.open_template_sequence();
                    return;
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn heredoc_end(&mut self, marker: &str) -> bool {
        let rest = self.rest();
        let line = rest.split('\n').next().unwrap_or_default();
        let trimmed = line.trim_start();
        if trimmed.trim_end_matches('\r') != marker {
            self.set_heredoc_line_start(false);
            return false;
        }
        let indent = line.len() - trimmed.len();
        self.bump_n(indent);
        self.single(TokenKind::CHeredoc, marker.chars().count());
        self.modes.pop();
        true
    }

    fn set_heredoc_line_start(&mut self, value: bool) {
        if let Some(Mode::Heredoc { line_start, .. }) = self.modes.last_mut() {
            *line_start = value;
        }
    }

    fn open_template_sequence(&mut self) {
        let kind = if self.rest().starts_with('$') {
            TokenKind::TemplateInterp
        } else {
            TokenKind::TemplateControl
        };
        self.single(kind, 2);
        if self.peek() == Some('~') {
            self.bump();
        }
        self.modes.push(Mode::Interp);
    }

    fn flush_literal(&mut self, start: &Position, start_offset: usize) {
        if self.offset == start_offset {
            return;
        }
        let location = self.location_from(start, start_offset);
        let raw = location.text(self.input).unwrap_or_default().to_string();
        self.tokens.push(Token {
            kind: TokenKind::TemplateLiteral(raw),
            location,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .tokenize()
            .0
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn block_header() {
        assert_eq!(
            kinds("target \"api\" {\n}"),
            vec![
                TokenKind::Ident("target".to_string()),
                TokenKind::OQuote,
                TokenKind::TemplateLiteral("api".to_string()),
                TokenKind::CQuote,
                TokenKind::OBrace,
                TokenKind::Newline,
                TokenKind::CBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn interpolation_inside_object() {
        assert_eq!(
            kinds("a = { b = \"${c}\" }"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Equal,
                TokenKind::OBrace,
                TokenKind::Ident("b".to_string()),
                TokenKind::Equal,
                TokenKind::OQuote,
                TokenKind::TemplateInterp,
                TokenKind::Ident("c".to_string()),
                TokenKind::TemplateSeqEnd,
                TokenKind::CQuote,
                TokenKind::CBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_stops_at_newline() {
        assert_eq!(
            kinds("a = \"abc\nb = 1"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Equal,
                TokenKind::OQuote,
                TokenKind::TemplateLiteral("abc".to_string()),
                TokenKind::Newline,
                TokenKind::Ident("b".to_string()),
                TokenKind::Equal,
                TokenKind::Number("1".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn heredoc_lines_are_template_text() {
        assert_eq!(
            kinds("x = <<EOT\nFROM ${img}\nEOT\n"),
            vec![
                TokenKind::Ident("x".to_string()),
                TokenKind::Equal,
                TokenKind::OHeredoc {
                    marker: "EOT".to_string()
                },
                TokenKind::TemplateLiteral("FROM ".to_string()),
                TokenKind::TemplateInterp,
                TokenKind::Ident("img".to_string()),
                TokenKind::TemplateSeqEnd,
                TokenKind::TemplateLiteral("\n".to_string()),
                TokenKind::CHeredoc,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_recorded_not_tokenized() {
        let (tokens, comments) = Lexer::new("# one\na = 1 // two\n/* three */").tokenize();
        assert_eq!(comments.len(), 3);
        assert_eq!(comments.first().map(|c| c.text.as_str()), Some("# one"));
        assert_eq!(comments.last().map(|c| c.text.as_str()), Some("/* three */"));
        assert!(tokens.iter().all(|t| !matches!(t.kind, TokenKind::Slash)));
    }

    #[test]
    fn columns_count_characters() {
        let (tokens, _) = Lexer::new("é = x").tokenize();
        let x = tokens.get(2).map(|t| t.location.clone());
        assert_eq!(x.map(|l| (l.start.column, l.absolute_start)), Some((5, 5)));
    }

    #[test]
    fn hyphenated_identifiers() {
        assert_eq!(
            kinds("no-cache-filter"),
            vec![TokenKind::Ident("no-cache-filter".to_string()), TokenKind::Eof]
        );
    }
}
