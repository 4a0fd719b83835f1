use crate::Location;

/// A syntax or structural problem found while reading a bake file.
///
/// `subject` is the exact node the problem is about, when the parser could
/// pin one down. `line` is always set and is the 1-indexed line the problem
/// was reported on.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{summary} ({detail})")]
pub struct ParseError {
    pub summary: String,
    pub detail: String,
    pub subject: Option<Location>,
    pub line: usize,
}

impl ParseError {
    #[must_use]
    pub fn at(summary: &str, detail: impl Into<String>, subject: &Location) -> Self {
        Self {
            summary: summary.to_string(),
            detail: detail.into(),
            subject: Some(subject.clone()),
            line: subject.start.line,
        }
    }

    /// An error that is only known to be somewhere on `line`.
    #[must_use]
    pub fn on_line(summary: &str, detail: impl Into<String>, line: usize) -> Self {
        Self {
            summary: summary.to_string(),
            detail: detail.into(),
            subject: None,
            line,
        }
    }
}
