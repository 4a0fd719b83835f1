/// A `Location` represents a span of source text.
///
/// Lines and columns are 1-indexed and the end position is exclusive, so a token
/// `abc` at the start of a file spans columns 1 through 4.
#[derive(Debug, Default, Clone, Hash, Eq, PartialEq)]
pub struct Location {
    /// Byte offset of the first character.
    pub absolute_start: usize,
    /// Byte offset one past the last character.
    pub absolute_end: usize,

    /// The start position of the location.
    pub start: Position,
    /// The end position of the location.
    pub end: Position,
}

impl Location {
    #[must_use]
    pub fn new(start: Position, end: Position, absolute_start: usize, absolute_end: usize) -> Self {
        Self {
            absolute_start,
            absolute_end,
            start,
            end,
        }
    }

    /// A zero-width location at `position`.
    #[must_use]
    pub fn empty_at(position: Position, offset: usize) -> Self {
        Self {
            absolute_start: offset,
            absolute_end: offset,
            start: position.clone(),
            end: position,
        }
    }

    /// Join two locations into one spanning from the start of `self` to the end of `other`.
    #[must_use]
    pub fn to(&self, other: &Location) -> Self {
        Self {
            absolute_start: self.absolute_start,
            absolute_end: other.absolute_end,
            start: self.start.clone(),
            end: other.end.clone(),
        }
    }

    /// Shrink the location by one character on each side.
    ///
    /// Only meaningful for single-line spans delimited by one-byte characters, such
    /// as a quoted string.
    #[must_use]
    pub fn shrink(&self) -> Self {
        if self.absolute_end < self.absolute_start + 2 {
            return self.clone();
        }
        Self {
            absolute_start: self.absolute_start + 1,
            absolute_end: self.absolute_end - 1,
            start: Position {
                line: self.start.line,
                column: self.start.column + 1,
            },
            end: Position {
                line: self.end.line,
                column: self.end.column.saturating_sub(1),
            },
        }
    }

    /// The slice of `input` covered by this location.
    #[must_use]
    pub fn text<'a>(&self, input: &'a str) -> Option<&'a str> {
        input.get(self.absolute_start..self.absolute_end)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.absolute_start == self.absolute_end
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "location.start({}), location.end({})",
            self.start, self.end
        )
    }
}

/// A `Position` represents a human-readable position in a document.
///
/// For byte offsets, use `Location.absolute_start` and `Location.absolute_end`.
#[derive(Debug, Default, Clone, Hash, Eq, PartialEq)]
pub struct Position {
    /// The line number of the position (1-indexed).
    pub line: usize,
    /// The column number of the position (1-indexed, counted as Unicode scalar values).
    pub column: usize,
}

impl Position {
    #[must_use]
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line: {}, column: {}", self.line, self.column)
    }
}
