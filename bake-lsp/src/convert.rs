//! Conversions between parser locations and LSP positions.
//!
//! The parser counts lines and columns from 1, LSP from 0. Both count
//! columns in characters.

use bake_parser::Location;
use tower_lsp::lsp_types::{Position, Range};

/// Convert usize to u32 for LSP types, saturating at `u32::MAX`.
pub(crate) fn to_lsp_u32(val: usize) -> u32 {
    val.try_into().unwrap_or(u32::MAX)
}

#[must_use]
pub fn location_to_range(loc: &Location) -> Range {
    Range {
        start: parser_position_to_lsp(&loc.start),
        end: parser_position_to_lsp(&loc.end),
    }
}

#[must_use]
pub fn parser_position_to_lsp(pos: &bake_parser::Position) -> Position {
    Position {
        line: to_lsp_u32(pos.line.saturating_sub(1)),
        character: to_lsp_u32(pos.column.saturating_sub(1)),
    }
}

/// Whether `position` lies in `range`, counting both boundary columns as
/// inside. Adjacent ranges therefore share their boundary column and the
/// first one checked wins.
#[must_use]
pub fn inside_range(range: &Range, position: Position) -> bool {
    if position.line < range.start.line || position.line > range.end.line {
        return false;
    }
    if position.line == range.start.line && position.character < range.start.character {
        return false;
    }
    if position.line == range.end.line && position.character > range.end.character {
        return false;
    }
    true
}

#[must_use]
pub fn inside_location(location: &Location, position: Position) -> bool {
    inside_range(&location_to_range(location), position)
}

/// The text of a 0-indexed line, without its line terminator.
#[must_use]
pub fn line_text(source: &str, line: u32) -> Option<&str> {
    source
        .split('\n')
        .nth(line as usize)
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
}

/// A range covering every character of `source`.
#[must_use]
pub fn whole_document_range(source: &str) -> Range {
    let lines: Vec<&str> = source.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    let width = lines
        .last()
        .map_or(0, |l| l.strip_suffix('\r').unwrap_or(l).chars().count());
    Range {
        start: Position::new(0, 0),
        end: Position::new(to_lsp_u32(last), to_lsp_u32(width)),
    }
}

/// The full source line `line` (1-indexed), used for problems that carry no
/// node-level subject.
#[must_use]
pub fn source_line_range(source: &str, line: usize) -> Range {
    let index = to_lsp_u32(line.saturating_sub(1));
    let width = line_text(source, index).map_or(0, |l| l.chars().count());
    Range {
        start: Position::new(index, 0),
        end: Position::new(index, to_lsp_u32(width)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn range(start: (u32, u32), end: (u32, u32)) -> Range {
        Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1))
    }

    #[test]
    fn test_location_to_range_default_is_zero() {
        let range = location_to_range(&Location::default());
        assert_eq!(range, Range::default());
    }

    #[rstest]
    #[case::at_start((1, 4), true)]
    #[case::at_end((1, 9), true)]
    #[case::before_start((1, 3), false)]
    #[case::after_end((1, 10), false)]
    #[case::line_before((0, 5), false)]
    #[case::line_after((2, 5), false)]
    fn inside_range_is_inclusive(#[case] position: (u32, u32), #[case] expected: bool) {
        let r = range((1, 4), (1, 9));
        assert_eq!(
            inside_range(&r, Position::new(position.0, position.1)),
            expected
        );
    }

    #[test]
    fn inside_multi_line_range_ignores_columns_between() {
        let r = range((0, 10), (2, 1));
        assert!(inside_range(&r, Position::new(1, 0)));
        assert!(inside_range(&r, Position::new(1, 200)));
        assert!(!inside_range(&r, Position::new(0, 9)));
        assert!(!inside_range(&r, Position::new(2, 2)));
    }

    #[test]
    fn whole_document_covers_last_line() {
        assert_eq!(whole_document_range("a\nbcd"), range((0, 0), (1, 3)));
        assert_eq!(whole_document_range(""), range((0, 0), (0, 0)));
    }

    #[test]
    fn source_line_range_spans_the_line() {
        let source = "target \"a\" {\n  b = \n}\n";
        assert_eq!(source_line_range(source, 2), range((1, 0), (1, 6)));
    }
}
