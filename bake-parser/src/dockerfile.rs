//! A line-oriented reader for build-instruction files.
//!
//! Only the instruction structure is recovered: keyword, arguments split on
//! unquoted whitespace and the lines an instruction spans. This is enough to
//! find build stages and `ARG` declarations.

const DEFAULT_ESCAPE: char = '\\';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dockerfile {
    pub instructions: Vec<Instruction>,
    pub escape: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Upper-cased instruction keyword, e.g. `FROM`.
    pub keyword: String,
    pub arguments: Vec<String>,
    /// First line of the instruction (1-indexed).
    pub start_line: usize,
    /// Last line of the instruction (1-indexed), after continuations.
    pub end_line: usize,
    /// Length in characters of the last line, without a trailing `\r`.
    pub end_column: usize,
}

impl Instruction {
    /// Arguments with leading `--flag` options removed.
    fn positional(&self) -> impl Iterator<Item = &str> {
        self.arguments
            .iter()
            .map(String::as_str)
            .skip_while(|a| a.starts_with("--"))
    }
}

/// A named build stage: `FROM <image> AS <name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage<'a> {
    pub name: &'a str,
    pub instruction: &'a Instruction,
}

/// One name declared by an `ARG` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgDeclaration<'a> {
    pub name: &'a str,
    pub instruction: &'a Instruction,
}

impl Dockerfile {
    /// Named build stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> Vec<Stage<'_>> {
        self.instructions
            .iter()
            .filter(|i| i.keyword == "FROM")
            .filter_map(|instruction| {
                let mut args = instruction.positional().skip(1);
                let keyword = args.next()?;
                if !keyword.eq_ignore_ascii_case("AS") {
                    return None;
                }
                Some(Stage {
                    name: args.next()?,
                    instruction,
                })
            })
            .collect()
    }

    /// Every `ARG` name, in declaration order. Defaults are stripped, so
    /// `ARG a=1 b` declares `a` and `b`.
    #[must_use]
    pub fn declared_args(&self) -> Vec<ArgDeclaration<'_>> {
        self.instructions
            .iter()
            .filter(|i| i.keyword == "ARG")
            .flat_map(|instruction| {
                instruction.positional().map(move |argument| ArgDeclaration {
                    name: argument.split_once('=').map_or(argument, |(name, _)| name),
                    instruction,
                })
            })
            .collect()
    }
}

/// Parse a build-instruction file. Never fails: unknown lines become
/// instructions with whatever keyword they start with.
#[must_use]
#[tracing::instrument(level = "trace", skip(input))]
pub fn parse(input: &str) -> Dockerfile {
    let lines: Vec<&str> = input
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    let escape = escape_directive(&lines);

    let mut instructions = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    let mut heredoc: Option<(String, bool)> = None;
    for (index, line) in lines.iter().enumerate() {
        let number = index + 1;
        let trimmed = line.trim();

        if let Some((marker, strip)) = &heredoc {
            let candidate = if *strip { line.trim_start() } else { line };
            let closes = candidate == marker.as_str();
            extend_last(&mut instructions, number, line);
            if closes {
                heredoc = None;
            }
            continue;
        }

        let Some((start_line, mut text)) = pending.take() else {
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match continued(line, escape) {
                Some(head) => pending = Some((number, head.to_string())),
                None => {
                    let instruction = instruction(number, number, line, line);
                    heredoc = heredoc_marker(&instruction);
                    instructions.push(instruction);
                }
            }
            continue;
        };

        // Comments and blank lines inside a continuation are dropped.
        if trimmed.is_empty() || trimmed.starts_with('#') {
            pending = Some((start_line, text));
            continue;
        }
        text.push(' ');
        match continued(line, escape) {
            Some(head) => {
                text.push_str(head);
                pending = Some((start_line, text));
            }
            None => {
                text.push_str(line);
                let instruction = instruction(start_line, number, &text, line);
                heredoc = heredoc_marker(&instruction);
                instructions.push(instruction);
            }
        }
    }

    if let Some((start_line, text)) = pending {
        let last = lines.len().max(1);
        let last_line = lines.last().copied().unwrap_or_default();
        instructions.push(instruction(start_line, last, &text, last_line));
    }

    Dockerfile {
        instructions,
        escape,
    }
}

/// The `# escape=` parser directive, which may only appear before anything
/// else in the file.
fn escape_directive(lines: &[&str]) -> char {
    for line in lines {
        let Some(comment) = line.trim().strip_prefix('#') else {
            break;
        };
        let Some((key, value)) = comment.split_once('=') else {
            break;
        };
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            break;
        }
        if key.eq_ignore_ascii_case("escape") {
            match value.trim() {
                "`" => return '`',
                "\\" => return '\\',
                _ => break,
            }
        }
    }
    DEFAULT_ESCAPE
}

/// The line without its trailing escape character, if it continues onto the
/// next line.
fn continued(line: &str, escape: char) -> Option<&str> {
    line.trim_end().strip_suffix(escape)
}

fn instruction(start_line: usize, end_line: usize, text: &str, last_line: &str) -> Instruction {
    let mut words = words(text).into_iter();
    let keyword = words.next().unwrap_or_default().to_ascii_uppercase();
    Instruction {
        keyword,
        arguments: words.map(ToString::to_string).collect(),
        start_line,
        end_line,
        end_column: last_line.chars().count(),
    }
}

/// Split on whitespace outside single or double quotes. Quotes stay in the
/// words, so `A="x y"` is one word.
fn words(text: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = None;
    let mut quote = None;
    for (index, c) in text.char_indices() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c.is_whitespace() => {
                if let Some(from) = start.take() {
                    words.extend(text.get(from..index));
                }
                continue;
            }
            None if c == '"' || c == '\'' => quote = Some(c),
            None => {}
        }
        start.get_or_insert(index);
    }
    if let Some(from) = start {
        words.extend(text.get(from..));
    }
    words
}

fn extend_last(instructions: &mut [Instruction], number: usize, line: &str) {
    if let Some(last) = instructions.last_mut() {
        last.end_line = number;
        last.end_column = line.chars().count();
    }
}

/// `RUN <<EOF` and `COPY <<-EOF` open a heredoc ending at a line holding only
/// the marker.
fn heredoc_marker(instruction: &Instruction) -> Option<(String, bool)> {
    instruction.arguments.iter().find_map(|argument| {
        let rest = argument.strip_prefix("<<")?;
        let (rest, strip) = rest.strip_prefix('-').map_or((rest, false), |r| (r, true));
        let marker = rest.trim_matches(|c| c == '"' || c == '\'');
        if marker.is_empty() || !marker.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return None;
        }
        Some((marker.to_string(), strip))
    })
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stages_in_declaration_order() {
        let dockerfile = parse(
            "FROM busybox AS base\nFROM base as tests\nFROM --platform=$BUILDPLATFORM alpine AS release\nFROM scratch\n",
        );
        let names: Vec<_> = dockerfile.stages().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["base", "tests", "release"]);
    }

    #[test]
    fn declared_args_strip_defaults() {
        let dockerfile = parse("ARG a=1 b\nFROM scratch\nARG c\n");
        let names: Vec<_> = dockerfile.declared_args().iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn quoted_defaults_stay_in_one_argument() {
        let dockerfile = parse("ARG A=\"x y\" B='1 2' C\n");
        assert_eq!(
            dockerfile.instructions[0].arguments,
            vec!["A=\"x y\"", "B='1 2'", "C"]
        );
        let names: Vec<_> = dockerfile.declared_args().iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
    }

    #[test]
    fn continuation_lines_extend_the_instruction() {
        let dockerfile = parse("FROM alpine \\\n  # a comment\n\n  AS base\r\nRUN true\n");
        let first = &dockerfile.instructions[0];
        assert_eq!(first.keyword, "FROM");
        assert_eq!(first.arguments, vec!["alpine", "AS", "base"]);
        assert_eq!((first.start_line, first.end_line), (1, 4));
        assert_eq!(first.end_column, 9);
        assert_eq!(dockerfile.instructions[1].start_line, 5);
    }

    #[test]
    fn escape_directive_changes_continuation() {
        let dockerfile = parse("# escape=`\nFROM alpine `\n  AS base\n");
        assert_eq!(dockerfile.escape, '`');
        assert_eq!(dockerfile.stages()[0].name, "base");
        assert_eq!(dockerfile.instructions[0].end_line, 3);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let dockerfile = parse("# syntax=docker/dockerfile:1\n\n# comment\nfrom alpine\n");
        assert_eq!(dockerfile.instructions.len(), 1);
        assert_eq!(dockerfile.instructions[0].keyword, "FROM");
        assert_eq!(dockerfile.instructions[0].start_line, 4);
    }

    #[test]
    fn heredoc_body_is_not_read_as_instructions() {
        let dockerfile = parse("FROM alpine AS a\nRUN <<EOF\nFROM fake AS b\nEOF\nARG x\n");
        let names: Vec<_> = dockerfile.stages().iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a"]);
        assert_eq!(dockerfile.instructions[1].end_line, 4);
        assert_eq!(dockerfile.declared_args()[0].name, "x");
    }
}
