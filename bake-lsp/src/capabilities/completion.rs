//! Completion: block and attribute snippets from the schema catalog, plus
//! value suggestions for attributes whose values name something

use std::path::PathBuf;

use bake_parser::hcl::{Attribute, Block, Body, Expression, File, Literal};
use bake_parser::schema::{self, AttributeSchema, BlockSchema};
use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionList, CompletionTextEdit, Documentation,
    InsertTextFormat, MarkupContent, MarkupKind, Position, Range, TextEdit,
};

use crate::collaborators::list_directory;
use crate::companion::Companions;
use crate::convert::{inside_location, line_text, location_to_range};
use crate::error::Result;
use crate::state::Document;
use crate::walker::{self, Node};

pub(crate) const NETWORK_MODES: &[&str] = &["default", "host", "none"];
pub(crate) const ENTITLEMENTS: &[&str] = &["network.host", "security.insecure"];

/// Build arguments every build understands without an `ARG` declaration.
pub const BUILTIN_ARGS: &[&str] = &[
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "FTP_PROXY",
    "ALL_PROXY",
    "NO_PROXY",
    "BUILDKIT_CACHE_MOUNT_NS",
    "BUILDKIT_MULTI_PLATFORM",
    "BUILDKIT_SANDBOX_HOSTNAME",
    "BUILDKIT_DOCKERFILE_CHECK",
    "BUILDKIT_CONTEXT_KEEP_GIT_DIR",
    "SOURCE_DATE_EPOCH",
];

/// Where the cursor sits within an attribute value.
#[derive(Debug, Clone, Copy)]
enum Slot<'a> {
    /// Nothing has been typed after the `=` yet.
    Empty,
    /// Inside a list, between elements.
    List,
    /// Inside the literal text of a quoted string.
    InString(&'a Literal),
    Other,
}

impl<'a> Slot<'a> {
    fn of(path: &[Node<'a>]) -> Self {
        match path {
            [
                ..,
                Node::Expression(Expression::Template(_)),
                Node::Expression(Expression::Literal(literal)),
            ] => Self::InString(literal),
            [.., Node::Expression(Expression::Invalid(_))] => Self::Empty,
            [.., Node::Expression(Expression::Tuple(_))] => Self::List,
            _ => Self::Other,
        }
    }
}

/// Compute completion items for a position in a bake file.
///
/// # Errors
///
/// `UnexpectedDocument` if `document` is not a bake file.
pub fn compute_completions(
    companions: &Companions<'_>,
    document: &Document,
    position: Position,
) -> Result<CompletionList> {
    let file = document.bake()?;
    Ok(CompletionList {
        is_incomplete: false,
        items: items(companions, document, file, position),
    })
}

fn items(
    companions: &Companions<'_>,
    document: &Document,
    file: &File,
    position: Position,
) -> Vec<CompletionItem> {
    if file
        .comments
        .iter()
        .any(|c| inside_location(&c.location, position))
    {
        return Vec::new();
    }

    let blocks = enclosing_blocks(&file.body, position);
    let (Some(root), Some(block)) = (blocks.first(), blocks.last()) else {
        if file
            .body
            .attributes
            .iter()
            .any(|a| inside_location(&a.location, position))
        {
            return Vec::new();
        }
        return typed_range(&document.text, position)
            .map(root_snippets)
            .unwrap_or_default();
    };

    if let Some(attribute) = block.body.attributes.iter().find(|a| {
        inside_location(&a.location, position) && !inside_location(&a.name_location, position)
    }) {
        if root.kind == "variable" {
            return Vec::new();
        }
        return value_items(companions, document, file, block, attribute, position);
    }

    let Some(range) = typed_range(&document.text, position) else {
        return Vec::new();
    };
    let Some(schema) = block_schema(&blocks) else {
        return Vec::new();
    };
    body_items(schema, &block.body, range, position)
}

/// Blocks containing `position`, outermost first.
fn enclosing_blocks(body: &Body, position: Position) -> Vec<&Block> {
    let mut blocks = Vec::new();
    let mut current = body;
    while let Some(block) = current
        .blocks
        .iter()
        .find(|b| inside_location(&b.body.location, position))
    {
        blocks.push(block);
        current = &block.body;
    }
    blocks
}

fn block_schema(blocks: &[&Block]) -> Option<&'static BlockSchema> {
    let (root, nested) = blocks.split_first()?;
    nested
        .iter()
        .try_fold(schema::root_block(&root.kind)?, |schema, block| {
            schema.block(&block.kind)
        })
}

/// The range of the identifier being typed before the cursor, when nothing
/// but indentation precedes it on the line.
fn typed_range(text: &str, position: Position) -> Option<Range> {
    let line = line_text(text, position.line).unwrap_or_default();
    let before: Vec<char> = line.chars().take(position.character as usize).collect();
    let typed = before
        .iter()
        .rev()
        .take_while(|c| c.is_alphanumeric() || **c == '_' || **c == '-')
        .count();
    let indentation = before.len() - typed;
    if !before.iter().take(indentation).all(|c| c.is_whitespace()) {
        return None;
    }
    let start = Position::new(position.line, position.character.saturating_sub(typed as u32));
    Some(Range::new(start, position))
}

fn markdown(value: &str) -> Documentation {
    Documentation::MarkupContent(MarkupContent {
        kind: MarkupKind::Markdown,
        value: value.to_string(),
    })
}

fn snippet(label: &str, detail: &str, kind: CompletionItemKind, range: Range, text: String) -> CompletionItem {
    CompletionItem {
        label: label.to_string(),
        detail: Some(detail.to_string()),
        kind: Some(kind),
        insert_text_format: Some(InsertTextFormat::SNIPPET),
        text_edit: Some(CompletionTextEdit::Edit(TextEdit::new(range, text))),
        ..Default::default()
    }
}

fn label(label: &str) -> CompletionItem {
    CompletionItem {
        label: label.to_string(),
        ..Default::default()
    }
}

fn block_snippet(schema: &BlockSchema, range: Range) -> CompletionItem {
    CompletionItem {
        documentation: Some(markdown(schema.description)),
        ..snippet(
            schema.name,
            "Block",
            CompletionItemKind::CLASS,
            range,
            schema.snippet(),
        )
    }
}

fn root_snippets(range: Range) -> Vec<CompletionItem> {
    schema::ROOT_BLOCKS
        .iter()
        .map(|schema| block_snippet(schema, range))
        .collect()
}

fn attribute_snippet(attribute: &AttributeSchema, range: Range) -> CompletionItem {
    let necessity = if attribute.optional { "optional" } else { "required" };
    CompletionItem {
        documentation: Some(markdown(attribute.description)),
        ..snippet(
            attribute.name,
            &format!("{necessity}, {}", attribute.shape.describe()),
            CompletionItemKind::PROPERTY,
            range,
            format!("{} = {}", attribute.name, attribute.shape.value_snippet()),
        )
    }
}

/// Attributes not yet set in the block, then the nested block types.
fn body_items(schema: &BlockSchema, body: &Body, range: Range, position: Position) -> Vec<CompletionItem> {
    let present = |name: &str| {
        body.attributes
            .iter()
            .any(|a| a.name == name && !inside_location(&a.name_location, position))
    };
    schema
        .attributes
        .iter()
        .filter(|a| !present(a.name))
        .map(|a| attribute_snippet(a, range))
        .chain(schema.blocks.iter().map(|b| block_snippet(b, range)))
        .collect()
}

fn value_items(
    companions: &Companions<'_>,
    document: &Document,
    file: &File,
    block: &Block,
    attribute: &Attribute,
    position: Position,
) -> Vec<CompletionItem> {
    let path = walker::walk(&attribute.expression, position);
    let slot = Slot::of(&path);
    let in_list = matches!(path.first(), Some(Node::Expression(Expression::Tuple(_))));
    // A bare value is the attribute's own string, not an element within it.
    let top_level = path.len() <= 2;

    match (block.kind.as_str(), attribute.name.as_str()) {
        ("target", "network") if top_level => enumeration(NETWORK_MODES, slot, position),
        ("target", "entitlements") if in_list => match slot {
            Slot::List => enumeration(ENTITLEMENTS, Slot::Empty, position),
            Slot::InString(_) | Slot::Empty | Slot::Other => enumeration(ENTITLEMENTS, slot, position),
        },
        ("target", "inherits") if in_list => {
            references(file.body.blocks_of("target").filter_map(Block::name), slot)
        }
        ("group", "targets") if in_list => {
            let targets = file.body.blocks_of("target").filter_map(Block::name);
            let groups = file
                .body
                .blocks_of("group")
                .filter(|g| !std::ptr::eq(*g, block))
                .filter_map(Block::name);
            references(targets.chain(groups), slot)
        }
        ("target", "target") if top_level => {
            let Some(companion) = companions.resolve(block) else {
                return Vec::new();
            };
            let stages = companion.dockerfile.stages();
            references(stages.iter().map(|s| s.name), slot)
        }
        ("target", "args") => arg_keys(companions, file, block, attribute, &path),
        ("target", "context") if top_level => {
            path_items(document, slot, position, true)
        }
        ("target", "dockerfile") if top_level => {
            path_items(document, slot, position, false)
        }
        ("target", "contexts")
            if path.len() == 3
                && matches!(path.first(), Some(Node::Expression(Expression::Object(_)))) =>
        {
            path_items(document, slot, position, true)
        }
        _ => Vec::new(),
    }
}

/// Fixed string choices: quoted snippets where no value exists yet, bare
/// labels inside an open string.
fn enumeration(choices: &[&str], slot: Slot<'_>, position: Position) -> Vec<CompletionItem> {
    let here = Range::new(position, position);
    match slot {
        Slot::Empty => choices
            .iter()
            .map(|choice| CompletionItem {
                label: (*choice).to_string(),
                detail: Some("string".to_string()),
                insert_text_format: Some(InsertTextFormat::SNIPPET),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit::new(
                    here,
                    format!("\"{choice}\""),
                ))),
                ..Default::default()
            })
            .collect(),
        Slot::InString(_) => choices.iter().map(|c| label(c)).collect(),
        Slot::List | Slot::Other => Vec::new(),
    }
}

/// Names of other blocks or stages: inserted with quotes into an empty
/// slot, bare inside an open string.
fn references<'n>(names: impl Iterator<Item = &'n str>, slot: Slot<'_>) -> Vec<CompletionItem> {
    match slot {
        Slot::Empty | Slot::List => names
            .map(|name| CompletionItem {
                insert_text: Some(format!("\"{name}\"")),
                ..label(name)
            })
            .collect(),
        Slot::InString(_) => names.map(label).collect(),
        Slot::Other => Vec::new(),
    }
}

/// `ARG` names from the target's build file and its ancestors', then the
/// built-in arguments, minus keys already set elsewhere in the object.
fn arg_keys(
    companions: &Companions<'_>,
    file: &File,
    block: &Block,
    attribute: &Attribute,
    path: &[Node<'_>],
) -> Vec<CompletionItem> {
    let current = match path {
        [Node::Expression(Expression::Object(_))] => None,
        [Node::Expression(Expression::Object(_)), Node::ObjectKey(item)] => Some(*item),
        _ => return Vec::new(),
    };
    let Expression::Object(object) = &attribute.expression else {
        return Vec::new();
    };
    let companions_found = companions.with_ancestors(file, block);
    if companions_found.is_empty() {
        return Vec::new();
    }
    let existing: Vec<&str> = object
        .items
        .iter()
        .filter(|item| current.is_none_or(|c| !std::ptr::eq(*item, c)))
        .filter_map(|item| item.key_name())
        .collect();

    let mut names: Vec<String> = Vec::new();
    for companion in &companions_found {
        for arg in companion.dockerfile.declared_args() {
            if !names.iter().any(|n| n == arg.name) {
                names.push(arg.name.to_string());
            }
        }
    }
    for builtin in BUILTIN_ARGS {
        if !names.iter().any(|n| n == builtin) {
            names.push((*builtin).to_string());
        }
    }
    names
        .iter()
        .filter(|name| !existing.contains(&name.as_str()))
        .map(|name| label(name))
        .collect()
}

/// Directory entries for the path typed so far inside a quoted string.
fn path_items(
    document: &Document,
    slot: Slot<'_>,
    position: Position,
    folders_only: bool,
) -> Vec<CompletionItem> {
    let Slot::InString(literal) = slot else {
        return Vec::new();
    };
    let Some(folder) = document.folder() else {
        return Vec::new();
    };
    let start = location_to_range(&literal.location).start;
    if start.line != position.line {
        return Vec::new();
    }
    let raw = literal.location.text(&document.text).unwrap_or_default();
    let typed: String = raw
        .chars()
        .take(position.character.saturating_sub(start.character) as usize)
        .collect();
    let directory: PathBuf = match typed.rfind('/') {
        Some(slash) => folder.join(typed.get(..=slash).unwrap_or_default()),
        None => folder,
    };

    list_directory(&directory)
        .into_iter()
        .filter(|entry| !folders_only || entry.is_directory)
        .map(|entry| CompletionItem {
            kind: Some(if entry.is_directory {
                CompletionItemKind::FOLDER
            } else {
                CompletionItemKind::FILE
            }),
            ..label(&entry.name)
        })
        .collect()
}
