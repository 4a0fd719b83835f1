//! Go-to-definition: jump from references to the blocks, attributes, build
//! stages and `ARG` declarations they name

use bake_parser::dockerfile::Instruction;
use bake_parser::hcl::{Attribute, Block, Expression, File, Literal, Value};
use tower_lsp::lsp_types::{
    GotoDefinitionResponse, Location, LocationLink, Position, Range, Url,
};

use crate::companion::Companions;
use crate::convert::{inside_location, location_to_range, to_lsp_u32};
use crate::error::Result;
use crate::state::Document;
use crate::walker::{self, Node, TargetPart};

/// A resolved definition and the span of the reference it was found from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Found {
    uri: Url,
    range: Range,
    origin: Range,
}

/// Find the definition of whatever is under `position`.
///
/// # Errors
///
/// `UnexpectedDocument` if `document` is not a bake file.
pub fn find_definition(
    companions: &Companions<'_>,
    document: &Document,
    position: Position,
    link_support: bool,
) -> Result<Option<GotoDefinitionResponse>> {
    let file = document.bake()?;
    let found = locate(companions, document, file, position);
    Ok(found.map(|found| {
        if link_support {
            GotoDefinitionResponse::Link(vec![LocationLink {
                origin_selection_range: Some(found.origin),
                target_uri: found.uri,
                target_range: found.range,
                target_selection_range: found.range,
            }])
        } else {
            GotoDefinitionResponse::Scalar(Location::new(found.uri, found.range))
        }
    }))
}

fn locate(
    companions: &Companions<'_>,
    document: &Document,
    file: &File,
    position: Position,
) -> Option<Found> {
    let local = |range: Range, origin: Range| Found {
        uri: document.uri.clone(),
        range,
        origin,
    };

    for block in &file.body.blocks {
        if let Some(label) = block
            .labels
            .iter()
            .find(|l| inside_location(&l.location, position))
        {
            let range = location_to_range(&label.value_location());
            return Some(local(range, range));
        }
    }

    let line = position.line as usize + 1;
    for block in &file.body.blocks {
        let body = &block.body.location;
        if line < body.start.line || line > body.end.line {
            continue;
        }
        if let Some(attribute) = block
            .body
            .attributes
            .iter()
            .find(|a| inside_location(a.expression.location(), position))
        {
            return resolve(companions, document, file, Some(block), attribute, position);
        }
    }

    for attribute in &file.body.attributes {
        if inside_location(&attribute.name_location, position) {
            let range = location_to_range(&attribute.name_location);
            return Some(local(range, range));
        }
        if inside_location(&attribute.location, position) {
            return resolve(companions, document, file, None, attribute, position);
        }
    }
    None
}

fn resolve(
    companions: &Companions<'_>,
    document: &Document,
    file: &File,
    block: Option<&Block>,
    attribute: &Attribute,
    position: Position,
) -> Option<Found> {
    let local = |range: Range, origin: Range| Found {
        uri: document.uri.clone(),
        range,
        origin,
    };
    let path = walker::walk(&attribute.expression, position);
    let kind = block.map(|b| b.kind.as_str());
    let name = attribute.name.as_str();

    let names_targets = matches!(
        (kind, name),
        (Some("target"), "inherits") | (Some("group"), "targets")
    );
    if names_targets && matches!(path.first(), Some(Node::Expression(Expression::Tuple(_)))) {
        if let Some(Node::Expression(element)) = path.get(1) {
            if let Some(reference) = element.string_literal().filter(|_| element.is_string_literal()) {
                let origin = location_to_range(&element.location().shrink());
                return block_label(file, &["target", "group"], reference)
                    .map(|range| local(range, origin));
            }
        }
    }

    match walker::innermost(&path) {
        Some(Node::Expression(Expression::Literal(Literal {
            value: Value::String(stage),
            location,
        }))) if kind == Some("target") && matches!(name, "target" | "no-cache-filter") => {
            let companion = companions.resolve(block?)?;
            let stage = companion
                .dockerfile
                .stages()
                .into_iter()
                .find(|s| s.name == stage)?;
            Some(Found {
                range: instruction_range(stage.instruction),
                origin: location_to_range(location),
                uri: companion.uri,
            })
        }
        Some(Node::ObjectKey(item)) if kind == Some("target") && name == "args" => {
            let key = item.key_name()?;
            let key_location = if item.key_quoted() {
                item.key.location().shrink()
            } else {
                item.key.location().clone()
            };
            companions
                .with_ancestors(file, block?)
                .into_iter()
                .find_map(|companion| {
                    let declaration = companion
                        .dockerfile
                        .declared_args()
                        .into_iter()
                        .find(|arg| arg.name == key)?;
                    Some(Found {
                        range: instruction_range(declaration.instruction),
                        origin: location_to_range(&key_location),
                        uri: companion.uri.clone(),
                    })
                })
        }
        Some(Node::TargetReference(TargetPart::Name { name, range })) => {
            block_label(file, &["target"], name).map(|target| local(target, range))
        }
        Some(Node::TargetReference(TargetPart::Attribute {
            target,
            name,
            range,
        })) => {
            let attribute = file.body.find_block("target", target)?.body.attribute(name)?;
            Some(local(location_to_range(&attribute.name_location), range))
        }
        Some(Node::Expression(Expression::ScopeTraversal(traversal))) => {
            let name = traversal.location.text(&document.text)?;
            variable(file, name).map(|range| local(range, location_to_range(&traversal.location)))
        }
        Some(Node::FunctionName(call)) => block_label(file, &["function"], &call.name)
            .or_else(|| variable(file, &call.name))
            .map(|range| local(range, location_to_range(&call.name_location))),
        Some(
            Node::Expression(_) | Node::ObjectKey(_) | Node::TargetReference(TargetPart::Keyword),
        )
        | None => None,
    }
}

/// The label span of the first block of one of `kinds` named `name`.
fn block_label(file: &File, kinds: &[&str], name: &str) -> Option<Range> {
    kinds
        .iter()
        .find_map(|kind| file.body.find_block(kind, name))
        .and_then(|block| block.labels.first())
        .map(|label| location_to_range(&label.value_location()))
}

/// A `variable` block or a top-level attribute named `name`.
fn variable(file: &File, name: &str) -> Option<Range> {
    block_label(file, &["variable"], name).or_else(|| {
        file.body
            .attribute(name)
            .map(|a| location_to_range(&a.name_location))
    })
}

fn instruction_range(instruction: &Instruction) -> Range {
    Range::new(
        Position::new(to_lsp_u32(instruction.start_line.saturating_sub(1)), 0),
        Position::new(
            to_lsp_u32(instruction.end_line.saturating_sub(1)),
            to_lsp_u32(instruction.end_column),
        ),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collaborators::NoEvaluation;
    use crate::error::Error;
    use crate::state::{DocumentManager, LanguageId};
    use pretty_assertions::assert_eq;

    struct Workspace {
        dir: tempfile::TempDir,
        manager: DocumentManager,
    }

    impl Workspace {
        fn new(files: &[(&str, &str)]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            for (name, text) in files {
                let path = dir.path().join(name);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, text).unwrap();
            }
            Self {
                dir,
                manager: DocumentManager::new(),
            }
        }

        fn uri(&self, name: &str) -> Url {
            Url::from_file_path(self.dir.path().join(name)).unwrap()
        }

        fn define(&self, text: &str, line: u32, character: u32, links: bool) -> Option<GotoDefinitionResponse> {
            let document = Document::new(self.uri("docker-bake.hcl"), LanguageId::Bake, 1, text);
            let companions = Companions::new(&self.manager, &NoEvaluation, &document);
            find_definition(&companions, &document, Position::new(line, character), links).unwrap()
        }
    }

    fn range(start: (u32, u32), end: (u32, u32)) -> Range {
        Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1))
    }

    fn link(uri: Url, target: Range, origin: Range) -> Option<GotoDefinitionResponse> {
        Some(GotoDefinitionResponse::Link(vec![LocationLink {
            origin_selection_range: Some(origin),
            target_uri: uri,
            target_range: target,
            target_selection_range: target,
        }]))
    }

    #[test]
    fn target_label_defines_itself() {
        let ws = Workspace::new(&[]);
        let label = range((0, 8), (0, 11));
        assert_eq!(
            ws.define("target \"api\" {}\n", 0, 9, true),
            link(ws.uri("docker-bake.hcl"), label, label)
        );
        let unquoted = range((0, 7), (0, 10));
        assert_eq!(
            ws.define("target api {}\n", 0, 10, true),
            link(ws.uri("docker-bake.hcl"), unquoted, unquoted)
        );
    }

    #[test]
    fn inherits_element_jumps_to_target() {
        let ws = Workspace::new(&[]);
        let text = "target \"base\" {}\ntarget \"api\" {\n  inherits = [\"base\"]\n}\n";
        assert_eq!(
            ws.define(text, 2, 16, true),
            link(ws.uri("docker-bake.hcl"), range((0, 8), (0, 12)), range((2, 15), (2, 19)))
        );
    }

    #[test]
    fn group_targets_element_jumps_to_target() {
        let ws = Workspace::new(&[]);
        let text = "group \"default\" {\n  targets = [\"api\"]\n}\ntarget \"api\" {}\n";
        assert_eq!(
            ws.define(text, 1, 15, false),
            Some(GotoDefinitionResponse::Scalar(Location::new(
                ws.uri("docker-bake.hcl"),
                range((3, 8), (3, 11))
            )))
        );
    }

    #[test]
    fn target_traversal_segments() {
        let ws = Workspace::new(&[]);
        let text = "target \"api\" {\n  tags = [\"a\"]\n}\ntarget \"web\" {\n  tags = target.api.tags\n}\n";
        assert_eq!(
            ws.define(text, 4, 17, true),
            link(ws.uri("docker-bake.hcl"), range((0, 8), (0, 11)), range((4, 16), (4, 19)))
        );
        assert_eq!(
            ws.define(text, 4, 21, true),
            link(ws.uri("docker-bake.hcl"), range((1, 2), (1, 6)), range((4, 20), (4, 24)))
        );
        assert_eq!(ws.define(text, 4, 10, true), None);
    }

    #[test]
    fn interpolated_variable_jumps_to_variable_block() {
        let ws = Workspace::new(&[]);
        let text = "variable \"TAG\" {\n  default = \"latest\"\n}\ntarget \"api\" {\n  tags = [\"api:${TAG}\"]\n}\n";
        assert_eq!(
            ws.define(text, 4, 18, true),
            link(ws.uri("docker-bake.hcl"), range((0, 10), (0, 13)), range((4, 17), (4, 20)))
        );
    }

    #[test]
    fn top_level_attributes() {
        let ws = Workspace::new(&[]);
        let text = "REGISTRY = \"docker.io\"\ntarget \"api\" {\n  tags = [\"${REGISTRY}/api\"]\n}\n";
        let name = range((0, 0), (0, 8));
        assert_eq!(
            ws.define(text, 0, 3, true),
            link(ws.uri("docker-bake.hcl"), name, name)
        );
        assert_eq!(
            ws.define(text, 2, 15, true),
            link(ws.uri("docker-bake.hcl"), name, range((2, 13), (2, 21)))
        );
    }

    #[test]
    fn function_call_jumps_to_function_block() {
        let ws = Workspace::new(&[]);
        let text = "function \"tag\" {\n  params = [name]\n  result = name\n}\ntarget \"api\" {\n  tags = [tag(\"api\")]\n}\n";
        assert_eq!(
            ws.define(text, 5, 11, true),
            link(ws.uri("docker-bake.hcl"), range((0, 10), (0, 13)), range((5, 10), (5, 13)))
        );
    }

    #[test]
    fn target_attribute_jumps_to_build_stage() {
        let ws = Workspace::new(&[(
            "backend/Dockerfile",
            "FROM busybox AS base\nFROM base AS \\\n  tests\n",
        )]);
        let text = "target \"api\" {\n  context = \"backend\"\n  target = \"tests\"\n}\n";
        assert_eq!(
            ws.define(text, 2, 13, true),
            link(ws.uri("backend/Dockerfile"), range((1, 0), (2, 7)), range((2, 12), (2, 17)))
        );
        assert_eq!(ws.define("target \"api\" {\n  target = \"missing\"\n}\n", 1, 13, true), None);
    }

    #[test]
    fn no_cache_filter_jumps_to_build_stage() {
        let ws = Workspace::new(&[("Dockerfile", "FROM busybox AS base\n")]);
        let text = "target \"api\" {\n  no-cache-filter = [\"base\"]\n}\n";
        assert_eq!(
            ws.define(text, 1, 23, true),
            link(ws.uri("Dockerfile"), range((0, 0), (0, 20)), range((1, 22), (1, 26)))
        );
    }

    #[test]
    fn args_key_jumps_to_arg_declaration() {
        let ws = Workspace::new(&[("Dockerfile", "FROM scratch\nARG VERSION=1\n")]);
        let text = "target \"api\" {\n  args = {\n    \"VERSION\" = \"2\"\n    VERSION = \"3\"\n  }\n}\n";
        assert_eq!(
            ws.define(text, 2, 7, true),
            link(ws.uri("Dockerfile"), range((1, 0), (1, 13)), range((2, 5), (2, 12)))
        );
        assert_eq!(
            ws.define(text, 3, 6, true),
            link(ws.uri("Dockerfile"), range((1, 0), (1, 13)), range((3, 4), (3, 11)))
        );
    }

    #[test]
    fn args_key_found_in_inherited_target_companion() {
        let ws = Workspace::new(&[
            ("Dockerfile", "FROM scratch\n"),
            ("base/Dockerfile", "ARG SHARED\nFROM scratch\n"),
        ]);
        let text = "target \"base\" {\n  context = \"base\"\n}\ntarget \"api\" {\n  inherits = [\"base\"]\n  args = {\n    SHARED = \"1\"\n  }\n}\n";
        assert_eq!(
            ws.define(text, 6, 6, true),
            link(ws.uri("base/Dockerfile"), range((0, 0), (0, 10)), range((6, 4), (6, 10)))
        );
    }

    #[test]
    fn whitespace_has_no_definition() {
        let ws = Workspace::new(&[]);
        assert_eq!(ws.define("target \"api\" {\n\n}\n", 1, 0, true), None);
        assert_eq!(ws.define("", 0, 0, true), None);
    }

    #[test]
    fn non_bake_document_is_an_error() {
        let manager = DocumentManager::new();
        let document = Document::new(
            Url::parse("file:///w/Dockerfile").unwrap(),
            LanguageId::Dockerfile,
            1,
            "FROM scratch\n",
        );
        let companions = Companions::new(&manager, &NoEvaluation, &document);
        assert!(matches!(
            find_definition(&companions, &document, Position::new(0, 0), true),
            Err(Error::UnexpectedDocument { .. })
        ));
    }
}
