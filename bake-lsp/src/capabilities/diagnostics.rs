//! Diagnostics: syntax and structure errors, plus checks of target
//! attributes against fixed value sets and the target's build file
//!
//! Every check runs on its own. A check whose inputs are unavailable, such
//! as a build file that cannot be found, is skipped without affecting the
//! others.

use bake_parser::hcl::{Attribute, Block, Expression, File};
use bake_parser::{ParseError, decode};
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{
    CodeDescription, Diagnostic, DiagnosticSeverity, DiagnosticTag, Position, Range, Url,
};

use crate::capabilities::completion::{BUILTIN_ARGS, ENTITLEMENTS, NETWORK_MODES};
use crate::collaborators::ImageAnalyzer;
use crate::companion::Companions;
use crate::convert::{location_to_range, source_line_range, to_lsp_u32};
use crate::error::Result;
use crate::state::Document;

pub(crate) const SOURCE: &str = "bake-lsp";

/// A fix carried in a diagnostic's `data`: replace `range` with `edit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEdit {
    pub title: String,
    pub edit: String,
    pub range: Range,
}

/// Collect every diagnostic for a bake document.
///
/// # Errors
///
/// `UnexpectedDocument` if `document` is not a bake file.
pub fn collect_diagnostics(
    companions: &Companions<'_>,
    analyzer: &dyn ImageAnalyzer,
    document: &Document,
) -> Result<Vec<Diagnostic>> {
    let file = document.bake()?;
    let mut diagnostics: Vec<Diagnostic> = file
        .errors
        .iter()
        .map(|error| error_to_diagnostic(&document.text, error))
        .collect();
    if file.errors.is_empty() {
        diagnostics.extend(
            decode::validate(file)
                .iter()
                .map(|error| error_to_diagnostic(&document.text, error)),
        );
    }

    for block in file.body.blocks_of("target") {
        inline_dockerfile(block, &mut diagnostics);
        image_tags(analyzer, block, &mut diagnostics);
        fixed_values(block, &mut diagnostics);
        build_stage(companions, block, &mut diagnostics);
        build_args(companions, file, block, &mut diagnostics);
    }
    Ok(diagnostics)
}

/// Convert a parse or validation error. Errors without a subject cover
/// their whole source line.
#[must_use]
pub fn error_to_diagnostic(text: &str, error: &ParseError) -> Diagnostic {
    let range = error.subject.as_ref().map_or_else(
        || source_line_range(text, error.line),
        location_to_range,
    );
    diagnostic(range, DiagnosticSeverity::ERROR, error.to_string())
}

fn diagnostic(range: Range, severity: DiagnosticSeverity, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(severity),
        source: Some(SOURCE.to_string()),
        message,
        ..Default::default()
    }
}

/// String-literal values of an attribute: the value itself or the elements
/// of a list, with the range of each quoted string.
fn literals(attribute: &Attribute) -> Vec<(&str, Range)> {
    let values: Vec<&Expression> = match &attribute.expression {
        Expression::Tuple(tuple) => tuple.elements.iter().collect(),
        other => vec![other],
    };
    values
        .into_iter()
        .filter(|e| e.is_string_literal())
        .filter_map(|e| Some((e.string_literal()?, location_to_range(e.location()))))
        .collect()
}

fn inline_dockerfile(block: &Block, diagnostics: &mut Vec<Diagnostic>) {
    let (Some(_), Some(dockerfile)) = (
        block.body.attribute("dockerfile-inline"),
        block.body.attribute("dockerfile"),
    ) else {
        return;
    };
    let line = to_lsp_u32(dockerfile.location.start.line.saturating_sub(1));
    let fix = NamedEdit {
        title: "Remove unnecessary dockerfile attribute".to_string(),
        edit: String::new(),
        range: Range::new(Position::new(line, 0), Position::new(line + 1, 0)),
    };
    diagnostics.push(Diagnostic {
        tags: Some(vec![DiagnosticTag::UNNECESSARY]),
        data: serde_json::to_value(vec![fix]).ok(),
        ..diagnostic(
            location_to_range(&dockerfile.location),
            DiagnosticSeverity::WARNING,
            "dockerfile attribute is ignored if dockerfile-inline is defined".to_string(),
        )
    });
}

fn image_tags(analyzer: &dyn ImageAnalyzer, block: &Block, diagnostics: &mut Vec<Diagnostic>) {
    let Some(tags) = block.body.attribute("tags") else {
        return;
    };
    for (image, range) in literals(tags) {
        let findings = analyzer.analyze(image);
        let Some(finding) = findings.iter().find(|f| f.is_vulnerability()) else {
            continue;
        };
        diagnostics.push(Diagnostic {
            code_description: finding
                .link
                .as_deref()
                .and_then(|link| Url::parse(link).ok())
                .map(|href| CodeDescription { href }),
            ..diagnostic(range, DiagnosticSeverity::WARNING, finding.message.clone())
        });
    }
}

fn fixed_values(block: &Block, diagnostics: &mut Vec<Diagnostic>) {
    if let Some(entitlements) = block.body.attribute("entitlements") {
        for (value, range) in literals(entitlements) {
            if !ENTITLEMENTS.contains(&value) {
                diagnostics.push(diagnostic(
                    range,
                    DiagnosticSeverity::ERROR,
                    "entitlements attribute must be either: network.host or security.insecure"
                        .to_string(),
                ));
            }
        }
    }
    let Some(network) = block.body.attribute("network") else {
        return;
    };
    if let [(value, range)] = literals(network).as_slice() {
        if !NETWORK_MODES.contains(value) && !matches!(network.expression, Expression::Tuple(_)) {
            diagnostics.push(diagnostic(
                *range,
                DiagnosticSeverity::ERROR,
                "network attribute must be either: default, host, or none".to_string(),
            ));
        }
    }
}

fn build_stage(companions: &Companions<'_>, block: &Block, diagnostics: &mut Vec<Diagnostic>) {
    let Some(target) = block.body.attribute("target") else {
        return;
    };
    let Some(stage) = target
        .expression
        .string_literal()
        .filter(|_| target.expression.is_string_literal())
    else {
        return;
    };
    let Some(companion) = companions.resolve(block) else {
        return;
    };
    if companion.dockerfile.stages().iter().all(|s| s.name != stage) {
        diagnostics.push(diagnostic(
            location_to_range(target.expression.location()),
            DiagnosticSeverity::ERROR,
            "target could not be found in your Dockerfile".to_string(),
        ));
    }
}

fn build_args(
    companions: &Companions<'_>,
    file: &File,
    block: &Block,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(Expression::Object(args)) = block.body.attribute("args").map(|a| &a.expression) else {
        return;
    };
    let found = companions.with_ancestors(file, block);
    if found.is_empty() {
        return;
    }
    for item in &args.items {
        let Some(name) = item.key_name() else {
            continue;
        };
        if BUILTIN_ARGS.contains(&name) {
            continue;
        }
        let declared = found.iter().any(|companion| {
            companion
                .dockerfile
                .declared_args()
                .iter()
                .any(|arg| arg.name == name)
        });
        if declared {
            continue;
        }
        diagnostics.push(diagnostic(
            location_to_range(item.key.location()),
            DiagnosticSeverity::ERROR,
            format!("'{name}' not defined as an ARG in your Dockerfile"),
        ));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::collaborators::{Finding, NoAnalysis, NoEvaluation};
    use crate::state::{DocumentManager, LanguageId};
    use pretty_assertions::assert_eq;

    struct Vulnerable;

    impl ImageAnalyzer for Vulnerable {
        fn analyze(&self, image: &str) -> Vec<Finding> {
            if image != "alpine:3.1" {
                return Vec::new();
            }
            vec![
                Finding {
                    kind: "recommended_tag".to_string(),
                    message: "Tag recommendations available".to_string(),
                    link: None,
                },
                Finding {
                    kind: "critical_high_vulnerabilities".to_string(),
                    message: "Image contains 3 critical and 5 high vulnerabilities".to_string(),
                    link: Some("https://hub.docker.com/_/alpine".to_string()),
                },
            ]
        }
    }

    fn range(start: (u32, u32), end: (u32, u32)) -> Range {
        Range::new(Position::new(start.0, start.1), Position::new(end.0, end.1))
    }

    fn collect_in(files: &[(&str, &str)], text: &str, analyzer: &dyn ImageAnalyzer) -> Vec<Diagnostic> {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let uri = Url::from_file_path(dir.path().join("docker-bake.hcl")).unwrap();
        let document = Document::new(uri, LanguageId::Bake, 1, text);
        let manager = DocumentManager::new();
        let companions = Companions::new(&manager, &NoEvaluation, &document);
        collect_diagnostics(&companions, analyzer, &document).unwrap()
    }

    fn collect(files: &[(&str, &str)], text: &str) -> Vec<Diagnostic> {
        collect_in(files, text, &NoAnalysis)
    }

    fn messages(diagnostics: &[Diagnostic]) -> Vec<(&str, Range)> {
        diagnostics
            .iter()
            .map(|d| (d.message.as_str(), d.range))
            .collect()
    }

    #[test]
    fn syntax_errors_are_reported() {
        let diagnostics = collect(&[], "target \"a\" {\n");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::ERROR));
        assert!(diagnostics[0].message.starts_with("Unclosed configuration block ("));
        assert_eq!(diagnostics[0].range, range((0, 11), (0, 12)));
    }

    #[test]
    fn errors_without_subject_cover_the_line() {
        let text = "target \"a\" {\n  tags = [\n}\n";
        let error = ParseError::on_line("Invalid expression", "Expected a value.", 2);
        let diagnostic = error_to_diagnostic(text, &error);
        assert_eq!(diagnostic.range, range((1, 0), (1, 10)));
        assert_eq!(diagnostic.message, "Invalid expression (Expected a value.)");
    }

    #[test]
    fn structural_errors_are_reported() {
        let diagnostics = collect(&[], "target \"a\" {\n  tag = []\n}\n");
        assert_eq!(
            messages(&diagnostics),
            vec![(
                "Unsupported argument (An argument named \"tag\" is not expected here.)",
                range((1, 2), (1, 5))
            )]
        );
    }

    #[test]
    fn inline_dockerfile_shadows_dockerfile() {
        let text = "target \"a\" {\n  dockerfile-inline = \"FROM scratch\"\n  dockerfile = \"Dockerfile\"\n  context = \".\"\n}\n";
        let diagnostics = collect(&[], text);
        assert_eq!(diagnostics.len(), 1);
        let warning = &diagnostics[0];
        assert_eq!(warning.severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(warning.tags, Some(vec![DiagnosticTag::UNNECESSARY]));
        assert_eq!(warning.range, range((2, 2), (2, 27)));

        let fixes: Vec<NamedEdit> = serde_json::from_value(warning.data.clone().unwrap()).unwrap();
        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].range, range((2, 0), (3, 0)));
        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        let fixed: String = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 2)
            .map(|(_, l)| *l)
            .collect();
        assert_eq!(fixed, "target \"a\" {\n  dockerfile-inline = \"FROM scratch\"\n  context = \".\"\n}\n");
    }

    #[test]
    fn vulnerable_tags_are_warned() {
        let text = "target \"a\" {\n  tags = [\"alpine:3.1\", \"alpine:3.20\"]\n}\n";
        let diagnostics = collect_in(&[], text, &Vulnerable);
        assert_eq!(
            messages(&diagnostics),
            vec![(
                "Image contains 3 critical and 5 high vulnerabilities",
                range((1, 10), (1, 22))
            )]
        );
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::WARNING));
        assert_eq!(
            diagnostics[0].code_description.as_ref().map(|c| c.href.as_str()),
            Some("https://hub.docker.com/_/alpine")
        );
    }

    #[test]
    fn fixed_value_sets() {
        let text = "target \"a\" {\n  network = \"bridge\"\n  entitlements = [\"network.host\", \"root\"]\n}\ntarget \"b\" {\n  network = \"host\"\n}\n";
        assert_eq!(
            messages(&collect(&[], text)),
            vec![
                (
                    "entitlements attribute must be either: network.host or security.insecure",
                    range((2, 34), (2, 40))
                ),
                (
                    "network attribute must be either: default, host, or none",
                    range((1, 12), (1, 20))
                ),
            ]
        );
    }

    #[test]
    fn missing_build_stage() {
        let files = [("Dockerfile", "FROM busybox AS base\n")];
        let missing = collect(&files, "target \"a\" {\n  target = \"tests\"\n}\n");
        assert_eq!(
            messages(&missing),
            vec![("target could not be found in your Dockerfile", range((1, 11), (1, 18)))]
        );
        assert!(collect(&files, "target \"a\" {\n  target = \"base\"\n}\n").is_empty());
    }

    #[test]
    fn missing_build_file_skips_dependent_checks() {
        let text = "target \"a\" {\n  target = \"tests\"\n  args = {\n    NOPE = \"1\"\n  }\n}\n";
        assert!(collect(&[], text).is_empty());
    }

    #[test]
    fn undeclared_build_args() {
        let files = [("Dockerfile", "ARG VERSION\nFROM scratch\n")];
        let text = "target \"a\" {\n  args = {\n    VERSION = \"1\"\n    \"NOPE\" = \"2\"\n    HTTP_PROXY = \"x\"\n  }\n}\n";
        assert_eq!(
            messages(&collect(&files, text)),
            vec![("'NOPE' not defined as an ARG in your Dockerfile", range((3, 4), (3, 10)))]
        );
    }

    #[test]
    fn builtin_args_never_need_declaring() {
        let text = "target \"a\" {\n  args = {\n    HTTP_PROXY = \"x\"\n    SOURCE_DATE_EPOCH = \"0\"\n  }\n}\n";
        assert!(collect(&[("Dockerfile", "FROM scratch\n")], text).is_empty());
        assert!(collect(&[("Dockerfile", "ARG OTHER\n")], text).is_empty());
    }

    #[test]
    fn args_declared_by_inherited_target() {
        let files = [
            ("Dockerfile", "FROM scratch\n"),
            ("base/Dockerfile", "ARG SHARED\n"),
        ];
        let text = "target \"base\" {\n  context = \"base\"\n}\ntarget \"a\" {\n  inherits = [\"base\"]\n  args = {\n    SHARED = \"1\"\n  }\n}\n";
        assert!(collect(&files, text).is_empty());
    }
}
