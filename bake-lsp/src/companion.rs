//! Locating the build-instruction file a `target` block builds from.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bake_parser::dockerfile::Dockerfile;
use bake_parser::hcl::{Block, Expression, File};
use tower_lsp::lsp_types::Url;

use crate::collaborators::TargetEvaluator;
use crate::state::{Document, DocumentManager};

const DEFAULT_CONTEXT: &str = ".";
const DEFAULT_DOCKERFILE: &str = "Dockerfile";

#[derive(Debug, Clone)]
pub struct Companion {
    pub uri: Url,
    pub dockerfile: Arc<Dockerfile>,
}

/// Resolves companions for the targets of one bake document, remembering
/// each target label's result for the lifetime of the request.
pub struct Companions<'a> {
    manager: &'a DocumentManager,
    evaluator: &'a dyn TargetEvaluator,
    document: &'a Document,
    resolved: RefCell<HashMap<String, Option<Companion>>>,
}

impl<'a> Companions<'a> {
    #[must_use]
    pub fn new(
        manager: &'a DocumentManager,
        evaluator: &'a dyn TargetEvaluator,
        document: &'a Document,
    ) -> Self {
        Self {
            manager,
            evaluator,
            document,
            resolved: RefCell::new(HashMap::new()),
        }
    }

    /// The companion of a `target` block, or `None` when it builds from an
    /// inline definition or its file cannot be found.
    #[must_use]
    pub fn resolve(&self, block: &Block) -> Option<Companion> {
        let label = block.name()?;
        if let Some(known) = self.resolved.borrow().get(label) {
            return known.clone();
        }
        let companion = self.load(block);
        self.resolved
            .borrow_mut()
            .insert(label.to_string(), companion.clone());
        companion
    }

    /// The companions of a target and of every target it inherits from,
    /// nearest first.
    #[must_use]
    pub fn with_ancestors(&self, file: &File, block: &Block) -> Vec<Companion> {
        let mut companions = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![block];
        while let Some(target) = pending.pop() {
            let Some(label) = target.name() else {
                continue;
            };
            if !visited.insert(label) {
                continue;
            }
            companions.extend(self.resolve(target));
            let parents = inherited(target)
                .into_iter()
                .rev()
                .filter_map(|name| file.body.find_block("target", name));
            pending.extend(parents);
        }
        companions
    }

    fn load(&self, block: &Block) -> Option<Companion> {
        let path = dockerfile_path(self.document, block, self.evaluator)?;
        let uri = Url::from_file_path(&path).ok()?;
        match self.manager.companion(&uri) {
            Ok(document) => Some(Companion {
                dockerfile: Arc::clone(document.dockerfile()?),
                uri,
            }),
            Err(error) => {
                tracing::debug!(%error, "companion document unavailable");
                None
            }
        }
    }
}

/// Names listed in a target's `inherits` attribute.
#[must_use]
pub fn inherited(block: &Block) -> Vec<&str> {
    let Some(Expression::Tuple(tuple)) = block.body.attribute("inherits").map(|a| &a.expression) else {
        return Vec::new();
    };
    tuple.elements.iter().filter_map(Expression::string_literal).collect()
}

/// Where a `target` block's build-instruction file lives.
///
/// Literal `context` and `dockerfile` attributes are read directly. Anything
/// computed, or inherited, is resolved by `evaluator`; if evaluation is not
/// possible the literal values and defaults are used.
#[must_use]
pub fn dockerfile_path(
    document: &Document,
    block: &Block,
    evaluator: &dyn TargetEvaluator,
) -> Option<PathBuf> {
    if block.body.attribute("dockerfile-inline").is_some() {
        return None;
    }
    let folder = document.folder()?;
    let literal = |name| {
        block
            .body
            .attribute(name)
            .map(|a| a.expression.string_literal())
    };
    let context = literal("context");
    let dockerfile = literal("dockerfile");
    let computed = matches!(context, Some(None))
        || matches!(dockerfile, Some(None))
        || block.body.attribute("inherits").is_some();

    let resolved = block
        .name()
        .filter(|_| computed)
        .and_then(|name| evaluator.evaluate(&folder, &document.text, name));
    if let Some(resolved) = resolved {
        if resolved.dockerfile_inline.is_some() {
            return None;
        }
        return Some(join(
            &folder,
            resolved.context.as_deref().unwrap_or(DEFAULT_CONTEXT),
            resolved.dockerfile.as_deref().unwrap_or(DEFAULT_DOCKERFILE),
        ));
    }
    Some(join(
        &folder,
        context.flatten().unwrap_or(DEFAULT_CONTEXT),
        dockerfile.flatten().unwrap_or(DEFAULT_DOCKERFILE),
    ))
}

/// Joined without `.` segments so the URI matches the editor's copy.
fn join(folder: &Path, context: &str, dockerfile: &str) -> PathBuf {
    folder.join(context).join(dockerfile).components().collect()
}

#[cfg(test)]
#[allow(clippy::indexing_slicing, clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::collaborators::{NoEvaluation, ResolvedTarget};
    use crate::state::LanguageId;
    use pretty_assertions::assert_eq;

    struct Printed(Option<ResolvedTarget>, Mutex<Vec<String>>);

    impl TargetEvaluator for Printed {
        fn evaluate(&self, _folder: &Path, _definition: &str, target: &str) -> Option<ResolvedTarget> {
            self.1.lock().unwrap().push(target.to_string());
            self.0.clone()
        }
    }

    fn bake(text: &str) -> Document {
        Document::new(
            Url::parse("file:///w/docker-bake.hcl").unwrap(),
            LanguageId::Bake,
            1,
            text,
        )
    }

    fn path_of(text: &str, evaluator: &dyn TargetEvaluator) -> Option<PathBuf> {
        let document = bake(text);
        let file = document.bake().unwrap();
        dockerfile_path(&document, &file.body.blocks[0], evaluator)
    }

    #[test]
    fn literal_attributes_give_a_static_path() {
        assert_eq!(
            path_of("target \"a\" {}\n", &NoEvaluation),
            Some(PathBuf::from("/w/Dockerfile"))
        );
        assert_eq!(
            path_of(
                "target \"a\" {\n  context = \"./backend\"\n  dockerfile = \"api.Dockerfile\"\n}\n",
                &NoEvaluation
            ),
            Some(PathBuf::from("/w/backend/api.Dockerfile"))
        );
        assert_eq!(
            path_of("target \"a\" {\n  dockerfile = \"/abs/Dockerfile\"\n}\n", &NoEvaluation),
            Some(PathBuf::from("/abs/Dockerfile"))
        );
    }

    #[test]
    fn inline_definitions_have_no_companion() {
        assert_eq!(
            path_of(
                "target \"a\" {\n  dockerfile-inline = \"FROM scratch\"\n}\n",
                &NoEvaluation
            ),
            None
        );
    }

    #[test]
    fn computed_attributes_are_evaluated() {
        let evaluator = Printed(
            Some(ResolvedTarget {
                context: Some("backend".to_string()),
                dockerfile: None,
                dockerfile_inline: None,
            }),
            Mutex::new(Vec::new()),
        );
        let text = "target \"a\" {\n  context = \"${DIR}\"\n}\n";
        assert_eq!(
            path_of(text, &evaluator),
            Some(PathBuf::from("/w/backend/Dockerfile"))
        );
        assert_eq!(*evaluator.1.lock().unwrap(), vec!["a"]);
    }

    #[test]
    fn evaluation_failure_falls_back_to_literals() {
        let evaluator = Printed(None, Mutex::new(Vec::new()));
        let text = "target \"a\" {\n  inherits = [\"base\"]\n  dockerfile = \"x.Dockerfile\"\n}\n";
        assert_eq!(
            path_of(text, &evaluator),
            Some(PathBuf::from("/w/x.Dockerfile"))
        );
    }

    #[test]
    fn evaluated_inline_definition_has_no_companion() {
        let evaluator = Printed(
            Some(ResolvedTarget {
                dockerfile_inline: Some("FROM scratch".to_string()),
                ..ResolvedTarget::default()
            }),
            Mutex::new(Vec::new()),
        );
        assert_eq!(
            path_of("target \"a\" {\n  inherits = [\"b\"]\n}\n", &evaluator),
            None
        );
    }

    #[test]
    fn ancestors_are_resolved_once_each() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("base")).unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "ARG OWN\n").unwrap();
        std::fs::write(dir.path().join("base/Dockerfile"), "ARG INHERITED\n").unwrap();
        let text = "target \"a\" {\n  inherits = [\"b\", \"a\"]\n}\ntarget \"b\" {\n  context = \"base\"\n  inherits = [\"a\"]\n}\n";
        let uri = Url::from_file_path(dir.path().join("docker-bake.hcl")).unwrap();
        let document = Document::new(uri, LanguageId::Bake, 1, text);
        let manager = DocumentManager::new();
        let companions = Companions::new(&manager, &NoEvaluation, &document);
        let file = document.bake().unwrap();
        let mut found = Vec::new();
        for companion in companions.with_ancestors(file, &file.body.blocks[0]) {
            for arg in companion.dockerfile.declared_args() {
                found.push(arg.name.to_string());
            }
        }
        assert_eq!(found, vec!["OWN", "INHERITED"]);
    }
}
