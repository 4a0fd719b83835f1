//! A single cached document and its parsed tree

use std::path::PathBuf;
use std::sync::Arc;

use bake_parser::{dockerfile::Dockerfile, hcl};
use tower_lsp::lsp_types::Url;

use crate::error::{Error, Result};

/// The kinds of document the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageId {
    Bake,
    Dockerfile,
    Compose,
}

impl LanguageId {
    /// Infer the language from the file name: `.hcl` is a bake file, `.yml`
    /// and `.yaml` are compose files and anything else is a Dockerfile.
    #[must_use]
    pub fn from_uri(uri: &Url) -> Self {
        let path = uri.path();
        let extension = path
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, extension)| extension);
        match extension {
            Some("hcl") => Self::Bake,
            Some("yml" | "yaml") => Self::Compose,
            Some(_) | None => Self::Dockerfile,
        }
    }

    /// The language for a client-provided language identifier, falling back
    /// to the file name when the identifier is unknown.
    #[must_use]
    pub fn from_client(language_id: &str, uri: &Url) -> Self {
        match language_id {
            "dockerbake" | "hcl" => Self::Bake,
            "dockerfile" => Self::Dockerfile,
            "dockercompose" | "yaml" => Self::Compose,
            _ => Self::from_uri(uri),
        }
    }
}

impl std::fmt::Display for LanguageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Bake => "bake",
            Self::Dockerfile => "dockerfile",
            Self::Compose => "compose",
        })
    }
}

/// Parsed trees are immutable once built and shared between snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Bake(Arc<hcl::File>),
    Dockerfile(Arc<Dockerfile>),
    /// Service definitions are only checked for YAML syntax.
    Compose(Arc<std::result::Result<serde_yaml::Value, String>>),
}

impl Parsed {
    fn parse(language: LanguageId, text: &str) -> Self {
        match language {
            LanguageId::Bake => Self::Bake(Arc::new(hcl::parse(text))),
            LanguageId::Dockerfile => Self::Dockerfile(Arc::new(bake_parser::dockerfile::parse(text))),
            LanguageId::Compose => Self::Compose(Arc::new(
                serde_yaml::from_str(text).map_err(|e| e.to_string()),
            )),
        }
    }
}

/// A snapshot of a document. Cloning is cheap and the clone is unaffected
/// by later writes to the cache.
#[derive(Debug, Clone)]
pub struct Document {
    pub uri: Url,
    /// Version from the editor; documents read from disk start at 1.
    pub version: i32,
    pub text: Arc<str>,
    pub language: LanguageId,
    pub parsed: Parsed,
}

impl Document {
    #[must_use]
    pub fn new(uri: Url, language: LanguageId, version: i32, text: &str) -> Self {
        tracing::trace!(%uri, %language, version, "parsing document");
        Self {
            parsed: Parsed::parse(language, text),
            uri,
            version,
            text: Arc::from(text),
            language,
        }
    }

    /// The bake tree of this document.
    ///
    /// # Errors
    ///
    /// `UnexpectedDocument` when the document is not a bake file.
    pub fn bake(&self) -> Result<&Arc<hcl::File>> {
        match &self.parsed {
            Parsed::Bake(file) => Ok(file),
            Parsed::Dockerfile(_) | Parsed::Compose(_) => Err(Error::UnexpectedDocument {
                uri: self.uri.clone(),
                expected: LanguageId::Bake,
            }),
        }
    }

    #[must_use]
    pub fn dockerfile(&self) -> Option<&Arc<Dockerfile>> {
        match &self.parsed {
            Parsed::Dockerfile(dockerfile) => Some(dockerfile),
            Parsed::Bake(_) | Parsed::Compose(_) => None,
        }
    }

    /// The directory holding this document, when it is a local file.
    #[must_use]
    pub fn folder(&self) -> Option<PathBuf> {
        let path = self.uri.to_file_path().ok()?;
        path.parent().map(std::path::Path::to_path_buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[rstest]
    #[case("file:///w/docker-bake.hcl", LanguageId::Bake)]
    #[case("file:///w/compose.yaml", LanguageId::Compose)]
    #[case("file:///w/compose.yml", LanguageId::Compose)]
    #[case("file:///w/Dockerfile", LanguageId::Dockerfile)]
    #[case("file:///w/build.Dockerfile", LanguageId::Dockerfile)]
    #[case("file:///w.hcl/Dockerfile", LanguageId::Dockerfile)]
    fn language_from_uri(#[case] input: &str, #[case] expected: LanguageId) {
        assert_eq!(LanguageId::from_uri(&uri(input)), expected);
    }

    #[test]
    fn unknown_client_language_uses_the_file_name() {
        let u = uri("file:///w/docker-bake.hcl");
        assert_eq!(LanguageId::from_client("plaintext", &u), LanguageId::Bake);
        assert_eq!(LanguageId::from_client("dockerfile", &u), LanguageId::Dockerfile);
    }

    #[test]
    fn bake_accessor_rejects_other_documents() {
        let document = Document::new(uri("file:///w/Dockerfile"), LanguageId::Dockerfile, 1, "FROM scratch\n");
        assert!(document.dockerfile().is_some());
        assert!(matches!(
            document.bake(),
            Err(Error::UnexpectedDocument {
                expected: LanguageId::Bake,
                ..
            })
        ));
    }

    #[test]
    fn compose_syntax_errors_are_kept() {
        let document = Document::new(uri("file:///w/compose.yaml"), LanguageId::Compose, 1, "services: [\n");
        assert!(matches!(&document.parsed, Parsed::Compose(result) if result.is_err()));
    }

    #[test]
    fn folder_is_the_parent_directory() {
        let document = Document::new(uri("file:///w/sub/docker-bake.hcl"), LanguageId::Bake, 1, "");
        assert_eq!(document.folder(), Some(PathBuf::from("/w/sub")));
    }
}
