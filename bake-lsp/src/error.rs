//! Errors surfaced by the document cache and the bake engine.
//!
//! Parse problems are never errors here: they are kept on the parsed tree and
//! reported as diagnostics. Resolution misses are `None` or empty lists.

use tower_lsp::lsp_types::Url;

use crate::state::LanguageId;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("document not found: {0}")]
    NotFound(Url),

    #[error("not a file: {0}")]
    NotAFile(Url),

    #[error("failed to read {uri}")]
    Io {
        uri: Url,
        #[source]
        source: std::io::Error,
    },

    #[error("stale write to {uri}: cached version {cached}, received {received}")]
    StaleVersion { uri: Url, cached: i32, received: i32 },

    #[error("{uri} is not a {expected} document")]
    UnexpectedDocument { uri: Url, expected: LanguageId },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read a `file://` URI from disk.
///
/// # Errors
///
/// `NotFound` when the URI has no file path or nothing exists there,
/// `NotAFile` for directories and `Io` for any other read failure.
pub fn read_uri(uri: &Url) -> Result<String> {
    let path = uri
        .to_file_path()
        .map_err(|()| Error::NotFound(uri.clone()))?;
    if path.is_dir() {
        return Err(Error::NotAFile(uri.clone()));
    }
    std::fs::read_to_string(&path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(uri.clone())
        } else {
            Error::Io {
                uri: uri.clone(),
                source,
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn non_file_uri_is_not_found() {
        let uri = Url::parse("untitled:Untitled-1").unwrap();
        assert!(matches!(read_uri(&uri), Err(Error::NotFound(_))));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Url::from_directory_path(dir.path()).unwrap();
        assert!(matches!(read_uri(&uri), Err(Error::NotAFile(_))));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Url::from_file_path(dir.path().join("docker-bake.hcl")).unwrap();
        assert!(matches!(read_uri(&uri), Err(Error::NotFound(_))));
    }

    #[test]
    fn reads_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile");
        std::fs::write(&path, "FROM scratch\n").unwrap();
        let uri = Url::from_file_path(&path).unwrap();
        assert_eq!(read_uri(&uri).unwrap(), "FROM scratch\n");
    }
}
