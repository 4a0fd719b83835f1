//! The document cache shared by every request handler

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tower_lsp::lsp_types::Url;

use crate::error::{self, Error, Result};
use crate::state::{Document, LanguageId};

const DEFAULT_DEBOUNCE_MS: u64 = 50;

type Reader = dyn Fn(&Url) -> Result<String> + Send + Sync;

/// Per-document debounce state. Queued work only runs if no newer work was
/// queued and the document is still open when its delay elapses.
#[derive(Debug, Default)]
struct QueueRecord {
    generation: AtomicU64,
    lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl QueueRecord {
    fn cancel(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

struct Entry {
    document: Document,
    queue: Arc<QueueRecord>,
}

impl Entry {
    fn new(document: Document) -> Self {
        Self {
            document,
            queue: Arc::default(),
        }
    }
}

/// Cached documents keyed by URI.
///
/// Every read hands out a `Document` snapshot; later writes never affect a
/// snapshot already handed out. Map mutations hold a shard lock only while
/// swapping entries, never while parsing.
pub struct DocumentManager {
    documents: DashMap<Url, Entry>,
    reader: Arc<Reader>,
    debounce_ms: AtomicU64,
}

impl DocumentManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_reader(error::read_uri)
    }

    /// A manager reading uncached documents through `reader` instead of
    /// the filesystem.
    #[must_use]
    pub fn with_reader(reader: impl Fn(&Url) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            documents: DashMap::new(),
            reader: Arc::new(reader),
            debounce_ms: AtomicU64::new(DEFAULT_DEBOUNCE_MS),
        }
    }

    pub fn set_debounce(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.debounce_ms.store(millis, Ordering::Relaxed);
    }

    /// The cached document, without reading or parsing anything.
    #[must_use]
    pub fn get(&self, uri: &Url) -> Option<Document> {
        self.documents.get(uri).map(|entry| entry.document.clone())
    }

    /// The cached document, or the document read from disk and cached at
    /// version 1.
    ///
    /// # Errors
    ///
    /// Fails when the document is not cached and cannot be read.
    pub fn read(&self, uri: &Url) -> Result<Document> {
        if let Some(document) = self.get(uri) {
            return Ok(document);
        }
        let text = (self.reader)(uri)?;
        let document = Document::new(uri.clone(), LanguageId::from_uri(uri), 1, &text);
        let entry = self
            .documents
            .entry(uri.clone())
            .or_insert_with(|| Entry::new(document));
        Ok(entry.document.clone())
    }

    /// A build-instruction document for lookups from a bake file: the cached
    /// copy when the editor has it open, otherwise parsed from disk without
    /// caching it.
    ///
    /// # Errors
    ///
    /// Fails when the document is not cached and cannot be read.
    pub fn companion(&self, uri: &Url) -> Result<Document> {
        if let Some(document) = self.get(uri) {
            return Ok(document);
        }
        let text = (self.reader)(uri)?;
        Ok(Document::new(uri.clone(), LanguageId::Dockerfile, 1, &text))
    }

    /// Store a new version of a document, returning whether its parsed tree
    /// differs from the cached one.
    ///
    /// # Errors
    ///
    /// `StaleVersion` when `version` is older than the cached version.
    pub fn write(&self, uri: &Url, language: LanguageId, version: i32, text: &str) -> Result<bool> {
        let document = Document::new(uri.clone(), language, version, text);
        match self.documents.entry(uri.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let cached = occupied.get().document.version;
                if version < cached {
                    return Err(Error::StaleVersion {
                        uri: uri.clone(),
                        cached,
                        received: version,
                    });
                }
                let entry = occupied.get_mut();
                let changed = entry.document.parsed != document.parsed;
                entry.document = document;
                tracing::debug!(%uri, version, changed, "document updated");
                Ok(changed)
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(document));
                tracing::debug!(%uri, version, "document cached");
                Ok(true)
            }
        }
    }

    /// Replace a document's text, inferring its language from the URI and
    /// bumping its version.
    ///
    /// # Errors
    ///
    /// See [`DocumentManager::write`].
    pub fn overwrite(&self, uri: &Url, text: &str) -> Result<bool> {
        let version = self.get(uri).map_or(1, |d| d.version.saturating_add(1));
        self.write(uri, LanguageId::from_uri(uri), version, text)
    }

    /// Drop a document, cancelling any work still queued for it.
    pub fn remove(&self, uri: &Url) {
        if let Some(entry) = self.documents.get(uri) {
            entry.queue.cancel();
        }
        if self.documents.remove(uri).is_some() {
            tracing::debug!(%uri, "document removed");
        }
    }

    /// Run `work` once the document has been quiet for the debounce delay.
    /// Work queued earlier for the same document and not yet started is
    /// dropped. Returns `false` when the document is not cached.
    pub fn queue<F>(&self, uri: &Url, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(record) = self.documents.get(uri).map(|e| Arc::clone(&e.queue)) else {
            return false;
        };
        let generation = record.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = Duration::from_millis(self.debounce_ms.load(Ordering::Relaxed));
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _guard = record.lock.lock().await;
            if record.closed.load(Ordering::SeqCst)
                || record.generation.load(Ordering::SeqCst) != generation
            {
                return;
            }
            work.await;
        });
        true
    }

    #[must_use]
    pub fn keys(&self) -> Vec<Url> {
        self.documents.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for DocumentManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::state::Parsed;
    use pretty_assertions::assert_eq;

    fn uri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn disk(files: &'static [(&'static str, &'static str)]) -> DocumentManager {
        DocumentManager::with_reader(move |uri| {
            files
                .iter()
                .find(|(name, _)| *name == uri.as_str())
                .map(|(_, text)| (*text).to_string())
                .ok_or_else(|| Error::NotFound(uri.clone()))
        })
    }

    #[test]
    fn write_reports_structural_changes() {
        let manager = DocumentManager::new();
        let u = uri("file:///w/docker-bake.hcl");
        assert!(manager.write(&u, LanguageId::Bake, 1, "target \"a\" {}\n").unwrap());
        assert!(!manager.write(&u, LanguageId::Bake, 2, "target \"a\" {}\n").unwrap());
        assert!(manager.write(&u, LanguageId::Bake, 3, "target \"b\" {}\n").unwrap());
        assert_eq!(manager.get(&u).unwrap().version, 3);
    }

    #[test]
    fn write_rejects_older_versions() {
        let manager = DocumentManager::new();
        let u = uri("file:///w/docker-bake.hcl");
        manager.write(&u, LanguageId::Bake, 5, "").unwrap();
        let error = manager.write(&u, LanguageId::Bake, 4, "").unwrap_err();
        assert!(matches!(
            error,
            Error::StaleVersion {
                cached: 5,
                received: 4,
                ..
            }
        ));
    }

    #[test]
    fn parse_errors_do_not_fail_writes() {
        let manager = DocumentManager::new();
        let u = uri("file:///w/docker-bake.hcl");
        assert!(manager.write(&u, LanguageId::Bake, 1, "target \"a\" {\n").unwrap());
        let document = manager.get(&u).unwrap();
        assert!(!document.bake().unwrap().errors.is_empty());
    }

    #[test]
    fn snapshots_are_independent_of_later_writes() {
        let manager = DocumentManager::new();
        let u = uri("file:///w/docker-bake.hcl");
        manager.write(&u, LanguageId::Bake, 1, "target \"a\" {}\n").unwrap();
        let snapshot = manager.get(&u).unwrap();
        manager.write(&u, LanguageId::Bake, 2, "target \"b\" {}\n").unwrap();
        assert_eq!(&*snapshot.text, "target \"a\" {}\n");
        assert_eq!(snapshot.bake().unwrap().body.blocks[0].name(), Some("a"));
    }

    #[test]
    fn read_caches_documents_from_disk() {
        let manager = disk(&[("file:///w/Dockerfile", "FROM alpine AS base\n")]);
        let u = uri("file:///w/Dockerfile");
        assert!(manager.get(&u).is_none());
        let document = manager.read(&u).unwrap();
        assert_eq!(document.version, 1);
        assert!(matches!(document.parsed, Parsed::Dockerfile(_)));
        assert_eq!(manager.keys(), vec![u.clone()]);
        assert!(matches!(
            manager.read(&uri("file:///w/missing")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn companion_does_not_cache() {
        let manager = disk(&[("file:///w/Dockerfile", "FROM alpine AS base\n")]);
        let u = uri("file:///w/Dockerfile");
        let document = manager.companion(&u).unwrap();
        assert_eq!(document.dockerfile().unwrap().stages()[0].name, "base");
        assert!(manager.keys().is_empty());
    }

    #[test]
    fn companion_prefers_the_open_copy() {
        let manager = disk(&[("file:///w/Dockerfile", "FROM alpine AS disk\n")]);
        let u = uri("file:///w/Dockerfile");
        manager
            .write(&u, LanguageId::Dockerfile, 3, "FROM alpine AS editor\n")
            .unwrap();
        let document = manager.companion(&u).unwrap();
        assert_eq!(document.dockerfile().unwrap().stages()[0].name, "editor");
    }

    #[test]
    fn overwrite_bumps_the_version() {
        let manager = DocumentManager::new();
        let u = uri("file:///w/docker-bake.hcl");
        manager.write(&u, LanguageId::Bake, 7, "").unwrap();
        manager.overwrite(&u, "group \"default\" {}\n").unwrap();
        let document = manager.get(&u).unwrap();
        assert_eq!(document.version, 8);
        assert_eq!(document.language, LanguageId::Bake);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_runs_only_the_latest_work() {
        let manager = DocumentManager::new();
        let u = uri("file:///w/docker-bake.hcl");
        manager.write(&u, LanguageId::Bake, 1, "").unwrap();
        let runs = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let runs = Arc::clone(&runs);
            assert!(manager.queue(&u, async move { runs.lock().unwrap().push(n) }));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(*runs.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_cancels_queued_work() {
        let manager = DocumentManager::new();
        let u = uri("file:///w/docker-bake.hcl");
        manager.write(&u, LanguageId::Bake, 1, "").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        manager.queue(&u, async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        manager.remove(&u);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(manager.get(&u).is_none());
    }

    #[tokio::test]
    async fn queue_requires_a_cached_document() {
        let manager = DocumentManager::new();
        assert!(!manager.queue(&uri("file:///w/docker-bake.hcl"), async {}));
    }
}
