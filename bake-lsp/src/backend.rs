//! LSP backend implementation
//!
//! Contains the main `Backend` struct that implements the `LanguageServer` trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::{
    CodeActionParams, CodeActionProviderCapability, CodeActionResponse, CompletionOptions,
    CompletionParams, CompletionResponse, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, GotoDefinitionParams, GotoDefinitionResponse, InitializeParams,
    InitializeResult, InitializedParams, OneOf, SelectionRange, SelectionRangeParams,
    SelectionRangeProviderCapability, ServerCapabilities, ServerInfo, TextDocumentSyncCapability,
    TextDocumentSyncKind, Url,
};
use tower_lsp::{Client, LanguageServer};

use crate::capabilities::{code_action, completion, definition, diagnostics, selection_range};
use crate::collaborators::{BakePrint, ImageAnalyzer, NoAnalysis, NoEvaluation, TargetEvaluator};
use crate::companion::Companions;
use crate::config::Config;
use crate::error;
use crate::state::{Document, DocumentManager, LanguageId};

/// LSP backend for Docker Bake files
pub struct Backend {
    /// Client handle for sending messages back to the editor
    client: Client,
    manager: Arc<DocumentManager>,
    /// Chosen once the client's initialization options are known.
    evaluator: OnceLock<Arc<dyn TargetEvaluator>>,
    analyzer: Arc<dyn ImageAnalyzer>,
    link_support: AtomicBool,
}

impl Backend {
    /// Create a new backend instance
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            manager: Arc::new(DocumentManager::new()),
            evaluator: OnceLock::new(),
            analyzer: Arc::new(NoAnalysis),
            link_support: AtomicBool::new(false),
        }
    }

    fn evaluator(&self) -> Arc<dyn TargetEvaluator> {
        self.evaluator
            .get()
            .map_or_else(|| Arc::new(NoEvaluation) as Arc<dyn TargetEvaluator>, Arc::clone)
    }

    /// Run bake engine work for `uri` off the async runtime. Errors and
    /// panics are logged and yield no result.
    async fn run<T, F>(&self, uri: Url, work: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&Companions<'_>, &Document) -> error::Result<T> + Send + 'static,
    {
        let manager = Arc::clone(&self.manager);
        let evaluator = self.evaluator();
        let joined = tokio::task::spawn_blocking(move || {
            let document = manager.read(&uri)?;
            let companions = Companions::new(&manager, evaluator.as_ref(), &document);
            work(&companions, &document)
        })
        .await;
        match joined {
            Ok(Ok(value)) => Some(value),
            Ok(Err(error)) => {
                tracing::debug!(%error, "request skipped");
                None
            }
            Err(error) => {
                tracing::warn!(%error, "request task failed");
                None
            }
        }
    }

    /// Queue a diagnostics run for a bake document. Runs coalesce per
    /// document through the manager's debounce.
    fn schedule_diagnostics(&self, uri: &Url) {
        let client = self.client.clone();
        let manager = Arc::clone(&self.manager);
        let evaluator = self.evaluator();
        let analyzer = Arc::clone(&self.analyzer);
        let target = uri.clone();
        let queued = self.manager.queue(uri, async move {
            let collected = tokio::task::spawn_blocking(move || {
                let document = manager.get(&target)?;
                let companions = Companions::new(&manager, evaluator.as_ref(), &document);
                match diagnostics::collect_diagnostics(&companions, analyzer.as_ref(), &document) {
                    Ok(found) => Some((document.uri.clone(), document.version, found)),
                    Err(error) => {
                        tracing::debug!(%error, "diagnostics skipped");
                        None
                    }
                }
            })
            .await;
            match collected {
                Ok(Some((uri, version, found))) => {
                    tracing::debug!(%uri, version, count = found.len(), "publishing diagnostics");
                    client.publish_diagnostics(uri, found, Some(version)).await;
                }
                Ok(None) => {}
                Err(error) => tracing::warn!(%error, "diagnostics task failed"),
            }
        });
        if !queued {
            tracing::debug!(%uri, "document gone before diagnostics were queued");
        }
    }

    /// Bake documents whose checks read other files are refreshed whenever
    /// any other document changes.
    fn refresh_bake_documents(&self) {
        for uri in self.manager.keys() {
            if self
                .manager
                .get(&uri)
                .is_some_and(|d| d.language == LanguageId::Bake)
            {
                self.schedule_diagnostics(&uri);
            }
        }
    }

    fn store(&self, uri: &Url, language: LanguageId, version: i32, text: &str) {
        match self.manager.write(uri, language, version, text) {
            Ok(changed) if language == LanguageId::Bake => {
                if changed {
                    self.schedule_diagnostics(uri);
                }
            }
            Ok(_) => self.refresh_bake_documents(),
            Err(error) => tracing::warn!(%error, "document update rejected"),
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        tracing::info!("Initializing bake-lsp");

        let config = Config::from_initialization_options(params.initialization_options.as_ref());
        self.manager
            .set_debounce(Duration::from_millis(config.debounce_ms));
        let evaluator: Arc<dyn TargetEvaluator> = if config.evaluate.enabled {
            Arc::new(BakePrint::new(&config.evaluate))
        } else {
            Arc::new(NoEvaluation)
        };
        if self.evaluator.set(evaluator).is_err() {
            tracing::warn!("initialize received more than once");
        }

        let link_support = params
            .capabilities
            .text_document
            .as_ref()
            .and_then(|t| t.definition.as_ref())
            .and_then(|d| d.link_support)
            .unwrap_or(false);
        self.link_support.store(link_support, Ordering::Relaxed);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                // Full sync: every change carries the complete document
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::FULL,
                )),
                completion_provider: Some(CompletionOptions {
                    trigger_characters: Some(vec!["\"".to_string(), "=".to_string()]),
                    ..Default::default()
                }),
                definition_provider: Some(OneOf::Left(true)),
                selection_range_provider: Some(SelectionRangeProviderCapability::Simple(true)),
                code_action_provider: Some(CodeActionProviderCapability::Simple(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "bake-lsp".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        tracing::info!("bake-lsp initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down bake-lsp");
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        let language = LanguageId::from_client(&document.language_id, &document.uri);

        tracing::debug!("Document opened: {} ({language})", document.uri);

        self.store(&document.uri, language, document.version, &document.text);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let version = params.text_document.version;

        // With FULL sync, the last change holds the complete new text
        if let Some(change) = params.content_changes.into_iter().last() {
            tracing::debug!("Document changed: {uri}");

            let language = self
                .manager
                .get(&uri)
                .map_or_else(|| LanguageId::from_uri(&uri), |d| d.language);
            self.store(&uri, language, version, &change.text);
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;

        tracing::debug!("Document closed: {uri}");

        self.manager.remove(&uri);
        // Clear diagnostics for closed file
        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;

        let list = self
            .run(uri, move |companions, document| {
                completion::compute_completions(companions, document, position)
            })
            .await;
        Ok(list.map(CompletionResponse::List))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let link_support = self.link_support.load(Ordering::Relaxed);

        let response = self
            .run(uri, move |companions, document| {
                definition::find_definition(companions, document, position, link_support)
            })
            .await;
        Ok(response.flatten())
    }

    async fn selection_range(
        &self,
        params: SelectionRangeParams,
    ) -> Result<Option<Vec<SelectionRange>>> {
        let positions = params.positions;
        Ok(self
            .run(params.text_document.uri, move |_, document| {
                selection_range::selection_ranges(document, &positions)
            })
            .await)
    }

    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let actions = code_action::quick_fixes(&params.text_document.uri, &params.context.diagnostics);
        Ok((!actions.is_empty()).then_some(actions))
    }
}
