//! bake-lsp: Language Server Protocol implementation for Docker Bake files
//!
//! This binary provides LSP support for bake files, including:
//! - Diagnostics (syntax errors and checks against the targets' Dockerfiles)
//! - Completion of blocks, attributes and values
//! - Go-to-definition for targets, variables, stages and build args

use tower_lsp::{LspService, Server};
use tracing_subscriber::EnvFilter;

use bake_lsp::Backend;

#[tokio::main]
async fn main() {
    // Logs go to stderr since stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting bake-lsp server");

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;
}
