//! bake-lsp library
//!
//! Provides the LSP backend for Docker Bake files: definitions, completion,
//! diagnostics, selection ranges and quick fixes, resolved against the
//! Dockerfiles the targets build from.

pub mod backend;
pub mod capabilities;
pub mod collaborators;
pub mod companion;
pub mod config;
pub mod convert;
pub mod error;
pub mod state;
pub mod walker;

pub use backend::Backend;
