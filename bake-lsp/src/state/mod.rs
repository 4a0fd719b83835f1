//! State management for open documents

mod document;
mod manager;

pub use document::{Document, LanguageId, Parsed};
pub use manager::DocumentManager;
