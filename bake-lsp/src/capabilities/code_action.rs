//! Quick fixes carried by diagnostics.

use std::collections::HashMap;

use tower_lsp::lsp_types::{
    CodeAction, CodeActionKind, CodeActionOrCommand, Diagnostic, TextEdit, Url, WorkspaceEdit,
};

use crate::capabilities::diagnostics::NamedEdit;

/// One quick fix per named edit in the `data` of each diagnostic. Diagnostics
/// without edits, or with data in another shape, contribute nothing.
#[must_use]
pub fn quick_fixes(uri: &Url, diagnostics: &[Diagnostic]) -> Vec<CodeActionOrCommand> {
    diagnostics
        .iter()
        .flat_map(|diagnostic| {
            let edits: Vec<NamedEdit> = diagnostic
                .data
                .clone()
                .and_then(|data| serde_json::from_value(data).ok())
                .unwrap_or_default();
            edits.into_iter().map(move |edit| {
                let changes = HashMap::from([(
                    uri.clone(),
                    vec![TextEdit::new(edit.range, edit.edit)],
                )]);
                CodeActionOrCommand::CodeAction(CodeAction {
                    title: edit.title,
                    kind: Some(CodeActionKind::QUICKFIX),
                    diagnostics: Some(vec![diagnostic.clone()]),
                    edit: Some(WorkspaceEdit {
                        changes: Some(changes),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
            })
        })
        .collect()
}
