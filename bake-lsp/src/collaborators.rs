//! Outside services the bake engine leans on: `docker buildx bake --print`
//! for resolving inherited targets, an image analyzer for tag diagnostics and
//! directory listings for path completion.
//!
//! Every collaborator absorbs its own failures. A failed call is logged and
//! the feature depending on it degrades to no result.

use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::EvaluateConfig;

/// The build inputs of one target after inheritance and expressions are
/// applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResolvedTarget {
    pub context: Option<String>,
    pub dockerfile: Option<String>,
    #[serde(rename = "dockerfile-inline")]
    pub dockerfile_inline: Option<String>,
}

pub trait TargetEvaluator: Send + Sync {
    /// Resolve `target` as defined by the bake file `definition`, whose
    /// relative paths are relative to `folder`.
    fn evaluate(&self, folder: &Path, definition: &str, target: &str) -> Option<ResolvedTarget>;
}

/// An evaluator that never resolves anything, for when evaluation is
/// disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvaluation;

impl TargetEvaluator for NoEvaluation {
    fn evaluate(&self, _folder: &Path, _definition: &str, _target: &str) -> Option<ResolvedTarget> {
        None
    }
}

#[derive(thiserror::Error, Debug)]
enum EvaluateError {
    #[error("failed to run {0}")]
    Spawn(String, #[source] std::io::Error),
    #[error("no output within {0:?}")]
    Timeout(Duration),
    #[error("exited with {0}")]
    Failed(ExitStatus),
    #[error("unreadable output")]
    Output(#[from] serde_json::Error),
    #[error("target {0} missing from output")]
    MissingTarget(String),
}

#[derive(Deserialize)]
struct PrintOutput {
    #[serde(default)]
    target: HashMap<String, ResolvedTarget>,
}

/// Runs `docker buildx bake -f- --print <target>` with the bake file on
/// standard input.
#[derive(Debug, Clone)]
pub struct BakePrint {
    docker: String,
    timeout: Duration,
}

impl BakePrint {
    #[must_use]
    pub fn new(config: &EvaluateConfig) -> Self {
        Self {
            docker: config.docker.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Block on [`BakePrint::print`], on the current runtime when called
    /// from one of its blocking threads.
    fn run(
        &self,
        folder: &Path,
        definition: &str,
        target: &str,
    ) -> Result<ResolvedTarget, EvaluateError> {
        let print = self.print(folder, definition, target);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            return handle.block_on(print);
        }
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EvaluateError::Spawn(self.docker.clone(), e))?
            .block_on(print)
    }

    /// The timeout covers writing the definition as well as reading the
    /// output. A child still running when it expires is killed.
    async fn print(
        &self,
        folder: &Path,
        definition: &str,
        target: &str,
    ) -> Result<ResolvedTarget, EvaluateError> {
        let spawn_error = |e| EvaluateError::Spawn(self.docker.clone(), e);
        let mut child = Command::new(&self.docker)
            .args(["buildx", "bake", "-f-", "--print", target])
            .current_dir(folder)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let exchange = async move {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(definition.as_bytes()).await?;
            }
            child.wait_with_output().await
        };
        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| EvaluateError::Timeout(self.timeout))?
            .map_err(spawn_error)?;
        if !output.status.success() {
            return Err(EvaluateError::Failed(output.status));
        }
        parse_print_output(&output.stdout, target)
    }
}

impl TargetEvaluator for BakePrint {
    fn evaluate(&self, folder: &Path, definition: &str, target: &str) -> Option<ResolvedTarget> {
        match self.run(folder, definition, target) {
            Ok(resolved) => Some(resolved),
            Err(error) => {
                tracing::warn!(%error, target, "bake evaluation failed");
                None
            }
        }
    }
}

fn parse_print_output(output: &[u8], target: &str) -> Result<ResolvedTarget, EvaluateError> {
    let mut printed: PrintOutput = serde_json::from_slice(output)?;
    printed
        .target
        .remove(target)
        .ok_or_else(|| EvaluateError::MissingTarget(target.to_string()))
}

/// One result of analyzing an image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    /// What was found, e.g. `critical_high_vulnerabilities`.
    pub kind: String,
    pub message: String,
    pub link: Option<String>,
}

impl Finding {
    #[must_use]
    pub fn is_vulnerability(&self) -> bool {
        matches!(
            self.kind.as_str(),
            "critical_high_vulnerabilities" | "vulnerabilities"
        )
    }
}

/// Looks up what is known about an image, such as vulnerabilities.
/// Implementations bound their own network time and return nothing on
/// failure.
pub trait ImageAnalyzer: Send + Sync {
    fn analyze(&self, image: &str) -> Vec<Finding>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoAnalysis;

impl ImageAnalyzer for NoAnalysis {
    fn analyze(&self, _image: &str) -> Vec<Finding> {
        Vec::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_directory: bool,
}

/// Entries of `path` sorted by name, or nothing if it cannot be listed.
#[must_use]
pub fn list_directory(path: &Path) -> Vec<DirEntry> {
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::debug!(%error, path = %path.display(), "cannot list directory");
            return Vec::new();
        }
    };
    let mut listed: Vec<DirEntry> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_directory: entry.path().is_dir(),
        })
        .collect();
    listed.sort_by(|a, b| a.name.cmp(&b.name));
    listed
}
