//! Keyword search over a directory of plain-text documents.
//!
//! Walks `root` recursively and returns every `.txt` or `.md` file whose
//! text contains all query terms (case-insensitive). Confidence is the share
//! of the file's lines that mention at least one term, floored at 0.5.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use crate::error::SearchError;
use crate::tool::{SearchTool, ToolHealth};
use crate::types::{RawToolResult, SourceKind};

const EXTENSIONS: &[&str] = &["txt", "md"];

/// A local tool backed by files on disk.
#[derive(Debug, Clone)]
pub struct LocalFilesTool {
    name: String,
    root: PathBuf,
    max_results: usize,
}

impl LocalFilesTool {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            max_results: 20,
        }
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn collect_files(&self) -> Result<Vec<PathBuf>, SearchError> {
        let mut pending = vec![self.root.clone()];
        let mut files = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                SearchError::BackendUnavailable(format!(
                    "{}: cannot read {}: {e}",
                    self.name,
                    dir.display()
                ))
            })?;

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                SearchError::BackendUnavailable(format!("{}: directory walk failed: {e}", self.name))
            })? {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && has_text_extension(&path) {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Score `text` against `terms`, or `None` when some term is missing.
fn score(text: &str, terms: &[String]) -> Option<f64> {
    let lower = text.to_lowercase();
    if terms.is_empty() || !terms.iter().all(|t| lower.contains(t.as_str())) {
        return None;
    }
    let lines: Vec<&str> = lower.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return Some(0.5);
    }
    let hits = lines
        .iter()
        .filter(|line| terms.iter().any(|t| line.contains(t.as_str())))
        .count();
    Some((hits as f64 / lines.len() as f64).max(0.5))
}

#[async_trait]
impl SearchTool for LocalFilesTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::LocalFiles
    }

    async fn execute(&self, query: &str) -> Result<Vec<RawToolResult>, SearchError> {
        let terms = query_terms(query);
        let files = self.collect_files().await?;
        let mut results = Vec::new();

        for path in files {
            let text = match tokio::fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let Some(confidence) = score(&text, &terms) else {
                continue;
            };
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            results.push(
                RawToolResult::new(json!({ "text": text.trim(), "path": path.display().to_string() }))
                    .with_title(title)
                    .with_url(format!("file://{}", path.display()))
                    .with_confidence(confidence),
            );
            if results.len() >= self.max_results {
                break;
            }
        }

        tracing::debug!(tool = %self.name, count = results.len(), "local file search complete");
        Ok(results)
    }

    async fn health_check(&self) -> Result<ToolHealth, SearchError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(ToolHealth::Healthy),
            _ => Ok(ToolHealth::Unhealthy),
        }
    }
}
