//! The local knowledge tier: vector index, graph store and local documents.
//!
//! Local backends are trusted in-process tools. They are queried through a
//! [`ParallelProcessor`] without retries; each call is bounded by the
//! per-tool timeout so one stuck backend cannot hold up the query, and is
//! abandoned as soon as the query's token is cancelled.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::SearchError;
use crate::parallel::ParallelProcessor;
use crate::tool::SearchTool;
use crate::types::{RawToolResult, SourceKind};

/// Outcome of querying one backend.
#[derive(Debug)]
pub struct BackendResponse {
    pub source_kind: SourceKind,
    pub source_name: String,
    pub reliability: f64,
    pub outcome: Result<Vec<RawToolResult>, SearchError>,
}

/// Fan-out over the registered local backends.
pub struct LocalKnowledge {
    backends: RwLock<Vec<Arc<dyn SearchTool>>>,
    processor: ParallelProcessor,
    timeout: Duration,
}

impl LocalKnowledge {
    pub fn new(processor: ParallelProcessor, timeout: Duration) -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
            processor,
            timeout,
        }
    }

    /// Add a backend. Remote source kinds are accepted but logged, since they
    /// usually indicate a wiring mistake.
    pub fn add_backend(&self, backend: Arc<dyn SearchTool>) {
        if !backend.source_kind().is_local() {
            tracing::warn!(
                backend = backend.name(),
                kind = %backend.source_kind(),
                "non-local source kind registered as local backend"
            );
        }
        self.backends
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(backend);
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.snapshot().iter().map(|b| b.name().to_owned()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<dyn SearchTool>> {
        self.backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Query every local backend concurrently. One response per backend, in
    /// registration order. Calls still running when `cancel` fires end with
    /// [`SearchError::Cancelled`].
    pub async fn search(&self, query: &str, cancel: &CancellationToken) -> Vec<BackendResponse> {
        let backends = self.snapshot();
        let timeout = self.timeout;
        let tasks: Vec<_> = backends
            .iter()
            .map(|backend| {
                let backend = Arc::clone(backend);
                async move {
                    tokio::select! {
                        () = cancel.cancelled() => Err(SearchError::Cancelled),
                        outcome = tokio::time::timeout(timeout, backend.execute(query)) => {
                            match outcome {
                                Ok(outcome) => outcome,
                                Err(_) => Err(SearchError::BackendTimeout(format!(
                                    "{} exceeded {}s",
                                    backend.name(),
                                    timeout.as_secs_f64()
                                ))),
                            }
                        }
                    }
                }
            })
            .collect();

        let outcomes = self.processor.execute_parallel(tasks).await;

        backends
            .iter()
            .zip(outcomes)
            .map(|(backend, outcome)| {
                match &outcome {
                    Err(SearchError::Cancelled) => {
                        tracing::debug!(backend = backend.name(), "local backend call cancelled");
                    }
                    Err(error) => {
                        tracing::warn!(backend = backend.name(), %error, "local backend failed");
                    }
                    Ok(_) => {}
                }
                BackendResponse {
                    source_kind: backend.source_kind(),
                    source_name: backend.name().to_owned(),
                    reliability: backend.reliability(),
                    outcome,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for LocalKnowledge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKnowledge")
            .field("backends", &self.backend_names())
            .field("processor", &self.processor)
            .field("timeout", &self.timeout)
            .finish()
    }
}
