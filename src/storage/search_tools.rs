//! Stored intelligence exposed as local search backends.
//!
//! [`StoreSearchTool`] answers as the `VECTOR_INDEX` source from the content
//! store; [`GraphSearchTool`] answers as the `GRAPH` source from the entity
//! graph. Store calls are synchronous, so both run them on the blocking pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use unified_search::{RawToolResult, SearchError, SearchTool, SourceKind, ToolHealth};

use super::{query_terms, ContentStore, GraphStore};
use crate::error::Result;

const DEFAULT_LIMIT: usize = 10;
const GRAPH_CONFIDENCE: f64 = 0.6;

async fn blocking<T, F>(name: &str, f: F) -> std::result::Result<T, SearchError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(SearchError::BackendUnavailable(format!("{name}: {e}"))),
        Err(e) => Err(SearchError::BackendUnavailable(format!("{name}: task failed: {e}"))),
    }
}

/// Content store search.
pub struct StoreSearchTool {
    name: String,
    store: Arc<dyn ContentStore>,
    limit: usize,
}

impl StoreSearchTool {
    pub fn new(name: impl Into<String>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            name: name.into(),
            store,
            limit: DEFAULT_LIMIT,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
impl SearchTool for StoreSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::VectorIndex
    }

    async fn execute(&self, query: &str) -> std::result::Result<Vec<RawToolResult>, SearchError> {
        let store = Arc::clone(&self.store);
        let query = query.to_owned();
        let limit = self.limit;
        let records = blocking(&self.name, move || store.search(&query, limit)).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let mut raw = RawToolResult::new(record.content).with_confidence(record.confidence);
                if let Some(source) = record.sources.first() {
                    if let Some(title) = &source.title {
                        raw = raw.with_title(title.clone());
                    }
                    if let Some(url) = &source.url {
                        raw = raw.with_url(url.clone());
                    }
                }
                raw
            })
            .collect())
    }

    async fn health_check(&self) -> std::result::Result<ToolHealth, SearchError> {
        let store = Arc::clone(&self.store);
        blocking(&self.name, move || store.ping()).await?;
        Ok(ToolHealth::Healthy)
    }
}

/// Entity graph search. Each matching entity becomes one hit describing its
/// neighbours and the sources that mention it.
pub struct GraphSearchTool {
    name: String,
    graph: Arc<dyn GraphStore>,
    limit: usize,
}

impl GraphSearchTool {
    pub fn new(name: impl Into<String>, graph: Arc<dyn GraphStore>) -> Self {
        Self {
            name: name.into(),
            graph,
            limit: DEFAULT_LIMIT,
        }
    }
}

#[async_trait]
impl SearchTool for GraphSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_kind(&self) -> SourceKind {
        SourceKind::Graph
    }

    async fn execute(&self, query: &str) -> std::result::Result<Vec<RawToolResult>, SearchError> {
        let graph = Arc::clone(&self.graph);
        let terms = query_terms(query);
        let limit = self.limit;

        let hits = blocking(&self.name, move || {
            let mut matched = BTreeMap::new();
            for term in &terms {
                for entity in graph.search_entities(term, limit)? {
                    matched.entry(entity.name.clone()).or_insert(entity);
                }
            }

            let mut hits = Vec::new();
            for entity in matched.into_values().take(limit) {
                let mut related: Vec<String> = graph
                    .relationships_for(&entity.name)?
                    .into_iter()
                    .map(|r| if r.from == entity.name { r.to } else { r.from })
                    .collect();
                related.sort();
                related.dedup();
                let sources = graph.entity_sources(&entity.name)?;
                hits.push(
                    RawToolResult::new(json!({
                        "intelligence_type": "entity",
                        "entity": entity.name,
                        "kind": entity.kind,
                        "related": related,
                        "mentioned_by": sources,
                    }))
                    .with_title(entity.name)
                    .with_confidence(GRAPH_CONFIDENCE),
                );
            }
            Ok(hits)
        })
        .await?;

        Ok(hits)
    }

    async fn health_check(&self) -> std::result::Result<ToolHealth, SearchError> {
        let graph = Arc::clone(&self.graph);
        blocking(&self.name, move || graph.ping()).await?;
        Ok(ToolHealth::Healthy)
    }
}
