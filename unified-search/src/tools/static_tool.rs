//! In-memory tool returning canned results.
//!
//! Useful for wiring fixed knowledge into the local tier and for exercising
//! the orchestrator without network access.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::SearchError;
use crate::tool::{SearchTool, ToolHealth};
use crate::types::{RawToolResult, SourceKind};

/// A tool whose answers are fixed at construction.
#[derive(Debug)]
pub struct StaticTool {
    name: String,
    source_kind: SourceKind,
    results: Vec<RawToolResult>,
    failure: Option<SearchError>,
    health: ToolHealth,
    reliability: f64,
    calls: AtomicUsize,
}

impl StaticTool {
    /// A healthy tool that always returns `results`.
    pub fn new(
        name: impl Into<String>,
        source_kind: SourceKind,
        results: Vec<RawToolResult>,
    ) -> Self {
        Self {
            name: name.into(),
            source_kind,
            results,
            failure: None,
            health: ToolHealth::Healthy,
            reliability: 1.0,
            calls: AtomicUsize::new(0),
        }
    }

    /// A tool whose every `execute` fails with `error`.
    pub fn failing(name: impl Into<String>, source_kind: SourceKind, error: SearchError) -> Self {
        let mut tool = Self::new(name, source_kind, Vec::new());
        tool.failure = Some(error);
        tool
    }

    /// Set what `health_check` reports.
    #[must_use]
    pub fn with_health(mut self, health: ToolHealth) -> Self {
        self.health = health;
        self
    }

    #[must_use]
    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }

    /// Number of `execute` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchTool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    fn reliability(&self) -> f64 {
        self.reliability
    }

    async fn execute(&self, _query: &str) -> Result<Vec<RawToolResult>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.results.clone()),
        }
    }

    async fn health_check(&self) -> Result<ToolHealth, SearchError> {
        Ok(self.health)
    }
}
