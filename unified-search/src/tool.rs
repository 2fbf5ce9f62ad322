//! Trait definition for pluggable search backends ("tools").
//!
//! Every backend the orchestrator can query, local or remote, implements
//! [`SearchTool`]. This is the only interface the orchestrator depends on;
//! vector search, graph queries, document lookups and remote data services
//! are all opaque behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::health::HealthStatus;
use crate::types::{RawToolResult, SourceKind};

/// Self-reported health of a backend, as returned by its health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ToolHealth {
    /// Whether discovery keeps a tool reporting this state.
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Unhealthy)
    }
}

impl From<ToolHealth> for HealthStatus {
    fn from(health: ToolHealth) -> Self {
        match health {
            ToolHealth::Healthy => Self::Healthy,
            ToolHealth::Degraded => Self::Degraded,
            ToolHealth::Unhealthy => Self::Unhealthy,
        }
    }
}

/// A searchable backend.
///
/// Implementations handle their own transport and parsing and must be
/// `Send + Sync` so they can be queried concurrently from many requests.
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Stable, unique name used for health tracking and logging.
    fn name(&self) -> &str;

    /// Which kind of source results from this tool are attributed to.
    fn source_kind(&self) -> SourceKind;

    /// How much results from this tool are trusted, in `[0, 1]`.
    fn reliability(&self) -> f64 {
        1.0
    }

    /// Run `query` and return raw hits.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::BackendUnavailable`] or
    /// [`SearchError::BackendTimeout`] when the backend cannot answer.
    async fn execute(&self, query: &str) -> Result<Vec<RawToolResult>, SearchError>;

    /// Check whether the backend is able to serve queries.
    async fn health_check(&self) -> Result<ToolHealth, SearchError>;
}
