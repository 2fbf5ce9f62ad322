//! # unified-search
//!
//! Parallel search across a local knowledge tier and a dynamically
//! discovered set of remote tools, with result merging, deduplication and
//! per-tool health tracking.
//!
//! ## Design
//!
//! - Every backend implements [`SearchTool`]; the orchestrator never sees
//!   transport details
//! - Local and remote tiers are queried concurrently; remote calls are retried
//!   with exponential backoff and bounded by a per-tool timeout
//! - Results with identical content collapse into one result carrying every
//!   source that reported it
//! - Full result sets are cached in memory with a TTL
//! - Failing tools are excluded from discovery over a window of recent calls;
//!   after a cooldown (or a manual refresh) they get one trial call, and a
//!   success restores them
//!
//! ## Security
//!
//! - Queries are logged only at trace level
//! - No network listeners: this is a library, not a server

pub mod cache;
pub mod canonical;
pub mod config;
pub mod error;
pub mod health;
pub mod local;
pub mod orchestrator;
pub mod parallel;
pub mod registry;
pub mod retry;
pub mod tool;
pub mod tools;
pub mod types;

pub use cache::{CacheStatus, QueryCache};
pub use config::SearchConfig;
pub use error::{Result, SearchError};
pub use health::{HealthMonitor, HealthReport, HealthStatus, ToolHealthReport, ToolMetrics};
pub use local::LocalKnowledge;
pub use orchestrator::{ResultSink, SearchMode, SearchOrchestrator};
pub use parallel::ParallelProcessor;
pub use registry::ToolRegistry;
pub use retry::{retry_with_backoff, RetryConfig};
pub use tool::{SearchTool, ToolHealth};
pub use types::{
    IntelligenceType, MergeConfidence, RawToolResult, SearchResult, SearchResults,
    SourceKind, SourceMetadata,
};

/// Answer `query` across every tier with a one-off orchestrator.
///
/// Convenience for callers that have no long-lived state; services should
/// keep a [`SearchOrchestrator`] so the cache and health data persist.
///
/// # Errors
///
/// Returns [`SearchError::Config`] if `config` is invalid. Query-level
/// failures are reported in [`SearchResults::error`].
pub async fn search_once(
    query: &str,
    config: SearchConfig,
    tools: Vec<std::sync::Arc<dyn SearchTool>>,
) -> Result<SearchResults> {
    let orchestrator = SearchOrchestrator::new(config)?;
    for tool in tools {
        if tool.source_kind().is_local() {
            orchestrator.local().add_backend(tool);
        } else {
            orchestrator.registry().register(tool);
        }
    }
    Ok(orchestrator
        .process_query(
            query,
            SearchMode::All,
            &tokio_util::sync::CancellationToken::new(),
        )
        .await)
}
