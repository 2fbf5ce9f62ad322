//! The query pipeline: cache check, parallel fan-out, merge, hand-off, cache write.
//!
//! ```text
//! process_query
//!   ├─ validate ─────────────── error → SearchResults { error }
//!   ├─ cache hit ────────────── return (cache_hit = true)
//!   └─ miss
//!        ├─ tokio::join!(local tier, remote tools)
//!        ├─ cancelled? ──────── error → SearchResults { error }, no sink or cache
//!        ├─ convert raw hits → SearchResult
//!        ├─ merge / rank / truncate
//!        ├─ ResultSink (optional)
//!        └─ cache write
//! ```
//!
//! A failing backend contributes nothing and its kind is left out of
//! `sources_queried`; the query as a whole still succeeds.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::QueryCache;
use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::health::HealthMonitor;
use crate::local::{BackendResponse, LocalKnowledge};
use crate::parallel::ParallelProcessor;
use crate::registry::ToolRegistry;
use crate::retry::retry_with_backoff;
use crate::types::{IntelligenceType, RawToolResult, SearchResult, SearchResults, SourceMetadata};

use super::merge::merge_results;

/// Confidence assumed for a raw hit that does not report one.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Which tiers a query fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    All,
    LocalOnly,
    RemoteOnly,
}

impl SearchMode {
    /// Build a mode from the two request flags.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Validation`] when both flags are set.
    pub fn from_flags(local_only: bool, remote_only: bool) -> Result<Self, SearchError> {
        match (local_only, remote_only) {
            (true, true) => Err(SearchError::Validation(
                "local-only and remote-only are mutually exclusive".into(),
            )),
            (true, false) => Ok(Self::LocalOnly),
            (false, true) => Ok(Self::RemoteOnly),
            (false, false) => Ok(Self::All),
        }
    }

    fn includes_local(self) -> bool {
        !matches!(self, Self::RemoteOnly)
    }

    fn includes_remote(self) -> bool {
        !matches!(self, Self::LocalOnly)
    }
}

/// Receives merged results after a cache miss, e.g. to persist them.
///
/// Hand-off must not block the query: implementations enqueue and return.
pub trait ResultSink: Send + Sync {
    /// Accept `results`; returns how many were queued.
    fn submit(&self, results: &[SearchResult]) -> usize;
}

/// Fans queries out across the local tier and discovered remote tools.
pub struct SearchOrchestrator {
    config: SearchConfig,
    cache: QueryCache,
    registry: Arc<ToolRegistry>,
    local: Arc<LocalKnowledge>,
    processor: ParallelProcessor,
    sink: Option<Arc<dyn ResultSink>>,
}

impl SearchOrchestrator {
    /// Build an orchestrator with an empty local tier and registry.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if `config` fails validation.
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        config.validate()?;
        let processor = ParallelProcessor::new(config.max_concurrency);
        let registry = Arc::new(ToolRegistry::with_monitor(
            config.discovery_ttl(),
            config.tool_timeout(),
            Arc::new(HealthMonitor::with_cooldown(config.health_cooldown())),
        ));
        let local = Arc::new(LocalKnowledge::new(processor, config.tool_timeout()));
        Ok(Self {
            cache: QueryCache::new(config.cache_ttl(), config.cache_max_entries),
            config,
            registry,
            local,
            processor,
            sink: None,
        })
    }

    /// Attach a sink that receives merged results on every cache miss.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn local(&self) -> &Arc<LocalKnowledge> {
        &self.local
    }

    fn validate_query(&self, query: &str) -> Result<(), SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::Validation("query must not be empty".into()));
        }
        let len = query.chars().count();
        if len > self.config.max_query_len {
            return Err(SearchError::Validation(format!(
                "query is {len} characters, limit is {}",
                self.config.max_query_len
            )));
        }
        Ok(())
    }

    /// Answer `query`. Never fails: errors before fan-out are reported in
    /// [`SearchResults::error`], backend failures are logged and skipped.
    ///
    /// Only [`SearchMode::All`] reads and writes the cache, so a restricted
    /// query never answers a later unrestricted one.
    pub async fn process_query(
        &self,
        query: &str,
        mode: SearchMode,
        cancel: &CancellationToken,
    ) -> SearchResults {
        let started = Instant::now();
        tracing::trace!(query, ?mode, "processing query");

        if let Err(error) = self.validate_query(query) {
            tracing::debug!(%error, "query rejected");
            return SearchResults::failed(query, &error, started.elapsed());
        }
        if cancel.is_cancelled() {
            return SearchResults::failed(query, &SearchError::Cancelled, started.elapsed());
        }

        let cacheable = mode == SearchMode::All;
        if cacheable {
            if let Some(mut hit) = self.cache.get(query).await {
                tracing::debug!(results = hit.len(), "query cache hit");
                hit.cache_hit = true;
                return hit;
            }
        }

        let (local, remote) = tokio::join!(
            async {
                if mode.includes_local() {
                    self.local.search(query, cancel).await
                } else {
                    Vec::new()
                }
            },
            async {
                if mode.includes_remote() {
                    self.search_remote(query, cancel).await
                } else {
                    Vec::new()
                }
            }
        );

        if cancel.is_cancelled() {
            tracing::debug!("query cancelled during fan-out");
            return SearchResults::failed(query, &SearchError::Cancelled, started.elapsed());
        }

        let mut sources_queried = BTreeSet::new();
        let mut collected = Vec::new();
        for response in local.into_iter().chain(remote) {
            match response.outcome {
                Ok(raw) => {
                    sources_queried.insert(response.source_kind);
                    collected.extend(raw.into_iter().filter_map(|hit| {
                        to_search_result(
                            hit,
                            &response.source_kind,
                            &response.source_name,
                            response.reliability,
                        )
                    }));
                }
                Err(error) => {
                    tracing::debug!(backend = %response.source_name, %error, "backend contributed no results");
                }
            }
        }

        let mut results = merge_results(collected, self.config.merge_confidence);
        results.truncate(self.config.max_results);

        if let Some(sink) = &self.sink {
            if !results.is_empty() {
                let queued = sink.submit(&results);
                tracing::debug!(queued, "results handed to sink");
            }
        }

        let answer = SearchResults {
            results,
            query: query.to_owned(),
            timestamp: Utc::now(),
            processing_time: started.elapsed(),
            sources_queried,
            cache_hit: false,
            error: None,
        };

        if cacheable {
            self.cache.set(query, answer.clone()).await;
        }

        tracing::debug!(
            results = answer.len(),
            sources = answer.sources_queried.len(),
            elapsed_ms = answer.processing_time.as_millis() as u64,
            "query complete"
        );
        answer
    }

    async fn search_remote(&self, query: &str, cancel: &CancellationToken) -> Vec<BackendResponse> {
        let tools = self.registry.discover_tools().await;
        let retry = self.config.retry_config();
        let registry = &self.registry;

        let tasks: Vec<_> = tools
            .iter()
            .map(|tool| async move {
                retry_with_backoff(retry, cancel, tool.name(), || {
                    registry.execute_tool_with_monitoring(tool.as_ref(), query)
                })
                .await
            })
            .collect();

        let outcomes = self.processor.execute_parallel(tasks).await;

        tools
            .iter()
            .zip(outcomes)
            .map(|(tool, outcome)| {
                if let Err(error) = &outcome {
                    tracing::warn!(tool = tool.name(), %error, "remote tool failed");
                }
                BackendResponse {
                    source_kind: tool.source_kind(),
                    source_name: tool.name().to_owned(),
                    reliability: tool.reliability(),
                    outcome,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("local", &self.local)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Attribute a raw hit to its backend. Hits with `null` content are dropped.
fn to_search_result(
    hit: RawToolResult,
    kind: &crate::types::SourceKind,
    name: &str,
    reliability: f64,
) -> Option<SearchResult> {
    if hit.content.is_null() {
        return None;
    }
    let confidence = hit.confidence.unwrap_or(DEFAULT_CONFIDENCE);
    let intelligence_type = infer_type(&hit.content);

    let mut source = SourceMetadata::new(*kind, name)
        .with_timestamp(Utc::now())
        .with_confidence(confidence)
        .with_reliability(reliability);
    if let Some(title) = hit.title {
        source = source.with_title(title);
    }
    if let Some(url) = hit.url {
        source = source.with_url(url);
    }

    SearchResult::new(hit.content, vec![source], confidence, intelligence_type).ok()
}

/// Read an explicit `intelligence_type` tag from object content.
fn infer_type(content: &serde_json::Value) -> IntelligenceType {
    content
        .get("intelligence_type")
        .cloned()
        .and_then(|tag| serde_json::from_value(tag).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::SearchTool;
    use crate::tools::StaticTool;
    use crate::types::SourceKind;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> SearchConfig {
        SearchConfig {
            base_delay_ms: 1,
            ..SearchConfig::default()
        }
    }

    fn hit(content: serde_json::Value, confidence: f64) -> RawToolResult {
        RawToolResult::new(content).with_confidence(confidence)
    }

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    impl ResultSink for CountingSink {
        fn submit(&self, results: &[SearchResult]) -> usize {
            self.0.fetch_add(results.len(), Ordering::SeqCst);
            results.len()
        }
    }

    #[test]
    fn mode_flags() {
        assert_eq!(SearchMode::from_flags(false, false).expect("ok"), SearchMode::All);
        assert_eq!(SearchMode::from_flags(true, false).expect("ok"), SearchMode::LocalOnly);
        assert_eq!(SearchMode::from_flags(false, true).expect("ok"), SearchMode::RemoteOnly);
        assert!(SearchMode::from_flags(true, true).is_err());
    }

    #[tokio::test]
    async fn empty_query_yields_error_not_panic() {
        let orchestrator = SearchOrchestrator::new(test_config()).expect("orchestrator");
        let results = orchestrator
            .process_query("   ", SearchMode::All, &CancellationToken::new())
            .await;
        assert!(results.is_empty());
        assert!(results.error.as_deref().unwrap_or("").contains("empty"));
    }

    #[tokio::test]
    async fn overlong_query_rejected() {
        let orchestrator = SearchOrchestrator::new(test_config()).expect("orchestrator");
        let long = "x".repeat(1001);
        let results = orchestrator
            .process_query(&long, SearchMode::All, &CancellationToken::new())
            .await;
        assert!(results.error.is_some());
    }

    #[tokio::test]
    async fn merges_local_and_remote_and_caches() {
        let orchestrator = SearchOrchestrator::new(test_config()).expect("orchestrator");
        let remote = Arc::new(StaticTool::new(
            "gov",
            SourceKind::RemoteTool(0),
            vec![hit(json!("shared"), 0.9), hit(json!("remote only"), 0.4)],
        ));
        orchestrator.registry().register(remote.clone());
        orchestrator.local().add_backend(Arc::new(StaticTool::new(
            "vectors",
            SourceKind::VectorIndex,
            vec![hit(json!("shared"), 0.6)],
        )));

        let cancel = CancellationToken::new();
        let first = orchestrator.process_query("q", SearchMode::All, &cancel).await;
        assert!(!first.cache_hit);
        assert_eq!(first.len(), 2);
        assert_eq!(first.results[0].content(), &json!("shared"));
        assert_eq!(first.results[0].sources().len(), 2);
        assert!((first.results[0].confidence() - 0.9).abs() < f64::EPSILON);
        assert!(first.sources_queried.contains(&SourceKind::VectorIndex));
        assert!(first.sources_queried.contains(&SourceKind::RemoteTool(0)));

        let second = orchestrator.process_query("q", SearchMode::All, &cancel).await;
        assert!(second.cache_hit);
        assert_eq!(second.results, first.results);
        assert_eq!(remote.call_count(), 1);
    }

    #[tokio::test]
    async fn failing_backend_is_left_out_of_sources() {
        let orchestrator = SearchOrchestrator::new(test_config()).expect("orchestrator");
        orchestrator.registry().register(Arc::new(StaticTool::failing(
            "down",
            SourceKind::RemoteTool(1),
            SearchError::BackendUnavailable("503".into()),
        )));
        orchestrator.local().add_backend(Arc::new(StaticTool::new(
            "docs",
            SourceKind::LocalFiles,
            vec![hit(json!("doc"), 0.8)],
        )));

        let results = orchestrator
            .process_query("q", SearchMode::All, &CancellationToken::new())
            .await;
        assert!(results.error.is_none());
        assert_eq!(results.len(), 1);
        assert_eq!(
            results.sources_queried.iter().copied().collect::<Vec<_>>(),
            vec![SourceKind::LocalFiles]
        );
    }

    #[tokio::test]
    async fn restricted_modes_skip_other_tier_and_cache() {
        let orchestrator = SearchOrchestrator::new(test_config()).expect("orchestrator");
        let remote = Arc::new(StaticTool::new(
            "gov",
            SourceKind::RemoteTool(0),
            vec![hit(json!("r"), 0.5)],
        ));
        let local = Arc::new(StaticTool::new(
            "graph",
            SourceKind::Graph,
            vec![hit(json!("l"), 0.5)],
        ));
        orchestrator.registry().register(remote.clone());
        orchestrator.local().add_backend(local.clone());
        let cancel = CancellationToken::new();

        let local_only = orchestrator.process_query("q", SearchMode::LocalOnly, &cancel).await;
        assert_eq!(local_only.len(), 1);
        assert_eq!(remote.call_count(), 0);

        let remote_only = orchestrator.process_query("q", SearchMode::RemoteOnly, &cancel).await;
        assert_eq!(remote_only.len(), 1);
        assert_eq!(local.call_count(), 1);

        let all = orchestrator.process_query("q", SearchMode::All, &cancel).await;
        assert!(!all.cache_hit);
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn sink_receives_merged_results_on_miss_only() {
        let sink = Arc::new(CountingSink::default());
        let orchestrator = SearchOrchestrator::new(test_config())
            .expect("orchestrator")
            .with_sink(sink.clone());
        orchestrator.local().add_backend(Arc::new(StaticTool::new(
            "vectors",
            SourceKind::VectorIndex,
            vec![hit(json!("a"), 0.5), hit(json!("a"), 0.7)],
        )));

        let cancel = CancellationToken::new();
        orchestrator.process_query("q", SearchMode::All, &cancel).await;
        orchestrator.process_query("q", SearchMode::All, &cancel).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn results_truncated_to_max() {
        let config = SearchConfig {
            max_results: 3,
            ..test_config()
        };
        let orchestrator = SearchOrchestrator::new(config).expect("orchestrator");
        let hits = (0..10).map(|i| hit(json!(i), 0.5)).collect();
        orchestrator
            .local()
            .add_backend(Arc::new(StaticTool::new("v", SourceKind::VectorIndex, hits)));
        let results = orchestrator
            .process_query("q", SearchMode::All, &CancellationToken::new())
            .await;
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_before_start_reports_error() {
        let orchestrator = SearchOrchestrator::new(test_config()).expect("orchestrator");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let results = orchestrator.process_query("q", SearchMode::All, &cancel).await;
        assert_eq!(results.error.as_deref(), Some("operation cancelled"));
    }

    /// Local backend that answers after `delay`.
    struct SlowTool {
        delay: std::time::Duration,
    }

    #[async_trait::async_trait]
    impl SearchTool for SlowTool {
        fn name(&self) -> &str {
            "slow-index"
        }
        fn source_kind(&self) -> SourceKind {
            SourceKind::VectorIndex
        }
        async fn execute(&self, _query: &str) -> Result<Vec<RawToolResult>, SearchError> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![hit(json!("slow"), 0.5)])
        }
        async fn health_check(&self) -> Result<crate::tool::ToolHealth, SearchError> {
            Ok(crate::tool::ToolHealth::Healthy)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_mid_fan_out_skips_sink_and_cache() {
        let sink = Arc::new(CountingSink::default());
        let orchestrator = SearchOrchestrator::new(test_config())
            .expect("orchestrator")
            .with_sink(sink.clone());
        orchestrator.registry().register(Arc::new(StaticTool::new(
            "gov",
            SourceKind::RemoteTool(0),
            vec![hit(json!("fast"), 0.9)],
        )));
        orchestrator.local().add_backend(Arc::new(SlowTool {
            delay: std::time::Duration::from_secs(5),
        }));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let cancelled = orchestrator.process_query("q", SearchMode::All, &cancel).await;
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(cancelled.error.as_deref(), Some("operation cancelled"));
        assert!(cancelled.is_empty());
        assert_eq!(sink.0.load(Ordering::SeqCst), 0);

        let fresh = orchestrator
            .process_query("q", SearchMode::All, &CancellationToken::new())
            .await;
        assert!(!fresh.cache_hit);
        assert!(fresh.error.is_none());
        assert_eq!(fresh.len(), 2);
        assert_eq!(sink.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn raw_hit_conversion() {
        let raw = RawToolResult::new(json!({"intelligence_type": "event", "what": "launch"}))
            .with_title("Launch")
            .with_url("https://example.org/launch");
        let result = to_search_result(raw, &SourceKind::ExternalFeed, "feed", 0.7).expect("converted");
        assert_eq!(result.intelligence_type(), IntelligenceType::Event);
        assert!((result.confidence() - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
        let source = &result.sources()[0];
        assert_eq!(source.title.as_deref(), Some("Launch"));
        assert!((source.reliability - 0.7).abs() < f64::EPSILON);

        assert!(to_search_result(
            RawToolResult::new(serde_json::Value::Null),
            &SourceKind::ExternalFeed,
            "feed",
            1.0
        )
        .is_none());
    }

    #[test]
    fn static_tool_is_a_search_tool() {
        fn takes_tool(_: &dyn SearchTool) {}
        takes_tool(&StaticTool::new("x", SourceKind::Graph, vec![]));
    }
}
