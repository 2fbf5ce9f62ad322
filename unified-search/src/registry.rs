//! Remote tool discovery, health-gated selection and monitored execution.
//!
//! The registry owns the full set of registered tool sources. Discovery
//! checks every source's health endpoint concurrently and keeps the tools
//! that are usable; the surviving list is cached for `discovery_ttl` so
//! concurrent queries do not re-check. Every call routed through
//! [`ToolRegistry::execute_tool_with_monitoring`] feeds the shared
//! [`HealthMonitor`], which in turn excludes failing tools from discovery
//! until their cooldown passes or [`ToolRegistry::refresh`] is called.

use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::SearchError;
use crate::health::{HealthMonitor, HealthReport};
use crate::tool::SearchTool;
use crate::types::RawToolResult;

/// Cached outcome of the last discovery pass.
struct Discovery {
    at: Instant,
    tools: Vec<Arc<dyn SearchTool>>,
}

/// Registry of remote search tools.
pub struct ToolRegistry {
    sources: StdRwLock<Vec<Arc<dyn SearchTool>>>,
    discovered: RwLock<Option<Discovery>>,
    discovery_ttl: Duration,
    tool_timeout: Duration,
    monitor: Arc<HealthMonitor>,
}

impl ToolRegistry {
    pub fn new(discovery_ttl: Duration, tool_timeout: Duration) -> Self {
        Self::with_monitor(discovery_ttl, tool_timeout, Arc::new(HealthMonitor::new()))
    }

    /// Build a registry that reports into an existing monitor.
    pub fn with_monitor(
        discovery_ttl: Duration,
        tool_timeout: Duration,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            sources: StdRwLock::new(Vec::new()),
            discovered: RwLock::new(None),
            discovery_ttl,
            tool_timeout,
            monitor,
        }
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    fn sources(&self) -> Vec<Arc<dyn SearchTool>> {
        self.sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Names of every registered tool, in registration order.
    pub fn tool_names(&self) -> Vec<String> {
        self.sources().iter().map(|t| t.name().to_owned()).collect()
    }

    /// Add a tool source. A tool with the same name replaces the old one.
    ///
    /// Takes effect at the next discovery pass.
    pub fn register(&self, tool: Arc<dyn SearchTool>) {
        let mut sources = self.sources.write().unwrap_or_else(|e| e.into_inner());
        sources.retain(|t| t.name() != tool.name());
        tracing::info!(tool = tool.name(), kind = %tool.source_kind(), "tool registered");
        sources.push(tool);
    }

    /// Return the healthy tool set, probing sources if the cache is stale.
    pub async fn discover_tools(&self) -> Vec<Arc<dyn SearchTool>> {
        {
            let cached = self.discovered.read().await;
            if let Some(discovery) = cached.as_ref() {
                if discovery.at.elapsed() < self.discovery_ttl {
                    return discovery.tools.clone();
                }
            }
        }

        let mut cached = self.discovered.write().await;
        // Another query may have refreshed while we waited for the write lock.
        if let Some(discovery) = cached.as_ref() {
            if discovery.at.elapsed() < self.discovery_ttl {
                return discovery.tools.clone();
            }
        }

        let tools = self.check_sources().await;
        *cached = Some(Discovery {
            at: Instant::now(),
            tools: tools.clone(),
        });
        tools
    }

    async fn check_sources(&self) -> Vec<Arc<dyn SearchTool>> {
        let sources = self.sources();
        let checks = sources.iter().map(|tool| {
            let tool = Arc::clone(tool);
            let timeout = self.tool_timeout;
            async move {
                let outcome = tokio::time::timeout(timeout, tool.health_check()).await;
                (tool, outcome)
            }
        });

        let mut usable = Vec::new();
        for (tool, outcome) in futures::future::join_all(checks).await {
            match outcome {
                Ok(Ok(health)) if health.is_usable() => {
                    if self.monitor.is_eligible(tool.name()) {
                        usable.push(tool);
                    } else {
                        tracing::warn!(tool = tool.name(), "tool excluded: recent failure rate too high");
                    }
                }
                Ok(Ok(health)) => {
                    tracing::warn!(tool = tool.name(), ?health, "tool excluded: reports unhealthy");
                }
                Ok(Err(error)) => {
                    tracing::warn!(tool = tool.name(), %error, "tool health check failed");
                }
                Err(_) => {
                    tracing::warn!(tool = tool.name(), "tool health check timed out");
                }
            }
        }

        tracing::debug!(registered = sources.len(), usable = usable.len(), "tool discovery complete");
        usable
    }

    /// Drop the cached discovery so the next call re-checks, and give every
    /// unhealthy tool one trial call.
    pub async fn refresh(&self) {
        self.monitor.allow_retry();
        *self.discovered.write().await = None;
    }

    /// Run `tool` once, bounded by the per-tool timeout, recording the outcome.
    ///
    /// # Errors
    ///
    /// Returns the tool's own error, or [`SearchError::BackendTimeout`] when
    /// the call exceeds the per-tool timeout.
    pub async fn execute_tool_with_monitoring(
        &self,
        tool: &dyn SearchTool,
        query: &str,
    ) -> Result<Vec<RawToolResult>, SearchError> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.tool_timeout, tool.execute(query)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SearchError::BackendTimeout(format!(
                "{} exceeded {}s",
                tool.name(),
                self.tool_timeout.as_secs_f64()
            ))),
        };
        let elapsed = started.elapsed();

        match &outcome {
            Ok(results) => {
                self.monitor.record_success(tool.name(), elapsed);
                tracing::debug!(tool = tool.name(), count = results.len(), "tool call succeeded");
            }
            Err(error) => {
                self.monitor
                    .record_failure(tool.name(), elapsed, &error.to_string());
            }
        }
        outcome
    }

    /// Health of every registered tool.
    pub fn health_report(&self) -> HealthReport {
        self.monitor.report(&self.tool_names())
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tool_names())
            .field("discovery_ttl", &self.discovery_ttl)
            .field("tool_timeout", &self.tool_timeout)
            .finish_non_exhaustive()
    }
}
