//! Remote tool reached over HTTP/JSON.
//!
//! Wire contract:
//!
//! - `POST {endpoint}/execute` with `{"query": "..."}` returns a JSON array of
//!   `{content, title?, url?, confidence?}`.
//! - `GET {endpoint}/health` returns `{"status": "healthy"|"degraded"|"unhealthy"}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::error::SearchError;
use crate::tool::{SearchTool, ToolHealth};
use crate::types::{RawToolResult, SourceKind};

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: ToolHealth,
}

/// A remote backend speaking the JSON tool contract.
#[derive(Debug, Clone)]
pub struct HttpTool {
    name: String,
    source_kind: SourceKind,
    endpoint: Url,
    reliability: f64,
    client: reqwest::Client,
}

impl HttpTool {
    /// Build a tool for `endpoint` whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Config`] if the endpoint is not a valid URL or
    /// the HTTP client cannot be constructed.
    pub fn new(
        name: impl Into<String>,
        endpoint: &str,
        source_kind: SourceKind,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|e| SearchError::Config(format!("invalid tool endpoint {endpoint}: {e}")))?;
        // `Url::join` replaces the last path segment unless the path ends in '/'.
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("unified-search/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SearchError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            source_kind,
            endpoint,
            reliability: 0.8,
            client,
        })
    }

    /// Override the trust placed in this tool's results.
    #[must_use]
    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = reliability.clamp(0.0, 1.0);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url_for(&self, path: &str) -> Result<Url, SearchError> {
        self.endpoint
            .join(path)
            .map_err(|e| SearchError::Config(format!("{}: bad endpoint path: {e}", self.name)))
    }

    fn map_transport_error(&self, error: &reqwest::Error) -> SearchError {
        if error.is_timeout() {
            SearchError::BackendTimeout(format!("{}: request timed out", self.name))
        } else {
            SearchError::BackendUnavailable(format!("{}: request failed: {error}", self.name))
        }
    }
}

#[async_trait]
impl SearchTool for HttpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    fn reliability(&self) -> f64 {
        self.reliability
    }

    async fn execute(&self, query: &str) -> Result<Vec<RawToolResult>, SearchError> {
        tracing::trace!(tool = %self.name, query, "remote tool query");

        let response = self
            .client
            .post(self.url_for("execute")?)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::BackendUnavailable(format!(
                "{}: HTTP {status}",
                self.name
            )));
        }

        let results: Vec<RawToolResult> = response.json().await.map_err(|e| {
            SearchError::BackendUnavailable(format!("{}: invalid response body: {e}", self.name))
        })?;

        tracing::debug!(tool = %self.name, count = results.len(), "remote tool returned results");
        Ok(results)
    }

    async fn health_check(&self) -> Result<ToolHealth, SearchError> {
        let response = self
            .client
            .get(self.url_for("health")?)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        if !response.status().is_success() {
            return Ok(ToolHealth::Unhealthy);
        }

        match response.json::<HealthBody>().await {
            Ok(body) => Ok(body.status),
            Err(e) => {
                tracing::debug!(tool = %self.name, error = %e, "unparseable health body");
                Ok(ToolHealth::Degraded)
            }
        }
    }
}
