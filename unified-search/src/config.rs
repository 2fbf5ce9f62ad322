//! Search configuration with sensible defaults.
//!
//! [`SearchConfig`] controls caching, tool discovery, retry policy, fan-out
//! width and result shaping. It is embedded in the service's TOML config, so
//! every field has a default and missing keys fall back to it.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::retry::RetryConfig;
use crate::types::MergeConfidence;

/// Configuration for the search orchestrator and its primitives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// How long full result sets stay in the query cache, in seconds.
    pub cache_ttl_seconds: u64,
    /// Upper bound on cached result sets.
    pub cache_max_entries: u64,
    /// How long a discovered tool list is reused before re-probing, in seconds.
    pub discovery_ttl_seconds: u64,
    /// Per-call timeout for a single backend call or health check, in seconds.
    pub tool_timeout_seconds: u64,
    /// Seconds after its last failure before an unhealthy tool gets a trial call.
    pub health_cooldown_seconds: u64,
    /// Retries after the first attempt of a remote tool call.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds; doubles on each retry.
    pub base_delay_ms: u64,
    /// Maximum number of concurrently running sub-queries per fan-out.
    pub max_concurrency: usize,
    /// Maximum number of merged results returned per query.
    pub max_results: usize,
    /// Longest accepted query, in characters.
    pub max_query_len: usize,
    /// How confidence is combined when results are merged.
    pub merge_confidence: MergeConfidence,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 3600,
            cache_max_entries: 1000,
            discovery_ttl_seconds: 300,
            tool_timeout_seconds: 10,
            health_cooldown_seconds: 60,
            max_retries: 2,
            base_delay_ms: 1000,
            max_concurrency: 10,
            max_results: 50,
            max_query_len: 1000,
            merge_confidence: MergeConfidence::Max,
        }
    }
}

impl SearchConfig {
    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `tool_timeout_seconds` must be greater than 0
    /// - `max_concurrency` must be greater than 0
    /// - `max_results` must be greater than 0
    /// - `max_query_len` must be greater than 0
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.tool_timeout_seconds == 0 {
            return Err(SearchError::Config(
                "tool_timeout_seconds must be greater than 0".into(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(SearchError::Config(
                "max_concurrency must be greater than 0".into(),
            ));
        }
        if self.max_results == 0 {
            return Err(SearchError::Config(
                "max_results must be greater than 0".into(),
            ));
        }
        if self.max_query_len == 0 {
            return Err(SearchError::Config(
                "max_query_len must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Retry policy applied to every remote tool call.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_seconds)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }

    pub fn health_cooldown(&self) -> Duration {
        Duration::from_secs(self.health_cooldown_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sensible_values() {
        let config = SearchConfig::default();
        assert_eq!(config.cache_ttl_seconds, 3600);
        assert_eq!(config.discovery_ttl_seconds, 300);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.merge_confidence, MergeConfidence::Max);
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(SearchConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = SearchConfig {
            tool_timeout_seconds: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tool_timeout_seconds"));
    }

    #[test]
    fn zero_concurrency_rejected() {
        let config = SearchConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }

    #[test]
    fn zero_max_results_rejected() {
        let config = SearchConfig {
            max_results: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn retry_config_derived_from_fields() {
        let config = SearchConfig {
            max_retries: 4,
            base_delay_ms: 250,
            ..Default::default()
        };
        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 4);
        assert_eq!(retry.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"max_results": 5}"#).expect("deserialize");
        assert_eq!(config.max_results, 5);
        assert_eq!(config.cache_ttl_seconds, 3600);
    }
}
