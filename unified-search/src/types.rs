//! Core data model: source provenance, search results and result sets.
//!
//! A [`SearchResult`] is created only in the orchestrator's fan-in step and
//! is immutable afterwards. Merging never edits a result in place; it builds
//! a new one whose `sources` is a superset of both operands.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::canonical::content_hash;
use crate::error::SearchError;

/// Which kind of backend produced a piece of content.
///
/// Serialised as `VECTOR_INDEX`, `GRAPH`, `LOCAL_FILES`, `REMOTE_TOOL_<n>`
/// or `EXTERNAL_FEED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceKind {
    VectorIndex,
    Graph,
    LocalFiles,
    /// The n-th registered remote tool.
    RemoteTool(u16),
    ExternalFeed,
}

impl SourceKind {
    /// Whether this kind belongs to the local knowledge tier.
    pub fn is_local(&self) -> bool {
        match self {
            Self::VectorIndex | Self::Graph | Self::LocalFiles => true,
            Self::RemoteTool(_) | Self::ExternalFeed => false,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VectorIndex => f.write_str("VECTOR_INDEX"),
            Self::Graph => f.write_str("GRAPH"),
            Self::LocalFiles => f.write_str("LOCAL_FILES"),
            Self::RemoteTool(n) => write!(f, "REMOTE_TOOL_{n}"),
            Self::ExternalFeed => f.write_str("EXTERNAL_FEED"),
        }
    }
}

impl FromStr for SourceKind {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VECTOR_INDEX" => Ok(Self::VectorIndex),
            "GRAPH" => Ok(Self::Graph),
            "LOCAL_FILES" => Ok(Self::LocalFiles),
            "EXTERNAL_FEED" => Ok(Self::ExternalFeed),
            other => other
                .strip_prefix("REMOTE_TOOL_")
                .and_then(|n| n.parse::<u16>().ok())
                .map(Self::RemoteTool)
                .ok_or_else(|| SearchError::Validation(format!("unknown source kind: {other}"))),
        }
    }
}

impl TryFrom<String> for SourceKind {
    type Error = SearchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        kind.to_string()
    }
}

/// Coarse classification of what a result describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntelligenceType {
    #[default]
    General,
    Entity,
    Event,
    Document,
    Relationship,
    Metric,
}

/// How confidences are combined when results with equal content merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeConfidence {
    /// Optimistic: a single strong corroborating source lifts the group.
    #[default]
    Max,
    /// Arithmetic mean over every contributing observation.
    Mean,
}

impl MergeConfidence {
    /// Combine a non-empty set of confidences. Returns 0 for an empty set.
    pub fn combine(&self, confidences: &[f64]) -> f64 {
        if confidences.is_empty() {
            return 0.0;
        }
        match self {
            Self::Max => confidences.iter().copied().fold(0.0, f64::max),
            Self::Mean => confidences.iter().sum::<f64>() / confidences.len() as f64,
        }
    }
}

/// Provenance for one observation of a piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_kind: SourceKind,
    pub source_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Source-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// How much the source itself is trusted, in `[0, 1]`.
    pub reliability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

impl SourceMetadata {
    /// Provenance with full confidence and reliability and no optional fields.
    pub fn new(source_kind: SourceKind, source_name: impl Into<String>) -> Self {
        Self {
            source_kind,
            source_name: source_name.into(),
            title: None,
            url: None,
            timestamp: None,
            confidence: 1.0,
            reliability: 1.0,
            version_id: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Clamped to `[0, 1]`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    /// Clamped to `[0, 1]`.
    #[must_use]
    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.reliability = clamp_unit(reliability);
        self
    }

    #[must_use]
    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    /// Two observations are the same source when kind, name and url agree.
    pub fn same_origin(&self, other: &SourceMetadata) -> bool {
        self.source_kind == other.source_kind
            && self.source_name == other.source_name
            && self.url == other.url
    }
}

/// One deduplicated piece of content with every source that reported it.
///
/// Fields are private: a result cannot be edited after construction. Use
/// [`SearchResult::merged_with`] to combine corroborating observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    content: serde_json::Value,
    sources: Vec<SourceMetadata>,
    confidence: f64,
    timestamp: DateTime<Utc>,
    intelligence_type: IntelligenceType,
    content_hash: String,
}

impl SearchResult {
    /// Build a result stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Validation`] if `sources` is empty.
    pub fn new(
        content: serde_json::Value,
        sources: Vec<SourceMetadata>,
        confidence: f64,
        intelligence_type: IntelligenceType,
    ) -> Result<Self, SearchError> {
        if sources.is_empty() {
            return Err(SearchError::Validation(
                "a search result needs at least one source".into(),
            ));
        }
        let content_hash = content_hash(&content);
        Ok(Self {
            content,
            sources,
            confidence: clamp_unit(confidence),
            timestamp: Utc::now(),
            intelligence_type,
            content_hash,
        })
    }

    /// Replace the timestamp while building (consumes the result).
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn content(&self) -> &serde_json::Value {
        &self.content
    }

    pub fn sources(&self) -> &[SourceMetadata] {
        &self.sources
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn intelligence_type(&self) -> IntelligenceType {
        self.intelligence_type
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Best-effort plain text view of the content, used for similarity checks.
    pub fn content_text(&self) -> String {
        match &self.content {
            serde_json::Value::String(s) => s.clone(),
            other => crate::canonical::canonical_json(other),
        }
    }

    /// Combine with a result carrying the same content.
    ///
    /// Sources are concatenated, skipping any observation already present
    /// from the same origin; confidence follows `rule`; the timestamp is the
    /// later of the two.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Validation`] when the content hashes differ.
    pub fn merged_with(
        &self,
        other: &SearchResult,
        rule: MergeConfidence,
    ) -> Result<SearchResult, SearchError> {
        if self.content_hash != other.content_hash {
            return Err(SearchError::Validation(
                "cannot merge results with different content".into(),
            ));
        }
        let mut sources = self.sources.clone();
        append_new_sources(&mut sources, &other.sources);
        Ok(SearchResult {
            content: self.content.clone(),
            sources,
            confidence: rule.combine(&[self.confidence, other.confidence]),
            timestamp: self.timestamp.max(other.timestamp),
            intelligence_type: self.intelligence_type,
            content_hash: self.content_hash.clone(),
        })
    }

    /// Build the merged representative of a group of equal-hash results.
    pub(crate) fn from_group(
        first: &SearchResult,
        sources: Vec<SourceMetadata>,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> SearchResult {
        SearchResult {
            content: first.content.clone(),
            sources,
            confidence: clamp_unit(confidence),
            timestamp,
            intelligence_type: first.intelligence_type,
            content_hash: first.content_hash.clone(),
        }
    }
}

/// Append every source in `incoming` whose origin is not yet in `sources`.
pub(crate) fn append_new_sources(sources: &mut Vec<SourceMetadata>, incoming: &[SourceMetadata]) {
    for source in incoming {
        if !sources.iter().any(|s| s.same_origin(source)) {
            sources.push(source.clone());
        }
    }
}

/// A complete answer to one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<SearchResult>,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    /// Wall-clock time of the whole query, serialised as seconds.
    #[serde(with = "duration_secs")]
    pub processing_time: Duration,
    /// Source kinds that actually responded.
    pub sources_queried: BTreeSet<SourceKind>,
    pub cache_hit: bool,
    /// Set when the query failed before fan-out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchResults {
    /// An empty result set for `query`.
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            query: query.into(),
            timestamp: Utc::now(),
            processing_time: Duration::ZERO,
            sources_queried: BTreeSet::new(),
            cache_hit: false,
            error: None,
        }
    }

    /// A failed query: empty results carrying the error message.
    pub fn failed(query: impl Into<String>, error: &SearchError, elapsed: Duration) -> Self {
        let mut results = Self::empty(query);
        results.processing_time = elapsed;
        results.error = Some(error.to_string());
        results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Merge two result sets produced for the same query.
    ///
    /// Results are deduplicated by content hash, `sources_queried` is the
    /// union, and `processing_time` is the larger of the two because the
    /// operands ran concurrently.
    pub fn merge_with(&self, other: &SearchResults, rule: MergeConfidence) -> SearchResults {
        let mut combined = self.results.clone();
        combined.extend(other.results.iter().cloned());
        SearchResults {
            results: crate::orchestrator::merge::merge_results(combined, rule),
            query: self.query.clone(),
            timestamp: self.timestamp.max(other.timestamp),
            processing_time: self.processing_time.max(other.processing_time),
            sources_queried: self
                .sources_queried
                .union(&other.sources_queried)
                .copied()
                .collect(),
            cache_hit: self.cache_hit && other.cache_hit,
            error: self.error.clone().or_else(|| other.error.clone()),
        }
    }
}

/// A raw hit as returned by a backend, before it becomes a [`SearchResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawToolResult {
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl RawToolResult {
    pub fn new(content: serde_json::Value) -> Self {
        Self {
            content,
            title: None,
            url: None,
            confidence: None,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Serialise a [`Duration`] as fractional seconds.
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(kind: SourceKind, name: &str) -> SourceMetadata {
        SourceMetadata::new(kind, name)
    }

    #[test]
    fn source_kind_display_and_parse() {
        assert_eq!(SourceKind::VectorIndex.to_string(), "VECTOR_INDEX");
        assert_eq!(SourceKind::RemoteTool(3).to_string(), "REMOTE_TOOL_3");
        assert_eq!(
            "REMOTE_TOOL_12".parse::<SourceKind>().expect("parse"),
            SourceKind::RemoteTool(12)
        );
        assert_eq!(
            "EXTERNAL_FEED".parse::<SourceKind>().expect("parse"),
            SourceKind::ExternalFeed
        );
        assert!("REMOTE_TOOL_x".parse::<SourceKind>().is_err());
        assert!("SOMETHING".parse::<SourceKind>().is_err());
    }

    #[test]
    fn source_kind_serialises_as_string() {
        let json = serde_json::to_string(&SourceKind::RemoteTool(1)).expect("serialize");
        assert_eq!(json, "\"REMOTE_TOOL_1\"");
        let kind: SourceKind = serde_json::from_str("\"GRAPH\"").expect("deserialize");
        assert_eq!(kind, SourceKind::Graph);
    }

    #[test]
    fn source_kind_locality() {
        assert!(SourceKind::VectorIndex.is_local());
        assert!(SourceKind::Graph.is_local());
        assert!(SourceKind::LocalFiles.is_local());
        assert!(!SourceKind::RemoteTool(0).is_local());
        assert!(!SourceKind::ExternalFeed.is_local());
    }

    #[test]
    fn source_metadata_clamps_scores() {
        let meta = source(SourceKind::Graph, "g")
            .with_confidence(1.7)
            .with_reliability(-0.2);
        assert!((meta.confidence - 1.0).abs() < f64::EPSILON);
        assert!(meta.reliability.abs() < f64::EPSILON);
    }

    #[test]
    fn search_result_requires_a_source() {
        let err = SearchResult::new(json!("x"), vec![], 0.5, IntelligenceType::General)
            .unwrap_err();
        assert!(err.to_string().contains("at least one source"));
    }

    #[test]
    fn content_hash_ignores_key_order() {
        let a = SearchResult::new(
            json!({"a": 1, "b": {"c": 2, "d": 3}}),
            vec![source(SourceKind::Graph, "g")],
            0.5,
            IntelligenceType::Entity,
        )
        .expect("result");
        let b = SearchResult::new(
            json!({"b": {"d": 3, "c": 2}, "a": 1}),
            vec![source(SourceKind::VectorIndex, "v")],
            0.5,
            IntelligenceType::Entity,
        )
        .expect("result");
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn merged_with_concatenates_sources_and_takes_max() {
        let a = SearchResult::new(
            json!("submarine"),
            vec![source(SourceKind::VectorIndex, "local")],
            0.8,
            IntelligenceType::General,
        )
        .expect("a");
        let b = SearchResult::new(
            json!("submarine"),
            vec![source(SourceKind::RemoteTool(0), "remote")],
            0.9,
            IntelligenceType::General,
        )
        .expect("b");
        let merged = a.merged_with(&b, MergeConfidence::Max).expect("merge");
        assert_eq!(merged.sources().len(), 2);
        assert!((merged.confidence() - 0.9).abs() < f64::EPSILON);
        // The operands are untouched.
        assert_eq!(a.sources().len(), 1);
    }

    #[test]
    fn merged_with_rejects_different_content() {
        let a = SearchResult::new(
            json!("a"),
            vec![source(SourceKind::Graph, "g")],
            0.5,
            IntelligenceType::General,
        )
        .expect("a");
        let b = SearchResult::new(
            json!("b"),
            vec![source(SourceKind::Graph, "g")],
            0.5,
            IntelligenceType::General,
        )
        .expect("b");
        assert!(a.merged_with(&b, MergeConfidence::Max).is_err());
    }

    #[test]
    fn merge_confidence_rules() {
        assert!((MergeConfidence::Max.combine(&[0.2, 0.9, 0.4]) - 0.9).abs() < f64::EPSILON);
        assert!((MergeConfidence::Mean.combine(&[0.2, 0.4]) - 0.3).abs() < 1e-9);
        assert!(MergeConfidence::Max.combine(&[]).abs() < f64::EPSILON);
    }

    #[test]
    fn search_results_serialises_processing_time_as_seconds() {
        let mut results = SearchResults::empty("q");
        results.processing_time = Duration::from_millis(1500);
        let value = serde_json::to_value(&results).expect("serialize");
        assert!((value["processing_time"].as_f64().expect("f64") - 1.5).abs() < 1e-9);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn merge_with_takes_max_processing_time_and_unions_sources() {
        let mut a = SearchResults::empty("q");
        a.processing_time = Duration::from_millis(300);
        a.sources_queried.insert(SourceKind::VectorIndex);
        let mut b = SearchResults::empty("q");
        b.processing_time = Duration::from_millis(700);
        b.sources_queried.insert(SourceKind::RemoteTool(0));

        let merged = a.merge_with(&b, MergeConfidence::Max);
        assert_eq!(merged.processing_time, Duration::from_millis(700));
        assert_eq!(merged.sources_queried.len(), 2);
    }

    #[test]
    fn raw_tool_result_deserialises_with_missing_optionals() {
        let raw: RawToolResult =
            serde_json::from_str(r#"{"content": {"name": "x"}}"#).expect("deserialize");
        assert!(raw.title.is_none());
        assert!(raw.confidence.is_none());
    }
}
