//! Persistent intelligence storage.
//!
//! Search results handed to [`IntelligenceStorageManager`] become
//! [`IntelligenceRecord`]s in a [`ContentStore`] plus entities and
//! relationships in a [`GraphStore`]. Both stores are traits with SQLite and
//! in-memory implementations; the manager depends only on the traits.

pub mod extract;
pub mod manager;
pub mod memory;
mod schema;
pub mod search_tools;
pub mod sqlite;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unified_search::{IntelligenceType, SearchResult, SourceMetadata};

use crate::error::Result;

pub use extract::{extract_graph, ExtractedGraph};
pub use manager::{IntelligenceStorageManager, OperationStatus, StorageMetrics};
pub use memory::{InMemoryContentStore, InMemoryGraphStore};
pub use search_tools::{GraphSearchTool, StoreSearchTool};
pub use sqlite::{SqliteContentStore, SqliteGraphStore};

/// Identifier of one queued storage operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored piece of intelligence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceRecord {
    pub id: String,
    pub content_hash: String,
    pub content: serde_json::Value,
    /// Plain-text view of `content`, used for search and similarity.
    pub text: String,
    pub sources: Vec<SourceMetadata>,
    pub confidence: f64,
    pub intelligence_type: IntelligenceType,
    pub created_at: DateTime<Utc>,
}

impl IntelligenceRecord {
    pub fn from_result(result: &SearchResult) -> Self {
        Self {
            id: format!("rec-{}", uuid::Uuid::new_v4()),
            content_hash: result.content_hash().to_owned(),
            content: result.content().clone(),
            text: result.content_text(),
            sources: result.sources().to_vec(),
            confidence: result.confidence(),
            intelligence_type: result.intelligence_type(),
            created_at: result.timestamp(),
        }
    }

    /// Names of every source that reported this record.
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.source_name.as_str()).collect()
    }

    /// Mean reliability of the record's sources.
    pub fn mean_reliability(&self) -> f64 {
        if self.sources.is_empty() {
            return 0.0;
        }
        self.sources.iter().map(|s| s.reliability).sum::<f64>() / self.sources.len() as f64
    }
}

/// A named thing mentioned by stored intelligence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: String,
}

/// A directed edge between two entities, attributed to a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    pub kind: String,
    pub record_id: String,
}

/// Stores records and answers text queries over them.
pub trait ContentStore: Send + Sync {
    fn store(&self, record: &IntelligenceRecord) -> Result<()>;

    /// Remove a record. Returns whether it existed.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Id of a stored record whose text similarity to `text` is at least
    /// `threshold`, if any. Only records whose token count is within
    /// [`token_bounds`] are compared.
    fn find_similar(&self, text: &str, threshold: f64) -> Result<Option<String>>;

    /// Records containing every query term, best first.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<IntelligenceRecord>>;

    fn get(&self, id: &str) -> Result<Option<IntelligenceRecord>>;

    /// Every record, oldest first.
    fn list_records(&self) -> Result<Vec<IntelligenceRecord>>;

    /// Cheap reachability check.
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Stores entities, relationships and which sources mention each entity.
pub trait GraphStore: Send + Sync {
    /// Persist the graph extracted from one record.
    fn write(&self, record: &IntelligenceRecord, graph: &ExtractedGraph) -> Result<()>;

    /// Entities whose name contains `query` (case-insensitive).
    fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>>;

    /// Relationships touching `entity` in either direction.
    fn relationships_for(&self, entity: &str) -> Result<Vec<Relationship>>;

    /// Distinct source names of records mentioning `entity`.
    fn entity_sources(&self, entity: &str) -> Result<Vec<String>>;

    fn entities(&self) -> Result<Vec<Entity>>;

    /// Cheap reachability check.
    fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Lower-cased whitespace-separated query terms.
pub(crate) fn query_terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Share of `terms` present in `text`; 0 if any term is missing.
pub(crate) fn term_score(text: &str, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = terms.iter().filter(|t| lower.contains(t.as_str())).count();
    if hits < terms.len() {
        return 0.0;
    }
    let occurrences: usize = terms.iter().map(|t| lower.matches(t.as_str()).count()).sum();
    (occurrences as f64 / (occurrences as f64 + 1.0)).clamp(0.0, 1.0)
}

/// Word-level similarity ratio in `[0, 1]`.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    f64::from(similar::TextDiff::from_words(a, b).ratio())
}

/// Number of diff tokens in `text`: alternating runs of whitespace and
/// non-whitespace, as [`text_similarity`] splits it.
pub fn token_count(text: &str) -> usize {
    let mut count = 0;
    let mut prev = None;
    for c in text.chars() {
        let ws = c.is_whitespace();
        if prev != Some(ws) {
            count += 1;
            prev = Some(ws);
        }
    }
    count
}

/// Inclusive token-count range a stored text must fall in to reach
/// `threshold` against a text of `tokens` tokens.
///
/// The ratio is `2 * matches / (a + b)` and matches cannot exceed
/// `min(a, b)`, so lengths too far apart can be skipped without diffing.
pub fn token_bounds(tokens: usize, threshold: f64) -> (usize, usize) {
    if threshold <= 0.0 {
        return (0, usize::MAX);
    }
    let t = threshold.min(1.0);
    let n = tokens as f64;
    let lo = (n * t / (2.0 - t)).floor();
    let hi = (n * (2.0 - t) / t).ceil();
    (lo as usize, hi as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use unified_search::SourceKind;

    #[test]
    fn record_from_result_copies_fields() {
        let result = SearchResult::new(
            json!({"title": "Fleet"}),
            vec![
                SourceMetadata::new(SourceKind::Graph, "g").with_reliability(0.6),
                SourceMetadata::new(SourceKind::RemoteTool(0), "r").with_reliability(1.0),
            ],
            0.7,
            IntelligenceType::Document,
        )
        .expect("result");
        let record = IntelligenceRecord::from_result(&result);
        assert_eq!(record.content_hash, result.content_hash());
        assert_eq!(record.source_names(), vec!["g", "r"]);
        assert!((record.mean_reliability() - 0.8).abs() < 1e-9);
        assert!(record.id.starts_with("rec-"));
    }

    #[test]
    fn similarity_bounds() {
        assert!((text_similarity("same text", "same text") - 1.0).abs() < f64::EPSILON);
        assert!(text_similarity("alpha beta gamma", "delta epsilon zeta") < 0.5);
        let near = text_similarity(
            "the fleet acquired twelve submarines in march",
            "the fleet acquired twelve submarines in april",
        );
        assert!(near > 0.8 && near < 1.0);
    }

    #[test]
    fn token_bounds_never_exclude_a_qualifying_length() {
        assert_eq!(token_count("the  fleet sailed"), 5);
        assert_eq!(token_count(" lead"), 2);
        assert_eq!(token_count(""), 0);

        let (lo, hi) = token_bounds(100, 0.9);
        assert!(lo <= 81 && lo >= 80, "{lo}");
        assert!(hi >= 122 && hi <= 123, "{hi}");
        assert_eq!(token_bounds(7, 1.0), (7, 7));
        assert_eq!(token_bounds(7, 0.0), (0, usize::MAX));

        let base = "the fleet acquired twelve submarines in march";
        let longer = "the fleet acquired twelve submarines in march this year";
        let (lo, hi) = token_bounds(token_count(base), 0.85);
        let n = token_count(longer);
        assert!(text_similarity(base, longer) >= 0.85);
        assert!(lo <= n && n <= hi);
    }

    #[test]
    fn term_score_requires_all_terms() {
        let terms = query_terms("Fleet submarine");
        assert!(term_score("fleet only", &terms).abs() < f64::EPSILON);
        assert!(term_score("Submarine FLEET", &terms) > 0.0);
        assert!(term_score("anything", &[]).abs() < f64::EPSILON);
    }

    #[test]
    fn operation_ids_are_unique() {
        assert_ne!(OperationId::new(), OperationId::new());
    }
}
