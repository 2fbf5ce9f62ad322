//! In-memory stores, for tests and `storage.in_memory = true`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::extract::ExtractedGraph;
use super::{
    query_terms, term_score, text_similarity, token_bounds, token_count, ContentStore, Entity, GraphStore,
    IntelligenceRecord, Relationship,
};
use crate::error::{IntelError, Result};

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct InMemoryContentStore {
    records: Mutex<Vec<IntelligenceRecord>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        guard(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for InMemoryContentStore {
    fn store(&self, record: &IntelligenceRecord) -> Result<()> {
        let mut records = guard(&self.records);
        if records.iter().any(|r| r.id == record.id) {
            return Err(IntelError::StorageWriteFailure(format!(
                "record {} already stored",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut records = guard(&self.records);
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    fn find_similar(&self, text: &str, threshold: f64) -> Result<Option<String>> {
        let (lo, hi) = token_bounds(token_count(text), threshold);
        let records = guard(&self.records);
        Ok(records
            .iter()
            .filter(|r| (lo..=hi).contains(&token_count(&r.text)))
            .find(|r| text_similarity(text, &r.text) >= threshold)
            .map(|r| r.id.clone()))
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<IntelligenceRecord>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let records = guard(&self.records);
        let mut scored: Vec<(f64, &IntelligenceRecord)> = records
            .iter()
            .map(|r| (term_score(&r.text, &terms) * r.confidence, r))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
        });
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn get(&self, id: &str) -> Result<Option<IntelligenceRecord>> {
        Ok(guard(&self.records).iter().find(|r| r.id == id).cloned())
    }

    fn list_records(&self) -> Result<Vec<IntelligenceRecord>> {
        let mut records = guard(&self.records).clone();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}

#[derive(Default)]
struct Graph {
    entities: BTreeMap<String, String>,
    relationships: BTreeSet<(String, String, String, String)>,
    mentions: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    graph: Mutex<Graph>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn write(&self, record: &IntelligenceRecord, graph: &ExtractedGraph) -> Result<()> {
        let mut g = guard(&self.graph);
        for entity in &graph.entities {
            g.entities
                .entry(entity.name.clone())
                .or_insert_with(|| entity.kind.clone());
            let sources = g.mentions.entry(entity.name.clone()).or_default();
            for source in &record.sources {
                sources.insert(source.source_name.clone());
            }
        }
        for rel in &graph.relationships {
            g.relationships.insert((
                rel.from.clone(),
                rel.to.clone(),
                rel.kind.clone(),
                rel.record_id.clone(),
            ));
        }
        Ok(())
    }

    fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>> {
        let needle = query.trim().to_lowercase();
        let g = guard(&self.graph);
        let mut found: Vec<Entity> = g
            .entities
            .iter()
            .filter(|(name, _)| name.to_lowercase().contains(&needle))
            .map(|(name, kind)| Entity {
                name: name.clone(),
                kind: kind.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.name.len().cmp(&b.name.len()).then_with(|| a.name.cmp(&b.name)));
        found.truncate(limit);
        Ok(found)
    }

    fn relationships_for(&self, entity: &str) -> Result<Vec<Relationship>> {
        let g = guard(&self.graph);
        let mut rels: Vec<Relationship> = g
            .relationships
            .iter()
            .filter(|(from, to, _, _)| from == entity || to == entity)
            .map(|(from, to, kind, record_id)| Relationship {
                from: from.clone(),
                to: to.clone(),
                kind: kind.clone(),
                record_id: record_id.clone(),
            })
            .collect();
        rels.sort_by(|a, b| {
            (&a.record_id, &a.from, &a.to).cmp(&(&b.record_id, &b.from, &b.to))
        });
        Ok(rels)
    }

    fn entity_sources(&self, entity: &str) -> Result<Vec<String>> {
        Ok(guard(&self.graph)
            .mentions
            .get(entity)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn entities(&self) -> Result<Vec<Entity>> {
        Ok(guard(&self.graph)
            .entities
            .iter()
            .map(|(name, kind)| Entity {
                name: name.clone(),
                kind: kind.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::extract_graph;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use unified_search::{IntelligenceType, SourceKind, SourceMetadata};

    fn record(id: &str, text: &str, source: &str, age_minutes: i64) -> IntelligenceRecord {
        IntelligenceRecord {
            id: id.to_owned(),
            content_hash: blake3::hash(text.as_bytes()).to_hex().to_string(),
            content: json!(text),
            text: text.to_owned(),
            sources: vec![SourceMetadata::new(SourceKind::LocalFiles, source)],
            confidence: 0.5,
            intelligence_type: IntelligenceType::General,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[test]
    fn content_store_behaves_like_sqlite() {
        let store = InMemoryContentStore::new();
        assert!(store.is_empty());
        store.store(&record("b", "fleet expansion announced", "s1", 1)).expect("store");
        store.store(&record("a", "fleet budget cut", "s2", 5)).expect("store");

        assert!(store.store(&record("a", "x", "s", 0)).is_err());
        assert_eq!(store.len(), 2);

        let listed = store.list_records().expect("list");
        assert_eq!(listed[0].id, "a");

        let hits = store.search("fleet budget", 10).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");

        assert_eq!(
            store.find_similar("fleet budget cut", 0.95).expect("similar").as_deref(),
            Some("a")
        );
        assert!(store.get("zzz").expect("get").is_none());

        assert!(store.delete("a").expect("delete"));
        assert!(!store.delete("a").expect("delete again"));
        assert!(store.find_similar("fleet budget cut", 0.95).expect("similar").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn graph_store_tracks_sources_per_entity() {
        let graph = InMemoryGraphStore::new();
        let r1 = record("r1", "Talks between Royal Navy and BAE Systems.", "gov", 0);
        let r2 = record("r2", "Budget for Royal Navy rises.", "news", 0);
        graph.write(&r1, &extract_graph(&r1)).expect("write");
        graph.write(&r2, &extract_graph(&r2)).expect("write");

        assert_eq!(
            graph.entity_sources("Royal Navy").expect("sources"),
            vec!["gov".to_string(), "news".to_string()]
        );
        assert_eq!(
            graph.entity_sources("BAE Systems").expect("sources"),
            vec!["gov".to_string()]
        );
        assert_eq!(graph.relationships_for("Royal Navy").expect("rels").len(), 1);
        assert_eq!(graph.search_entities("SYSTEMS", 5).expect("search").len(), 1);
    }
}
