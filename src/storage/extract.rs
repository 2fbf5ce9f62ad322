//! Entity and relationship extraction from record content.
//!
//! Structured content may declare its graph explicitly:
//!
//! ```json
//! {
//!   "entities": ["Navy", {"name": "SSN-AUKUS", "type": "programme"}],
//!   "relationships": [{"from": "Navy", "to": "SSN-AUKUS", "type": "acquires"}]
//! }
//! ```
//!
//! Otherwise entities are runs of capitalised words found in the text and
//! every pair mentioned together gets a `co_mentioned` relationship.

use std::collections::BTreeSet;

use serde_json::Value;

use super::{Entity, IntelligenceRecord, Relationship};

/// Upper bound on heuristic entities per record, to keep the pairwise
/// relationship count small.
const MAX_HEURISTIC_ENTITIES: usize = 12;

const DETERMINERS: &[&str] = &["The", "A", "An", "This", "That", "These", "Those"];

/// Entities and relationships found in one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedGraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl ExtractedGraph {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Extract the graph for `record`.
pub fn extract_graph(record: &IntelligenceRecord) -> ExtractedGraph {
    if let Some(graph) = explicit_graph(&record.content, &record.id) {
        return graph;
    }

    let names = capitalised_runs(&record.text);
    let entities: Vec<Entity> = names
        .iter()
        .map(|name| Entity {
            name: name.clone(),
            kind: "mention".to_owned(),
        })
        .collect();

    let mut relationships = Vec::new();
    for (i, a) in names.iter().enumerate() {
        for b in names.iter().skip(i + 1) {
            relationships.push(Relationship {
                from: a.clone(),
                to: b.clone(),
                kind: "co_mentioned".to_owned(),
                record_id: record.id.clone(),
            });
        }
    }

    ExtractedGraph {
        entities,
        relationships,
    }
}

fn explicit_graph(content: &Value, record_id: &str) -> Option<ExtractedGraph> {
    let declared = content.get("entities")?.as_array()?;

    let mut entities = Vec::new();
    let mut seen = BTreeSet::new();
    for item in declared {
        let entity = match item {
            Value::String(name) => Entity {
                name: name.clone(),
                kind: "entity".to_owned(),
            },
            Value::Object(map) => {
                let Some(name) = map.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let kind = map
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("entity");
                Entity {
                    name: name.to_owned(),
                    kind: kind.to_owned(),
                }
            }
            _ => continue,
        };
        if seen.insert(entity.name.clone()) {
            entities.push(entity);
        }
    }

    let relationships = content
        .get("relationships")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let from = item.get("from")?.as_str()?;
                    let to = item.get("to")?.as_str()?;
                    let kind = item.get("type").and_then(Value::as_str).unwrap_or("related_to");
                    Some(Relationship {
                        from: from.to_owned(),
                        to: to.to_owned(),
                        kind: kind.to_owned(),
                        record_id: record_id.to_owned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ExtractedGraph {
        entities,
        relationships,
    })
}

fn flush_run(current: &mut Vec<&str>, starts_sentence: bool, found: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    if !(current.len() == 1 && starts_sentence) {
        let name = current.join(" ");
        if !found.contains(&name) {
            found.push(name);
        }
    }
    current.clear();
}

/// Distinct runs of capitalised words, in order of first appearance.
///
/// A single capitalised word directly after a sentence boundary is skipped,
/// since it is usually just the start of a sentence.
fn capitalised_runs(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut run_starts_sentence = true;
    let mut at_sentence_start = true;

    for raw in text.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
        let capitalised = word.len() > 1
            && word.chars().next().is_some_and(char::is_uppercase)
            && !DETERMINERS.contains(&word);

        if capitalised {
            if current.is_empty() {
                run_starts_sentence = at_sentence_start;
            }
            current.push(word);
        } else {
            flush_run(&mut current, run_starts_sentence, &mut found);
        }

        let ends_sentence = raw.ends_with(['.', '!', '?']);
        if ends_sentence || raw.ends_with([',', ';', ':']) {
            flush_run(&mut current, run_starts_sentence, &mut found);
        }
        at_sentence_start = ends_sentence;
    }
    flush_run(&mut current, run_starts_sentence, &mut found);

    found.truncate(MAX_HEURISTIC_ENTITIES);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use unified_search::IntelligenceType;

    fn record(content: Value) -> IntelligenceRecord {
        let text = match &content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        IntelligenceRecord {
            id: "rec-1".into(),
            content_hash: "h".into(),
            content,
            text,
            sources: Vec::new(),
            confidence: 0.5,
            intelligence_type: IntelligenceType::General,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn explicit_entities_and_relationships() {
        let graph = extract_graph(&record(json!({
            "entities": ["Navy", {"name": "SSN-AUKUS", "type": "programme"}, "Navy", 42],
            "relationships": [
                {"from": "Navy", "to": "SSN-AUKUS", "type": "acquires"},
                {"from": "Navy"}
            ]
        })));
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.entities[1].kind, "programme");
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.relationships[0].kind, "acquires");
        assert_eq!(graph.relationships[0].record_id, "rec-1");
    }

    #[test]
    fn heuristic_runs_and_pairs() {
        let graph = extract_graph(&record(json!(
            "The Royal Navy signed with BAE Systems. Budget approved by Parliament."
        )));
        let names: Vec<_> = graph.entities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Royal Navy", "BAE Systems", "Parliament"]);
        assert_eq!(graph.relationships.len(), 3);
        assert!(graph.relationships.iter().all(|r| r.kind == "co_mentioned"));
    }

    #[test]
    fn plain_lowercase_text_has_no_entities() {
        let graph = extract_graph(&record(json!("nothing notable here")));
        assert!(graph.is_empty());
        assert!(graph.relationships.is_empty());
    }
}
