//! Cross-reference analysis: entities reported by overlapping sources.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub entity_a: String,
    pub entity_b: String,
    /// Jaccard similarity of the two entities' source sets.
    pub strength: f64,
    pub shared_sources: Vec<String>,
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Pairwise connections at or above `threshold`, strongest first.
pub fn find_connections(
    entity_sources: &BTreeMap<String, BTreeSet<String>>,
    threshold: f64,
) -> Vec<Connection> {
    let entries: Vec<_> = entity_sources.iter().collect();
    let mut connections = Vec::new();

    for (i, (name_a, sources_a)) in entries.iter().enumerate() {
        for (name_b, sources_b) in entries.iter().skip(i + 1) {
            let strength = jaccard(sources_a, sources_b);
            if strength > 0.0 && strength >= threshold {
                connections.push(Connection {
                    entity_a: (*name_a).clone(),
                    entity_b: (*name_b).clone(),
                    strength,
                    shared_sources: sources_a.intersection(sources_b).cloned().collect(),
                });
            }
        }
    }

    connections.sort_by(|a, b| {
        b.strength
            .partial_cmp(&a.strength)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    connections
}
