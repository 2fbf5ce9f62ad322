//! Result merging by content hash.
//!
//! Results that carry identical content (same canonical-JSON hash) collapse
//! into one result whose sources are the union of the group's sources. The
//! merged list is ranked by descending `(confidence, timestamp)`; ties keep
//! discovery order.
//!
//! With [`MergeConfidence::Max`] the merge is idempotent, commutative and
//! associative over the hash-keyed result set.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{append_new_sources, MergeConfidence, SearchResult, SourceMetadata};

struct Group<'a> {
    first: &'a SearchResult,
    sources: Vec<SourceMetadata>,
    confidences: Vec<f64>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Deduplicate and rank `results`.
pub fn merge_results(results: Vec<SearchResult>, rule: MergeConfidence) -> Vec<SearchResult> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<Group<'_>> = Vec::new();

    for result in &results {
        match index.get(result.content_hash()) {
            Some(&i) => {
                let group = &mut groups[i];
                append_new_sources(&mut group.sources, result.sources());
                group.confidences.push(result.confidence());
                group.timestamp = group.timestamp.max(result.timestamp());
            }
            None => {
                index.insert(result.content_hash(), groups.len());
                let mut sources = Vec::with_capacity(result.sources().len());
                append_new_sources(&mut sources, result.sources());
                groups.push(Group {
                    first: result,
                    sources,
                    confidences: vec![result.confidence()],
                    timestamp: result.timestamp(),
                });
            }
        }
    }

    let mut merged: Vec<SearchResult> = groups
        .into_iter()
        .map(|g| SearchResult::from_group(g.first, g.sources, rule.combine(&g.confidences), g.timestamp))
        .collect();

    rank(&mut merged);
    merged
}

/// Stable sort by descending `(confidence, timestamp)`.
pub fn rank(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.confidence()
            .partial_cmp(&a.confidence())
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.timestamp().cmp(&a.timestamp()))
    });
}
