//! Pattern detection over a set of records.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::json;

use crate::storage::{text_similarity, IntelligenceRecord};

/// Coefficient of variation below which intervals count as regular.
const REGULARITY_CV: f64 = 0.2;
/// Share of records a keyword must appear in.
const KEYWORD_SHARE: f64 = 0.3;
/// Share of records one source must account for.
const SOURCE_SHARE: f64 = 0.5;
/// Text similarity at which two records count as the same content.
const NEAR_IDENTICAL: f64 = 0.9;
const MAX_KEYWORD_PATTERNS: usize = 10;
const MIN_KEYWORD_LEN: usize = 4;

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "from", "have", "into", "more", "most",
    "only", "over", "said", "some", "than", "that", "their", "them", "then", "there", "these",
    "they", "this", "those", "very", "were", "what", "when", "where", "which", "while", "will",
    "with", "would",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    TemporalRegularity,
    ContentFrequency,
    KeywordFrequency,
    SourceConcentration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub description: String,
    pub confidence: f64,
    pub record_ids: Vec<String>,
    pub details: serde_json::Value,
}

/// Every pattern with confidence at or above `threshold`, strongest first.
pub fn identify_patterns(
    records: &[IntelligenceRecord],
    threshold: f64,
    min_occurrences: usize,
) -> Vec<Pattern> {
    let mut patterns = Vec::new();
    patterns.extend(temporal_regularity(records));
    patterns.extend(content_frequency(records, min_occurrences));
    patterns.extend(keyword_frequency(records));
    patterns.extend(source_concentration(records));

    patterns.retain(|p| p.confidence >= threshold);
    patterns.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    patterns
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Records arriving at a steady cadence: interval std-dev under 20% of the
/// mean interval. Needs at least three records.
pub fn temporal_regularity(records: &[IntelligenceRecord]) -> Option<Pattern> {
    if records.len() < 3 {
        return None;
    }
    let mut sorted: Vec<&IntelligenceRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.created_at);

    let intervals: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1].created_at - w[0].created_at).num_milliseconds() as f64 / 1000.0)
        .collect();
    let (mean, std) = mean_and_std(&intervals);
    if mean <= 0.0 {
        return None;
    }
    let cv = std / mean;
    if cv >= REGULARITY_CV {
        return None;
    }

    Some(Pattern {
        kind: PatternKind::TemporalRegularity,
        description: format!("records arrive roughly every {}", human_interval(mean)),
        confidence: (1.0 - cv).clamp(0.0, 1.0),
        record_ids: sorted.iter().map(|r| r.id.clone()).collect(),
        details: json!({
            "mean_interval_seconds": mean,
            "interval_std_dev_seconds": std,
        }),
    })
}

fn human_interval(secs: f64) -> String {
    if secs >= 86_400.0 {
        format!("{:.1} days", secs / 86_400.0)
    } else if secs >= 3_600.0 {
        format!("{:.1} hours", secs / 3_600.0)
    } else {
        format!("{secs:.0} seconds")
    }
}

/// Near-identical content reported at least `min_occurrences` times.
pub fn content_frequency(records: &[IntelligenceRecord], min_occurrences: usize) -> Vec<Pattern> {
    let mut clusters: Vec<Vec<&IntelligenceRecord>> = Vec::new();
    for record in records {
        match clusters
            .iter_mut()
            .find(|c| text_similarity(&c[0].text, &record.text) >= NEAR_IDENTICAL)
        {
            Some(cluster) => cluster.push(record),
            None => clusters.push(vec![record]),
        }
    }

    clusters
        .into_iter()
        .filter(|c| c.len() >= min_occurrences.max(2))
        .map(|c| {
            let count = c.len();
            let preview: String = c[0].text.chars().take(80).collect();
            Pattern {
                kind: PatternKind::ContentFrequency,
                description: format!("same content reported {count} times: {preview}"),
                // Each further repeat halves the remaining doubt.
                confidence: 1.0 - 0.5_f64.powi(i32::try_from(count - 1).unwrap_or(i32::MAX)),
                record_ids: c.iter().map(|r| r.id.clone()).collect(),
                details: json!({ "occurrences": count }),
            }
        })
        .collect()
}

fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN && w.chars().all(char::is_alphabetic))
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Terms found in at least 30% of records. Confidence starts at 0.8 at that
/// floor and grows with the share.
pub fn keyword_frequency(records: &[IntelligenceRecord]) -> Vec<Pattern> {
    if records.len() < 2 {
        return Vec::new();
    }
    let mut holders: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for record in records {
        for word in keywords(&record.text) {
            holders.entry(word).or_default().push(&record.id);
        }
    }

    let total = records.len() as f64;
    let mut patterns: Vec<Pattern> = holders
        .into_iter()
        .filter_map(|(word, ids)| {
            let share = ids.len() as f64 / total;
            (share >= KEYWORD_SHARE && ids.len() >= 2).then(|| Pattern {
                kind: PatternKind::KeywordFrequency,
                description: format!("'{word}' appears in {:.0}% of records", share * 100.0),
                confidence: (0.5 + share).min(1.0),
                record_ids: ids.iter().map(|s| (*s).to_owned()).collect(),
                details: json!({ "keyword": word, "share": share }),
            })
        })
        .collect();
    patterns.sort_by(|a, b| {
        b.record_ids
            .len()
            .cmp(&a.record_ids.len())
            .then_with(|| a.description.cmp(&b.description))
    });
    patterns.truncate(MAX_KEYWORD_PATTERNS);
    patterns
}

/// One source accounting for at least half of the records.
pub fn source_concentration(records: &[IntelligenceRecord]) -> Vec<Pattern> {
    if records.is_empty() {
        return Vec::new();
    }
    let mut by_source: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for record in records {
        let names: BTreeSet<&str> = record.source_names().into_iter().collect();
        for name in names {
            by_source.entry(name).or_default().push(&record.id);
        }
    }

    let total = records.len() as f64;
    by_source
        .into_iter()
        .filter_map(|(source, ids)| {
            let share = ids.len() as f64 / total;
            (share >= SOURCE_SHARE).then(|| Pattern {
                kind: PatternKind::SourceConcentration,
                description: format!("{source} supplied {:.0}% of records", share * 100.0),
                confidence: share,
                record_ids: ids.iter().map(|s| (*s).to_owned()).collect(),
                details: json!({ "source": source, "share": share }),
            })
        })
        .collect()
}
