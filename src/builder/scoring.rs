//! Quality score for a body of intelligence.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::IntelligenceRecord;

const RELIABILITY_WEIGHT: f64 = 0.3;
const RELEVANCE_WEIGHT: f64 = 0.3;
const TIMELINESS_WEIGHT: f64 = 0.2;
const COMPLETENESS_WEIGHT: f64 = 0.2;
/// Factors under this get a recommendation.
const RECOMMEND_BELOW: f64 = 0.7;
/// Age at which a record is worth half as much.
const HALF_LIFE_DAYS: f64 = 30.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntelligenceScore {
    pub overall: f64,
    pub reliability: f64,
    pub relevance: f64,
    pub timeliness: f64,
    pub completeness: f64,
    pub recommendations: Vec<String>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { 0.0 } else { sum / n as f64 }
}

/// Share of `terms` present in the record; record confidence when there are
/// no terms.
fn relevance(record: &IntelligenceRecord, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return record.confidence;
    }
    let lower = record.text.to_lowercase();
    terms.iter().filter(|t| lower.contains(t.as_str())).count() as f64 / terms.len() as f64
}

fn timeliness(record: &IntelligenceRecord, now: DateTime<Utc>) -> f64 {
    let age_days = ((now - record.created_at).num_seconds().max(0) as f64) / 86_400.0;
    0.5_f64.powf(age_days / HALF_LIFE_DAYS)
}

fn completeness(record: &IntelligenceRecord) -> f64 {
    let first = record.sources.first();
    let parts = [
        !record.text.trim().is_empty(),
        first.is_some_and(|s| s.title.is_some()),
        first.is_some_and(|s| s.url.is_some()),
    ];
    parts.iter().filter(|p| **p).count() as f64 / parts.len() as f64
}

/// Score `records` against `terms` as of `now`.
pub fn score_intelligence(
    records: &[IntelligenceRecord],
    terms: &[String],
    now: DateTime<Utc>,
) -> IntelligenceScore {
    let reliability = mean(records.iter().map(IntelligenceRecord::mean_reliability));
    let relevance = mean(records.iter().map(|r| relevance(r, terms)));
    let timeliness = mean(records.iter().map(|r| timeliness(r, now)));
    let completeness = mean(records.iter().map(completeness));

    let overall = (RELIABILITY_WEIGHT * reliability
        + RELEVANCE_WEIGHT * relevance
        + TIMELINESS_WEIGHT * timeliness
        + COMPLETENESS_WEIGHT * completeness)
        .clamp(0.0, 1.0);

    let mut recommendations = Vec::new();
    if records.is_empty() {
        recommendations.push("No intelligence gathered yet; run a search first".to_owned());
    } else {
        let advice = [
            (reliability, "Corroborate with more reliable sources"),
            (relevance, "Refine the query; many records only partly match"),
            (timeliness, "Refresh the search; much of the material is stale"),
            (completeness, "Prefer sources that provide titles and links"),
        ];
        for (value, text) in advice {
            if value < RECOMMEND_BELOW {
                recommendations.push(text.to_owned());
            }
        }
    }

    IntelligenceScore {
        overall,
        reliability,
        relevance,
        timeliness,
        completeness,
        recommendations,
    }
}
