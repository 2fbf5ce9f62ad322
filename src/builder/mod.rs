//! Analysis over accumulated intelligence.
//!
//! Read-only: the builder queries the content and graph stores and derives
//! patterns, trends, cross-entity connections and a quality score. Nothing
//! it produces is written back.

pub mod connections;
pub mod patterns;
pub mod scoring;
pub mod trends;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::BuilderConfig;
use crate::error::{IntelError, Result};
use crate::storage::{query_terms, ContentStore, GraphStore, IntelligenceRecord};

pub use connections::{find_connections, Connection};
pub use patterns::{identify_patterns, Pattern, PatternKind};
pub use scoring::{score_intelligence, IntelligenceScore};
pub use trends::{analyze_trend, Trend, TrendDirection};

/// Most records pulled into one report.
const REPORT_RECORD_LIMIT: usize = 500;

/// Everything known about one entity, ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntelligenceReport {
    pub entity: String,
    pub generated_at: DateTime<Utc>,
    pub record_count: usize,
    pub patterns: Vec<Pattern>,
    pub trend: Option<Trend>,
    pub connections: Vec<Connection>,
    pub score: IntelligenceScore,
}

pub struct IntelligenceBuilder {
    content: Arc<dyn ContentStore>,
    graph: Arc<dyn GraphStore>,
    config: BuilderConfig,
}

impl IntelligenceBuilder {
    pub fn new(
        content: Arc<dyn ContentStore>,
        graph: Arc<dyn GraphStore>,
        config: BuilderConfig,
    ) -> Self {
        Self {
            content,
            graph,
            config,
        }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    pub fn identify_patterns(&self, records: &[IntelligenceRecord]) -> Vec<Pattern> {
        identify_patterns(
            records,
            self.config.pattern_threshold,
            self.config.min_occurrences,
        )
    }

    /// Trend over the numeric observations in `records`.
    pub fn analyze_trends(&self, entity: &str, records: &[IntelligenceRecord]) -> Option<Trend> {
        let series = trends::numeric_series(records);
        analyze_trend(entity, &series, self.config.trend_threshold)
    }

    /// Connections between every pair of known entities.
    pub fn cross_reference(&self) -> Result<Vec<Connection>> {
        let mut entity_sources = BTreeMap::new();
        for entity in self.graph.entities()? {
            let sources: BTreeSet<String> =
                self.graph.entity_sources(&entity.name)?.into_iter().collect();
            entity_sources.insert(entity.name, sources);
        }
        Ok(find_connections(
            &entity_sources,
            self.config.connection_threshold,
        ))
    }

    pub fn score(&self, records: &[IntelligenceRecord], entity: &str) -> IntelligenceScore {
        score_intelligence(records, &query_terms(entity), Utc::now())
    }

    /// Collect records mentioning `entity` and run every analysis over them.
    ///
    /// # Errors
    ///
    /// Returns [`IntelError::Validation`] for a blank entity, or a storage
    /// error if the stores cannot be read.
    pub fn build_report(&self, entity: &str) -> Result<IntelligenceReport> {
        let entity = entity.trim();
        if entity.is_empty() {
            return Err(IntelError::Validation("entity must not be empty".into()));
        }
        let records = self.content.search(entity, REPORT_RECORD_LIMIT)?;

        let connections: Vec<Connection> = self
            .cross_reference()?
            .into_iter()
            .filter(|c| {
                c.entity_a.eq_ignore_ascii_case(entity) || c.entity_b.eq_ignore_ascii_case(entity)
            })
            .collect();

        let report = IntelligenceReport {
            entity: entity.to_owned(),
            generated_at: Utc::now(),
            record_count: records.len(),
            patterns: self.identify_patterns(&records),
            trend: self.analyze_trends(entity, &records),
            connections,
            score: self.score(&records, entity),
        };
        debug!(
            entity,
            records = report.record_count,
            patterns = report.patterns.len(),
            connections = report.connections.len(),
            "report built"
        );
        Ok(report)
    }
}
