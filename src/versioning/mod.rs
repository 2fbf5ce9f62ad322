//! Append-only version history for stored content.
//!
//! Every accepted change creates a new numbered [`Version`]; nothing is ever
//! deleted or rewritten in place. Rollback appends a copy of an older version,
//! and retention only flips old versions to [`VersionStatus::Archived`].
//! The "current" version of a content id is its highest-numbered active one.

pub mod diff;
mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::VersioningConfig;
use crate::error::{IntelError, Result};

pub use diff::{LineChanges, ModifiedLine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VersionStatus {
    Active,
    Archived,
    RolledBack,
}

impl VersionStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Archived => "ARCHIVED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "ARCHIVED" => Ok(Self::Archived),
            "ROLLED_BACK" => Ok(Self::RolledBack),
            other => Err(IntelError::Storage(format!("unknown version status: {other}"))),
        }
    }
}

/// How a version differs from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Creation,
    MinorUpdate,
    ModerateUpdate,
    MajorUpdate,
    Rollback,
}

impl ChangeType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Creation => "creation",
            Self::MinorUpdate => "minor_update",
            Self::ModerateUpdate => "moderate_update",
            Self::MajorUpdate => "major_update",
            Self::Rollback => "rollback",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "creation" => Ok(Self::Creation),
            "minor_update" => Ok(Self::MinorUpdate),
            "moderate_update" => Ok(Self::ModerateUpdate),
            "major_update" => Ok(Self::MajorUpdate),
            "rollback" => Ok(Self::Rollback),
            other => Err(IntelError::Storage(format!("unknown change type: {other}"))),
        }
    }
}

/// An immutable, numbered snapshot of one content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: String,
    pub content_id: String,
    pub version_number: u32,
    pub content_hash: String,
    pub content: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub status: VersionStatus,
    pub parent_version_id: Option<String>,
    pub change_type: ChangeType,
    /// How many times this version has been the target of a rollback.
    pub rollback_count: u32,
}

/// Result of [`VersionHistoryManager::create_version`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VersionOutcome {
    Created(Version),
    /// Too similar to the current version; nothing was written.
    Unchanged { version_id: String, similarity: f64 },
}

impl VersionOutcome {
    pub fn version_id(&self) -> &str {
        match self {
            Self::Created(v) => &v.version_id,
            Self::Unchanged { version_id, .. } => version_id,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionComparison {
    pub version_a: String,
    pub version_b: String,
    pub similarity: f64,
    #[serde(flatten)]
    pub changes: LineChanges,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionStatistics {
    pub content_id: String,
    pub total_versions: usize,
    pub active_versions: usize,
    pub archived_versions: usize,
    pub rolled_back_versions: usize,
    pub total_rollbacks: u32,
    pub current_version_number: Option<u32>,
    pub first_created: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const VERSION_COLUMNS: &str = "version_id, content_id, version_number, content_hash, content, \
     metadata, created_at, created_by, status, parent_version_id, change_type, rollback_count";

struct VersionRow {
    version_id: String,
    content_id: String,
    version_number: u32,
    content_hash: String,
    content: String,
    metadata: String,
    created_at: String,
    created_by: String,
    status: String,
    parent_version_id: Option<String>,
    change_type: String,
    rollback_count: u32,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<VersionRow> {
    Ok(VersionRow {
        version_id: row.get(0)?,
        content_id: row.get(1)?,
        version_number: row.get(2)?,
        content_hash: row.get(3)?,
        content: row.get(4)?,
        metadata: row.get(5)?,
        created_at: row.get(6)?,
        created_by: row.get(7)?,
        status: row.get(8)?,
        parent_version_id: row.get(9)?,
        change_type: row.get(10)?,
        rollback_count: row.get(11)?,
    })
}

impl VersionRow {
    fn decode(self) -> Result<Version> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| IntelError::Storage(format!("bad timestamp on {}: {e}", self.version_id)))?;
        Ok(Version {
            content: serde_json::from_str(&self.content)?,
            metadata: serde_json::from_str(&self.metadata)?,
            status: VersionStatus::parse(&self.status)?,
            change_type: ChangeType::parse(&self.change_type)?,
            version_id: self.version_id,
            content_id: self.content_id,
            version_number: self.version_number,
            content_hash: self.content_hash,
            created_at,
            created_by: self.created_by,
            parent_version_id: self.parent_version_id,
            rollback_count: self.rollback_count,
        })
    }
}

/// Version history over SQLite.
///
/// Thread-safe via an internal `Mutex<Connection>`.
pub struct VersionHistoryManager {
    conn: Mutex<Connection>,
    similarity_threshold: f64,
}

impl VersionHistoryManager {
    /// Open (or create) the history database at `path`.
    pub fn open(path: &Path, config: &VersioningConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            similarity_threshold: config.similarity_threshold,
        })
    }

    pub fn open_in_memory(config: &VersioningConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            similarity_threshold: config.similarity_threshold,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| IntelError::Storage(format!("connection lock poisoned: {e}")))
    }

    /// Record `content` as the next version of `content_id` (a fresh id is
    /// generated when `None`).
    ///
    /// Returns [`VersionOutcome::Unchanged`] with the current version's id when
    /// the new content is more similar to it than the configured threshold.
    pub fn create_version(
        &self,
        content: Value,
        metadata: Value,
        content_id: Option<&str>,
        user: &str,
    ) -> Result<VersionOutcome> {
        let content_id = content_id
            .map(str::to_owned)
            .unwrap_or_else(|| format!("content-{}", uuid::Uuid::new_v4()));
        if content_id.trim().is_empty() {
            return Err(IntelError::Validation("content id must not be empty".into()));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current = current_in(&tx, &content_id)?;

        let score = current.as_ref().map(|c| diff::similarity(&c.content, &content));
        if let (Some(current), Some(score)) = (&current, score) {
            if score > self.similarity_threshold {
                debug!(content_id = %content_id, similarity = score, "content unchanged, no new version");
                return Ok(VersionOutcome::Unchanged {
                    version_id: current.version_id.clone(),
                    similarity: score,
                });
            }
        }

        let version = Version {
            version_id: format!("ver-{}", uuid::Uuid::new_v4()),
            version_number: next_number(&tx, &content_id)?,
            content_hash: unified_search::canonical::content_hash(&content),
            content_id,
            content,
            metadata,
            created_at: Utc::now(),
            created_by: user.to_owned(),
            status: VersionStatus::Active,
            parent_version_id: current.map(|c| c.version_id),
            change_type: diff::classify(score),
            rollback_count: 0,
        };
        insert(&tx, &version)?;
        tx.commit()?;
        debug!(
            content_id = %version.content_id,
            number = version.version_number,
            change = version.change_type.as_str(),
            "version created"
        );
        Ok(VersionOutcome::Created(version))
    }

    pub fn get_version(&self, version_id: &str) -> Result<Option<Version>> {
        let conn = self.lock()?;
        get_in(&conn, version_id)
    }

    /// Every version of `content_id`, oldest first, archived ones included.
    pub fn version_history(&self, content_id: &str) -> Result<Vec<Version>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {VERSION_COLUMNS} FROM versions WHERE content_id = ?1 ORDER BY version_number"
        ))?;
        let rows = stmt.query_map(params![content_id], read_row)?;
        let mut versions = Vec::new();
        for row in rows {
            versions.push(row?.decode()?);
        }
        Ok(versions)
    }

    pub fn current_version(&self, content_id: &str) -> Result<Option<Version>> {
        let conn = self.lock()?;
        current_in(&conn, content_id)
    }

    /// Similarity and line changes going from `id1` to `id2`.
    pub fn compare_versions(&self, id1: &str, id2: &str) -> Result<VersionComparison> {
        let conn = self.lock()?;
        let a = get_in(&conn, id1)?.ok_or_else(|| IntelError::NotFound(format!("version {id1}")))?;
        let b = get_in(&conn, id2)?.ok_or_else(|| IntelError::NotFound(format!("version {id2}")))?;
        Ok(VersionComparison {
            similarity: diff::similarity(&a.content, &b.content),
            changes: diff::line_changes(&a.content, &b.content),
            version_a: a.version_id,
            version_b: b.version_id,
        })
    }

    /// Append a new version carrying `version_id`'s content.
    ///
    /// The previously current version becomes `RolledBack`; the target's
    /// rollback count is incremented. History only grows.
    pub fn rollback_to_version(
        &self,
        content_id: &str,
        version_id: &str,
        user: &str,
    ) -> Result<Version> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let target = get_in(&tx, version_id)?
            .ok_or_else(|| IntelError::NotFound(format!("version {version_id}")))?;
        if target.content_id != content_id {
            return Err(IntelError::Validation(format!(
                "version {version_id} belongs to {}, not {content_id}",
                target.content_id
            )));
        }
        let current = current_in(&tx, content_id)?;

        if let Some(current) = &current {
            tx.execute(
                "UPDATE versions SET status = ?1 WHERE version_id = ?2",
                params![VersionStatus::RolledBack.as_str(), current.version_id],
            )?;
        }
        tx.execute(
            "UPDATE versions SET rollback_count = rollback_count + 1 WHERE version_id = ?1",
            params![target.version_id],
        )?;

        let mut metadata = match target.metadata.clone() {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("original_metadata".into(), other);
                map
            }
        };
        metadata.insert("rollback_from".into(), json!(target.version_id));

        let version = Version {
            version_id: format!("ver-{}", uuid::Uuid::new_v4()),
            content_id: content_id.to_owned(),
            version_number: next_number(&tx, content_id)?,
            content_hash: target.content_hash.clone(),
            content: target.content.clone(),
            metadata: Value::Object(metadata),
            created_at: Utc::now(),
            created_by: user.to_owned(),
            status: VersionStatus::Active,
            parent_version_id: current.map(|c| c.version_id),
            change_type: ChangeType::Rollback,
            rollback_count: 0,
        };
        insert(&tx, &version)?;
        tx.commit()?;
        info!(
            content_id,
            target = version_id,
            number = version.version_number,
            "rolled back"
        );
        Ok(version)
    }

    /// Archive active, non-current versions older than `retention_days`.
    pub fn cleanup_old_versions(&self, retention_days: u32) -> Result<usize> {
        self.cleanup_versions_before(Utc::now() - chrono::Duration::days(i64::from(retention_days)))
    }

    /// Archive active, non-current versions created before `cutoff`.
    pub fn cleanup_versions_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let archived = conn.execute(
            "UPDATE versions SET status = 'ARCHIVED' \
             WHERE status = 'ACTIVE' AND created_at < ?1 \
             AND version_number < (SELECT MAX(v2.version_number) FROM versions v2 \
                                   WHERE v2.content_id = versions.content_id \
                                   AND v2.status = 'ACTIVE')",
            params![timestamp(cutoff)],
        )?;
        if archived > 0 {
            info!(archived, "archived old versions");
        }
        Ok(archived)
    }

    pub fn statistics(&self, content_id: &str) -> Result<VersionStatistics> {
        let history = self.version_history(content_id)?;
        let count = |status: VersionStatus| history.iter().filter(|v| v.status == status).count();
        let current = history
            .iter()
            .filter(|v| v.status == VersionStatus::Active)
            .map(|v| v.version_number)
            .max();
        Ok(VersionStatistics {
            content_id: content_id.to_owned(),
            total_versions: history.len(),
            active_versions: count(VersionStatus::Active),
            archived_versions: count(VersionStatus::Archived),
            rolled_back_versions: count(VersionStatus::RolledBack),
            total_rollbacks: history.iter().map(|v| v.rollback_count).sum(),
            current_version_number: current,
            first_created: history.first().map(|v| v.created_at),
            last_updated: history.last().map(|v| v.created_at),
        })
    }
}

fn get_in(conn: &Connection, version_id: &str) -> Result<Option<Version>> {
    let row = conn
        .query_row(
            &format!("SELECT {VERSION_COLUMNS} FROM versions WHERE version_id = ?1"),
            params![version_id],
            read_row,
        )
        .optional()?;
    row.map(VersionRow::decode).transpose()
}

fn current_in(conn: &Connection, content_id: &str) -> Result<Option<Version>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM versions WHERE content_id = ?1 AND status = 'ACTIVE' \
                 ORDER BY version_number DESC LIMIT 1"
            ),
            params![content_id],
            read_row,
        )
        .optional()?;
    row.map(VersionRow::decode).transpose()
}

fn next_number(conn: &Connection, content_id: &str) -> Result<u32> {
    let max: Option<u32> = conn.query_row(
        "SELECT MAX(version_number) FROM versions WHERE content_id = ?1",
        params![content_id],
        |r| r.get(0),
    )?;
    Ok(max.unwrap_or(0) + 1)
}

fn insert(conn: &Connection, v: &Version) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO versions ({VERSION_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            v.version_id,
            v.content_id,
            v.version_number,
            v.content_hash,
            serde_json::to_string(&v.content)?,
            serde_json::to_string(&v.metadata)?,
            timestamp(v.created_at),
            v.created_by,
            v.status.as_str(),
            v.parent_version_id,
            v.change_type.as_str(),
            v.rollback_count,
        ],
    )?;
    Ok(())
}
