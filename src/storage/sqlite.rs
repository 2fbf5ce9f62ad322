//! SQLite-backed content and graph stores.
//!
//! Thread-safe via an internal `Mutex<Connection>`. Both stores can point
//! at the same database file; each holds its own connection.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use unified_search::IntelligenceType;

use super::extract::ExtractedGraph;
use super::schema::{apply_schema, read_schema_version};
use super::{
    query_terms, term_score, text_similarity, token_bounds, token_count, ContentStore, Entity, GraphStore,
    IntelligenceRecord, Relationship,
};
use crate::error::{IntelError, Result};

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    apply_schema(&conn)?;
    Ok(conn)
}

fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_schema(&conn)?;
    Ok(conn)
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| IntelError::Storage(format!("connection lock poisoned: {e}")))
}

fn ping(conn: &Mutex<Connection>) -> Result<()> {
    lock(conn)?.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
    Ok(())
}

fn as_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn type_to_str(t: IntelligenceType) -> String {
    serde_json::to_value(t)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| "general".to_owned())
}

fn type_from_str(s: &str) -> IntelligenceType {
    serde_json::from_value(serde_json::Value::String(s.to_owned())).unwrap_or_default()
}

const RECORD_COLUMNS: &str =
    "id, content_hash, content, text, sources, confidence, intelligence_type, created_at";

/// Raw row, decoded into a record outside the rusqlite closure so JSON
/// errors surface as [`IntelError::Serde`].
struct RecordRow {
    id: String,
    content_hash: String,
    content: String,
    text: String,
    sources: String,
    confidence: f64,
    intelligence_type: String,
    created_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        content: row.get(2)?,
        text: row.get(3)?,
        sources: row.get(4)?,
        confidence: row.get(5)?,
        intelligence_type: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl RecordRow {
    fn decode(self) -> Result<IntelligenceRecord> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| IntelError::Storage(format!("bad timestamp on {}: {e}", self.id)))?;
        Ok(IntelligenceRecord {
            content: serde_json::from_str(&self.content)?,
            sources: serde_json::from_str(&self.sources)?,
            intelligence_type: type_from_str(&self.intelligence_type),
            id: self.id,
            content_hash: self.content_hash,
            text: self.text,
            confidence: self.confidence,
            created_at,
        })
    }
}

/// Intelligence records in SQLite.
pub struct SqliteContentStore {
    conn: Mutex<Connection>,
}

impl SqliteContentStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_memory()?),
        })
    }

    pub fn schema_version(&self) -> Result<Option<u32>> {
        let conn = lock(&self.conn)?;
        Ok(read_schema_version(&conn)?)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = lock(&self.conn)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM intelligence_records", [], |r| {
            r.get(0)
        })?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    fn query_records(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<IntelligenceRecord>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, read_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }
        Ok(records)
    }
}

impl ContentStore for SqliteContentStore {
    fn store(&self, record: &IntelligenceRecord) -> Result<()> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO intelligence_records \
             (id, content_hash, content, text, token_count, sources, confidence, \
              intelligence_type, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.content_hash,
                serde_json::to_string(&record.content)?,
                record.text,
                as_sql_count(token_count(&record.text)),
                serde_json::to_string(&record.sources)?,
                record.confidence,
                type_to_str(record.intelligence_type),
                record.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| IntelError::StorageWriteFailure(format!("content store: {e}")))?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let conn = lock(&self.conn)?;
        let removed = conn
            .execute("DELETE FROM intelligence_records WHERE id = ?1", params![id])
            .map_err(|e| IntelError::StorageWriteFailure(format!("content store: {e}")))?;
        Ok(removed > 0)
    }

    fn find_similar(&self, text: &str, threshold: f64) -> Result<Option<String>> {
        let (lo, hi) = token_bounds(token_count(text), threshold);
        let conn = lock(&self.conn)?;
        let exact: Option<String> = conn
            .query_row(
                "SELECT id FROM intelligence_records \
                 WHERE token_count BETWEEN ?1 AND ?2 AND text = ?3 LIMIT 1",
                params![as_sql_count(lo), as_sql_count(hi), text],
                |r| r.get(0),
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }

        let mut stmt = conn.prepare(
            "SELECT id, text FROM intelligence_records WHERE token_count BETWEEN ?1 AND ?2",
        )?;
        let rows = stmt.query_map(params![as_sql_count(lo), as_sql_count(hi)], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, candidate) = row?;
            if text_similarity(text, &candidate) >= threshold {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<IntelligenceRecord>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let conditions: Vec<String> = (1..=terms.len())
            .map(|i| format!("instr(lower(text), ?{i}) > 0"))
            .collect();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM intelligence_records WHERE {}",
            conditions.join(" AND ")
        );

        let conn = lock(&self.conn)?;
        let mut records = Self::query_records(&conn, &sql, params_from_iter(terms.iter()))?;
        records.sort_by(|a, b| {
            let sa = term_score(&a.text, &terms) * a.confidence;
            let sb = term_score(&b.text, &terms) * b.confidence;
            sb.partial_cmp(&sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        records.truncate(limit);
        Ok(records)
    }

    fn get(&self, id: &str) -> Result<Option<IntelligenceRecord>> {
        let conn = lock(&self.conn)?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM intelligence_records WHERE id = ?1");
        Ok(Self::query_records(&conn, &sql, params![id])?.into_iter().next())
    }

    fn list_records(&self) -> Result<Vec<IntelligenceRecord>> {
        let conn = lock(&self.conn)?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM intelligence_records ORDER BY created_at ASC");
        Self::query_records(&conn, &sql, [])
    }

    fn ping(&self) -> Result<()> {
        ping(&self.conn)
    }
}

/// Entity graph in SQLite.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
}

impl SqliteGraphStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open_memory()?),
        })
    }
}

impl GraphStore for SqliteGraphStore {
    fn write(&self, record: &IntelligenceRecord, graph: &ExtractedGraph) -> Result<()> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        {
            let mut entity_stmt =
                tx.prepare("INSERT OR IGNORE INTO entities (name, kind) VALUES (?1, ?2)")?;
            let mut mention_stmt = tx.prepare(
                "INSERT OR IGNORE INTO mentions (entity, record_id, source_name) VALUES (?1, ?2, ?3)",
            )?;
            for entity in &graph.entities {
                entity_stmt.execute(params![entity.name, entity.kind])?;
                for source in &record.sources {
                    mention_stmt.execute(params![entity.name, record.id, source.source_name])?;
                }
            }

            let mut rel_stmt = tx.prepare(
                "INSERT OR IGNORE INTO relationships (from_entity, to_entity, kind, record_id) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for rel in &graph.relationships {
                rel_stmt.execute(params![rel.from, rel.to, rel.kind, rel.record_id])?;
            }
        }
        tx.commit()
            .map_err(|e| IntelError::StorageWriteFailure(format!("graph store: {e}")))?;
        Ok(())
    }

    fn search_entities(&self, query: &str, limit: usize) -> Result<Vec<Entity>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT name, kind FROM entities WHERE instr(lower(name), lower(?1)) > 0 \
             ORDER BY length(name) ASC, name ASC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![query.trim(), limit], |r| {
            Ok(Entity {
                name: r.get(0)?,
                kind: r.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn relationships_for(&self, entity: &str) -> Result<Vec<Relationship>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT from_entity, to_entity, kind, record_id FROM relationships \
             WHERE from_entity = ?1 OR to_entity = ?1 ORDER BY record_id, from_entity, to_entity",
        )?;
        let rows = stmt.query_map(params![entity], |r| {
            Ok(Relationship {
                from: r.get(0)?,
                to: r.get(1)?,
                kind: r.get(2)?,
                record_id: r.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn entity_sources(&self, entity: &str) -> Result<Vec<String>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT source_name FROM mentions WHERE entity = ?1 ORDER BY source_name",
        )?;
        let rows = stmt.query_map(params![entity], |r| r.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    fn entities(&self) -> Result<Vec<Entity>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare("SELECT name, kind FROM entities ORDER BY name")?;
        let rows = stmt.query_map([], |r| {
            Ok(Entity {
                name: r.get(0)?,
                kind: r.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn ping(&self) -> Result<()> {
        ping(&self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::extract_graph;
    use serde_json::json;
    use unified_search::{SourceKind, SourceMetadata};

    fn test_store() -> (tempfile::TempDir, SqliteContentStore, SqliteGraphStore) {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let path = dir.path().join("intel.db");
        let content = SqliteContentStore::open(&path).expect("open content store");
        let graph = SqliteGraphStore::open(&path).expect("open graph store");
        (dir, content, graph)
    }

    fn record(id: &str, text: &str, sources: &[&str]) -> IntelligenceRecord {
        IntelligenceRecord {
            id: id.to_owned(),
            content_hash: blake3::hash(text.as_bytes()).to_hex().to_string(),
            content: json!(text),
            text: text.to_owned(),
            sources: sources
                .iter()
                .map(|s| SourceMetadata::new(SourceKind::RemoteTool(0), *s))
                .collect(),
            confidence: 0.8,
            intelligence_type: IntelligenceType::Event,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn store_get_and_list_roundtrip() {
        let (_dir, store, _graph) = test_store();
        let rec = record("rec-1", "The Royal Navy ordered submarines", &["gov"]);
        store.store(&rec).expect("store");

        let loaded = store.get("rec-1").expect("get").expect("present");
        assert_eq!(loaded.content, rec.content);
        assert_eq!(loaded.sources, rec.sources);
        assert_eq!(loaded.intelligence_type, IntelligenceType::Event);
        assert_eq!(store.list_records().expect("list").len(), 1);
        assert_eq!(store.count().expect("count"), 1);
        assert!(store.get("missing").expect("get").is_none());
        assert_eq!(store.schema_version().expect("version"), Some(2));
        store.ping().expect("ping");

        assert!(store.delete("rec-1").expect("delete"));
        assert!(!store.delete("rec-1").expect("delete again"));
        assert_eq!(store.count().expect("count"), 0);
    }

    #[test]
    fn duplicate_id_is_write_failure() {
        let (_dir, store, _graph) = test_store();
        let rec = record("rec-1", "text", &["gov"]);
        store.store(&rec).expect("first store");
        let err = store.store(&rec).unwrap_err();
        assert!(matches!(err, IntelError::StorageWriteFailure(_)));
    }

    #[test]
    fn search_requires_all_terms() {
        let (_dir, store, _graph) = test_store();
        store
            .store(&record("a", "Submarine acquisition approved", &["gov"]))
            .expect("store");
        store
            .store(&record("b", "Frigate acquisition delayed", &["news"]))
            .expect("store");

        let hits = store.search("ACQUISITION submarine", 10).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(store.search("acquisition", 10).expect("search").len(), 2);
        assert_eq!(store.search("acquisition", 1).expect("search").len(), 1);
        assert!(store.search("  ", 10).expect("search").is_empty());
    }

    #[test]
    fn find_similar_exact_and_near() {
        let (_dir, store, _graph) = test_store();
        store
            .store(&record(
                "a",
                "the fleet acquired twelve submarines in march this year",
                &["gov"],
            ))
            .expect("store");

        let exact = store
            .find_similar("the fleet acquired twelve submarines in march this year", 0.95)
            .expect("similar");
        assert_eq!(exact.as_deref(), Some("a"));

        let near = store
            .find_similar("the fleet acquired twelve submarines in april this year", 0.9)
            .expect("similar");
        assert_eq!(near.as_deref(), Some("a"));

        let different = store
            .find_similar("budget hearing postponed", 0.95)
            .expect("similar");
        assert!(different.is_none());
    }

    #[test]
    fn find_similar_only_compares_rows_of_reachable_length() {
        let (_dir, store, _graph) = test_store();
        let text = "the fleet acquired twelve submarines in march this year";
        store.store(&record("a", text, &["gov"])).expect("store");
        for i in 0..50 {
            store
                .store(&record(
                    &format!("long-{i}"),
                    &format!("{text} {}", "and further commentary ".repeat(20 + i)),
                    &["news"],
                ))
                .expect("store");
        }

        let stored: i64 = lock(&store.conn)
            .expect("lock")
            .query_row(
                "SELECT token_count FROM intelligence_records WHERE id = 'a'",
                [],
                |r| r.get(0),
            )
            .expect("token_count");
        assert_eq!(stored, as_sql_count(token_count(text)));
        assert_eq!(store.find_similar(text, 0.95).expect("similar").as_deref(), Some("a"));

        // A row whose recorded length is out of range is never considered.
        lock(&store.conn)
            .expect("lock")
            .execute("UPDATE intelligence_records SET token_count = 10000 WHERE id = 'a'", [])
            .expect("update");
        assert!(store.find_similar(text, 0.95).expect("similar").is_none());
    }

    #[test]
    fn graph_write_and_queries() {
        let (_dir, _store, graph) = test_store();
        graph.ping().expect("ping");
        let rec = record(
            "rec-1",
            "The Royal Navy signed with BAE Systems. Budget approved by Parliament.",
            &["gov", "news"],
        );
        graph.write(&rec, &extract_graph(&rec)).expect("write");

        let entities = graph.entities().expect("entities");
        assert_eq!(entities.len(), 3);

        let found = graph.search_entities("navy", 10).expect("search");
        assert_eq!(found[0].name, "Royal Navy");

        let rels = graph.relationships_for("BAE Systems").expect("rels");
        assert_eq!(rels.len(), 2);

        let sources = graph.entity_sources("Parliament").expect("sources");
        assert_eq!(sources, vec!["gov".to_string(), "news".to_string()]);
    }

    #[test]
    fn concurrent_stores_preserve_records() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let store = std::sync::Arc::new(
            SqliteContentStore::open(&dir.path().join("intel.db")).expect("open"),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let s = std::sync::Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                s.store(&record(&format!("rec-{i}"), &format!("record {i}"), &["t"]))
                    .expect("concurrent store");
            }));
        }
        for h in handles {
            h.join().expect("thread join");
        }
        assert_eq!(store.count().expect("count"), 10);
    }
}
