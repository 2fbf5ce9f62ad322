//! SQLite DDL for the intelligence store.
//!
//! Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent. The
//! content and graph stores may share one database file.
//!
//! Version 2 added `intelligence_records.token_count`, which narrows
//! similarity candidates. Version 1 files are upgraded in place on open.

use rusqlite::{params, Connection};

use super::token_count;

/// Schema version written to `schema_meta` on first open.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 2;

pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS intelligence_records (
    id                TEXT PRIMARY KEY,
    content_hash      TEXT NOT NULL,
    content           TEXT NOT NULL,      -- JSON
    text              TEXT NOT NULL,
    token_count       INTEGER NOT NULL DEFAULT 0,
    sources           TEXT NOT NULL,      -- JSON array of SourceMetadata
    confidence        REAL NOT NULL DEFAULT 0.5,
    intelligence_type TEXT NOT NULL DEFAULT 'general',
    created_at        TEXT NOT NULL       -- RFC 3339
);

CREATE INDEX IF NOT EXISTS idx_records_hash       ON intelligence_records(content_hash);
CREATE INDEX IF NOT EXISTS idx_records_created_at ON intelligence_records(created_at);

CREATE TABLE IF NOT EXISTS entities (
    name TEXT PRIMARY KEY,
    kind TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS relationships (
    from_entity TEXT NOT NULL,
    to_entity   TEXT NOT NULL,
    kind        TEXT NOT NULL,
    record_id   TEXT NOT NULL,
    PRIMARY KEY (from_entity, to_entity, kind, record_id)
);

CREATE INDEX IF NOT EXISTS idx_rel_from ON relationships(from_entity);
CREATE INDEX IF NOT EXISTS idx_rel_to   ON relationships(to_entity);

-- Which sources mention which entity, via which record.
CREATE TABLE IF NOT EXISTS mentions (
    entity      TEXT NOT NULL,
    record_id   TEXT NOT NULL,
    source_name TEXT NOT NULL,
    PRIMARY KEY (entity, record_id, source_name)
);
"#;

/// Apply the schema and seed the version if this is a fresh database.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    add_token_count(conn)?;
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_records_tokens ON intelligence_records(token_count);",
    )
}

/// Add and backfill `token_count` on a version 1 database.
fn add_token_count(conn: &Connection) -> rusqlite::Result<()> {
    let present = conn
        .prepare(
            "SELECT 1 FROM pragma_table_info('intelligence_records') WHERE name = 'token_count'",
        )?
        .exists([])?;
    if present {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "ALTER TABLE intelligence_records ADD COLUMN token_count INTEGER NOT NULL DEFAULT 0;",
    )?;
    {
        let mut select = tx.prepare("SELECT id, text FROM intelligence_records")?;
        let rows = select
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut update =
            tx.prepare("UPDATE intelligence_records SET token_count = ?1 WHERE id = ?2")?;
        for (id, text) in rows {
            let tokens = i64::try_from(token_count(&text)).unwrap_or(i64::MAX);
            update.execute(params![tokens, id])?;
        }
    }
    tx.execute(
        "UPDATE schema_meta SET value = ?1 \
         WHERE key = 'schema_version' AND CAST(value AS INTEGER) < CAST(?1 AS INTEGER)",
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    tx.commit()
}

pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
