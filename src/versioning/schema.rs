//! SQLite DDL for version history.

use rusqlite::Connection;

pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS versions (
    version_id        TEXT PRIMARY KEY,
    content_id        TEXT NOT NULL,
    version_number    INTEGER NOT NULL,
    content_hash      TEXT NOT NULL,
    content           TEXT NOT NULL,      -- JSON
    metadata          TEXT NOT NULL,      -- JSON
    created_at        TEXT NOT NULL,      -- RFC 3339, UTC, fixed width
    created_by        TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'ACTIVE',
    parent_version_id TEXT,
    change_type       TEXT NOT NULL,
    rollback_count    INTEGER NOT NULL DEFAULT 0,
    UNIQUE (content_id, version_number)
);

CREATE INDEX IF NOT EXISTS idx_versions_content ON versions(content_id, version_number);
CREATE INDEX IF NOT EXISTS idx_versions_status  ON versions(status);
"#;

pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}
