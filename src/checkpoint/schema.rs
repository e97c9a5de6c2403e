//! SQLite checkpoint schema and migrations

use rusqlite::Connection;

/// SQL schema for the checkpoint database
pub const SCHEMA_SQL: &str = r#"
-- Crawl identity and summary statistics (single row)
CREATE TABLE IF NOT EXISTS metadata (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    config_name TEXT NOT NULL,
    config_fingerprint TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_updated_at TEXT NOT NULL,
    stats TEXT NOT NULL DEFAULT '{}'
);

-- One row per fetched page
CREATE TABLE IF NOT EXISTS pages (
    url TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    last_fetched_at TEXT NOT NULL,
    status_code INTEGER NOT NULL,
    output_path TEXT NOT NULL,
    etag TEXT,
    last_modified TEXT
);

CREATE INDEX IF NOT EXISTS idx_pages_last_fetched ON pages(last_fetched_at);

-- Pending URLs in crawl order
CREATE TABLE IF NOT EXISTS queue (
    position INTEGER PRIMARY KEY,
    url TEXT NOT NULL,
    parent_url TEXT
);
"#;

/// Columns added to `pages` after the first release, with their types
const PAGE_COLUMN_MIGRATIONS: &[(&str, &str)] = &[("etag", "TEXT"), ("last_modified", "TEXT")];

/// Columns every table must have once migrations ran
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "metadata",
        &[
            "id",
            "version",
            "config_name",
            "config_fingerprint",
            "created_at",
            "last_updated_at",
            "stats",
        ],
    ),
    (
        "pages",
        &[
            "url",
            "content_hash",
            "last_fetched_at",
            "status_code",
            "output_path",
            "etag",
            "last_modified",
        ],
    ),
    ("queue", &["position", "url", "parent_url"]),
];

/// Creates missing tables and upgrades older layouts
pub fn initialize_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    migrate_page_columns(conn)?;
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    rows.collect()
}

/// Finds the first `table.column` the checkpoint layout needs but the database lacks
///
/// Tables created by something else under the same name survive
/// `CREATE TABLE IF NOT EXISTS` untouched, so they show up here.
pub fn missing_column(conn: &Connection) -> Result<Option<String>, rusqlite::Error> {
    for (table, required) in REQUIRED_COLUMNS {
        let existing = table_columns(conn, table)?;
        if let Some(column) = required.iter().find(|c| !existing.iter().any(|e| e == *c)) {
            return Ok(Some(format!("{}.{}", table, column)));
        }
    }
    Ok(None)
}

/// Adds validator columns to databases created before they existed
fn migrate_page_columns(conn: &Connection) -> Result<(), rusqlite::Error> {
    let existing = table_columns(conn, "pages")?;

    for (column, kind) in PAGE_COLUMN_MIGRATIONS {
        if !existing.iter().any(|c| c == column) {
            tracing::info!("Migrating checkpoint schema: adding pages.{}", column);
            conn.execute_batch(&format!("ALTER TABLE pages ADD COLUMN {} {};", column, kind))?;
        }
    }

    Ok(())
}
