//! SQLite checkpoint backend
//!
//! Pages are keyed by URL and iterated in fixed-size batches. Page writes are
//! buffered in an open transaction until [`StateBackend::commit`], so the
//! caller picks the durability cadence. Queue replacement always happens inside
//! a transaction, so a crash never leaves a half-written queue.

use crate::checkpoint::schema::{initialize_schema, missing_column};
use crate::checkpoint::{
    CheckpointError, CheckpointMetadata, CheckpointResult, CrawlTask, PageIter, PageRecord,
    StateBackend, CHECKPOINT_VERSION, PAGE_BATCH_SIZE,
};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Indexed on-disk checkpoint for large crawls
#[derive(Debug)]
pub struct SqliteBackend {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> CheckpointResult<T>,
    ) -> CheckpointResult<T> {
        let mut guard = self.lock();
        let conn = guard.as_mut().ok_or(CheckpointError::NotInitialized)?;
        f(conn)
    }

    /// Opens the database, configures it and verifies its layout and integrity
    fn open_verified(path: &Path) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;
        if let Some(column) = missing_column(&conn)? {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
                Some(format!("unexpected table layout, missing {}", column)),
            ));
        }

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CORRUPT),
                Some(check),
            ));
        }

        Ok(conn)
    }

    /// Removes the database file together with its WAL side files
    fn remove_files(path: &Path) -> std::io::Result<()> {
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut name = path.as_os_str().to_owned();
            name.push(suffix);
            match std::fs::remove_file(PathBuf::from(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn stored_version(conn: &Connection) -> Result<Option<u32>, rusqlite::Error> {
        conn.query_row("SELECT version FROM metadata WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()
    }

    fn clear_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "
            DELETE FROM metadata;
            DELETE FROM pages;
            DELETE FROM queue;
        ",
        )
    }

    /// Starts the page write buffer if it is not already open
    fn begin_if_idle(conn: &Connection) -> Result<(), rusqlite::Error> {
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    fn read_page(row: &rusqlite::Row<'_>) -> rusqlite::Result<PageRecord> {
        Ok(PageRecord {
            url: row.get(0)?,
            content_hash: row.get(1)?,
            last_fetched_at: row.get(2)?,
            status_code: row.get(3)?,
            output_path: row.get(4)?,
            etag: row.get(5)?,
            last_modified: row.get(6)?,
        })
    }
}

impl StateBackend for SqliteBackend {
    fn initialize(&self) -> CheckpointResult<()> {
        let mut guard = self.lock();
        if guard.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = match Self::open_verified(&self.path) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(
                    "Checkpoint database {} is unreadable ({}), starting without it",
                    self.path.display(),
                    e
                );
                Self::remove_files(&self.path)?;
                Self::open_verified(&self.path)?
            }
        };

        match Self::stored_version(&conn) {
            Ok(Some(version)) if version != CHECKPOINT_VERSION => {
                tracing::warn!(
                    "Checkpoint {} has version {} (expected {}), starting without it",
                    self.path.display(),
                    version,
                    CHECKPOINT_VERSION
                );
                Self::clear_tables(&conn)?;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    "Checkpoint metadata in {} is unreadable ({}), starting without it",
                    self.path.display(),
                    e
                );
                Self::clear_tables(&conn)?;
            }
        }

        *guard = Some(conn);
        Ok(())
    }

    fn close(&self) -> CheckpointResult<()> {
        let mut guard = self.lock();
        if let Some(conn) = guard.take() {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            conn.close().map_err(|(_, e)| e)?;
        }
        Ok(())
    }

    fn clear(&self) -> CheckpointResult<()> {
        self.with_conn(|conn| {
            Self::begin_if_idle(conn)?;
            Self::clear_tables(conn)?;
            conn.execute_batch("COMMIT")?;
            Ok(())
        })
    }

    fn load_metadata(&self) -> CheckpointResult<Option<CheckpointMetadata>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT version, config_name, config_fingerprint, created_at, last_updated_at, stats
                     FROM metadata WHERE id = 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, u32>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                        ))
                    },
                )
                .optional()?;

            Ok(row.map(
                |(version, config_name, config_fingerprint, created_at, last_updated_at, stats)| {
                    CheckpointMetadata {
                        version,
                        config_name,
                        config_fingerprint,
                        created_at,
                        last_updated_at,
                        stats: serde_json::from_str(&stats).unwrap_or_default(),
                    }
                },
            ))
        })
    }

    fn save_metadata(&self, metadata: &CheckpointMetadata) -> CheckpointResult<()> {
        let stats = serde_json::to_string(&metadata.stats)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO metadata
                 (id, version, config_name, config_fingerprint, created_at, last_updated_at, stats)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    metadata.version,
                    metadata.config_name,
                    metadata.config_fingerprint,
                    metadata.created_at,
                    metadata.last_updated_at,
                    stats
                ],
            )?;
            Ok(())
        })
    }

    fn get_page(&self, url: &str) -> CheckpointResult<Option<PageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT url, content_hash, last_fetched_at, status_code, output_path, etag, last_modified
                 FROM pages WHERE url = ?1",
            )?;
            Ok(stmt.query_row(params![url], Self::read_page).optional()?)
        })
    }

    fn add_page(&self, page: PageRecord) -> CheckpointResult<()> {
        self.with_conn(|conn| {
            Self::begin_if_idle(conn)?;
            let mut stmt = conn.prepare_cached(
                "INSERT OR REPLACE INTO pages
                 (url, content_hash, last_fetched_at, status_code, output_path, etag, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            stmt.execute(params![
                page.url,
                page.content_hash,
                page.last_fetched_at,
                page.status_code,
                page.output_path,
                page.etag,
                page.last_modified
            ])?;
            Ok(())
        })
    }

    fn has_page(&self, url: &str) -> CheckpointResult<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM pages WHERE url = ?1", params![url], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn page_count(&self) -> CheckpointResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    fn iter_pages(&self) -> CheckpointResult<PageIter<'_>> {
        self.with_conn(|_| Ok(()))?;

        Ok(PageIter::new(move |after: Option<&str>| {
            self.with_conn(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT url, content_hash, last_fetched_at, status_code, output_path, etag, last_modified
                     FROM pages WHERE url > ?1 ORDER BY url LIMIT ?2",
                )?;
                let rows = stmt.query_map(
                    params![after.unwrap_or(""), PAGE_BATCH_SIZE as i64],
                    Self::read_page,
                )?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
        }))
    }

    fn get_queue(&self) -> CheckpointResult<Vec<CrawlTask>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT url, parent_url FROM queue ORDER BY position")?;
            let rows = stmt.query_map([], |row| {
                Ok(CrawlTask {
                    url: row.get(0)?,
                    parent_url: row.get(1)?,
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    fn save_queue(&self, queue: &[CrawlTask]) -> CheckpointResult<()> {
        fn replace(conn: &Connection, queue: &[CrawlTask]) -> Result<(), rusqlite::Error> {
            conn.execute("DELETE FROM queue", [])?;
            let mut stmt =
                conn.prepare_cached("INSERT INTO queue (position, url, parent_url) VALUES (?1, ?2, ?3)")?;
            for (position, task) in queue.iter().enumerate() {
                stmt.execute(params![position as i64, task.url, task.parent_url])?;
            }
            Ok(())
        }

        self.with_conn(|conn| {
            if conn.is_autocommit() {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                replace(&tx, queue)?;
                tx.commit()?;
            } else {
                // Becomes durable together with the buffered pages on commit
                replace(conn, queue)?;
            }
            Ok(())
        })
    }

    fn commit(&self) -> CheckpointResult<()> {
        self.with_conn(|conn| {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
            Ok(())
        })
    }
}
