use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use zet_schemas::{parse_time, Timestamp, Zettel, ZettelId, ZettelKind};

use crate::error::Result;

/// Column list matching `row_to_zettel`
pub(crate) const ZETTEL_COLUMNS: &str = "id, title, content, kind, created_at, updated_at";

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    /// Open (or create) a database file and make sure the schema exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;

        let db = Self { conn };
        db.init_schema()?;

        info!("Database initialized");
        Ok(db)
    }

    /// Private in-memory database, used by tests and throwaway runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Create all tables, indexes and FTS triggers
    fn init_schema(&self) -> Result<()> {
        // Cascading deletes on links/history/membership depend on this
        self.conn.pragma_update(None, "foreign_keys", true)?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS zettels (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('fleet', 'permanent')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (created_at <= updated_at)
            )",
            [],
        )?;

        // Directed edges; the composite key forbids duplicates
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS links (
                zettel_id TEXT NOT NULL,
                link_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (zettel_id, link_id),
                CHECK (zettel_id <> link_id),
                FOREIGN KEY (zettel_id) REFERENCES zettels(id) ON DELETE CASCADE,
                FOREIGN KEY (link_id) REFERENCES zettels(id) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS history (
                zettel_id TEXT PRIMARY KEY,
                opened_at TEXT NOT NULL,
                FOREIGN KEY (zettel_id) REFERENCES zettels(id) ON DELETE CASCADE
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS workspace_zettels (
                workspace_id TEXT NOT NULL,
                zettel_id TEXT NOT NULL,
                PRIMARY KEY (workspace_id, zettel_id),
                FOREIGN KEY (workspace_id) REFERENCES workspaces(id) ON DELETE CASCADE,
                FOREIGN KEY (zettel_id) REFERENCES zettels(id) ON DELETE CASCADE
            )",
            [],
        )?;

        // FTS5 virtual table for full-text search on zettels
        self.conn.execute(
            "CREATE VIRTUAL TABLE IF NOT EXISTS zettels_fts USING fts5(
                title,
                content,
                content='zettels',
                content_rowid='rowid',
                tokenize='porter'
            )",
            [],
        )?;

        // FTS5 triggers to keep index in sync
        self.conn.execute(
            "CREATE TRIGGER IF NOT EXISTS zettels_ai AFTER INSERT ON zettels BEGIN
                INSERT INTO zettels_fts(rowid, title, content)
                VALUES (new.rowid, new.title, new.content);
            END",
            [],
        )?;

        self.conn.execute(
            "CREATE TRIGGER IF NOT EXISTS zettels_ad AFTER DELETE ON zettels BEGIN
                INSERT INTO zettels_fts(zettels_fts, rowid, title, content)
                VALUES ('delete', old.rowid, old.title, old.content);
            END",
            [],
        )?;

        self.conn.execute(
            "CREATE TRIGGER IF NOT EXISTS zettels_au AFTER UPDATE ON zettels BEGIN
                INSERT INTO zettels_fts(zettels_fts, rowid, title, content)
                VALUES ('delete', old.rowid, old.title, old.content);
                INSERT INTO zettels_fts(rowid, title, content)
                VALUES (new.rowid, new.title, new.content);
            END",
            [],
        )?;

        // Indexes for performance
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_zettels_created ON zettels(created_at DESC)",
            [],
        )?;

        // Backlink lookups go through link_id; outgoing ones use the primary key
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_links_link_id ON links(link_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_workspace_zettels_workspace
             ON workspace_zettels(workspace_id)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_workspace_zettels_zettel
             ON workspace_zettels(zettel_id)",
            [],
        )?;

        debug!("Schema ready");
        Ok(())
    }

    /// Count total zettels
    pub fn count_zettels(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM zettels", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count total link edges
    pub fn count_links(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count total workspaces
    pub fn count_workspaces(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM workspaces", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (fleet, permanent): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(kind = 'fleet'), 0), COALESCE(SUM(kind = 'permanent'), 0)
             FROM zettels",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreStats {
            zettels: (fleet + permanent) as usize,
            fleet: fleet as usize,
            permanent: permanent as usize,
            links: self.count_links()?,
            workspaces: self.count_workspaces()?,
        })
    }

    /// Remove every zettel and workspace; links, history and membership cascade
    pub fn reset(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM workspaces", [])?;
        let removed = tx.execute("DELETE FROM zettels", [])?;
        tx.commit()?;

        info!("Reset store ({} zettels removed)", removed);
        Ok(())
    }
}

pub(crate) fn zettel_exists(conn: &Connection, id: &ZettelId) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM zettels WHERE id = ?1",
            params![id.0],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    Ok(exists)
}

pub(crate) fn row_to_zettel(row: &Row) -> rusqlite::Result<Zettel> {
    let kind_raw: String = row.get(3)?;
    let kind: ZettelKind = kind_raw.parse().map_err(|e| conversion_error(3, e))?;

    Ok(Zettel::restore(
        ZettelId(row.get(0)?),
        row.get(1)?,
        row.get(2)?,
        kind,
        Timestamp {
            created_at: time_column(row, 4)?,
            updated_at: time_column(row, 5)?,
        },
    ))
}

pub(crate) fn time_column(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<chrono::DateTime<chrono::Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(&raw).map_err(|e| conversion_error(idx, e))
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub zettels: usize,
    pub fleet: usize,
    pub permanent: usize,
    pub links: usize,
    pub workspaces: usize,
}
