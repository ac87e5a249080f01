use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};
use zet_schemas::{format_time, Zettel, ZettelId, ZettelKind};

use crate::database::{row_to_zettel, Database, ZETTEL_COLUMNS};
use crate::error::{Result, StoreError};

const UPSERT_ZETTEL: &str = "INSERT INTO zettels (id, title, content, kind, created_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT (id) DO UPDATE SET
        title = excluded.title,
        content = excluded.content,
        kind = excluded.kind,
        updated_at = excluded.updated_at";

impl Database {
    /// Insert a zettel, or overwrite the editable fields of an existing one
    pub fn save_zettel(&self, zettel: &Zettel) -> Result<()> {
        upsert(&self.conn, zettel)?;
        debug!("Saved zettel: {} (kind: {})", zettel.id(), zettel.kind());
        Ok(())
    }

    /// Upsert many zettels atomically
    pub fn save_zettels(&self, zettels: &[Zettel]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for zettel in zettels {
            upsert(&tx, zettel)?;
        }
        tx.commit()?;

        info!("Saved {} zettels", zettels.len());
        Ok(())
    }

    /// Update an existing zettel; fails if it was never saved
    pub fn update_zettel(&self, zettel: &Zettel) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE zettels
             SET title = ?2, content = ?3, kind = ?4, updated_at = ?5
             WHERE id = ?1",
            params![
                zettel.id().0,
                zettel.title(),
                zettel.content(),
                zettel.kind().as_str(),
                format_time(&zettel.timestamp().updated_at),
            ],
        )?;

        if updated == 0 {
            return Err(StoreError::ZettelNotFound(zettel.id().clone()));
        }

        debug!("Updated zettel: {}", zettel.id());
        Ok(())
    }

    /// Get a zettel by ID, without its links
    pub fn get_zettel(&self, id: &ZettelId) -> Result<Zettel> {
        self.find_zettel(id)?
            .ok_or_else(|| StoreError::ZettelNotFound(id.clone()))
    }

    pub fn find_zettel(&self, id: &ZettelId) -> Result<Option<Zettel>> {
        let zettel = self
            .conn
            .query_row(
                &format!("SELECT {} FROM zettels WHERE id = ?1", ZETTEL_COLUMNS),
                params![id.0],
                row_to_zettel,
            )
            .optional()?;
        Ok(zettel)
    }

    /// Get a zettel with its outgoing links and incoming backlinks populated
    pub fn get_zettel_with_links(&self, id: &ZettelId) -> Result<Zettel> {
        let zettel = self.get_zettel(id)?;
        let links = self.link_edges(id)?;
        let backlinks = self.backlink_edges(id)?;
        Ok(zettel.with_links(links, backlinks))
    }

    /// Delete a zettel; its links, history and workspace membership go with it
    pub fn delete_zettel(&self, id: &ZettelId) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM zettels WHERE id = ?1", params![id.0])?;

        if deleted == 0 {
            return Err(StoreError::ZettelNotFound(id.clone()));
        }

        info!("Deleted zettel: {}", id);
        Ok(())
    }

    /// Delete many zettels atomically. Already-missing ids are skipped.
    pub fn delete_zettels(&self, ids: &[ZettelId]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM zettels WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute(params![id.0])?;
            }
        }
        tx.commit()?;

        info!("Deleted {} of {} zettels", deleted, ids.len());
        Ok(deleted)
    }

    /// List zettels newest first, optionally restricted to one kind
    pub fn list_zettels(&self, kind: Option<ZettelKind>) -> Result<Vec<Zettel>> {
        let zettels = match kind {
            Some(kind) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM zettels
                     WHERE kind = ?1
                     ORDER BY created_at DESC, rowid DESC",
                    ZETTEL_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![kind.as_str()], row_to_zettel)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {} FROM zettels ORDER BY created_at DESC, rowid DESC",
                    ZETTEL_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], row_to_zettel)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        Ok(zettels)
    }

    /// Full-text search over title and content, best match first
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Zettel>> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(
            "SELECT z.id, z.title, z.content, z.kind, z.created_at, z.updated_at
             FROM zettels z
             JOIN zettels_fts ON z.rowid = zettels_fts.rowid
             WHERE zettels_fts MATCH ?1
             ORDER BY zettels_fts.rank
             LIMIT ?2",
        )?;

        let zettels = stmt
            .query_map(params![fts_query, limit as i64], row_to_zettel)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Search {:?} matched {} zettels", query, zettels.len());
        Ok(zettels)
    }
}

pub(crate) fn upsert(conn: &rusqlite::Connection, zettel: &Zettel) -> Result<()> {
    conn.execute(
        UPSERT_ZETTEL,
        params![
            zettel.id().0,
            zettel.title(),
            zettel.content(),
            zettel.kind().as_str(),
            format_time(&zettel.timestamp().created_at),
            format_time(&zettel.timestamp().updated_at),
        ],
    )?;
    Ok(())
}

/// Quote every term so user input is matched literally instead of being
/// parsed as FTS5 syntax. Terms are ANDed.
fn fts_query(raw: &str) -> Option<String> {
    let terms: Vec<String> = raw
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}
