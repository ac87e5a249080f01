use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::debug;
use zet_schemas::{format_time, now, rfc3339_millis, Zettel, ZettelId};

use crate::database::{row_to_zettel, time_column, zettel_exists, Database};
use crate::error::{Result, StoreError};

/// A zettel together with the last time it was opened
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub zettel: Zettel,
    #[serde(with = "rfc3339_millis")]
    pub opened_at: DateTime<Utc>,
}

impl Database {
    /// Mark a zettel as opened now. One row per zettel; the latest open wins.
    ///
    /// The row is replaced rather than updated so it gets a fresh rowid, which
    /// orders opens that land in the same millisecond.
    pub fn record_open(&self, id: &ZettelId) -> Result<()> {
        if !zettel_exists(&self.conn, id)? {
            return Err(StoreError::ZettelNotFound(id.clone()));
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO history (zettel_id, opened_at) VALUES (?1, ?2)",
            params![id.0, format_time(&now())],
        )?;

        debug!("Recorded open: {}", id);
        Ok(())
    }

    /// Recently opened zettels, newest first
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT z.id, z.title, z.content, z.kind, z.created_at, z.updated_at, h.opened_at
             FROM history h
             JOIN zettels z ON z.id = h.zettel_id
             ORDER BY h.opened_at DESC, h.rowid DESC
             LIMIT ?1",
        )?;

        let entries = stmt
            .query_map(params![limit as i64], |row| {
                Ok(HistoryEntry {
                    zettel: row_to_zettel(row)?,
                    opened_at: time_column(row, 6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    pub fn last_opened(&self) -> Result<Option<Zettel>> {
        Ok(self.history(1)?.into_iter().next().map(|entry| entry.zettel))
    }
}
