use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use tracing::{debug, info};
use zet_schemas::{format_time, now, Timestamp, Workspace, WorkspaceId, Zettel, ZettelId};

use crate::database::{row_to_zettel, time_column, zettel_exists, Database};
use crate::error::{Result, StoreError};
use crate::zettels::upsert;

impl Database {
    /// Insert or update a workspace and replace its zettel membership
    pub fn save_workspace(&self, workspace: &Workspace) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            "INSERT INTO workspaces (id, path, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET
                path = excluded.path,
                updated_at = excluded.updated_at",
            params![
                workspace.id().0,
                workspace.path(),
                format_time(&workspace.timestamp().created_at),
                format_time(&workspace.timestamp().updated_at),
            ],
        )?;
        replace_members(&tx, workspace)?;
        tx.commit()?;

        info!("Saved workspace: {} ({})", workspace.path(), workspace.id());
        Ok(())
    }

    /// Update an existing workspace; fails if it was never saved
    pub fn update_workspace(&self, workspace: &Workspace) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        let updated = tx.execute(
            "UPDATE workspaces SET path = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                workspace.id().0,
                workspace.path(),
                format_time(&workspace.timestamp().updated_at),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::WorkspaceNotFound(workspace.id().clone()));
        }
        replace_members(&tx, workspace)?;
        tx.commit()?;

        debug!("Updated workspace: {}", workspace.id());
        Ok(())
    }

    /// Save a zettel and add it to a workspace in one transaction. Nothing is
    /// written when the workspace does not exist.
    pub fn save_zettel_in_workspace(
        &self,
        zettel: &Zettel,
        workspace_id: &WorkspaceId,
    ) -> Result<Workspace> {
        let tx = self.conn.unchecked_transaction()?;

        let touched = tx.execute(
            "UPDATE workspaces SET updated_at = ?2 WHERE id = ?1",
            params![workspace_id.0, format_time(&now())],
        )?;
        if touched == 0 {
            return Err(StoreError::WorkspaceNotFound(workspace_id.clone()));
        }

        upsert(&tx, zettel)?;
        tx.execute(
            "INSERT OR IGNORE INTO workspace_zettels (workspace_id, zettel_id)
             VALUES (?1, ?2)",
            params![workspace_id.0, zettel.id().0],
        )?;
        tx.commit()?;

        info!("Saved zettel {} into workspace {}", zettel.id(), workspace_id);
        self.get_workspace(workspace_id)
    }

    pub fn get_workspace(&self, id: &WorkspaceId) -> Result<Workspace> {
        let row = self
            .conn
            .query_row(
                "SELECT id, path, created_at, updated_at FROM workspaces WHERE id = ?1",
                params![id.0],
                row_to_workspace_parts,
            )
            .optional()?;

        let (id, path, timestamp) =
            row.ok_or_else(|| StoreError::WorkspaceNotFound(id.clone()))?;
        let members = member_ids(&self.conn, &id)?;
        Ok(Workspace::restore(id, path, members, timestamp))
    }

    /// All workspaces, oldest first, each with its zettel ids
    pub fn list_workspaces(&self) -> Result<Vec<Workspace>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, created_at, updated_at
             FROM workspaces
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt
            .query_map([], row_to_workspace_parts)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, path, timestamp)| {
                let members = member_ids(&self.conn, &id)?;
                Ok(Workspace::restore(id, path, members, timestamp))
            })
            .collect()
    }

    /// Delete a workspace. Member zettels are kept.
    pub fn delete_workspace(&self, id: &WorkspaceId) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM workspaces WHERE id = ?1", params![id.0])?;

        if deleted == 0 {
            return Err(StoreError::WorkspaceNotFound(id.clone()));
        }

        info!("Deleted workspace: {}", id);
        Ok(())
    }

    /// Zettels that belong to a workspace, newest first
    pub fn workspace_zettels(&self, id: &WorkspaceId) -> Result<Vec<Zettel>> {
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM workspaces WHERE id = ?1",
                params![id.0],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::WorkspaceNotFound(id.clone()));
        }

        let mut stmt = self.conn.prepare(
            "SELECT z.id, z.title, z.content, z.kind, z.created_at, z.updated_at
             FROM zettels z
             JOIN workspace_zettels wz ON z.id = wz.zettel_id
             WHERE wz.workspace_id = ?1
             ORDER BY z.created_at DESC, z.rowid DESC",
        )?;

        let zettels = stmt
            .query_map(params![id.0], row_to_zettel)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(zettels)
    }
}

fn replace_members(conn: &Connection, workspace: &Workspace) -> Result<()> {
    conn.execute(
        "DELETE FROM workspace_zettels WHERE workspace_id = ?1",
        params![workspace.id().0],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO workspace_zettels (workspace_id, zettel_id)
         VALUES (?1, ?2)",
    )?;
    for zettel_id in workspace.zettel_ids() {
        if !zettel_exists(conn, zettel_id)? {
            return Err(StoreError::ZettelNotFound(zettel_id.clone()));
        }
        stmt.execute(params![workspace.id().0, zettel_id.0])?;
    }
    Ok(())
}

fn member_ids(conn: &Connection, id: &WorkspaceId) -> Result<BTreeSet<ZettelId>> {
    let mut stmt =
        conn.prepare("SELECT zettel_id FROM workspace_zettels WHERE workspace_id = ?1")?;
    let ids = stmt
        .query_map(params![id.0], |row| Ok(ZettelId(row.get(0)?)))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;
    Ok(ids)
}

fn row_to_workspace_parts(
    row: &rusqlite::Row,
) -> rusqlite::Result<(WorkspaceId, String, Timestamp)> {
    Ok((
        WorkspaceId(row.get(0)?),
        row.get(1)?,
        Timestamp {
            created_at: time_column(row, 2)?,
            updated_at: time_column(row, 3)?,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use zet_schemas::{generate_workspace_id, generate_zettel_id, ZettelKind};

    fn workspace(dir: &TempDir) -> Workspace {
        Workspace::new(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_workspace_roundtrip_with_members() {
        let db = Database::in_memory().unwrap();
        let dir = TempDir::new().unwrap();

        let a = Zettel::new("a", "first", ZettelKind::Fleet).unwrap();
        let b = Zettel::new("b", "second", ZettelKind::Permanent).unwrap();
        db.save_zettels(&[a.clone(), b.clone()]).unwrap();

        let mut ws = workspace(&dir);
        ws.add_zettel(a.id().clone());
        ws.add_zettel(b.id().clone());
        db.save_workspace(&ws).unwrap();

        let loaded = db.get_workspace(ws.id()).unwrap();
        assert_eq!(loaded.path(), ws.path());
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(a.id()));
        assert_eq!(loaded.timestamp(), ws.timestamp());

        assert_eq!(db.workspace_zettels(ws.id()).unwrap().len(), 2);
    }

    #[test]
    fn test_save_replaces_membership() {
        let db = Database::in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let a = Zettel::new("a", "first", ZettelKind::Fleet).unwrap();
        db.save_zettel(&a).unwrap();

        let mut ws = workspace(&dir);
        ws.add_zettel(a.id().clone());
        db.save_workspace(&ws).unwrap();

        ws.remove_zettel(a.id());
        db.save_workspace(&ws).unwrap();

        assert!(db.get_workspace(ws.id()).unwrap().is_empty());
        assert_eq!(db.count_workspaces().unwrap(), 1);
    }

    #[test]
    fn test_unknown_member_rolls_back() {
        let db = Database::in_memory().unwrap();
        let dir = TempDir::new().unwrap();

        let mut ws = workspace(&dir);
        ws.add_zettel(generate_zettel_id());

        assert!(matches!(
            db.save_workspace(&ws),
            Err(StoreError::ZettelNotFound(_))
        ));
        assert_eq!(db.count_workspaces().unwrap(), 0);
    }

    #[test]
    fn test_update_and_delete_missing_workspace() {
        let db = Database::in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);

        assert!(matches!(
            db.update_workspace(&ws),
            Err(StoreError::WorkspaceNotFound(_))
        ));
        assert!(matches!(
            db.delete_workspace(ws.id()),
            Err(StoreError::WorkspaceNotFound(_))
        ));
        assert!(matches!(
            db.get_workspace(&generate_workspace_id()),
            Err(StoreError::WorkspaceNotFound(_))
        ));
    }

    #[test]
    fn test_update_changes_path() {
        let db = Database::in_memory().unwrap();
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();

        let mut ws = workspace(&first);
        db.save_workspace(&ws).unwrap();

        ws.set_path(second.path().to_str().unwrap()).unwrap();
        db.update_workspace(&ws).unwrap();

        assert_eq!(
            db.get_workspace(ws.id()).unwrap().path(),
            second.path().to_str().unwrap()
        );
    }

    #[test]
    fn test_save_zettel_in_workspace() {
        let db = Database::in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        db.save_workspace(&ws).unwrap();

        let z = Zettel::new("member", "lives here", ZettelKind::Fleet).unwrap();
        let updated = db.save_zettel_in_workspace(&z, ws.id()).unwrap();

        assert!(updated.contains(z.id()));
        assert!(updated.timestamp().updated_at >= ws.timestamp().updated_at);
        assert_eq!(db.workspace_zettels(ws.id()).unwrap().len(), 1);
    }

    #[test]
    fn test_save_zettel_in_missing_workspace_writes_nothing() {
        let db = Database::in_memory().unwrap();
        let z = Zettel::new("orphan", "no home", ZettelKind::Fleet).unwrap();

        assert!(matches!(
            db.save_zettel_in_workspace(&z, &generate_workspace_id()),
            Err(StoreError::WorkspaceNotFound(_))
        ));
        assert_eq!(db.count_zettels().unwrap(), 0);
    }

    #[test]
    fn test_failed_membership_write_rolls_back_zettel() {
        let db = Database::in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let ws = workspace(&dir);
        db.save_workspace(&ws).unwrap();

        db.conn
            .execute(
                "CREATE TEMP TRIGGER block_membership BEFORE INSERT ON workspace_zettels
                 BEGIN SELECT RAISE(ABORT, 'membership blocked'); END",
                [],
            )
            .unwrap();

        let z = Zettel::new("member", "lives here", ZettelKind::Fleet).unwrap();
        assert!(db.save_zettel_in_workspace(&z, ws.id()).is_err());
        assert_eq!(db.count_zettels().unwrap(), 0);
        assert!(db.get_workspace(ws.id()).unwrap().is_empty());
    }

    #[test]
    fn test_membership_follows_deletes_on_both_sides() {
        let db = Database::in_memory().unwrap();
        let dir = TempDir::new().unwrap();
        let a = Zettel::new("a", "first", ZettelKind::Fleet).unwrap();
        let b = Zettel::new("b", "second", ZettelKind::Fleet).unwrap();
        db.save_zettels(&[a.clone(), b.clone()]).unwrap();

        let mut ws = workspace(&dir);
        ws.add_zettel(a.id().clone());
        ws.add_zettel(b.id().clone());
        db.save_workspace(&ws).unwrap();

        db.delete_zettel(a.id()).unwrap();
        let loaded = db.get_workspace(ws.id()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains(b.id()));

        db.delete_workspace(ws.id()).unwrap();
        assert_eq!(db.count_zettels().unwrap(), 1);
        assert_eq!(db.list_workspaces().unwrap().len(), 0);
    }
}
