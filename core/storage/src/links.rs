use rusqlite::{params, Connection};
use tracing::{debug, info};
use zet_schemas::{format_time, now, Link, SchemaError, Zettel, ZettelId};

use crate::database::{row_to_zettel, time_column, zettel_exists, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Link `from` to every target. Existing edges are kept as they are, so
    /// calling this twice never duplicates an edge. Either every edge is
    /// written or none is. Returns the number of new edges.
    pub fn link(&self, from: &ZettelId, targets: &[ZettelId]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_zettel(&tx, from)?;

        let created_at = format_time(&now());
        let mut created = 0;
        for to in targets {
            if to == from {
                return Err(SchemaError::SelfLink(from.clone()).into());
            }
            ensure_zettel(&tx, to)?;
            created += insert_edge(&tx, from, to, &created_at)?;
        }
        tx.commit()?;

        info!("Linked {} -> {} targets ({} new)", from, targets.len(), created);
        Ok(created)
    }

    /// Write arbitrary edges in one transaction, with the same rules as `link`
    pub fn link_bulk(&self, links: &[Link]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;

        let mut created = 0;
        for link in links {
            if link.from == link.to {
                return Err(SchemaError::SelfLink(link.from.clone()).into());
            }
            ensure_zettel(&tx, &link.from)?;
            ensure_zettel(&tx, &link.to)?;
            created += insert_edge(&tx, &link.from, &link.to, &format_time(&link.created_at))?;
        }
        tx.commit()?;

        info!("Bulk linked {} edges ({} new)", links.len(), created);
        Ok(created)
    }

    /// Remove the edges `from -> target`. Missing edges are ignored.
    pub fn unlink(&self, from: &ZettelId, targets: &[ZettelId]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_zettel(&tx, from)?;

        let mut removed = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM links WHERE zettel_id = ?1 AND link_id = ?2")?;
            for to in targets {
                removed += stmt.execute(params![from.0, to.0])?;
            }
        }
        tx.commit()?;

        info!("Unlinked {} from {} targets ({} removed)", from, targets.len(), removed);
        Ok(removed)
    }

    /// Zettels that `id` links to, oldest edge first
    pub fn links(&self, id: &ZettelId) -> Result<Vec<Zettel>> {
        ensure_zettel(&self.conn, id)?;

        let mut stmt = self.conn.prepare(
            "SELECT z.id, z.title, z.content, z.kind, z.created_at, z.updated_at
             FROM zettels z
             JOIN links l ON z.id = l.link_id
             WHERE l.zettel_id = ?1
             ORDER BY l.created_at ASC, l.rowid ASC",
        )?;

        let zettels = stmt
            .query_map(params![id.0], row_to_zettel)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(zettels)
    }

    /// Zettels that link to `id`, oldest edge first
    pub fn backlinks(&self, id: &ZettelId) -> Result<Vec<Zettel>> {
        ensure_zettel(&self.conn, id)?;

        let mut stmt = self.conn.prepare(
            "SELECT z.id, z.title, z.content, z.kind, z.created_at, z.updated_at
             FROM zettels z
             JOIN links l ON z.id = l.zettel_id
             WHERE l.link_id = ?1
             ORDER BY l.created_at ASC, l.rowid ASC",
        )?;

        let zettels = stmt
            .query_map(params![id.0], row_to_zettel)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(zettels)
    }

    /// Outgoing edges of `id`
    pub fn link_edges(&self, id: &ZettelId) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT zettel_id, link_id, created_at
             FROM links
             WHERE zettel_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let edges = stmt
            .query_map(params![id.0], row_to_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(edges)
    }

    /// Incoming edges of `id`
    pub fn backlink_edges(&self, id: &ZettelId) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare(
            "SELECT zettel_id, link_id, created_at
             FROM links
             WHERE link_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let edges = stmt
            .query_map(params![id.0], row_to_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(edges)
    }
}

fn ensure_zettel(conn: &Connection, id: &ZettelId) -> Result<()> {
    if zettel_exists(conn, id)? {
        Ok(())
    } else {
        Err(StoreError::ZettelNotFound(id.clone()))
    }
}

fn insert_edge(
    conn: &Connection,
    from: &ZettelId,
    to: &ZettelId,
    created_at: &str,
) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO links (zettel_id, link_id, created_at) VALUES (?1, ?2, ?3)",
        params![from.0, to.0, created_at],
    )?;

    if inserted == 0 {
        debug!("Link already exists: {} -> {}", from, to);
    }
    Ok(inserted)
}

fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<Link> {
    Ok(Link {
        from: ZettelId(row.get(0)?),
        to: ZettelId(row.get(1)?),
        created_at: time_column(row, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zet_schemas::{generate_zettel_id, ZettelKind};

    fn seed(db: &Database, titles: &[&str]) -> Vec<Zettel> {
        let zettels: Vec<Zettel> = titles
            .iter()
            .map(|title| {
                Zettel::new(title, &format!("about {}", title), ZettelKind::Fleet).unwrap()
            })
            .collect();
        db.save_zettels(&zettels).unwrap();
        zettels
    }

    fn titles(zettels: &[Zettel]) -> Vec<&str> {
        zettels.iter().map(|z| z.title()).collect()
    }

    #[test]
    fn test_links_and_backlinks_are_symmetric() {
        let db = Database::in_memory().unwrap();
        let z = seed(&db, &["a", "b", "c"]);

        let created = db
            .link(z[0].id(), &[z[1].id().clone(), z[2].id().clone()])
            .unwrap();
        assert_eq!(created, 2);
        db.link(z[1].id(), &[z[2].id().clone()]).unwrap();

        assert_eq!(titles(&db.links(z[0].id()).unwrap()), vec!["b", "c"]);
        assert!(db.backlinks(z[0].id()).unwrap().is_empty());
        assert_eq!(titles(&db.backlinks(z[2].id()).unwrap()), vec!["a", "b"]);

        let hydrated = db.get_zettel_with_links(z[1].id()).unwrap();
        assert!(hydrated.links_to(z[2].id()));
        assert!(hydrated.linked_from(z[0].id()));
        assert_eq!(hydrated.links().len(), 1);
        assert_eq!(hydrated.backlinks().len(), 1);
    }

    #[test]
    fn test_duplicate_edges_are_ignored() {
        let db = Database::in_memory().unwrap();
        let z = seed(&db, &["a", "b"]);

        assert_eq!(db.link(z[0].id(), &[z[1].id().clone()]).unwrap(), 1);
        let first = db.link_edges(z[0].id()).unwrap();

        assert_eq!(
            db.link(z[0].id(), &[z[1].id().clone(), z[1].id().clone()])
                .unwrap(),
            0
        );
        assert_eq!(db.count_links().unwrap(), 1);
        // original edge untouched
        assert_eq!(db.link_edges(z[0].id()).unwrap(), first);
    }

    #[test]
    fn test_reverse_edge_is_distinct() {
        let db = Database::in_memory().unwrap();
        let z = seed(&db, &["a", "b"]);

        db.link(z[0].id(), &[z[1].id().clone()]).unwrap();
        db.link(z[1].id(), &[z[0].id().clone()]).unwrap();

        assert_eq!(db.count_links().unwrap(), 2);
        assert_eq!(titles(&db.links(z[0].id()).unwrap()), vec!["b"]);
        assert_eq!(titles(&db.backlinks(z[0].id()).unwrap()), vec!["b"]);
    }

    #[test]
    fn test_link_is_all_or_nothing() {
        let db = Database::in_memory().unwrap();
        let z = seed(&db, &["a", "b"]);
        let missing = generate_zettel_id();

        let err = db
            .link(z[0].id(), &[z[1].id().clone(), missing.clone()])
            .unwrap_err();
        assert!(matches!(err, StoreError::ZettelNotFound(ref id) if *id == missing));
        assert_eq!(db.count_links().unwrap(), 0);

        let err = db
            .link(z[0].id(), &[z[1].id().clone(), z[0].id().clone()])
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema(SchemaError::SelfLink(_))));
        assert_eq!(db.count_links().unwrap(), 0);

        assert!(matches!(
            db.link(&missing, &[z[0].id().clone()]),
            Err(StoreError::ZettelNotFound(_))
        ));
    }

    #[test]
    fn test_delete_cascades_edges_both_ways() {
        let db = Database::in_memory().unwrap();
        let z = seed(&db, &["a", "b", "c"]);

        db.link(z[0].id(), &[z[1].id().clone()]).unwrap();
        db.link(z[1].id(), &[z[2].id().clone()]).unwrap();
        db.link(z[2].id(), &[z[0].id().clone()]).unwrap();

        db.delete_zettel(z[1].id()).unwrap();

        assert_eq!(db.count_links().unwrap(), 1);
        assert!(db.links(z[0].id()).unwrap().is_empty());
        assert!(db.backlinks(z[2].id()).unwrap().is_empty());
        assert_eq!(titles(&db.backlinks(z[0].id()).unwrap()), vec!["c"]);
        assert!(db.link_edges(z[1].id()).unwrap().is_empty());
        assert!(db.backlink_edges(z[1].id()).unwrap().is_empty());
    }

    #[test]
    fn test_unlink() {
        let db = Database::in_memory().unwrap();
        let z = seed(&db, &["a", "b", "c"]);
        db.link(z[0].id(), &[z[1].id().clone(), z[2].id().clone()])
            .unwrap();

        let removed = db
            .unlink(z[0].id(), &[z[1].id().clone(), generate_zettel_id()])
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(titles(&db.links(z[0].id()).unwrap()), vec!["c"]);
        assert!(db.backlinks(z[1].id()).unwrap().is_empty());

        // unlinking an absent edge is a no-op
        assert_eq!(db.unlink(z[0].id(), &[z[1].id().clone()]).unwrap(), 0);
    }

    #[test]
    fn test_link_bulk_mirrors_in_memory_model() {
        let db = Database::in_memory().unwrap();
        let mut z = seed(&db, &["a", "b", "c"]);

        let (head, tail) = z.split_at_mut(1);
        head[0].add_link(&mut tail[0]).unwrap();
        head[0].add_link(&mut tail[1]).unwrap();

        let created = db.link_bulk(z[0].links()).unwrap();
        assert_eq!(created, 2);
        assert_eq!(db.link_edges(z[0].id()).unwrap(), z[0].links().to_vec());
        assert_eq!(db.backlink_edges(z[1].id()).unwrap(), z[1].backlinks().to_vec());

        let bad = Link {
            from: z[2].id().clone(),
            to: z[2].id().clone(),
            created_at: now(),
        };
        assert!(db.link_bulk(&[bad]).is_err());
        assert_eq!(db.count_links().unwrap(), 2);
    }

    #[test]
    fn test_queries_on_missing_zettel() {
        let db = Database::in_memory().unwrap();
        let missing = generate_zettel_id();

        assert!(matches!(db.links(&missing), Err(StoreError::ZettelNotFound(_))));
        assert!(matches!(db.backlinks(&missing), Err(StoreError::ZettelNotFound(_))));
        assert!(matches!(
            db.unlink(&missing, &[]),
            Err(StoreError::ZettelNotFound(_))
        ));
    }
}
