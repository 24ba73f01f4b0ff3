//! Requester directory database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DbResult};
use crate::models::{NewRequester, Requester};

const REQUESTER_COLUMNS: &str = "id, name, address, contact, national_id, created_at";

impl Database {
    /// Insert a requester. A duplicate national id is a constraint violation.
    pub fn insert_requester(&self, requester: &NewRequester) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO requesters (name, address, contact, national_id) VALUES (?1, ?2, ?3, ?4)",
            params![
                requester.name.trim(),
                requester.address,
                requester.contact,
                requester.national_id.trim(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Get a requester by ID.
    pub fn get_requester(&self, id: i64) -> DbResult<Option<Requester>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {REQUESTER_COLUMNS} FROM requesters WHERE id = ?"),
                [id],
                map_requester,
            )
            .optional()?)
    }

    pub fn requester_exists(&self, id: i64) -> DbResult<bool> {
        Ok(self.get_requester(id)?.is_some())
    }

    /// List all requesters alphabetically.
    pub fn list_requesters(&self) -> DbResult<Vec<Requester>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUESTER_COLUMNS} FROM requesters ORDER BY name COLLATE NOCASE, id"
        ))?;
        let rows = stmt.query_map([], map_requester)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn map_requester(row: &Row<'_>) -> rusqlite::Result<Requester> {
    Ok(Requester {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
        contact: row.get(3)?,
        national_id: row.get(4)?,
        created_at: row.get(5)?,
    })
}
