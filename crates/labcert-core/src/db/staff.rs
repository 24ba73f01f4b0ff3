//! Staff directory database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{escape_like, Database, DbError, DbResult};
use crate::access::Role;
use crate::models::{NewStaffMember, StaffMember};

impl Database {
    /// Insert a staff member together with their roles in one transaction.
    pub fn insert_staff(&self, member: &NewStaffMember) -> DbResult<i64> {
        let tx = self.write_transaction()?;
        tx.execute(
            "INSERT INTO staff (name, email) VALUES (?1, ?2)",
            params![member.name.trim(), member.email.trim().to_lowercase()],
        )?;
        let id = tx.last_insert_rowid();
        for role in &member.roles {
            tx.execute(
                "INSERT OR IGNORE INTO staff_roles (staff_id, role) VALUES (?1, ?2)",
                params![id, role.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    /// Get a staff member by ID.
    pub fn get_staff(&self, id: i64) -> DbResult<Option<StaffMember>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, email, active FROM staff WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, bool>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, name, email, active)) => Ok(Some(StaffMember {
                id,
                name,
                email,
                active,
                roles: roles_for(&self.conn, id)?,
            })),
            None => Ok(None),
        }
    }

    /// Find a staff member by email (case-insensitive).
    pub fn find_staff_by_email(&self, email: &str) -> DbResult<Option<StaffMember>> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM staff WHERE email = ?",
                [email.trim().to_lowercase()],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => self.get_staff(id),
            None => Ok(None),
        }
    }

    /// List active staff, optionally restricted to holders of `role`.
    pub fn list_staff(&self, role: Option<Role>) -> DbResult<Vec<StaffMember>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT s.id FROM staff s
            WHERE s.active = 1
              AND (?1 IS NULL OR EXISTS (
                    SELECT 1 FROM staff_roles r WHERE r.staff_id = s.id AND r.role = ?1))
            ORDER BY s.name COLLATE NOCASE, s.id
            "#,
        )?;
        let ids = stmt
            .query_map([role.map(|r| r.as_str())], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(member) = self.get_staff(id)? {
                members.push(member);
            }
        }
        Ok(members)
    }

    /// Replace a staff member's name, email and roles in one transaction.
    /// Returns `Ok(false)` when the member does not exist.
    pub fn update_staff(&self, id: i64, member: &NewStaffMember) -> DbResult<bool> {
        let tx = self.write_transaction()?;
        let rows_affected = tx.execute(
            "UPDATE staff SET name = ?2, email = ?3 WHERE id = ?1",
            params![id, member.name.trim(), member.email.trim().to_lowercase()],
        )?;
        if rows_affected == 0 {
            return Ok(false);
        }
        tx.execute("DELETE FROM staff_roles WHERE staff_id = ?", [id])?;
        for role in &member.roles {
            tx.execute(
                "INSERT OR IGNORE INTO staff_roles (staff_id, role) VALUES (?1, ?2)",
                params![id, role.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Every staff member, active or not, whose name or email contains
    /// `text`. Newest first.
    pub fn search_staff(&self, text: Option<&str>) -> DbResult<Vec<StaffMember>> {
        let pattern = text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| format!("%{}%", escape_like(&t.to_lowercase())));
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id FROM staff
            WHERE ?1 IS NULL
               OR lower(name) LIKE ?1 ESCAPE '\'
               OR email LIKE ?1 ESCAPE '\'
            ORDER BY id DESC
            "#,
        )?;
        let ids = stmt
            .query_map([pattern], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut members = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(member) = self.get_staff(id)? {
                members.push(member);
            }
        }
        Ok(members)
    }

    /// Activate or deactivate a staff member.
    pub fn set_staff_active(&self, id: i64, active: bool) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE staff SET active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        Ok(rows_affected > 0)
    }
}

fn roles_for(conn: &Connection, staff_id: i64) -> DbResult<Vec<Role>> {
    let mut stmt =
        conn.prepare("SELECT role FROM staff_roles WHERE staff_id = ? ORDER BY role")?;
    let names = stmt
        .query_map([staff_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut roles: Vec<Role> = names
        .iter()
        .map(|name| {
            Role::parse(name).ok_or_else(|| DbError::Constraint(format!("Unknown role: {name}")))
        })
        .collect::<Result<_, _>>()?;
    roles.sort();
    Ok(roles)
}
