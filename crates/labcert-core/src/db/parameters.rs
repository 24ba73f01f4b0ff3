//! Parameter and norm database operations.

use rusqlite::{named_params, params, OptionalExtension, Row, ToSql};

use super::{escape_like, Database, DbError, DbResult};
use crate::models::{Norm, NormOperator, Parameter, ParameterFilter, ParameterView, SampleType};

/// Parameter columns, the norm join, and the latest saved result for `:sample`.
const PARAMETER_VIEW_SELECT: &str = r#"
    SELECT p.id, p.name, p.sample_type, p.unit,
           pn.norm_id, pn.operator, pn.lower_bound, pn.upper_bound,
           n.description, n.source, n.sample_type,
           r.result, r.within_norm
    FROM parameters p
    LEFT JOIN parameter_norms pn ON pn.parameter_id = p.id
    LEFT JOIN norms n ON n.id = pn.norm_id
    LEFT JOIN test_results r
        ON r.id = (SELECT MAX(id) FROM test_results
                   WHERE sample_id = :sample AND parameter_id = p.id)
"#;

/// Values written by [`Database::upsert_norm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormRecord {
    pub operator: Option<NormOperator>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub sample_type: Option<SampleType>,
}

impl Database {
    /// Insert a parameter.
    pub fn insert_parameter(
        &self,
        name: &str,
        sample_type: SampleType,
        unit: Option<&str>,
    ) -> DbResult<i64> {
        self.conn.execute(
            "INSERT INTO parameters (name, sample_type, unit) VALUES (?1, ?2, ?3)",
            params![name, sample_type.as_str(), unit],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Replace a parameter's fields and keep its norm's sample type in step.
    ///
    /// Returns `Ok(false)` when the parameter does not exist and
    /// [`DbError::Constraint`] when the sample type would change while
    /// results or sample assignments reference the parameter.
    pub fn update_parameter(
        &self,
        id: i64,
        name: &str,
        sample_type: SampleType,
        unit: Option<&str>,
    ) -> DbResult<bool> {
        let tx = self.write_transaction()?;

        let current: Option<String> = tx
            .query_row("SELECT sample_type FROM parameters WHERE id = ?", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };

        if current != sample_type.as_str() {
            let (results, assignments): (i64, i64) = tx.query_row(
                r#"
                SELECT (SELECT COUNT(*) FROM test_results WHERE parameter_id = ?1),
                       (SELECT COUNT(*) FROM sample_parameters WHERE parameter_id = ?1)
                "#,
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if results > 0 || assignments > 0 {
                return Err(DbError::Constraint(format!(
                    "parameter {id} is referenced by {results} test result(s) and {assignments} sample assignment(s)"
                )));
            }
            tx.execute(
                "UPDATE norms SET sample_type = ?2 WHERE id IN (SELECT norm_id FROM parameter_norms WHERE parameter_id = ?1)",
                params![id, sample_type.as_str()],
            )?;
        }

        tx.execute(
            "UPDATE parameters SET name = ?2, sample_type = ?3, unit = ?4 WHERE id = ?1",
            params![id, name, sample_type.as_str(), unit],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Get a parameter by ID.
    pub fn get_parameter(&self, id: i64) -> DbResult<Option<Parameter>> {
        self.conn
            .query_row(
                "SELECT id, name, sample_type, unit FROM parameters WHERE id = ?",
                [id],
                |row| {
                    Ok(ParameterRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        sample_type: row.get(2)?,
                        unit: row.get(3)?,
                    })
                },
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Delete a parameter and its norm in one transaction.
    ///
    /// Returns `Ok(false)` when the parameter does not exist and
    /// [`DbError::Constraint`] when results or sample assignments still
    /// reference it.
    pub fn delete_parameter(&self, id: i64) -> DbResult<bool> {
        let tx = self.write_transaction()?;

        let (results, assignments): (i64, i64) = tx.query_row(
            r#"
            SELECT (SELECT COUNT(*) FROM test_results WHERE parameter_id = ?1),
                   (SELECT COUNT(*) FROM sample_parameters WHERE parameter_id = ?1)
            "#,
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if results > 0 || assignments > 0 {
            return Err(DbError::Constraint(format!(
                "parameter {id} is referenced by {results} test result(s) and {assignments} sample assignment(s)"
            )));
        }

        let norm_id: Option<i64> = tx
            .query_row(
                "SELECT norm_id FROM parameter_norms WHERE parameter_id = ?",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute("DELETE FROM parameter_norms WHERE parameter_id = ?", [id])?;
        if let Some(norm_id) = norm_id {
            tx.execute(
                "DELETE FROM norms WHERE id = ?1 AND NOT EXISTS (SELECT 1 FROM parameter_norms WHERE norm_id = ?1)",
                [norm_id],
            )?;
        }
        let rows_affected = tx.execute("DELETE FROM parameters WHERE id = ?", [id])?;
        if rows_affected == 0 {
            return Ok(false);
        }
        tx.commit()?;
        Ok(true)
    }

    /// Parameters matching `filter`, newest first, with norm and (for a
    /// sample context) the latest saved result.
    pub fn list_parameters(&self, filter: &ParameterFilter) -> DbResult<Vec<ParameterView>> {
        let pattern = filter
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| format!("%{}%", escape_like(&t.to_lowercase())));
        let sample_type = filter.sample_type.map(|t| t.as_str());

        let sql = format!(
            r#"{PARAMETER_VIEW_SELECT}
            WHERE (:type IS NULL OR p.sample_type = :type)
              AND (:text IS NULL
                   OR lower(p.name) LIKE :text ESCAPE '\'
                   OR lower(coalesce(p.unit, '')) LIKE :text ESCAPE '\')
            ORDER BY p.id DESC
            "#
        );
        self.query_parameter_views(
            &sql,
            named_params! {
                ":sample": filter.sample_id,
                ":type": sample_type,
                ":text": pattern,
            },
        )
    }

    /// Parameters explicitly assigned to `sample_id`, with norm and latest
    /// saved result, ordered by id.
    pub fn list_sample_parameter_views(&self, sample_id: i64) -> DbResult<Vec<ParameterView>> {
        let sql = format!(
            r#"{PARAMETER_VIEW_SELECT}
            WHERE p.id IN (SELECT parameter_id FROM sample_parameters WHERE sample_id = :sample)
            ORDER BY p.id
            "#
        );
        self.query_parameter_views(&sql, named_params! { ":sample": sample_id })
    }

    /// All parameters of `sample_type`, with norm and the latest saved result
    /// for `sample_id`, ordered by id.
    pub fn list_type_parameter_views(
        &self,
        sample_type: SampleType,
        sample_id: i64,
    ) -> DbResult<Vec<ParameterView>> {
        let sql = format!(
            r#"{PARAMETER_VIEW_SELECT}
            WHERE p.sample_type = :type
            ORDER BY p.id
            "#
        );
        self.query_parameter_views(
            &sql,
            named_params! { ":sample": sample_id, ":type": sample_type.as_str() },
        )
    }

    fn query_parameter_views(
        &self,
        sql: &str,
        named: &[(&str, &dyn ToSql)],
    ) -> DbResult<Vec<ParameterView>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(named, map_parameter_view_row)?;

        let mut views = Vec::new();
        for row in rows {
            views.push(row?.try_into()?);
        }
        Ok(views)
    }

    /// Get the norm linked to a parameter.
    pub fn get_norm(&self, parameter_id: i64) -> DbResult<Option<Norm>> {
        self.conn
            .query_row(
                r#"
                SELECT pn.norm_id, pn.parameter_id, pn.operator, pn.lower_bound, pn.upper_bound,
                       n.description, n.source, n.sample_type
                FROM parameter_norms pn
                JOIN norms n ON n.id = pn.norm_id
                WHERE pn.parameter_id = ?
                "#,
                [parameter_id],
                |row| {
                    Ok(NormRow {
                        norm_id: row.get(0)?,
                        parameter_id: row.get(1)?,
                        operator: row.get(2)?,
                        lower: row.get(3)?,
                        upper: row.get(4)?,
                        description: row.get(5)?,
                        source: row.get(6)?,
                        sample_type: row.get(7)?,
                    })
                },
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Create or replace the norm of a parameter in one transaction. The
    /// existing norm row is updated in place so a parameter never has more
    /// than one. Returns the norm id.
    pub fn upsert_norm(&self, parameter_id: i64, norm: &NormRecord) -> DbResult<i64> {
        let tx = self.write_transaction()?;
        let operator = norm.operator.map(|op| op.as_str());
        let sample_type = norm.sample_type.map(|t| t.as_str());

        let existing: Option<i64> = tx
            .query_row(
                "SELECT norm_id FROM parameter_norms WHERE parameter_id = ?",
                [parameter_id],
                |row| row.get(0),
            )
            .optional()?;

        let norm_id = match existing {
            Some(norm_id) => {
                tx.execute(
                    "UPDATE norms SET description = ?2, source = ?3, sample_type = ?4 WHERE id = ?1",
                    params![norm_id, norm.description, norm.source, sample_type],
                )?;
                tx.execute(
                    r#"
                    UPDATE parameter_norms SET operator = ?2, lower_bound = ?3, upper_bound = ?4
                    WHERE parameter_id = ?1
                    "#,
                    params![parameter_id, operator, norm.lower, norm.upper],
                )?;
                norm_id
            }
            None => {
                tx.execute(
                    "INSERT INTO norms (description, source, sample_type) VALUES (?1, ?2, ?3)",
                    params![norm.description, norm.source, sample_type],
                )?;
                let norm_id = tx.last_insert_rowid();
                tx.execute(
                    r#"
                    INSERT INTO parameter_norms (parameter_id, norm_id, operator, lower_bound, upper_bound)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![parameter_id, norm_id, operator, norm.lower, norm.upper],
                )?;
                norm_id
            }
        };
        tx.commit()?;
        Ok(norm_id)
    }
}

fn parse_type(s: &str) -> Result<SampleType, DbError> {
    SampleType::parse(s).ok_or_else(|| DbError::Constraint(format!("Unknown sample type: {s}")))
}

/// Intermediate row struct for database mapping.
struct ParameterRow {
    id: i64,
    name: String,
    sample_type: String,
    unit: Option<String>,
}

impl TryFrom<ParameterRow> for Parameter {
    type Error = DbError;

    fn try_from(row: ParameterRow) -> Result<Self, Self::Error> {
        Ok(Parameter {
            id: row.id,
            name: row.name,
            sample_type: parse_type(&row.sample_type)?,
            unit: row.unit,
        })
    }
}

struct NormRow {
    norm_id: i64,
    parameter_id: i64,
    operator: Option<String>,
    lower: Option<f64>,
    upper: Option<f64>,
    description: Option<String>,
    source: Option<String>,
    sample_type: Option<String>,
}

impl TryFrom<NormRow> for Norm {
    type Error = DbError;

    fn try_from(row: NormRow) -> Result<Self, Self::Error> {
        // Unrecognized stored operators fall back to bound inference
        let operator = row.operator.as_deref().and_then(NormOperator::parse);
        let sample_type = match row.sample_type.as_deref() {
            Some(s) if !s.trim().is_empty() => Some(parse_type(s)?),
            _ => None,
        };
        Ok(Norm {
            norm_id: row.norm_id,
            parameter_id: row.parameter_id,
            operator,
            lower: row.lower,
            upper: row.upper,
            description: row.description,
            source: row.source,
            sample_type,
        })
    }
}

struct ParameterViewRow {
    parameter: ParameterRow,
    norm: Option<NormRow>,
    saved_result: Option<String>,
    saved_within_norm: Option<bool>,
}

fn map_parameter_view_row(row: &Row<'_>) -> rusqlite::Result<ParameterViewRow> {
    let parameter = ParameterRow {
        id: row.get(0)?,
        name: row.get(1)?,
        sample_type: row.get(2)?,
        unit: row.get(3)?,
    };
    let norm = match row.get::<_, Option<i64>>(4)? {
        Some(norm_id) => Some(NormRow {
            norm_id,
            parameter_id: parameter.id,
            operator: row.get(5)?,
            lower: row.get(6)?,
            upper: row.get(7)?,
            description: row.get(8)?,
            source: row.get(9)?,
            sample_type: row.get(10)?,
        }),
        None => None,
    };
    Ok(ParameterViewRow {
        parameter,
        norm,
        saved_result: row.get(11)?,
        saved_within_norm: row.get(12)?,
    })
}

impl TryFrom<ParameterViewRow> for ParameterView {
    type Error = DbError;

    fn try_from(row: ParameterViewRow) -> Result<Self, Self::Error> {
        Ok(ParameterView {
            parameter: row.parameter.try_into()?,
            norm: row.norm.map(Norm::try_from).transpose()?,
            saved_result: row.saved_result,
            saved_within_norm: row.saved_within_norm,
        })
    }
}
