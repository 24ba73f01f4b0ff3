//! Sample database operations: code allocation, listings and guarded
//! state transitions.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{now_timestamp, Database, DbError, DbResult};
use crate::models::{
    Assignment, NewSample, Sample, SampleState, SampleType, SampleWithAssignee, SampleWithReport,
};

/// How many counter values are tried before code allocation gives up.
pub const MAX_CODE_ATTEMPTS: usize = 5;

const SAMPLE_COLUMNS: &str = "s.id, s.code, s.sample_type, s.transport_conditions, s.origin, \
     s.received_at, s.requester_id, s.state, s.retired, s.created_at, s.updated_at";

const SAMPLE_COLUMN_COUNT: usize = 11;

impl Database {
    /// Insert a sample with a freshly allocated code. Returns `(id, code)`.
    ///
    /// The per-prefix counter and the insert share one write transaction, so
    /// two registrations can never draw the same value. If a counter value
    /// lands on a code that already exists (rows imported from elsewhere) the
    /// next value is tried, up to [`MAX_CODE_ATTEMPTS`].
    pub fn insert_sample(&self, sample: &NewSample) -> DbResult<(i64, String)> {
        let tx = self.write_transaction()?;
        let prefix = sample.sample_type.code_prefix();

        let mut code = None;
        for _ in 0..MAX_CODE_ATTEMPTS {
            let candidate = format!("{prefix}-{:06}", next_code_value(&tx, prefix)?);
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM samples WHERE code = ?)",
                [&candidate],
                |row| row.get(0),
            )?;
            if !taken {
                code = Some(candidate);
                break;
            }
            tracing::warn!(code = %candidate, "generated sample code already in use");
        }
        let code = code.ok_or_else(|| {
            DbError::Constraint(format!(
                "could not allocate a unique {prefix} sample code after {MAX_CODE_ATTEMPTS} attempts"
            ))
        })?;

        let now = now_timestamp();
        tx.execute(
            r#"
            INSERT INTO samples (
                code, sample_type, transport_conditions, origin, received_at,
                requester_id, state, retired, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'received', 0, ?7, ?7)
            "#,
            params![
                code,
                sample.sample_type.as_str(),
                sample.transport_conditions,
                sample.origin,
                sample.received_at.format("%Y-%m-%dT%H:%M:%S").to_string(),
                sample.requester_id,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok((id, code))
    }

    /// Get a sample by ID, retired or not.
    pub fn get_sample(&self, id: i64) -> DbResult<Option<Sample>> {
        self.conn
            .query_row(
                &format!("SELECT {SAMPLE_COLUMNS} FROM samples s WHERE s.id = ?"),
                [id],
                |row| sample_row(row, 0),
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Non-retired samples in `state`, newest received date first then id.
    pub fn list_samples_in_state(&self, state: SampleState) -> DbResult<Vec<Sample>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {SAMPLE_COLUMNS} FROM samples s
            WHERE s.state = ? AND s.retired = 0
            ORDER BY s.received_at DESC, s.id DESC
            "#
        ))?;
        let rows = stmt.query_map([state.as_str()], |row| sample_row(row, 0))?;

        let mut samples = Vec::new();
        for row in rows {
            samples.push(row?.try_into()?);
        }
        Ok(samples)
    }

    /// In-analysis samples joined to their current assignment. When
    /// `evaluator_id` is given only that evaluator's samples are returned.
    pub fn list_in_analysis_with_assignee(
        &self,
        evaluator_id: Option<i64>,
    ) -> DbResult<Vec<SampleWithAssignee>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {SAMPLE_COLUMNS}, a.evaluator_id, st.name, a.assigned_at
            FROM samples s
            LEFT JOIN sample_assignments a
                ON a.id = (SELECT MAX(id) FROM sample_assignments WHERE sample_id = s.id)
            LEFT JOIN staff st ON st.id = a.evaluator_id
            WHERE s.state = 'in_analysis' AND s.retired = 0
              AND (?1 IS NULL OR a.evaluator_id = ?1)
            ORDER BY s.received_at DESC, s.id DESC
            "#
        ))?;
        let rows = stmt.query_map([evaluator_id], |row| {
            Ok((
                sample_row(row, 0)?,
                row.get::<_, Option<i64>>(SAMPLE_COLUMN_COUNT)?,
                row.get::<_, Option<String>>(SAMPLE_COLUMN_COUNT + 1)?,
                row.get::<_, Option<String>>(SAMPLE_COLUMN_COUNT + 2)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (sample, evaluator_id, evaluator_name, assigned_at) = row?;
            samples.push(SampleWithAssignee {
                sample: sample.try_into()?,
                evaluator_id,
                evaluator_name,
                assigned_at,
            });
        }
        Ok(samples)
    }

    /// Validated samples joined to their latest report version.
    pub fn list_validated_with_report(&self) -> DbResult<Vec<SampleWithReport>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {SAMPLE_COLUMNS}, r.id, r.version
            FROM samples s
            LEFT JOIN reports r
                ON r.sample_id = s.id
               AND r.version = (SELECT MAX(version) FROM reports WHERE sample_id = s.id)
            WHERE s.state = 'validated' AND s.retired = 0
            ORDER BY s.received_at DESC, s.id DESC
            "#
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                sample_row(row, 0)?,
                row.get::<_, Option<i64>>(SAMPLE_COLUMN_COUNT)?,
                row.get::<_, Option<i64>>(SAMPLE_COLUMN_COUNT + 1)?,
            ))
        })?;

        let mut samples = Vec::new();
        for row in rows {
            let (sample, report_id, report_version) = row?;
            samples.push(SampleWithReport {
                sample: sample.try_into()?,
                report_id,
                report_version,
            });
        }
        Ok(samples)
    }

    /// Move a Received sample to In-Analysis and append the assignment record.
    /// Returns `false` without writing anything when the guard does not hold.
    pub fn assign_sample(
        &self,
        sample_id: i64,
        evaluator_id: i64,
        comment: Option<&str>,
    ) -> DbResult<bool> {
        let tx = self.write_transaction()?;
        let now = now_timestamp();
        if !transition_sample_state(
            &tx,
            sample_id,
            SampleState::Received,
            SampleState::InAnalysis,
            &now,
        )? {
            return Ok(false);
        }
        tx.execute(
            "INSERT INTO sample_assignments (sample_id, evaluator_id, comment, assigned_at) VALUES (?1, ?2, ?3, ?4)",
            params![sample_id, evaluator_id, comment, now],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Soft-delete a sample that is still exactly Received.
    pub fn retire_sample(&self, sample_id: i64) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE samples SET retired = 1, updated_at = ?2
            WHERE id = ?1 AND state = 'received' AND retired = 0
            "#,
            params![sample_id, now_timestamp()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Latest assignment record for a sample.
    pub fn current_assignment(&self, sample_id: i64) -> DbResult<Option<Assignment>> {
        Ok(self
            .conn
            .query_row(
                r#"
                SELECT id, sample_id, evaluator_id, comment, assigned_at
                FROM sample_assignments WHERE sample_id = ?
                ORDER BY id DESC LIMIT 1
                "#,
                [sample_id],
                map_assignment,
            )
            .optional()?)
    }

    /// Full assignment history, oldest first.
    pub fn list_assignments(&self, sample_id: i64) -> DbResult<Vec<Assignment>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, sample_id, evaluator_id, comment, assigned_at
            FROM sample_assignments WHERE sample_id = ? ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([sample_id], map_assignment)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Replace the explicit parameter list of a sample.
    pub fn set_sample_parameters(&self, sample_id: i64, parameter_ids: &[i64]) -> DbResult<()> {
        let tx = self.write_transaction()?;
        tx.execute(
            "DELETE FROM sample_parameters WHERE sample_id = ?",
            [sample_id],
        )?;
        for parameter_id in parameter_ids {
            tx.execute(
                "INSERT OR IGNORE INTO sample_parameters (sample_id, parameter_id) VALUES (?1, ?2)",
                params![sample_id, parameter_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Explicitly assigned parameter ids, ascending.
    pub fn sample_parameter_ids(&self, sample_id: i64) -> DbResult<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT parameter_id FROM sample_parameters WHERE sample_id = ? ORDER BY parameter_id",
        )?;
        let rows = stmt.query_map([sample_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Next value of the forward-only counter for `prefix`.
fn next_code_value(conn: &Connection, prefix: &str) -> DbResult<i64> {
    Ok(conn.query_row(
        r#"
        INSERT INTO code_sequences (prefix, last_value) VALUES (?1, 1)
        ON CONFLICT(prefix) DO UPDATE SET last_value = last_value + 1
        RETURNING last_value
        "#,
        [prefix],
        |row| row.get(0),
    )?)
}

/// Guarded state change: only applies when the sample is in `from` and not
/// retired. Returns whether a row was updated.
pub(crate) fn transition_sample_state(
    conn: &Connection,
    sample_id: i64,
    from: SampleState,
    to: SampleState,
    now: &str,
) -> DbResult<bool> {
    let rows_affected = conn.execute(
        r#"
        UPDATE samples SET state = ?3, updated_at = ?4
        WHERE id = ?1 AND state = ?2 AND retired = 0
        "#,
        params![sample_id, from.as_str(), to.as_str(), now],
    )?;
    Ok(rows_affected > 0)
}

fn map_assignment(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: row.get(0)?,
        sample_id: row.get(1)?,
        evaluator_id: row.get(2)?,
        comment: row.get(3)?,
        assigned_at: row.get(4)?,
    })
}

/// Intermediate row struct for database mapping.
pub(crate) struct SampleRow {
    id: i64,
    code: String,
    sample_type: String,
    transport_conditions: Option<String>,
    origin: Option<String>,
    received_at: String,
    requester_id: i64,
    state: String,
    retired: bool,
    created_at: String,
    updated_at: String,
}

/// Read the sample columns starting at `offset`.
pub(crate) fn sample_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<SampleRow> {
    Ok(SampleRow {
        id: row.get(offset)?,
        code: row.get(offset + 1)?,
        sample_type: row.get(offset + 2)?,
        transport_conditions: row.get(offset + 3)?,
        origin: row.get(offset + 4)?,
        received_at: row.get(offset + 5)?,
        requester_id: row.get(offset + 6)?,
        state: row.get(offset + 7)?,
        retired: row.get(offset + 8)?,
        created_at: row.get(offset + 9)?,
        updated_at: row.get(offset + 10)?,
    })
}

impl TryFrom<SampleRow> for Sample {
    type Error = DbError;

    fn try_from(row: SampleRow) -> Result<Self, Self::Error> {
        let sample_type = SampleType::parse(&row.sample_type)
            .ok_or_else(|| DbError::Constraint(format!("Unknown sample type: {}", row.sample_type)))?;
        let state = SampleState::parse(&row.state)
            .ok_or_else(|| DbError::Constraint(format!("Unknown sample state: {}", row.state)))?;

        Ok(Sample {
            id: row.id,
            code: row.code,
            sample_type,
            transport_conditions: row.transport_conditions,
            origin: row.origin,
            received_at: row.received_at,
            requester_id: row.requester_id,
            state,
            retired: row.retired,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
