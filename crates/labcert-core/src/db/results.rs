//! Test result database operations. Results are append-only; the latest row
//! per (sample, parameter) is the authoritative one.

use rusqlite::{params, Row};

use super::{now_timestamp, Database, DbResult};
use crate::models::{LatestResult, NewTestResult, TestResult};

impl Database {
    /// Append a test result.
    pub fn insert_test_result(&self, result: &NewTestResult, evaluator_id: i64) -> DbResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO test_results (
                sample_id, parameter_id, result, within_norm, evaluator_id, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                result.sample_id,
                result.parameter_id,
                result.result.trim(),
                result.within_norm,
                evaluator_id,
                now_timestamp(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Number of result rows recorded for a sample.
    pub fn count_test_results(&self, sample_id: i64) -> DbResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM test_results WHERE sample_id = ?",
            [sample_id],
            |row| row.get(0),
        )?)
    }

    /// Full result history of a sample, oldest first.
    pub fn list_test_results(&self, sample_id: i64) -> DbResult<Vec<TestResult>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, sample_id, parameter_id, result, within_norm, evaluator_id, recorded_at
            FROM test_results WHERE sample_id = ? ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([sample_id], map_test_result)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Latest result per parameter for a sample, ordered by parameter id.
    pub fn latest_results(&self, sample_id: i64) -> DbResult<Vec<LatestResult>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT r.parameter_id, p.name, r.result, r.within_norm, r.recorded_at
            FROM test_results r
            JOIN parameters p ON p.id = r.parameter_id
            WHERE r.id IN (
                SELECT MAX(id) FROM test_results WHERE sample_id = ?1 GROUP BY parameter_id
            )
            ORDER BY r.parameter_id
            "#,
        )?;
        let rows = stmt.query_map([sample_id], |row| {
            Ok(LatestResult {
                parameter_id: row.get(0)?,
                parameter_name: row.get(1)?,
                result: row.get(2)?,
                within_norm: row.get(3)?,
                recorded_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn map_test_result(row: &Row<'_>) -> rusqlite::Result<TestResult> {
    Ok(TestResult {
        id: row.get(0)?,
        sample_id: row.get(1)?,
        parameter_id: row.get(2)?,
        result: row.get(3)?,
        within_norm: row.get(4)?,
        evaluator_id: row.get(5)?,
        recorded_at: row.get(6)?,
    })
}
