//! Report and report file database operations.

use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use super::samples::transition_sample_state;
use super::{now_timestamp, Database, DbError, DbResult};
use crate::models::{CreatedReport, Report, ReportFile, ReportState, SampleState};

const REPORT_COLUMNS: &str = "id, sample_id, version, state, evaluator_id, fit_for_consumption, \
     storage_path, created_at, reviewed_by, reviewed_at, review_comment";

/// A report version about to be written together with its PDF bytes.
#[derive(Debug, Clone)]
pub struct NewReportVersion<'a> {
    pub sample_id: i64,
    pub evaluator_id: i64,
    pub fit_for_consumption: Option<bool>,
    pub content: &'a [u8],
    /// Sample state change applied in the same transaction.
    pub transition: Option<(SampleState, SampleState)>,
}

impl Database {
    /// Insert the next report version for a sample and store its file.
    ///
    /// Version, file and the optional sample transition commit together.
    /// Returns `Ok(None)` with nothing written when the transition guard
    /// does not hold. `filename` receives the allocated version.
    pub fn insert_report_version(
        &self,
        new: &NewReportVersion<'_>,
        filename: impl FnOnce(i64) -> String,
    ) -> DbResult<Option<CreatedReport>> {
        let tx = self.write_transaction()?;
        let now = now_timestamp();

        if let Some((from, to)) = new.transition {
            if !transition_sample_state(&tx, new.sample_id, from, to, &now)? {
                return Ok(None);
            }
        }

        let version: i64 = tx.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM reports WHERE sample_id = ?",
            [new.sample_id],
            |row| row.get(0),
        )?;
        tx.execute(
            r#"
            INSERT INTO reports (
                sample_id, version, state, evaluator_id, fit_for_consumption, created_at
            ) VALUES (?1, ?2, 'created', ?3, ?4, ?5)
            "#,
            params![
                new.sample_id,
                version,
                new.evaluator_id,
                new.fit_for_consumption,
                now,
            ],
        )?;
        let report_id = tx.last_insert_rowid();
        write_report_file(&tx, report_id, &filename(version), new.content, &now)?;
        tx.commit()?;

        Ok(Some(CreatedReport { report_id, version }))
    }

    /// Get the stored file of a report.
    pub fn get_report_file(&self, report_id: i64) -> DbResult<Option<ReportFile>> {
        Ok(self
            .conn
            .query_row(
                "SELECT report_id, filename, content, sha256 FROM report_files WHERE report_id = ?",
                [report_id],
                |row| {
                    Ok(ReportFile {
                        report_id: row.get(0)?,
                        filename: row.get(1)?,
                        content: row.get(2)?,
                        sha256: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    /// Get a report by ID.
    pub fn get_report(&self, id: i64) -> DbResult<Option<Report>> {
        self.conn
            .query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?"),
                [id],
                map_report_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// All versions for a sample, newest first.
    pub fn list_reports_for_sample(&self, sample_id: i64) -> DbResult<Vec<Report>> {
        self.query_reports(
            &format!(
                "SELECT {REPORT_COLUMNS} FROM reports WHERE sample_id = ? ORDER BY version DESC"
            ),
            [sample_id],
        )
    }

    /// Most recently created reports across all samples.
    pub fn list_recent_reports(&self, limit: usize) -> DbResult<Vec<Report>> {
        self.query_reports(
            &format!("SELECT {REPORT_COLUMNS} FROM reports ORDER BY created_at DESC, id DESC LIMIT ?"),
            [i64::try_from(limit).unwrap_or(i64::MAX)],
        )
    }

    /// Highest version number recorded for a sample.
    pub fn latest_report_version(&self, sample_id: i64) -> DbResult<Option<i64>> {
        Ok(self.conn.query_row(
            "SELECT MAX(version) FROM reports WHERE sample_id = ?",
            [sample_id],
            |row| row.get(0),
        )?)
    }

    /// Apply a review decision to a report and its sample in one transaction.
    ///
    /// Only a `created` report that is its sample's latest version can be
    /// reviewed, and only while the sample awaits validation. A validated
    /// report moves the sample to Validated; a returned one sends it back to
    /// In-Analysis. Returns `false` with nothing written when either guard
    /// fails.
    pub fn review_report(
        &self,
        report_id: i64,
        decision: ReportState,
        reviewer_id: i64,
        comment: Option<&str>,
    ) -> DbResult<bool> {
        let target = match decision {
            ReportState::Validated => SampleState::Validated,
            ReportState::Returned => SampleState::InAnalysis,
            ReportState::Created => {
                return Err(DbError::Constraint(
                    "a review must validate or return the report".into(),
                ))
            }
        };

        let tx = self.write_transaction()?;
        let now = now_timestamp();
        let sample_id: Option<i64> = tx
            .query_row(
                "SELECT sample_id FROM reports WHERE id = ?",
                [report_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(sample_id) = sample_id else {
            return Ok(false);
        };

        let rows_affected = tx.execute(
            r#"
            UPDATE reports
            SET state = ?2, reviewed_by = ?3, reviewed_at = ?4, review_comment = ?5
            WHERE id = ?1 AND state = 'created'
              AND version = (SELECT MAX(version) FROM reports WHERE sample_id = ?6)
            "#,
            params![
                report_id,
                decision.as_str(),
                reviewer_id,
                now,
                comment,
                sample_id
            ],
        )?;
        if rows_affected == 0 {
            return Ok(false);
        }
        if !transition_sample_state(
            &tx,
            sample_id,
            SampleState::AwaitingValidation,
            target,
            &now,
        )? {
            return Ok(false);
        }
        tx.commit()?;
        Ok(true)
    }

    fn query_reports<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<Report>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, map_report_row)?;

        let mut reports = Vec::new();
        for row in rows {
            reports.push(row?.try_into()?);
        }
        Ok(reports)
    }
}

/// Hex SHA-256 of a file body.
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn write_report_file(
    conn: &Connection,
    report_id: i64,
    filename: &str,
    content: &[u8],
    now: &str,
) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO report_files (report_id, filename, content, sha256, stored_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT(report_id) DO UPDATE SET
            filename = excluded.filename,
            content = excluded.content,
            sha256 = excluded.sha256,
            stored_at = excluded.stored_at
        "#,
        params![report_id, filename, content, content_digest(content), now],
    )?;
    Ok(())
}

/// Intermediate row struct for database mapping.
struct ReportRow {
    id: i64,
    sample_id: i64,
    version: i64,
    state: String,
    evaluator_id: i64,
    fit_for_consumption: Option<bool>,
    storage_path: Option<String>,
    created_at: String,
    reviewed_by: Option<i64>,
    reviewed_at: Option<String>,
    review_comment: Option<String>,
}

fn map_report_row(row: &Row<'_>) -> rusqlite::Result<ReportRow> {
    Ok(ReportRow {
        id: row.get(0)?,
        sample_id: row.get(1)?,
        version: row.get(2)?,
        state: row.get(3)?,
        evaluator_id: row.get(4)?,
        fit_for_consumption: row.get(5)?,
        storage_path: row.get(6)?,
        created_at: row.get(7)?,
        reviewed_by: row.get(8)?,
        reviewed_at: row.get(9)?,
        review_comment: row.get(10)?,
    })
}

impl TryFrom<ReportRow> for Report {
    type Error = DbError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let state = ReportState::parse(&row.state)
            .ok_or_else(|| DbError::Constraint(format!("Unknown report state: {}", row.state)))?;
        Ok(Report {
            id: row.id,
            sample_id: row.sample_id,
            version: row.version,
            state,
            evaluator_id: row.evaluator_id,
            fit_for_consumption: row.fit_for_consumption,
            storage_path: row.storage_path,
            created_at: row.created_at,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            review_comment: row.review_comment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF: &[u8] = b"%PDF-1.4\n%test\n";

    fn setup_db(state: &str) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute(
                "INSERT INTO requesters (name, national_id) VALUES ('R', '00100000001')",
                [],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO samples (code, sample_type, received_at, requester_id, state, created_at, updated_at)
                 VALUES ('W-000001', 'water', '2024-01-01T00:00:00', 1, ?1, 'x', 'x')",
                [state],
            )
            .unwrap();
        db
    }

    fn version(transition: Option<(SampleState, SampleState)>) -> NewReportVersion<'static> {
        NewReportVersion {
            sample_id: 1,
            evaluator_id: 7,
            fit_for_consumption: Some(true),
            content: PDF,
            transition,
        }
    }

    fn sample_state(db: &Database) -> String {
        db.conn()
            .query_row("SELECT state FROM samples WHERE id = 1", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_versions_increment() {
        let db = setup_db("in_analysis");
        let v1 = db
            .insert_report_version(&version(None), |v| format!("r-v{v}.pdf"))
            .unwrap()
            .unwrap();
        let v2 = db
            .insert_report_version(&version(None), |v| format!("r-v{v}.pdf"))
            .unwrap()
            .unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));

        let listed = db.list_reports_for_sample(1).unwrap();
        assert_eq!(
            listed.iter().map(|r| r.version).collect::<Vec<_>>(),
            vec![2, 1]
        );
        assert_eq!(db.latest_report_version(1).unwrap(), Some(2));

        let file = db.get_report_file(v2.report_id).unwrap().unwrap();
        assert_eq!(file.filename, "r-v2.pdf");
        assert_eq!(file.content, PDF);
        assert_eq!(file.sha256, content_digest(PDF));
    }

    #[test]
    fn test_failed_transition_writes_nothing() {
        let db = setup_db("received");
        let created = db
            .insert_report_version(
                &version(Some((
                    SampleState::InAnalysis,
                    SampleState::AwaitingValidation,
                ))),
                |v| format!("r-v{v}.pdf"),
            )
            .unwrap();
        assert!(created.is_none());
        assert!(db.list_reports_for_sample(1).unwrap().is_empty());
        assert_eq!(sample_state(&db), "received");
    }

    #[test]
    fn test_review_returns_and_validates() {
        let db = setup_db("in_analysis");
        let to_review = Some((SampleState::InAnalysis, SampleState::AwaitingValidation));
        let v1 = db
            .insert_report_version(&version(to_review), |_| "v1.pdf".into())
            .unwrap()
            .unwrap();

        assert!(db
            .review_report(v1.report_id, ReportState::Returned, 9, Some("redo pH"))
            .unwrap());
        assert_eq!(sample_state(&db), "in_analysis");
        let report = db.get_report(v1.report_id).unwrap().unwrap();
        assert_eq!(report.state, ReportState::Returned);
        assert_eq!(report.reviewed_by, Some(9));
        assert_eq!(report.review_comment.as_deref(), Some("redo pH"));

        // Already reviewed
        assert!(!db
            .review_report(v1.report_id, ReportState::Validated, 9, None)
            .unwrap());

        let v2 = db
            .insert_report_version(&version(to_review), |_| "v2.pdf".into())
            .unwrap()
            .unwrap();
        assert!(db
            .review_report(v2.report_id, ReportState::Validated, 9, None)
            .unwrap());
        assert_eq!(sample_state(&db), "validated");
    }

    #[test]
    fn test_review_rolls_back_when_sample_not_awaiting() {
        let db = setup_db("in_analysis");
        let created = db
            .insert_report_version(&version(None), |_| "v1.pdf".into())
            .unwrap()
            .unwrap();

        assert!(!db
            .review_report(created.report_id, ReportState::Validated, 9, None)
            .unwrap());
        let report = db.get_report(created.report_id).unwrap().unwrap();
        assert_eq!(report.state, ReportState::Created);
        assert_eq!(report.reviewed_by, None);
    }

    #[test]
    fn test_only_latest_version_reviewable() {
        let db = setup_db("in_analysis");
        let v1 = db
            .insert_report_version(&version(None), |_| "v1.pdf".into())
            .unwrap()
            .unwrap();
        db.insert_report_version(
            &version(Some((
                SampleState::InAnalysis,
                SampleState::AwaitingValidation,
            ))),
            |_| "v2.pdf".into(),
        )
        .unwrap()
        .unwrap();

        assert!(!db
            .review_report(v1.report_id, ReportState::Validated, 9, None)
            .unwrap());
        assert_eq!(sample_state(&db), "awaiting_validation");
    }
}
