//! Report generator & archive.
//!
//! Builds the certificate payload from stored results, renders it through a
//! [`ReportRenderer`], and keeps every version of every report. Files live in
//! the database keyed by report id; reports written by older deployments may
//! only carry a `storage_path` under the configured files directory.

mod render;

pub use render::*;

use std::path::Path;

use crate::db::{content_digest, Database, NewReportVersion};
use crate::evaluation;
use crate::lifecycle::certificate_filename;
use crate::models::{
    CreatedReport, Report, ReportData, ReportFile, ReportLine, ReportState, ReportSummary,
    ReviewAction, Sample, SampleState,
};
use crate::{LabConfig, LabError, LabResult};

/// How many reports the overall listing returns.
pub const RECENT_REPORT_LIMIT: usize = 100;

/// Magic bytes every stored report must start with.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Report generation, storage and review.
pub struct ReportArchive<'a> {
    db: &'a Database,
    renderer: &'a dyn ReportRenderer,
    config: &'a LabConfig,
}

impl<'a> ReportArchive<'a> {
    pub fn new(db: &'a Database, renderer: &'a dyn ReportRenderer, config: &'a LabConfig) -> Self {
        Self {
            db,
            renderer,
            config,
        }
    }

    /// Everything the certificate shows: sample, requester and the latest
    /// result per parameter with its norm.
    pub fn build_report_data(&self, sample_id: i64) -> LabResult<ReportData> {
        let sample = self.require_sample(sample_id)?;
        let requester = self.db.get_requester(sample.requester_id)?.ok_or_else(|| {
            LabError::Storage(format!("requester of sample {} is missing", sample.code))
        })?;

        let mut lines = Vec::new();
        for latest in self.db.latest_results(sample_id)? {
            let parameter = self.db.get_parameter(latest.parameter_id)?;
            let norm = self.db.get_norm(latest.parameter_id)?;
            lines.push(ReportLine {
                parameter_id: latest.parameter_id,
                parameter_name: latest.parameter_name,
                unit: parameter.and_then(|p| p.unit),
                result: latest.result,
                within_norm: latest.within_norm,
                norm_text: norm.as_ref().and_then(evaluation::describe),
                norm_description: norm.as_ref().and_then(|n| n.description.clone()),
                norm_source: norm.as_ref().and_then(|n| n.source.clone()),
                recorded_at: latest.recorded_at,
            });
        }

        let evaluator_name = match self.db.current_assignment(sample_id)? {
            Some(assignment) => self
                .db
                .get_staff(assignment.evaluator_id)?
                .map(|staff| staff.name),
            None => None,
        };
        let fit_for_consumption = self
            .db
            .list_reports_for_sample(sample_id)?
            .first()
            .and_then(|r| r.fit_for_consumption);

        Ok(ReportData {
            lab_name: self.config.lab_name.clone(),
            sample,
            requester,
            lines,
            fit_for_consumption,
            evaluator_name,
            generated_at: crate::db::now_timestamp(),
        })
    }

    /// Render the certificate for a sample with the given fitness verdict.
    pub fn render_certificate(&self, sample_id: i64, fit: Option<bool>) -> LabResult<Vec<u8>> {
        let mut data = self.build_report_data(sample_id)?;
        data.fit_for_consumption = fit;
        self.renderer
            .render(CERTIFICATE_TEMPLATE, &data)
            .map_err(|e| {
                tracing::error!(sample_id, error = %e, "report rendering failed");
                LabError::from(e)
            })
    }

    /// Render and store a new report version without touching the sample's
    /// state. Only samples under evaluation or awaiting validation accept
    /// new versions.
    pub fn create_report(
        &self,
        sample_id: i64,
        evaluator_id: i64,
        fit_for_consumption: bool,
    ) -> LabResult<CreatedReport> {
        let sample = self.require_reportable_sample(sample_id)?;
        if self.db.count_test_results(sample_id)? == 0 {
            return Err(LabError::Precondition(format!(
                "sample {} has no recorded results",
                sample.code
            )));
        }
        let content = self.render_certificate(sample_id, Some(fit_for_consumption))?;
        let created = self.store_version(
            &sample,
            evaluator_id,
            Some(fit_for_consumption),
            &content,
            |version| certificate_filename(&sample.code, version),
        )?;
        tracing::info!(
            sample_id,
            report_id = created.report_id,
            version = created.version,
            "report created"
        );
        Ok(created)
    }

    /// Attach a manually produced PDF as the next report version.
    pub fn upload_report(
        &self,
        sample_id: i64,
        evaluator_id: i64,
        content: &[u8],
        filename: &str,
    ) -> LabResult<CreatedReport> {
        if content.is_empty() {
            return Err(LabError::Validation("uploaded file is empty".into()));
        }
        if !content.starts_with(PDF_MAGIC) {
            return Err(LabError::Validation("uploaded file is not a PDF".into()));
        }
        let sample = self.require_reportable_sample(sample_id)?;
        let cleaned = sanitize_filename(filename);
        let created = self.store_version(&sample, evaluator_id, None, content, |version| {
            cleaned.unwrap_or_else(|| certificate_filename(&sample.code, version))
        })?;
        tracing::info!(
            sample_id,
            report_id = created.report_id,
            version = created.version,
            bytes = content.len(),
            "report uploaded"
        );
        Ok(created)
    }

    /// All versions of a sample's report, newest first.
    pub fn reports_for_sample(&self, sample_id: i64) -> LabResult<Vec<ReportSummary>> {
        self.require_sample(sample_id)?;
        Ok(self
            .db
            .list_reports_for_sample(sample_id)?
            .into_iter()
            .map(ReportSummary::new)
            .collect())
    }

    /// The most recent reports across all samples.
    pub fn list_reports(&self) -> LabResult<Vec<ReportSummary>> {
        Ok(self
            .db
            .list_recent_reports(RECENT_REPORT_LIMIT)?
            .into_iter()
            .map(ReportSummary::new)
            .collect())
    }

    /// The stored PDF of a report. Falls back to the legacy file pointer
    /// when no blob was stored.
    pub fn report_pdf(&self, report_id: i64) -> LabResult<ReportFile> {
        let report = self
            .db
            .get_report(report_id)?
            .ok_or_else(|| LabError::NotFound(format!("report {report_id}")))?;

        if let Some(file) = self.db.get_report_file(report_id)? {
            let digest = content_digest(&file.content);
            if digest != file.sha256 {
                tracing::error!(report_id, expected = %file.sha256, actual = %digest, "report file checksum mismatch");
                return Err(LabError::Storage(format!(
                    "stored file of report {report_id} is corrupted"
                )));
            }
            return Ok(file);
        }

        match report.storage_path.as_deref() {
            Some(path) => self.read_legacy_file(report_id, path),
            None => Err(LabError::NotFound(format!("file of report {report_id}"))),
        }
    }

    /// Validate or return a report. The report state and the owning sample's
    /// state change together or not at all.
    pub fn validate_report(
        &self,
        report_id: i64,
        validator_id: i64,
        action: ReviewAction,
        comment: Option<&str>,
    ) -> LabResult<Report> {
        let report = self
            .db
            .get_report(report_id)?
            .ok_or_else(|| LabError::NotFound(format!("report {report_id}")))?;
        let sample = self.require_sample(report.sample_id)?;

        if report.state != ReportState::Created {
            return Err(LabError::Conflict(format!(
                "report {report_id} was already {}",
                report.state.as_str()
            )));
        }
        let latest = self.db.latest_report_version(report.sample_id)?;
        if latest != Some(report.version) {
            return Err(LabError::Conflict(format!(
                "report {report_id} is version {} but sample {} has a newer version",
                report.version, sample.code
            )));
        }
        if sample.retired || sample.state != SampleState::AwaitingValidation {
            return Err(LabError::Conflict(format!(
                "sample {} is not awaiting validation",
                sample.code
            )));
        }

        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        if !self
            .db
            .review_report(report_id, action.report_state(), validator_id, comment)?
        {
            tracing::warn!(report_id, "review lost a race");
            return Err(LabError::Conflict(format!(
                "report {report_id} was reviewed concurrently"
            )));
        }
        tracing::info!(
            report_id,
            sample_id = sample.id,
            decision = action.report_state().as_str(),
            "report reviewed"
        );

        self.db
            .get_report(report_id)?
            .ok_or_else(|| LabError::Storage(format!("report {report_id} vanished")))
    }

    fn store_version(
        &self,
        sample: &Sample,
        evaluator_id: i64,
        fit_for_consumption: Option<bool>,
        content: &[u8],
        filename: impl FnOnce(i64) -> String,
    ) -> LabResult<CreatedReport> {
        let new = NewReportVersion {
            sample_id: sample.id,
            evaluator_id,
            fit_for_consumption,
            content,
            transition: None,
        };
        self.db
            .insert_report_version(&new, filename)?
            .ok_or_else(|| LabError::Storage("report insert without transition was refused".into()))
    }

    fn read_legacy_file(&self, report_id: i64, storage_path: &str) -> LabResult<ReportFile> {
        // Only the file name is honoured; legacy pointers look like /files/<name>
        let name = Path::new(storage_path)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LabError::NotFound(format!("file of report {report_id}")))?;
        let path = self.config.files_dir.join(name);

        match std::fs::read(&path) {
            Ok(content) => Ok(ReportFile {
                report_id,
                filename: name.to_string(),
                sha256: content_digest(&content),
                content,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(report_id, path = %path.display(), "legacy report file missing");
                Err(LabError::NotFound(format!("file of report {report_id}")))
            }
            Err(e) => {
                tracing::error!(report_id, path = %path.display(), error = %e, "legacy report file unreadable");
                Err(LabError::Storage(format!("could not read file of report {report_id}")))
            }
        }
    }

    fn require_sample(&self, sample_id: i64) -> LabResult<Sample> {
        self.db
            .get_sample(sample_id)?
            .ok_or_else(|| LabError::NotFound(format!("sample {sample_id}")))
    }

    fn require_live_sample(&self, sample_id: i64) -> LabResult<Sample> {
        let sample = self.require_sample(sample_id)?;
        if sample.retired {
            return Err(LabError::Conflict(format!(
                "sample {} is retired",
                sample.code
            )));
        }
        Ok(sample)
    }

    fn require_reportable_sample(&self, sample_id: i64) -> LabResult<Sample> {
        let sample = self.require_live_sample(sample_id)?;
        if !matches!(
            sample.state,
            SampleState::InAnalysis | SampleState::AwaitingValidation
        ) {
            tracing::warn!(sample_id, state = sample.state.as_str(), "report version refused");
            return Err(LabError::Precondition(format!(
                "sample {} is {} and does not accept report versions",
                sample.code,
                sample.state.as_str()
            )));
        }
        Ok(sample)
    }
}

/// Reduce a client-supplied name to a safe `*.pdf` file name.
fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let mut cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return None;
    }
    if !cleaned.to_ascii_lowercase().ends_with(".pdf") {
        cleaned.push_str(".pdf");
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Role;
    use crate::db::NormRecord;
    use crate::lifecycle::SampleLifecycle;
    use crate::models::{
        NewRequester, NewStaffMember, NewTestResult, NormOperator, SampleRegistration, SampleType,
    };

    struct Fixture {
        db: Database,
        config: LabConfig,
        sample: i64,
        evaluator: i64,
        ph: i64,
    }

    fn setup() -> Fixture {
        let db = Database::open_in_memory().unwrap();
        let requester = db
            .insert_requester(&NewRequester {
                name: "Acueducto Norte".into(),
                address: Some("Calle 1".into()),
                contact: None,
                national_id: "00100000001".into(),
            })
            .unwrap();
        let evaluator = db
            .insert_staff(&NewStaffMember {
                name: "Eva Ruiz".into(),
                email: "eva@lab.test".into(),
                roles: vec![Role::Evaluator],
            })
            .unwrap();
        let ph = db.insert_parameter("pH", SampleType::Water, None).unwrap();
        db.upsert_norm(
            ph,
            &NormRecord {
                operator: Some(NormOperator::Between),
                lower: Some(6.5),
                upper: Some(8.5),
                description: Some("Drinking water".into()),
                source: Some("NORDOM 1".into()),
                sample_type: Some(SampleType::Water),
            },
        )
        .unwrap();

        let lifecycle = SampleLifecycle::new(&db);
        let sample = lifecycle
            .register_sample(&SampleRegistration {
                sample_type: "water".into(),
                date: "2024-01-15".into(),
                time: "09:30".into(),
                origin: None,
                transport_conditions: None,
                requester_id: requester,
            })
            .unwrap()
            .id;
        lifecycle.assign_evaluator(sample, evaluator, None).unwrap();
        lifecycle
            .record_result(
                &NewTestResult {
                    sample_id: sample,
                    parameter_id: ph,
                    result: "7.2".into(),
                    within_norm: true,
                },
                evaluator,
            )
            .unwrap();

        Fixture {
            db,
            config: LabConfig::default(),
            sample,
            evaluator,
            ph,
        }
    }

    struct FailingRenderer;

    impl ReportRenderer for FailingRenderer {
        fn render(&self, _template: &str, _data: &ReportData) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::Failed("engine offline".into()))
        }
    }

    #[test]
    fn test_build_report_data() {
        let f = setup();
        let renderer = PdfReportRenderer::new();
        let archive = ReportArchive::new(&f.db, &renderer, &f.config);

        let data = archive.build_report_data(f.sample).unwrap();
        assert_eq!(data.sample.code, "W-000001");
        assert_eq!(data.requester.name, "Acueducto Norte");
        assert_eq!(data.evaluator_name.as_deref(), Some("Eva Ruiz"));
        assert_eq!(data.lines.len(), 1);
        let line = &data.lines[0];
        assert_eq!(line.parameter_id, f.ph);
        assert_eq!(line.norm_text.as_deref(), Some("6.5 – 8.5"));
        assert_eq!(line.norm_source.as_deref(), Some("NORDOM 1"));
        assert_eq!(line.norm_description.as_deref(), Some("Drinking water"));
        assert_eq!(data.fit_for_consumption, None);
    }

    #[test]
    fn test_create_report_round_trips_bytes() {
        let f = setup();
        let renderer = PdfReportRenderer::new();
        let archive = ReportArchive::new(&f.db, &renderer, &f.config);

        let created = archive.create_report(f.sample, f.evaluator, true).unwrap();
        assert_eq!(created.version, 1);
        let file = archive.report_pdf(created.report_id).unwrap();
        assert!(file.content.starts_with(PDF_MAGIC));
        assert_eq!(file.filename, "report-W-000001-v1.pdf");

        let second = archive.create_report(f.sample, f.evaluator, false).unwrap();
        assert_eq!(second.version, 2);
        let summaries = archive.reports_for_sample(f.sample).unwrap();
        assert_eq!(summaries[0].report.version, 2);
        assert_eq!(summaries[0].url, format!("/reports/{}/file", second.report_id));
        assert_eq!(archive.list_reports().unwrap().len(), 2);
    }

    #[test]
    fn test_render_failure_leaves_no_trace() {
        let f = setup();
        let renderer = FailingRenderer;
        let archive = ReportArchive::new(&f.db, &renderer, &f.config);

        assert!(matches!(
            archive.create_report(f.sample, f.evaluator, true),
            Err(LabError::Rendering(_))
        ));
        assert!(archive.reports_for_sample(f.sample).unwrap().is_empty());
    }

    #[test]
    fn test_upload_report() {
        let f = setup();
        let renderer = PdfReportRenderer::new();
        let archive = ReportArchive::new(&f.db, &renderer, &f.config);
        let pdf = b"%PDF-1.7\nmanual certificate\n%%EOF\n";

        assert!(matches!(
            archive.upload_report(f.sample, f.evaluator, b"", "x.pdf"),
            Err(LabError::Validation(_))
        ));
        assert!(matches!(
            archive.upload_report(f.sample, f.evaluator, b"PK\x03\x04", "x.pdf"),
            Err(LabError::Validation(_))
        ));

        let created = archive
            .upload_report(f.sample, f.evaluator, pdf, "../../etc/signed cert")
            .unwrap();
        let file = archive.report_pdf(created.report_id).unwrap();
        assert_eq!(file.content, pdf.to_vec());
        assert_eq!(file.filename, "signed_cert.pdf");
    }

    #[test]
    fn test_corrupted_blob_is_detected() {
        let f = setup();
        let renderer = PdfReportRenderer::new();
        let archive = ReportArchive::new(&f.db, &renderer, &f.config);
        let created = archive.create_report(f.sample, f.evaluator, true).unwrap();

        f.db.conn()
            .execute(
                "UPDATE report_files SET content = X'00' WHERE report_id = ?",
                [created.report_id],
            )
            .unwrap();
        assert!(matches!(
            archive.report_pdf(created.report_id),
            Err(LabError::Storage(_))
        ));
    }

    #[test]
    fn test_legacy_storage_path_fallback() {
        let f = setup();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old-cert.pdf"), b"%PDF-1.3 legacy").unwrap();
        let config = LabConfig {
            files_dir: dir.path().to_path_buf(),
            ..LabConfig::default()
        };
        let renderer = PdfReportRenderer::new();
        let archive = ReportArchive::new(&f.db, &renderer, &config);

        f.db.conn()
            .execute_batch(&format!(
                r#"
                INSERT INTO reports (sample_id, version, evaluator_id, storage_path, created_at)
                VALUES ({s}, 1, 1, '/files/old-cert.pdf', 'x');
                INSERT INTO reports (sample_id, version, evaluator_id, storage_path, created_at)
                VALUES ({s}, 2, 1, '/files/missing.pdf', 'x');
                INSERT INTO reports (sample_id, version, evaluator_id, created_at)
                VALUES ({s}, 3, 1, 'x');
                "#,
                s = f.sample
            ))
            .unwrap();

        let file = archive.report_pdf(1).unwrap();
        assert_eq!(file.content, b"%PDF-1.3 legacy".to_vec());
        assert_eq!(file.filename, "old-cert.pdf");
        assert!(matches!(archive.report_pdf(2), Err(LabError::NotFound(_))));
        assert!(matches!(archive.report_pdf(3), Err(LabError::NotFound(_))));
        assert!(matches!(archive.report_pdf(99), Err(LabError::NotFound(_))));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("cert.PDF").as_deref(), Some("cert.PDF"));
        assert_eq!(sanitize_filename("C:\\docs\\a b.pdf").as_deref(), Some("a_b.pdf"));
        assert_eq!(sanitize_filename("report").as_deref(), Some("report.pdf"));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("../.."), None);
    }
}
