//! Certification report models.

use serde::{Deserialize, Serialize};

use super::sample::{Requester, Sample};

/// Review state of a report version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    /// Generated or uploaded, waiting for a validator
    Created,
    /// Accepted by a validator; the sample is certified
    Validated,
    /// Sent back to the evaluator for rework
    Returned,
}

impl ReportState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportState::Created => "created",
            ReportState::Validated => "validated",
            ReportState::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(ReportState::Created),
            "validated" => Some(ReportState::Validated),
            "returned" => Some(ReportState::Returned),
            _ => None,
        }
    }
}

/// Decision taken by a validator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReviewAction {
    #[serde(alias = "Validado", alias = "validated")]
    Validated,
    #[serde(alias = "Devuelto", alias = "returned")]
    Returned,
}

impl ReviewAction {
    /// Report state the action leads to.
    pub fn report_state(&self) -> ReportState {
        match self {
            ReviewAction::Validated => ReportState::Validated,
            ReviewAction::Returned => ReportState::Returned,
        }
    }
}

/// Report metadata row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: i64,
    pub sample_id: i64,
    /// Monotonic per sample, starting at 1
    pub version: i64,
    pub state: ReportState,
    pub evaluator_id: i64,
    /// `None` for manually uploaded reports
    pub fit_for_consumption: Option<bool>,
    /// Legacy path pointer (`/files/<name>`), kept for files not stored as blobs
    pub storage_path: Option<String>,
    pub created_at: String,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<String>,
    pub review_comment: Option<String>,
}

/// Report with its retrieval URL, for listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSummary {
    #[serde(flatten)]
    pub report: Report,
    pub url: String,
}

impl ReportSummary {
    pub fn new(report: Report) -> Self {
        let url = format!("/reports/{}/file", report.id);
        Self { report, url }
    }
}

/// Identity of a freshly stored report version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedReport {
    pub report_id: i64,
    pub version: i64,
}

/// Binary artifact attached to a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportFile {
    pub report_id: i64,
    pub filename: String,
    pub content: Vec<u8>,
    /// Hex SHA-256 of `content`
    pub sha256: String,
}

/// Everything a certification document shows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportData {
    pub lab_name: String,
    pub sample: Sample,
    pub requester: Requester,
    pub lines: Vec<ReportLine>,
    /// Evaluator's overall verdict; `None` in previews
    pub fit_for_consumption: Option<bool>,
    pub evaluator_name: Option<String>,
    pub generated_at: String,
}

/// One parameter row of the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportLine {
    pub parameter_id: i64,
    pub parameter_name: String,
    pub unit: Option<String>,
    pub result: String,
    pub within_norm: bool,
    /// Human-readable norm, e.g. "6.5 – 8.5"
    pub norm_text: Option<String>,
    pub norm_description: Option<String>,
    pub norm_source: Option<String>,
    pub recorded_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_action_accepts_legacy_names() {
        let a: ReviewAction = serde_json::from_str("\"Devuelto\"").unwrap();
        assert_eq!(a, ReviewAction::Returned);
        let a: ReviewAction = serde_json::from_str("\"Validated\"").unwrap();
        assert_eq!(a.report_state(), ReportState::Validated);
    }

    #[test]
    fn test_summary_url() {
        let report = Report {
            id: 42,
            sample_id: 1,
            version: 1,
            state: ReportState::Created,
            evaluator_id: 7,
            fit_for_consumption: Some(true),
            storage_path: None,
            created_at: "2024-01-15T10:00:00Z".into(),
            reviewed_by: None,
            reviewed_at: None,
            review_comment: None,
        };
        assert_eq!(ReportSummary::new(report).url, "/reports/42/file");
    }
}
