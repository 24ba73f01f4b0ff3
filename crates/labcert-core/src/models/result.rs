//! Test result models.

use serde::{Deserialize, Serialize};

/// One recorded measurement of one parameter on one sample.
///
/// Rows are never updated; a correction is a new row, and the row with the
/// highest id per (sample, parameter) is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestResult {
    pub id: i64,
    pub sample_id: i64,
    pub parameter_id: i64,
    /// Raw result as entered: numeric ("7,2") or categorical ("Ausente")
    pub result: String,
    /// Verdict submitted by the evaluator
    pub within_norm: bool,
    pub evaluator_id: i64,
    pub recorded_at: String,
}

/// Input for recording a result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTestResult {
    pub sample_id: i64,
    pub parameter_id: i64,
    pub result: String,
    pub within_norm: bool,
}

/// Latest result per parameter for a sample, with the parameter name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LatestResult {
    pub parameter_id: i64,
    pub parameter_name: String,
    pub result: String,
    pub within_norm: bool,
    pub recorded_at: String,
}
