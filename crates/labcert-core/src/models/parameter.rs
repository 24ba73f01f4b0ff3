//! Parameter and reference norm models.

use serde::{Deserialize, Serialize};

use super::sample::SampleType;

/// A measurable characteristic of a sample (pH, coliform count, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub id: i64,
    pub name: String,
    /// Sample type this parameter applies to
    pub sample_type: SampleType,
    /// Measurement unit (e.g. "mg/L", "UFC/100mL")
    pub unit: Option<String>,
}

/// Comparison operator of a norm.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NormOperator {
    #[serde(rename = "BETWEEN")]
    Between,
    #[serde(rename = "<=")]
    AtMost,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    AtLeast,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "=")]
    Equal,
}

impl NormOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormOperator::Between => "BETWEEN",
            NormOperator::AtMost => "<=",
            NormOperator::LessThan => "<",
            NormOperator::AtLeast => ">=",
            NormOperator::GreaterThan => ">",
            NormOperator::Equal => "=",
        }
    }

    /// Parse an operator symbol. Unknown symbols yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BETWEEN" => Some(NormOperator::Between),
            "<=" | "≤" => Some(NormOperator::AtMost),
            "<" => Some(NormOperator::LessThan),
            ">=" | "≥" => Some(NormOperator::AtLeast),
            ">" => Some(NormOperator::GreaterThan),
            "=" | "==" => Some(NormOperator::Equal),
            _ => None,
        }
    }
}

/// The acceptance rule attached to a parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Norm {
    pub norm_id: i64,
    pub parameter_id: i64,
    /// `None` when no operator was set or the stored one is unrecognized;
    /// evaluation then infers the comparison from the bounds present.
    pub operator: Option<NormOperator>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub description: Option<String>,
    /// Regulation or standard the norm is taken from
    pub source: Option<String>,
    pub sample_type: Option<SampleType>,
}

impl Norm {
    /// Norm with only the comparison part set, for evaluation-only callers.
    pub fn bounds(operator: Option<NormOperator>, lower: Option<f64>, upper: Option<f64>) -> Self {
        Self {
            norm_id: 0,
            parameter_id: 0,
            operator,
            lower,
            upper,
            description: None,
            source: None,
            sample_type: None,
        }
    }
}

/// Input for creating or replacing a parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterInput {
    pub name: String,
    pub sample_type: String,
    pub unit: Option<String>,
}

/// Input for the norm upsert.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormInput {
    /// Operator symbol; empty means "infer from bounds"
    #[serde(default)]
    pub operator: String,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub description: Option<String>,
    pub source: Option<String>,
}

/// Filters for listing parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ParameterFilter {
    pub sample_type: Option<SampleType>,
    /// Substring matched against name or unit
    pub text: Option<String>,
    /// When set, each entry carries the latest saved result for this sample
    pub sample_id: Option<i64>,
}

/// Parameter enriched with its norm and, in a sample context, the most recent
/// saved result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterView {
    #[serde(flatten)]
    pub parameter: Parameter,
    pub norm: Option<Norm>,
    pub saved_result: Option<String>,
    pub saved_within_norm: Option<bool>,
}
