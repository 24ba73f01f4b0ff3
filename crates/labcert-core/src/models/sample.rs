//! Sample, requester and assignment models.

use serde::{Deserialize, Serialize};

/// Kind of physical specimen received by the lab.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    #[serde(alias = "Agua", alias = "Water")]
    Water,
    #[serde(alias = "Alimento", alias = "Food")]
    Food,
    #[serde(
        alias = "Bebida Alcoholica",
        alias = "Bebida",
        alias = "Alcoholic Beverage"
    )]
    AlcoholicBeverage,
}

impl SampleType {
    /// The fixed enumeration, in display order.
    pub const ALL: [SampleType; 3] = [
        SampleType::Water,
        SampleType::Food,
        SampleType::AlcoholicBeverage,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::Water => "water",
            SampleType::Food => "food",
            SampleType::AlcoholicBeverage => "alcoholic_beverage",
        }
    }

    /// Human-readable label used on reports.
    pub fn label(&self) -> &'static str {
        match self {
            SampleType::Water => "Water",
            SampleType::Food => "Food",
            SampleType::AlcoholicBeverage => "Alcoholic Beverage",
        }
    }

    /// Prefix of the lab-generated sample code.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            SampleType::Water => "W",
            SampleType::Food => "F",
            SampleType::AlcoholicBeverage => "B",
        }
    }

    /// Parse a type name. Accepts the storage form, the English label and the
    /// lab's legacy Spanish names, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "water" | "agua" => Some(SampleType::Water),
            "food" | "alimento" => Some(SampleType::Food),
            "alcoholic_beverage" | "alcoholic beverage" | "bebida alcoholica"
            | "bebida alcohólica" | "bebida" => Some(SampleType::AlcoholicBeverage),
            _ => None,
        }
    }
}

/// Lifecycle state of a sample.
///
/// `Retired` is not a state value; it is the soft-delete flag on [`Sample`],
/// which can only be set while the state is still `Received`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SampleState {
    /// Registered by data entry, no evaluator yet
    Received,
    /// Assigned to an evaluator, results being recorded
    InAnalysis,
    /// Evaluation complete, report waiting for a validator
    AwaitingValidation,
    /// Report validated, sample certified
    Validated,
}

impl SampleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleState::Received => "received",
            SampleState::InAnalysis => "in_analysis",
            SampleState::AwaitingValidation => "awaiting_validation",
            SampleState::Validated => "validated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(SampleState::Received),
            "in_analysis" => Some(SampleState::InAnalysis),
            "awaiting_validation" => Some(SampleState::AwaitingValidation),
            "validated" => Some(SampleState::Validated),
            _ => None,
        }
    }
}

/// A physical specimen tracked by the lab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Surrogate key
    pub id: i64,
    /// Lab-generated unique code, e.g. `W-000123`
    pub code: String,
    pub sample_type: SampleType,
    /// Transport conditions (free text)
    pub transport_conditions: Option<String>,
    /// Where the sample was taken
    pub origin: Option<String>,
    /// Reception date and time (`YYYY-MM-DDTHH:MM:SS`)
    pub received_at: String,
    pub requester_id: i64,
    pub state: SampleState,
    /// Soft-delete flag
    pub retired: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Validated input for registering a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub sample_type: SampleType,
    pub received_at: chrono::NaiveDateTime,
    pub origin: Option<String>,
    pub transport_conditions: Option<String>,
    pub requester_id: i64,
}

/// Sample currently in analysis together with its current assignee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleWithAssignee {
    #[serde(flatten)]
    pub sample: Sample,
    pub evaluator_id: Option<i64>,
    pub evaluator_name: Option<String>,
    pub assigned_at: Option<String>,
}

/// Validated sample together with its latest report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleWithReport {
    #[serde(flatten)]
    pub sample: Sample,
    pub report_id: Option<i64>,
    pub report_version: Option<i64>,
}

/// Party on whose behalf samples are submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Requester {
    pub id: i64,
    /// Name or legal name
    pub name: String,
    pub address: Option<String>,
    pub contact: Option<String>,
    /// National identifier, fixed-length numeric string
    pub national_id: String,
    pub created_at: String,
}

/// Input for creating a requester.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRequester {
    pub name: String,
    pub address: Option<String>,
    pub contact: Option<String>,
    pub national_id: String,
}

impl NewRequester {
    /// Length of the national identifier.
    pub const NATIONAL_ID_LEN: usize = 11;

    /// Check field shapes. Returns a message suitable for the caller.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().chars().count() < 2 {
            return Err("requester name must have at least 2 characters".into());
        }
        let id = self.national_id.trim();
        if id.len() != Self::NATIONAL_ID_LEN || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!(
                "national id must be exactly {} digits",
                Self::NATIONAL_ID_LEN
            ));
        }
        Ok(())
    }
}

/// One row of the append-only assignment log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub id: i64,
    pub sample_id: i64,
    pub evaluator_id: i64,
    pub comment: Option<String>,
    pub assigned_at: String,
}

/// Intake form for a new sample, as submitted by data entry. Date and time
/// arrive as separate strings (`YYYY-MM-DD`, `HH:MM[:SS]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampleRegistration {
    pub sample_type: String,
    pub date: String,
    pub time: String,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub transport_conditions: Option<String>,
    pub requester_id: i64,
}

/// Identity of a freshly registered sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredSample {
    pub id: i64,
    pub code: String,
}
