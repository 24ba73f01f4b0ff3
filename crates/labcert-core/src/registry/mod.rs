//! Parameter & norm registry.
//!
//! Parameters belong to one sample type and carry at most one norm. The
//! registry validates input before it reaches storage and keeps norm writes
//! transactional.

use crate::db::{Database, NormRecord};
use crate::models::{
    Norm, NormInput, NormOperator, ParameterFilter, ParameterInput, ParameterView, SampleType,
};
use crate::{LabError, LabResult};

/// Registry of measurable parameters and their acceptance norms.
pub struct ParameterRegistry<'a> {
    db: &'a Database,
}

impl<'a> ParameterRegistry<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// The fixed set of sample types.
    pub fn sample_types() -> Vec<SampleType> {
        SampleType::ALL.to_vec()
    }

    /// Parameters matching `filter`, newest first.
    pub fn list_parameters(&self, filter: &ParameterFilter) -> LabResult<Vec<ParameterView>> {
        Ok(self.db.list_parameters(filter)?)
    }

    /// Create a parameter and return its id.
    pub fn create_parameter(&self, input: &ParameterInput) -> LabResult<i64> {
        let (name, sample_type, unit) = validate_parameter(input)?;
        let id = self.db.insert_parameter(&name, sample_type, unit.as_deref())?;
        tracing::info!(parameter_id = id, sample_type = sample_type.as_str(), "parameter created");
        Ok(id)
    }

    /// Replace every field of a parameter. The sample type is frozen once
    /// results or sample assignments reference the parameter.
    pub fn update_parameter(&self, id: i64, input: &ParameterInput) -> LabResult<()> {
        let (name, sample_type, unit) = validate_parameter(input)?;
        match self
            .db
            .update_parameter(id, &name, sample_type, unit.as_deref())
        {
            Ok(true) => {
                tracing::info!(parameter_id = id, "parameter updated");
                Ok(())
            }
            Ok(false) => Err(LabError::NotFound(format!("parameter {id}"))),
            Err(e) if e.is_constraint_violation() => {
                tracing::warn!(parameter_id = id, error = %e, "sample type change refused");
                Err(LabError::Conflict(format!(
                    "parameter {id} is in use and cannot move to {} samples",
                    sample_type.label()
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a parameter and its norm. Parameters with recorded results
    /// cannot be deleted.
    pub fn delete_parameter(&self, id: i64) -> LabResult<()> {
        match self.db.delete_parameter(id) {
            Ok(true) => {
                tracing::info!(parameter_id = id, "parameter deleted");
                Ok(())
            }
            Ok(false) => Err(LabError::NotFound(format!("parameter {id}"))),
            Err(e) if e.is_constraint_violation() => {
                tracing::warn!(parameter_id = id, error = %e, "parameter still referenced");
                Err(LabError::Conflict(format!(
                    "parameter {id} is in use by recorded results or sample assignments"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Norm of a parameter, if one is set.
    pub fn get_norm(&self, parameter_id: i64) -> LabResult<Option<Norm>> {
        self.require_parameter(parameter_id)?;
        Ok(self.db.get_norm(parameter_id)?)
    }

    /// Create or replace the norm of a parameter.
    ///
    /// An empty operator stores no operator, in which case evaluation infers
    /// the comparison from the bounds present.
    pub fn upsert_norm(&self, parameter_id: i64, input: &NormInput) -> LabResult<Norm> {
        let parameter = self.require_parameter(parameter_id)?;
        let operator = parse_operator(&input.operator)?;
        validate_bounds(input.lower, input.upper)?;

        let record = NormRecord {
            operator,
            lower: input.lower,
            upper: input.upper,
            description: non_blank(input.description.as_deref()),
            source: non_blank(input.source.as_deref()),
            sample_type: Some(parameter.sample_type),
        };
        let norm_id = self.db.upsert_norm(parameter_id, &record)?;
        tracing::info!(parameter_id, norm_id, "norm saved");

        self.db
            .get_norm(parameter_id)?
            .ok_or_else(|| LabError::Storage(format!("norm for parameter {parameter_id} vanished")))
    }

    fn require_parameter(&self, id: i64) -> LabResult<crate::models::Parameter> {
        self.db
            .get_parameter(id)?
            .ok_or_else(|| LabError::NotFound(format!("parameter {id}")))
    }
}

fn validate_parameter(input: &ParameterInput) -> LabResult<(String, SampleType, Option<String>)> {
    let name = input.name.trim();
    if name.is_empty() {
        return Err(LabError::Validation("parameter name is required".into()));
    }
    let sample_type = SampleType::parse(&input.sample_type).ok_or_else(|| {
        LabError::Validation(format!("unknown sample type '{}'", input.sample_type))
    })?;
    Ok((
        name.to_string(),
        sample_type,
        non_blank(input.unit.as_deref()),
    ))
}

fn parse_operator(raw: &str) -> LabResult<Option<NormOperator>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    NormOperator::parse(raw).map(Some).ok_or_else(|| {
        LabError::Validation(format!(
            "unknown operator '{raw}' (expected BETWEEN, <=, <, >=, > or =)"
        ))
    })
}

fn validate_bounds(lower: Option<f64>, upper: Option<f64>) -> LabResult<()> {
    if lower.is_some_and(|v| !v.is_finite()) || upper.is_some_and(|v| !v.is_finite()) {
        return Err(LabError::Validation("norm bounds must be finite numbers".into()));
    }
    if let (Some(lo), Some(hi)) = (lower, upper) {
        if lo > hi {
            return Err(LabError::Validation(format!(
                "lower bound {lo} is greater than upper bound {hi}"
            )));
        }
    }
    Ok(())
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
