//! Sample lifecycle state machine.
//!
//! ```text
//! Received ──assign──▶ InAnalysis ──complete──▶ AwaitingValidation ──validate──▶ Validated
//!    │                     ▲                           │
//!    └──retire──▶ (retired)  └──────────returned─────────┘
//! ```
//!
//! Every transition is a guarded conditional update inside a write
//! transaction, so of two racing callers exactly one wins and the other gets
//! [`LabError::Conflict`].

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::access::Role;
use crate::db::{Database, NewReportVersion};
use crate::models::{
    Assignment, CreatedReport, LatestResult, NewSample, NewTestResult, ParameterView,
    RegisteredSample, Sample, SampleRegistration, SampleState, SampleType, SampleWithAssignee,
    SampleWithReport,
};
use crate::report::ReportArchive;
use crate::{LabError, LabResult};

/// Drives samples through their lifecycle.
pub struct SampleLifecycle<'a> {
    db: &'a Database,
}

impl<'a> SampleLifecycle<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Register a sample and allocate its lab code.
    pub fn register_sample(&self, form: &SampleRegistration) -> LabResult<RegisteredSample> {
        let sample_type = SampleType::parse(&form.sample_type).ok_or_else(|| {
            LabError::Validation(format!("unknown sample type '{}'", form.sample_type))
        })?;
        let received_at = parse_received_at(&form.date, &form.time)?;

        if !self.db.requester_exists(form.requester_id)? {
            return Err(LabError::Reference(format!(
                "requester {} does not exist",
                form.requester_id
            )));
        }

        let new = NewSample {
            sample_type,
            received_at,
            origin: non_blank(form.origin.as_deref()),
            transport_conditions: non_blank(form.transport_conditions.as_deref()),
            requester_id: form.requester_id,
        };
        let (id, code) = self.db.insert_sample(&new).map_err(|e| {
            if e.is_constraint_violation() {
                tracing::warn!(error = %e, "sample code allocation failed");
                LabError::Conflict("could not allocate a unique sample code, retry".into())
            } else {
                e.into()
            }
        })?;

        tracing::info!(sample_id = id, code = %code, "sample registered");
        Ok(RegisteredSample { id, code })
    }

    /// Soft-delete a sample that has not been assigned yet.
    pub fn retire(&self, sample_id: i64) -> LabResult<()> {
        let sample = self.require_sample(sample_id)?;
        if !self.db.retire_sample(sample_id)? {
            tracing::warn!(sample_id, state = sample.state.as_str(), "retire refused");
            return Err(if sample.retired {
                LabError::Conflict(format!("sample {} is already retired", sample.code))
            } else {
                LabError::Conflict(format!(
                    "sample {} is {} and can no longer be retired",
                    sample.code,
                    sample.state.as_str()
                ))
            });
        }
        tracing::info!(sample_id, "sample retired");
        Ok(())
    }

    // =========================================================================
    // Listings
    // =========================================================================

    pub fn get_sample(&self, sample_id: i64) -> LabResult<Sample> {
        self.require_sample(sample_id)
    }

    pub fn list_pending(&self) -> LabResult<Vec<Sample>> {
        Ok(self.db.list_samples_in_state(SampleState::Received)?)
    }

    pub fn list_in_analysis(&self) -> LabResult<Vec<SampleWithAssignee>> {
        Ok(self.db.list_in_analysis_with_assignee(None)?)
    }

    /// In-analysis samples whose current assignee is `evaluator_id`.
    pub fn list_assigned_to(&self, evaluator_id: i64) -> LabResult<Vec<SampleWithAssignee>> {
        Ok(self.db.list_in_analysis_with_assignee(Some(evaluator_id))?)
    }

    pub fn list_awaiting_validation(&self) -> LabResult<Vec<Sample>> {
        Ok(self
            .db
            .list_samples_in_state(SampleState::AwaitingValidation)?)
    }

    pub fn list_validated(&self) -> LabResult<Vec<SampleWithReport>> {
        Ok(self.db.list_validated_with_report()?)
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Hand a received sample to an evaluator. There is no re-assignment:
    /// once a sample left Received this fails with a conflict.
    pub fn assign_evaluator(
        &self,
        sample_id: i64,
        evaluator_id: i64,
        comment: Option<&str>,
    ) -> LabResult<Assignment> {
        let sample = self.require_sample(sample_id)?;
        let evaluator = self.db.get_staff(evaluator_id)?.ok_or_else(|| {
            LabError::Reference(format!("staff member {evaluator_id} does not exist"))
        })?;
        if !evaluator.active || !evaluator.has_role(Role::Evaluator) {
            return Err(LabError::Precondition(format!(
                "{} is not an active evaluator",
                evaluator.name
            )));
        }
        if sample.retired || sample.state != SampleState::Received {
            tracing::warn!(sample_id, state = sample.state.as_str(), "assign refused");
            return Err(not_assignable(&sample));
        }

        let comment = non_blank(comment);
        if !self
            .db
            .assign_sample(sample_id, evaluator_id, comment.as_deref())?
        {
            tracing::warn!(sample_id, "assign lost a race");
            return Err(not_assignable(&sample));
        }
        tracing::info!(sample_id, evaluator_id, "sample assigned");

        self.db
            .current_assignment(sample_id)?
            .ok_or_else(|| LabError::Storage(format!("assignment for sample {sample_id} vanished")))
    }

    /// Every assignment made for a sample, oldest first.
    pub fn assignment_history(&self, sample_id: i64) -> LabResult<Vec<Assignment>> {
        self.require_sample(sample_id)?;
        Ok(self.db.list_assignments(sample_id)?)
    }

    /// Parameters to evaluate: the explicit list when one was set, otherwise
    /// every parameter of the sample's type. Each carries its norm and the
    /// latest saved result so partial evaluations can be resumed.
    pub fn parameters_for(&self, sample_id: i64) -> LabResult<Vec<ParameterView>> {
        let sample = self.require_sample(sample_id)?;
        if self.db.sample_parameter_ids(sample_id)?.is_empty() {
            Ok(self
                .db
                .list_type_parameter_views(sample.sample_type, sample_id)?)
        } else {
            Ok(self.db.list_sample_parameter_views(sample_id)?)
        }
    }

    /// Replace the explicit parameter list of a sample. An empty list falls
    /// back to all parameters of the sample's type.
    pub fn assign_parameters(
        &self,
        sample_id: i64,
        parameter_ids: &[i64],
    ) -> LabResult<Vec<ParameterView>> {
        let sample = self.require_sample(sample_id)?;
        if sample.retired
            || !matches!(
                sample.state,
                SampleState::Received | SampleState::InAnalysis
            )
        {
            return Err(LabError::Conflict(format!(
                "parameters of sample {} can no longer change",
                sample.code
            )));
        }
        for &parameter_id in parameter_ids {
            let parameter = self.db.get_parameter(parameter_id)?.ok_or_else(|| {
                LabError::Reference(format!("parameter {parameter_id} does not exist"))
            })?;
            if parameter.sample_type != sample.sample_type {
                return Err(LabError::Validation(format!(
                    "parameter '{}' is for {} samples, not {}",
                    parameter.name,
                    parameter.sample_type.label(),
                    sample.sample_type.label()
                )));
            }
        }
        self.db.set_sample_parameters(sample_id, parameter_ids)?;
        tracing::info!(sample_id, count = parameter_ids.len(), "sample parameters set");
        self.parameters_for(sample_id)
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Append a result. Any evaluator may record; results from someone
    /// other than the current assignee are accepted and logged.
    pub fn record_result(&self, result: &NewTestResult, evaluator_id: i64) -> LabResult<i64> {
        if result.result.trim().is_empty() {
            return Err(LabError::Validation("result value is required".into()));
        }
        let sample = self.require_sample(result.sample_id)?;
        if sample.retired || sample.state != SampleState::InAnalysis {
            return Err(LabError::Precondition(format!(
                "sample {} is not in analysis",
                sample.code
            )));
        }
        let parameter = self.db.get_parameter(result.parameter_id)?.ok_or_else(|| {
            LabError::Reference(format!("parameter {} does not exist", result.parameter_id))
        })?;
        if parameter.sample_type != sample.sample_type {
            return Err(LabError::Validation(format!(
                "parameter '{}' does not apply to {} samples",
                parameter.name,
                sample.sample_type.label()
            )));
        }

        if let Some(assignment) = self.db.current_assignment(sample.id)? {
            if assignment.evaluator_id != evaluator_id {
                tracing::warn!(
                    sample_id = sample.id,
                    assignee = assignment.evaluator_id,
                    evaluator_id,
                    "result recorded by an evaluator other than the assignee"
                );
            }
        }

        let id = self.db.insert_test_result(result, evaluator_id)?;
        tracing::info!(
            sample_id = sample.id,
            parameter_id = parameter.id,
            result_id = id,
            "result recorded"
        );
        Ok(id)
    }

    /// Latest result per parameter.
    pub fn latest_results(&self, sample_id: i64) -> LabResult<Vec<LatestResult>> {
        self.require_sample(sample_id)?;
        Ok(self.db.latest_results(sample_id)?)
    }

    /// Finish an evaluation: render the next report version and move the
    /// sample to Awaiting-Validation, atomically.
    pub fn complete_evaluation(
        &self,
        reports: &ReportArchive<'_>,
        sample_id: i64,
        evaluator_id: i64,
        fit_for_consumption: bool,
    ) -> LabResult<CreatedReport> {
        let sample = self.require_sample(sample_id)?;
        if sample.retired || sample.state != SampleState::InAnalysis {
            return Err(LabError::Precondition(format!(
                "sample {} is not in analysis",
                sample.code
            )));
        }
        if self.db.count_test_results(sample_id)? == 0 {
            return Err(LabError::Precondition(format!(
                "sample {} has no recorded results",
                sample.code
            )));
        }

        // Render before the write transaction opens
        let content = reports.render_certificate(sample_id, Some(fit_for_consumption))?;
        let new = NewReportVersion {
            sample_id,
            evaluator_id,
            fit_for_consumption: Some(fit_for_consumption),
            content: &content,
            transition: Some((SampleState::InAnalysis, SampleState::AwaitingValidation)),
        };
        let created = self
            .db
            .insert_report_version(&new, |version| certificate_filename(&sample.code, version))?
            .ok_or_else(|| {
                tracing::warn!(sample_id, "completion lost a race");
                LabError::Conflict(format!("sample {} changed state concurrently", sample.code))
            })?;

        tracing::info!(
            sample_id,
            report_id = created.report_id,
            version = created.version,
            "evaluation completed"
        );
        Ok(created)
    }

    fn require_sample(&self, sample_id: i64) -> LabResult<Sample> {
        self.db
            .get_sample(sample_id)?
            .ok_or_else(|| LabError::NotFound(format!("sample {sample_id}")))
    }
}

/// Download name of a generated certificate.
pub(crate) fn certificate_filename(code: &str, version: i64) -> String {
    format!("report-{code}-v{version}.pdf")
}

fn not_assignable(sample: &Sample) -> LabError {
    LabError::Conflict(format!(
        "sample {} is not in an assignable state",
        sample.code
    ))
}

fn parse_received_at(date: &str, time: &str) -> LabResult<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| LabError::Validation(format!("invalid date '{date}', expected YYYY-MM-DD")))?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time.trim(), "%H:%M"))
        .map_err(|_| LabError::Validation(format!("invalid time '{time}', expected HH:MM")))?;
    Ok(date.and_time(time))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
