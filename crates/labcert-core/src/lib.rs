//! Labcert Core Library
//!
//! Sample tracking, norm evaluation and report certification for a
//! public-health laboratory.
//!
//! # Architecture
//!
//! ```text
//! Data entry registers sample ──▶ Received
//!                                    │  validator assigns evaluator
//!                                    ▼
//!                               InAnalysis ◀──────────────┐
//!                                    │  evaluator records  │
//!                                    │  results, completes │ returned
//!                                    ▼                     │
//!                      ┌──────────────────────────────┐    │
//!                      │  Report vN rendered + stored │    │
//!                      │  (blob + sha256, versioned)  │    │
//!                      └──────────────┬───────────────┘    │
//!                                     ▼                    │
//!                            AwaitingValidation ───────────┘
//!                                     │  validator validates
//!                                     ▼
//!                                 Validated
//! ```
//!
//! # Core Principle
//!
//! **Every transition is a guarded update in one transaction.** Two racing
//! callers never both win, and a report never changes state without its
//! sample.
//!
//! # Modules
//!
//! - [`access`]: Roles and the caller identity checked by every operation
//! - [`db`]: SQLite storage layer with a fixed, versioned schema
//! - [`models`]: Domain types (Sample, Parameter, Norm, Report, etc.)
//! - [`evaluation`]: Pure norm evaluation
//! - [`registry`]: Parameter & norm registry
//! - [`lifecycle`]: Sample state machine
//! - [`report`]: Report generation, versioning and retrieval

pub mod access;
pub mod db;
pub mod evaluation;
pub mod lifecycle;
pub mod models;
pub mod registry;
pub mod report;

// Re-export commonly used types
pub use access::{Caller, Role};
pub use db::Database;
pub use evaluation::{is_within_norm, Suggestion};
pub use lifecycle::SampleLifecycle;
pub use models::{
    Assignment, CreatedReport, LatestResult, NewRequester, NewStaffMember, NewTestResult, Norm,
    NormInput, NormOperator, Parameter, ParameterFilter, ParameterInput, ParameterView,
    RegisteredSample, Report, ReportData, ReportFile, ReportState, ReportSummary, Requester,
    ReviewAction, Sample, SampleRegistration, SampleState, SampleType, SampleWithAssignee,
    SampleWithReport, StaffMember,
};
pub use registry::ParameterRegistry;
pub use report::{PdfReportRenderer, RenderError, ReportArchive, ReportRenderer};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

// =========================================================================
// Error Type
// =========================================================================

#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not authenticated: {0}")]
    Authentication(String),

    #[error("Not allowed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Unknown reference: {0}")]
    Reference(String),

    #[error(transparent)]
    Rendering(#[from] RenderError),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type LabResult<T> = Result<T, LabError>;

impl From<db::DbError> for LabError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => LabError::NotFound(what),
            e if e.is_constraint_violation() => LabError::Conflict(e.to_string()),
            e => {
                tracing::error!(error = %e, "storage failure");
                LabError::Storage(e.to_string())
            }
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for LabError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        LabError::Storage(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Configuration
// =========================================================================

/// Settings the core needs from its host.
#[derive(Debug, Clone, PartialEq)]
pub struct LabConfig {
    /// Printed in report headers
    pub lab_name: String,
    /// Directory holding report files written by older deployments
    pub files_dir: PathBuf,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            lab_name: "Public Health Laboratory".to_string(),
            files_dir: PathBuf::from("uploads"),
        }
    }
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe entry point. Every operation takes the [`Caller`] that issued
/// it and checks its roles first.
pub struct Lab {
    db: Arc<Mutex<Database>>,
    renderer: Arc<dyn ReportRenderer>,
    config: LabConfig,
}

const DATA_ENTRY: &[Role] = &[Role::DataEntry];
const EVALUATOR: &[Role] = &[Role::Evaluator];
const VALIDATOR: &[Role] = &[Role::Validator];
const RETIRERS: &[Role] = &[Role::DataEntry, Role::Validator];
const ANY_ROLE: &[Role] = &[Role::DataEntry, Role::Evaluator, Role::Validator];

impl Lab {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>, config: LabConfig) -> LabResult<Self> {
        Ok(Self::with_database(Database::open(path)?, config))
    }

    /// In-memory database (for testing).
    pub fn open_in_memory(config: LabConfig) -> LabResult<Self> {
        Ok(Self::with_database(Database::open_in_memory()?, config))
    }

    pub fn with_database(db: Database, config: LabConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            renderer: Arc::new(PdfReportRenderer::new()),
            config,
        }
    }

    /// Swap the PDF engine.
    pub fn with_renderer(mut self, renderer: Arc<dyn ReportRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Storage round trip, for health checks.
    pub fn ping(&self) -> LabResult<()> {
        let db = self.db.lock()?;
        Ok(db.ping()?)
    }

    // =========================================================================
    // Requesters & Staff
    // =========================================================================

    pub fn create_requester(&self, caller: &Caller, requester: &NewRequester) -> LabResult<Requester> {
        caller.require_any(DATA_ENTRY)?;
        requester.validate().map_err(LabError::Validation)?;
        let db = self.db.lock()?;
        let id = db.insert_requester(requester).map_err(|e| {
            if e.is_constraint_violation() {
                LabError::Conflict(format!(
                    "a requester with national id {} already exists",
                    requester.national_id.trim()
                ))
            } else {
                e.into()
            }
        })?;
        tracing::info!(requester_id = id, "requester created");
        db.get_requester(id)?
            .ok_or_else(|| LabError::Storage(format!("requester {id} vanished")))
    }

    pub fn list_requesters(&self, caller: &Caller) -> LabResult<Vec<Requester>> {
        caller.require_any(ANY_ROLE)?;
        let db = self.db.lock()?;
        Ok(db.list_requesters()?)
    }

    /// Active staff, optionally only those holding `role`.
    pub fn list_staff(&self, caller: &Caller, role: Option<Role>) -> LabResult<Vec<StaffMember>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        Ok(db.list_staff(role)?)
    }

    /// Every account, active or not, optionally filtered by name or email.
    pub fn search_staff(&self, caller: &Caller, text: Option<&str>) -> LabResult<Vec<StaffMember>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        Ok(db.search_staff(text)?)
    }

    /// Roles that can be granted to an account.
    pub fn staff_roles(&self, caller: &Caller) -> LabResult<Vec<Role>> {
        caller.require_any(VALIDATOR)?;
        Ok(Role::ALL.to_vec())
    }

    /// Create an account together with its roles.
    pub fn create_staff(&self, caller: &Caller, member: &NewStaffMember) -> LabResult<StaffMember> {
        caller.require_any(VALIDATOR)?;
        member.validate().map_err(LabError::Validation)?;
        let db = self.db.lock()?;
        let id = db
            .insert_staff(member)
            .map_err(|e| email_taken(e, &member.email))?;
        tracing::info!(staff_id = id, by = caller.user_id, "staff member created");
        db.get_staff(id)?
            .ok_or_else(|| LabError::Storage(format!("staff member {id} vanished")))
    }

    /// Replace an account's name, email and roles.
    pub fn update_staff(
        &self,
        caller: &Caller,
        staff_id: i64,
        member: &NewStaffMember,
    ) -> LabResult<StaffMember> {
        caller.require_any(VALIDATOR)?;
        member.validate().map_err(LabError::Validation)?;
        let db = self.db.lock()?;
        if !db
            .update_staff(staff_id, member)
            .map_err(|e| email_taken(e, &member.email))?
        {
            return Err(LabError::NotFound(format!("staff member {staff_id}")));
        }
        tracing::info!(staff_id, by = caller.user_id, "staff member updated");
        db.get_staff(staff_id)?
            .ok_or_else(|| LabError::Storage(format!("staff member {staff_id} vanished")))
    }

    /// Deactivate or reactivate an account. Nobody can deactivate
    /// themselves.
    pub fn set_staff_active(
        &self,
        caller: &Caller,
        staff_id: i64,
        active: bool,
    ) -> LabResult<StaffMember> {
        caller.require_any(VALIDATOR)?;
        if !active && staff_id == caller.user_id {
            return Err(LabError::Precondition(
                "you cannot deactivate your own account".into(),
            ));
        }
        let db = self.db.lock()?;
        if !db.set_staff_active(staff_id, active)? {
            return Err(LabError::NotFound(format!("staff member {staff_id}")));
        }
        tracing::info!(staff_id, active, by = caller.user_id, "staff member status changed");
        db.get_staff(staff_id)?
            .ok_or_else(|| LabError::Storage(format!("staff member {staff_id} vanished")))
    }

    /// Add a staff member unless one with the same email exists. Operator
    /// tooling only; there is no caller to check.
    pub fn ensure_staff(&self, member: &NewStaffMember) -> LabResult<StaffMember> {
        member.validate().map_err(LabError::Validation)?;
        let db = self.db.lock()?;
        if let Some(existing) = db.find_staff_by_email(&member.email)? {
            return Ok(existing);
        }
        let id = db.insert_staff(member)?;
        tracing::info!(staff_id = id, "staff member created");
        db.get_staff(id)?
            .ok_or_else(|| LabError::Storage(format!("staff member {id} vanished")))
    }

    // =========================================================================
    // Samples
    // =========================================================================

    pub fn register_sample(
        &self,
        caller: &Caller,
        form: &SampleRegistration,
    ) -> LabResult<RegisteredSample> {
        caller.require_any(DATA_ENTRY)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).register_sample(form)
    }

    pub fn retire(&self, caller: &Caller, sample_id: i64) -> LabResult<()> {
        caller.require_any(RETIRERS)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).retire(sample_id)
    }

    pub fn get_sample(&self, caller: &Caller, sample_id: i64) -> LabResult<Sample> {
        caller.require_any(ANY_ROLE)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).get_sample(sample_id)
    }

    pub fn list_pending(&self, caller: &Caller) -> LabResult<Vec<Sample>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).list_pending()
    }

    pub fn list_in_analysis(&self, caller: &Caller) -> LabResult<Vec<SampleWithAssignee>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).list_in_analysis()
    }

    /// Samples in analysis assigned to the calling evaluator.
    pub fn list_assigned_to_me(&self, caller: &Caller) -> LabResult<Vec<SampleWithAssignee>> {
        caller.require_any(EVALUATOR)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).list_assigned_to(caller.user_id)
    }

    pub fn list_awaiting_validation(&self, caller: &Caller) -> LabResult<Vec<Sample>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).list_awaiting_validation()
    }

    pub fn list_validated(&self, caller: &Caller) -> LabResult<Vec<SampleWithReport>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).list_validated()
    }

    pub fn assign_evaluator(
        &self,
        caller: &Caller,
        sample_id: i64,
        evaluator_id: i64,
        comment: Option<&str>,
    ) -> LabResult<Assignment> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).assign_evaluator(sample_id, evaluator_id, comment)
    }

    pub fn assignment_history(&self, caller: &Caller, sample_id: i64) -> LabResult<Vec<Assignment>> {
        caller.require_any(&[Role::Evaluator, Role::Validator])?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).assignment_history(sample_id)
    }

    pub fn parameters_for(&self, caller: &Caller, sample_id: i64) -> LabResult<Vec<ParameterView>> {
        caller.require_any(&[Role::Evaluator, Role::Validator])?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).parameters_for(sample_id)
    }

    pub fn assign_parameters(
        &self,
        caller: &Caller,
        sample_id: i64,
        parameter_ids: &[i64],
    ) -> LabResult<Vec<ParameterView>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).assign_parameters(sample_id, parameter_ids)
    }

    // =========================================================================
    // Results & Evaluation
    // =========================================================================

    /// Append a result recorded by the calling evaluator.
    pub fn record_result(&self, caller: &Caller, result: &NewTestResult) -> LabResult<i64> {
        caller.require_any(EVALUATOR)?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).record_result(result, caller.user_id)
    }

    pub fn latest_results(&self, caller: &Caller, sample_id: i64) -> LabResult<Vec<LatestResult>> {
        caller.require_any(&[Role::Evaluator, Role::Validator])?;
        let db = self.db.lock()?;
        SampleLifecycle::new(&db).latest_results(sample_id)
    }

    /// Advisory within-norm verdict for a raw value of a parameter. A
    /// parameter without a norm never passes.
    pub fn suggest_within_norm(
        &self,
        caller: &Caller,
        parameter_id: i64,
        raw: &str,
    ) -> LabResult<Suggestion> {
        caller.require_any(EVALUATOR)?;
        let db = self.db.lock()?;
        let norm = ParameterRegistry::new(&db).get_norm(parameter_id)?;
        Ok(match norm {
            Some(norm) => evaluation::suggest(&norm, raw),
            None => Suggestion {
                value: None,
                within_norm: false,
            },
        })
    }

    pub fn complete_evaluation(
        &self,
        caller: &Caller,
        sample_id: i64,
        fit_for_consumption: bool,
    ) -> LabResult<CreatedReport> {
        caller.require_any(EVALUATOR)?;
        let db = self.db.lock()?;
        let archive = ReportArchive::new(&db, self.renderer.as_ref(), &self.config);
        SampleLifecycle::new(&db).complete_evaluation(
            &archive,
            sample_id,
            caller.user_id,
            fit_for_consumption,
        )
    }

    // =========================================================================
    // Reports
    // =========================================================================

    pub fn create_report(
        &self,
        caller: &Caller,
        sample_id: i64,
        fit_for_consumption: bool,
    ) -> LabResult<CreatedReport> {
        caller.require_any(EVALUATOR)?;
        let db = self.db.lock()?;
        self.archive(&db)
            .create_report(sample_id, caller.user_id, fit_for_consumption)
    }

    pub fn upload_report(
        &self,
        caller: &Caller,
        sample_id: i64,
        content: &[u8],
        filename: &str,
    ) -> LabResult<CreatedReport> {
        caller.require_any(EVALUATOR)?;
        let db = self.db.lock()?;
        self.archive(&db)
            .upload_report(sample_id, caller.user_id, content, filename)
    }

    /// Certificate payload for an on-screen preview; nothing is stored.
    pub fn preview_report(&self, caller: &Caller, sample_id: i64) -> LabResult<ReportData> {
        caller.require_any(ANY_ROLE)?;
        let db = self.db.lock()?;
        self.archive(&db).build_report_data(sample_id)
    }

    pub fn reports_for_sample(&self, caller: &Caller, sample_id: i64) -> LabResult<Vec<ReportSummary>> {
        caller.require_any(ANY_ROLE)?;
        let db = self.db.lock()?;
        self.archive(&db).reports_for_sample(sample_id)
    }

    pub fn list_reports(&self, caller: &Caller) -> LabResult<Vec<ReportSummary>> {
        caller.require_any(ANY_ROLE)?;
        let db = self.db.lock()?;
        self.archive(&db).list_reports()
    }

    pub fn report_pdf(&self, caller: &Caller, report_id: i64) -> LabResult<ReportFile> {
        caller.require_any(ANY_ROLE)?;
        let db = self.db.lock()?;
        self.archive(&db).report_pdf(report_id)
    }

    pub fn validate_report(
        &self,
        caller: &Caller,
        report_id: i64,
        action: ReviewAction,
        comment: Option<&str>,
    ) -> LabResult<Report> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        self.archive(&db)
            .validate_report(report_id, caller.user_id, action, comment)
    }

    fn archive<'a>(&'a self, db: &'a Database) -> ReportArchive<'a> {
        ReportArchive::new(db, self.renderer.as_ref(), &self.config)
    }

    // =========================================================================
    // Parameters & Norms
    // =========================================================================

    pub fn sample_types(&self, caller: &Caller) -> LabResult<Vec<SampleType>> {
        caller.require_any(ANY_ROLE)?;
        Ok(ParameterRegistry::sample_types())
    }

    pub fn list_parameters(
        &self,
        caller: &Caller,
        filter: &ParameterFilter,
    ) -> LabResult<Vec<ParameterView>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        ParameterRegistry::new(&db).list_parameters(filter)
    }

    pub fn create_parameter(&self, caller: &Caller, input: &ParameterInput) -> LabResult<i64> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        ParameterRegistry::new(&db).create_parameter(input)
    }

    pub fn update_parameter(
        &self,
        caller: &Caller,
        parameter_id: i64,
        input: &ParameterInput,
    ) -> LabResult<()> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        ParameterRegistry::new(&db).update_parameter(parameter_id, input)
    }

    pub fn delete_parameter(&self, caller: &Caller, parameter_id: i64) -> LabResult<()> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        ParameterRegistry::new(&db).delete_parameter(parameter_id)
    }

    pub fn get_norm(&self, caller: &Caller, parameter_id: i64) -> LabResult<Option<Norm>> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        ParameterRegistry::new(&db).get_norm(parameter_id)
    }

    pub fn upsert_norm(
        &self,
        caller: &Caller,
        parameter_id: i64,
        input: &NormInput,
    ) -> LabResult<Norm> {
        caller.require_any(VALIDATOR)?;
        let db = self.db.lock()?;
        ParameterRegistry::new(&db).upsert_norm(parameter_id, input)
    }
}

fn email_taken(e: db::DbError, email: &str) -> LabError {
    if e.is_constraint_violation() {
        LabError::Conflict(format!(
            "email {} is already registered",
            email.trim().to_lowercase()
        ))
    } else {
        e.into()
    }
}
