//! End-to-end workflow tests through the `Lab` facade.

use std::sync::Arc;
use std::thread;

use labcert_core::db::Database;
use labcert_core::{
    Caller, Lab, LabConfig, LabError, NewRequester, NewStaffMember, NewTestResult, NormInput,
    ParameterInput, ParameterRegistry, ReportState, ReviewAction, Role, SampleRegistration,
    SampleState,
};

struct Staff {
    clerk: Caller,
    evaluator: Caller,
    validator: Caller,
}

fn make_staff(lab: &Lab) -> Staff {
    let mut callers = Vec::new();
    for (name, email, role) in [
        ("Dana Entry", "dana@lab.test", Role::DataEntry),
        ("Eva Ruiz", "eva@lab.test", Role::Evaluator),
        ("Victor Vega", "victor@lab.test", Role::Validator),
    ] {
        let member = lab
            .ensure_staff(&NewStaffMember {
                name: name.into(),
                email: email.into(),
                roles: vec![role],
            })
            .unwrap();
        callers.push(Caller::new(member.id, member.name, member.roles));
    }
    let validator = callers.pop().unwrap();
    let evaluator = callers.pop().unwrap();
    let clerk = callers.pop().unwrap();
    Staff {
        clerk,
        evaluator,
        validator,
    }
}

fn make_requester(lab: &Lab, staff: &Staff) -> i64 {
    lab.create_requester(
        &staff.clerk,
        &NewRequester {
            name: "Acueducto Norte".into(),
            address: Some("Av. Central 10".into()),
            contact: Some("809-555-0100".into()),
            national_id: "00100000001".into(),
        },
    )
    .unwrap()
    .id
}

fn registration(sample_type: &str, requester_id: i64) -> SampleRegistration {
    SampleRegistration {
        sample_type: sample_type.into(),
        date: "2024-01-15".into(),
        time: "09:30".into(),
        origin: Some("Well 3".into()),
        transport_conditions: Some("Refrigerated".into()),
        requester_id,
    }
}

fn water_parameter(lab: &Lab, staff: &Staff, name: &str, norm: NormInput) -> i64 {
    let id = lab
        .create_parameter(
            &staff.validator,
            &ParameterInput {
                name: name.into(),
                sample_type: "water".into(),
                unit: None,
            },
        )
        .unwrap();
    lab.upsert_norm(&staff.validator, id, &norm).unwrap();
    id
}

fn result(sample_id: i64, parameter_id: i64, raw: &str, within_norm: bool) -> NewTestResult {
    NewTestResult {
        sample_id,
        parameter_id,
        result: raw.into(),
        within_norm,
    }
}

#[test]
fn test_water_sample_full_lifecycle() {
    let lab = Lab::open_in_memory(LabConfig::default()).unwrap();
    let staff = make_staff(&lab);
    let requester = make_requester(&lab, &staff);

    let ph = water_parameter(
        &lab,
        &staff,
        "pH",
        NormInput {
            operator: "BETWEEN".into(),
            lower: Some(6.5),
            upper: Some(8.5),
            description: None,
            source: Some("NORDOM 1".into()),
        },
    );
    let coliforms = water_parameter(
        &lab,
        &staff,
        "Total coliforms",
        NormInput {
            operator: "<=".into(),
            lower: None,
            upper: Some(0.0),
            description: None,
            source: None,
        },
    );

    // Intake
    let registered = lab
        .register_sample(&staff.clerk, &registration("water", requester))
        .unwrap();
    assert_eq!(registered.code, "W-000001");
    let pending = lab.list_pending(&staff.validator).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, registered.id);

    // Assignment
    lab.assign_evaluator(
        &staff.validator,
        registered.id,
        staff.evaluator.user_id,
        Some("urgent"),
    )
    .unwrap();
    let history = lab
        .assignment_history(&staff.evaluator, registered.id)
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].evaluator_id, staff.evaluator.user_id);
    assert_eq!(history[0].comment.as_deref(), Some("urgent"));
    assert!(matches!(
        lab.assignment_history(&staff.clerk, registered.id),
        Err(LabError::Authorization(_))
    ));
    let mine = lab.list_assigned_to_me(&staff.evaluator).unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].evaluator_name.as_deref(), Some("Eva Ruiz"));
    assert_eq!(
        lab.parameters_for(&staff.evaluator, registered.id).unwrap().len(),
        2
    );

    // Evaluation
    let suggestion = lab
        .suggest_within_norm(&staff.evaluator, ph, "7.2")
        .unwrap();
    assert!(suggestion.within_norm);
    lab.record_result(&staff.evaluator, &result(registered.id, ph, "7.2", true))
        .unwrap();
    lab.record_result(
        &staff.evaluator,
        &result(registered.id, coliforms, "Ausente", true),
    )
    .unwrap();

    let v1 = lab
        .complete_evaluation(&staff.evaluator, registered.id, true)
        .unwrap();
    assert_eq!(v1.version, 1);
    assert_eq!(
        lab.get_sample(&staff.validator, registered.id).unwrap().state,
        SampleState::AwaitingValidation
    );

    // Validator sends it back
    let returned = lab
        .validate_report(
            &staff.validator,
            v1.report_id,
            ReviewAction::Returned,
            Some("recheck pH"),
        )
        .unwrap();
    assert_eq!(returned.state, ReportState::Returned);
    assert_eq!(returned.review_comment.as_deref(), Some("recheck pH"));
    assert_eq!(
        lab.get_sample(&staff.validator, registered.id).unwrap().state,
        SampleState::InAnalysis
    );

    // Corrected result supersedes the first one
    lab.record_result(&staff.evaluator, &result(registered.id, ph, "7.4", true))
        .unwrap();
    let latest = lab.latest_results(&staff.evaluator, registered.id).unwrap();
    let ph_row = latest.iter().find(|r| r.parameter_id == ph).unwrap();
    assert_eq!(ph_row.result, "7.4");

    let v2 = lab
        .complete_evaluation(&staff.evaluator, registered.id, true)
        .unwrap();
    assert_eq!(v2.version, 2);
    let validated = lab
        .validate_report(&staff.validator, v2.report_id, ReviewAction::Validated, None)
        .unwrap();
    assert_eq!(validated.state, ReportState::Validated);
    assert_eq!(validated.reviewed_by, Some(staff.validator.user_id));

    let certified = lab.list_validated(&staff.validator).unwrap();
    assert_eq!(certified.len(), 1);
    assert_eq!(certified[0].report_version, Some(2));

    let history = lab
        .reports_for_sample(&staff.evaluator, registered.id)
        .unwrap();
    let states: Vec<_> = history.iter().map(|r| (r.report.version, r.report.state)).collect();
    assert_eq!(
        states,
        vec![(2, ReportState::Validated), (1, ReportState::Returned)]
    );

    let pdf = lab.report_pdf(&staff.clerk, v2.report_id).unwrap();
    assert!(pdf.content.starts_with(b"%PDF-"));
    assert_eq!(pdf.filename, "report-W-000001-v2.pdf");
}

#[test]
fn test_codes_stay_unique_across_retirement() {
    let lab = Lab::open_in_memory(LabConfig::default()).unwrap();
    let staff = make_staff(&lab);
    let requester = make_requester(&lab, &staff);

    let first = lab
        .register_sample(&staff.clerk, &registration("water", requester))
        .unwrap();
    lab.retire(&staff.clerk, first.id).unwrap();
    let second = lab
        .register_sample(&staff.clerk, &registration("Agua", requester))
        .unwrap();
    let food = lab
        .register_sample(&staff.clerk, &registration("food", requester))
        .unwrap();

    assert_eq!(first.code, "W-000001");
    assert_eq!(second.code, "W-000002");
    assert_eq!(food.code, "F-000001");
    assert!(lab.list_pending(&staff.validator).unwrap().iter().all(|s| s.id != first.id));
}

#[test]
fn test_listings_are_exclusive() {
    let lab = Lab::open_in_memory(LabConfig::default()).unwrap();
    let staff = make_staff(&lab);
    let requester = make_requester(&lab, &staff);
    let ph = water_parameter(
        &lab,
        &staff,
        "pH",
        NormInput {
            operator: "BETWEEN".into(),
            lower: Some(6.5),
            upper: Some(8.5),
            description: None,
            source: None,
        },
    );

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            lab.register_sample(&staff.clerk, &registration("water", requester))
                .unwrap()
                .id,
        );
    }
    let evaluator_id = staff.evaluator.user_id;
    for &id in &ids[1..] {
        lab.assign_evaluator(&staff.validator, id, evaluator_id, None)
            .unwrap();
    }
    for &id in &ids[2..] {
        lab.record_result(&staff.evaluator, &result(id, ph, "7", true))
            .unwrap();
        let created = lab.complete_evaluation(&staff.evaluator, id, true).unwrap();
        if id == ids[3] {
            lab.validate_report(&staff.validator, created.report_id, ReviewAction::Validated, None)
                .unwrap();
        }
    }

    let pending: Vec<i64> = lab.list_pending(&staff.validator).unwrap().iter().map(|s| s.id).collect();
    let analysis: Vec<i64> = lab
        .list_in_analysis(&staff.validator)
        .unwrap()
        .iter()
        .map(|s| s.sample.id)
        .collect();
    let awaiting: Vec<i64> = lab
        .list_awaiting_validation(&staff.validator)
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect();
    let validated: Vec<i64> = lab
        .list_validated(&staff.validator)
        .unwrap()
        .iter()
        .map(|s| s.sample.id)
        .collect();

    assert_eq!(pending, vec![ids[0]]);
    assert_eq!(analysis, vec![ids[1]]);
    assert_eq!(awaiting, vec![ids[2]]);
    assert_eq!(validated, vec![ids[3]]);
}

#[test]
fn test_retire_only_while_received() {
    let lab = Lab::open_in_memory(LabConfig::default()).unwrap();
    let staff = make_staff(&lab);
    let requester = make_requester(&lab, &staff);
    let sample = lab
        .register_sample(&staff.clerk, &registration("water", requester))
        .unwrap();
    lab.assign_evaluator(&staff.validator, sample.id, staff.evaluator.user_id, None)
        .unwrap();

    assert!(matches!(
        lab.retire(&staff.validator, sample.id),
        Err(LabError::Conflict(_))
    ));
    assert!(matches!(
        lab.retire(&staff.evaluator, sample.id),
        Err(LabError::Authorization(_))
    ));
    assert!(matches!(
        lab.retire(&staff.clerk, 999),
        Err(LabError::NotFound(_))
    ));
}

#[test]
fn test_completion_requires_results() {
    let lab = Lab::open_in_memory(LabConfig::default()).unwrap();
    let staff = make_staff(&lab);
    let requester = make_requester(&lab, &staff);
    let sample = lab
        .register_sample(&staff.clerk, &registration("water", requester))
        .unwrap();

    assert!(matches!(
        lab.complete_evaluation(&staff.evaluator, sample.id, true),
        Err(LabError::Precondition(_))
    ));
    lab.assign_evaluator(&staff.validator, sample.id, staff.evaluator.user_id, None)
        .unwrap();
    assert!(matches!(
        lab.complete_evaluation(&staff.evaluator, sample.id, true),
        Err(LabError::Precondition(_))
    ));
    assert!(lab
        .reports_for_sample(&staff.evaluator, sample.id)
        .unwrap()
        .is_empty());
}

#[test]
fn test_validation_happens_once() {
    let lab = Lab::open_in_memory(LabConfig::default()).unwrap();
    let staff = make_staff(&lab);
    let requester = make_requester(&lab, &staff);
    let ph = water_parameter(
        &lab,
        &staff,
        "pH",
        NormInput {
            operator: "".into(),
            lower: Some(6.5),
            upper: Some(8.5),
            description: None,
            source: None,
        },
    );
    let sample = lab
        .register_sample(&staff.clerk, &registration("water", requester))
        .unwrap();
    lab.assign_evaluator(&staff.validator, sample.id, staff.evaluator.user_id, None)
        .unwrap();
    lab.record_result(&staff.evaluator, &result(sample.id, ph, "9", false))
        .unwrap();
    let created = lab
        .complete_evaluation(&staff.evaluator, sample.id, false)
        .unwrap();

    lab.validate_report(&staff.validator, created.report_id, ReviewAction::Validated, None)
        .unwrap();
    assert!(matches!(
        lab.validate_report(&staff.validator, created.report_id, ReviewAction::Returned, None),
        Err(LabError::Conflict(_))
    ));

    let report = &lab
        .reports_for_sample(&staff.validator, sample.id)
        .unwrap()[0]
        .report;
    assert_eq!(report.state, ReportState::Validated);
    assert_eq!(
        lab.get_sample(&staff.validator, sample.id).unwrap().state,
        SampleState::Validated
    );
}

#[test]
fn test_racing_assign_and_retire() {
    for _ in 0..20 {
        let lab = Arc::new(Lab::open_in_memory(LabConfig::default()).unwrap());
        let staff = make_staff(&lab);
        let requester = make_requester(&lab, &staff);
        let sample = lab
            .register_sample(&staff.clerk, &registration("water", requester))
            .unwrap();

        let assign = {
            let lab = Arc::clone(&lab);
            let validator = staff.validator.clone();
            let evaluator_id = staff.evaluator.user_id;
            thread::spawn(move || lab.assign_evaluator(&validator, sample.id, evaluator_id, None))
        };
        let retire = {
            let lab = Arc::clone(&lab);
            let clerk = staff.clerk.clone();
            thread::spawn(move || lab.retire(&clerk, sample.id))
        };
        let assigned = assign.join().unwrap();
        let retired = retire.join().unwrap();

        assert!(assigned.is_ok() != retired.is_ok());
        let state = lab.get_sample(&staff.validator, sample.id).unwrap();
        if assigned.is_ok() {
            assert_eq!(state.state, SampleState::InAnalysis);
            assert!(!state.retired);
            assert!(matches!(retired, Err(LabError::Conflict(_))));
        } else {
            assert!(state.retired);
            assert_eq!(state.state, SampleState::Received);
            assert!(matches!(assigned, Err(LabError::Conflict(_))));
        }
    }
}

#[test]
fn test_uploaded_pdf_round_trips_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let lab = Lab::open(dir.path().join("lab.sqlite"), LabConfig::default()).unwrap();
    let staff = make_staff(&lab);
    let requester = make_requester(&lab, &staff);
    let sample = lab
        .register_sample(&staff.clerk, &registration("food", requester))
        .unwrap();

    let mut pdf = b"%PDF-1.4\n".to_vec();
    pdf.extend((0..=255u8).cycle().take(70_000));
    pdf.extend_from_slice(b"\n%%EOF\n");

    assert!(matches!(
        lab.upload_report(&staff.evaluator, sample.id, &pdf, "signed.pdf"),
        Err(LabError::Precondition(_))
    ));
    lab.assign_evaluator(&staff.validator, sample.id, staff.evaluator.user_id, None)
        .unwrap();

    let created = lab
        .upload_report(&staff.evaluator, sample.id, &pdf, "signed.pdf")
        .unwrap();
    assert_eq!(created.version, 1);
    let file = lab.report_pdf(&staff.validator, created.report_id).unwrap();
    assert_eq!(file.content, pdf);
    assert_eq!(file.filename, "signed.pdf");
    assert_eq!(
        lab.get_sample(&staff.validator, sample.id).unwrap().state,
        SampleState::InAnalysis
    );
}

#[test]
fn test_certified_sample_accepts_no_new_report_versions() {
    let lab = Lab::open_in_memory(LabConfig::default()).unwrap();
    let staff = make_staff(&lab);
    let requester = make_requester(&lab, &staff);
    let ph = water_parameter(
        &lab,
        &staff,
        "pH",
        NormInput {
            operator: "BETWEEN".into(),
            lower: Some(6.5),
            upper: Some(8.5),
            description: None,
            source: None,
        },
    );
    let sample = lab
        .register_sample(&staff.clerk, &registration("water", requester))
        .unwrap();
    lab.assign_evaluator(&staff.validator, sample.id, staff.evaluator.user_id, None)
        .unwrap();
    lab.record_result(&staff.evaluator, &result(sample.id, ph, "7.1", true))
        .unwrap();

    // Extra versions are fine while the sample waits for review
    let v1 = lab
        .complete_evaluation(&staff.evaluator, sample.id, true)
        .unwrap();
    let v2 = lab.create_report(&staff.evaluator, sample.id, true).unwrap();
    assert_eq!(v2.version, 2);
    lab.validate_report(&staff.validator, v2.report_id, ReviewAction::Validated, None)
        .unwrap();

    let late_pdf = b"%PDF-1.4\nlate\n%%EOF\n";
    assert!(matches!(
        lab.upload_report(&staff.evaluator, sample.id, late_pdf, "late.pdf"),
        Err(LabError::Precondition(_))
    ));
    assert!(matches!(
        lab.create_report(&staff.evaluator, sample.id, false),
        Err(LabError::Precondition(_))
    ));

    let certified = lab.list_validated(&staff.validator).unwrap();
    assert_eq!(certified[0].report_version, Some(2));
    let history: Vec<_> = lab
        .reports_for_sample(&staff.evaluator, sample.id)
        .unwrap()
        .iter()
        .map(|r| (r.report.version, r.report.state))
        .collect();
    assert_eq!(
        history,
        vec![(2, ReportState::Validated), (1, ReportState::Created)]
    );
    assert_ne!(v1.report_id, v2.report_id);
}

#[test]
fn test_norm_upsert_twice_keeps_one_row() {
    let db = Database::open_in_memory().unwrap();
    let registry = ParameterRegistry::new(&db);
    let id = registry
        .create_parameter(&ParameterInput {
            name: "Turbidity".into(),
            sample_type: "water".into(),
            unit: Some("NTU".into()),
        })
        .unwrap();

    for upper in [5.0, 4.0] {
        registry
            .upsert_norm(
                id,
                &NormInput {
                    operator: "<=".into(),
                    lower: None,
                    upper: Some(upper),
                    description: None,
                    source: None,
                },
            )
            .unwrap();
    }

    let norms: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM norms", [], |row| row.get(0))
        .unwrap();
    let links: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM parameter_norms", [], |row| row.get(0))
        .unwrap();
    assert_eq!((norms, links), (1, 1));
    assert_eq!(registry.get_norm(id).unwrap().unwrap().upper, Some(4.0));
}
